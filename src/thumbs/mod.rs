//! Thumbs Module
//!
//! Image specialization of the cache. Entries are thumbnails keyed by the
//! image identifier plus the requested size, rendered to disk on first use
//! and then served through the same write-through path as plain files.

mod render;

use std::fmt;
use std::io;
use std::path::PathBuf;

use axum::http::StatusCode;
use tracing::{debug, info};

use crate::cache::{Cache, CacheLimits, EntrySource, StatsSnapshot};
use crate::error::{CacheError, Result};
use crate::serve::{is_safe_path, write_error, RequestHead, ResponseSink};

pub use render::{extension, identifier, SizeBounds, ThumbnailSpec, Thumbnailer};

// == File Identifier ==
/// Identifier whose thumbnails are removed together. Built from a file name
/// (extension dropped) or from a numeric id.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileIdentifier(String);

impl FileIdentifier {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for FileIdentifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for FileIdentifier {
    fn from(name: &str) -> Self {
        Self(identifier(name).to_string())
    }
}

impl From<String> for FileIdentifier {
    fn from(name: String) -> Self {
        Self::from(name.as_str())
    }
}

macro_rules! numeric_identifier {
    ($($ty:ty),*) => {
        $(impl From<$ty> for FileIdentifier {
            fn from(id: $ty) -> Self {
                Self(id.to_string())
            }
        })*
    };
}

numeric_identifier!(i32, i64, u32, u64);

// == Image Cache ==
/// Cache of thumbnails derived from the images under a root directory.
#[derive(Debug)]
pub struct ImageCache {
    cache: Cache,
    thumb_dir: PathBuf,
}

impl ImageCache {
    pub fn new(limits: CacheLimits, thumbnailer: Thumbnailer) -> Self {
        let thumb_dir = thumbnailer.thumb_dir().to_path_buf();
        Self {
            cache: Cache::with_thumbnailer(limits, thumbnailer),
            thumb_dir,
        }
    }

    /// Serves `name` scaled to fit a `size` step square.
    pub async fn handle<S: ResponseSink>(
        &self,
        sink: &mut S,
        req: &RequestHead,
        size: &str,
        name: &str,
    ) -> io::Result<()> {
        self.serve(ThumbnailSpec::square(size, name), sink, req)
            .await
    }

    /// Serves `name` at `width` × `height` steps, filled and cropped when
    /// `crop` is `"1"` and fitted otherwise.
    pub async fn handle_ex<S: ResponseSink>(
        &self,
        sink: &mut S,
        req: &RequestHead,
        width: &str,
        height: &str,
        crop: &str,
        name: &str,
    ) -> io::Result<()> {
        self.serve(ThumbnailSpec::sized(width, height, crop, name), sink, req)
            .await
    }

    async fn serve<S: ResponseSink>(
        &self,
        spec: ThumbnailSpec,
        sink: &mut S,
        req: &RequestHead,
    ) -> io::Result<()> {
        if spec.name.is_empty() || !is_safe_path(&spec.name) {
            debug!(name = %spec.name, "Rejecting unsafe image name");
            return write_error(sink, StatusCode::BAD_REQUEST).await;
        }
        let key = spec.key.clone();
        self.cache
            .serve(&key, move || EntrySource::Thumbnail(spec), sink, req)
            .await
    }

    /// Drops one cached thumbnail. The file on disk is kept.
    pub fn remove(&self, key: &str) -> bool {
        self.cache.remove(key)
    }

    // == Remove Files ==
    /// Deletes every rendered thumbnail of `id` and its cache entry.
    ///
    /// Returns how many files were deleted. A missing thumbnail directory
    /// counts as nothing to delete.
    pub async fn remove_files(&self, id: impl Into<FileIdentifier>) -> Result<usize> {
        let id = id.into();
        if id.as_str().is_empty() {
            return Err(CacheError::InvalidRequest(
                "identifier cannot be empty".to_string(),
            ));
        }
        let prefix = format!("{}_", id);

        let mut dir = match tokio::fs::read_dir(&self.thumb_dir).await {
            Ok(dir) => dir,
            Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(0),
            Err(err) => return Err(err.into()),
        };

        let mut removed = 0;
        while let Some(item) = dir.next_entry().await? {
            let name = item.file_name().to_string_lossy().into_owned();
            if !name.starts_with(&prefix) {
                continue;
            }
            tokio::fs::remove_file(item.path()).await?;
            self.cache.remove(identifier(&name));
            removed += 1;
        }

        info!(id = %id, removed, "Removed thumbnails");
        Ok(removed)
    }

    // == Accessors ==
    pub fn cache(&self) -> &Cache {
        &self.cache
    }

    pub fn stats(&self) -> StatsSnapshot {
        self.cache.stats()
    }
}
