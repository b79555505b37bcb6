//! Thumbnail derivation
//!
//! Maps a requested size onto a file under the thumbnail directory, rendering
//! it from the original image the first time it is asked for.

use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use image::{imageops::FilterType, DynamicImage, ImageFormat};
use tempfile::NamedTempFile;
use tracing::debug;

use crate::error::{CacheError, Result};
use crate::serve::is_safe_path;

// == Size Bounds ==
/// Allowed thumbnail sizes, in steps of `step_px` pixels.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SizeBounds {
    pub min_step: u32,
    pub max_step: u32,
    pub step_px: u32,
}

impl Default for SizeBounds {
    fn default() -> Self {
        Self {
            min_step: 3,
            max_step: 19,
            step_px: 100,
        }
    }
}

impl SizeBounds {
    /// Parses a step count, clamps it into bounds and converts it to pixels.
    pub fn pixels(&self, step: &str) -> Result<u32> {
        let step: i64 = step
            .trim()
            .parse()
            .map_err(|_| CacheError::InvalidRequest(format!("bad thumbnail size {:?}", step)))?;
        let step = step.max(self.min_step as i64).min(self.max_step as i64) as u32;
        Ok(step * self.step_px)
    }
}

// == Thumbnail Spec ==
/// One requested rendition of an image.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ThumbnailSpec {
    /// Cache key, also the derived file's stem
    pub key: String,
    /// Original file name below the image root
    pub name: String,
    pub width: String,
    /// Absent for square thumbnails
    pub height: Option<String>,
    /// Fill and center-crop instead of fitting
    pub crop: bool,
}

impl ThumbnailSpec {
    /// A thumbnail fitting into a `size` × `size` square.
    pub fn square(size: &str, name: &str) -> Self {
        Self {
            key: format!("{}_{}", identifier(name), size),
            name: name.to_string(),
            width: size.to_string(),
            height: None,
            crop: false,
        }
    }

    /// A `width` × `height` thumbnail, cropped to fill when `crop` is `"1"`.
    pub fn sized(width: &str, height: &str, crop: &str, name: &str) -> Self {
        Self {
            key: format!("{}_{}x{}-{}", identifier(name), width, height, crop),
            name: name.to_string(),
            width: width.to_string(),
            height: Some(height.to_string()),
            crop: crop == "1",
        }
    }
}

/// File name up to its first `.`.
pub fn identifier(name: &str) -> &str {
    name.split_once('.').map_or(name, |(id, _)| id)
}

/// File name suffix from its first `.`, including the dot.
pub fn extension(name: &str) -> &str {
    name.find('.').map_or("", |i| &name[i..])
}

// == Thumbnailer ==
/// Renders thumbnails of images under `root` into `thumb_dir`.
#[derive(Debug, Clone)]
pub struct Thumbnailer {
    root: PathBuf,
    thumb_dir: PathBuf,
    bounds: SizeBounds,
}

impl Thumbnailer {
    pub fn new(root: impl Into<PathBuf>, thumb_dir: impl Into<PathBuf>, bounds: SizeBounds) -> Self {
        Self {
            root: root.into(),
            thumb_dir: thumb_dir.into(),
            bounds,
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn thumb_dir(&self) -> &Path {
        &self.thumb_dir
    }

    /// Where the rendition for `spec` lives.
    pub fn path_for(&self, spec: &ThumbnailSpec) -> PathBuf {
        self.thumb_dir
            .join(format!("{}{}", spec.key, extension(&spec.name)))
    }

    /// Returns the rendition for `spec`, rendering it if it does not exist yet.
    pub async fn derive(&self, spec: &ThumbnailSpec) -> Result<PathBuf> {
        let width = self.bounds.pixels(&spec.width)?;
        let height = match &spec.height {
            Some(height) => Some(self.bounds.pixels(height)?),
            None => None,
        };
        if spec.name.is_empty() || !is_safe_path(&spec.name) {
            return Err(CacheError::InvalidRequest(format!(
                "bad image name {:?}",
                spec.name
            )));
        }

        let target = self.path_for(spec);
        if tokio::fs::metadata(&target).await.is_ok() {
            return Ok(target);
        }
        if let Some(dir) = target.parent() {
            tokio::fs::create_dir_all(dir).await?;
        }

        let source = self.root.join(&spec.name);
        let crop = spec.crop;
        let output = target.clone();
        tokio::task::spawn_blocking(move || render(&source, &output, width, height, crop))
            .await
            .map_err(|err| CacheError::Internal(format!("thumbnail task failed: {}", err)))??;

        debug!(key = %spec.key, path = %target.display(), width, ?height, "Thumbnail rendered");
        Ok(target)
    }
}

/// Resizes `source` and writes it to `target` through a temp file.
fn render(source: &Path, target: &Path, width: u32, height: Option<u32>, crop: bool) -> Result<()> {
    let img = image::open(source)?;
    let img = match height {
        Some(height) if crop => img.resize_to_fill(width, height, FilterType::Lanczos3),
        Some(height) => fit(img, width, height),
        None => fit(img, width, width),
    };

    let format = ImageFormat::from_path(target)?;
    let img = match format {
        ImageFormat::Jpeg => DynamicImage::ImageRgb8(img.to_rgb8()),
        _ => img,
    };

    let dir = target.parent().unwrap_or_else(|| Path::new("."));
    let mut tmp = NamedTempFile::new_in(dir)?;
    {
        let mut out = BufWriter::new(tmp.as_file_mut());
        img.write_to(&mut out, format)?;
        out.flush()?;
    }
    tmp.persist(target).map_err(|err| CacheError::Io(err.error))?;
    Ok(())
}

/// Scales down to fit the box, never up.
fn fit(img: DynamicImage, width: u32, height: u32) -> DynamicImage {
    if img.width() <= width && img.height() <= height {
        img
    } else {
        img.resize(width, height, FilterType::Lanczos3)
    }
}
