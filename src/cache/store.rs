//! Cache Store Module
//!
//! Façade over the index, the byte budget and the response interceptor.

use std::io;
use std::path::PathBuf;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;

use axum::http::StatusCode;
use tracing::{debug, warn};

use crate::cache::interceptor::{EntrySlot, EntrySource};
use crate::cache::stats::{CacheStats, StatsLimits, StatsSnapshot};
use crate::cache::tree::Index;
use crate::serve::{is_safe_path, write_error, RequestHead, ResponseSink};
use crate::thumbs::Thumbnailer;

// == Cache Limits ==
/// Bounds on item count and buffered bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CacheLimits {
    /// Keys held before an eviction sweep runs
    pub max_items: usize,
    /// Largest response that will be buffered
    pub max_item_bytes: i64,
    /// Total buffered bytes before an eviction sweep runs
    pub max_total_bytes: i64,
}

// == Byte Budget ==
/// Atomic accounting of bytes reserved by entry buffers.
#[derive(Debug)]
pub struct ByteBudget {
    item_limit: i64,
    total_limit: i64,
    current: AtomicI64,
}

impl ByteBudget {
    pub fn new(item_limit: i64, total_limit: i64) -> Self {
        Self {
            item_limit,
            total_limit,
            current: AtomicI64::new(0),
        }
    }

    pub fn item_limit(&self) -> i64 {
        self.item_limit
    }

    pub fn total_limit(&self) -> i64 {
        self.total_limit
    }

    pub fn current(&self) -> i64 {
        self.current.load(Ordering::Acquire)
    }

    /// True if an item of `len` bytes may be buffered at all.
    pub fn fits_item(&self, len: i64) -> bool {
        len <= self.item_limit
    }

    /// Reserves `len` bytes. Returns true if the total is now over the limit.
    pub fn reserve(&self, len: i64) -> bool {
        self.current.fetch_add(len, Ordering::AcqRel) + len > self.total_limit
    }

    pub fn release(&self, len: i64) {
        if len != 0 {
            self.current.fetch_sub(len, Ordering::AcqRel);
        }
    }
}

// == Cache ==
/// Write-through cache of responses keyed by path.
///
/// The first request for a key streams the source to the client and copies
/// it into memory on the way; later requests are answered from memory.
#[derive(Debug)]
pub struct Cache {
    index: Index<EntrySlot>,
    budget: ByteBudget,
    stats: CacheStats,
    root: PathBuf,
    thumbnailer: Option<Thumbnailer>,
}

impl Cache {
    // == Constructors ==
    /// Creates a cache serving files below `root`.
    pub fn new(limits: CacheLimits, root: impl Into<PathBuf>) -> Self {
        Self {
            index: Index::new(limits.max_items),
            budget: ByteBudget::new(limits.max_item_bytes, limits.max_total_bytes),
            stats: CacheStats::new(),
            root: root.into(),
            thumbnailer: None,
        }
    }

    /// Creates a cache whose entries are thumbnails derived by `thumbnailer`.
    pub(crate) fn with_thumbnailer(limits: CacheLimits, thumbnailer: Thumbnailer) -> Self {
        let root = thumbnailer.root().to_path_buf();
        Self {
            thumbnailer: Some(thumbnailer),
            ..Self::new(limits, root)
        }
    }

    // == Handle ==
    /// Serves the file at `path` below the root, populating or reading its entry.
    pub async fn handle<S: ResponseSink>(
        &self,
        sink: &mut S,
        req: &RequestHead,
        path: &str,
    ) -> io::Result<()> {
        let key = path.trim_start_matches('/');
        if key.is_empty() || !is_safe_path(key) {
            debug!(path, "Rejecting unsafe path");
            return write_error(sink, StatusCode::BAD_REQUEST).await;
        }
        let file = self.root.join(key);
        self.serve(key, move || EntrySource::File(file), sink, req)
            .await
    }

    /// Serves `key`, creating its entry from `source` on first use.
    pub(crate) async fn serve<S, F>(
        &self,
        key: &str,
        source: F,
        sink: &mut S,
        req: &RequestHead,
    ) -> io::Result<()>
    where
        S: ResponseSink,
        F: FnOnce() -> EntrySource,
    {
        let slot = self.get(key);
        let entry = slot.entry_or_init(source);
        entry.handle(&slot, self, key, sink, req).await
    }

    // == Get ==
    /// Looks up `key`, creating its node on a miss and counting a hit otherwise.
    pub fn get(&self, key: &str) -> Arc<EntrySlot> {
        let (slot, evicted) = self.index.get(key);
        self.release(evicted);
        slot
    }

    // == Remove ==
    /// Drops `key` and its buffered bytes. Returns false if it was not cached.
    pub fn remove(&self, key: &str) -> bool {
        let key = key.trim_start_matches('/');
        match self.index.remove(key) {
            Some(slot) => {
                slot.release(&self.budget);
                debug!(key, "Removed entry");
                true
            }
            None => false,
        }
    }

    // == Eviction ==
    /// Sweeps the index, sparing `key`. The returned slots still hold their
    /// bytes until passed to [`Cache::release`].
    pub(crate) fn evict_excluding(&self, key: &str) -> Vec<Arc<EntrySlot>> {
        self.index.evict(Some(key))
    }

    /// Frees the buffers of evicted slots.
    pub(crate) fn release(&self, evicted: Vec<Arc<EntrySlot>>) {
        if evicted.is_empty() {
            return;
        }
        self.stats.record_evictions(evicted.len());
        for slot in evicted {
            slot.release(&self.budget);
        }
    }

    /// Source file for an entry, deriving thumbnails on demand.
    pub(crate) async fn resolve(&self, source: &EntrySource) -> Option<PathBuf> {
        match source {
            EntrySource::File(path) => Some(path.clone()),
            EntrySource::Thumbnail(spec) => {
                let thumbnailer = self.thumbnailer.as_ref()?;
                match thumbnailer.derive(spec).await {
                    Ok(path) => Some(path),
                    Err(err) => {
                        warn!(key = %spec.key, error = %err, "Thumbnail unavailable");
                        None
                    }
                }
            }
        }
    }

    // == Accessors ==
    pub fn index(&self) -> &Index<EntrySlot> {
        &self.index
    }

    pub fn budget(&self) -> &ByteBudget {
        &self.budget
    }

    pub(crate) fn counters(&self) -> &CacheStats {
        &self.stats
    }

    /// Current number of keys.
    pub fn len(&self) -> usize {
        self.index.len()
    }

    pub fn is_empty(&self) -> bool {
        self.index.is_empty()
    }

    /// Bytes currently reserved by entry buffers.
    pub fn current_bytes(&self) -> i64 {
        self.budget.current()
    }

    // == Stats ==
    pub fn stats(&self) -> StatsSnapshot {
        self.stats.snapshot(
            self.len(),
            self.current_bytes(),
            StatsLimits {
                max_items: self.index.item_limit(),
                max_item_bytes: self.budget.item_limit(),
                max_total_bytes: self.budget.total_limit(),
            },
        )
    }
}
