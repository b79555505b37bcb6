//! Response Interceptor Module
//!
//! Per-key entry state and the sink wrapper that copies a response into the
//! entry's buffer while forwarding it to the client.

use std::io;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::OnceLock;

use axum::http::{
    header::{CACHE_CONTROL, CONTENT_LENGTH, CONTENT_TYPE, LAST_MODIFIED},
    HeaderMap, HeaderValue, Method, StatusCode,
};
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use tracing::{debug, info, warn};

use crate::cache::entry::{EntryBuffer, UNPROBED};
use crate::cache::store::{ByteBudget, Cache};
use crate::serve::{parse_http_date, serve_content, serve_file, RequestHead, ResponseSink};
use crate::thumbs::ThumbnailSpec;

/// `Cache-Control` value set on every response that reaches a cache entry.
pub const CACHE_CONTROL_VALUE: &str = "public, max-age=604800";

// == Phase ==
/// Lifecycle of an entry, and of one request's attempt to populate it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    /// No length has been accepted yet
    Unprobed,
    /// Buffer allocated, bytes being copied in
    Populating,
    /// Buffer complete, served from memory
    Valid,
    /// This request forwards only
    Uncacheable,
}

// == Entry Source ==
/// Where an entry's bytes come from when it is not valid.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EntrySource {
    /// A file under the cache root
    File(PathBuf),
    /// A derived thumbnail
    Thumbnail(ThumbnailSpec),
}

// == Entry Slot ==
/// Content attached to one index node. The entry is created at most once.
#[derive(Debug, Default)]
pub struct EntrySlot {
    entry: OnceLock<Entry>,
    detached: AtomicBool,
}

impl EntrySlot {
    /// Returns the entry, creating it from `source` on first use.
    pub fn entry_or_init(&self, source: impl FnOnce() -> EntrySource) -> &Entry {
        self.entry.get_or_init(|| Entry::new(source()))
    }

    pub fn entry(&self) -> Option<&Entry> {
        self.entry.get()
    }

    /// True once the node was removed from the index.
    pub fn is_detached(&self) -> bool {
        self.detached.load(Ordering::SeqCst)
    }

    /// Marks the slot removed and frees its buffer and byte reservation.
    pub(crate) fn release(&self, budget: &ByteBudget) {
        self.detached.store(true, Ordering::SeqCst);
        if let Some(entry) = self.entry.get() {
            entry.state.lock().reset(budget);
        }
    }
}

#[derive(Debug, Default)]
struct EntryState {
    buffer: EntryBuffer,
    content_type: Option<HeaderValue>,
    modified: Option<DateTime<Utc>>,
    status: Option<StatusCode>,
    reserved: i64,
    generation: u64,
}

impl EntryState {
    fn reset(&mut self, budget: &ByteBudget) {
        budget.release(self.reserved);
        self.reserved = 0;
        self.buffer = EntryBuffer::unprobed();
        self.content_type = None;
        self.modified = None;
        self.generation += 1;
    }
}

// == Entry ==
/// Cached payload and metadata for one key.
#[derive(Debug)]
pub struct Entry {
    source: EntrySource,
    state: Mutex<EntryState>,
}

impl Entry {
    pub fn new(source: EntrySource) -> Self {
        Self {
            source,
            state: Mutex::new(EntryState::default()),
        }
    }

    pub fn phase(&self) -> Phase {
        let state = self.state.lock();
        if state.buffer.is_valid() {
            Phase::Valid
        } else if state.buffer.declared_length() == UNPROBED {
            Phase::Unprobed
        } else {
            Phase::Populating
        }
    }

    pub fn is_valid(&self) -> bool {
        self.state.lock().buffer.is_valid()
    }

    pub fn declared_length(&self) -> i64 {
        self.state.lock().buffer.declared_length()
    }

    pub fn written(&self) -> usize {
        self.state.lock().buffer.written()
    }

    // == Handle ==
    /// Serves one request for this entry.
    ///
    /// A recorded 404 is replayed. A valid buffer is served with range support.
    /// Otherwise the source is streamed through a [`TeeSink`], which populates
    /// the buffer as a side effect.
    pub(crate) async fn handle<S: ResponseSink>(
        &self,
        slot: &EntrySlot,
        cache: &Cache,
        key: &str,
        sink: &mut S,
        req: &RequestHead,
    ) -> io::Result<()> {
        let (status, cached) = {
            let state = self.state.lock();
            let cached = state
                .buffer
                .cursor()
                .map(|cursor| (cursor, state.content_type.clone(), state.modified));
            (state.status, cached)
        };

        if status == Some(StatusCode::NOT_FOUND) {
            sink.write_header(StatusCode::NOT_FOUND);
            return Ok(());
        }
        sink.headers_mut().insert(
            CACHE_CONTROL,
            HeaderValue::from_static(CACHE_CONTROL_VALUE),
        );

        if let Some((mut cursor, content_type, modified)) = cached {
            cache.counters().record_hit();
            if let Some(content_type) = content_type {
                sink.headers_mut().insert(CONTENT_TYPE, content_type);
            }
            let size = cursor.len();
            return serve_content(sink, req, modified, size, &mut cursor).await;
        }

        cache.counters().record_miss();
        let path = match cache.resolve(&self.source).await {
            Some(path) => path,
            None => {
                sink.write_header(StatusCode::NO_CONTENT);
                return Ok(());
            }
        };
        let mut tee = TeeSink::new(sink, cache, slot, self, key, &req.method);
        let result = serve_file(&mut tee, req, &path).await;
        tee.finish();
        result
    }
}

// == Tee Sink ==
/// Wraps the client sink for one request against one entry.
///
/// Every byte is forwarded to the client first. If this request won the probe
/// on a `200 OK`, the bytes are also copied into the entry's buffer. A failed
/// client write, or a response that ends short, releases the buffer so the
/// next request can try again. A `HEAD` request carries no body and never
/// probes.
pub struct TeeSink<'a, S: ResponseSink> {
    client: &'a mut S,
    cache: &'a Cache,
    slot: &'a EntrySlot,
    entry: &'a Entry,
    key: &'a str,
    phase: Phase,
    generation: u64,
}

impl<'a, S: ResponseSink> TeeSink<'a, S> {
    pub fn new(
        client: &'a mut S,
        cache: &'a Cache,
        slot: &'a EntrySlot,
        entry: &'a Entry,
        key: &'a str,
        method: &Method,
    ) -> Self {
        let phase = if *method == Method::HEAD {
            Phase::Uncacheable
        } else {
            Phase::Unprobed
        };
        Self {
            client,
            cache,
            slot,
            entry,
            key,
            phase,
            generation: 0,
        }
    }

    /// This request's phase.
    pub fn phase(&self) -> Phase {
        self.phase
    }

    /// Ends the request. An entry this request left incomplete is released.
    pub fn finish(&mut self) {
        if self.phase == Phase::Populating {
            debug!(key = self.key, "Response ended before entry was complete");
            self.abort();
        }
    }

    fn probe(&mut self) {
        let (declared, content_type, modified) = read_probe_headers(self.client.headers_mut());
        let budget = self.cache.budget();

        let evicted = {
            let mut state = self.entry.state.lock();
            if state.buffer.declared_length() != UNPROBED || self.slot.is_detached() {
                self.phase = Phase::Uncacheable;
                return;
            }
            match declared {
                None => {
                    warn!(key = self.key, "Unparseable Content-Length, not caching");
                    self.phase = Phase::Uncacheable;
                    Vec::new()
                }
                Some(len) if len <= 0 => {
                    self.phase = Phase::Uncacheable;
                    Vec::new()
                }
                Some(len) if !budget.fits_item(len) => {
                    debug!(
                        key = self.key,
                        len,
                        max_item_bytes = budget.item_limit(),
                        "Item exceeds per-item limit, not caching"
                    );
                    self.phase = Phase::Uncacheable;
                    Vec::new()
                }
                Some(len) => {
                    let mut evicted = Vec::new();
                    if budget.reserve(len) {
                        info!(
                            max_total_bytes = budget.total_limit(),
                            bytes = budget.current(),
                            "Total byte limit exceeded"
                        );
                        evicted = self.cache.evict_excluding(self.key);
                    }
                    state.buffer = EntryBuffer::allocate(len);
                    state.content_type = content_type;
                    state.modified = modified;
                    state.reserved = len;
                    state.generation += 1;
                    self.generation = state.generation;
                    self.phase = Phase::Populating;
                    debug!(key = self.key, len, "Populating entry");
                    evicted
                }
            }
        };
        // Evicted entries lock their own state; never while holding ours.
        self.cache.release(evicted);
    }

    fn populate(&mut self, chunk: &[u8]) {
        let complete = {
            let mut state = self.entry.state.lock();
            if state.generation != self.generation {
                None
            } else {
                state.buffer.populate(chunk);
                Some(state.buffer.is_valid())
            }
        };
        match complete {
            None => {
                debug!(key = self.key, "Entry released while populating");
                self.phase = Phase::Uncacheable;
            }
            Some(true) => {
                debug!(key = self.key, "Entry populated");
                self.cache.counters().record_populated();
                self.phase = Phase::Valid;
            }
            Some(false) => {}
        }
    }

    fn abort(&mut self) {
        if self.phase != Phase::Populating {
            return;
        }
        self.phase = Phase::Uncacheable;
        let released = {
            let mut state = self.entry.state.lock();
            if state.generation == self.generation && !state.buffer.is_valid() {
                state.reset(self.cache.budget());
                true
            } else {
                false
            }
        };
        if released {
            self.cache.counters().record_aborted();
        }
    }
}

type ProbeHeaders = (Option<i64>, Option<HeaderValue>, Option<DateTime<Utc>>);

/// Declared length, content type and modification time from response headers.
fn read_probe_headers(headers: &HeaderMap) -> ProbeHeaders {
    let declared = headers
        .get(CONTENT_LENGTH)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.trim().parse::<i64>().ok());
    let modified = headers
        .get(LAST_MODIFIED)
        .and_then(|v| v.to_str().ok())
        .and_then(parse_http_date);
    (declared, headers.get(CONTENT_TYPE).cloned(), modified)
}

impl<S: ResponseSink> ResponseSink for TeeSink<'_, S> {
    fn headers_mut(&mut self) -> &mut HeaderMap {
        self.client.headers_mut()
    }

    fn write_header(&mut self, status: StatusCode) {
        self.entry.state.lock().status = Some(status);
        if status == StatusCode::OK && self.phase == Phase::Unprobed {
            self.probe();
        }
        self.client.write_header(status);
    }

    async fn write(&mut self, chunk: &[u8]) -> io::Result<()> {
        if let Err(err) = self.client.write(chunk).await {
            if self.phase == Phase::Populating {
                debug!(key = self.key, error = %err, "Client write failed, dropping partial entry");
                self.abort();
            }
            return Err(err);
        }
        if self.phase == Phase::Populating {
            self.populate(chunk);
        }
        Ok(())
    }
}

impl<S: ResponseSink> Drop for TeeSink<'_, S> {
    fn drop(&mut self) {
        self.abort();
    }
}
