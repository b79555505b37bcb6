//! Cache Module
//!
//! Write-through response cache: a key-ordered index with usage counters,
//! approximate LFU eviction, per-key entry buffers and the interceptor that
//! fills them while a response streams to the client.

mod entry;
mod evict;
mod interceptor;
mod stats;
mod store;
mod tree;


// Re-export public types
pub use entry::{EntryBuffer, EntryCursor, UNPROBED};
pub use evict::{decay, percentile_threshold, DECAY_FLOOR};
pub use interceptor::{Entry, EntrySlot, EntrySource, Phase, TeeSink, CACHE_CONTROL_VALUE};
pub use stats::{CacheStats, StatsLimits, StatsSnapshot};
pub use store::{ByteBudget, Cache, CacheLimits};
pub use tree::Index;

// == Public Constants ==
/// Bytes in one configured megabyte.
pub const BYTES_PER_MB: i64 = 1_000_000;
