//! File Cache - A write-through in-memory cache for static files
//!
//! Streams files and image thumbnails to clients while copying them into
//! memory, then serves repeat requests from memory with range support.
//! Eviction is an approximate LFU sweep over a key-ordered index.

pub mod api;
pub mod cache;
pub mod config;
pub mod error;
pub mod models;
pub mod serve;
pub mod thumbs;

pub use api::AppState;
pub use cache::{Cache, CacheLimits};
pub use config::Config;
pub use error::{CacheError, Result};
pub use thumbs::ImageCache;
