//! Configuration Module
//!
//! Handles loading and managing server configuration from environment variables.

use std::env;
use std::path::PathBuf;
use std::str::FromStr;

use crate::cache::{CacheLimits, BYTES_PER_MB};
use crate::thumbs::SizeBounds;

/// Server configuration parameters.
///
/// All values can be configured via environment variables with sensible defaults.
#[derive(Debug, Clone)]
pub struct Config {
    /// HTTP server port
    pub server_port: u16,
    /// Keys held per cache before an eviction sweep
    pub max_items: usize,
    /// Largest response buffered, in megabytes
    pub max_item_size_mb: i64,
    /// Total buffered bytes per cache before a sweep, in megabytes
    pub max_size_mb: i64,
    /// Directory served under `/files` and read for thumbnails
    pub root_path: PathBuf,
    /// Directory thumbnails are rendered into
    pub thumb_path: PathBuf,
    pub thumb_min_step: u32,
    pub thumb_max_step: u32,
    /// Pixels per thumbnail size step
    pub thumb_step_px: u32,
}

fn var_or<T: FromStr>(name: &str, default: T) -> T {
    env::var(name)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

impl Config {
    /// Creates a new Config by loading values from environment variables.
    ///
    /// # Environment Variables
    /// - `SERVER_PORT` - HTTP server port (default: 3000)
    /// - `MAX_ITEMS` - Keys per cache (default: 10000)
    /// - `MAX_ITEM_SIZE_MB` - Largest cached response (default: 10)
    /// - `MAX_SIZE_MB` - Total cached bytes (default: 512)
    /// - `ROOT_PATH` - Served directory (default: ./files)
    /// - `THUMB_PATH` - Thumbnail directory (default: ./thumbs)
    /// - `THUMB_MIN_STEP`, `THUMB_MAX_STEP`, `THUMB_STEP_PX` - Thumbnail sizes (default: 3, 19, 100)
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            server_port: var_or("SERVER_PORT", defaults.server_port),
            max_items: var_or("MAX_ITEMS", defaults.max_items),
            max_item_size_mb: var_or("MAX_ITEM_SIZE_MB", defaults.max_item_size_mb),
            max_size_mb: var_or("MAX_SIZE_MB", defaults.max_size_mb),
            root_path: var_or("ROOT_PATH", defaults.root_path),
            thumb_path: var_or("THUMB_PATH", defaults.thumb_path),
            thumb_min_step: var_or("THUMB_MIN_STEP", defaults.thumb_min_step),
            thumb_max_step: var_or("THUMB_MAX_STEP", defaults.thumb_max_step),
            thumb_step_px: var_or("THUMB_STEP_PX", defaults.thumb_step_px),
        }
    }

    /// Limits applied to each cache.
    pub fn limits(&self) -> CacheLimits {
        CacheLimits {
            max_items: self.max_items,
            max_item_bytes: self.max_item_size_mb.saturating_mul(BYTES_PER_MB),
            max_total_bytes: self.max_size_mb.saturating_mul(BYTES_PER_MB),
        }
    }

    /// Thumbnail size steps.
    pub fn bounds(&self) -> SizeBounds {
        SizeBounds {
            min_step: self.thumb_min_step.min(self.thumb_max_step),
            max_step: self.thumb_max_step,
            step_px: self.thumb_step_px,
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            server_port: 3000,
            max_items: 10_000,
            max_item_size_mb: 10,
            max_size_mb: 512,
            root_path: PathBuf::from("./files"),
            thumb_path: PathBuf::from("./thumbs"),
            thumb_min_step: 3,
            thumb_max_step: 19,
            thumb_step_px: 100,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_default() {
        let config = Config::default();
        assert_eq!(config.server_port, 3000);
        assert_eq!(config.max_items, 10_000);
        assert_eq!(config.root_path, PathBuf::from("./files"));
        assert_eq!(config.bounds(), SizeBounds::default());
    }

    #[test]
    fn test_limits_in_bytes() {
        let limits = Config::default().limits();
        assert_eq!(limits.max_items, 10_000);
        assert_eq!(limits.max_item_bytes, 10_000_000);
        assert_eq!(limits.max_total_bytes, 512_000_000);
    }

    #[test]
    fn test_inverted_steps_collapse() {
        let config = Config {
            thumb_min_step: 20,
            thumb_max_step: 5,
            ..Config::default()
        };
        let bounds = config.bounds();
        assert_eq!((bounds.min_step, bounds.max_step), (5, 5));
    }

    #[test]
    fn test_config_from_env_defaults() {
        // Clear any existing env vars to test defaults
        for name in [
            "SERVER_PORT",
            "MAX_ITEMS",
            "MAX_ITEM_SIZE_MB",
            "MAX_SIZE_MB",
            "ROOT_PATH",
            "THUMB_PATH",
            "THUMB_MIN_STEP",
            "THUMB_MAX_STEP",
            "THUMB_STEP_PX",
        ] {
            env::remove_var(name);
        }

        let config = Config::from_env();
        assert_eq!(config.server_port, 3000);
        assert_eq!(config.max_item_size_mb, 10);
        assert_eq!(config.max_size_mb, 512);
        assert_eq!(config.thumb_path, PathBuf::from("./thumbs"));
    }
}
