//! Response DTOs for the file cache API
//!
//! Defines the structure of outgoing JSON response bodies. File and thumbnail
//! bodies are streamed as-is and have no DTO.

use serde::Serialize;

use crate::cache::StatsSnapshot;

/// Response body for `DELETE /files/*path`
#[derive(Debug, Clone, Serialize)]
pub struct RemoveResponse {
    /// Success message
    pub message: String,
    /// The key that was removed
    pub key: String,
}

impl RemoveResponse {
    /// Creates a new RemoveResponse
    pub fn new(key: impl Into<String>) -> Self {
        let key = key.into();
        Self {
            message: format!("Key '{}' removed successfully", key),
            key,
        }
    }
}

/// Response body for `DELETE /images/:id`
#[derive(Debug, Clone, Serialize)]
pub struct RemoveFilesResponse {
    /// The identifier whose thumbnails were removed
    pub id: String,
    /// Number of thumbnail files deleted
    pub removed: usize,
}

impl RemoveFilesResponse {
    pub fn new(id: impl Into<String>, removed: usize) -> Self {
        Self {
            id: id.into(),
            removed,
        }
    }
}

/// Statistics of one cache.
#[derive(Debug, Clone, Serialize)]
pub struct CacheStatsResponse {
    #[serde(flatten)]
    pub snapshot: StatsSnapshot,
    /// Hit rate (hits / (hits + misses))
    pub hit_rate: f64,
}

impl From<StatsSnapshot> for CacheStatsResponse {
    fn from(snapshot: StatsSnapshot) -> Self {
        Self {
            hit_rate: snapshot.hit_rate(),
            snapshot,
        }
    }
}

/// Response body for the stats endpoint (`GET /stats`)
#[derive(Debug, Clone, Serialize)]
pub struct StatsResponse {
    /// Plain file cache
    pub files: CacheStatsResponse,
    /// Thumbnail cache
    pub thumbs: CacheStatsResponse,
}

impl StatsResponse {
    pub fn new(files: StatsSnapshot, thumbs: StatsSnapshot) -> Self {
        Self {
            files: files.into(),
            thumbs: thumbs.into(),
        }
    }
}

/// Response body for the health endpoint (`GET /health`)
#[derive(Debug, Clone, Serialize)]
pub struct HealthResponse {
    /// Health status (e.g., "healthy")
    pub status: String,
    /// Current timestamp in ISO 8601 format
    pub timestamp: String,
}

impl HealthResponse {
    /// Creates a new HealthResponse with current timestamp
    pub fn healthy() -> Self {
        Self {
            status: "healthy".to_string(),
            timestamp: chrono::Utc::now().to_rfc3339(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::{CacheStats, StatsLimits};

    fn snapshot(hits: u64, misses: u64) -> StatsSnapshot {
        let stats = CacheStats::new();
        for _ in 0..hits {
            stats.record_hit();
        }
        for _ in 0..misses {
            stats.record_miss();
        }
        stats.snapshot(
            3,
            1_024,
            StatsLimits {
                max_items: 10,
                max_item_bytes: 100,
                max_total_bytes: 1_000,
            },
        )
    }

    #[test]
    fn test_remove_response_serialize() {
        let resp = RemoveResponse::new("img/logo.png");
        let json = serde_json::to_string(&resp).unwrap();
        assert!(json.contains("img/logo.png"));
        assert!(json.contains("removed"));
    }

    #[test]
    fn test_stats_response_flattens_snapshot() {
        let resp = StatsResponse::new(snapshot(3, 1), snapshot(0, 0));
        let json = serde_json::to_value(&resp).unwrap();
        assert_eq!(json["files"]["hits"], 3);
        assert_eq!(json["files"]["items"], 3);
        assert_eq!(json["files"]["bytes"], 1_024);
        assert!((json["files"]["hit_rate"].as_f64().unwrap() - 0.75).abs() < 0.001);
        assert_eq!(json["thumbs"]["hit_rate"], 0.0);
    }

    #[test]
    fn test_remove_files_response_serialize() {
        let json = serde_json::to_value(RemoveFilesResponse::new("42", 3)).unwrap();
        assert_eq!(json["id"], "42");
        assert_eq!(json["removed"], 3);
    }

    #[test]
    fn test_health_response_serialize() {
        let resp = HealthResponse::healthy();
        let json = serde_json::to_string(&resp).unwrap();
        assert!(json.contains("healthy"));
        assert!(json.contains("timestamp"));
    }
}
