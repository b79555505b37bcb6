//! API Handlers
//!
//! HTTP request handlers for each file cache endpoint.

use std::sync::Arc;

use axum::{
    extract::{Path, State},
    http::{HeaderMap, Method},
    response::Response,
    Json,
};
use tracing::debug;

use crate::cache::Cache;
use crate::config::Config;
use crate::error::{CacheError, Result};
use crate::models::{
    BoxThumbParams, HealthResponse, RemoveFilesResponse, RemoveResponse, SquareThumbParams,
    StatsResponse,
};
use crate::serve::{respond, RequestHead};
use crate::thumbs::{identifier, ImageCache, Thumbnailer};

/// Application state shared across all handlers.
///
/// Both caches synchronize internally, so they are shared behind a plain `Arc`.
#[derive(Clone)]
pub struct AppState {
    /// Plain file cache
    pub files: Arc<Cache>,
    /// Thumbnail cache
    pub images: Arc<ImageCache>,
}

impl AppState {
    /// Creates a new AppState with the given caches.
    pub fn new(files: Cache, images: ImageCache) -> Self {
        Self {
            files: Arc::new(files),
            images: Arc::new(images),
        }
    }

    /// Creates a new AppState from configuration.
    ///
    /// Each cache gets the full configured limits.
    pub fn from_config(config: &Config) -> Self {
        let files = Cache::new(config.limits(), &config.root_path);
        let thumbnailer = Thumbnailer::new(&config.root_path, &config.thumb_path, config.bounds());
        let images = ImageCache::new(config.limits(), thumbnailer);
        Self::new(files, images)
    }
}

/// Handler for GET /files/*path
///
/// Streams the file, from memory when its entry is valid.
pub async fn file_handler(
    State(state): State<AppState>,
    method: Method,
    headers: HeaderMap,
    Path(path): Path<String>,
) -> Response {
    let req = RequestHead::new(method, headers);
    respond(move |mut sink| async move {
        if let Err(err) = state.files.handle(&mut sink, &req, &path).await {
            debug!(path = %path, error = %err, "File response ended early");
        }
    })
    .await
}

/// Handler for DELETE /files/*path
pub async fn remove_file_handler(
    State(state): State<AppState>,
    Path(path): Path<String>,
) -> Result<Json<RemoveResponse>> {
    let key = path.trim_start_matches('/');
    if state.files.remove(key) {
        Ok(Json(RemoveResponse::new(key)))
    } else {
        Err(CacheError::NotFound(format!("Key '{}' is not cached", key)))
    }
}

/// Handler for GET /thumbs/:size/:name
pub async fn square_thumb_handler(
    State(state): State<AppState>,
    method: Method,
    headers: HeaderMap,
    Path(params): Path<SquareThumbParams>,
) -> Response {
    let req = RequestHead::new(method, headers);
    respond(move |mut sink| async move {
        let result = state
            .images
            .handle(&mut sink, &req, &params.size, &params.name)
            .await;
        if let Err(err) = result {
            debug!(name = %params.name, error = %err, "Thumbnail response ended early");
        }
    })
    .await
}

/// Handler for GET /thumbs/:size/:height/:crop/:name
pub async fn box_thumb_handler(
    State(state): State<AppState>,
    method: Method,
    headers: HeaderMap,
    Path(params): Path<BoxThumbParams>,
) -> Response {
    let req = RequestHead::new(method, headers);
    respond(move |mut sink| async move {
        let result = state
            .images
            .handle_ex(
                &mut sink,
                &req,
                &params.width,
                &params.height,
                &params.crop,
                &params.name,
            )
            .await;
        if let Err(err) = result {
            debug!(name = %params.name, error = %err, "Thumbnail response ended early");
        }
    })
    .await
}

/// Handler for DELETE /images/:id
///
/// Deletes every rendered thumbnail of the image and its cache entries.
pub async fn remove_thumbs_handler(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<RemoveFilesResponse>> {
    let removed = state.images.remove_files(id.as_str()).await?;
    Ok(Json(RemoveFilesResponse::new(identifier(&id), removed)))
}

/// Handler for GET /stats
///
/// Returns counters and load of both caches.
pub async fn stats_handler(State(state): State<AppState>) -> Json<StatsResponse> {
    Json(StatsResponse::new(
        state.files.stats(),
        state.images.stats(),
    ))
}

/// Handler for GET /health
///
/// Returns health status of the server.
pub async fn health_handler() -> Json<HealthResponse> {
    Json(HealthResponse::healthy())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::CacheLimits;
    use crate::thumbs::SizeBounds;
    use axum::http::StatusCode;
    use tempfile::TempDir;

    fn test_state(dir: &TempDir) -> AppState {
        let limits = CacheLimits {
            max_items: 100,
            max_item_bytes: 1_000_000,
            max_total_bytes: 10_000_000,
        };
        AppState::new(
            Cache::new(limits, dir.path()),
            ImageCache::new(
                limits,
                Thumbnailer::new(dir.path(), dir.path().join("thumbs"), SizeBounds::default()),
            ),
        )
    }

    async fn body_bytes(response: Response) -> Vec<u8> {
        axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap()
            .to_vec()
    }

    #[tokio::test]
    async fn test_file_handler_streams_and_caches() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("a.txt"), b"alpha").unwrap();
        let state = test_state(&dir);

        let response = file_handler(
            State(state.clone()),
            Method::GET,
            HeaderMap::new(),
            Path("a.txt".to_string()),
        )
        .await;
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(body_bytes(response).await, b"alpha");

        let stats = stats_handler(State(state)).await;
        assert_eq!(stats.files.snapshot.items, 1);
        assert_eq!(stats.files.snapshot.bytes, 5);
        assert_eq!(stats.files.snapshot.populated, 1);
    }

    #[tokio::test]
    async fn test_remove_file_handler() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("a.txt"), b"alpha").unwrap();
        let state = test_state(&dir);

        let result = remove_file_handler(State(state.clone()), Path("a.txt".to_string())).await;
        assert!(matches!(result, Err(CacheError::NotFound(_))));

        let response = file_handler(
            State(state.clone()),
            Method::GET,
            HeaderMap::new(),
            Path("a.txt".to_string()),
        )
        .await;
        body_bytes(response).await;

        let result = remove_file_handler(State(state.clone()), Path("/a.txt".to_string())).await;
        let response = result.unwrap();
        assert_eq!(response.key, "a.txt");
        assert!(state.files.is_empty());
    }

    #[tokio::test]
    async fn test_remove_thumbs_rejects_empty_id() {
        let dir = tempfile::tempdir().unwrap();
        let state = test_state(&dir);
        let result = remove_thumbs_handler(State(state), Path(".png".to_string())).await;
        assert!(matches!(result, Err(CacheError::InvalidRequest(_))));
    }

    #[tokio::test]
    async fn test_stats_handler() {
        let dir = tempfile::tempdir().unwrap();
        let response = stats_handler(State(test_state(&dir))).await;
        assert_eq!(response.files.snapshot.hits, 0);
        assert_eq!(response.thumbs.snapshot.misses, 0);
        assert_eq!(response.files.hit_rate, 0.0);
    }

    #[tokio::test]
    async fn test_health_handler() {
        let response = health_handler().await;
        assert_eq!(response.status, "healthy");
    }
}
