//! API Routes
//!
//! Configures the Axum router with all file cache endpoints.

use axum::{
    routing::{delete, get},
    Router,
};
use tower_http::{
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};

use super::handlers::{
    box_thumb_handler, file_handler, health_handler, remove_file_handler, remove_thumbs_handler,
    square_thumb_handler, stats_handler, AppState,
};

/// Creates the main router with all endpoints configured.
///
/// # Endpoints
/// - `GET /files/*path` - Stream a file through the cache
/// - `DELETE /files/*path` - Drop a cached file
/// - `GET /thumbs/:size/:name` - Square thumbnail
/// - `GET /thumbs/:size/:height/:crop/:name` - Box thumbnail, `size` is the width
/// - `DELETE /images/:id` - Delete every thumbnail of an image
/// - `GET /stats` - Get cache statistics
/// - `GET /health` - Health check endpoint
///
/// # Middleware
/// - CORS: Allows any origin (configurable for production)
/// - Tracing: Logs all requests for debugging
pub fn create_router(state: AppState) -> Router {
    // Configure CORS middleware
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    // Build router with all endpoints
    Router::new()
        .route("/files/*path", get(file_handler).delete(remove_file_handler))
        .route("/thumbs/:size/:name", get(square_thumb_handler))
        .route("/thumbs/:size/:height/:crop/:name", get(box_thumb_handler))
        .route("/images/:id", delete(remove_thumbs_handler))
        .route("/stats", get(stats_handler))
        .route("/health", get(health_handler))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::{Cache, CacheLimits};
    use crate::thumbs::{ImageCache, SizeBounds, Thumbnailer};
    use axum::{
        body::Body,
        http::{Request, StatusCode},
    };
    use tower::util::ServiceExt;

    fn create_test_app(dir: &std::path::Path) -> Router {
        let limits = CacheLimits {
            max_items: 100,
            max_item_bytes: 1_000,
            max_total_bytes: 10_000,
        };
        let state = AppState::new(
            Cache::new(limits, dir),
            ImageCache::new(
                limits,
                Thumbnailer::new(dir, dir.join("thumbs"), SizeBounds::default()),
            ),
        );
        create_router(state)
    }

    async fn send(app: Router, method: &str, uri: &str) -> StatusCode {
        app.oneshot(
            Request::builder()
                .method(method)
                .uri(uri)
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap()
        .status()
    }

    #[tokio::test]
    async fn test_health_endpoint() {
        let dir = tempfile::tempdir().unwrap();
        let status = send(create_test_app(dir.path()), "GET", "/health").await;
        assert_eq!(status, StatusCode::OK);
    }

    #[tokio::test]
    async fn test_stats_endpoint() {
        let dir = tempfile::tempdir().unwrap();
        let status = send(create_test_app(dir.path()), "GET", "/stats").await;
        assert_eq!(status, StatusCode::OK);
    }

    #[tokio::test]
    async fn test_nested_file_path() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join("css")).unwrap();
        std::fs::write(dir.path().join("css/site.css"), b"body {}").unwrap();
        let status = send(create_test_app(dir.path()), "GET", "/files/css/site.css").await;
        assert_eq!(status, StatusCode::OK);
    }

    #[tokio::test]
    async fn test_missing_file_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let status = send(create_test_app(dir.path()), "GET", "/files/nonexistent.txt").await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_remove_uncached_file() {
        let dir = tempfile::tempdir().unwrap();
        let status = send(create_test_app(dir.path()), "DELETE", "/files/nothing.txt").await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_thumbnail_routes_resolve() {
        let dir = tempfile::tempdir().unwrap();
        let app = create_test_app(dir.path());
        // No image on disk, so both routes answer without content.
        let status = send(app.clone(), "GET", "/thumbs/4/missing.png").await;
        assert_eq!(status, StatusCode::NO_CONTENT);
        let status = send(app, "GET", "/thumbs/4/3/1/missing.png").await;
        assert_eq!(status, StatusCode::NO_CONTENT);
    }

    #[tokio::test]
    async fn test_remove_image_thumbnails() {
        let dir = tempfile::tempdir().unwrap();
        let status = send(create_test_app(dir.path()), "DELETE", "/images/42").await;
        assert_eq!(status, StatusCode::OK);
    }
}
