//! Error types for the file cache
//!
//! Provides unified error handling using thiserror.

use std::io;

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use thiserror::Error;

// == Cache Error Enum ==
/// Unified error type for the file cache.
#[derive(Error, Debug)]
pub enum CacheError {
    /// Key or file not found
    #[error("Not found: {0}")]
    NotFound(String),

    /// Invalid request data
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    /// Entry buffer read before a length was declared
    #[error("Content not initialized: declared length < 1")]
    Uninitialized,

    /// Read would run past the declared length
    #[error("Declared length {declared} smaller than requested end {end}")]
    Overrun { declared: i64, end: i64 },

    /// Fewer bytes were copied than requested
    #[error("Copied {copied} bytes, less than requested {requested}")]
    ShortRead { copied: usize, requested: usize },

    /// Thumbnail could not be derived
    #[error("Thumbnail error: {0}")]
    Thumbnail(String),

    /// Filesystem failure
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    /// Internal server error
    #[error("Internal error: {0}")]
    Internal(String),
}

impl From<image::ImageError> for CacheError {
    fn from(err: image::ImageError) -> Self {
        CacheError::Thumbnail(err.to_string())
    }
}

impl From<CacheError> for io::Error {
    fn from(err: CacheError) -> Self {
        match err {
            CacheError::Io(inner) => inner,
            CacheError::NotFound(_) => io::Error::new(io::ErrorKind::NotFound, err),
            CacheError::Overrun { .. } | CacheError::ShortRead { .. } => {
                io::Error::new(io::ErrorKind::UnexpectedEof, err)
            }
            other => io::Error::new(io::ErrorKind::Other, other),
        }
    }
}

// == IntoResponse Implementation ==
impl IntoResponse for CacheError {
    fn into_response(self) -> Response {
        let status = match &self {
            CacheError::NotFound(_) => StatusCode::NOT_FOUND,
            CacheError::InvalidRequest(_) => StatusCode::BAD_REQUEST,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };

        let body = Json(json!({
            "error": self.to_string()
        }));

        (status, body).into_response()
    }
}

// == Result Type Alias ==
/// Convenience Result type for the file cache.
pub type Result<T> = std::result::Result<T, CacheError>;
