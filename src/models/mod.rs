//! Request and Response models for the file cache API
//!
//! This module defines the DTOs (Data Transfer Objects) used for
//! extracting path parameters and serializing HTTP response bodies.

pub mod requests;
pub mod responses;

// Re-export commonly used types
pub use requests::{BoxThumbParams, SquareThumbParams};
pub use responses::{
    CacheStatsResponse, HealthResponse, RemoveFilesResponse, RemoveResponse, StatsResponse,
};
