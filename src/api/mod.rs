//! API Module
//!
//! HTTP handlers and routing for the file cache server.
//!
//! # Endpoints
//! - `GET /files/*path` - Stream a file through the cache
//! - `DELETE /files/*path` - Drop a cached file
//! - `GET /thumbs/:size/:name` - Square thumbnail
//! - `GET /thumbs/:size/:height/:crop/:name` - Box thumbnail
//! - `DELETE /images/:id` - Delete every thumbnail of an image
//! - `GET /stats` - Get cache statistics
//! - `GET /health` - Health check endpoint

pub mod handlers;
pub mod routes;

pub use handlers::*;
pub use routes::create_router;
