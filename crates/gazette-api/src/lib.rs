//! Gazette API - Operator API and public tracking endpoints
//!
//! This crate provides the HTTP surface of Gazette: campaign lifecycle,
//! statistics and queue endpoints for operators, the open/click/unsubscribe
//! tracking routes hit by recipients, health checks and metrics.

pub mod handlers;
pub mod openapi;
pub mod routes;
pub mod state;

pub use openapi::{create_openapi_routes, ApiDoc};
pub use routes::create_router;
pub use state::AppState;
