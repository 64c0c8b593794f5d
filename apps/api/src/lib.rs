//! Conductor API - HTTP handlers and routing
//!
//! This crate provides the Axum-based HTTP API for Conductor:
//! - RESTful endpoints for specs, workflows, resources, and providers
//! - Server-Sent Events for the live event stream
//! - WebSocket support for real-time graph updates
//! - Bearer-token authentication middleware

pub mod error;
pub mod middleware;
pub mod routes;
pub mod state;
pub mod ws;

pub use error::ApiError;
pub use state::AppState;
