//! Common utilities for Conductor
//!
//! Provides shared configuration, telemetry, and metrics plumbing.

pub mod config;
pub mod metrics;
pub mod telemetry;

pub use config::{ConfigError, Settings};
pub use telemetry::init_tracing;
