//! Repository module
//!
//! Contains repository traits, per-operation error types, and the
//! PostgreSQL and in-memory implementations.

pub mod errors;
pub mod memory;
pub mod pg_application;
pub mod pg_event;
pub mod pg_execution;
pub mod pg_queue;
pub mod pg_resource;
pub mod traits;

pub use errors::*;
pub use memory::*;
pub use pg_application::PgApplicationRepository;
pub use pg_event::PgEventRepository;
pub use pg_execution::PgExecutionRepository;
pub use pg_queue::PgQueueRepository;
pub use pg_resource::PgResourceRepository;
pub use traits::*;
