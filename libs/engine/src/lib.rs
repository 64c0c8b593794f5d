//! Conductor workflow execution engine
//!
//! The core of the platform: turns claimed queue tasks into executed
//! workflows. Groups steps into ordered execution phases, materializes
//! step inputs, dispatches typed step executors under concurrency caps and
//! timeouts, persists every transition, and fans lifecycle events out to
//! subscribers.

pub mod bus;
pub mod consumer;
pub mod error;
pub mod events;
pub mod executor;
pub mod graph;
pub mod grouper;
pub mod runner;
pub mod substitution;
pub mod testing;

pub use bus::{EventBus, Subscription};
pub use consumer::{QueueConsumer, TaskMetadata};
pub use error::RunnerError;
pub use events::EventPublisher;
pub use executor::{ExecutorRegistry, StepContext, StepError, StepExecutor, StepOutcome};
pub use grouper::{group_steps, ExecutionGroup};
pub use runner::{RunnerConfig, WorkflowRunner};
pub use substitution::{materialize_inputs, SubstitutionError, SubstitutionScope};
