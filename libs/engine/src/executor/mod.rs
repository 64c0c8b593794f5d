//! Step executors
//!
//! Each step type tag (terraform, kubernetes, validation, ...) is handled
//! by an opaque executor honoring a single contract. Executors are
//! discovered at startup through the registry; the workflow layer owns
//! retry decisions.

mod builtin;
mod registry;
mod traits;

pub use builtin::{NoopExecutor, ValidationExecutor};
pub use registry::ExecutorRegistry;
pub use traits::{StepContext, StepError, StepErrorKind, StepExecutor, StepOutcome};
