//! Provider registry and resource resolution for Conductor
//!
//! Providers declare the resource types they handle and the workflows that
//! provision them. The registry maps a declared resource type to a
//! provider workflow; the resolver turns a Score spec into a
//! dependency-ordered provisioning plan.

pub mod loader;
pub mod manifest;
pub mod plan;
pub mod registry;
pub mod resolver;

pub use loader::{
    build_registry, load_dir, load_git, load_sources, BuildError, GitCloner, GitCommandCloner,
    LoadError,
};
pub use manifest::{ManifestError, ManifestWorkflow, ProviderManifest};
pub use plan::{Plan, PlanItem};
pub use registry::{ProviderRegistry, RegistryError, ResolvedWorkflow};
pub use resolver::{ResolutionError, Resolver};
