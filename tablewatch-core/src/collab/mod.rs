//! Contracts for the collaborators the core runs against
//!
//! The state store, issue registry and dependency graph belong to the host
//! application. The core only reads them, except for the narrow writes named
//! on each trait (root-cause annotation, investigation/app status paths).
//! In-memory implementations back the tests and the CLI replay mode.

mod deps;
mod registry;
mod state_store;

pub use deps::{DependencyGraph, StaticDependencyGraph};
pub use registry::{InMemoryIssueRegistry, IssueEvent, IssueRegistry};
pub use state_store::{InMemoryStateStore, StateStore};
