//! Fix knowledge base
//!
//! Records every remediation attempt, keeps per-method and per-pattern
//! success statistics, and answers "what should be tried next" for an issue.

mod tracker;
mod types;

pub use tracker::{AttemptRequest, FixTracker, KnowledgeConfig};
pub use types::*;
