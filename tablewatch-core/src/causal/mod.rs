//! Causal analysis of detected issues
//!
//! Every state mutation is appended to a bounded [`StateHistory`]. When an
//! issue is detected, related changes from the lookback window before its
//! first sighting form a causal chain, and the earliest plausible change
//! (optionally walked back through the dependency graph) becomes its root
//! cause.

mod analyzer;
mod graph;
mod history;

pub use analyzer::{CausalAnalysis, CausalAnalyzer, CausalConfig, CausalSummary, RootCause};
pub use graph::{CausalEdge, CausalGraph, CausalNode, EdgeKind};
pub use history::StateHistory;
