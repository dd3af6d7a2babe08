//! State-change records and causal chain links

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// One mutation reported by the state store. Immutable once recorded.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StateChange {
    pub timestamp: DateTime<Utc>,
    /// Dotted path, e.g. `game.tables.t1.pot`
    pub path: String,
    #[serde(default)]
    pub old_value: Value,
    #[serde(default)]
    pub new_value: Value,
    #[serde(default)]
    pub trigger: String,
    /// Recording order, assigned when the change enters the history
    #[serde(default)]
    pub seq: u64,
}

impl StateChange {
    pub fn new(
        timestamp: DateTime<Utc>,
        path: impl Into<String>,
        old_value: Value,
        new_value: Value,
        trigger: impl Into<String>,
    ) -> Self {
        Self {
            timestamp,
            path: path.into(),
            old_value,
            new_value,
            trigger: trigger.into(),
            seq: 0,
        }
    }

    /// Top-level path component (`game` for `game.tables.t1.pot`)
    pub fn component(&self) -> &str {
        component_of(&self.path)
    }
}

/// Top-level component of a dotted path
pub fn component_of(path: &str) -> &str {
    path.split('.').next().unwrap_or(path)
}

/// How a chain entry relates to the issue it explains
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Relationship {
    /// Exact path match with the issue's path
    Direct,
    /// Reached through the dependency graph
    Dependency,
    /// Any other accepted relation (component, table or player match)
    Indirect,
}

/// A state change placed in an issue's causal chain
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChainLink {
    #[serde(flatten)]
    pub change: StateChange,
    pub relationship: Relationship,
}
