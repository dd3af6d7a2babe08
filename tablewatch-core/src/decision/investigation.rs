//! Investigation and application state as held in the state store

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::collab::StateStore;

pub const INVESTIGATION_STATUS: &str = "investigation.status";
pub const INVESTIGATION_STARTED_AT: &str = "investigation.startedAt";
pub const INVESTIGATION_COMPLETED_AT: &str = "investigation.completedAt";
pub const INVESTIGATION_PROGRESS: &str = "investigation.progress";
pub const INVESTIGATION_ISSUE_COUNT: &str = "investigation.issueCount";
pub const APP_STATUS: &str = "app.status";
pub const VERIFICATION_STATUS: &str = "verification.status";

/// Top-level components whose changes trigger a recompute
pub const WATCHED_COMPONENTS: &[&str] = &["investigation", "app", "verification"];

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InvestigationStatus {
    #[default]
    Idle,
    Starting,
    Active,
    Completed,
}

impl InvestigationStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Starting => "starting",
            Self::Active => "active",
            Self::Completed => "completed",
        }
    }

    /// Starting or active
    pub fn in_progress(&self) -> bool {
        matches!(self, Self::Starting | Self::Active)
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AppStatus {
    #[default]
    Running,
    Paused,
}

impl AppStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Running => "running",
            Self::Paused => "paused",
        }
    }
}

/// One finished investigation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InvestigationRecord {
    pub started_at: DateTime<Utc>,
    pub completed_at: DateTime<Utc>,
    pub duration_ms: i64,
    pub issue_count: usize,
}

/// Everything the policy reads from the state store
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PolicyState {
    pub investigation: InvestigationStatus,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub app: AppStatus,
    pub verification_completed: bool,
    /// The investigation completed during the current tick. Held by the
    /// engine, not the state store.
    pub just_completed: bool,
}

impl PolicyState {
    /// Read the current state. Missing or malformed values fall back to
    /// their defaults.
    pub fn read(state: &dyn StateStore) -> Self {
        Self {
            investigation: read_as(state, INVESTIGATION_STATUS).unwrap_or_default(),
            started_at: read_as(state, INVESTIGATION_STARTED_AT),
            completed_at: read_as(state, INVESTIGATION_COMPLETED_AT),
            app: read_as(state, APP_STATUS).unwrap_or_default(),
            verification_completed: state
                .get(VERIFICATION_STATUS)
                .is_some_and(|v| v.as_str() == Some("completed")),
            just_completed: false,
        }
    }
}

fn read_as<T: serde::de::DeserializeOwned>(state: &dyn StateStore, path: &str) -> Option<T> {
    state
        .get(path)
        .filter(|v| !v.is_null())
        .and_then(|v| serde_json::from_value(v).ok())
}

/// Timestamp as stored in the state store
pub(crate) fn timestamp_value(at: DateTime<Utc>) -> Value {
    Value::String(at.to_rfc3339())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collab::InMemoryStateStore;
    use serde_json::json;

    #[test]
    fn test_defaults_when_empty() {
        let state = InMemoryStateStore::new();
        assert_eq!(PolicyState::read(&state), PolicyState::default());
    }

    #[test]
    fn test_reads_written_state() {
        let state = InMemoryStateStore::new();
        let at = DateTime::from_timestamp_millis(5_000).unwrap();
        state.set(INVESTIGATION_STATUS, json!("active"), "test");
        state.set(INVESTIGATION_STARTED_AT, timestamp_value(at), "test");
        state.set(APP_STATUS, json!("paused"), "test");
        state.set(VERIFICATION_STATUS, json!("completed"), "test");

        let read = PolicyState::read(&state);
        assert_eq!(read.investigation, InvestigationStatus::Active);
        assert_eq!(read.started_at, Some(at));
        assert_eq!(read.app, AppStatus::Paused);
        assert!(read.verification_completed);
    }

    #[test]
    fn test_malformed_status_is_idle() {
        let state = InMemoryStateStore::new();
        state.set(INVESTIGATION_STATUS, json!(42), "test");
        assert_eq!(PolicyState::read(&state).investigation, InvestigationStatus::Idle);
    }
}
