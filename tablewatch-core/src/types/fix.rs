//! Fix attempt records

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use super::issue::IssueId;

/// UUIDv7 keeps attempt ids time-ordered
pub type AttemptId = Uuid;

/// Outcome of one remediation attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FixResult {
    Success,
    Failure,
    Partial,
}

impl FixResult {
    /// Only a full success counts toward success rates
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Success)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Success => "success",
            Self::Failure => "failure",
            Self::Partial => "partial",
        }
    }
}

/// One remediation attempt. Created once by `FixTracker::record_attempt`
/// and never mutated afterwards.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FixAttempt {
    pub id: AttemptId,
    pub issue_id: IssueId,
    pub issue_type: String,
    pub fix_method: String,
    #[serde(default)]
    pub fix_details: Value,
    pub result: FixResult,
    pub timestamp: DateTime<Utc>,
    #[serde(default)]
    pub state_snapshot: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration_ms: Option<u64>,
}

impl FixAttempt {
    pub fn is_success(&self) -> bool {
        self.result.is_success()
    }
}
