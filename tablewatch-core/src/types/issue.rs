//! Issue types shared with the external issue registry

use std::collections::BTreeMap;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::state::{ChainLink, StateChange};

/// String wrapper for issue identifiers.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct IssueId(String);

impl IssueId {
    /// Create a new issue ID from a string.
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Get the underlying string.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<String> for IssueId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for IssueId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl std::fmt::Display for IssueId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// How bad an issue is. Ordered from least to most severe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Low,
    Medium,
    High,
    Critical,
}

impl Severity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Low => "low",
            Self::Medium => "medium",
            Self::High => "high",
            Self::Critical => "critical",
        }
    }

    /// Ordering weight used when sorting fix plans
    pub fn priority(&self) -> u8 {
        match self {
            Self::Low => 1,
            Self::Medium => 2,
            Self::High => 3,
            Self::Critical => 4,
        }
    }
}

/// Error type for parsing Severity from string
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParseSeverityError(String);

impl std::fmt::Display for ParseSeverityError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "unknown severity: {}", self.0)
    }
}

impl std::error::Error for ParseSeverityError {}

impl FromStr for Severity {
    type Err = ParseSeverityError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "low" => Ok(Self::Low),
            "medium" => Ok(Self::Medium),
            "high" => Ok(Self::High),
            "critical" => Ok(Self::Critical),
            _ => Err(ParseSeverityError(s.to_string())),
        }
    }
}

/// Free-form issue details as reported by the detector
pub type IssueDetails = BTreeMap<String, Value>;

/// A detected anomaly in the monitored game server
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Issue {
    pub id: IssueId,
    #[serde(rename = "type")]
    pub issue_type: String,
    pub severity: Severity,
    #[serde(default)]
    pub details: IssueDetails,
    pub first_seen: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub root_cause: Option<StateChange>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub causal_chain: Option<Vec<ChainLink>>,
}

impl Issue {
    /// Create an issue with no details, first seen at `first_seen`
    pub fn new(
        id: impl Into<IssueId>,
        issue_type: impl Into<String>,
        severity: Severity,
        first_seen: DateTime<Utc>,
    ) -> Self {
        Self {
            id: id.into(),
            issue_type: issue_type.into(),
            severity,
            details: IssueDetails::new(),
            first_seen,
            root_cause: None,
            causal_chain: None,
        }
    }

    /// Builder-style detail insertion
    #[must_use]
    pub fn with_detail(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.details.insert(key.into(), value.into());
        self
    }

    /// A detail value as a string slice, if it is a non-empty string
    pub fn detail_str(&self, key: &str) -> Option<&str> {
        self.details
            .get(key)
            .and_then(Value::as_str)
            .filter(|s| !s.is_empty())
    }

    pub fn table_id(&self) -> Option<&str> {
        self.detail_str("tableId")
    }

    pub fn player_id(&self) -> Option<&str> {
        self.detail_str("playerId")
    }

    pub fn phase(&self) -> Option<&str> {
        self.detail_str("phase")
    }

    pub fn component(&self) -> Option<&str> {
        self.detail_str("component")
    }

    pub fn path(&self) -> Option<&str> {
        self.detail_str("path")
    }

    /// Knowledge key for issues of this shape: `type[_table][_player][_phase]`
    ///
    /// Table and player ids collapse to markers so that knowledge learned on
    /// one table applies to the same issue on any table.
    pub fn pattern_key(&self) -> String {
        let mut key = self.issue_type.clone();
        if self.table_id().is_some() {
            key.push_str("_table");
        }
        if self.player_id().is_some() {
            key.push_str("_player");
        }
        if let Some(phase) = self.phase() {
            key.push('_');
            key.push_str(phase);
        }
        key
    }
}

/// Issue as submitted to the registry before it is stamped
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IssueDraft {
    pub id: IssueId,
    #[serde(rename = "type")]
    pub issue_type: String,
    pub severity: Severity,
    #[serde(default)]
    pub details: IssueDetails,
}
