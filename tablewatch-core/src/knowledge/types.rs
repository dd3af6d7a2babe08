//! Types for the fix knowledge base

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::types::{Issue, IssueDetails, IssueId};

/// Running success statistics for one fix method across all issues
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MethodStats {
    pub successes: u32,
    pub failures: u32,
    pub rate: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_used: Option<DateTime<Utc>>,
}

impl MethodStats {
    pub fn record(&mut self, success: bool, at: DateTime<Utc>) {
        if success {
            self.successes += 1;
        } else {
            self.failures += 1;
        }
        self.rate = f64::from(self.successes) / f64::from(self.total());
        self.last_used = Some(at);
    }

    pub fn total(&self) -> u32 {
        self.successes + self.failures
    }
}

/// One method's record within a [`KnowledgeEntry`]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Alternative {
    pub method: String,
    pub successes: u32,
    pub attempts: u32,
    pub success_rate: f64,
}

/// What is known about fixing one issue pattern
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct KnowledgeEntry {
    pub best_method: String,
    pub success_rate: f64,
    /// One entry per method, sorted by success rate (highest first)
    pub alternatives: Vec<Alternative>,
    pub attempts: u32,
}

impl KnowledgeEntry {
    /// Fold one attempt into the entry and re-rank alternatives.
    ///
    /// The sort is stable, so methods with equal rates keep the order in
    /// which they were first tried.
    pub fn record(&mut self, method: &str, success: bool) {
        self.attempts += 1;

        let idx = match self.alternatives.iter().position(|a| a.method == method) {
            Some(idx) => idx,
            None => {
                self.alternatives.push(Alternative {
                    method: method.to_string(),
                    successes: 0,
                    attempts: 0,
                    success_rate: 0.0,
                });
                self.alternatives.len() - 1
            }
        };

        let alt = &mut self.alternatives[idx];
        alt.attempts += 1;
        if success {
            alt.successes += 1;
        }
        alt.success_rate = f64::from(alt.successes) / f64::from(alt.attempts);

        self.alternatives.sort_by(|a, b| {
            b.success_rate
                .partial_cmp(&a.success_rate)
                .unwrap_or(std::cmp::Ordering::Equal)
        });

        if let Some(best) = self.alternatives.first() {
            self.best_method = best.method.clone();
            self.success_rate = best.success_rate;
        }
    }
}

/// Failure or success bookkeeping for one `(issue, method)` pair
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LedgerEntry {
    pub issue_id: IssueId,
    pub method: String,
    pub count: u32,
    pub last_attempt: DateTime<Utc>,
}

/// Append/update lists of failed and successful `(issue, method)` pairs.
///
/// Entries are keyed by the pair, so replaying the same history after a
/// restart updates counts instead of duplicating rows.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FixLedger {
    pub failures: Vec<LedgerEntry>,
    pub successes: Vec<LedgerEntry>,
}

impl FixLedger {
    pub fn record_failure(&mut self, issue_id: &IssueId, method: &str, at: DateTime<Utc>) {
        Self::upsert(&mut self.failures, issue_id, method, at);
    }

    pub fn record_success(&mut self, issue_id: &IssueId, method: &str, at: DateTime<Utc>) {
        Self::upsert(&mut self.successes, issue_id, method, at);
    }

    /// Methods that failed against this exact issue
    pub fn failures_for<'a>(&'a self, issue_id: &'a IssueId) -> impl Iterator<Item = &'a LedgerEntry> {
        self.failures.iter().filter(move |e| &e.issue_id == issue_id)
    }

    pub fn has_failed(&self, issue_id: &IssueId, method: &str) -> bool {
        self.failures_for(issue_id).any(|e| e.method == method)
    }

    fn upsert(list: &mut Vec<LedgerEntry>, issue_id: &IssueId, method: &str, at: DateTime<Utc>) {
        match list
            .iter_mut()
            .find(|e| &e.issue_id == issue_id && e.method == method)
        {
            Some(entry) => {
                entry.count += 1;
                entry.last_attempt = at;
            }
            None => list.push(LedgerEntry {
                issue_id: issue_id.clone(),
                method: method.to_string(),
                count: 1,
                last_attempt: at,
            }),
        }
    }
}

/// A method that has proven itself (success rate above threshold)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkingFix {
    pub issue_type: String,
    pub method: String,
    pub success_rate: f64,
    pub recorded_at: DateTime<Utc>,
}

/// What the tracker remembers about an issue it has seen attempts for.
///
/// Kept so similarity queries still work after the registry has resolved
/// and dropped the issue.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IssueSummary {
    pub issue_type: String,
    #[serde(default)]
    pub details: IssueDetails,
    pub pattern_key: String,
}

impl IssueSummary {
    pub fn from_issue(issue: &Issue) -> Self {
        Self {
            issue_type: issue.issue_type.clone(),
            details: issue.details.clone(),
            pattern_key: issue.pattern_key(),
        }
    }

    pub fn unknown() -> Self {
        Self {
            issue_type: UNKNOWN_ISSUE_TYPE.to_string(),
            details: IssueDetails::new(),
            pattern_key: UNKNOWN_ISSUE_TYPE.to_string(),
        }
    }

    /// Same type, same table, or any shared detail key
    pub fn is_similar_to(&self, issue: &Issue) -> bool {
        if self.issue_type == issue.issue_type {
            return true;
        }
        let table = self.details.get("tableId").and_then(|v| v.as_str());
        if table.is_some() && table == issue.table_id() {
            return true;
        }
        self.details.keys().any(|k| issue.details.contains_key(k))
    }
}

/// Issue type used when an attempt names an issue nobody knows about
pub const UNKNOWN_ISSUE_TYPE: &str = "unknown";

/// Persisted form of `fixes.knowledge`
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct KnowledgeDocument {
    #[serde(default)]
    pub entries: BTreeMap<String, KnowledgeEntry>,
    #[serde(default)]
    pub working_fixes: Vec<WorkingFix>,
    #[serde(default)]
    pub issues: BTreeMap<IssueId, IssueSummary>,
}

/// A method recommended for an issue
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ShouldTry {
    pub method: String,
    pub confidence: f64,
    pub reason: String,
    pub success_rate: f64,
}

/// A method that already failed against this issue
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ShouldNotTry {
    pub method: String,
    pub reason: String,
    pub count: u32,
    pub last_attempt: DateTime<Utc>,
}

/// Answer to "what should be tried next" for one issue
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SuggestedFixes {
    pub should_try: Vec<ShouldTry>,
    pub should_not_try: Vec<ShouldNotTry>,
    pub confidence: f64,
}

/// Aggregate numbers for reports
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FixStatistics {
    pub total_attempts: usize,
    pub successful_attempts: usize,
    pub distinct_methods: usize,
    pub known_patterns: usize,
    pub working_fixes: usize,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Severity;

    fn at(ms: i64) -> DateTime<Utc> {
        DateTime::from_timestamp_millis(ms).unwrap()
    }

    #[test]
    fn test_method_stats_rate() {
        let mut stats = MethodStats::default();
        stats.record(true, at(0));
        stats.record(false, at(1));
        stats.record(true, at(2));
        assert_eq!(stats.total(), 3);
        assert!((stats.rate - 2.0 / 3.0).abs() < f64::EPSILON);
        assert_eq!(stats.last_used, Some(at(2)));
    }

    #[test]
    fn test_knowledge_entry_dedups_and_sorts() {
        let mut entry = KnowledgeEntry::default();
        entry.record("restartHand", false);
        entry.record("resetPot", true);
        entry.record("restartHand", true);
        entry.record("resetPot", true);

        assert_eq!(entry.attempts, 4);
        assert_eq!(entry.alternatives.len(), 2);
        assert_eq!(entry.best_method, "resetPot");
        assert!((entry.success_rate - 1.0).abs() < f64::EPSILON);
        assert_eq!(entry.alternatives[1].method, "restartHand");
        assert!((entry.alternatives[1].success_rate - 0.5).abs() < f64::EPSILON);
    }

    #[test]
    fn test_knowledge_entry_tie_keeps_first_tried() {
        let mut entry = KnowledgeEntry::default();
        entry.record("a", true);
        entry.record("b", true);
        assert_eq!(entry.best_method, "a");
    }

    #[test]
    fn test_ledger_upsert_counts() {
        let mut ledger = FixLedger::default();
        let id = IssueId::from("i1");
        ledger.record_failure(&id, "resetPot", at(0));
        ledger.record_failure(&id, "resetPot", at(5));
        ledger.record_failure(&IssueId::from("i2"), "resetPot", at(6));

        assert_eq!(ledger.failures.len(), 2);
        let entry = ledger.failures_for(&id).next().unwrap();
        assert_eq!(entry.count, 2);
        assert_eq!(entry.last_attempt, at(5));
        assert!(ledger.has_failed(&id, "resetPot"));
        assert!(!ledger.has_failed(&id, "restartHand"));
    }

    #[test]
    fn test_similarity_rules() {
        let summary = IssueSummary::from_issue(
            &Issue::new("i1", "pot_mismatch", Severity::High, at(0)).with_detail("tableId", "t1"),
        );

        let same_type = Issue::new("i2", "pot_mismatch", Severity::Low, at(0));
        let same_table =
            Issue::new("i3", "stuck_turn", Severity::Low, at(0)).with_detail("tableId", "t1");
        let shared_key =
            Issue::new("i4", "stuck_turn", Severity::Low, at(0)).with_detail("tableId", "t9");
        let unrelated =
            Issue::new("i5", "stuck_turn", Severity::Low, at(0)).with_detail("playerId", "p1");

        assert!(summary.is_similar_to(&same_type));
        assert!(summary.is_similar_to(&same_table));
        assert!(summary.is_similar_to(&shared_key));
        assert!(!summary.is_similar_to(&unrelated));
    }
}
