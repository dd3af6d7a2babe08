//! Issue registry contract and in-memory implementation

use std::collections::BTreeMap;
use std::sync::{PoisonError, RwLock};

use chrono::{DateTime, Utc};
use tokio::sync::broadcast;

use crate::types::{ChainLink, Issue, IssueDraft, IssueId, StateChange};

/// Notification published by the registry
#[derive(Debug, Clone, PartialEq)]
pub enum IssueEvent {
    /// A new issue, or a re-detection of a known one
    Detected(Issue),
    /// An issue was resolved and removed
    Resolved(IssueId),
}

/// Holds detected issues keyed by id
pub trait IssueRegistry: Send + Sync {
    fn get_issue(&self, id: &IssueId) -> Option<Issue>;

    /// All issues not yet resolved
    fn active_issues(&self) -> Vec<Issue>;

    /// Register (or refresh) an issue. `first_seen` is kept on re-detection.
    fn detect_issue(&self, draft: IssueDraft, now: DateTime<Utc>) -> Issue;

    /// Attach an inferred root cause. Returns false if the issue is gone.
    fn annotate_root_cause(&self, id: &IssueId, root: &StateChange, chain: &[ChainLink]) -> bool;

    /// Remove a resolved issue
    fn resolve(&self, id: &IssueId) -> Option<Issue>;

    fn subscribe(&self) -> broadcast::Receiver<IssueEvent>;
}

/// Registry backed by an ordered map
pub struct InMemoryIssueRegistry {
    issues: RwLock<BTreeMap<IssueId, Issue>>,
    sender: broadcast::Sender<IssueEvent>,
}

impl InMemoryIssueRegistry {
    pub fn new() -> Self {
        let (sender, _) = broadcast::channel(256);
        Self {
            issues: RwLock::new(BTreeMap::new()),
            sender,
        }
    }

    /// Insert a fully-formed issue without stamping (tests)
    pub fn insert(&self, issue: Issue) {
        self.issues
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(issue.id.clone(), issue);
    }
}

impl Default for InMemoryIssueRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl IssueRegistry for InMemoryIssueRegistry {
    fn get_issue(&self, id: &IssueId) -> Option<Issue> {
        self.issues
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(id)
            .cloned()
    }

    fn active_issues(&self) -> Vec<Issue> {
        self.issues
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .cloned()
            .collect()
    }

    fn detect_issue(&self, draft: IssueDraft, now: DateTime<Utc>) -> Issue {
        let issue = {
            let mut issues = self.issues.write().unwrap_or_else(PoisonError::into_inner);
            let issue = issues
                .entry(draft.id.clone())
                .and_modify(|existing| {
                    existing.issue_type = draft.issue_type.clone();
                    existing.severity = draft.severity;
                    existing.details = draft.details.clone();
                })
                .or_insert_with(|| Issue {
                    id: draft.id.clone(),
                    issue_type: draft.issue_type.clone(),
                    severity: draft.severity,
                    details: draft.details.clone(),
                    first_seen: now,
                    root_cause: None,
                    causal_chain: None,
                });
            issue.clone()
        };

        let _ = self.sender.send(IssueEvent::Detected(issue.clone()));
        issue
    }

    fn annotate_root_cause(&self, id: &IssueId, root: &StateChange, chain: &[ChainLink]) -> bool {
        let mut issues = self.issues.write().unwrap_or_else(PoisonError::into_inner);
        match issues.get_mut(id) {
            Some(issue) => {
                issue.root_cause = Some(root.clone());
                issue.causal_chain = Some(chain.to_vec());
                true
            }
            None => false,
        }
    }

    fn resolve(&self, id: &IssueId) -> Option<Issue> {
        let removed = self
            .issues
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(id);
        if removed.is_some() {
            let _ = self.sender.send(IssueEvent::Resolved(id.clone()));
        }
        removed
    }

    fn subscribe(&self) -> broadcast::Receiver<IssueEvent> {
        self.sender.subscribe()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{IssueDetails, Severity};
    use serde_json::json;

    fn draft(id: &str, table: &str) -> IssueDraft {
        let mut details = IssueDetails::new();
        details.insert("tableId".into(), json!(table));
        IssueDraft {
            id: id.into(),
            issue_type: "pot_mismatch".into(),
            severity: Severity::High,
            details,
        }
    }

    fn at(ms: i64) -> DateTime<Utc> {
        DateTime::from_timestamp_millis(ms).unwrap()
    }

    #[test]
    fn test_redetection_keeps_first_seen() {
        let registry = InMemoryIssueRegistry::new();
        registry.detect_issue(draft("i1", "t1"), at(1_000));
        let again = registry.detect_issue(draft("i1", "t2"), at(9_000));

        assert_eq!(again.first_seen, at(1_000));
        assert_eq!(again.table_id(), Some("t2"));
        assert_eq!(registry.active_issues().len(), 1);
    }

    #[tokio::test]
    async fn test_detect_and_resolve_publish_events() {
        let registry = InMemoryIssueRegistry::new();
        let mut rx = registry.subscribe();

        registry.detect_issue(draft("i1", "t1"), at(0));
        registry.resolve(&"i1".into());

        assert!(matches!(rx.recv().await.unwrap(), IssueEvent::Detected(_)));
        assert_eq!(
            rx.recv().await.unwrap(),
            IssueEvent::Resolved("i1".into())
        );
        assert!(registry.get_issue(&"i1".into()).is_none());
    }

    #[test]
    fn test_annotate_missing_issue_is_soft() {
        let registry = InMemoryIssueRegistry::new();
        let change = StateChange::new(at(0), "game.pot", json!(1), json!(2), "bet");
        assert!(!registry.annotate_root_cause(&"gone".into(), &change, &[]));
    }
}
