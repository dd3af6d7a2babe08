//! Exportable causal graph

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

use crate::types::{Issue, IssueId, Severity, StateChange};

/// Node in the causal graph
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum CausalNode {
    Change {
        id: String,
        change: StateChange,
    },
    Issue {
        id: String,
        issue_id: IssueId,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        issue_type: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        severity: Option<Severity>,
    },
}

impl CausalNode {
    pub fn id(&self) -> &str {
        match self {
            Self::Change { id, .. } | Self::Issue { id, .. } => id,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EdgeKind {
    /// One chain entry to the next
    LeadsTo,
    /// First chain entry to its issue
    Causes,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CausalEdge {
    pub from: String,
    pub to: String,
    pub kind: EdgeKind,
}

/// Nodes for state changes and issues, edges for causal links
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CausalGraph {
    pub nodes: Vec<CausalNode>,
    pub edges: Vec<CausalEdge>,
    #[serde(skip)]
    seen: BTreeSet<String>,
}

impl CausalGraph {
    pub fn change_node_id(change: &StateChange) -> String {
        format!(
            "change:{}:{}:{}",
            change.seq,
            change.timestamp.timestamp_millis(),
            change.path
        )
    }

    pub fn issue_node_id(issue_id: &IssueId) -> String {
        format!("issue:{issue_id}")
    }

    pub(crate) fn add_change(&mut self, change: &StateChange) -> String {
        let id = Self::change_node_id(change);
        if self.seen.insert(id.clone()) {
            self.nodes.push(CausalNode::Change {
                id: id.clone(),
                change: change.clone(),
            });
        }
        id
    }

    pub(crate) fn add_issue(&mut self, issue_id: &IssueId, issue: Option<&Issue>) -> String {
        let id = Self::issue_node_id(issue_id);
        if self.seen.insert(id.clone()) {
            self.nodes.push(CausalNode::Issue {
                id: id.clone(),
                issue_id: issue_id.clone(),
                issue_type: issue.map(|i| i.issue_type.clone()),
                severity: issue.map(|i| i.severity),
            });
        }
        id
    }

    pub(crate) fn link(&mut self, from: &StateChange, to: &StateChange) {
        let from = self.add_change(from);
        let to = self.add_change(to);
        self.edges.push(CausalEdge {
            from,
            to,
            kind: EdgeKind::LeadsTo,
        });
    }

    pub(crate) fn cause(&mut self, change: &StateChange, issue_id: &IssueId) {
        let from = self.add_change(change);
        let to = self.add_issue(issue_id, None);
        self.edges.push(CausalEdge {
            from,
            to,
            kind: EdgeKind::Causes,
        });
    }

    pub fn edges_of_kind(&self, kind: EdgeKind) -> impl Iterator<Item = &CausalEdge> {
        self.edges.iter().filter(move |e| e.kind == kind)
    }
}
