//! Causal backtracking from state history to a root cause

use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::collab::{DependencyGraph, IssueRegistry};
use crate::error::Result;
use crate::events::{EventBus, WatchEvent};
use crate::store::{KnowledgeStore, StoreKey, load_typed, save_typed};
use crate::types::{ChainLink, Issue, IssueId, Relationship, StateChange};

use super::graph::CausalGraph;
use super::history::StateHistory;

/// Configuration for causal analysis
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CausalConfig {
    /// State changes retained for backtracking
    pub history_capacity: usize,
    /// How far before an issue's first sighting to look
    pub lookback_ms: u64,
    /// Dependency levels walked past the earliest chain entry
    pub max_hops: u32,
}

impl Default for CausalConfig {
    fn default() -> Self {
        Self {
            history_capacity: 10_000,
            lookback_ms: 60_000,
            max_hops: 1,
        }
    }
}

/// Inferred origin of an issue
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RootCause {
    pub change: StateChange,
    /// Chain entries plus one per dependency hop taken
    pub chain_length: usize,
    pub hops: u32,
}

/// Result of analyzing one issue
#[derive(Debug, Clone, PartialEq)]
pub struct CausalAnalysis {
    pub issue_id: IssueId,
    pub chain: Vec<ChainLink>,
    pub root_cause: Option<RootCause>,
}

/// Per-chain facts the learning engine scores
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CausalSummary {
    pub chain_length: usize,
    pub root_cause_found: bool,
    /// Chain holds at least one direct or dependency link
    pub has_strong_link: bool,
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct CausalDocument {
    #[serde(default)]
    chains: BTreeMap<IssueId, Vec<ChainLink>>,
    #[serde(default)]
    root_causes: BTreeMap<IssueId, RootCause>,
}

/// Builds causal chains for detected issues
pub struct CausalAnalyzer {
    config: CausalConfig,
    history: StateHistory,
    registry: Arc<dyn IssueRegistry>,
    graph: Option<Arc<dyn DependencyGraph>>,
    events: EventBus,
    chains: BTreeMap<IssueId, Vec<ChainLink>>,
    root_causes: BTreeMap<IssueId, RootCause>,
}

impl CausalAnalyzer {
    pub fn new(config: CausalConfig, registry: Arc<dyn IssueRegistry>, events: EventBus) -> Self {
        Self {
            history: StateHistory::new(config.history_capacity),
            config,
            registry,
            graph: None,
            events,
            chains: BTreeMap::new(),
            root_causes: BTreeMap::new(),
        }
    }

    #[must_use]
    pub fn with_dependency_graph(mut self, graph: Arc<dyn DependencyGraph>) -> Self {
        self.graph = Some(graph);
        self
    }

    /// Append a reported state mutation to the history
    pub fn record_change(&mut self, change: StateChange) {
        self.history.push(change);
    }

    pub fn history(&self) -> &StateHistory {
        &self.history
    }

    /// Related changes in the lookback window before `issue.first_seen`,
    /// oldest first.
    pub fn trace_backwards(&self, issue: &Issue) -> Vec<ChainLink> {
        let start = issue
            .first_seen
            .checked_sub_signed(Duration::milliseconds(self.lookback_ms()))
            .unwrap_or(DateTime::<Utc>::MIN_UTC);
        let dependents = match (&self.graph, issue.component()) {
            (Some(graph), Some(component)) => graph.dependents(component),
            _ => Vec::new(),
        };

        self.history
            .window(start, issue.first_seen)
            .into_iter()
            .filter_map(|change| {
                relate(change, issue, &dependents).map(|relationship| ChainLink {
                    change: change.clone(),
                    relationship,
                })
            })
            .collect()
    }

    /// Earliest chain entry, superseded by earlier dependency changes up to
    /// `max_hops` times.
    pub fn find_root_cause(&self, chain: &[ChainLink]) -> Option<RootCause> {
        let first = chain.first()?;
        let mut root = RootCause {
            change: first.change.clone(),
            chain_length: chain.len(),
            hops: 0,
        };

        let Some(graph) = &self.graph else {
            return Some(root);
        };

        while root.hops < self.config.max_hops {
            let dependencies = graph.dependencies(root.change.component());
            if dependencies.is_empty() {
                break;
            }
            let earlier = self.history.earliest_before(root.change.timestamp, |c| {
                dependencies.iter().any(|dep| c.path.contains(dep.as_str()))
            });
            match earlier {
                Some(change) => {
                    root.change = change.clone();
                    root.chain_length += 1;
                    root.hops += 1;
                }
                None => break,
            }
        }

        Some(root)
    }

    /// Trace, find the root cause, store both and write the root cause back
    /// to the registry. Overwrites any earlier analysis of the same issue.
    pub fn analyze_issue(&mut self, issue: &Issue) -> CausalAnalysis {
        let chain = self.trace_backwards(issue);
        let root_cause = self.find_root_cause(&chain);

        match &root_cause {
            Some(root) => {
                self.root_causes.insert(issue.id.clone(), root.clone());
                if !self.registry.annotate_root_cause(&issue.id, &root.change, &chain) {
                    debug!(issue_id = %issue.id, "Issue gone before root cause write-back");
                }
                info!(
                    issue_id = %issue.id,
                    path = %root.change.path,
                    chain_length = root.chain_length,
                    hops = root.hops,
                    "Root cause found"
                );
                self.events.emit(WatchEvent::RootCauseFound {
                    issue_id: issue.id.clone(),
                    root_cause: root.clone(),
                });
            }
            None => {
                self.root_causes.remove(&issue.id);
                debug!(issue_id = %issue.id, "No related state changes in lookback window");
            }
        }
        self.chains.insert(issue.id.clone(), chain.clone());

        CausalAnalysis {
            issue_id: issue.id.clone(),
            chain,
            root_cause,
        }
    }

    pub fn chain_for(&self, issue_id: &IssueId) -> Option<&[ChainLink]> {
        self.chains.get(issue_id).map(Vec::as_slice)
    }

    pub fn root_cause_for(&self, issue_id: &IssueId) -> Option<&RootCause> {
        self.root_causes.get(issue_id)
    }

    pub fn chain_count(&self) -> usize {
        self.chains.len()
    }

    pub fn causal_summaries(&self) -> Vec<CausalSummary> {
        self.chains
            .iter()
            .map(|(id, chain)| {
                let root = self.root_causes.get(id);
                CausalSummary {
                    chain_length: root.map(|r| r.chain_length).unwrap_or(chain.len()),
                    root_cause_found: root.is_some(),
                    has_strong_link: chain.iter().any(|l| {
                        matches!(l.relationship, Relationship::Direct | Relationship::Dependency)
                    }),
                }
            })
            .collect()
    }

    /// Read-only projection of history, issues and stored chains
    pub fn build_causal_graph(&self) -> CausalGraph {
        let mut graph = CausalGraph::default();
        for change in self.history.iter() {
            graph.add_change(change);
        }
        for issue in self.registry.active_issues() {
            graph.add_issue(&issue.id, Some(&issue));
        }
        for (issue_id, chain) in &self.chains {
            if chain.is_empty() {
                continue;
            }
            graph.add_issue(issue_id, None);
            for pair in chain.windows(2) {
                graph.link(&pair[0].change, &pair[1].change);
            }
            graph.cause(&chain[0].change, issue_id);
        }
        graph
    }

    pub fn config(&self) -> &CausalConfig {
        &self.config
    }

    pub async fn load(&mut self, store: &dyn KnowledgeStore) -> Result<()> {
        if let Some(doc) = load_typed::<CausalDocument>(store, StoreKey::LearningCausalChains).await? {
            self.chains = doc.chains;
            self.root_causes = doc.root_causes;
        }
        let last_seq = self
            .chains
            .values()
            .flatten()
            .map(|link| link.change.seq)
            .chain(self.root_causes.values().map(|root| root.change.seq))
            .max();
        if let Some(seq) = last_seq {
            self.history.resume_after(seq);
        }
        Ok(())
    }

    pub async fn save(&self, store: &dyn KnowledgeStore) -> Result<()> {
        let doc = CausalDocument {
            chains: self.chains.clone(),
            root_causes: self.root_causes.clone(),
        };
        save_typed(store, StoreKey::LearningCausalChains, &doc).await
    }

    fn lookback_ms(&self) -> i64 {
        i64::try_from(self.config.lookback_ms).unwrap_or(i64::MAX / 2)
    }
}

/// First matching relatedness rule wins
fn relate(change: &StateChange, issue: &Issue, dependents: &[String]) -> Option<Relationship> {
    if issue.path() == Some(change.path.as_str()) {
        return Some(Relationship::Direct);
    }
    if issue.component() == Some(change.component()) {
        return Some(Relationship::Indirect);
    }
    if issue.table_id().is_some_and(|t| change.path.contains(t)) {
        return Some(Relationship::Indirect);
    }
    if issue.player_id().is_some_and(|p| change.path.contains(p)) {
        return Some(Relationship::Indirect);
    }
    if dependents.iter().any(|d| d == change.component()) {
        return Some(Relationship::Dependency);
    }
    None
}
