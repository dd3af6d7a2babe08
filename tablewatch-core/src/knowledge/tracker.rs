//! Fix tracker: attempt recording and fix suggestions

use std::collections::{BTreeMap, VecDeque};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, info};
use uuid::Uuid;

use crate::collab::{IssueRegistry, StateStore};
use crate::error::Result;
use crate::events::{EventBus, WatchEvent};
use crate::store::{KnowledgeStore, StoreKey, load_typed, save_typed};
use crate::types::{FixAttempt, FixResult, Issue, IssueId};

use super::types::{
    FixLedger, FixStatistics, IssueSummary, KnowledgeDocument, KnowledgeEntry, MethodStats,
    ShouldNotTry, ShouldTry, SuggestedFixes, WorkingFix,
};

/// Configuration for the fix tracker
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct KnowledgeConfig {
    /// Attempts retained for audit and replay (oldest evicted)
    pub max_attempts: usize,
    /// Method success rate above which a success is added to working fixes
    pub working_fix_threshold: f64,
    /// Pattern success rate above which its best method is suggested
    pub pattern_suggestion_threshold: f64,
}

impl Default for KnowledgeConfig {
    fn default() -> Self {
        Self {
            max_attempts: 1000,
            working_fix_threshold: 0.5,
            pattern_suggestion_threshold: 0.5,
        }
    }
}

/// One remediation attempt as reported by the caller
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AttemptRequest {
    pub issue_id: IssueId,
    pub method: String,
    #[serde(default)]
    pub details: Value,
    pub result: FixResult,
    #[serde(default)]
    pub duration_ms: Option<u64>,
}

impl AttemptRequest {
    pub fn new(issue_id: impl Into<IssueId>, method: impl Into<String>, result: FixResult) -> Self {
        Self {
            issue_id: issue_id.into(),
            method: method.into(),
            details: Value::Null,
            result,
            duration_ms: None,
        }
    }

    #[must_use]
    pub fn with_details(mut self, details: Value) -> Self {
        self.details = details;
        self
    }

    #[must_use]
    pub fn with_duration_ms(mut self, duration_ms: u64) -> Self {
        self.duration_ms = Some(duration_ms);
        self
    }
}

/// Records fix attempts and derives reusable knowledge from them
pub struct FixTracker {
    config: KnowledgeConfig,
    registry: Arc<dyn IssueRegistry>,
    state: Option<Arc<dyn StateStore>>,
    events: EventBus,

    attempts: VecDeque<FixAttempt>,
    methods: BTreeMap<String, MethodStats>,
    knowledge: BTreeMap<String, KnowledgeEntry>,
    ledger: FixLedger,
    working_fixes: Vec<WorkingFix>,
    issues: BTreeMap<IssueId, IssueSummary>,
}

impl FixTracker {
    pub fn new(config: KnowledgeConfig, registry: Arc<dyn IssueRegistry>, events: EventBus) -> Self {
        Self {
            config,
            registry,
            state: None,
            events,
            attempts: VecDeque::new(),
            methods: BTreeMap::new(),
            knowledge: BTreeMap::new(),
            ledger: FixLedger::default(),
            working_fixes: Vec::new(),
            issues: BTreeMap::new(),
        }
    }

    /// Attach a state store so attempts carry a state snapshot
    #[must_use]
    pub fn with_state_store(mut self, state: Arc<dyn StateStore>) -> Self {
        self.state = Some(state);
        self
    }

    /// Create a tracker and load its persisted state
    pub async fn init(
        config: KnowledgeConfig,
        registry: Arc<dyn IssueRegistry>,
        events: EventBus,
        store: &dyn KnowledgeStore,
    ) -> Result<Self> {
        let mut tracker = Self::new(config, registry, events);
        tracker.load(store).await?;
        Ok(tracker)
    }

    /// Record one remediation attempt.
    ///
    /// Updates method statistics, the knowledge entry for the issue's
    /// pattern and the failure/success ledger, then emits
    /// `attemptRecorded` followed by `fixSucceeded` or `fixFailed`.
    pub fn record_attempt(&mut self, request: AttemptRequest, now: DateTime<Utc>) -> FixAttempt {
        let summary = self.summary_for(&request.issue_id);
        let success = request.result.is_success();

        let attempt = FixAttempt {
            id: Uuid::now_v7(),
            issue_id: request.issue_id.clone(),
            issue_type: summary.issue_type.clone(),
            fix_method: request.method.clone(),
            fix_details: request.details,
            result: request.result,
            timestamp: now,
            state_snapshot: self
                .state
                .as_ref()
                .map(|s| s.snapshot())
                .unwrap_or(Value::Null),
            duration_ms: request.duration_ms,
        };

        self.attempts.push_back(attempt.clone());
        while self.attempts.len() > self.config.max_attempts {
            self.attempts.pop_front();
        }

        let stats = self.methods.entry(request.method.clone()).or_default();
        stats.record(success, now);
        let method_rate = stats.rate;

        self.knowledge
            .entry(summary.pattern_key.clone())
            .or_default()
            .record(&request.method, success);

        self.events.emit(WatchEvent::AttemptRecorded {
            attempt: attempt.clone(),
        });

        match request.result {
            FixResult::Success => {
                self.ledger.record_success(&request.issue_id, &request.method, now);
                if method_rate > self.config.working_fix_threshold {
                    self.add_working_fix(&summary.issue_type, &request.method, method_rate, now);
                }
                info!(
                    issue_id = %request.issue_id,
                    method = %request.method,
                    rate = method_rate,
                    "Fix succeeded"
                );
                self.events.emit(WatchEvent::FixSucceeded {
                    issue_id: request.issue_id.clone(),
                    method: request.method.clone(),
                    method_success_rate: method_rate,
                });
            }
            FixResult::Failure => {
                self.ledger.record_failure(&request.issue_id, &request.method, now);
                info!(
                    issue_id = %request.issue_id,
                    method = %request.method,
                    "Fix failed, will not be suggested again for this issue"
                );
                self.events.emit(WatchEvent::FixFailed {
                    issue_id: request.issue_id.clone(),
                    method: request.method.clone(),
                    partial: false,
                });
            }
            FixResult::Partial => {
                debug!(
                    issue_id = %request.issue_id,
                    method = %request.method,
                    "Partial fix recorded"
                );
                self.events.emit(WatchEvent::FixFailed {
                    issue_id: request.issue_id.clone(),
                    method: request.method.clone(),
                    partial: true,
                });
            }
        }

        self.issues.insert(request.issue_id, summary);
        attempt
    }

    /// Suggest what to try (and avoid) for an issue. Pure query.
    pub fn suggested_fixes(&self, issue: &Issue) -> SuggestedFixes {
        let should_not_try: Vec<ShouldNotTry> = self
            .ledger
            .failures_for(&issue.id)
            .map(|entry| ShouldNotTry {
                method: entry.method.clone(),
                reason: format!(
                    "failed {} time{} on this issue",
                    entry.count,
                    if entry.count == 1 { "" } else { "s" }
                ),
                count: entry.count,
                last_attempt: entry.last_attempt,
            })
            .collect();

        // Successful methods on similar issues, in the order they succeeded
        let mut candidates: Vec<(String, usize)> = Vec::new();
        for success in &self.ledger.successes {
            if success.issue_id == issue.id {
                continue;
            }
            let similar = self
                .issues
                .get(&success.issue_id)
                .is_some_and(|s| s.is_similar_to(issue));
            if !similar || self.ledger.has_failed(&issue.id, &success.method) {
                continue;
            }
            match candidates.iter_mut().find(|(m, _)| *m == success.method) {
                Some((_, n)) => *n += 1,
                None => candidates.push((success.method.clone(), 1)),
            }
        }

        let mut should_try: Vec<ShouldTry> = candidates
            .into_iter()
            .map(|(method, similar_count)| {
                let rate = self.method_rate(&method);
                ShouldTry {
                    reason: format!(
                        "worked on {similar_count} similar issue{}",
                        if similar_count == 1 { "" } else { "s" }
                    ),
                    confidence: rate,
                    success_rate: rate,
                    method,
                }
            })
            .collect();

        // Stable: equal rates keep encounter order
        should_try.sort_by(|a, b| {
            b.success_rate
                .partial_cmp(&a.success_rate)
                .unwrap_or(std::cmp::Ordering::Equal)
        });

        let pattern_key = issue.pattern_key();
        if let Some(entry) = self.knowledge.get(&pattern_key)
            && entry.success_rate > self.config.pattern_suggestion_threshold
            && !should_try.iter().any(|s| s.method == entry.best_method)
            && !self.ledger.has_failed(&issue.id, &entry.best_method)
        {
            should_try.push(ShouldTry {
                method: entry.best_method.clone(),
                confidence: entry.success_rate,
                reason: format!("best known fix for pattern {pattern_key}"),
                success_rate: entry.success_rate,
            });
        }

        let confidence = should_try
            .iter()
            .map(|s| s.confidence)
            .fold(0.0_f64, f64::max);

        SuggestedFixes {
            should_try,
            should_not_try,
            confidence,
        }
    }

    /// Global success rate of a method, 0 if never tried
    pub fn method_rate(&self, method: &str) -> f64 {
        self.methods.get(method).map(|s| s.rate).unwrap_or(0.0)
    }

    pub fn method_stats(&self) -> &BTreeMap<String, MethodStats> {
        &self.methods
    }

    /// Recompute method statistics from the retained attempt log
    pub fn stats_batch(&self) -> BTreeMap<String, MethodStats> {
        let mut stats: BTreeMap<String, MethodStats> = BTreeMap::new();
        for attempt in &self.attempts {
            stats
                .entry(attempt.fix_method.clone())
                .or_default()
                .record(attempt.is_success(), attempt.timestamp);
        }
        stats
    }

    pub fn knowledge_for(&self, pattern_key: &str) -> Option<&KnowledgeEntry> {
        self.knowledge.get(pattern_key)
    }

    pub fn attempts(&self) -> impl Iterator<Item = &FixAttempt> {
        self.attempts.iter()
    }

    pub fn attempt_count(&self) -> usize {
        self.attempts.len()
    }

    pub fn ledger(&self) -> &FixLedger {
        &self.ledger
    }

    pub fn working_fixes(&self) -> &[WorkingFix] {
        &self.working_fixes
    }

    pub fn fix_statistics(&self) -> FixStatistics {
        FixStatistics {
            total_attempts: self.attempts.len(),
            successful_attempts: self.attempts.iter().filter(|a| a.is_success()).count(),
            distinct_methods: self.methods.len(),
            known_patterns: self.knowledge.len(),
            working_fixes: self.working_fixes.len(),
        }
    }

    pub fn config(&self) -> &KnowledgeConfig {
        &self.config
    }

    /// Load persisted state. Read failures propagate.
    pub async fn load(&mut self, store: &dyn KnowledgeStore) -> Result<()> {
        if let Some(doc) = load_typed::<KnowledgeDocument>(store, StoreKey::FixKnowledge).await? {
            self.knowledge = doc.entries;
            self.working_fixes = doc.working_fixes;
            self.issues = doc.issues;
        }
        if let Some(attempts) = load_typed::<Vec<FixAttempt>>(store, StoreKey::FixAttempts).await? {
            self.attempts = attempts.into();
            while self.attempts.len() > self.config.max_attempts {
                self.attempts.pop_front();
            }
        }
        if let Some(failures) = load_typed(store, StoreKey::FixFailures).await? {
            self.ledger.failures = failures;
        }
        if let Some(successes) = load_typed(store, StoreKey::FixSuccesses).await? {
            self.ledger.successes = successes;
        }
        if let Some(methods) = load_typed(store, StoreKey::FixMethods).await? {
            self.methods = methods;
        }

        debug!(
            attempts = self.attempts.len(),
            methods = self.methods.len(),
            patterns = self.knowledge.len(),
            "Loaded fix knowledge"
        );
        Ok(())
    }

    /// Persist all state. Write failures propagate.
    pub async fn save(&self, store: &dyn KnowledgeStore) -> Result<()> {
        let doc = KnowledgeDocument {
            entries: self.knowledge.clone(),
            working_fixes: self.working_fixes.clone(),
            issues: self.issues.clone(),
        };
        save_typed(store, StoreKey::FixKnowledge, &doc).await?;
        save_typed(store, StoreKey::FixAttempts, &self.attempts).await?;
        save_typed(store, StoreKey::FixFailures, &self.ledger.failures).await?;
        save_typed(store, StoreKey::FixSuccesses, &self.ledger.successes).await?;
        save_typed(store, StoreKey::FixMethods, &self.methods).await?;
        Ok(())
    }

    fn summary_for(&self, issue_id: &IssueId) -> IssueSummary {
        if let Some(issue) = self.registry.get_issue(issue_id) {
            return IssueSummary::from_issue(&issue);
        }
        match self.issues.get(issue_id) {
            Some(summary) => summary.clone(),
            None => {
                debug!(issue_id = %issue_id, "Attempt for unknown issue");
                IssueSummary::unknown()
            }
        }
    }

    fn add_working_fix(&mut self, issue_type: &str, method: &str, rate: f64, now: DateTime<Utc>) {
        match self
            .working_fixes
            .iter_mut()
            .find(|w| w.issue_type == issue_type && w.method == method)
        {
            Some(existing) => {
                existing.success_rate = rate;
                existing.recorded_at = now;
            }
            None => self.working_fixes.push(WorkingFix {
                issue_type: issue_type.to_string(),
                method: method.to_string(),
                success_rate: rate,
                recorded_at: now,
            }),
        }
    }
}
