//! Decision engine: the single writer of investigation and app state

use std::collections::VecDeque;
use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::{debug, info};

use crate::collab::{IssueRegistry, StateStore};
use crate::error::Result;
use crate::events::{EventBus, WatchEvent};
use crate::knowledge::FixTracker;
use crate::store::{KnowledgeStore, StoreKey, load_typed, save_typed};
use crate::types::{StateChange, component_of};

use super::investigation::{
    APP_STATUS, AppStatus, INVESTIGATION_COMPLETED_AT, INVESTIGATION_ISSUE_COUNT,
    INVESTIGATION_PROGRESS, INVESTIGATION_STARTED_AT, INVESTIGATION_STATUS, InvestigationRecord,
    InvestigationStatus, PolicyState, VERIFICATION_STATUS, WATCHED_COMPONENTS, timestamp_value,
};
use super::policy::{
    AvoidList, Decision, FixPlan, prioritized, should_pause, should_resume,
    should_start_investigation, what_fixes_to_try, what_to_avoid,
};

const TRIGGER: &str = "decision-engine";

/// Configuration for the decision engine
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DecisionConfig {
    /// Quiet period after a completed investigation
    pub cooldown_ms: i64,
    /// Delay from `starting` to `active`
    pub activation_delay_ms: i64,
    /// Investigations auto-complete after this long
    pub investigation_timeout_ms: i64,
    pub history_cap: usize,
}

impl Default for DecisionConfig {
    fn default() -> Self {
        Self {
            cooldown_ms: 5_000,
            activation_delay_ms: 100,
            investigation_timeout_ms: 15_000,
            history_cap: 50,
        }
    }
}

/// Answers to all policy questions at one instant
#[derive(Debug, Clone, PartialEq)]
pub struct Decisions {
    pub start_investigation: Decision,
    pub pause: Decision,
    pub resume: Decision,
    pub fixes: Vec<FixPlan>,
}

/// What `execute` actually changed
#[derive(Debug, Clone, PartialEq)]
pub enum DecisionAction {
    InvestigationStarted,
    InvestigationActivated,
    InvestigationCompleted(InvestigationRecord),
    Paused,
    Resumed,
    FixesSuggested(Vec<FixPlan>),
}

pub struct DecisionEngine {
    config: DecisionConfig,
    state: Arc<dyn StateStore>,
    registry: Arc<dyn IssueRegistry>,
    events: EventBus,
    history: VecDeque<InvestigationRecord>,
    pending_activation: Option<DateTime<Utc>>,
    recompute_pending: bool,
    /// Set by `complete`, cleared by the next `execute`
    just_completed: bool,
    last_plans: Vec<FixPlan>,
}

impl DecisionEngine {
    pub fn new(
        config: DecisionConfig,
        state: Arc<dyn StateStore>,
        registry: Arc<dyn IssueRegistry>,
        events: EventBus,
    ) -> Self {
        Self {
            config,
            state,
            registry,
            events,
            history: VecDeque::new(),
            pending_activation: None,
            recompute_pending: false,
            just_completed: false,
            last_plans: Vec::new(),
        }
    }

    /// Answer every policy question without changing anything
    pub fn evaluate(&self, now: DateTime<Utc>, fixes: &FixTracker) -> Decisions {
        let state = PolicyState {
            just_completed: self.just_completed,
            ..PolicyState::read(self.state.as_ref())
        };
        let active = prioritized(self.registry.active_issues());
        Decisions {
            start_investigation: should_start_investigation(
                &state,
                &active,
                now,
                self.config.cooldown_ms,
            ),
            pause: should_pause(&state, &active),
            resume: should_resume(&state, &active),
            fixes: what_fixes_to_try(&active, fixes),
        }
    }

    pub fn what_to_avoid(&self, fixes: &FixTracker) -> Vec<AvoidList> {
        what_to_avoid(&prioritized(self.registry.active_issues()), fixes)
    }

    /// Apply decisions. Repeating the same decisions changes nothing.
    pub fn execute(&mut self, decisions: &Decisions, now: DateTime<Utc>) -> Vec<DecisionAction> {
        let mut actions = Vec::new();
        let current = PolicyState::read(self.state.as_ref());
        self.just_completed = false;

        if decisions.start_investigation.should && !current.investigation.in_progress() {
            let issue_count = self.registry.active_issues().len();
            self.write(INVESTIGATION_STATUS, json!(InvestigationStatus::Starting.as_str()));
            self.write(INVESTIGATION_STARTED_AT, timestamp_value(now));
            self.write(INVESTIGATION_PROGRESS, json!(0));
            self.write(INVESTIGATION_ISSUE_COUNT, json!(issue_count));
            self.pending_activation = Some(now + Duration::milliseconds(self.config.activation_delay_ms));

            info!(issue_count, reason = %decisions.start_investigation.reason, "Investigation started");
            self.events.emit(WatchEvent::InvestigationStarted {
                started_at: now,
                active_issues: issue_count,
                reason: decisions.start_investigation.reason.clone(),
            });
            actions.push(DecisionAction::InvestigationStarted);
        }

        if decisions.pause.should && current.app != AppStatus::Paused {
            self.write(APP_STATUS, json!(AppStatus::Paused.as_str()));
            info!(reason = %decisions.pause.reason, "Pause requested");
            self.events.emit(WatchEvent::PauseRequested {
                reason: decisions.pause.reason.clone(),
                confidence: decisions.pause.confidence,
            });
            actions.push(DecisionAction::Paused);
        } else if decisions.resume.should && current.app == AppStatus::Paused {
            self.write(APP_STATUS, json!(AppStatus::Running.as_str()));
            self.write(VERIFICATION_STATUS, json!("idle"));
            info!(reason = %decisions.resume.reason, "Resume requested");
            self.events.emit(WatchEvent::ResumeRequested {
                reason: decisions.resume.reason.clone(),
                confidence: decisions.resume.confidence,
            });
            actions.push(DecisionAction::Resumed);
        }

        if decisions.fixes != self.last_plans {
            self.last_plans = decisions.fixes.clone();
            if !decisions.fixes.is_empty() {
                self.events.emit(WatchEvent::FixSuggestions {
                    plans: decisions.fixes.clone(),
                });
                actions.push(DecisionAction::FixesSuggested(decisions.fixes.clone()));
            }
        }

        actions
    }

    /// Move a starting investigation to active once its delay has passed
    pub fn activate(&mut self, now: DateTime<Utc>) -> bool {
        let Some(due) = self.pending_activation else {
            return false;
        };
        if now < due {
            return false;
        }
        self.pending_activation = None;

        let current = PolicyState::read(self.state.as_ref());
        if current.investigation != InvestigationStatus::Starting {
            return false;
        }
        self.write(INVESTIGATION_STATUS, json!(InvestigationStatus::Active.as_str()));
        debug!("Investigation active");
        true
    }

    /// When the pending `starting -> active` step is due
    pub fn pending_activation(&self) -> Option<DateTime<Utc>> {
        self.pending_activation
    }

    /// Note a state change. Changes to investigation, app or verification
    /// state request a recompute; nothing is written here.
    pub fn note_state_change(&mut self, change: &StateChange) -> bool {
        let watched = WATCHED_COMPONENTS.contains(&component_of(&change.path));
        if watched {
            self.recompute_pending = true;
        }
        watched
    }

    /// Note that the set of issues changed
    pub fn note_issue_change(&mut self) {
        self.recompute_pending = true;
    }

    pub fn recompute_pending(&self) -> bool {
        self.recompute_pending
    }

    /// Evaluate and execute. Does not touch progress, so writes caused by
    /// a recompute cannot retrigger one indefinitely.
    pub fn recompute(&mut self, now: DateTime<Utc>, fixes: &FixTracker) -> Vec<DecisionAction> {
        self.recompute_pending = false;
        let decisions = self.evaluate(now, fixes);
        self.execute(&decisions, now)
    }

    /// The periodic step: activation, progress, timeout, then recompute
    pub fn tick(&mut self, now: DateTime<Utc>, fixes: &FixTracker) -> Vec<DecisionAction> {
        let mut actions = Vec::new();
        if self.activate(now) {
            actions.push(DecisionAction::InvestigationActivated);
        }

        let current = PolicyState::read(self.state.as_ref());
        if current.investigation == InvestigationStatus::Active {
            let started_at = current.started_at.unwrap_or(now);
            let elapsed = (now - started_at).num_milliseconds().max(0);
            let timeout = self.config.investigation_timeout_ms.max(1);
            if elapsed >= timeout {
                let record = self.complete(started_at, now);
                actions.push(DecisionAction::InvestigationCompleted(record));
            } else {
                let progress = (elapsed * 100 / timeout).min(99);
                self.write(INVESTIGATION_PROGRESS, json!(progress));
            }
        }

        actions.extend(self.recompute(now, fixes));
        actions
    }

    pub fn history(&self) -> impl Iterator<Item = &InvestigationRecord> {
        self.history.iter()
    }

    pub fn config(&self) -> &DecisionConfig {
        &self.config
    }

    pub async fn load(&mut self, store: &dyn KnowledgeStore) -> Result<()> {
        if let Some(history) = load_typed(store, StoreKey::DecisionInvestigations).await? {
            self.history = history;
            self.trim_history();
        }
        Ok(())
    }

    pub async fn save(&self, store: &dyn KnowledgeStore) -> Result<()> {
        save_typed(store, StoreKey::DecisionInvestigations, &self.history).await
    }

    fn complete(&mut self, started_at: DateTime<Utc>, now: DateTime<Utc>) -> InvestigationRecord {
        let record = InvestigationRecord {
            started_at,
            completed_at: now,
            duration_ms: (now - started_at).num_milliseconds(),
            issue_count: self.registry.active_issues().len(),
        };

        self.write(INVESTIGATION_STATUS, json!(InvestigationStatus::Completed.as_str()));
        self.write(INVESTIGATION_COMPLETED_AT, timestamp_value(now));
        self.write(INVESTIGATION_PROGRESS, json!(100));

        self.history.push_back(record.clone());
        self.trim_history();
        self.just_completed = true;

        info!(
            duration_ms = record.duration_ms,
            issue_count = record.issue_count,
            "Investigation completed"
        );
        self.events.emit(WatchEvent::InvestigationCompleted {
            record: record.clone(),
        });
        record
    }

    fn trim_history(&mut self) {
        while self.history.len() > self.config.history_cap {
            self.history.pop_front();
        }
    }

    fn write(&self, path: &str, value: serde_json::Value) {
        self.state.set(path, value, TRIGGER);
    }
}
