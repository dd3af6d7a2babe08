//! The yes/no questions the decision engine asks every tick

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::knowledge::{FixTracker, ShouldNotTry, SuggestedFixes};
use crate::types::{Issue, IssueId, Severity};

use super::investigation::{AppStatus, PolicyState};

/// Answer to one policy question
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Decision {
    pub should: bool,
    pub reason: String,
    pub confidence: f64,
    pub priority: u8,
}

impl Decision {
    pub fn yes(reason: impl Into<String>, confidence: f64, priority: u8) -> Self {
        Self {
            should: true,
            reason: reason.into(),
            confidence,
            priority,
        }
    }

    pub fn no(reason: impl Into<String>) -> Self {
        Self {
            should: false,
            reason: reason.into(),
            confidence: 0.0,
            priority: 0,
        }
    }
}

/// Suggestions for one active issue
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FixPlan {
    pub issue_id: IssueId,
    pub issue_type: String,
    pub priority: u8,
    pub suggestions: SuggestedFixes,
}

/// Methods to avoid for one active issue
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AvoidList {
    pub issue_id: IssueId,
    pub methods: Vec<ShouldNotTry>,
}

pub fn should_start_investigation(
    state: &PolicyState,
    active: &[Issue],
    now: DateTime<Utc>,
    cooldown_ms: i64,
) -> Decision {
    if state.investigation.in_progress() {
        return Decision::no(format!(
            "investigation already {}",
            state.investigation.as_str()
        ));
    }

    if let Some(completed_at) = state.completed_at {
        let elapsed = (now - completed_at).num_milliseconds();
        if elapsed <= cooldown_ms {
            return Decision::no(format!(
                "investigation cooldown: {elapsed}ms since last completion (need more than {cooldown_ms}ms)"
            ));
        }
    }

    let Some(worst) = active.iter().map(|i| i.severity).max() else {
        return Decision::no("no active issues");
    };

    let confidence = match worst {
        Severity::Critical => 0.95,
        Severity::High => 0.85,
        _ => 0.70,
    };
    Decision::yes(
        format!("{} active issue(s), worst is {}", active.len(), worst.as_str()),
        confidence,
        worst.priority(),
    )
}

pub fn should_pause(state: &PolicyState, active: &[Issue]) -> Decision {
    if state.app == AppStatus::Paused {
        return Decision::no("already paused");
    }
    if state.just_completed && !active.is_empty() {
        return Decision::yes(
            format!(
                "investigation completed with {} issue(s) still open",
                active.len()
            ),
            0.95,
            Severity::Critical.priority(),
        );
    }
    if active.iter().any(|i| i.severity == Severity::Critical) {
        return Decision::yes("critical issue detected", 0.90, Severity::Critical.priority());
    }
    Decision::no("no reason to pause")
}

pub fn should_resume(state: &PolicyState, active: &[Issue]) -> Decision {
    if state.app != AppStatus::Paused {
        return Decision::no("not paused");
    }
    if !state.verification_completed {
        return Decision::no("verification not completed");
    }
    if !active.is_empty() {
        return Decision::no(format!("{} issue(s) still active", active.len()));
    }
    Decision::yes("verification passed with no active issues", 0.95, 1)
}

/// Active issues by priority (highest first), then by first sighting
pub fn prioritized(mut active: Vec<Issue>) -> Vec<Issue> {
    active.sort_by(|a, b| {
        b.severity
            .priority()
            .cmp(&a.severity.priority())
            .then(a.first_seen.cmp(&b.first_seen))
    });
    active
}

pub fn what_fixes_to_try(active: &[Issue], fixes: &FixTracker) -> Vec<FixPlan> {
    active
        .iter()
        .map(|issue| FixPlan {
            issue_id: issue.id.clone(),
            issue_type: issue.issue_type.clone(),
            priority: issue.severity.priority(),
            suggestions: fixes.suggested_fixes(issue),
        })
        .collect()
}

pub fn what_to_avoid(active: &[Issue], fixes: &FixTracker) -> Vec<AvoidList> {
    active
        .iter()
        .filter_map(|issue| {
            let methods = fixes.suggested_fixes(issue).should_not_try;
            (!methods.is_empty()).then(|| AvoidList {
                issue_id: issue.id.clone(),
                methods,
            })
        })
        .collect()
}
