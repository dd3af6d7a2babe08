//! Events emitted by the learning and decision loop
//!
//! UI panels and prompt generators subscribe to the [`EventBus`]; nothing
//! inside the core depends on anyone listening.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

use crate::causal::RootCause;
use crate::decision::{FixPlan, InvestigationRecord};
use crate::learning::{AdjustmentDirective, MaskingFlag, Mistake};
use crate::types::{FixAttempt, IssueId};

/// Default broadcast buffer size
pub const DEFAULT_EVENT_CAPACITY: usize = 256;

/// Everything the core reports to the outside world
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum WatchEvent {
    AttemptRecorded {
        attempt: FixAttempt,
    },
    FixSucceeded {
        issue_id: IssueId,
        method: String,
        method_success_rate: f64,
    },
    FixFailed {
        issue_id: IssueId,
        method: String,
        /// Partly worked; counted as a failure but never ledgered
        partial: bool,
    },
    RootCauseFound {
        issue_id: IssueId,
        root_cause: RootCause,
    },
    AutoAdjustment {
        confidence: f64,
        directives: Vec<AdjustmentDirective>,
    },
    MaskingDetected {
        flags: Vec<MaskingFlag>,
    },
    InvestigationStarted {
        started_at: DateTime<Utc>,
        active_issues: usize,
        reason: String,
    },
    InvestigationCompleted {
        record: InvestigationRecord,
    },
    /// The monitored game client should pause
    #[serde(rename = "unityPauseRequested")]
    PauseRequested {
        reason: String,
        confidence: f64,
    },
    /// The monitored game client may resume
    #[serde(rename = "unityResumeRequested")]
    ResumeRequested {
        reason: String,
        confidence: f64,
    },
    FixSuggestions {
        plans: Vec<FixPlan>,
    },
    #[serde(rename = "aiMistakeLearned")]
    MistakeLearned {
        mistake: Mistake,
        penalty: f64,
        confidence: f64,
    },
}

impl WatchEvent {
    /// Wire name of the event, as seen by subscribers
    pub fn name(&self) -> &'static str {
        match self {
            Self::AttemptRecorded { .. } => "attemptRecorded",
            Self::FixSucceeded { .. } => "fixSucceeded",
            Self::FixFailed { .. } => "fixFailed",
            Self::RootCauseFound { .. } => "rootCauseFound",
            Self::AutoAdjustment { .. } => "autoAdjustment",
            Self::MaskingDetected { .. } => "maskingDetected",
            Self::InvestigationStarted { .. } => "investigationStarted",
            Self::InvestigationCompleted { .. } => "investigationCompleted",
            Self::PauseRequested { .. } => "unityPauseRequested",
            Self::ResumeRequested { .. } => "unityResumeRequested",
            Self::FixSuggestions { .. } => "fixSuggestions",
            Self::MistakeLearned { .. } => "aiMistakeLearned",
        }
    }
}

/// Broadcast fan-out for [`WatchEvent`]s
#[derive(Debug, Clone)]
pub struct EventBus {
    tx: broadcast::Sender<WatchEvent>,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self { tx }
    }

    /// Subscribe to all future events
    pub fn subscribe(&self) -> broadcast::Receiver<WatchEvent> {
        self.tx.subscribe()
    }

    /// Emit an event (ignored if nobody is listening)
    pub fn emit(&self, event: WatchEvent) {
        let _ = self.tx.send(event);
    }

    pub fn receiver_count(&self) -> usize {
        self.tx.receiver_count()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(DEFAULT_EVENT_CAPACITY)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_emit_without_receivers_is_silent() {
        let bus = EventBus::default();
        bus.emit(WatchEvent::FixFailed {
            issue_id: "i1".into(),
            method: "resetPot".into(),
            partial: false,
        });
        assert_eq!(bus.receiver_count(), 0);
    }

    #[tokio::test]
    async fn test_subscriber_receives_event() {
        let bus = EventBus::default();
        let mut rx = bus.subscribe();
        bus.emit(WatchEvent::FixFailed {
            issue_id: "i1".into(),
            method: "resetPot".into(),
            partial: false,
        });
        let event = rx.recv().await.unwrap();
        assert_eq!(event.name(), "fixFailed");
    }

    #[test]
    fn test_wire_tag_matches_name() {
        let event = WatchEvent::PauseRequested {
            reason: "critical issue".into(),
            confidence: 0.9,
        };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], event.name());
    }
}
