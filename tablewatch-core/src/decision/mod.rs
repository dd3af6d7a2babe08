//! Decision policy
//!
//! Turns issue and investigation state into actions: start an
//! investigation, pause or resume the monitored game client, and which
//! fixes to try. Investigation and app state live in the state store;
//! [`DecisionEngine`] is the only component that writes them.

mod engine;
mod investigation;
mod policy;

pub use engine::{DecisionAction, DecisionConfig, DecisionEngine, Decisions};
pub use investigation::{
    APP_STATUS, AppStatus, INVESTIGATION_COMPLETED_AT, INVESTIGATION_ISSUE_COUNT,
    INVESTIGATION_PROGRESS, INVESTIGATION_STARTED_AT, INVESTIGATION_STATUS, InvestigationRecord,
    InvestigationStatus, PolicyState, VERIFICATION_STATUS,
};
pub use policy::{
    AvoidList, Decision, FixPlan, prioritized, should_pause, should_resume,
    should_start_investigation, what_fixes_to_try, what_to_avoid,
};
