//! Integration tests for the knowledge, causal, learning and decision parts
//!
//! Each component is driven through its public API against the in-memory
//! collaborators, with explicit timestamps so every outcome is deterministic.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde_json::json;

use tablewatch_core::causal::{CausalAnalyzer, CausalConfig};
use tablewatch_core::collab::{InMemoryIssueRegistry, InMemoryStateStore, IssueRegistry};
use tablewatch_core::decision::{
    DecisionAction, DecisionConfig, DecisionEngine, InvestigationStatus, PolicyState,
    should_start_investigation,
};
use tablewatch_core::knowledge::{AttemptRequest, FixTracker, KnowledgeConfig};
use tablewatch_core::learning::{
    ConfidenceMetrics, LearningConfig, LearningEngine, MaskingKind, MaskingSeverity,
    MetricWeights, detect_test_masking,
};
use tablewatch_core::{EventBus, FixResult, Issue, Relationship, Severity, StateChange};

// =============================================================================
// Test Helpers
// =============================================================================

fn at(ms: i64) -> DateTime<Utc> {
    DateTime::from_timestamp_millis(ms).unwrap()
}

fn registry_with(issues: Vec<Issue>) -> Arc<InMemoryIssueRegistry> {
    let registry = Arc::new(InMemoryIssueRegistry::new());
    for issue in issues {
        registry.insert(issue);
    }
    registry
}

fn pot_issue(id: &str, first_seen: i64) -> Issue {
    Issue::new(id, "pot_mismatch", Severity::High, at(first_seen)).with_detail("tableId", "t1")
}

fn tracker(registry: Arc<InMemoryIssueRegistry>) -> FixTracker {
    FixTracker::new(KnowledgeConfig::default(), registry, EventBus::default())
}

// =============================================================================
// Fix Knowledge Base
// =============================================================================

#[test]
fn test_failed_method_never_suggested_for_same_issue() {
    let registry = registry_with(vec![pot_issue("issue1", 0), pot_issue("issue2", 0)]);
    let mut fixes = tracker(registry.clone());

    fixes.record_attempt(AttemptRequest::new("issue1", "resetPot", FixResult::Failure), at(10));
    fixes.record_attempt(AttemptRequest::new("issue2", "resetPot", FixResult::Success), at(20));

    let issue1 = registry.get_issue(&"issue1".into()).unwrap();
    let suggestions = fixes.suggested_fixes(&issue1);

    let avoided = suggestions
        .should_not_try
        .iter()
        .find(|s| s.method == "resetPot")
        .expect("resetPot should be avoided");
    assert_eq!(avoided.count, 1);
    assert!(suggestions.should_try.iter().all(|s| s.method != "resetPot"));
}

#[test]
fn test_should_try_and_should_not_try_are_disjoint() {
    let registry = registry_with(vec![
        pot_issue("a", 0),
        pot_issue("b", 0),
        pot_issue("c", 0),
    ]);
    let mut fixes = tracker(registry.clone());

    let script = [
        ("a", "resetPot", FixResult::Failure),
        ("a", "restartHand", FixResult::Failure),
        ("b", "resetPot", FixResult::Success),
        ("b", "restartHand", FixResult::Success),
        ("c", "recountChips", FixResult::Success),
        ("c", "resetPot", FixResult::Partial),
    ];
    for (n, (issue, method, result)) in script.into_iter().enumerate() {
        fixes.record_attempt(AttemptRequest::new(issue, method, result), at(n as i64));
    }

    for issue in registry.active_issues() {
        let suggestions = fixes.suggested_fixes(&issue);
        for avoid in &suggestions.should_not_try {
            assert!(
                suggestions.should_try.iter().all(|t| t.method != avoid.method),
                "{} suggested and avoided for {}",
                avoid.method,
                issue.id
            );
        }
    }
}

#[test]
fn test_incremental_stats_match_batch() {
    let registry = registry_with(vec![pot_issue("a", 0), pot_issue("b", 0)]);
    let mut fixes = tracker(registry);

    let methods = ["resetPot", "restartHand", "recountChips"];
    for n in 0..90 {
        let method = methods[n % methods.len()];
        let result = match n % 5 {
            0 | 3 => FixResult::Success,
            4 => FixResult::Partial,
            _ => FixResult::Failure,
        };
        let issue = if n % 2 == 0 { "a" } else { "b" };
        fixes.record_attempt(AttemptRequest::new(issue, method, result), at(n as i64));
    }

    assert_eq!(fixes.method_stats(), &fixes.stats_batch());
    for (method, stats) in fixes.method_stats() {
        let total = (stats.successes + stats.failures) as f64;
        assert!((stats.rate - stats.successes as f64 / total).abs() < 1e-12, "{method}");
    }
}

// =============================================================================
// Causal Analyzer
// =============================================================================

#[test]
fn test_table_change_is_indirect_cause() {
    let issue = pot_issue("issue1", 30_000);
    let registry = registry_with(vec![issue.clone()]);
    let mut analyzer = CausalAnalyzer::new(CausalConfig::default(), registry.clone(), EventBus::default());

    analyzer.record_change(StateChange::new(
        at(0),
        "game.tables.t1.pot",
        json!(100),
        json!(150),
        "bet",
    ));

    let chain = analyzer.trace_backwards(&issue);
    assert_eq!(chain.len(), 1);
    assert_eq!(chain[0].change.path, "game.tables.t1.pot");
    assert_eq!(chain[0].relationship, Relationship::Indirect);

    let analysis = analyzer.analyze_issue(&issue);
    let root = analysis.root_cause.expect("root cause");
    assert_eq!(root.change.path, "game.tables.t1.pot");

    let annotated = registry.get_issue(&"issue1".into()).unwrap();
    assert_eq!(annotated.root_cause.unwrap().path, "game.tables.t1.pot");
}

#[test]
fn test_chain_is_ordered_and_root_is_earliest() {
    let issue = Issue::new("issue1", "pot_mismatch", Severity::High, at(50_000))
        .with_detail("tableId", "t1")
        .with_detail("path", "game.tables.t1.pot");
    let registry = registry_with(vec![issue.clone()]);
    let mut analyzer = CausalAnalyzer::new(CausalConfig::default(), registry, EventBus::default());

    // Out of order on purpose
    for (ms, path) in [
        (40_000, "game.tables.t1.pot"),
        (10_000, "game.tables.t1.players"),
        (25_000, "game.tables.t1.pot"),
        (45_000, "lobby.queue"),
    ] {
        analyzer.record_change(StateChange::new(at(ms), path, json!(0), json!(1), "test"));
    }

    let analysis = analyzer.analyze_issue(&issue);
    let stamps: Vec<_> = analysis.chain.iter().map(|l| l.change.timestamp).collect();
    let mut sorted = stamps.clone();
    sorted.sort();
    assert_eq!(stamps, sorted);

    let root = analysis.root_cause.unwrap();
    assert!(root.change.timestamp <= stamps[0]);
}

// =============================================================================
// Learning / Confidence Engine
// =============================================================================

#[test]
fn test_confidence_bounds() {
    let weights = MetricWeights::default();
    assert_eq!(weights.blend(&ConfidenceMetrics::uniform(100.0)), 100.0);
    assert_eq!(weights.blend(&ConfidenceMetrics::uniform(0.0)), 0.0);
    assert_eq!(weights.blend(&ConfidenceMetrics::uniform(250.0)), 100.0);
    assert_eq!(weights.blend(&ConfidenceMetrics::uniform(-5.0)), 0.0);
}

#[test]
fn test_single_success_is_flagged_as_masking() {
    let registry = registry_with(vec![pot_issue("issue1", 0)]);
    let mut fixes = tracker(registry);
    let mut learning = LearningEngine::new(LearningConfig::default(), EventBus::default());

    let attempt = fixes.record_attempt(
        AttemptRequest::new("issue1", "resetPot", FixResult::Success).with_duration_ms(40),
        at(0),
    );
    learning.learn_from_attempt(&attempt);

    let report = learning.get_learning_confidence(&[], at(1));
    assert!(report.masking_detected());
    assert!((0.0..=100.0).contains(&report.confidence));
}

#[test]
fn test_sixty_attempts_at_seventy_five_percent_raise_no_sample_flags() {
    let registry = registry_with(vec![pot_issue("issue1", 0)]);
    let mut fixes = tracker(registry);
    let mut learning = LearningEngine::new(LearningConfig::default(), EventBus::default());

    for n in 0..60 {
        let result = if n % 4 == 0 { FixResult::Failure } else { FixResult::Success };
        let attempt = fixes.record_attempt(AttemptRequest::new("issue1", "resetPot", result), at(n));
        learning.learn_from_attempt(&attempt);
    }

    let pattern = learning.patterns().get("fixMethod:resetPot").unwrap();
    assert_eq!(pattern.frequency, 60);
    assert_eq!(pattern.successes, 45);

    let (_, flags) = learning.compute_metrics(&[]);
    assert!(flags.iter().all(|f| !matches!(
        f.kind,
        MaskingKind::LowSampleHighRate | MaskingKind::PerfectRate
    )));
}

#[test]
fn test_removed_assertions_are_high_severity_masking() {
    let old = "expect(pot).toBe(150);\nexpect(players.length).toBe(2);";
    let new = "expect(true).toBe(true);";
    let report = detect_test_masking(old, new, Some("temporarily skip flaky check"));
    assert!(report.is_masking);
    assert_eq!(report.severity, MaskingSeverity::High);
}

// =============================================================================
// Decision Policy
// =============================================================================

#[test]
fn test_cooldown_boundary() {
    let active = [pot_issue("issue1", 0)];
    let state = PolicyState {
        investigation: InvestigationStatus::Completed,
        completed_at: Some(at(100_000)),
        ..Default::default()
    };

    let within = should_start_investigation(&state, &active, at(105_000), 5_000);
    assert!(!within.should);
    assert!(within.reason.contains("cooldown"));

    let after = should_start_investigation(&state, &active, at(105_001), 5_000);
    assert!(after.should);
}

#[test]
fn test_investigation_lifecycle() {
    let registry = registry_with(vec![pot_issue("issue1", 0)]);
    let state = Arc::new(InMemoryStateStore::new());
    let fixes = tracker(registry.clone());
    let mut engine = DecisionEngine::new(
        DecisionConfig::default(),
        state.clone(),
        registry,
        EventBus::default(),
    );

    let started = engine.tick(at(0), &fixes);
    assert!(started.contains(&DecisionAction::InvestigationStarted));
    assert!(engine.tick(at(1), &fixes).iter().all(|a| *a != DecisionAction::InvestigationStarted));

    let activated = engine.tick(at(100), &fixes);
    assert!(activated.contains(&DecisionAction::InvestigationActivated));

    let completed = engine.tick(at(15_000), &fixes);
    assert!(
        completed
            .iter()
            .any(|a| matches!(a, DecisionAction::InvestigationCompleted(r) if r.duration_ms == 15_000))
    );
    assert!(completed.contains(&DecisionAction::Paused));

    let cooling = engine.tick(at(20_000), &fixes);
    assert!(!cooling.contains(&DecisionAction::InvestigationStarted));

    let restarted = engine.tick(at(20_001), &fixes);
    assert!(restarted.contains(&DecisionAction::InvestigationStarted));
    assert_eq!(engine.history().count(), 1);
}
