//! Learning engine: blended confidence, masking and auto-adjustment

use std::collections::{BTreeMap, BTreeSet, VecDeque};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::causal::CausalSummary;
use crate::error::Result;
use crate::events::{EventBus, WatchEvent};
use crate::knowledge::UNKNOWN_ISSUE_TYPE;
use crate::store::{KnowledgeStore, StoreKey, load_typed, save_typed};
use crate::types::{FixAttempt, IssueId};

use super::patterns::{DEFAULT_PATTERN_FIELD_CAP, PatternLibrary};
use super::scoring::{
    HeuristicScorer, MaskingDetector, MaskingThresholds, MetricWeights, PatternScorer,
    TrendMaskingDetector,
};
use super::types::{
    AdjustmentDirective, AdjustmentRecord, ConfidenceMetrics, ConfidenceReport,
    ConfidenceSnapshot, DataQualityStats, MaskingFlag, MaskingKind, Mistake, Prediction,
    SolutionPattern,
};

/// Configuration for the learning engine
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LearningConfig {
    pub thresholds: MaskingThresholds,
    pub weights: MetricWeights,
    /// Confidence (and per-metric score) below which adjustments fire
    pub auto_adjust_threshold: f64,
    pub history_cap: usize,
    pub pattern_field_cap: usize,
    pub adjustment_cap: usize,
    pub prediction_cap: usize,
    /// Attempts at which the volume half of data quality saturates
    pub data_volume_saturation: u32,
}

impl Default for LearningConfig {
    fn default() -> Self {
        Self {
            thresholds: MaskingThresholds::default(),
            weights: MetricWeights::default(),
            auto_adjust_threshold: 50.0,
            history_cap: 100,
            pattern_field_cap: DEFAULT_PATTERN_FIELD_CAP,
            adjustment_cap: 100,
            prediction_cap: 500,
            data_volume_saturation: 50,
        }
    }
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct PatternsDocument {
    #[serde(default)]
    library: Option<PatternLibrary>,
    #[serde(default)]
    data_quality: DataQualityStats,
}

/// Owns learned patterns and the confidence history
pub struct LearningEngine {
    config: LearningConfig,
    scorer: Box<dyn PatternScorer>,
    detector: Box<dyn MaskingDetector>,
    events: EventBus,

    patterns: PatternLibrary,
    solutions: BTreeMap<String, SolutionPattern>,
    /// Method -> issue types it has succeeded on
    cross_issue: BTreeMap<String, BTreeSet<String>>,
    predictions: VecDeque<Prediction>,
    data_quality: DataQualityStats,
    history: VecDeque<ConfidenceSnapshot>,
    adjustments: VecDeque<AdjustmentRecord>,
}

impl LearningEngine {
    pub fn new(config: LearningConfig, events: EventBus) -> Self {
        Self {
            scorer: Box::new(HeuristicScorer::new(config.thresholds.clone())),
            detector: Box::new(TrendMaskingDetector::new(config.thresholds.clone())),
            patterns: PatternLibrary::new(config.pattern_field_cap),
            config,
            events,
            solutions: BTreeMap::new(),
            cross_issue: BTreeMap::new(),
            predictions: VecDeque::new(),
            data_quality: DataQualityStats::default(),
            history: VecDeque::new(),
            adjustments: VecDeque::new(),
        }
    }

    #[must_use]
    pub fn with_scorer(mut self, scorer: Box<dyn PatternScorer>) -> Self {
        self.scorer = scorer;
        self
    }

    #[must_use]
    pub fn with_detector(mut self, detector: Box<dyn MaskingDetector>) -> Self {
        self.detector = detector;
        self
    }

    /// Fold one recorded attempt into patterns, solutions, cross-issue
    /// knowledge, pending predictions and data-quality counters.
    pub fn learn_from_attempt(&mut self, attempt: &FixAttempt) {
        let success = attempt.is_success();
        let keys = self.patterns.learn_from_attempt(attempt);

        self.solutions
            .entry(solution_key(&attempt.issue_type, &attempt.fix_method))
            .or_insert_with(|| SolutionPattern {
                issue_type: attempt.issue_type.clone(),
                method: attempt.fix_method.clone(),
                ..Default::default()
            })
            .record(success);

        if success {
            self.cross_issue
                .entry(attempt.fix_method.clone())
                .or_default()
                .insert(attempt.issue_type.clone());
        }

        if let Some(prediction) = self
            .predictions
            .iter_mut()
            .rev()
            .find(|p| p.issue_id == attempt.issue_id && p.succeeded.is_none())
            && prediction.method == attempt.fix_method
        {
            prediction.succeeded = Some(success);
        }

        self.data_quality.attempts += 1;
        if attempt.issue_type != UNKNOWN_ISSUE_TYPE
            && !attempt.state_snapshot.is_null()
            && attempt.duration_ms.is_some()
        {
            self.data_quality.complete += 1;
        }

        debug!(
            issue_id = %attempt.issue_id,
            method = %attempt.fix_method,
            patterns = keys.len(),
            "Learned from attempt"
        );
    }

    /// Remember the method suggested first for an issue. A newer prediction
    /// for the same unresolved issue replaces the older one.
    pub fn record_prediction(&mut self, issue_id: &IssueId, method: &str, now: DateTime<Utc>) {
        if let Some(pending) = self
            .predictions
            .iter_mut()
            .find(|p| &p.issue_id == issue_id && p.succeeded.is_none())
        {
            pending.method = method.to_string();
            pending.predicted_at = now;
            return;
        }
        self.predictions.push_back(Prediction {
            issue_id: issue_id.clone(),
            method: method.to_string(),
            predicted_at: now,
            succeeded: None,
        });
        truncate_front(&mut self.predictions, self.config.prediction_cap);
    }

    /// Compute all six metrics from current knowledge
    pub fn compute_metrics(&self, causal: &[CausalSummary]) -> (ConfidenceMetrics, Vec<MaskingFlag>) {
        let mut flags = Vec::new();

        let pattern_recognition = mean(self.patterns.iter().map(|(key, pattern)| {
            let scored = self.scorer.score_pattern(key, pattern);
            flags.extend(scored.flag);
            scored.quality
        })) * 100.0;

        let causal_analysis = mean(causal.iter().map(|s| {
            let found = if s.root_cause_found { 1.0 } else { 0.0 };
            let strong = if s.has_strong_link { 1.0 } else { 0.0 };
            0.4 * found + 0.3 * (s.chain_length as f64 / 5.0).min(1.0) + 0.3 * strong
        })) * 100.0;

        let solution_optimization = mean(self.solutions.iter().map(|(key, solution)| {
            let scored = self.scorer.score_solution(key, solution);
            flags.extend(scored.flag);
            scored.quality
        })) * 100.0;

        let cross_issue_learning = share(
            self.cross_issue.values().filter(|types| types.len() >= 2).count(),
            self.cross_issue.len(),
        ) * 100.0;

        let resolved: Vec<bool> = self.predictions.iter().filter_map(|p| p.succeeded).collect();
        let prediction_accuracy =
            share(resolved.iter().filter(|s| **s).count(), resolved.len()) * 100.0;

        let data_quality = if self.data_quality.attempts == 0 {
            0.0
        } else {
            let completeness = share(
                self.data_quality.complete as usize,
                self.data_quality.attempts as usize,
            );
            let saturation = f64::from(self.config.data_volume_saturation.max(1));
            let volume = (f64::from(self.data_quality.attempts) / saturation).min(1.0);
            (0.5 * completeness + 0.5 * volume) * 100.0
        };

        let metrics = ConfidenceMetrics {
            pattern_recognition,
            causal_analysis,
            solution_optimization,
            cross_issue_learning,
            prediction_accuracy,
            data_quality,
        }
        .clamped();

        (metrics, flags)
    }

    /// Score, detect masking, append a snapshot and, when confidence is low,
    /// emit and keep auto-adjustment directives.
    pub fn get_learning_confidence(
        &mut self,
        causal: &[CausalSummary],
        now: DateTime<Utc>,
    ) -> ConfidenceReport {
        let (metrics, mut flags) = self.compute_metrics(causal);
        let confidence = self.config.weights.blend(&metrics);

        let history: Vec<ConfidenceSnapshot> = self.history.iter().cloned().collect();
        flags.extend(
            self.detector
                .detect_masking(&history, confidence, &metrics, self.solutions.len()),
        );

        let timestamp = self.monotonic(now);
        self.push_snapshot(ConfidenceSnapshot {
            timestamp,
            confidence,
            metrics,
            masking_detected: !flags.is_empty(),
        });

        if !flags.is_empty() {
            for flag in &flags {
                warn!(kind = ?flag.kind, subject = %flag.subject, "{}", flag.message);
            }
            self.events.emit(WatchEvent::MaskingDetected {
                flags: flags.clone(),
            });
        }

        let adjustments = if confidence < self.config.auto_adjust_threshold {
            self.auto_adjust(confidence, &metrics, timestamp)
        } else {
            Vec::new()
        };

        info!(confidence, masking = flags.len(), "Learning confidence computed");

        ConfidenceReport {
            timestamp,
            confidence,
            metrics,
            masking_flags: flags,
            adjustments,
            trend: self.trend(),
        }
    }

    /// Penalize the latest snapshot for a reported mistake and flag masking.
    /// Returns the penalized confidence.
    pub fn learn_from_mistake(&mut self, mistake: Mistake, now: DateTime<Utc>) -> f64 {
        let penalty = self.config.thresholds.penalty_for(&mistake.kind);

        if self.history.is_empty() {
            let timestamp = self.monotonic(now);
            self.push_snapshot(ConfidenceSnapshot {
                timestamp,
                confidence: 0.0,
                metrics: ConfidenceMetrics::default(),
                masking_detected: false,
            });
        }

        let mut confidence = 0.0;
        if let Some(latest) = self.history.back_mut() {
            latest.confidence = (latest.confidence - penalty).max(0.0);
            latest.masking_detected = true;
            confidence = latest.confidence;
        }

        let flag = MaskingFlag::new(
            MaskingKind::Mistake,
            mistake.kind.as_str(),
            if mistake.details.is_empty() {
                format!("agent mistake: {}", mistake.kind.as_str())
            } else {
                format!("agent mistake: {}: {}", mistake.kind.as_str(), mistake.details)
            },
        );
        warn!(kind = %mistake.kind.as_str(), penalty, confidence, "{}", flag.message);

        self.events.emit(WatchEvent::MaskingDetected { flags: vec![flag] });
        self.events.emit(WatchEvent::MistakeLearned {
            mistake,
            penalty,
            confidence,
        });
        confidence
    }

    /// Latest confidence minus the oldest retained one
    pub fn trend(&self) -> Option<f64> {
        if self.history.len() < 2 {
            return None;
        }
        let oldest = self.history.front()?.confidence;
        let latest = self.history.back()?.confidence;
        Some(latest - oldest)
    }

    pub fn history(&self) -> impl Iterator<Item = &ConfidenceSnapshot> {
        self.history.iter()
    }

    pub fn latest(&self) -> Option<&ConfidenceSnapshot> {
        self.history.back()
    }

    pub fn patterns(&self) -> &PatternLibrary {
        &self.patterns
    }

    pub fn solutions(&self) -> &BTreeMap<String, SolutionPattern> {
        &self.solutions
    }

    pub fn adjustments(&self) -> impl Iterator<Item = &AdjustmentRecord> {
        self.adjustments.iter()
    }

    pub fn predictions(&self) -> impl Iterator<Item = &Prediction> {
        self.predictions.iter()
    }

    pub fn config(&self) -> &LearningConfig {
        &self.config
    }

    pub async fn load(&mut self, store: &dyn KnowledgeStore) -> Result<()> {
        if let Some(doc) = load_typed::<PatternsDocument>(store, StoreKey::LearningPatterns).await? {
            if let Some(mut library) = doc.library {
                library.set_field_cap(self.config.pattern_field_cap);
                self.patterns = library;
            }
            self.data_quality = doc.data_quality;
        }
        if let Some(solutions) = load_typed(store, StoreKey::LearningSolutionOptimization).await? {
            self.solutions = solutions;
        }
        if let Some(cross) = load_typed(store, StoreKey::LearningCrossIssue).await? {
            self.cross_issue = cross;
        }
        if let Some(adjustments) = load_typed(store, StoreKey::LearningAutoAdjustments).await? {
            self.adjustments = adjustments;
        }
        if let Some(history) = load_typed(store, StoreKey::LearningConfidenceHistory).await? {
            self.history = history;
        }
        if let Some(predictions) = load_typed(store, StoreKey::LearningPredictions).await? {
            self.predictions = predictions;
        }
        self.trim();

        debug!(
            patterns = self.patterns.len(),
            solutions = self.solutions.len(),
            snapshots = self.history.len(),
            "Loaded learning state"
        );
        Ok(())
    }

    pub async fn save(&self, store: &dyn KnowledgeStore) -> Result<()> {
        let doc = PatternsDocument {
            library: Some(self.patterns.clone()),
            data_quality: self.data_quality,
        };
        save_typed(store, StoreKey::LearningPatterns, &doc).await?;
        save_typed(store, StoreKey::LearningSolutionOptimization, &self.solutions).await?;
        save_typed(store, StoreKey::LearningCrossIssue, &self.cross_issue).await?;
        save_typed(store, StoreKey::LearningAutoAdjustments, &self.adjustments).await?;
        save_typed(store, StoreKey::LearningConfidenceHistory, &self.history).await?;
        save_typed(store, StoreKey::LearningPredictions, &self.predictions).await?;
        Ok(())
    }

    fn auto_adjust(
        &mut self,
        confidence: f64,
        metrics: &ConfidenceMetrics,
        now: DateTime<Utc>,
    ) -> Vec<AdjustmentDirective> {
        let directives: Vec<AdjustmentDirective> = metrics
            .named()
            .into_iter()
            .filter(|(_, score)| *score < self.config.auto_adjust_threshold)
            .map(|(metric, score)| AdjustmentDirective {
                metric: metric.to_string(),
                score,
                action: adjustment_action(metric).to_string(),
            })
            .collect();

        warn!(
            confidence,
            directives = directives.len(),
            "Confidence below threshold, auto-adjusting"
        );

        self.adjustments.push_back(AdjustmentRecord {
            timestamp: now,
            confidence,
            directives: directives.clone(),
        });
        truncate_front(&mut self.adjustments, self.config.adjustment_cap);

        self.events.emit(WatchEvent::AutoAdjustment {
            confidence,
            directives: directives.clone(),
        });
        directives
    }

    fn push_snapshot(&mut self, snapshot: ConfidenceSnapshot) {
        self.history.push_back(snapshot);
        self.trim();
    }

    /// Drop the oldest entries past each configured cap
    fn trim(&mut self) {
        truncate_front(&mut self.history, self.config.history_cap.max(1));
        truncate_front(&mut self.predictions, self.config.prediction_cap);
        truncate_front(&mut self.adjustments, self.config.adjustment_cap);
    }

    /// Never step back behind the newest snapshot
    fn monotonic(&self, now: DateTime<Utc>) -> DateTime<Utc> {
        match self.history.back() {
            Some(last) if last.timestamp > now => last.timestamp,
            _ => now,
        }
    }
}

fn truncate_front<T>(queue: &mut VecDeque<T>, cap: usize) {
    if queue.len() > cap {
        queue.drain(..queue.len() - cap);
    }
}

fn solution_key(issue_type: &str, method: &str) -> String {
    format!("{issue_type}:{method}")
}

fn adjustment_action(metric: &str) -> &'static str {
    match metric {
        "patternRecognition" => "collect more attempts per pattern before trusting success rates",
        "causalAnalysis" => "record more state changes and declare component dependencies",
        "solutionOptimization" => "try alternative methods for issue types with unproven fixes",
        "crossIssueLearning" => "apply proven methods to related issue types",
        "predictionAccuracy" => "prefer top-ranked suggestions and record their outcomes",
        "dataQuality" => "report state snapshots and durations with every attempt",
        _ => "review recent fix attempts",
    }
}

/// Mean of an iterator, 0 when empty
fn mean(values: impl Iterator<Item = f64>) -> f64 {
    let (sum, count) = values.fold((0.0, 0usize), |(s, n), v| (s + v, n + 1));
    if count == 0 { 0.0 } else { sum / count as f64 }
}

fn share(part: usize, whole: usize) -> f64 {
    if whole == 0 {
        0.0
    } else {
        part as f64 / whole as f64
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::learning::MistakeKind;
    use crate::store::MemoryStore;
    use crate::types::FixResult;
    use serde_json::{Value, json};
    use uuid::Uuid;

    fn at(ms: i64) -> DateTime<Utc> {
        DateTime::from_timestamp_millis(ms).unwrap()
    }

    fn attempt(issue: &str, issue_type: &str, method: &str, result: FixResult) -> FixAttempt {
        FixAttempt {
            id: Uuid::now_v7(),
            issue_id: issue.into(),
            issue_type: issue_type.into(),
            fix_method: method.into(),
            fix_details: Value::Null,
            result,
            timestamp: at(0),
            state_snapshot: json!({"game.phase": "river"}),
            duration_ms: Some(12),
        }
    }

    fn setup() -> LearningEngine {
        LearningEngine::new(LearningConfig::default(), EventBus::default())
    }

    #[test]
    fn test_empty_engine_scores_zero() {
        let mut engine = setup();
        let report = engine.get_learning_confidence(&[], at(0));
        assert_eq!(report.confidence, 0.0);
        assert_eq!(report.metrics, ConfidenceMetrics::default());
        assert_eq!(report.adjustments.len(), 6);
        assert_eq!(engine.history().count(), 1);
    }

    #[test]
    fn test_single_success_flags_masking() {
        let mut engine = setup();
        engine.learn_from_attempt(&attempt("i1", "pot_mismatch", "resetPot", FixResult::Success));
        let report = engine.get_learning_confidence(&[], at(0));
        assert!(report.masking_detected());
        assert!(
            report
                .masking_flags
                .iter()
                .any(|f| f.subject == "fixMethod:resetPot")
        );
        assert!(engine.latest().unwrap().masking_detected);
    }

    #[test]
    fn test_sixty_attempts_seventy_five_percent_no_sample_flags() {
        let mut engine = setup();
        for n in 0..60 {
            // Interleave so the recent tail matches the lifetime rate
            let result = if n % 4 == 3 { FixResult::Failure } else { FixResult::Success };
            engine.learn_from_attempt(&attempt("i1", "pot_mismatch", "resetPot", result));
        }
        let (_, flags) = engine.compute_metrics(&[]);
        assert!(flags.iter().all(|f| {
            !matches!(f.kind, MaskingKind::LowSampleHighRate | MaskingKind::PerfectRate)
        }));
    }

    #[test]
    fn test_cross_issue_and_predictions() {
        let mut engine = setup();
        engine.record_prediction(&"i1".into(), "resetPot", at(0));
        engine.learn_from_attempt(&attempt("i1", "pot_mismatch", "resetPot", FixResult::Success));
        engine.learn_from_attempt(&attempt("i2", "stuck_turn", "resetPot", FixResult::Success));
        engine.learn_from_attempt(&attempt("i3", "stuck_turn", "restartHand", FixResult::Success));

        let (metrics, _) = engine.compute_metrics(&[]);
        assert_eq!(metrics.cross_issue_learning, 50.0);
        assert_eq!(metrics.prediction_accuracy, 100.0);
    }

    #[test]
    fn test_prediction_ignores_other_methods() {
        let mut engine = setup();
        engine.record_prediction(&"i1".into(), "resetPot", at(0));
        engine.learn_from_attempt(&attempt("i1", "pot_mismatch", "restartHand", FixResult::Failure));
        assert!(engine.predictions().all(|p| p.succeeded.is_none()));
    }

    #[test]
    fn test_causal_metric() {
        let engine = setup();
        let summaries = [
            CausalSummary {
                chain_length: 5,
                root_cause_found: true,
                has_strong_link: true,
            },
            CausalSummary {
                chain_length: 0,
                root_cause_found: false,
                has_strong_link: false,
            },
        ];
        let (metrics, _) = engine.compute_metrics(&summaries);
        assert!((metrics.causal_analysis - 50.0).abs() < 1e-9);
    }

    #[test]
    fn test_data_quality() {
        let mut engine = setup();
        let mut incomplete = attempt("i1", "pot_mismatch", "resetPot", FixResult::Failure);
        incomplete.duration_ms = None;
        engine.learn_from_attempt(&incomplete);
        engine.learn_from_attempt(&attempt("i1", "pot_mismatch", "resetPot", FixResult::Failure));

        let (metrics, _) = engine.compute_metrics(&[]);
        // 0.5·(1/2) + 0.5·(2/50)
        assert!((metrics.data_quality - 27.0).abs() < 1e-9);
    }

    #[tokio::test]
    async fn test_low_confidence_emits_adjustment() {
        let bus = EventBus::default();
        let mut rx = bus.subscribe();
        let mut engine = LearningEngine::new(LearningConfig::default(), bus);

        let report = engine.get_learning_confidence(&[], at(0));
        assert!(report.confidence < 50.0);
        assert_eq!(engine.adjustments().count(), 1);
        assert_eq!(rx.recv().await.unwrap().name(), "autoAdjustment");
    }

    #[test]
    fn test_mistake_penalty_floors_at_zero() {
        let mut engine = setup();
        let confidence = engine.learn_from_mistake(
            Mistake {
                kind: MistakeKind::GaveUp,
                details: "stopped after first failure".into(),
            },
            at(0),
        );
        assert_eq!(confidence, 0.0);
        let latest = engine.latest().unwrap();
        assert!(latest.masking_detected);
        assert_eq!(engine.history().count(), 1);
    }

    #[test]
    fn test_mistake_penalizes_latest_snapshot() {
        let mut engine = setup();
        engine.push_snapshot(ConfidenceSnapshot {
            timestamp: at(0),
            confidence: 70.0,
            metrics: ConfidenceMetrics::uniform(70.0),
            masking_detected: false,
        });
        let confidence = engine.learn_from_mistake(
            Mistake {
                kind: MistakeKind::MaskedProblem,
                details: String::new(),
            },
            at(1),
        );
        assert_eq!(confidence, 55.0);
    }

    #[test]
    fn test_history_capped_and_monotonic() {
        let config = LearningConfig {
            history_cap: 3,
            ..Default::default()
        };
        let mut engine = LearningEngine::new(config, EventBus::default());
        for ms in [10, 20, 5, 30] {
            engine.get_learning_confidence(&[], at(ms));
        }
        let stamps: Vec<_> = engine.history().map(|s| s.timestamp).collect();
        assert_eq!(stamps, vec![at(20), at(20), at(30)]);
    }

    #[test]
    fn test_trend() {
        let mut engine = setup();
        assert!(engine.trend().is_none());
        for (ms, confidence) in [(0, 40.0), (1, 55.0)] {
            engine.push_snapshot(ConfidenceSnapshot {
                timestamp: at(ms),
                confidence,
                metrics: ConfidenceMetrics::default(),
                masking_detected: false,
            });
        }
        assert_eq!(engine.trend(), Some(15.0));
    }

    #[tokio::test]
    async fn test_save_load_roundtrip() {
        let store = MemoryStore::new();
        let mut engine = setup();
        engine.learn_from_attempt(&attempt("i1", "pot_mismatch", "resetPot", FixResult::Success));
        engine.get_learning_confidence(&[], at(0));
        engine.save(&store).await.unwrap();

        let mut restored = setup();
        restored.load(&store).await.unwrap();
        assert_eq!(restored.patterns().len(), engine.patterns().len());
        assert_eq!(restored.history().count(), 1);
        assert_eq!(restored.adjustments().count(), 1);
        assert_eq!(
            restored.compute_metrics(&[]).0,
            engine.compute_metrics(&[]).0
        );
    }

    #[tokio::test]
    async fn test_load_applies_smaller_caps() {
        let store = MemoryStore::new();
        let mut engine = setup();
        for n in 0..5 {
            engine.record_prediction(&IssueId::from(format!("i{n}")), "resetPot", at(n));
            engine.get_learning_confidence(&[], at(n));
        }
        engine.save(&store).await.unwrap();

        let config = LearningConfig {
            history_cap: 2,
            prediction_cap: 2,
            adjustment_cap: 2,
            ..Default::default()
        };
        let mut restored = LearningEngine::new(config, EventBus::default());
        restored.load(&store).await.unwrap();

        let stamps: Vec<_> = restored.history().map(|s| s.timestamp).collect();
        assert_eq!(stamps, vec![at(3), at(4)]);
        assert_eq!(restored.predictions().count(), 2);
        assert_eq!(restored.adjustments().count(), 2);
    }
}
