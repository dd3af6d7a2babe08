//! Types for the learning and confidence engine

use std::collections::VecDeque;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::types::IssueId;

/// Where a pattern was observed
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PatternContext {
    pub issue_id: IssueId,
    pub issue_type: String,
    pub timestamp: DateTime<Utc>,
}

/// One fix outcome attached to a pattern
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SolutionOutcome {
    pub method: String,
    pub success: bool,
    pub timestamp: DateTime<Utc>,
}

/// Statistics for one `category:value` pattern key
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Pattern {
    pub frequency: u32,
    pub successes: u32,
    pub failures: u32,
    pub success_rate: f64,
    /// Most recent contexts, oldest first
    #[serde(default)]
    pub contexts: VecDeque<PatternContext>,
    /// Most recent outcomes, oldest first
    #[serde(default)]
    pub solutions: VecDeque<SolutionOutcome>,
}

impl Pattern {
    /// Success rate over the last `window` solutions, `None` if there are none
    pub fn recent_success_rate(&self, window: usize) -> Option<f64> {
        let recent: Vec<_> = self.solutions.iter().rev().take(window).collect();
        if recent.is_empty() {
            return None;
        }
        let wins = recent.iter().filter(|s| s.success).count();
        Some(wins as f64 / recent.len() as f64)
    }
}

/// Outcomes of one method applied to one issue type
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SolutionPattern {
    pub issue_type: String,
    pub method: String,
    pub attempts: u32,
    pub successes: u32,
    pub success_rate: f64,
}

impl SolutionPattern {
    pub fn record(&mut self, success: bool) {
        self.attempts += 1;
        if success {
            self.successes += 1;
        }
        self.success_rate = f64::from(self.successes) / f64::from(self.attempts);
    }
}

/// "The top suggestion for this issue was X"; resolved when X is attempted
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Prediction {
    pub issue_id: IssueId,
    pub method: String,
    pub predicted_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub succeeded: Option<bool>,
}

/// How many attempts arrived with complete data
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct DataQualityStats {
    pub attempts: u32,
    /// Known issue type, non-null snapshot and a duration
    pub complete: u32,
}

/// The six sub-scores, each in `[0, 100]`
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct ConfidenceMetrics {
    pub pattern_recognition: f64,
    pub causal_analysis: f64,
    pub solution_optimization: f64,
    pub cross_issue_learning: f64,
    pub prediction_accuracy: f64,
    pub data_quality: f64,
}

impl ConfidenceMetrics {
    /// Same value for every metric
    pub fn uniform(value: f64) -> Self {
        Self {
            pattern_recognition: value,
            causal_analysis: value,
            solution_optimization: value,
            cross_issue_learning: value,
            prediction_accuracy: value,
            data_quality: value,
        }
    }

    /// `(name, value)` pairs in display order
    pub fn named(&self) -> [(&'static str, f64); 6] {
        [
            ("patternRecognition", self.pattern_recognition),
            ("causalAnalysis", self.causal_analysis),
            ("solutionOptimization", self.solution_optimization),
            ("crossIssueLearning", self.cross_issue_learning),
            ("predictionAccuracy", self.prediction_accuracy),
            ("dataQuality", self.data_quality),
        ]
    }

    #[must_use]
    pub fn clamped(self) -> Self {
        let c = |v: f64| if v.is_nan() { 0.0 } else { v.clamp(0.0, 100.0) };
        Self {
            pattern_recognition: c(self.pattern_recognition),
            causal_analysis: c(self.causal_analysis),
            solution_optimization: c(self.solution_optimization),
            cross_issue_learning: c(self.cross_issue_learning),
            prediction_accuracy: c(self.prediction_accuracy),
            data_quality: c(self.data_quality),
        }
    }
}

/// One point in the confidence history. Never mutated except by a mistake
/// penalty on the latest snapshot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConfidenceSnapshot {
    pub timestamp: DateTime<Utc>,
    pub confidence: f64,
    pub metrics: ConfidenceMetrics,
    pub masking_detected: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MaskingKind {
    /// High success rate with low sample size
    LowSampleHighRate,
    /// Perfect success rate with insufficient samples
    PerfectRate,
    /// Recent outcomes diverge sharply from the lifetime rate
    SuddenChange,
    /// Solution reports perfect or near-perfect success on few attempts
    SolutionOverclaim,
    /// Rolling confidence jumped
    ConfidenceJump,
    /// Solution optimization near the ceiling with too few solutions
    SuspiciousOptimization,
    /// Reported mistake by the fixing agent
    Mistake,
}

impl MaskingKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::LowSampleHighRate => "low_sample_high_rate",
            Self::PerfectRate => "perfect_rate",
            Self::SuddenChange => "sudden_change",
            Self::SolutionOverclaim => "solution_overclaim",
            Self::ConfidenceJump => "confidence_jump",
            Self::SuspiciousOptimization => "suspicious_optimization",
            Self::Mistake => "mistake",
        }
    }
}

/// A self-reporting anomaly. Surfaced as data, never as an error.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MaskingFlag {
    pub kind: MaskingKind,
    /// Pattern key, solution key or metric the flag is about
    pub subject: String,
    pub message: String,
}

impl MaskingFlag {
    pub fn new(kind: MaskingKind, subject: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            kind,
            subject: subject.into(),
            message: message.into(),
        }
    }
}

/// Remediation signal for one under-performing metric
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AdjustmentDirective {
    pub metric: String,
    pub score: f64,
    pub action: String,
}

/// A batch of directives as persisted under `learning.autoAdjustments`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AdjustmentRecord {
    pub timestamp: DateTime<Utc>,
    pub confidence: f64,
    pub directives: Vec<AdjustmentDirective>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MistakeKind {
    GaveUp,
    MaskedProblem,
    SuperficialFix,
    Other(String),
}

impl MistakeKind {
    pub fn as_str(&self) -> &str {
        match self {
            Self::GaveUp => "gave_up",
            Self::MaskedProblem => "masked_problem",
            Self::SuperficialFix => "superficial_fix",
            Self::Other(kind) => kind,
        }
    }
}

impl std::str::FromStr for MistakeKind {
    type Err = std::convert::Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s.to_ascii_lowercase().replace('-', "_").as_str() {
            "gave_up" | "giving_up" => Self::GaveUp,
            "masked_problem" | "masking" => Self::MaskedProblem,
            "superficial_fix" => Self::SuperficialFix,
            _ => Self::Other(s.to_string()),
        })
    }
}

/// A mistake the fixing agent made, reported from outside
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Mistake {
    pub kind: MistakeKind,
    #[serde(default)]
    pub details: String,
}

/// Result of one confidence computation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConfidenceReport {
    pub timestamp: DateTime<Utc>,
    pub confidence: f64,
    pub metrics: ConfidenceMetrics,
    pub masking_flags: Vec<MaskingFlag>,
    pub adjustments: Vec<AdjustmentDirective>,
    /// Change since the oldest snapshot in history
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub trend: Option<f64>,
}

impl ConfidenceReport {
    pub fn masking_detected(&self) -> bool {
        !self.masking_flags.is_empty()
    }
}
