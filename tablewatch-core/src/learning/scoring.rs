//! Pluggable pattern scoring and masking detection
//!
//! The heuristics here are deliberately hard to game: small samples with
//! high success rates score low and raise a [`MaskingFlag`] instead of
//! inflating confidence. Every threshold lives in [`MaskingThresholds`].

use serde::{Deserialize, Serialize};

use super::types::{
    ConfidenceMetrics, ConfidenceSnapshot, MaskingFlag, MaskingKind, MistakeKind, Pattern,
    SolutionPattern,
};

/// Every tuning constant of the masking heuristics
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MaskingThresholds {
    pub low_sample_frequency: u32,
    pub low_sample_rate: f64,
    pub low_sample_score: f64,

    pub perfect_rate_min_samples: u32,
    pub perfect_rate_score: f64,

    pub sudden_change_window: usize,
    pub sudden_change_delta: f64,
    pub sudden_change_score: f64,

    /// Frequency at which the frequency term saturates
    pub frequency_saturation: u32,
    /// Zero-variance streaks shorter than this get `zero_variance_quality`
    pub zero_variance_min_samples: u32,
    pub zero_variance_quality: f64,

    pub solution_perfect_min_attempts: u32,
    pub solution_perfect_score: f64,
    pub solution_high_rate: f64,
    pub solution_high_rate_min_attempts: u32,
    pub solution_high_rate_score: f64,
    pub solution_min_attempts: u32,
    pub solution_low_attempts_cap: f64,

    pub confidence_jump_points: f64,
    pub rolling_window: usize,
    /// Snapshots back from the newest that the rolling average is compared to
    pub jump_lookback: usize,

    pub suspicious_optimization_score: f64,
    pub min_solution_patterns: usize,

    pub gave_up_penalty: f64,
    pub masked_problem_penalty: f64,
    pub superficial_fix_penalty: f64,
    pub default_mistake_penalty: f64,
}

impl Default for MaskingThresholds {
    fn default() -> Self {
        Self {
            low_sample_frequency: 10,
            low_sample_rate: 0.8,
            low_sample_score: 0.3,

            perfect_rate_min_samples: 50,
            perfect_rate_score: 0.2,

            sudden_change_window: 5,
            sudden_change_delta: 0.5,
            sudden_change_score: 0.4,

            frequency_saturation: 50,
            zero_variance_min_samples: 20,
            zero_variance_quality: 0.6,

            solution_perfect_min_attempts: 20,
            solution_perfect_score: 0.2,
            solution_high_rate: 0.95,
            solution_high_rate_min_attempts: 50,
            solution_high_rate_score: 0.3,
            solution_min_attempts: 10,
            solution_low_attempts_cap: 0.5,

            confidence_jump_points: 30.0,
            rolling_window: 3,
            jump_lookback: 4,

            suspicious_optimization_score: 95.0,
            min_solution_patterns: 5,

            gave_up_penalty: 20.0,
            masked_problem_penalty: 15.0,
            superficial_fix_penalty: 10.0,
            default_mistake_penalty: 5.0,
        }
    }
}

impl MaskingThresholds {
    pub fn penalty_for(&self, kind: &MistakeKind) -> f64 {
        match kind {
            MistakeKind::GaveUp => self.gave_up_penalty,
            MistakeKind::MaskedProblem => self.masked_problem_penalty,
            MistakeKind::SuperficialFix => self.superficial_fix_penalty,
            MistakeKind::Other(_) => self.default_mistake_penalty,
        }
    }
}

/// Weights of the six sub-metrics in the blended confidence
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MetricWeights {
    pub pattern_recognition: f64,
    pub causal_analysis: f64,
    pub solution_optimization: f64,
    pub cross_issue_learning: f64,
    pub prediction_accuracy: f64,
    pub data_quality: f64,
}

impl Default for MetricWeights {
    fn default() -> Self {
        Self {
            pattern_recognition: 0.20,
            causal_analysis: 0.20,
            solution_optimization: 0.25,
            cross_issue_learning: 0.15,
            prediction_accuracy: 0.10,
            data_quality: 0.10,
        }
    }
}

impl MetricWeights {
    /// Weighted sum of clamped metrics, itself clamped to `[0, 100]`
    pub fn blend(&self, metrics: &ConfidenceMetrics) -> f64 {
        let m = metrics.clamped();
        let sum = m.pattern_recognition * self.pattern_recognition
            + m.causal_analysis * self.causal_analysis
            + m.solution_optimization * self.solution_optimization
            + m.cross_issue_learning * self.cross_issue_learning
            + m.prediction_accuracy * self.prediction_accuracy
            + m.data_quality * self.data_quality;
        // Absorb float noise so 100 × weights summing to 1 yields exactly 100
        ((sum * 1e6).round() / 1e6).clamp(0.0, 100.0)
    }
}

/// Quality in `[0, 1]` plus the flag that forced it, if any
#[derive(Debug, Clone, PartialEq)]
pub struct Scored {
    pub quality: f64,
    pub flag: Option<MaskingFlag>,
}

impl Scored {
    fn clean(quality: f64) -> Self {
        Self {
            quality: quality.clamp(0.0, 1.0),
            flag: None,
        }
    }

    fn flagged(quality: f64, flag: MaskingFlag) -> Self {
        Self {
            quality,
            flag: Some(flag),
        }
    }
}

/// Scores individual patterns and solutions
pub trait PatternScorer: Send + Sync {
    fn score_pattern(&self, key: &str, pattern: &Pattern) -> Scored;

    fn score_solution(&self, key: &str, solution: &SolutionPattern) -> Scored;
}

/// Looks for inflation across the confidence history
pub trait MaskingDetector: Send + Sync {
    fn detect_masking(
        &self,
        history: &[ConfidenceSnapshot],
        current: f64,
        metrics: &ConfidenceMetrics,
        solution_pattern_count: usize,
    ) -> Vec<MaskingFlag>;
}

/// Fixed heuristics for pattern and solution quality
#[derive(Debug, Clone, Default)]
pub struct HeuristicScorer {
    thresholds: MaskingThresholds,
}

impl HeuristicScorer {
    pub fn new(thresholds: MaskingThresholds) -> Self {
        Self { thresholds }
    }

    /// Rewards consistent outcomes but penalizes short zero-variance streaks
    fn variance_quality(&self, frequency: u32, rate: f64) -> f64 {
        let variance = rate * (1.0 - rate);
        if variance == 0.0 && frequency < self.thresholds.zero_variance_min_samples {
            return self.thresholds.zero_variance_quality;
        }
        1.0 - variance / 0.25
    }
}

impl PatternScorer for HeuristicScorer {
    fn score_pattern(&self, key: &str, pattern: &Pattern) -> Scored {
        let t = &self.thresholds;
        let freq = pattern.frequency;
        let rate = pattern.success_rate;

        if freq == 0 {
            return Scored::clean(0.0);
        }

        if freq < t.low_sample_frequency && rate > t.low_sample_rate {
            return Scored::flagged(
                t.low_sample_score,
                MaskingFlag::new(
                    MaskingKind::LowSampleHighRate,
                    key,
                    format!(
                        "high success rate with low sample size ({:.0}% over {freq})",
                        rate * 100.0
                    ),
                ),
            );
        }

        if rate >= 1.0 && freq < t.perfect_rate_min_samples {
            return Scored::flagged(
                t.perfect_rate_score,
                MaskingFlag::new(
                    MaskingKind::PerfectRate,
                    key,
                    format!("perfect success rate with insufficient samples ({freq})"),
                ),
            );
        }

        if let Some(recent) = pattern.recent_success_rate(t.sudden_change_window)
            && (recent - rate).abs() > t.sudden_change_delta
        {
            return Scored::flagged(
                t.sudden_change_score,
                MaskingFlag::new(
                    MaskingKind::SuddenChange,
                    key,
                    format!(
                        "sudden success rate change ({:.0}% recent vs {:.0}% lifetime)",
                        recent * 100.0,
                        rate * 100.0
                    ),
                ),
            );
        }

        let saturation = f64::from(t.frequency_saturation.max(1));
        let frequency_term = (f64::from(freq) / saturation).min(1.0);
        Scored::clean(
            0.3 * frequency_term + 0.4 * rate + 0.3 * self.variance_quality(freq, rate),
        )
    }

    fn score_solution(&self, key: &str, solution: &SolutionPattern) -> Scored {
        let t = &self.thresholds;
        let attempts = solution.attempts;
        let rate = solution.success_rate;

        if attempts == 0 {
            return Scored::clean(0.0);
        }

        if rate >= 1.0 && attempts < t.solution_perfect_min_attempts {
            return Scored::flagged(
                t.solution_perfect_score,
                MaskingFlag::new(
                    MaskingKind::SolutionOverclaim,
                    key,
                    format!("100% success over only {attempts} attempts"),
                ),
            );
        }

        if rate > t.solution_high_rate && attempts < t.solution_high_rate_min_attempts {
            return Scored::flagged(
                t.solution_high_rate_score,
                MaskingFlag::new(
                    MaskingKind::SolutionOverclaim,
                    key,
                    format!(
                        "{:.0}% success over only {attempts} attempts",
                        rate * 100.0
                    ),
                ),
            );
        }

        let saturation = f64::from(t.frequency_saturation.max(1));
        let quality = 0.7 * rate + 0.3 * (f64::from(attempts) / saturation).min(1.0);
        if attempts < t.solution_min_attempts {
            return Scored::clean(quality.min(t.solution_low_attempts_cap));
        }
        Scored::clean(quality)
    }
}

/// Flags confidence jumps and ceiling-level optimization on thin data
#[derive(Debug, Clone, Default)]
pub struct TrendMaskingDetector {
    thresholds: MaskingThresholds,
}

impl TrendMaskingDetector {
    pub fn new(thresholds: MaskingThresholds) -> Self {
        Self { thresholds }
    }
}

impl MaskingDetector for TrendMaskingDetector {
    fn detect_masking(
        &self,
        history: &[ConfidenceSnapshot],
        current: f64,
        metrics: &ConfidenceMetrics,
        solution_pattern_count: usize,
    ) -> Vec<MaskingFlag> {
        let t = &self.thresholds;
        let mut flags = Vec::new();

        let series: Vec<f64> = history
            .iter()
            .map(|s| s.confidence)
            .chain(std::iter::once(current))
            .collect();
        let window = t.rolling_window.max(1);
        if series.len() > t.jump_lookback && series.len() >= window {
            let rolling = series[series.len() - window..].iter().sum::<f64>() / window as f64;
            let baseline = series[series.len() - 1 - t.jump_lookback];
            if rolling - baseline > t.confidence_jump_points {
                flags.push(MaskingFlag::new(
                    MaskingKind::ConfidenceJump,
                    "confidence",
                    format!(
                        "rolling confidence {rolling:.1} jumped {:.1} points over {baseline:.1}",
                        rolling - baseline
                    ),
                ));
            }
        }

        if metrics.solution_optimization > t.suspicious_optimization_score
            && solution_pattern_count < t.min_solution_patterns
        {
            flags.push(MaskingFlag::new(
                MaskingKind::SuspiciousOptimization,
                "solutionOptimization",
                format!(
                    "solution optimization {:.1} with only {solution_pattern_count} solution patterns",
                    metrics.solution_optimization
                ),
            ));
        }

        flags
    }
}
