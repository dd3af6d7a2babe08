//! Learning and confidence engine
//!
//! Learns `category:value` patterns from the fix-attempt stream and blends
//! six sub-metrics into one 0-100 confidence number. The scoring assumes
//! the agent doing the fixing may inflate its own results, so thin or
//! too-perfect evidence lowers quality and raises masking flags.

mod engine;
mod masking;
mod patterns;
mod scoring;
mod types;

pub use engine::{LearningConfig, LearningEngine};
pub use masking::{MaskingSeverity, TestMaskingDetector, TestMaskingReport, detect_test_masking};
pub use patterns::{DEFAULT_PATTERN_FIELD_CAP, PatternLibrary};
pub use scoring::{
    HeuristicScorer, MaskingDetector, MaskingThresholds, MetricWeights, PatternScorer, Scored,
    TrendMaskingDetector,
};
pub use types::*;
