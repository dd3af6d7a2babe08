//! Lexical detection of tests being weakened to hide failures
//!
//! Compares two versions of a test file by counting indicator patterns.
//! This is a heuristic over text, not an analysis of the test's semantics.

use regex::Regex;
use serde::{Deserialize, Serialize};

/// Patterns whose disappearance means assertions were removed
const ASSERTION_PATTERNS: &[&str] = &[
    r"\bassert\w*!?\s*\(",
    r"\bexpect\s*\(",
    r"\.should\b",
    r"\.to(Be|Equal|Throw|Match|Contain|Have)\w*\s*\(",
    r"\bverify\w*\s*\(",
];

/// Patterns whose disappearance means code stopped being exercised
const EXECUTION_PATTERNS: &[&str] = &[r"\bawait\b", r"\.unwrap\(\)", r"\.call\(", r"\binvoke\w*\s*\("];

/// Patterns whose disappearance means test cases were removed
const FUNCTIONALITY_PATTERNS: &[&str] = &[
    r"#\[(tokio::)?test\]",
    r"\b(it|test|describe)\s*\(",
    r"\bfn\s+test_\w+",
];

/// Patterns whose appearance means tests were switched off
const SKIP_PATTERNS: &[&str] = &[
    r"#\[ignore\]",
    r"\b(it|test|describe)\.skip\s*\(",
    r"\bx(it|describe)\s*\(",
    r"\.only\s*\(",
];

/// Words in a change reason that suggest a workaround
const WORKAROUND_KEYWORDS: &[&str] = &[
    "simplify",
    "simplified",
    "bypass",
    "skip",
    "disable",
    "workaround",
    "ignore",
    "temporarily",
    "comment out",
    "relax",
    "loosen",
    "hack",
    "stub out",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MaskingSeverity {
    None,
    Low,
    Medium,
    High,
}

impl MaskingSeverity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::None => "none",
            Self::Low => "low",
            Self::Medium => "medium",
            Self::High => "high",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TestMaskingReport {
    pub is_masking: bool,
    pub indicators: Vec<String>,
    pub severity: MaskingSeverity,
}

struct IndicatorGroup {
    label: &'static str,
    patterns: Vec<Regex>,
}

impl IndicatorGroup {
    fn compile(label: &'static str, sources: &[&str]) -> Self {
        Self {
            label,
            patterns: sources.iter().filter_map(|p| Regex::new(p).ok()).collect(),
        }
    }

    fn count(&self, text: &str) -> usize {
        self.patterns.iter().map(|p| p.find_iter(text).count()).sum()
    }
}

/// Compares old and new test code for signs of masking
pub struct TestMaskingDetector {
    assertions: IndicatorGroup,
    removals: Vec<IndicatorGroup>,
    skips: IndicatorGroup,
}

impl TestMaskingDetector {
    pub fn new() -> Self {
        Self {
            assertions: IndicatorGroup::compile("assertion", ASSERTION_PATTERNS),
            removals: vec![
                IndicatorGroup::compile("execution", EXECUTION_PATTERNS),
                IndicatorGroup::compile("functionality", FUNCTIONALITY_PATTERNS),
            ],
            skips: IndicatorGroup::compile("skip", SKIP_PATTERNS),
        }
    }

    pub fn detect(&self, old_test: &str, new_test: &str, reason: Option<&str>) -> TestMaskingReport {
        let mut indicators = Vec::new();

        let (old_asserts, new_asserts) = (self.assertions.count(old_test), self.assertions.count(new_test));
        let assertions_removed = new_asserts < old_asserts;
        if assertions_removed {
            indicators.push(format!(
                "{} indicators removed ({old_asserts} -> {new_asserts})",
                self.assertions.label
            ));
        }

        for group in &self.removals {
            let (old, new) = (group.count(old_test), group.count(new_test));
            if new < old {
                indicators.push(format!("{} indicators removed ({old} -> {new})", group.label));
            }
        }

        let (old_skips, new_skips) = (self.skips.count(old_test), self.skips.count(new_test));
        if new_skips > old_skips {
            indicators.push(format!(
                "{} markers added ({old_skips} -> {new_skips})",
                self.skips.label
            ));
        }

        if let Some(reason) = reason {
            let lowered = reason.to_lowercase();
            for keyword in WORKAROUND_KEYWORDS {
                if lowered.contains(keyword) {
                    indicators.push(format!("change reason mentions \"{keyword}\""));
                }
            }
        }

        let severity = if assertions_removed || indicators.len() >= 3 {
            MaskingSeverity::High
        } else {
            match indicators.len() {
                0 => MaskingSeverity::None,
                1 => MaskingSeverity::Low,
                _ => MaskingSeverity::Medium,
            }
        };

        TestMaskingReport {
            is_masking: !indicators.is_empty(),
            indicators,
            severity,
        }
    }
}

impl Default for TestMaskingDetector {
    fn default() -> Self {
        Self::new()
    }
}

/// Check whether `new_test` weakens `old_test`
pub fn detect_test_masking(old_test: &str, new_test: &str, reason: Option<&str>) -> TestMaskingReport {
    TestMaskingDetector::new().detect(old_test, new_test, reason)
}

#[cfg(test)]
mod tests {
    use super::*;

    const OLD: &str = r#"
#[tokio::test]
async fn test_pot_settles() {
    let table = setup().await;
    table.bet(50).await;
    assert_eq!(table.pot(), 150);
    assert!(table.is_settled());
}
"#;

    #[test]
    fn test_all_patterns_compile() {
        let detector = TestMaskingDetector::new();
        assert_eq!(detector.assertions.patterns.len(), ASSERTION_PATTERNS.len());
        assert_eq!(detector.skips.patterns.len(), SKIP_PATTERNS.len());
        assert_eq!(detector.removals[0].patterns.len(), EXECUTION_PATTERNS.len());
        assert_eq!(detector.removals[1].patterns.len(), FUNCTIONALITY_PATTERNS.len());
    }

    #[test]
    fn test_unchanged_test_is_clean() {
        let report = detect_test_masking(OLD, OLD, Some("rename variable"));
        assert!(!report.is_masking);
        assert_eq!(report.severity, MaskingSeverity::None);
    }

    #[test]
    fn test_removed_assertion_is_high() {
        let new = OLD.replace("    assert!(table.is_settled());\n", "");
        let report = detect_test_masking(OLD, &new, None);
        assert!(report.is_masking);
        assert_eq!(report.severity, MaskingSeverity::High);
        assert!(report.indicators[0].starts_with("assertion"));
    }

    #[test]
    fn test_workaround_reason_is_low() {
        let report = detect_test_masking(OLD, OLD, Some("Bypass flaky network"));
        assert_eq!(report.indicators.len(), 1);
        assert_eq!(report.severity, MaskingSeverity::Low);
    }

    #[test]
    fn test_two_indicators_medium() {
        let new = OLD.replace("#[tokio::test]", "#[tokio::test]\n#[ignore]");
        let report = detect_test_masking(OLD, &new, Some("skip for now"));
        assert_eq!(report.indicators.len(), 2);
        assert_eq!(report.severity, MaskingSeverity::Medium);
    }
}
