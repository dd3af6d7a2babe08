//! Pattern extraction from fix attempts

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};

use crate::types::{FixAttempt, component_of};

use super::types::{Pattern, PatternContext, SolutionOutcome};

/// Default cap for per-pattern contexts and solutions
pub const DEFAULT_PATTERN_FIELD_CAP: usize = 100;

/// All learned `category:value` patterns. Grows monotonically.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PatternLibrary {
    patterns: BTreeMap<String, Pattern>,
    #[serde(skip, default = "default_cap")]
    field_cap: usize,
}

fn default_cap() -> usize {
    DEFAULT_PATTERN_FIELD_CAP
}

impl Default for PatternLibrary {
    fn default() -> Self {
        Self::new(DEFAULT_PATTERN_FIELD_CAP)
    }
}

impl PatternLibrary {
    pub fn new(field_cap: usize) -> Self {
        Self {
            patterns: BTreeMap::new(),
            field_cap: field_cap.max(1),
        }
    }

    /// Keys an attempt contributes to: issue type, fix method, each
    /// top-level state component in its snapshot, and the first token of
    /// a `log` detail.
    pub fn extract_keys(attempt: &FixAttempt) -> Vec<String> {
        let mut keys = vec![
            format!("issueType:{}", attempt.issue_type),
            format!("fixMethod:{}", attempt.fix_method),
        ];

        if let Some(snapshot) = attempt.state_snapshot.as_object() {
            let components: BTreeSet<&str> = snapshot
                .keys()
                .map(|k| component_of(k))
                .filter(|c| !c.is_empty())
                .collect();
            keys.extend(components.into_iter().map(|c| format!("state:{c}")));
        }

        if let Some(token) = attempt
            .fix_details
            .get("log")
            .and_then(|v| v.as_str())
            .and_then(|log| log.split_whitespace().next())
        {
            keys.push(format!("log:{token}"));
        }

        keys
    }

    /// Fold one attempt into every pattern it touches
    pub fn learn_from_attempt(&mut self, attempt: &FixAttempt) -> Vec<String> {
        let keys = Self::extract_keys(attempt);
        let success = attempt.is_success();
        for key in &keys {
            let pattern = self.patterns.entry(key.clone()).or_default();
            pattern.frequency += 1;
            if success {
                pattern.successes += 1;
            } else {
                pattern.failures += 1;
            }
            pattern.success_rate = f64::from(pattern.successes) / f64::from(pattern.frequency);

            pattern.contexts.push_back(PatternContext {
                issue_id: attempt.issue_id.clone(),
                issue_type: attempt.issue_type.clone(),
                timestamp: attempt.timestamp,
            });
            while pattern.contexts.len() > self.field_cap {
                pattern.contexts.pop_front();
            }

            pattern.solutions.push_back(SolutionOutcome {
                method: attempt.fix_method.clone(),
                success,
                timestamp: attempt.timestamp,
            });
            while pattern.solutions.len() > self.field_cap {
                pattern.solutions.pop_front();
            }
        }
        keys
    }

    pub fn get(&self, key: &str) -> Option<&Pattern> {
        self.patterns.get(key)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &Pattern)> {
        self.patterns.iter()
    }

    pub fn len(&self) -> usize {
        self.patterns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.patterns.is_empty()
    }

    /// Replace the field cap (after loading) and trim accordingly
    pub(crate) fn set_field_cap(&mut self, cap: usize) {
        self.field_cap = cap.max(1);
        for pattern in self.patterns.values_mut() {
            while pattern.contexts.len() > self.field_cap {
                pattern.contexts.pop_front();
            }
            while pattern.solutions.len() > self.field_cap {
                pattern.solutions.pop_front();
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::FixResult;
    use chrono::{DateTime, Utc};
    use serde_json::{Value, json};
    use uuid::Uuid;

    fn attempt(method: &str, result: FixResult, snapshot: Value, details: Value) -> FixAttempt {
        FixAttempt {
            id: Uuid::now_v7(),
            issue_id: "i1".into(),
            issue_type: "pot_mismatch".into(),
            fix_method: method.into(),
            fix_details: details,
            result,
            timestamp: DateTime::<Utc>::default(),
            state_snapshot: snapshot,
            duration_ms: None,
        }
    }

    #[test]
    fn test_extract_keys() {
        let a = attempt(
            "resetPot",
            FixResult::Success,
            json!({"game.tables.t1.pot": 150, "game.phase": "river", "lobby.count": 3}),
            json!({"log": "POT_DESYNC table t1"}),
        );
        assert_eq!(
            PatternLibrary::extract_keys(&a),
            vec![
                "issueType:pot_mismatch",
                "fixMethod:resetPot",
                "state:game",
                "state:lobby",
                "log:POT_DESYNC",
            ]
        );
    }

    #[test]
    fn test_counts_sum_to_frequency() {
        let mut library = PatternLibrary::default();
        for result in [FixResult::Success, FixResult::Failure, FixResult::Partial] {
            library.learn_from_attempt(&attempt("resetPot", result, Value::Null, Value::Null));
        }
        let pattern = library.get("fixMethod:resetPot").unwrap();
        assert_eq!(pattern.frequency, 3);
        assert_eq!(pattern.successes + pattern.failures, pattern.frequency);
        assert!((pattern.success_rate - 1.0 / 3.0).abs() < f64::EPSILON);
    }

    #[test]
    fn test_fields_capped() {
        let mut library = PatternLibrary::new(2);
        for _ in 0..5 {
            library.learn_from_attempt(&attempt("resetPot", FixResult::Success, Value::Null, Value::Null));
        }
        let pattern = library.get("issueType:pot_mismatch").unwrap();
        assert_eq!(pattern.frequency, 5);
        assert_eq!(pattern.contexts.len(), 2);
        assert_eq!(pattern.solutions.len(), 2);
    }
}
