//! Persisted schema: logical keys, envelope and migrations

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{Result, WatchError};

/// Current envelope schema version
pub const CURRENT_SCHEMA_VERSION: u32 = 2;

/// Logical keys of the persisted namespace
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum StoreKey {
    FixKnowledge,
    FixAttempts,
    FixFailures,
    FixSuccesses,
    FixMethods,
    LearningPatterns,
    LearningCausalChains,
    LearningSolutionOptimization,
    LearningCrossIssue,
    LearningAutoAdjustments,
    LearningConfidenceHistory,
    LearningPredictions,
    DecisionInvestigations,
}

impl StoreKey {
    pub const ALL: [StoreKey; 13] = [
        StoreKey::FixKnowledge,
        StoreKey::FixAttempts,
        StoreKey::FixFailures,
        StoreKey::FixSuccesses,
        StoreKey::FixMethods,
        StoreKey::LearningPatterns,
        StoreKey::LearningCausalChains,
        StoreKey::LearningSolutionOptimization,
        StoreKey::LearningCrossIssue,
        StoreKey::LearningAutoAdjustments,
        StoreKey::LearningConfidenceHistory,
        StoreKey::LearningPredictions,
        StoreKey::DecisionInvestigations,
    ];

    /// Payload is a map keyed by method or `issueType:method`
    pub fn is_map(&self) -> bool {
        matches!(
            self,
            Self::FixMethods | Self::LearningSolutionOptimization | Self::LearningCrossIssue
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::FixKnowledge => "fixes.knowledge",
            Self::FixAttempts => "fixes.attempts",
            Self::FixFailures => "fixes.failures",
            Self::FixSuccesses => "fixes.successes",
            Self::FixMethods => "fixes.methods",
            Self::LearningPatterns => "learning.patterns",
            Self::LearningCausalChains => "learning.causalChains",
            Self::LearningSolutionOptimization => "learning.solutionOptimization",
            Self::LearningCrossIssue => "learning.crossIssueLearning",
            Self::LearningAutoAdjustments => "learning.autoAdjustments",
            Self::LearningConfidenceHistory => "learning.confidenceHistory",
            Self::LearningPredictions => "learning.predictions",
            Self::DecisionInvestigations => "decision.investigations",
        }
    }
}

impl std::fmt::Display for StoreKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Versioned wrapper around every persisted payload
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Envelope {
    pub schema_version: u32,
    pub key: String,
    pub saved_at: DateTime<Utc>,
    pub data: Value,
}

impl Envelope {
    /// Interpret a stored document.
    ///
    /// A document is an envelope exactly when it carries `schema_version`.
    /// Anything else predates versioning and is a version 1 payload. A
    /// document with `schema_version` that does not parse is an error.
    pub fn from_document(key: StoreKey, document: Value) -> Result<Self> {
        let versioned = document
            .as_object()
            .is_some_and(|fields| fields.contains_key("schema_version"));
        if !versioned {
            return Ok(Envelope {
                schema_version: 1,
                key: key.as_str().to_string(),
                saved_at: DateTime::<Utc>::default(),
                data: document,
            });
        }
        serde_json::from_value(document)
            .map_err(|e| WatchError::Migration(format!("{key}: malformed envelope: {e}")))
    }
}

/// Payload upgrade step
#[derive(Debug, Clone)]
pub struct Migration {
    /// Version this migration produces
    pub version: u32,
    /// Human-readable description of what this migration does
    pub description: &'static str,
    /// Transform the payload stored under a key from `version - 1` to `version`
    pub upgrade: fn(StoreKey, Value) -> Result<Value>,
}

/// Version 1 wrote keyed maps as lists of `[key, value]` entries
fn entries_to_objects(key: StoreKey, data: Value) -> Result<Value> {
    if !key.is_map() {
        return Ok(data);
    }
    let Value::Array(entries) = data else {
        return Ok(data);
    };
    entries
        .into_iter()
        .map(|entry| match entry {
            Value::Array(pair) => match <[Value; 2]>::try_from(pair) {
                Ok([Value::String(name), value]) => Ok((name, value)),
                _ => Err(WatchError::Migration(format!(
                    "{key}: map entry is not a [string, value] pair"
                ))),
            },
            _ => Err(WatchError::Migration(format!("{key}: map entry is not a list"))),
        })
        .collect::<Result<serde_json::Map<String, Value>>>()
        .map(Value::Object)
}

/// All migrations in order
pub static MIGRATIONS: &[Migration] = &[Migration {
    version: 2,
    description: "Convert keyed maps stored as entry lists into objects",
    upgrade: entries_to_objects,
}];

/// Upgrade `data` stored at `version` to [`CURRENT_SCHEMA_VERSION`]
pub fn migrate(key: StoreKey, version: u32, mut data: Value) -> Result<Value> {
    if version > CURRENT_SCHEMA_VERSION {
        return Err(WatchError::Migration(format!(
            "stored version {version} is newer than supported version {CURRENT_SCHEMA_VERSION}"
        )));
    }
    for migration in MIGRATIONS.iter().filter(|m| m.version > version) {
        data = (migration.upgrade)(key, data).map_err(|e| {
            WatchError::Migration(format!("v{} ({}): {e}", migration.version, migration.description))
        })?;
    }
    Ok(data)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_schema_version_constant() {
        assert_eq!(CURRENT_SCHEMA_VERSION, 2);
    }

    #[test]
    fn test_migrations_end_at_current_version() {
        assert_eq!(
            MIGRATIONS.last().map(|m| m.version),
            Some(CURRENT_SCHEMA_VERSION)
        );
    }

    #[test]
    fn test_store_keys_are_unique() {
        let mut names: Vec<_> = StoreKey::ALL.iter().map(|k| k.as_str()).collect();
        names.sort();
        names.dedup();
        assert_eq!(names.len(), StoreKey::ALL.len());
    }

    #[test]
    fn test_logical_namespace_names() {
        assert_eq!(StoreKey::FixKnowledge.as_str(), "fixes.knowledge");
        assert_eq!(StoreKey::LearningCrossIssue.as_str(), "learning.crossIssueLearning");
        assert_eq!(StoreKey::LearningAutoAdjustments.as_str(), "learning.autoAdjustments");
    }

    #[test]
    fn test_bare_document_is_version_one() {
        let envelope = Envelope::from_document(StoreKey::FixAttempts, json!([1, 2])).unwrap();
        assert_eq!(envelope.schema_version, 1);
        assert_eq!(envelope.data, json!([1, 2]));

        // An object without schema_version is a bare payload too
        let envelope =
            Envelope::from_document(StoreKey::FixMethods, json!({"data": {"resetPot": 1}})).unwrap();
        assert_eq!(envelope.schema_version, 1);
    }

    #[test]
    fn test_malformed_envelope_is_an_error() {
        let broken = json!({
            "schema_version": "2",
            "key": "fixes.attempts",
            "saved_at": "2024-01-01T00:00:00Z",
            "data": []
        });
        let err = Envelope::from_document(StoreKey::FixAttempts, broken).unwrap_err();
        assert!(matches!(err, WatchError::Migration(msg) if msg.contains("malformed envelope")));

        let missing_data = json!({"schema_version": 2});
        assert!(Envelope::from_document(StoreKey::FixAttempts, missing_data).is_err());
    }

    #[test]
    fn test_migrate_current_is_identity() {
        let data = json!({"a": 1});
        assert_eq!(
            migrate(StoreKey::FixMethods, CURRENT_SCHEMA_VERSION, data.clone()).unwrap(),
            data
        );
    }

    #[test]
    fn test_v1_entry_lists_become_objects() {
        let legacy = json!([["resetPot", {"attempts": 2}], ["recountChips", {"attempts": 1}]]);
        let upgraded = migrate(StoreKey::FixMethods, 1, legacy).unwrap();
        assert_eq!(
            upgraded,
            json!({"resetPot": {"attempts": 2}, "recountChips": {"attempts": 1}})
        );

        // Lists that are not maps pass through
        let attempts = json!([["a", 1]]);
        assert_eq!(migrate(StoreKey::FixAttempts, 1, attempts.clone()).unwrap(), attempts);
    }

    #[test]
    fn test_v1_bad_map_entry_is_an_error() {
        let legacy = json!([["resetPot", 1, 2]]);
        let err = migrate(StoreKey::LearningCrossIssue, 1, legacy).unwrap_err();
        assert!(matches!(err, WatchError::Migration(msg) if msg.contains("v2")));
    }
}
