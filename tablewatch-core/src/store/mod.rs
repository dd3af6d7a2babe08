//! Persistence for learned state
//!
//! Every component owns its data in memory and persists it under a fixed
//! logical key through a [`KnowledgeStore`]. Payloads are wrapped in a
//! versioned [`Envelope`] and upgraded through [`MIGRATIONS`] on load.
//! Load and save failures always propagate to the caller.

mod json;
mod memory;
mod schema;

pub use json::JsonFileStore;
pub use memory::MemoryStore;
pub use schema::{CURRENT_SCHEMA_VERSION, Envelope, MIGRATIONS, Migration, StoreKey};

use async_trait::async_trait;
use chrono::Utc;
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value;
use tracing::debug;

use crate::error::{Result, WatchError};

/// Backing store for persisted state
#[async_trait]
pub trait KnowledgeStore: Send + Sync {
    /// Load the raw stored document for `key`, `None` if never saved
    async fn load_raw(&self, key: StoreKey) -> Result<Option<Value>>;

    /// Replace the stored document for `key`
    async fn save_raw(&self, key: StoreKey, document: Value) -> Result<()>;
}

/// Load and deserialize a payload, upgrading older schema versions
pub async fn load_typed<T: DeserializeOwned>(
    store: &dyn KnowledgeStore,
    key: StoreKey,
) -> Result<Option<T>> {
    let Some(document) = store.load_raw(key).await? else {
        return Ok(None);
    };

    let envelope = Envelope::from_document(key, document)?;
    let version = envelope.schema_version;
    let data = schema::migrate(key, version, envelope.data)?;
    if version != CURRENT_SCHEMA_VERSION {
        debug!(key = %key, from = version, to = CURRENT_SCHEMA_VERSION, "Migrated payload");
    }

    serde_json::from_value(data)
        .map(Some)
        .map_err(|e| WatchError::Serialization(format!("{key}: {e}")))
}

/// Serialize and save a payload in the current envelope format
pub async fn save_typed<T: Serialize + ?Sized>(
    store: &dyn KnowledgeStore,
    key: StoreKey,
    value: &T,
) -> Result<()> {
    let data = serde_json::to_value(value)
        .map_err(|e| WatchError::Serialization(format!("{key}: {e}")))?;
    let envelope = Envelope {
        schema_version: CURRENT_SCHEMA_VERSION,
        key: key.as_str().to_string(),
        saved_at: Utc::now(),
        data,
    };
    let document = serde_json::to_value(&envelope)?;
    store.save_raw(key, document).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::collections::BTreeMap;

    #[tokio::test]
    async fn test_typed_roundtrip_through_envelope() {
        let store = MemoryStore::new();
        let mut counts = BTreeMap::new();
        counts.insert("resetPot".to_string(), 3u32);

        save_typed(&store, StoreKey::FixMethods, &counts).await.unwrap();
        let raw = store.load_raw(StoreKey::FixMethods).await.unwrap().unwrap();
        assert_eq!(raw["schema_version"], json!(CURRENT_SCHEMA_VERSION));
        assert_eq!(raw["key"], json!("fixes.methods"));

        let loaded: BTreeMap<String, u32> = load_typed(&store, StoreKey::FixMethods)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(loaded, counts);
    }

    #[tokio::test]
    async fn test_missing_key_is_none() {
        let store = MemoryStore::new();
        let loaded: Option<Vec<u32>> = load_typed(&store, StoreKey::FixAttempts).await.unwrap();
        assert!(loaded.is_none());
    }

    #[tokio::test]
    async fn test_legacy_bare_payload_is_migrated() {
        let store = MemoryStore::new();
        store
            .save_raw(StoreKey::LearningAutoAdjustments, json!(["raise samples"]))
            .await
            .unwrap();

        let loaded: Vec<String> = load_typed(&store, StoreKey::LearningAutoAdjustments)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(loaded, vec!["raise samples".to_string()]);
    }

    #[tokio::test]
    async fn test_legacy_map_entries_load_as_map() {
        let store = MemoryStore::new();
        store
            .save_raw(StoreKey::FixMethods, json!([["resetPot", 3], ["recountChips", 1]]))
            .await
            .unwrap();

        let loaded: BTreeMap<String, u32> = load_typed(&store, StoreKey::FixMethods)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(loaded.get("resetPot"), Some(&3));
        assert_eq!(loaded.get("recountChips"), Some(&1));
    }

    #[tokio::test]
    async fn test_malformed_envelope_is_not_read_as_legacy() {
        let store = MemoryStore::new();
        store
            .save_raw(
                StoreKey::FixAttempts,
                json!({
                    "schema_version": "two",
                    "key": "fixes.attempts",
                    "saved_at": "2026-01-01T00:00:00Z",
                    "data": []
                }),
            )
            .await
            .unwrap();

        let result: Result<Option<Vec<u32>>> = load_typed(&store, StoreKey::FixAttempts).await;
        assert!(matches!(result, Err(WatchError::Migration(_))));
    }

    #[tokio::test]
    async fn test_future_version_is_rejected() {
        let store = MemoryStore::new();
        store
            .save_raw(
                StoreKey::FixKnowledge,
                json!({
                    "schema_version": CURRENT_SCHEMA_VERSION + 1,
                    "key": "fixes.knowledge",
                    "saved_at": "2026-01-01T00:00:00Z",
                    "data": {}
                }),
            )
            .await
            .unwrap();

        let result: Result<Option<BTreeMap<String, u32>>> =
            load_typed(&store, StoreKey::FixKnowledge).await;
        assert!(matches!(result, Err(WatchError::Migration(_))));
    }

    #[tokio::test]
    async fn test_wrong_shape_is_serialization_error() {
        let store = MemoryStore::new();
        save_typed(&store, StoreKey::FixAttempts, &json!({"not": "a list"}))
            .await
            .unwrap();

        let result: Result<Option<Vec<u32>>> = load_typed(&store, StoreKey::FixAttempts).await;
        assert!(matches!(result, Err(WatchError::Serialization(_))));
    }
}
