//! JSON-file backed store: one document per key under a directory

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use serde_json::Value;
use tracing::debug;

use crate::error::{Result, WatchError};

use super::{KnowledgeStore, StoreKey};

/// Stores each key as `<dir>/<key>.json`
#[derive(Debug, Clone)]
pub struct JsonFileStore {
    dir: PathBuf,
}

impl JsonFileStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    /// Store rooted at the default data directory
    pub fn open_default() -> Self {
        Self::new(tablewatch_paths::store_dir())
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn path_for(&self, key: StoreKey) -> PathBuf {
        self.dir.join(format!("{}.json", key.as_str()))
    }
}

#[async_trait]
impl KnowledgeStore for JsonFileStore {
    async fn load_raw(&self, key: StoreKey) -> Result<Option<Value>> {
        let path = self.path_for(key);
        let bytes = match tokio::fs::read(&path).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => {
                return Err(WatchError::Storage(format!(
                    "read {} failed: {e}",
                    path.display()
                )));
            }
        };

        serde_json::from_slice(&bytes).map(Some).map_err(|e| {
            WatchError::Storage(format!("corrupt document {}: {e}", path.display()))
        })
    }

    async fn save_raw(&self, key: StoreKey, document: Value) -> Result<()> {
        tokio::fs::create_dir_all(&self.dir).await.map_err(|e| {
            WatchError::Storage(format!("create {} failed: {e}", self.dir.display()))
        })?;

        let path = self.path_for(key);
        let tmp = path.with_extension("json.tmp");
        let bytes = serde_json::to_vec_pretty(&document)?;

        tokio::fs::write(&tmp, bytes)
            .await
            .map_err(|e| WatchError::Storage(format!("write {} failed: {e}", tmp.display())))?;
        tokio::fs::rename(&tmp, &path)
            .await
            .map_err(|e| WatchError::Storage(format!("rename {} failed: {e}", path.display())))?;

        debug!(key = %key, path = %path.display(), "Saved document");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_missing_file_is_none() {
        let tmp = TempDir::new().unwrap();
        let store = JsonFileStore::new(tmp.path());
        assert!(store.load_raw(StoreKey::FixKnowledge).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_save_then_load() {
        let tmp = TempDir::new().unwrap();
        let store = JsonFileStore::new(tmp.path().join("nested"));

        store
            .save_raw(StoreKey::FixAttempts, json!([{"id": 1}]))
            .await
            .unwrap();

        let loaded = store.load_raw(StoreKey::FixAttempts).await.unwrap();
        assert_eq!(loaded, Some(json!([{"id": 1}])));
        assert!(tmp.path().join("nested/fixes.attempts.json").exists());
        assert!(!tmp.path().join("nested/fixes.attempts.json.tmp").exists());
    }

    #[tokio::test]
    async fn test_corrupt_file_fails_loudly() {
        let tmp = TempDir::new().unwrap();
        std::fs::write(tmp.path().join("learning.patterns.json"), b"{not json").unwrap();
        let store = JsonFileStore::new(tmp.path());

        let result = store.load_raw(StoreKey::LearningPatterns).await;
        assert!(matches!(result, Err(WatchError::Storage(_))));
    }
}
