//! In-memory store for tests and dry runs

use std::collections::HashMap;

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::RwLock;

use crate::error::Result;

use super::{KnowledgeStore, StoreKey};

#[derive(Debug, Default)]
pub struct MemoryStore {
    documents: RwLock<HashMap<StoreKey, Value>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of keys written so far
    pub async fn len(&self) -> usize {
        self.documents.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.documents.read().await.is_empty()
    }
}

#[async_trait]
impl KnowledgeStore for MemoryStore {
    async fn load_raw(&self, key: StoreKey) -> Result<Option<Value>> {
        Ok(self.documents.read().await.get(&key).cloned())
    }

    async fn save_raw(&self, key: StoreKey, document: Value) -> Result<()> {
        self.documents.write().await.insert(key, document);
        Ok(())
    }
}
