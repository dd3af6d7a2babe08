//! State store contract and in-memory implementation

use std::collections::BTreeMap;
use std::sync::{PoisonError, RwLock};

use chrono::{DateTime, Utc};
use serde_json::Value;
use tokio::sync::broadcast;

use crate::types::StateChange;

/// Holds current game/system state keyed by dotted path
pub trait StateStore: Send + Sync {
    /// Current value at `path`
    fn get(&self, path: &str) -> Option<Value>;

    /// Write `value` at `path`, notifying subscribers if it changed
    fn set(&self, path: &str, value: Value, trigger: &str);

    /// Snapshot of the whole state (attached to fix attempts)
    fn snapshot(&self) -> Value;

    /// Subscribe to change notifications
    fn subscribe(&self) -> broadcast::Receiver<StateChange>;
}

/// Flat path → value map with broadcast notifications
pub struct InMemoryStateStore {
    values: RwLock<BTreeMap<String, Value>>,
    sender: broadcast::Sender<StateChange>,
}

impl InMemoryStateStore {
    pub fn new() -> Self {
        let (sender, _) = broadcast::channel(1024);
        Self {
            values: RwLock::new(BTreeMap::new()),
            sender,
        }
    }

    /// Write with an explicit timestamp (replay and tests)
    pub fn set_at(&self, path: &str, value: Value, trigger: &str, at: DateTime<Utc>) {
        let old_value = {
            let mut values = self.values.write().unwrap_or_else(PoisonError::into_inner);
            match values.insert(path.to_string(), value.clone()) {
                Some(old) if old == value => return,
                Some(old) => old,
                None => Value::Null,
            }
        };

        // Notify subscribers (ignore if no receivers)
        let _ = self.sender.send(StateChange::new(
            at,
            path,
            old_value,
            value,
            trigger,
        ));
    }

    pub fn len(&self) -> usize {
        self.values
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for InMemoryStateStore {
    fn default() -> Self {
        Self::new()
    }
}

impl StateStore for InMemoryStateStore {
    fn get(&self, path: &str) -> Option<Value> {
        self.values
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(path)
            .cloned()
    }

    fn set(&self, path: &str, value: Value, trigger: &str) {
        self.set_at(path, value, trigger, Utc::now());
    }

    fn snapshot(&self) -> Value {
        let values = self.values.read().unwrap_or_else(PoisonError::into_inner);
        Value::Object(
            values
                .iter()
                .map(|(k, v)| (k.clone(), v.clone()))
                .collect(),
        )
    }

    fn subscribe(&self) -> broadcast::Receiver<StateChange> {
        self.sender.subscribe()
    }
}
