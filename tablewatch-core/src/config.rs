//! Configuration for the whole monitor
//!
//! Every section defaults sensibly, so an empty file (or none) is valid.
//! Layers are merged as TOML tables before deserializing: a later layer
//! overrides individual keys of an earlier one.

use std::collections::BTreeMap;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::causal::CausalConfig;
use crate::collab::StaticDependencyGraph;
use crate::decision::DecisionConfig;
use crate::error::{Result, WatchError};
use crate::events::DEFAULT_EVENT_CAPACITY;
use crate::knowledge::KnowledgeConfig;
use crate::learning::LearningConfig;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// Directory for persisted documents (default: XDG data dir)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data_dir: Option<PathBuf>,
}

impl StorageConfig {
    pub fn resolved_dir(&self) -> PathBuf {
        self.data_dir
            .clone()
            .unwrap_or_else(tablewatch_paths::store_dir)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MonitorConfig {
    pub decision_tick_ms: u64,
    pub confidence_tick_ms: u64,
    pub event_capacity: usize,
    pub command_capacity: usize,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            decision_tick_ms: 1_000,
            confidence_tick_ms: 300_000,
            event_capacity: DEFAULT_EVENT_CAPACITY,
            command_capacity: 64,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct WatchConfig {
    pub storage: StorageConfig,
    pub knowledge: KnowledgeConfig,
    pub causal: CausalConfig,
    pub learning: LearningConfig,
    pub decision: DecisionConfig,
    pub monitor: MonitorConfig,
    /// Component -> components it depends on
    pub dependencies: BTreeMap<String, Vec<String>>,
}

impl WatchConfig {
    pub fn from_toml_str(contents: &str) -> Result<Self> {
        toml::from_str(contents).map_err(|e| WatchError::Config(e.to_string()))
    }

    /// Merge layers in order (later wins per key) and deserialize
    pub fn from_layers<I>(layers: I) -> Result<Self>
    where
        I: IntoIterator<Item = toml::Value>,
    {
        let mut merged = toml::Value::Table(toml::map::Map::new());
        for layer in layers {
            merge_toml(&mut merged, layer);
        }
        merged
            .try_into()
            .map_err(|e: toml::de::Error| WatchError::Config(e.to_string()))
    }

    pub fn to_toml_string(&self) -> Result<String> {
        toml::to_string_pretty(self).map_err(|e| WatchError::Config(e.to_string()))
    }

    /// `None` when no dependencies are declared
    pub fn dependency_graph(&self) -> Option<StaticDependencyGraph> {
        if self.dependencies.is_empty() {
            return None;
        }
        Some(StaticDependencyGraph::from_map(self.dependencies.clone()))
    }
}

/// Recursively overlay `overlay` onto `base`; non-table values replace
pub fn merge_toml(base: &mut toml::Value, overlay: toml::Value) {
    match (base, overlay) {
        (toml::Value::Table(base), toml::Value::Table(overlay)) => {
            for (key, value) in overlay {
                match base.get_mut(&key) {
                    Some(existing) => merge_toml(existing, value),
                    None => {
                        base.insert(key, value);
                    }
                }
            }
        }
        (base, overlay) => *base = overlay,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collab::DependencyGraph;

    #[test]
    fn test_defaults() {
        let config = WatchConfig::default();
        assert_eq!(config.causal.history_capacity, 10_000);
        assert_eq!(config.causal.lookback_ms, 60_000);
        assert_eq!(config.causal.max_hops, 1);
        assert_eq!(config.knowledge.max_attempts, 1000);
        assert_eq!(config.learning.history_cap, 100);
        assert_eq!(config.learning.auto_adjust_threshold, 50.0);
        assert_eq!(config.decision.cooldown_ms, 5_000);
        assert_eq!(config.decision.activation_delay_ms, 100);
        assert_eq!(config.decision.investigation_timeout_ms, 15_000);
        assert_eq!(config.monitor.decision_tick_ms, 1_000);
        assert_eq!(config.monitor.confidence_tick_ms, 300_000);
    }

    #[test]
    fn test_empty_file_is_default() {
        let config = WatchConfig::from_toml_str("").unwrap();
        assert_eq!(config.decision.cooldown_ms, 5_000);
        assert!(config.dependency_graph().is_none());
    }

    #[test]
    fn test_partial_section() {
        let config = WatchConfig::from_toml_str(
            r#"
[causal]
max_hops = 3

[learning.thresholds]
confidence_jump_points = 25.0

[dependencies]
game = ["network"]
"#,
        )
        .unwrap();
        assert_eq!(config.causal.max_hops, 3);
        assert_eq!(config.causal.lookback_ms, 60_000);
        assert_eq!(config.learning.thresholds.confidence_jump_points, 25.0);
        assert_eq!(config.learning.thresholds.low_sample_frequency, 10);

        let graph = config.dependency_graph().unwrap();
        assert_eq!(graph.dependents("network"), vec!["game".to_string()]);
    }

    #[test]
    fn test_layers_override_per_key() {
        let user: toml::Value = toml::from_str("[decision]\ncooldown_ms = 1000\nhistory_cap = 10").unwrap();
        let project: toml::Value = toml::from_str("[decision]\ncooldown_ms = 2000").unwrap();

        let config = WatchConfig::from_layers([user, project]).unwrap();
        assert_eq!(config.decision.cooldown_ms, 2000);
        assert_eq!(config.decision.history_cap, 10);
    }

    #[test]
    fn test_invalid_value_is_config_error() {
        let result = WatchConfig::from_toml_str("[causal]\nmax_hops = \"many\"");
        assert!(matches!(result, Err(WatchError::Config(_))));
    }

    #[test]
    fn test_roundtrip_through_toml() {
        let text = WatchConfig::default().to_toml_string().unwrap();
        let parsed = WatchConfig::from_toml_str(&text).unwrap();
        assert_eq!(parsed.monitor.event_capacity, DEFAULT_EVENT_CAPACITY);
    }
}
