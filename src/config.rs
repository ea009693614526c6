//! Blueprint configuration: file defaults that CLI flags can override.

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::dispatch::{Dispatcher, FailurePolicy};

/// Project-local config directory, checked before the user config dir
pub const LOCAL_CONFIG_DIR: &str = ".blueprints";

/// Blueprint run configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BlueprintConfig {
    /// Top-level workers (simulators or directors)
    pub workers: usize,
    /// Points per pi estimate
    pub rounds: u64,
    /// md_sim calls per director batch
    pub iterations: usize,
    /// Local execution slots per director
    pub slots: usize,
    /// One node list per director; when set, directors are sized from these
    /// instead of `workers` and `slots`
    pub nodefiles: Vec<PathBuf>,
    /// Slots per node listed in a nodefile
    pub workers_per_node: usize,
    /// Duration of one mock md_sim call
    pub duration_ms: u64,
    pub policy: FailurePolicy,
    pub item_timeout_ms: Option<u64>,
    pub retries: u32,
    pub seed: Option<u64>,
    /// Where batch records are written, if anywhere
    pub run_dir: Option<PathBuf>,
}

impl Default for BlueprintConfig {
    fn default() -> Self {
        Self {
            workers: 4,
            rounds: 100,
            iterations: 4,
            slots: 4,
            nodefiles: Vec::new(),
            workers_per_node: 12,
            duration_ms: 10,
            policy: FailurePolicy::FailFast,
            item_timeout_ms: None,
            retries: 0,
            seed: None,
            run_dir: None,
        }
    }
}

impl BlueprintConfig {
    /// `./.blueprints` if present, otherwise `<user config dir>/blueprints`
    pub fn default_dir() -> PathBuf {
        let local = PathBuf::from(LOCAL_CONFIG_DIR);
        if local.exists() {
            return local;
        }
        dirs::config_dir()
            .map(|dir| dir.join("blueprints"))
            .unwrap_or(local)
    }

    /// Load the `dispatch` section of `<dir>/config.json`, defaults if absent
    pub fn load(dir: &Path) -> Result<Self> {
        let config_path = dir.join("config.json");
        if config_path.exists() {
            let content = std::fs::read_to_string(&config_path)
                .with_context(|| format!("Failed to read {}", config_path.display()))?;
            let config: serde_json::Value = serde_json::from_str(&content)
                .with_context(|| format!("Failed to parse {}", config_path.display()))?;

            if let Some(section) = config.get("dispatch") {
                return serde_json::from_value(section.clone())
                    .context("Failed to parse dispatch config");
            }
        }
        Ok(Self::default())
    }

    pub fn item_timeout(&self) -> Option<Duration> {
        self.item_timeout_ms.map(Duration::from_millis)
    }

    /// Dispatcher carrying the configured policy, timeout and retries
    pub fn dispatcher(&self) -> Dispatcher {
        Dispatcher::new()
            .with_policy(self.policy)
            .with_timeout(self.item_timeout())
            .with_retries(self.retries)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_default_config() {
        let config = BlueprintConfig::default();
        assert_eq!(config.workers, 4);
        assert_eq!(config.rounds, 100);
        assert_eq!(config.policy, FailurePolicy::FailFast);
        assert!(config.item_timeout().is_none());
        assert!(config.run_dir.is_none());
    }

    #[test]
    fn test_load_returns_default_when_no_config() {
        let temp_dir = TempDir::new().unwrap();
        let config = BlueprintConfig::load(temp_dir.path()).unwrap();
        assert_eq!(config, BlueprintConfig::default());
    }

    #[test]
    fn test_load_returns_default_without_dispatch_section() {
        let temp_dir = TempDir::new().unwrap();
        std::fs::write(temp_dir.path().join("config.json"), r#"{"other": {}}"#).unwrap();

        let config = BlueprintConfig::load(temp_dir.path()).unwrap();
        assert_eq!(config, BlueprintConfig::default());
    }

    #[test]
    fn test_load_from_config_file() {
        let temp_dir = TempDir::new().unwrap();
        let config_json = r#"{
            "dispatch": {
                "workers": 2,
                "rounds": 5000,
                "policy": "collect_all",
                "item_timeout_ms": 250,
                "retries": 1,
                "run_dir": "runs"
            }
        }"#;
        std::fs::write(temp_dir.path().join("config.json"), config_json).unwrap();

        let config = BlueprintConfig::load(temp_dir.path()).unwrap();
        assert_eq!(config.workers, 2);
        assert_eq!(config.rounds, 5000);
        assert_eq!(config.policy, FailurePolicy::CollectAll);
        assert_eq!(config.item_timeout(), Some(Duration::from_millis(250)));
        assert_eq!(config.retries, 1);
        assert_eq!(config.run_dir, Some(PathBuf::from("runs")));
        // unspecified fields keep their defaults
        assert_eq!(config.slots, 4);
        assert!(config.nodefiles.is_empty());
        assert_eq!(config.workers_per_node, 12);
        assert_eq!(config.iterations, 4);
    }

    #[test]
    fn test_load_nodefiles() {
        let temp_dir = TempDir::new().unwrap();
        let config_json = r#"{
            "dispatch": {
                "nodefiles": ["/tmp/node_slice.00", "/tmp/node_slice.01"],
                "workers_per_node": 2
            }
        }"#;
        std::fs::write(temp_dir.path().join("config.json"), config_json).unwrap();

        let config = BlueprintConfig::load(temp_dir.path()).unwrap();
        assert_eq!(config.nodefiles.len(), 2);
        assert_eq!(config.nodefiles[1], PathBuf::from("/tmp/node_slice.01"));
        assert_eq!(config.workers_per_node, 2);
    }

    #[test]
    fn test_load_rejects_malformed_file() {
        let temp_dir = TempDir::new().unwrap();
        std::fs::write(temp_dir.path().join("config.json"), "{ not json").unwrap();
        assert!(BlueprintConfig::load(temp_dir.path()).is_err());
    }

    #[test]
    fn test_dispatcher_follows_config() {
        let config = BlueprintConfig {
            policy: FailurePolicy::CollectAll,
            ..Default::default()
        };
        assert_eq!(config.dispatcher().policy(), FailurePolicy::CollectAll);
    }
}
