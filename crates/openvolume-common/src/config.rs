//! Configuration types for OpenVolume
//!
//! This module defines the configuration loaded by the daemon at startup.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::PathBuf;

/// Root configuration
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// This node's identity
    pub node: NodeConfig,
    /// Shared key-value store
    pub kvdb: KvdbConfig,
    /// Drivers to instantiate at startup
    pub drivers: Vec<DriverConfig>,
    pub logging: LoggingConfig,
}

/// Node identity
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct NodeConfig {
    /// Node ID; a random one is generated when left empty
    pub id: String,
    /// Address other cluster members reach this node on
    pub ip: String,
    /// Data directory for local state
    pub data_dir: PathBuf,
    /// Seconds between liveness updates in the cluster database
    pub heartbeat_secs: u64,
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            id: String::new(),
            ip: "127.0.0.1".to_string(),
            data_dir: PathBuf::from("/var/lib/openvolume"),
            heartbeat_secs: 30,
        }
    }
}

impl NodeConfig {
    /// Configured node ID, or a freshly generated one
    #[must_use]
    pub fn resolved_id(&self) -> String {
        if self.id.is_empty() {
            uuid::Uuid::new_v4().to_string()
        } else {
            self.id.clone()
        }
    }
}

/// Key-value store backend selection
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum KvdbBackend {
    /// Process-local, lost on exit. Single-node testing only.
    Memory,
    /// Single-file redb database
    #[default]
    Redb,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct KvdbConfig {
    pub backend: KvdbBackend,
    /// Database file for the redb backend
    pub path: PathBuf,
}

impl Default for KvdbConfig {
    fn default() -> Self {
        Self {
            backend: KvdbBackend::Redb,
            path: PathBuf::from("/var/lib/openvolume/kvdb.redb"),
        }
    }
}

/// A driver to bring up at startup
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DriverConfig {
    /// Registered driver name, e.g. "nfs"
    pub name: String,
    /// Backend-defined parameters, validated by the driver itself
    #[serde(default)]
    pub params: HashMap<String, String>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = Config::default();
        assert_eq!(config.kvdb.backend, KvdbBackend::Redb);
        assert!(config.drivers.is_empty());
        assert_eq!(config.logging.level, "info");
    }

    #[test]
    fn test_resolved_id() {
        let mut node = NodeConfig::default();
        assert!(!node.resolved_id().is_empty());
        node.id = "node-1".into();
        assert_eq!(node.resolved_id(), "node-1");
    }

    #[test]
    fn test_partial_json_uses_defaults() {
        let config: Config = serde_json::from_str(
            r#"{"kvdb":{"backend":"memory"},"drivers":[{"name":"nfs","params":{"path":"/export"}}]}"#,
        )
        .unwrap();
        assert_eq!(config.kvdb.backend, KvdbBackend::Memory);
        assert_eq!(config.kvdb.path, KvdbConfig::default().path);
        assert_eq!(config.drivers[0].params["path"], "/export");
        assert_eq!(config.node.ip, "127.0.0.1");
    }
}
