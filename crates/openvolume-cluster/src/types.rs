//! Cluster record types

use chrono::{DateTime, Utc};
use derive_more::Display;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Lifecycle status of the cluster as a whole
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize, Display)]
#[serde(rename_all = "lowercase")]
pub enum ClusterStatus {
    /// No node has completed bootstrap yet
    #[default]
    #[display("initializing")]
    Initializing,
    #[display("ok")]
    Ok,
    #[display("offline")]
    Offline,
    #[display("error")]
    Error,
}

/// Health of a single member node
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize, Display)]
#[serde(rename_all = "lowercase")]
pub enum NodeStatus {
    #[default]
    #[display("up")]
    Up,
    #[display("down")]
    Down,
    #[display("degraded")]
    Degraded,
}

/// Cluster-level metadata
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Info {
    pub status: ClusterStatus,
}

/// A member node and its last reported resource usage
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Node {
    pub id: String,
    pub ip: String,
    /// CPU utilization in percent
    #[serde(default)]
    pub cpu: f64,
    #[serde(default)]
    pub mem_total: u64,
    #[serde(default)]
    pub mem_used: u64,
    #[serde(default)]
    pub avg_load: f64,
    #[serde(default)]
    pub status: NodeStatus,
    /// Time of the last report from this node
    pub timestamp: DateTime<Utc>,
}

impl Node {
    pub fn new(id: impl Into<String>, ip: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            ip: ip.into(),
            cpu: 0.0,
            mem_total: 0,
            mem_used: 0,
            avg_load: 0.0,
            status: NodeStatus::Up,
            timestamp: Utc::now(),
        }
    }
}

/// The aggregate cluster record
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Database {
    pub cluster: Info,
    /// Members keyed by node id
    #[serde(default)]
    pub nodes: HashMap<String, Node>,
}

impl Database {
    /// A record for a cluster nobody has bootstrapped yet
    #[must_use]
    pub fn initializing() -> Self {
        Self::default()
    }

    /// Insert or replace a node, keyed by its id
    pub fn upsert_node(&mut self, node: Node) -> Option<Node> {
        self.nodes.insert(node.id.clone(), node)
    }

    pub fn remove_node(&mut self, id: &str) -> Option<Node> {
        self.nodes.remove(id)
    }

    pub fn node(&self, id: &str) -> Option<&Node> {
        self.nodes.get(id)
    }
}
