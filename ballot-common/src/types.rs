pub type NodeId = String;
pub type Term = u64;
pub type LogIndex = u64;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeAddress {
    pub host: String,
    pub port: u16,
    pub node_id: NodeId,
}

/// Static description of a cluster: its members and the timing every
/// member runs with.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClusterConfig {
    pub nodes: Vec<NodeAddress>,
    #[serde(default = "default_election_timeout_min_ms")]
    pub election_timeout_min_ms: u64,
    #[serde(default = "default_election_timeout_max_ms")]
    pub election_timeout_max_ms: u64,
    #[serde(default = "default_heartbeat_interval_ms")]
    pub heartbeat_interval_ms: u64,
    #[serde(default = "default_max_entries_per_append")]
    pub max_entries_per_append: usize,
}

fn default_election_timeout_min_ms() -> u64 {
    150
}

fn default_election_timeout_max_ms() -> u64 {
    300
}

fn default_heartbeat_interval_ms() -> u64 {
    50
}

fn default_max_entries_per_append() -> usize {
    64
}

impl ClusterConfig {
    pub fn new(nodes: Vec<NodeAddress>) -> Self {
        Self {
            nodes,
            election_timeout_min_ms: default_election_timeout_min_ms(),
            election_timeout_max_ms: default_election_timeout_max_ms(),
            heartbeat_interval_ms: default_heartbeat_interval_ms(),
            max_entries_per_append: default_max_entries_per_append(),
        }
    }

    /// Every member except `node_id`.
    pub fn peers_of(&self, node_id: &str) -> Vec<NodeId> {
        self.nodes
            .iter()
            .filter(|n| n.node_id != node_id)
            .map(|n| n.node_id.clone())
            .collect()
    }
}
