use crate::error::{BallotError, Result};
use crate::types::ClusterConfig;
use std::collections::HashSet;
use std::fs;

/// Loads a cluster configuration from a JSON file and validates it.
pub fn load_config(path: &str) -> Result<ClusterConfig> {
    let data = fs::read_to_string(path)?;
    let config: ClusterConfig = serde_json::from_str(&data)?;
    validate(&config)?;
    Ok(config)
}

pub fn validate(config: &ClusterConfig) -> Result<()> {
    if config.nodes.is_empty() {
        return Err(BallotError::Config("cluster has no nodes".into()));
    }

    let mut seen = HashSet::new();
    for node in &config.nodes {
        if !seen.insert(node.node_id.as_str()) {
            return Err(BallotError::Config(format!(
                "duplicate node id {}",
                node.node_id
            )));
        }
    }

    if config.election_timeout_min_ms == 0 {
        return Err(BallotError::Config(
            "election_timeout_min_ms must be positive".into(),
        ));
    }
    if config.election_timeout_min_ms > config.election_timeout_max_ms {
        return Err(BallotError::Config(format!(
            "election timeout range {}..{} is empty",
            config.election_timeout_min_ms, config.election_timeout_max_ms
        )));
    }
    if config.heartbeat_interval_ms >= config.election_timeout_min_ms {
        return Err(BallotError::Config(
            "heartbeat_interval_ms must be below election_timeout_min_ms".into(),
        ));
    }
    if config.max_entries_per_append == 0 {
        return Err(BallotError::Config(
            "max_entries_per_append must be positive".into(),
        ));
    }

    Ok(())
}
