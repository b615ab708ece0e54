use std::time::Duration;

use ballot_common::config::validate;
use ballot_common::error::{BallotError, Result};
use ballot_common::types::ClusterConfig;

/// Timing and batching knobs of one server.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RaftConfig {
    pub election_timeout_min: Duration,
    pub election_timeout_max: Duration,
    pub heartbeat_interval: Duration,
    pub max_entries_per_append: usize,
}

impl Default for RaftConfig {
    fn default() -> Self {
        Self {
            election_timeout_min: Duration::from_millis(150),
            election_timeout_max: Duration::from_millis(300),
            heartbeat_interval: Duration::from_millis(50),
            max_entries_per_append: 64,
        }
    }
}

impl RaftConfig {
    pub fn with_election_timeout(mut self, min: Duration, max: Duration) -> Self {
        self.election_timeout_min = min;
        self.election_timeout_max = max;
        self
    }

    pub fn with_heartbeat_interval(mut self, interval: Duration) -> Self {
        self.heartbeat_interval = interval;
        self
    }

    pub fn validate(&self) -> Result<()> {
        if self.election_timeout_min.is_zero() {
            return Err(BallotError::Config(
                "election timeout must be positive".into(),
            ));
        }
        if self.election_timeout_min > self.election_timeout_max {
            return Err(BallotError::Config(format!(
                "election timeout range {:?}..{:?} is empty",
                self.election_timeout_min, self.election_timeout_max
            )));
        }
        if self.heartbeat_interval >= self.election_timeout_min {
            return Err(BallotError::Config(
                "heartbeat interval must be below the election timeout".into(),
            ));
        }
        if self.max_entries_per_append == 0 {
            return Err(BallotError::Config(
                "max_entries_per_append must be positive".into(),
            ));
        }
        Ok(())
    }
}

impl TryFrom<&ClusterConfig> for RaftConfig {
    type Error = BallotError;

    fn try_from(cluster: &ClusterConfig) -> Result<Self> {
        validate(cluster)?;
        Ok(Self {
            election_timeout_min: Duration::from_millis(cluster.election_timeout_min_ms),
            election_timeout_max: Duration::from_millis(cluster.election_timeout_max_ms),
            heartbeat_interval: Duration::from_millis(cluster.heartbeat_interval_ms),
            max_entries_per_append: cluster.max_entries_per_append,
        })
    }
}
