use crate::types::NodeId;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum BallotError {
    #[error("I/O Error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization Error: {0}")]
    Serde(#[from] serde_json::Error),

    #[error("Encoding Error: {0}")]
    Encoding(String),

    #[error("Configuration Error: {0}")]
    Config(String),

    #[error("Server is not running")]
    NotRunning,

    #[error("Server is already running")]
    AlreadyRunning,

    #[error("Not the leader, current leader is {0:?}")]
    NotLeader(Option<NodeId>),

    #[error("Invalid peer: {0}")]
    InvalidPeer(String),

    #[error("Transport Error: {0}")]
    Transport(String),

    #[error("Log Error: {0}")]
    Log(String),

    #[error("Apply Error: {0}")]
    Apply(String),

    #[error("Proposal dropped before it was applied")]
    ProposalDropped,

    #[error("Consensus Error: {0}")]
    Consensus(String),
}

pub type Result<T> = std::result::Result<T, BallotError>;

impl From<bincode::Error> for BallotError {
    fn from(err: bincode::Error) -> Self {
        BallotError::Encoding(err.to_string())
    }
}

impl From<anyhow::Error> for BallotError {
    fn from(err: anyhow::Error) -> Self {
        BallotError::Apply(format!("{:#}", err))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_not_leader_message_carries_hint() {
        let err = BallotError::NotLeader(Some("node-2".into()));
        assert_eq!(
            err.to_string(),
            "Not the leader, current leader is Some(\"node-2\")"
        );
    }

    #[test]
    fn test_anyhow_context_is_kept() {
        let err: BallotError = anyhow::anyhow!("disk full")
            .context("applying entry 7")
            .into();

        match err {
            BallotError::Apply(msg) => assert_eq!(msg, "applying entry 7: disk full"),
            other => panic!("unexpected error: {other:?}"),
        }
    }
}
