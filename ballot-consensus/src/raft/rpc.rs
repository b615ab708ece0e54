use super::log::LogEntry;
use ballot_common::types::{LogIndex, NodeId, Term};
use serde::{Deserialize, Serialize};

/// Sent by leader to replicate log entries or as heartbeat
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AppendEntriesRequest {
    pub term: Term,               // Leader’s term
    pub leader_id: NodeId,        // Leader's ID
    pub prev_log_index: LogIndex, // Index of log entry before new ones
    pub prev_log_term: Term,      // Term of that entry
    pub entries: Vec<LogEntry>,   // New log entries to store
    pub leader_commit: LogIndex,  // Leader’s commit index
}

/// Response from follower to AppendEntries RPC
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AppendEntriesResponse {
    pub term: Term,    // Current term (may be newer)
    pub success: bool, // True if follower matched prev entry and stored entries
}

/// RequestVote RPC: Candidate → Peer
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RequestVoteRequest {
    pub term: Term,
    pub candidate_id: NodeId,
    pub last_log_index: LogIndex,
    pub last_log_term: Term,
}

/// Response to RequestVote
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RequestVoteResponse {
    pub term: Term,
    pub vote_granted: bool,
}

/// Every RPC a server accepts. Handlers match on this exhaustively.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum RpcRequest {
    RequestVote(RequestVoteRequest),
    AppendEntries(AppendEntriesRequest),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum RpcResponse {
    RequestVote(RequestVoteResponse),
    AppendEntries(AppendEntriesResponse),
}

impl RpcRequest {
    pub fn term(&self) -> Term {
        match self {
            RpcRequest::RequestVote(req) => req.term,
            RpcRequest::AppendEntries(req) => req.term,
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            RpcRequest::RequestVote(_) => "RequestVote",
            RpcRequest::AppendEntries(_) => "AppendEntries",
        }
    }
}

impl RpcResponse {
    pub fn term(&self) -> Term {
        match self {
            RpcResponse::RequestVote(resp) => resp.term,
            RpcResponse::AppendEntries(resp) => resp.term,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::raft::log::LogEntryType;

    #[test]
    fn test_serialize_append_entries() {
        let req = RpcRequest::AppendEntries(AppendEntriesRequest {
            term: 1,
            leader_id: "leader1".into(),
            prev_log_index: 0,
            prev_log_term: 0,
            entries: vec![LogEntry {
                term: 1,
                index: 1,
                entry_type: LogEntryType::Noop,
                data: vec![],
            }],
            leader_commit: 0,
        });

        let encoded = bincode::serialize(&req).unwrap();
        let decoded: RpcRequest = bincode::deserialize(&encoded).unwrap();

        assert_eq!(decoded, req);
        assert_eq!(decoded.kind(), "AppendEntries");
    }

    #[test]
    fn test_term_accessors() {
        let req = RpcRequest::RequestVote(RequestVoteRequest {
            term: 4,
            candidate_id: "c".into(),
            last_log_index: 2,
            last_log_term: 1,
        });
        let resp = RpcResponse::AppendEntries(AppendEntriesResponse {
            term: 6,
            success: false,
        });

        assert_eq!(req.term(), 4);
        assert_eq!(req.kind(), "RequestVote");
        assert_eq!(resp.term(), 6);
    }
}
