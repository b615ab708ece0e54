use ballot_common::error::Result;
use ballot_common::types::{LogIndex, NodeId, Term};

use crate::raft::rpc::RpcResponse;

/// What a leader sent in one AppendEntries call, kept so the reply can be
/// matched to it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AppendProgress {
    pub term: Term,
    pub prev_log_index: LogIndex,
    pub entry_count: u64,
}

/// Everything that reaches the server's driver task. Each is handled under
/// the same lock as inbound RPCs.
#[derive(Debug)]
pub enum Event {
    /// The election timer ran out; `epoch` identifies the countdown.
    ElectionTimeout { epoch: u64 },
    /// Leader heartbeat tick.
    Heartbeat,
    VoteResponse {
        peer: NodeId,
        term: Term,
        result: Result<RpcResponse>,
    },
    AppendEntriesResponse {
        peer: NodeId,
        progress: AppendProgress,
        result: Result<RpcResponse>,
    },
}
