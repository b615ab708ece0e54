//! Raft leader election and log replication.
//!
//! [`RaftNode`] is the synchronous state machine; [`Server`] wraps it with
//! election and heartbeat timers, an event driver and RPC fan-out over a
//! pluggable [`Transport`].
pub mod raft;

pub use raft::config::RaftConfig;
pub use raft::ledger::{HardState, TermLedger};
pub use raft::log::{LogEntry, LogEntryType, LogPosition, LogStore, MemoryLog};
pub use raft::node::{Campaign, RaftNode, Role, Status, VoteOutcome};
pub use raft::peers::{JoinOutcome, PeerSet};
pub use raft::persist::{FileHardStateStorage, HardStateStorage, MemoryHardStateStorage};
pub use raft::rpc::{
    AppendEntriesRequest, AppendEntriesResponse, RequestVoteRequest, RequestVoteResponse,
    RpcRequest, RpcResponse,
};
pub use raft::server::{Server, ServerBuilder};
pub use raft::state_machine::{CommandApplier, NoopApplier, StateMachine};
pub use raft::transport::{NullTransport, Transport};
