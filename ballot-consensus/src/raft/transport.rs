use async_trait::async_trait;
use ballot_common::error::Result;
use ballot_common::types::NodeId;

use crate::raft::rpc::{RpcRequest, RpcResponse};

/// Outbound half of the network. Implementations encode the request, deliver
/// it to `target` and hand back its decoded reply; retries and timeouts are
/// theirs to decide.
#[async_trait]
pub trait Transport: Send + Sync + 'static {
    async fn send(&self, target: &NodeId, request: RpcRequest) -> Result<RpcResponse>;
}

/// Transport for a server that never has peers.
#[derive(Debug, Default)]
pub struct NullTransport;

#[async_trait]
impl Transport for NullTransport {
    async fn send(&self, target: &NodeId, request: RpcRequest) -> Result<RpcResponse> {
        Err(ballot_common::error::BallotError::Transport(format!(
            "no route to {} for {}",
            target,
            request.kind()
        )))
    }
}
