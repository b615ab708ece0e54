//! Common test utilities for ballot-consensus tests.
#![allow(dead_code)]

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use ballot_common::error::{BallotError, Result};
use ballot_common::types::{ClusterConfig, NodeAddress, NodeId, Term};
use ballot_consensus::{
    AppendEntriesResponse, RaftConfig, RequestVoteResponse, Role, RpcRequest, RpcResponse, Server,
    StateMachine, Status, Transport,
};
use serde::{Deserialize, Serialize};

/// Install a test-friendly tracing subscriber once per binary.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_test_writer()
        .with_env_filter("ballot_consensus=debug")
        .try_init();
}

/// Timeouts long enough that no timer fires during a test.
pub fn quiet_config() -> RaftConfig {
    RaftConfig::default()
        .with_election_timeout(Duration::from_secs(30), Duration::from_secs(60))
        .with_heartbeat_interval(Duration::from_millis(20))
}

/// Timeouts short enough for real elections inside a test.
pub fn fast_config() -> RaftConfig {
    RaftConfig::default()
        .with_election_timeout(Duration::from_millis(150), Duration::from_millis(300))
        .with_heartbeat_interval(Duration::from_millis(30))
}

/// Cluster of `size` members named n1..nN with test-speed timing.
pub fn cluster_config(size: usize) -> ClusterConfig {
    let nodes = (1..=size)
        .map(|i| NodeAddress {
            host: "127.0.0.1".into(),
            port: 7000 + i as u16,
            node_id: format!("n{i}"),
        })
        .collect();
    let mut config = ClusterConfig::new(nodes);
    config.election_timeout_min_ms = 150;
    config.election_timeout_max_ms = 300;
    config.heartbeat_interval_ms = 30;
    config
}

/// Polls a condition until it holds or `timeout` passes.
pub async fn wait_until<F>(timeout: Duration, mut check: F) -> bool
where
    F: FnMut() -> bool,
{
    let start = Instant::now();
    while start.elapsed() < timeout {
        if check() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    false
}

/// Polls `server` until its status satisfies `check`.
pub async fn wait_for_status<F>(server: &Server, timeout: Duration, check: F) -> bool
where
    F: Fn(&Status) -> bool,
{
    let start = Instant::now();
    while start.elapsed() < timeout {
        if check(&server.status().await) {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    false
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum KvCommand {
    Set { key: String, value: String },
    Get { key: String },
}

/// Key-value store applied by the cluster. The map is shared so tests can
/// read it while the server owns the store.
#[derive(Debug, Default, Clone)]
pub struct KvStore {
    pub data: Arc<Mutex<HashMap<String, String>>>,
}

impl KvStore {
    pub fn get(&self, key: &str) -> Option<String> {
        self.data.lock().unwrap().get(key).cloned()
    }
}

impl StateMachine for KvStore {
    type Command = KvCommand;
    type Response = Option<String>;

    fn apply(&mut self, command: KvCommand) -> anyhow::Result<Option<String>> {
        let mut data = self
            .data
            .lock()
            .map_err(|_| anyhow::anyhow!("kv store poisoned"))?;
        Ok(match command {
            KvCommand::Set { key, value } => data.insert(key, value),
            KvCommand::Get { key } => data.get(&key).cloned(),
        })
    }
}

/// How a scripted peer answers RequestVote.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Vote {
    Grant,
    Deny,
    /// Reply at a newer term, denying.
    HigherTerm(Term),
    /// Unreachable.
    Silent,
}

/// Transport whose peers answer from a fixed script. AppendEntries always
/// succeeds at the leader's term.
#[derive(Debug, Default)]
pub struct ScriptedTransport {
    votes: Mutex<HashMap<NodeId, Vote>>,
    pub requests: Mutex<Vec<(NodeId, RpcRequest)>>,
}

impl ScriptedTransport {
    pub fn new(script: &[(&str, Vote)]) -> Arc<Self> {
        let votes = script
            .iter()
            .map(|(peer, vote)| (peer.to_string(), *vote))
            .collect();
        Arc::new(Self {
            votes: Mutex::new(votes),
            requests: Mutex::new(Vec::new()),
        })
    }

    pub fn vote_requests(&self) -> usize {
        self.requests
            .lock()
            .unwrap()
            .iter()
            .filter(|(_, r)| matches!(r, RpcRequest::RequestVote(_)))
            .count()
    }
}

#[async_trait]
impl Transport for ScriptedTransport {
    async fn send(&self, target: &NodeId, request: RpcRequest) -> Result<RpcResponse> {
        self.requests
            .lock()
            .unwrap()
            .push((target.clone(), request.clone()));
        let vote = self
            .votes
            .lock()
            .unwrap()
            .get(target)
            .copied()
            .unwrap_or(Vote::Silent);

        match (request, vote) {
            (_, Vote::Silent) => Err(BallotError::Transport(format!("{} unreachable", target))),
            (RpcRequest::RequestVote(req), Vote::Grant) => {
                Ok(RpcResponse::RequestVote(RequestVoteResponse {
                    term: req.term,
                    vote_granted: true,
                }))
            }
            (RpcRequest::RequestVote(req), Vote::Deny) => {
                Ok(RpcResponse::RequestVote(RequestVoteResponse {
                    term: req.term,
                    vote_granted: false,
                }))
            }
            (RpcRequest::RequestVote(_), Vote::HigherTerm(term)) => {
                Ok(RpcResponse::RequestVote(RequestVoteResponse {
                    term,
                    vote_granted: false,
                }))
            }
            (RpcRequest::AppendEntries(req), _) => {
                Ok(RpcResponse::AppendEntries(AppendEntriesResponse {
                    term: req.term,
                    success: true,
                }))
            }
        }
    }
}

/// In-process network connecting test servers, with partitions.
#[derive(Default)]
pub struct LocalNetwork {
    servers: Mutex<HashMap<NodeId, Server>>,
    isolated: Mutex<HashSet<NodeId>>,
}

impl LocalNetwork {
    pub fn register(&self, server: Server) {
        self.servers
            .lock()
            .unwrap()
            .insert(server.id().clone(), server);
    }

    pub fn isolate(&self, id: &str) {
        self.isolated.lock().unwrap().insert(id.to_string());
    }

    pub fn heal(&self, id: &str) {
        self.isolated.lock().unwrap().remove(id);
    }

    pub fn is_isolated(&self, id: &str) -> bool {
        self.isolated.lock().unwrap().contains(id)
    }

    pub fn clear(&self) {
        self.servers.lock().unwrap().clear();
    }
}

/// One server's view of the [`LocalNetwork`].
pub struct LocalTransport {
    from: NodeId,
    network: Arc<LocalNetwork>,
}

#[async_trait]
impl Transport for LocalTransport {
    async fn send(&self, target: &NodeId, request: RpcRequest) -> Result<RpcResponse> {
        if self.network.is_isolated(&self.from) || self.network.is_isolated(target) {
            return Err(BallotError::Transport(format!(
                "{} -> {} partitioned",
                self.from, target
            )));
        }
        let server = self
            .network
            .servers
            .lock()
            .unwrap()
            .get(target)
            .cloned()
            .ok_or_else(|| BallotError::Transport(format!("no route to {}", target)))?;
        server.handle_rpc(request).await
    }
}

/// Test context that holds a running cluster and its stores.
pub struct TestCluster {
    pub network: Arc<LocalNetwork>,
    pub servers: Vec<Server>,
    pub stores: Vec<KvStore>,
}

impl TestCluster {
    /// Start `size` servers named n1..nN, each joined to all others.
    pub async fn new(size: usize) -> Self {
        init_tracing();
        let network = Arc::new(LocalNetwork::default());
        let cluster = cluster_config(size);
        let config = RaftConfig::try_from(&cluster).expect("Invalid config");

        let mut servers = Vec::with_capacity(size);
        let mut stores = Vec::with_capacity(size);
        for node in &cluster.nodes {
            let store = KvStore::default();
            let server = Server::builder(node.node_id.clone())
                .config(config.clone())
                .transport(Arc::new(LocalTransport {
                    from: node.node_id.clone(),
                    network: Arc::clone(&network),
                }))
                .applier(store.clone())
                .build()
                .expect("Invalid config");
            network.register(server.clone());
            servers.push(server);
            stores.push(store);
        }

        for server in &servers {
            server.start().await.expect("Failed to start server");
            for peer in cluster.peers_of(server.id()) {
                server.join(peer).await.expect("Failed to join");
            }
        }

        Self {
            network,
            servers,
            stores,
        }
    }

    pub fn server(&self, id: &str) -> &Server {
        self.servers
            .iter()
            .find(|s| s.id() == id)
            .expect("unknown server")
    }

    /// Leader among reachable servers with the highest term.
    pub async fn leader(&self) -> Option<Server> {
        let mut best: Option<(Term, Server)> = None;
        for server in &self.servers {
            if self.network.is_isolated(server.id()) {
                continue;
            }
            if server.state().await == Role::Leader {
                let term = server.term().await;
                if best.as_ref().map(|(t, _)| term > *t).unwrap_or(true) {
                    best = Some((term, server.clone()));
                }
            }
        }
        best.map(|(_, server)| server)
    }

    /// Wait for a leader to be elected.
    pub async fn wait_for_leader(&self, timeout: Duration) -> Option<Server> {
        let start = Instant::now();
        while start.elapsed() < timeout {
            if let Some(leader) = self.leader().await {
                return Some(leader);
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        None
    }

    /// Shutdown all servers.
    pub async fn shutdown(&self) {
        for server in &self.servers {
            server.stop().await;
        }
        self.network.clear();
    }
}
