use std::collections::HashMap;
use std::sync::atomic::AtomicU64;
use std::sync::{Arc, Weak};

use ballot_common::error::{BallotError, Result};
use ballot_common::types::{LogIndex, NodeId, Term};
use serde::de::DeserializeOwned;
use serde::Serialize;
use tokio::sync::{mpsc, oneshot, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::raft::config::RaftConfig;
use crate::raft::event::{AppendProgress, Event};
use crate::raft::log::{LogStore, MemoryLog};
use crate::raft::node::{Campaign, RaftNode, Role, Status, VoteOutcome};
use crate::raft::persist::{HardStateStorage, MemoryHardStateStorage};
use crate::raft::rpc::{
    AppendEntriesRequest, AppendEntriesResponse, RequestVoteRequest, RequestVoteResponse,
    RpcRequest, RpcResponse,
};
use crate::raft::state_machine::{CommandApplier, NoopApplier};
use crate::raft::timer::{ElectionTimer, HeartbeatTicker};
use crate::raft::transport::{NullTransport, Transport};

type Reply = oneshot::Sender<Result<Vec<u8>>>;

/// A consensus server: a [`RaftNode`] plus the timers, driver task and
/// outbound RPC fan-out that keep it moving.
///
/// Inbound RPCs, timer events and RPC replies are all applied under one
/// lock, so the node only ever sees one of them at a time. Cloning yields
/// another handle to the same server.
#[derive(Clone)]
pub struct Server {
    inner: Arc<Inner>,
}

struct Inner {
    id: NodeId,
    config: RaftConfig,
    transport: Arc<dyn Transport>,
    core: Mutex<Core>,
}

struct Core {
    node: RaftNode,
    session: Option<Session>,
    last_role: Role,
    pending: HashMap<LogIndex, Reply>,
}

/// Everything that exists only while the server is running.
struct Session {
    events_tx: mpsc::UnboundedSender<Event>,
    driver: JoinHandle<()>,
    epoch: Arc<AtomicU64>,
    election_timer: Option<ElectionTimer>,
    heartbeat: Option<HeartbeatTicker>,
}

impl Session {
    fn reset_election_timer(&self) {
        if let Some(timer) = &self.election_timer {
            timer.reset();
        }
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        self.driver.abort();
    }
}

/// Builder for [`Server`]. Defaults to in-memory log and hard state, a
/// no-op applier and a transport with no routes.
pub struct ServerBuilder {
    id: NodeId,
    config: RaftConfig,
    transport: Arc<dyn Transport>,
    log: Box<dyn LogStore>,
    hard_state: Box<dyn HardStateStorage>,
    applier: Box<dyn CommandApplier>,
}

impl ServerBuilder {
    pub fn new(id: impl Into<NodeId>) -> Self {
        Self {
            id: id.into(),
            config: RaftConfig::default(),
            transport: Arc::new(NullTransport),
            log: Box::new(MemoryLog::new()),
            hard_state: Box::new(MemoryHardStateStorage::new()),
            applier: Box::new(NoopApplier),
        }
    }

    pub fn config(mut self, config: RaftConfig) -> Self {
        self.config = config;
        self
    }

    pub fn transport(mut self, transport: Arc<dyn Transport>) -> Self {
        self.transport = transport;
        self
    }

    pub fn log(mut self, log: impl LogStore + 'static) -> Self {
        self.log = Box::new(log);
        self
    }

    pub fn hard_state(mut self, storage: impl HardStateStorage + 'static) -> Self {
        self.hard_state = Box::new(storage);
        self
    }

    /// Any [`StateMachine`](crate::raft::state_machine::StateMachine) works here.
    pub fn applier(mut self, applier: impl CommandApplier + 'static) -> Self {
        self.applier = Box::new(applier);
        self
    }

    pub fn build(self) -> Result<Server> {
        self.config.validate()?;

        let node = RaftNode::new(self.id.clone(), self.log, self.hard_state, self.applier)
            .with_max_entries_per_append(self.config.max_entries_per_append);

        Ok(Server {
            inner: Arc::new(Inner {
                id: self.id,
                config: self.config,
                transport: self.transport,
                core: Mutex::new(Core {
                    node,
                    session: None,
                    last_role: Role::Stopped,
                    pending: HashMap::new(),
                }),
            }),
        })
    }
}

impl Server {
    pub fn builder(id: impl Into<NodeId>) -> ServerBuilder {
        ServerBuilder::new(id)
    }

    pub fn id(&self) -> &NodeId {
        &self.inner.id
    }

    /// Brings the server up as a follower and starts its election timer.
    pub async fn start(&self) -> Result<()> {
        let mut guard = self.inner.core.lock().await;
        let core = &mut *guard;
        core.node.start()?;

        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let driver = tokio::spawn(drive(Arc::downgrade(&self.inner), events_rx));
        let epoch = Arc::new(AtomicU64::new(0));
        let election_timer = ElectionTimer::spawn(
            self.inner.config.election_timeout_min,
            self.inner.config.election_timeout_max,
            Arc::clone(&epoch),
            events_tx.clone(),
        );

        core.session = Some(Session {
            events_tx,
            driver,
            epoch,
            election_timer: Some(election_timer),
            heartbeat: None,
        });
        core.last_role = core.node.role();
        info!(node_id = %self.inner.id, term = core.node.current_term(), "Server started");
        Ok(())
    }

    /// Stops timers and the driver; waiting proposals fail with `NotRunning`.
    /// Stopping a stopped server does nothing.
    pub async fn stop(&self) {
        let mut guard = self.inner.core.lock().await;
        let core = &mut *guard;
        if core.node.role() == Role::Stopped {
            return;
        }

        core.node.stop();
        core.session = None;
        core.last_role = Role::Stopped;
        for (_, reply) in core.pending.drain() {
            let _ = reply.send(Err(BallotError::NotRunning));
        }
        info!(node_id = %self.inner.id, "Server stopped");
    }

    /// Adds a member. Joining only ourselves as the first member
    /// bootstraps a one-node cluster with this server as leader.
    pub async fn join(&self, peer: impl Into<NodeId>) -> Result<()> {
        let peer = peer.into();
        let mut guard = self.inner.core.lock().await;
        let core = &mut *guard;

        let result = match core.node.join(&peer) {
            Ok(Some(campaign)) => {
                self.inner.campaign(core, campaign);
                Ok(())
            }
            Ok(None) => Ok(()),
            Err(e) => Err(e),
        };
        self.inner.settle(core);
        result
    }

    pub async fn leave(&self, peer: impl Into<NodeId>) -> Result<()> {
        let peer = peer.into();
        let mut guard = self.inner.core.lock().await;
        let core = &mut *guard;

        let result = core.node.leave(&peer);
        self.inner.settle(core);
        result
    }

    /// Opens an election now, regardless of the timer. No-op for a leader.
    pub async fn start_election(&self) -> Result<()> {
        let mut guard = self.inner.core.lock().await;
        let core = &mut *guard;

        let result = match core.node.start_election() {
            Ok(Some(campaign)) => {
                self.inner.campaign(core, campaign);
                Ok(())
            }
            Ok(None) => Ok(()),
            Err(e) => Err(e),
        };
        self.inner.settle(core);
        result
    }

    /// Inbound RequestVote.
    pub async fn request_vote(&self, req: RequestVoteRequest) -> Result<RequestVoteResponse> {
        let mut guard = self.inner.core.lock().await;
        let core = &mut *guard;

        // A failed save can still have changed the role, so settle either way.
        let result = core.node.handle_request_vote(&req);
        if matches!(&result, Ok(resp) if resp.vote_granted) {
            if let Some(session) = &core.session {
                session.reset_election_timer();
            }
        }
        self.inner.settle(core);
        result
    }

    /// Inbound AppendEntries.
    pub async fn append_entries(
        &self,
        req: AppendEntriesRequest,
    ) -> Result<AppendEntriesResponse> {
        let mut guard = self.inner.core.lock().await;
        let core = &mut *guard;

        let result = core.node.handle_append_entries(&req);
        // Same term in the reply means the sender is our current leader.
        let from_leader = matches!(&result, Ok(resp) if resp.term == req.term);
        if from_leader && core.node.role() == Role::Follower {
            if let Some(session) = &core.session {
                session.reset_election_timer();
            }
        }
        self.inner.settle(core);
        result
    }

    /// Dispatches an inbound RPC to its handler.
    pub async fn handle_rpc(&self, request: RpcRequest) -> Result<RpcResponse> {
        debug!(
            node_id = %self.inner.id,
            kind = request.kind(),
            term = request.term(),
            "Handling RPC"
        );
        match request {
            RpcRequest::RequestVote(req) => {
                self.request_vote(req).await.map(RpcResponse::RequestVote)
            }
            RpcRequest::AppendEntries(req) => {
                self.append_entries(req).await.map(RpcResponse::AppendEntries)
            }
        }
    }

    /// Replicates an opaque command and waits for the applier's output.
    pub async fn propose_bytes(&self, command: Vec<u8>) -> Result<Vec<u8>> {
        let rx = {
            let mut guard = self.inner.core.lock().await;
            let core = &mut *guard;

            let index = core.node.propose(command)?;
            let (tx, rx) = oneshot::channel();
            core.pending.insert(index, tx);
            self.inner.settle(core);
            self.inner.replicate(core);
            rx
        };

        rx.await.map_err(|_| BallotError::ProposalDropped)?
    }

    /// Typed wrapper over [`Server::propose_bytes`] for a
    /// [`StateMachine`](crate::raft::state_machine::StateMachine) applier.
    pub async fn propose<C, R>(&self, command: &C) -> Result<R>
    where
        C: Serialize,
        R: DeserializeOwned,
    {
        let encoded = bincode::serialize(command)?;
        let response = self.propose_bytes(encoded).await?;
        Ok(bincode::deserialize(&response)?)
    }

    pub async fn state(&self) -> Role {
        self.inner.core.lock().await.node.role()
    }

    pub async fn term(&self) -> Term {
        self.inner.core.lock().await.node.current_term()
    }

    pub async fn leader_id(&self) -> Option<NodeId> {
        self.inner.core.lock().await.node.leader_id().cloned()
    }

    pub async fn status(&self) -> Status {
        self.inner.core.lock().await.node.status()
    }
}

/// Driver loop: feeds timer ticks and RPC replies into the node.
async fn drive(inner: Weak<Inner>, mut events: mpsc::UnboundedReceiver<Event>) {
    while let Some(event) = events.recv().await {
        let Some(inner) = inner.upgrade() else {
            break;
        };
        inner.handle_event(event).await;
    }
}

impl Inner {
    async fn handle_event(&self, event: Event) {
        let mut guard = self.core.lock().await;
        let core = &mut *guard;
        if core.session.is_none() {
            return;
        }

        match event {
            Event::ElectionTimeout { epoch } => self.on_election_timeout(core, epoch),
            Event::Heartbeat => self.replicate(core),
            Event::VoteResponse { peer, term, result } => match result {
                Ok(RpcResponse::RequestVote(resp)) => {
                    match core.node.handle_vote_response(&peer, term, &resp) {
                        Ok(VoteOutcome::Won) => {
                            info!(node_id = %self.id, term, "Won election");
                        }
                        Ok(_) => {}
                        Err(e) => error!(node_id = %self.id, error = %e, "Failed to count vote"),
                    }
                }
                Ok(other) => warn!(
                    node_id = %self.id,
                    peer = %peer,
                    term = other.term(),
                    response = ?other,
                    "Unexpected reply to RequestVote"
                ),
                Err(e) => debug!(
                    node_id = %self.id,
                    peer = %peer,
                    error = %e,
                    "RequestVote failed"
                ),
            },
            Event::AppendEntriesResponse {
                peer,
                progress,
                result,
            } => match result {
                Ok(RpcResponse::AppendEntries(resp)) => {
                    if let Err(e) = core
                        .node
                        .handle_append_entries_response(&peer, &progress, &resp)
                    {
                        error!(
                            node_id = %self.id,
                            error = %e,
                            "Failed to process AppendEntries reply"
                        );
                    }
                }
                Ok(other) => warn!(
                    node_id = %self.id,
                    peer = %peer,
                    term = other.term(),
                    response = ?other,
                    "Unexpected reply to AppendEntries"
                ),
                Err(e) => debug!(
                    node_id = %self.id,
                    peer = %peer,
                    error = %e,
                    "AppendEntries failed"
                ),
            },
        }

        self.settle(core);
    }

    fn on_election_timeout(&self, core: &mut Core, epoch: u64) {
        let Some(session) = &core.session else {
            return;
        };
        let current = session
            .election_timer
            .as_ref()
            .map(|timer| timer.is_current(epoch))
            .unwrap_or(false);
        if !current {
            debug!(node_id = %self.id, epoch, "Ignoring stale election timeout");
            return;
        }
        // Until a join, a lone server has nobody to campaign for.
        if !core.node.peers().is_joined() || core.node.role() == Role::Leader {
            return;
        }

        info!(
            node_id = %self.id,
            term = core.node.current_term(),
            "Election timeout elapsed"
        );
        match core.node.start_election() {
            Ok(Some(campaign)) => self.campaign(core, campaign),
            Ok(None) => {}
            Err(e) => error!(node_id = %self.id, error = %e, "Failed to start election"),
        }
    }

    /// Sends the campaign's RequestVote to each peer; replies come back as
    /// [`Event::VoteResponse`].
    fn campaign(&self, core: &Core, campaign: Campaign) {
        let Some(session) = &core.session else {
            return;
        };
        session.reset_election_timer();

        for peer in campaign.peers {
            let transport = Arc::clone(&self.transport);
            let events = session.events_tx.clone();
            let request = RpcRequest::RequestVote(campaign.request.clone());
            let term = campaign.term;

            tokio::spawn(async move {
                let result = transport.send(&peer, request).await;
                let _ = events.send(Event::VoteResponse { peer, term, result });
            });
        }
    }

    /// Sends AppendEntries to every peer if leading.
    fn replicate(&self, core: &Core) {
        let Some(session) = &core.session else {
            return;
        };

        for (peer, request) in core.node.append_requests() {
            let transport = Arc::clone(&self.transport);
            let events = session.events_tx.clone();
            let progress = AppendProgress {
                term: request.term,
                prev_log_index: request.prev_log_index,
                entry_count: request.entries.len() as u64,
            };

            tokio::spawn(async move {
                let result = transport
                    .send(&peer, RpcRequest::AppendEntries(request))
                    .await;
                let _ = events.send(Event::AppendEntriesResponse {
                    peer,
                    progress,
                    result,
                });
            });
        }
    }

    /// Runs after every state change: hands applied results to waiting
    /// proposers and swaps timers when the role changed.
    fn settle(&self, core: &mut Core) {
        for (index, result) in core.node.apply_committed() {
            if let Some(reply) = core.pending.remove(&index) {
                let _ = reply.send(result);
            }
        }

        let role = core.node.role();
        if role == core.last_role {
            return;
        }
        let previous = std::mem::replace(&mut core.last_role, role);
        let Some(session) = core.session.as_mut() else {
            return;
        };

        match role {
            Role::Leader => {
                session.election_timer = None;
                session.heartbeat = Some(HeartbeatTicker::spawn(
                    self.config.heartbeat_interval,
                    session.events_tx.clone(),
                ));
            }
            Role::Follower | Role::Candidate => {
                session.heartbeat = None;
                match &session.election_timer {
                    Some(timer) => timer.reset(),
                    None => {
                        session.election_timer = Some(ElectionTimer::spawn(
                            self.config.election_timeout_min,
                            self.config.election_timeout_max,
                            Arc::clone(&session.epoch),
                            session.events_tx.clone(),
                        ));
                    }
                }
            }
            Role::Stopped => {}
        }

        if previous == Role::Leader && role != Role::Leader {
            let hint = core.node.leader_id().cloned();
            for (_, reply) in core.pending.drain() {
                let _ = reply.send(Err(BallotError::NotLeader(hint.clone())));
            }
        }

        debug!(node_id = %self.id, from = %previous, to = %role, "Role changed");
    }
}
