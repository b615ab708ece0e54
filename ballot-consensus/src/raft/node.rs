use std::collections::{HashMap, HashSet};
use std::fmt;

use ballot_common::error::{BallotError, Result};
use ballot_common::types::{LogIndex, NodeId, Term};
use tracing::{debug, info, warn};

use crate::raft::event::AppendProgress;
use crate::raft::ledger::{HardState, TermLedger};
use crate::raft::log::{LogEntry, LogEntryType, LogPosition, LogStore};
use crate::raft::peers::{JoinOutcome, PeerSet};
use crate::raft::persist::HardStateStorage;
use crate::raft::rpc::{
    AppendEntriesRequest, AppendEntriesResponse, RequestVoteRequest, RequestVoteResponse,
};
use crate::raft::state_machine::CommandApplier;

/// Role of the node in the cluster
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Stopped,
    Follower,
    Candidate,
    Leader,
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Role::Stopped => write!(f, "stopped"),
            Role::Follower => write!(f, "follower"),
            Role::Candidate => write!(f, "candidate"),
            Role::Leader => write!(f, "leader"),
        }
    }
}

/// Leader's view of one follower's log.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Progress {
    next_index: LogIndex,  // Next entry to send
    match_index: LogIndex, // Highest entry known to be replicated
}

/// An election this node just opened: the request to send and who to send it to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Campaign {
    pub term: Term,
    pub request: RequestVoteRequest,
    pub peers: Vec<NodeId>,
}

/// Result of counting one vote response.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VoteOutcome {
    /// Response belongs to an older election or arrived outside candidacy.
    Ignored,
    /// Response carried a newer term; this node is now a follower.
    SteppedDown,
    Pending { votes: usize, needed: usize },
    Won,
}

/// Point-in-time view of a node, for callers and tests.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Status {
    pub id: NodeId,
    pub role: Role,
    pub term: Term,
    pub voted_for: Option<NodeId>,
    pub leader_id: Option<NodeId>,
    pub peers: Vec<NodeId>,
    pub votes_received: usize,
    pub commit_index: LogIndex,
    pub last_applied: LogIndex,
    pub last_log_index: LogIndex,
    pub last_log_term: Term,
}

/// The consensus state machine of one server.
///
/// Owns the term ledger, role, membership, log and apply cursor. Every
/// method runs to completion without I/O beyond the log and hard-state
/// storage; the async [`Server`](crate::raft::server::Server) serializes
/// calls into it and carries out the network side.
pub struct RaftNode {
    id: NodeId,
    role: Role,
    ledger: TermLedger,
    persisted: HardState,
    peers: PeerSet,
    leader_id: Option<NodeId>,
    votes_received: HashSet<NodeId>,
    progress: HashMap<NodeId, Progress>,
    last_applied: LogIndex,
    max_entries_per_append: usize,
    log: Box<dyn LogStore>,
    hard_state: Box<dyn HardStateStorage>,
    applier: Box<dyn CommandApplier>,
}

impl RaftNode {
    /// Create a stopped node at term 0 with no peers
    pub fn new(
        id: NodeId,
        log: Box<dyn LogStore>,
        hard_state: Box<dyn HardStateStorage>,
        applier: Box<dyn CommandApplier>,
    ) -> Self {
        Self {
            peers: PeerSet::new(id.clone()),
            id,
            role: Role::Stopped,
            ledger: TermLedger::new(),
            persisted: HardState::default(),
            leader_id: None,
            votes_received: HashSet::new(),
            progress: HashMap::new(),
            last_applied: 0,
            max_entries_per_append: 64,
            log,
            hard_state,
            applier,
        }
    }

    pub fn with_max_entries_per_append(mut self, max: usize) -> Self {
        self.max_entries_per_append = max.max(1);
        self
    }

    pub fn id(&self) -> &NodeId {
        &self.id
    }

    pub fn role(&self) -> Role {
        self.role
    }

    pub fn current_term(&self) -> Term {
        self.ledger.current_term()
    }

    pub fn voted_for(&self) -> Option<&NodeId> {
        self.ledger.voted_for()
    }

    pub fn leader_id(&self) -> Option<&NodeId> {
        self.leader_id.as_ref()
    }

    pub fn peers(&self) -> &PeerSet {
        &self.peers
    }

    pub fn log(&self) -> &dyn LogStore {
        self.log.as_ref()
    }

    pub fn status(&self) -> Status {
        Status {
            id: self.id.clone(),
            role: self.role,
            term: self.ledger.current_term(),
            voted_for: self.ledger.voted_for().cloned(),
            leader_id: self.leader_id.clone(),
            peers: self.peers.iter().cloned().collect(),
            votes_received: self.peers.count_votes(&self.votes_received),
            commit_index: self.log.commit_index(),
            last_applied: self.last_applied,
            last_log_index: self.log.last_index(),
            last_log_term: self.log.last_term(),
        }
    }

    /// Stopped -> Follower, restoring any persisted term and vote.
    pub fn start(&mut self) -> Result<()> {
        if self.role != Role::Stopped {
            return Err(BallotError::AlreadyRunning);
        }

        if let Some(state) = self.hard_state.load()? {
            if state.current_term >= self.ledger.current_term() {
                self.persisted = state.clone();
                self.ledger = TermLedger::from(state);
            }
        }

        self.role = Role::Follower;
        info!(
            node_id = %self.id,
            term = self.ledger.current_term(),
            "Started as follower"
        );
        Ok(())
    }

    pub fn stop(&mut self) {
        if self.role == Role::Stopped {
            return;
        }
        self.role = Role::Stopped;
        self.leader_id = None;
        self.votes_received.clear();
        self.progress.clear();
        info!(node_id = %self.id, term = self.ledger.current_term(), "Stopped");
    }

    fn ensure_running(&self) -> Result<()> {
        if self.role == Role::Stopped {
            Err(BallotError::NotRunning)
        } else {
            Ok(())
        }
    }

    /// Writes term and vote through to storage if they changed since the
    /// last save.
    fn persist(&mut self) -> Result<()> {
        if self.ledger.hard_state() != &self.persisted {
            self.hard_state.save(self.ledger.hard_state())?;
            self.persisted = self.ledger.hard_state().clone();
        }
        Ok(())
    }

    /// Adopts a newer term from any request or reply. Leaders and candidates
    /// step down when it advances.
    fn observe_term(&mut self, term: Term) -> bool {
        if !self.ledger.observe_term(term) {
            return false;
        }
        self.leader_id = None;
        if matches!(self.role, Role::Leader | Role::Candidate) {
            info!(
                node_id = %self.id,
                term,
                previous = %self.role,
                "Observed higher term, stepping down"
            );
            self.become_follower();
        }
        true
    }

    fn become_follower(&mut self) {
        self.role = Role::Follower;
        self.votes_received.clear();
        self.progress.clear();
    }

    fn become_leader(&mut self) -> Result<()> {
        self.role = Role::Leader;
        self.leader_id = Some(self.id.clone());

        let next_index = self.log.last_index() + 1;
        self.progress = self
            .peers
            .iter()
            .map(|peer| {
                (
                    peer.clone(),
                    Progress {
                        next_index,
                        match_index: 0,
                    },
                )
            })
            .collect();

        info!(
            node_id = %self.id,
            term = self.ledger.current_term(),
            votes = self.peers.count_votes(&self.votes_received),
            members = self.peers.member_count(),
            "Became leader"
        );

        // Noop in the new term lets earlier entries commit under it.
        self.log.append(vec![LogEntry {
            term: self.ledger.current_term(),
            index: next_index,
            entry_type: LogEntryType::Noop,
            data: vec![],
        }])?;
        self.advance_commit_index()?;
        Ok(())
    }

    /// Decides a RequestVote call. The response reflects state after the
    /// request's effects, and any change to term or vote is persisted first.
    pub fn handle_request_vote(&mut self, req: &RequestVoteRequest) -> Result<RequestVoteResponse> {
        self.ensure_running()?;

        if req.term < self.ledger.current_term() {
            debug!(
                node_id = %self.id,
                candidate = %req.candidate_id,
                term = req.term,
                current_term = self.ledger.current_term(),
                "Rejecting vote request from stale term"
            );
            return Ok(RequestVoteResponse {
                term: self.ledger.current_term(),
                vote_granted: false,
            });
        }

        self.observe_term(req.term);

        let candidate_log = LogPosition::new(req.last_log_term, req.last_log_index);
        let vote_granted = if req.candidate_id == self.id {
            // Self-votes only happen through start_election.
            false
        } else if !candidate_log.is_up_to_date_with(&self.log.last_position()) {
            false
        } else {
            self.ledger.try_vote(req.term, &req.candidate_id)
        };

        self.persist()?;

        debug!(
            node_id = %self.id,
            candidate = %req.candidate_id,
            term = req.term,
            granted = vote_granted,
            "RequestVote response"
        );

        Ok(RequestVoteResponse {
            term: self.ledger.current_term(),
            vote_granted,
        })
    }

    /// Opens a new election: next term, vote for self, become candidate.
    /// Returns `None` when already leader. A node that is the only member
    /// wins on the spot and the returned campaign has no peers.
    pub fn start_election(&mut self) -> Result<Option<Campaign>> {
        self.ensure_running()?;
        if self.role == Role::Leader {
            return Ok(None);
        }

        let term = self.ledger.begin_election(&self.id);
        self.role = Role::Candidate;
        self.leader_id = None;
        self.progress.clear();
        self.votes_received.clear();
        self.votes_received.insert(self.id.clone());
        self.persist()?;

        let last = self.log.last_position();
        info!(
            node_id = %self.id,
            term,
            members = self.peers.member_count(),
            "Starting election"
        );

        let request = RequestVoteRequest {
            term,
            candidate_id: self.id.clone(),
            last_log_index: last.index,
            last_log_term: last.term,
        };

        if self.peers.has_quorum(&self.votes_received) {
            self.become_leader()?;
            return Ok(Some(Campaign {
                term,
                request,
                peers: Vec::new(),
            }));
        }

        Ok(Some(Campaign {
            term,
            request,
            peers: self.peers.iter().cloned().collect(),
        }))
    }

    /// Counts a reply to a RequestVote sent for `requested_term`.
    pub fn handle_vote_response(
        &mut self,
        voter: &NodeId,
        requested_term: Term,
        resp: &RequestVoteResponse,
    ) -> Result<VoteOutcome> {
        if self.role == Role::Stopped {
            return Ok(VoteOutcome::Ignored);
        }

        if self.observe_term(resp.term) {
            self.persist()?;
            return Ok(VoteOutcome::SteppedDown);
        }

        if self.role != Role::Candidate || requested_term != self.ledger.current_term() {
            debug!(
                node_id = %self.id,
                voter = %voter,
                requested_term,
                "Ignoring vote response from an earlier election"
            );
            return Ok(VoteOutcome::Ignored);
        }

        if !self.peers.is_member(voter) {
            return Ok(VoteOutcome::Ignored);
        }

        if resp.vote_granted {
            self.votes_received.insert(voter.clone());
        }

        let votes = self.peers.count_votes(&self.votes_received);
        let needed = self.peers.quorum();
        debug!(
            node_id = %self.id,
            voter = %voter,
            granted = resp.vote_granted,
            votes,
            needed,
            "Received vote"
        );

        if votes >= needed {
            self.become_leader()?;
            Ok(VoteOutcome::Won)
        } else {
            Ok(VoteOutcome::Pending { votes, needed })
        }
    }

    /// Adds `id` to the membership. A first self-join of a lone server
    /// elects it on the spot and returns that (already won) campaign.
    pub fn join(&mut self, id: &NodeId) -> Result<Option<Campaign>> {
        self.ensure_running()?;

        match self.peers.join(id) {
            JoinOutcome::Bootstrap => {
                info!(node_id = %self.id, "Bootstrapping single-node cluster");
                self.start_election()
            }
            JoinOutcome::Added => {
                info!(
                    node_id = %self.id,
                    peer = %id,
                    members = self.peers.member_count(),
                    "Peer joined"
                );
                if self.role == Role::Leader {
                    self.progress.insert(
                        id.clone(),
                        Progress {
                            next_index: self.log.last_index() + 1,
                            match_index: 0,
                        },
                    );
                }
                Ok(None)
            }
            JoinOutcome::AlreadyMember => Ok(None),
        }
    }

    /// Removes a peer and re-evaluates whatever quorum is in progress.
    pub fn leave(&mut self, id: &NodeId) -> Result<()> {
        self.ensure_running()?;

        if *id == self.id {
            return Err(BallotError::InvalidPeer(format!(
                "{} cannot remove itself",
                id
            )));
        }
        if !self.peers.remove(id) {
            return Err(BallotError::InvalidPeer(format!("{} is not a member", id)));
        }
        self.progress.remove(id);
        info!(
            node_id = %self.id,
            peer = %id,
            members = self.peers.member_count(),
            "Peer removed"
        );

        match self.role {
            Role::Candidate if self.peers.has_quorum(&self.votes_received) => {
                self.become_leader()?;
            }
            Role::Leader => {
                self.advance_commit_index()?;
            }
            _ => {}
        }
        Ok(())
    }

    /// Handles AppendEntries as a follower
    pub fn handle_append_entries(
        &mut self,
        req: &AppendEntriesRequest,
    ) -> Result<AppendEntriesResponse> {
        self.ensure_running()?;

        // 1. Reject if term is older
        if req.term < self.ledger.current_term() {
            return Ok(AppendEntriesResponse {
                term: self.ledger.current_term(),
                success: false,
            });
        }

        // 2. Adopt the leader's term; a candidate of the same term concedes
        self.observe_term(req.term);
        match self.role {
            Role::Candidate => {
                info!(
                    node_id = %self.id,
                    leader = %req.leader_id,
                    term = req.term,
                    "Leader found, abandoning election"
                );
                self.become_follower();
            }
            Role::Leader => {
                warn!(
                    node_id = %self.id,
                    other = %req.leader_id,
                    term = req.term,
                    "AppendEntries from a second leader of our term"
                );
                return Ok(AppendEntriesResponse {
                    term: self.ledger.current_term(),
                    success: false,
                });
            }
            _ => {}
        }
        self.leader_id = Some(req.leader_id.clone());
        self.persist()?;

        let term = self.ledger.current_term();

        // 3. Validate previous entry consistency
        if self.log.term_at(req.prev_log_index) != Some(req.prev_log_term) {
            debug!(
                node_id = %self.id,
                prev_log_index = req.prev_log_index,
                prev_log_term = req.prev_log_term,
                "Log mismatch at previous entry"
            );
            return Ok(AppendEntriesResponse {
                term,
                success: false,
            });
        }

        // 4. Append new entries (overwrite conflicting entries)
        let mut fresh: Vec<LogEntry> = Vec::new();
        for entry in &req.entries {
            if !fresh.is_empty() {
                fresh.push(entry.clone());
                continue;
            }
            match self.log.term_at(entry.index) {
                Some(existing) if existing == entry.term => {}
                Some(_) => {
                    if entry.index <= self.log.commit_index() {
                        return Err(BallotError::Consensus(format!(
                            "leader {} conflicts with committed entry {}",
                            req.leader_id, entry.index
                        )));
                    }
                    self.log.truncate_from(entry.index)?;
                    fresh.push(entry.clone());
                }
                None => fresh.push(entry.clone()),
            }
        }
        if !fresh.is_empty() {
            debug!(
                node_id = %self.id,
                first = fresh[0].index,
                count = fresh.len(),
                "Appending entries from leader"
            );
            self.log.append(fresh)?;
        }

        // 5. Update commit index
        let last_new_index = req.prev_log_index + req.entries.len() as LogIndex;
        let commit = req.leader_commit.min(last_new_index);
        if commit > self.log.commit_index() {
            self.log.set_commit_index(commit)?;
        }

        Ok(AppendEntriesResponse {
            term,
            success: true,
        })
    }

    /// AppendEntries for every peer, carrying whatever each is missing.
    pub fn append_requests(&self) -> Vec<(NodeId, AppendEntriesRequest)> {
        if self.role != Role::Leader {
            return Vec::new();
        }

        let term = self.ledger.current_term();
        let leader_commit = self.log.commit_index();
        self.peers
            .iter()
            .map(|peer| {
                let next_index = self
                    .progress
                    .get(peer)
                    .map(|p| p.next_index)
                    .unwrap_or_else(|| self.log.last_index() + 1)
                    .max(1);
                let prev_log_index = next_index - 1;
                let request = AppendEntriesRequest {
                    term,
                    leader_id: self.id.clone(),
                    prev_log_index,
                    prev_log_term: self.log.term_at(prev_log_index).unwrap_or(0),
                    entries: self.log.entries_from(next_index, self.max_entries_per_append),
                    leader_commit,
                };
                (peer.clone(), request)
            })
            .collect()
    }

    /// Called when a follower responds to an AppendEntries RPC
    pub fn handle_append_entries_response(
        &mut self,
        peer: &NodeId,
        sent: &AppendProgress,
        resp: &AppendEntriesResponse,
    ) -> Result<()> {
        if self.role == Role::Stopped {
            return Ok(());
        }
        if self.observe_term(resp.term) {
            return self.persist();
        }
        if self.role != Role::Leader || sent.term != self.ledger.current_term() {
            return Ok(());
        }

        let Some(progress) = self.progress.get_mut(peer) else {
            return Ok(());
        };

        if resp.success {
            let matched = sent.prev_log_index + sent.entry_count;
            progress.match_index = progress.match_index.max(matched);
            progress.next_index = progress.next_index.max(matched + 1);
            self.advance_commit_index()?;
        } else {
            // Back off one entry and retry on the next heartbeat.
            let backed_off = sent.prev_log_index.max(progress.match_index + 1).max(1);
            if backed_off < progress.next_index {
                progress.next_index = backed_off;
                debug!(
                    node_id = %self.id,
                    peer = %peer,
                    next_index = backed_off,
                    "Follower rejected AppendEntries, backing off"
                );
            }
        }
        Ok(())
    }

    /// Commits the highest index stored on a majority, if it is from the
    /// current term.
    fn advance_commit_index(&mut self) -> Result<bool> {
        let mut matched: Vec<LogIndex> = self
            .peers
            .iter()
            .map(|peer| self.progress.get(peer).map(|p| p.match_index).unwrap_or(0))
            .collect();
        matched.push(self.log.last_index());
        matched.sort_unstable_by(|a, b| b.cmp(a));

        let candidate = matched[self.peers.quorum() - 1];
        if candidate > self.log.commit_index()
            && self.log.term_at(candidate) == Some(self.ledger.current_term())
        {
            self.log.set_commit_index(candidate)?;
            debug!(node_id = %self.id, commit_index = candidate, "Commit index advanced");
            return Ok(true);
        }
        Ok(false)
    }

    /// Called by the leader to append a new client command
    pub fn propose(&mut self, data: Vec<u8>) -> Result<LogIndex> {
        self.ensure_running()?;
        if self.role != Role::Leader {
            return Err(BallotError::NotLeader(self.leader_id.clone()));
        }

        let index = self.log.last_index() + 1;
        self.log.append(vec![LogEntry {
            term: self.ledger.current_term(),
            index,
            entry_type: LogEntryType::Command,
            data,
        }])?;
        debug!(node_id = %self.id, index, "Appended new command");

        self.advance_commit_index()?;
        Ok(index)
    }

    /// Applies all entries between last_applied..=commit_index and returns
    /// the applier's output for each command entry.
    pub fn apply_committed(&mut self) -> Vec<(LogIndex, Result<Vec<u8>>)> {
        let mut applied = Vec::new();

        while self.last_applied < self.log.commit_index() {
            let next = self.last_applied + 1;
            let Some(entry) = self.log.get(next) else {
                warn!(node_id = %self.id, index = next, "Committed entry missing from log");
                break;
            };

            if entry.entry_type == LogEntryType::Command {
                let result = self.applier.apply(&entry.data);
                if let Err(e) = &result {
                    warn!(node_id = %self.id, index = next, error = %e, "Failed to apply entry");
                }
                applied.push((next, result));
            }

            self.last_applied = next;
            debug!(node_id = %self.id, index = next, "Applied log entry");
        }

        applied
    }
}
