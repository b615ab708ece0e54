use ballot_common::types::NodeId;
use std::collections::{BTreeSet, HashSet};

/// What a call to [`PeerSet::join`] changed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JoinOutcome {
    /// First join, naming ourselves, with no other members: a one-node cluster.
    Bootstrap,
    Added,
    AlreadyMember,
}

/// Cluster membership as seen from one server. Self is never stored in
/// `peers` but always counts as a voting member.
#[derive(Debug, Clone)]
pub struct PeerSet {
    self_id: NodeId,
    peers: BTreeSet<NodeId>,
    joined: bool,
}

impl PeerSet {
    pub fn new(self_id: NodeId) -> Self {
        Self {
            self_id,
            peers: BTreeSet::new(),
            joined: false,
        }
    }

    pub fn join(&mut self, id: &NodeId) -> JoinOutcome {
        let first = !self.joined;
        self.joined = true;

        if *id == self.self_id {
            if first && self.peers.is_empty() {
                JoinOutcome::Bootstrap
            } else {
                JoinOutcome::AlreadyMember
            }
        } else if self.peers.insert(id.clone()) {
            JoinOutcome::Added
        } else {
            JoinOutcome::AlreadyMember
        }
    }

    pub fn remove(&mut self, id: &NodeId) -> bool {
        self.peers.remove(id)
    }

    /// Whether this server has joined any cluster yet.
    pub fn is_joined(&self) -> bool {
        self.joined
    }

    pub fn is_member(&self, id: &NodeId) -> bool {
        *id == self.self_id || self.peers.contains(id)
    }

    pub fn iter(&self) -> impl Iterator<Item = &NodeId> {
        self.peers.iter()
    }

    pub fn is_empty(&self) -> bool {
        self.peers.is_empty()
    }

    /// Voting members, self included.
    pub fn member_count(&self) -> usize {
        self.peers.len() + 1
    }

    /// Votes needed to win: strictly more than half of the members.
    pub fn quorum(&self) -> usize {
        self.member_count() / 2 + 1
    }

    /// Votes in `votes` cast by current members.
    pub fn count_votes(&self, votes: &HashSet<NodeId>) -> usize {
        votes.iter().filter(|v| self.is_member(v)).count()
    }

    pub fn has_quorum(&self, votes: &HashSet<NodeId>) -> bool {
        self.count_votes(votes) >= self.quorum()
    }
}
