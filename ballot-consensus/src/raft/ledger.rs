use ballot_common::types::{NodeId, Term};
use serde::{Deserialize, Serialize};

/// The persistent half of a server's election state. `voted_for` only means
/// something together with `current_term`, so the pair is always stored as
/// one record.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct HardState {
    pub current_term: Term,
    pub voted_for: Option<NodeId>,
}

/// Current term and the vote cast in it.
#[derive(Debug, Clone, Default)]
pub struct TermLedger {
    state: HardState,
}

impl TermLedger {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn current_term(&self) -> Term {
        self.state.current_term
    }

    pub fn voted_for(&self) -> Option<&NodeId> {
        self.state.voted_for.as_ref()
    }

    pub fn hard_state(&self) -> &HardState {
        &self.state
    }

    /// Adopts `term` if it is newer, clearing the vote. Returns whether the
    /// term advanced; callers demote themselves to follower when it did.
    pub fn observe_term(&mut self, term: Term) -> bool {
        if term > self.state.current_term {
            self.state.current_term = term;
            self.state.voted_for = None;
            true
        } else {
            false
        }
    }

    /// Grants the vote for `term` to `candidate` if the term is current and
    /// the vote is still free (or already theirs). Leaves state untouched
    /// when it refuses.
    pub fn try_vote(&mut self, term: Term, candidate: &NodeId) -> bool {
        if term != self.state.current_term {
            return false;
        }
        match &self.state.voted_for {
            Some(existing) => existing == candidate,
            None => {
                self.state.voted_for = Some(candidate.clone());
                true
            }
        }
    }

    /// Moves to the next term and votes for `self_id` in it.
    pub fn begin_election(&mut self, self_id: &NodeId) -> Term {
        self.state.current_term += 1;
        self.state.voted_for = Some(self_id.clone());
        self.state.current_term
    }
}

impl From<HardState> for TermLedger {
    fn from(state: HardState) -> Self {
        Self { state }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_observe_term_only_moves_forward() {
        let mut ledger = TermLedger::new();

        assert!(ledger.observe_term(3));
        assert_eq!(ledger.current_term(), 3);
        assert!(!ledger.observe_term(3));
        assert!(!ledger.observe_term(1));
        assert_eq!(ledger.current_term(), 3);
    }

    #[test]
    fn test_observe_term_clears_vote() {
        let mut ledger = TermLedger::from(HardState {
            current_term: 2,
            voted_for: Some("a".into()),
        });

        ledger.observe_term(2);
        assert_eq!(ledger.voted_for(), Some(&"a".to_string()));

        ledger.observe_term(4);
        assert_eq!(ledger.voted_for(), None);
    }

    #[test]
    fn test_one_vote_per_term() {
        let mut ledger = TermLedger::from(HardState {
            current_term: 2,
            voted_for: None,
        });

        assert!(ledger.try_vote(2, &"a".into()));
        // Duplicate delivery of the same request is granted again.
        assert!(ledger.try_vote(2, &"a".into()));
        assert!(!ledger.try_vote(2, &"b".into()));
        assert_eq!(ledger.voted_for(), Some(&"a".to_string()));
    }

    #[test]
    fn test_vote_for_other_term_refused() {
        let mut ledger = TermLedger::from(HardState {
            current_term: 2,
            voted_for: None,
        });

        assert!(!ledger.try_vote(1, &"a".into()));
        assert!(!ledger.try_vote(3, &"a".into()));
        assert_eq!(ledger.voted_for(), None);
    }

    #[test]
    fn test_begin_election_votes_for_self() {
        let mut ledger = TermLedger::new();

        assert_eq!(ledger.begin_election(&"me".into()), 1);
        assert_eq!(ledger.voted_for(), Some(&"me".to_string()));
        assert!(!ledger.try_vote(1, &"other".into()));
        assert_eq!(ledger.begin_election(&"me".into()), 2);
    }
}
