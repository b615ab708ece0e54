use ballot_common::error::{BallotError, Result};
use ballot_common::types::{LogIndex, Term};
use serde::{Deserialize, Serialize};

/// A single log entry in the Raft log
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogEntry {
    pub term: Term,               // Term number when entry was received by leader
    pub index: LogIndex,          // Position in the log, starting at 1
    pub entry_type: LogEntryType, // Command or Noop
    pub data: Vec<u8>,            // Payload handed to the command applier
}

/// Type of log entry, determines whether the applier sees it
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum LogEntryType {
    Command, // Application command
    Noop,    // Empty entry a new leader appends to commit its term
}

/// Last (term, index) of a log. Ordering compares term first, then index,
/// which is exactly the up-to-date rule used when granting votes.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord)]
pub struct LogPosition {
    pub term: Term,
    pub index: LogIndex,
}

impl LogPosition {
    pub fn new(term: Term, index: LogIndex) -> Self {
        Self { term, index }
    }

    /// True when `self` is at least as up to date as `other`.
    pub fn is_up_to_date_with(&self, other: &LogPosition) -> bool {
        self >= other
    }
}

/// Storage the consensus core reads positions from and appends into.
///
/// Index 0 is the empty-log sentinel: `term_at(0)` is always `Some(0)`.
pub trait LogStore: Send {
    fn last_index(&self) -> LogIndex;

    fn last_term(&self) -> Term;

    /// Term of the entry at `index`, `None` past the end of the log.
    fn term_at(&self, index: LogIndex) -> Option<Term>;

    fn get(&self, index: LogIndex) -> Option<LogEntry>;

    /// Up to `max` entries starting at `index` (inclusive).
    fn entries_from(&self, index: LogIndex, max: usize) -> Vec<LogEntry>;

    /// Appends entries; the first must directly follow the current last index.
    fn append(&mut self, entries: Vec<LogEntry>) -> Result<()>;

    /// Drops every entry at `index` and after.
    fn truncate_from(&mut self, index: LogIndex) -> Result<()>;

    fn commit_index(&self) -> LogIndex;

    fn set_commit_index(&mut self, index: LogIndex) -> Result<()>;

    fn last_position(&self) -> LogPosition {
        LogPosition::new(self.last_term(), self.last_index())
    }
}

/// Log kept entirely in memory.
#[derive(Debug, Default)]
pub struct MemoryLog {
    entries: Vec<LogEntry>, // entries[i] holds index i + 1
    commit_index: LogIndex, // Index of last committed entry
}

impl MemoryLog {
    /// Create an empty Raft log
    pub fn new() -> Self {
        Self::default()
    }

    fn slot(&self, index: LogIndex) -> Option<usize> {
        if index == 0 || index > self.entries.len() as LogIndex {
            None
        } else {
            Some((index - 1) as usize)
        }
    }
}

impl LogStore for MemoryLog {
    fn last_index(&self) -> LogIndex {
        self.entries.last().map(|e| e.index).unwrap_or(0)
    }

    fn last_term(&self) -> Term {
        self.entries.last().map(|e| e.term).unwrap_or(0)
    }

    fn term_at(&self, index: LogIndex) -> Option<Term> {
        if index == 0 {
            return Some(0);
        }
        self.slot(index).map(|i| self.entries[i].term)
    }

    fn get(&self, index: LogIndex) -> Option<LogEntry> {
        self.slot(index).map(|i| self.entries[i].clone())
    }

    fn entries_from(&self, index: LogIndex, max: usize) -> Vec<LogEntry> {
        match self.slot(index.max(1)) {
            Some(start) => self.entries[start..]
                .iter()
                .take(max)
                .cloned()
                .collect(),
            None => Vec::new(),
        }
    }

    fn append(&mut self, entries: Vec<LogEntry>) -> Result<()> {
        for entry in entries {
            let expected = self.last_index() + 1;
            if entry.index != expected {
                return Err(BallotError::Log(format!(
                    "entry index {} does not follow last index {}",
                    entry.index,
                    expected - 1
                )));
            }
            if entry.term < self.last_term() {
                return Err(BallotError::Log(format!(
                    "entry term {} is older than last term {}",
                    entry.term,
                    self.last_term()
                )));
            }
            self.entries.push(entry);
        }
        Ok(())
    }

    fn truncate_from(&mut self, index: LogIndex) -> Result<()> {
        if index <= self.commit_index {
            return Err(BallotError::Log(format!(
                "cannot truncate committed index {} (commit index {})",
                index, self.commit_index
            )));
        }
        if let Some(slot) = self.slot(index) {
            self.entries.truncate(slot);
        }
        Ok(())
    }

    fn commit_index(&self) -> LogIndex {
        self.commit_index
    }

    fn set_commit_index(&mut self, index: LogIndex) -> Result<()> {
        if index > self.last_index() {
            return Err(BallotError::Log(format!(
                "commit index {} is past last index {}",
                index,
                self.last_index()
            )));
        }
        // Commit index never moves backwards.
        self.commit_index = self.commit_index.max(index);
        Ok(())
    }
}
