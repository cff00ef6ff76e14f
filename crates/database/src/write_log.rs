//! The published write log and the pending-writes staging area. Commit
//! validation must check both, since a just-reserved commit timestamp
//! may not be published to the log yet.
use std::collections::VecDeque;

use common::types::Timestamp;

use crate::writes::WriteOp;

/// One commit's worth of writes, retained in memory so that concurrent
/// transactions begun before this commit can validate against it without
/// hitting persistence.
#[derive(Clone, Debug)]
pub struct WriteLogEntry {
    pub commit_ts: Timestamp,
    pub writes: Vec<WriteOp>,
}

/// A bounded ring of the most recent published commits. A transaction
/// that began too long ago to be fully covered by this log cannot be
/// validated purely in memory and must be rejected as out of retention
/// (`errors::ErrorMetadata::out_of_retention`).
#[derive(Debug, Default)]
pub struct WriteLog {
    entries: VecDeque<WriteLogEntry>,
    capacity: usize,
}

impl WriteLog {
    pub fn new(capacity: usize) -> Self {
        Self {
            entries: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    pub fn append(&mut self, commit_ts: Timestamp, writes: Vec<WriteOp>) {
        if self.entries.len() == self.capacity {
            self.entries.pop_front();
        }
        self.entries.push_back(WriteLogEntry { commit_ts, writes });
    }

    /// The oldest timestamp this log can still answer for; a transaction
    /// begun strictly before this has a gap in coverage.
    pub fn min_covered_ts(&self) -> Option<Timestamp> {
        self.entries.front().map(|e| e.commit_ts)
    }

    pub fn max_ts(&self) -> Option<Timestamp> {
        self.entries.back().map(|e| e.commit_ts)
    }

    /// True if `since` predates this log's coverage, meaning a
    /// transaction that began at `since` cannot be validated against the
    /// in-memory log alone.
    pub fn is_stale(&self, since: Timestamp) -> bool {
        match self.min_covered_ts() {
            Some(min) => since < min,
            None => false,
        }
    }

    /// All writes committed strictly after `since`, oldest first.
    pub fn iter_since(&self, since: Timestamp) -> impl Iterator<Item = &WriteLogEntry> {
        self.entries.iter().filter(move |e| e.commit_ts > since)
    }
}

/// Writes that have been assigned a commit timestamp and validated, but
/// not yet durably persisted. The committer is single-writer, so at most
/// one entry is ever mid-flight, but a short queue lets `persist` run
/// concurrently with validating the next commit.
#[derive(Debug, Default)]
pub struct PendingWrites {
    entries: VecDeque<WriteLogEntry>,
}

impl PendingWrites {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push_back(&mut self, commit_ts: Timestamp, writes: Vec<WriteOp>) {
        self.entries.push_back(WriteLogEntry { commit_ts, writes });
    }

    /// Remove and return the oldest pending entry once it has been
    /// durably persisted and published into the write log.
    pub fn pop_front(&mut self) -> Option<WriteLogEntry> {
        self.entries.pop_front()
    }

    /// Remove the entry for `commit_ts`, used to roll back a commit whose
    /// persistence write failed after it was staged here.
    pub fn remove(&mut self, commit_ts: Timestamp) -> Option<WriteLogEntry> {
        let pos = self.entries.iter().position(|e| e.commit_ts == commit_ts)?;
        self.entries.remove(pos)
    }

    pub fn iter(&self) -> impl Iterator<Item = &WriteLogEntry> {
        self.entries.iter()
    }

    pub fn iter_since(&self, since: Timestamp) -> impl Iterator<Item = &WriteLogEntry> {
        self.entries.iter().filter(move |e| e.commit_ts > since)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
