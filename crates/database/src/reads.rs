//! Read set tracking for an active transaction, and the overlap-detection
//! algorithm shared by commit validation, subscription invalidation, and
//! cache invalidation.
use std::collections::BTreeMap;

use common::{
    index::IndexName,
    interval::{
        Interval,
        IntervalSet,
    },
};

use crate::writes::WriteOp;

/// The intervals a transaction consulted on one index.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct IndexReads {
    pub intervals: IntervalSet,
}

/// The set of keys whose presence or absence influenced a transaction's
/// output: a map from index identity to the intervals read on it. Point
/// lookups (`get(id)`) are recorded as degenerate single-key intervals
/// (see `Interval::point`).
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ReadSet {
    indexed: BTreeMap<IndexName, IndexReads>,
}

impl ReadSet {
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.indexed.values().all(|r| r.intervals.is_empty())
    }

    pub fn record_read(&mut self, index: IndexName, interval: Interval) {
        self.indexed.entry(index).or_default().intervals.add_interval(interval);
    }

    pub fn iter_indexed(&self) -> impl Iterator<Item = (&IndexName, &IndexReads)> {
        self.indexed.iter()
    }

    pub fn num_intervals(&self) -> usize {
        self.indexed.values().map(|r| r.intervals.len()).sum()
    }

    /// The shared overlap-detection routine: does any
    /// key touched by `write` fall inside an interval this read set holds
    /// on the matching index? Returns the first conflicting index found.
    pub fn overlaps(&self, write: &IndexKeyWrite<'_>) -> bool {
        let Some(reads) = self.indexed.get(write.index) else {
            return false;
        };
        write.keys.iter().any(|key| reads.intervals.contains(key))
    }
}

/// One write's effect on a single index: the index it touches and the set
/// of keys it affects there (normally the old key, the new key, or both --
/// see `WriteOp::index_keys`).
pub struct IndexKeyWrite<'a> {
    pub index: &'a IndexName,
    pub keys: Vec<Vec<u8>>,
}

/// A conflicting read found during overlap detection: which index and key
/// caused the conflict, surfaced so the caller can build a helpful
/// `ErrorMetadata::occ_conflict` message.
#[derive(Debug, Clone)]
pub struct ConflictingRead {
    pub index: IndexName,
    pub key: Vec<u8>,
}

/// Run overlap detection between a read set and a batch of writes,
/// returning the first conflict found. This is the single routine reused
/// by commit validation (`committer::commit_has_conflict`), subscription
/// invalidation (`subscription::SubscriptionManager`), and cache
/// invalidation (`cache::QueryCache`); they differ only in how they obtain
/// `reads` and `writes`.
pub fn find_overlap<'a>(
    reads: &ReadSet,
    writes: impl IntoIterator<Item = &'a WriteOp>,
) -> Option<ConflictingRead> {
    for op in writes {
        for write in op.index_key_writes() {
            if let Some(index_reads) = reads.indexed.get(write.index) {
                for key in &write.keys {
                    if index_reads.intervals.contains(key) {
                        return Some(ConflictingRead {
                            index: write.index.clone(),
                            key: key.clone(),
                        });
                    }
                }
            }
        }
    }
    None
}
