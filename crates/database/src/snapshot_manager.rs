//! Holds the totally-ordered sequence of immutable snapshots a committer
//! publishes, so readers can begin a transaction "as of" the latest (or,
//! within retention, any past) snapshot.
use std::collections::VecDeque;

use common::types::Timestamp;

use crate::mvcc_index::MvccIndex;

/// A published snapshot: the MVCC index as it stood immediately after one
/// commit. Cheap to clone (structural sharing via `imbl`).
#[derive(Clone, Debug)]
pub struct Snapshot {
    pub ts: Timestamp,
    pub index: MvccIndex,
}

#[derive(Debug)]
pub struct SnapshotManager {
    snapshots: VecDeque<Snapshot>,
    capacity: usize,
}

impl SnapshotManager {
    pub fn new(initial: Snapshot, capacity: usize) -> Self {
        let mut snapshots = VecDeque::with_capacity(capacity);
        snapshots.push_back(initial);
        Self { snapshots, capacity }
    }

    /// Install a newly committed snapshot as the latest. Timestamps must
    /// strictly increase; the committer is the only writer and is
    /// single-threaded, so this is an invariant, not a race to handle.
    pub fn push(&mut self, snapshot: Snapshot) {
        debug_assert!(self.latest().ts < snapshot.ts);
        if self.snapshots.len() == self.capacity {
            self.snapshots.pop_front();
        }
        self.snapshots.push_back(snapshot);
    }

    pub fn latest(&self) -> &Snapshot {
        self.snapshots.back().expect("snapshot manager always has at least the initial snapshot")
    }

    /// The snapshot to read at `ts`: the newest one not after `ts`. Errors
    /// if `ts` predates everything retained -- the caller no longer has
    /// enough history to serve that timestamp.
    pub fn snapshot_at(&self, ts: Timestamp) -> anyhow::Result<&Snapshot> {
        self.snapshots
            .iter()
            .rev()
            .find(|s| s.ts <= ts)
            .ok_or_else(|| errors::ErrorMetadata::out_of_retention().into())
    }
}

#[cfg(test)]
mod tests {
    use value::{
        DocumentId,
        InternalId,
        TableName,
    };

    use super::*;
    use crate::writes::{
        Update,
        WriteOp,
    };

    fn id(byte: u8) -> DocumentId {
        DocumentId::new("items".parse::<TableName>().unwrap(), InternalId::from_bytes([byte; 16]))
    }

    #[test]
    fn snapshot_at_finds_the_newest_snapshot_not_after_ts() {
        let initial = Snapshot {
            ts: Timestamp::new(1),
            index: MvccIndex::new(),
        };
        let mut manager = SnapshotManager::new(initial, 4);

        let op = WriteOp::new(id(1), Update::Insert(value::Value::Int64(1)), vec![]);
        let next_index = manager.latest().index.apply_commit(Timestamp::new(10), [&op].into_iter());
        manager.push(Snapshot {
            ts: Timestamp::new(10),
            index: next_index,
        });

        assert_eq!(manager.snapshot_at(Timestamp::new(5)).unwrap().ts, Timestamp::new(1));
        assert_eq!(manager.snapshot_at(Timestamp::new(10)).unwrap().ts, Timestamp::new(10));
    }

    #[test]
    fn snapshot_at_below_retention_is_an_error() {
        let initial = Snapshot {
            ts: Timestamp::new(100),
            index: MvccIndex::new(),
        };
        let manager = SnapshotManager::new(initial, 1);
        assert!(manager.snapshot_at(Timestamp::new(1)).is_err());
    }
}
