//! Layers a transaction's in-progress write set over a read-only MVCC
//! snapshot, and records every interval consulted into the transaction's
//! read set as it goes.
use common::{
    index::{
        IndexDefinition,
        IndexName,
    },
    interval::Interval,
    types::Timestamp,
};
use value::{
    DocumentId,
    Value,
};

use crate::{
    mvcc_index::MvccIndex,
    reads::ReadSet,
    writes::{
        IndexDelta,
        Update,
        WriteOp,
        WriteSet,
    },
};

pub struct TransactionIndex<'a> {
    snapshot: &'a MvccIndex,
    begin_ts: Timestamp,
    writes: &'a WriteSet,
    reads: ReadSet,
}

impl<'a> TransactionIndex<'a> {
    pub fn new(snapshot: &'a MvccIndex, begin_ts: Timestamp, writes: &'a WriteSet) -> Self {
        Self {
            snapshot,
            begin_ts,
            writes,
            reads: ReadSet::empty(),
        }
    }

    pub fn into_read_set(self) -> ReadSet {
        self.reads
    }

    /// Point lookup by id: the transaction's own pending write wins over
    /// the snapshot; either way the primary-index key is recorded as read
    /// so a concurrent write to this id is detected at commit time.
    pub fn get(&mut self, id: &DocumentId) -> Option<Value> {
        let primary = IndexName::primary(id.table.clone());
        self.reads.record_read(primary, Interval::point(id.internal_id.to_string().into_bytes()));

        if let Some(op) = self.writes.get(id) {
            return op.update.new_value().cloned();
        }
        self.snapshot.get(id, self.begin_ts)
    }

    /// Range lookup on a secondary index: records the queried interval as
    /// read (even if it turns out empty -- an absence is still a fact a
    /// later write can invalidate), then merges the snapshot's matches
    /// with this transaction's own pending writes on the same index.
    pub fn range(&mut self, index: &IndexName, definition_fields: &[String], interval: &Interval) -> Vec<(DocumentId, Value)> {
        self.reads.record_read(index.clone(), interval.clone());

        let mut out: Vec<(DocumentId, Value)> = self
            .snapshot
            .range(index, interval, self.begin_ts)
            .into_iter()
            .filter(|(id, _)| self.writes.get(id).is_none())
            .collect();

        let shape = IndexDefinition::new(index.clone(), definition_fields.to_vec());
        for op in self.writes.iter() {
            let Some(new_value) = op.update.new_value() else {
                continue;
            };
            let key = shape.key_for(&op.id, new_value);
            if interval.contains(&key) {
                out.push((op.id.clone(), new_value.clone()));
            }
        }
        out.sort_by(|a, b| a.0.cmp(&b.0));
        out
    }

    /// Compute the index deltas a write to `id` would produce, using this
    /// transaction's view of the document's current value (read via
    /// `get`, so the old value is itself guarded by a recorded read).
    pub fn stage_write(&mut self, id: DocumentId, update: Update, index_definitions: &[(IndexName, Vec<String>)]) -> WriteOp {
        let old_value = self.get(&id);
        let mut deltas = Vec::new();
        for (index, fields) in index_definitions {
            let shape = IndexDefinition::new(index.clone(), fields.clone());
            let old_key = old_value.as_ref().map(|v| shape.key_for(&id, v));
            let new_key = update.new_value().map(|v| shape.key_for(&id, v));
            deltas.push(IndexDelta {
                index: index.clone(),
                old_key,
                new_key,
            });
        }
        WriteOp::new(id, update, deltas)
    }
}
