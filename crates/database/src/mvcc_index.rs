//! The versioned document and index store.
//!
//! Every document and every index entry is a small append-only version
//! list keyed by commit timestamp. Reads "as of ts" binary-search the
//! version list for the newest entry not after `ts`. The whole structure
//! is built out of `imbl` persistent maps so that `Clone` is O(1) plus the
//! size of what actually changed -- this is what lets the committer hand
//! out a fresh immutable snapshot on every commit without copying the
//! world.
use common::{
    index::IndexDefinition,
    index::IndexName,
    interval::Interval,
    persistence::RetentionValidator,
    types::Timestamp,
};
use imbl::{
    OrdMap,
    Vector,
};
use value::{
    DocumentId,
    Value,
};

use crate::writes::WriteOp;

/// A version list for one key: entries are pushed in increasing
/// timestamp order, never removed except by retention GC.
type Versions<V> = Vector<(Timestamp, Option<V>)>;

fn versions_as_of<V: Clone>(versions: &Versions<V>, ts: Timestamp) -> Option<V> {
    // Versions are pushed in increasing timestamp order; scan from the
    // newest entry back to find the last one not after `ts`.
    versions
        .iter()
        .rev()
        .find(|(entry_ts, _)| *entry_ts <= ts)
        .and_then(|(_, value)| value.clone())
}

fn push_version<V>(versions: &mut Versions<V>, ts: Timestamp, value: Option<V>) {
    debug_assert!(versions.back().map(|(last, _)| *last < ts).unwrap_or(true));
    versions.push_back((ts, value));
}

#[derive(Clone, Debug, Default)]
pub struct MvccIndex {
    definitions: OrdMap<IndexName, IndexDefinition>,
    documents: OrdMap<DocumentId, Versions<Value>>,
    index_entries: OrdMap<IndexName, OrdMap<Vec<u8>, Versions<DocumentId>>>,
}

impl MvccIndex {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_index(mut self, definition: IndexDefinition) -> Self {
        self.index_entries.entry(definition.name.clone()).or_default();
        self.definitions.insert(definition.name.clone(), definition);
        self
    }

    pub fn definition(&self, index: &IndexName) -> Option<&IndexDefinition> {
        self.definitions.get(index)
    }

    pub fn definitions(&self) -> impl Iterator<Item = &IndexDefinition> {
        self.definitions.values()
    }

    /// The document's value as of `ts`, or `None` if it doesn't exist (or
    /// was deleted) at that timestamp.
    pub fn get(&self, id: &DocumentId, ts: Timestamp) -> Option<Value> {
        self.documents.get(id).and_then(|versions| versions_as_of(versions, ts))
    }

    /// All `(id, value)` pairs whose key on `index` falls inside
    /// `interval`, as of `ts`. Tombstoned or not-yet-live entries are
    /// skipped.
    pub fn range(&self, index: &IndexName, interval: &Interval, ts: Timestamp) -> Vec<(DocumentId, Value)> {
        let Some(entries) = self.index_entries.get(index) else {
            return Vec::new();
        };
        let mut out = Vec::new();
        for (key, versions) in entries.iter() {
            if !interval.contains(key) {
                continue;
            }
            if let Some(id) = versions_as_of(versions, ts) {
                if let Some(value) = self.get(&id, ts) {
                    out.push((id, value));
                }
            }
        }
        out
    }

    /// Apply one commit's writes at `commit_ts`, returning the resulting
    /// index. Cloning `self` is cheap (structural sharing); only the
    /// touched version lists are actually copied.
    pub fn apply_commit<'a>(&self, commit_ts: Timestamp, ops: impl Iterator<Item = &'a WriteOp>) -> Self {
        let mut next = self.clone();
        for op in ops {
            let new_value = op.update.new_value().cloned();
            let versions = next.documents.entry(op.id.clone()).or_default();
            push_version(versions, commit_ts, new_value);

            for delta in &op.index_deltas {
                let entries = next.index_entries.entry(delta.index.clone()).or_default();
                if let Some(old_key) = &delta.old_key {
                    if Some(old_key) != delta.new_key.as_ref() {
                        let versions = entries.entry(old_key.clone()).or_default();
                        push_version(versions, commit_ts, None);
                    }
                }
                if let Some(new_key) = &delta.new_key {
                    let versions = entries.entry(new_key.clone()).or_default();
                    push_version(versions, commit_ts, Some(op.id.clone()));
                }
            }
        }
        next
    }

    /// Drop version-list entries made obsolete by `validator`: an entry can
    /// be discarded once a strictly newer entry for the same key is also
    /// retained, since no retained read timestamp could still resolve to
    /// the older one. Keeps the structure from growing without bound.
    pub fn gc(&mut self, validator: &dyn RetentionValidator) {
        for versions in self.documents.values_mut() {
            gc_versions(versions, validator);
        }
        for entries in self.index_entries.values_mut() {
            for versions in entries.values_mut() {
                gc_versions(versions, validator);
            }
        }
    }
}

fn gc_versions<V>(versions: &mut Versions<V>, validator: &dyn RetentionValidator) {
    let keep_from = versions
        .iter()
        .rposition(|(ts, _)| !validator.is_retained(*ts))
        .unwrap_or(0);
    if keep_from > 0 {
        *versions = versions.split_off(keep_from);
    }
}

#[cfg(test)]
mod tests {
    use common::index::IndexName;
    use value::{
        InternalId,
        TableName,
    };

    use super::*;
    use crate::writes::{
        IndexDelta,
        Update,
    };

    fn table() -> TableName {
        "items".parse().unwrap()
    }

    fn id(byte: u8) -> DocumentId {
        DocumentId::new(table(), InternalId::from_bytes([byte; 16]))
    }

    #[test]
    fn point_read_sees_newest_version_not_after_ts() {
        let index = MvccIndex::new();
        let op = WriteOp::new(id(1), Update::Insert(Value::Int64(1)), vec![]);
        let index = index.apply_commit(Timestamp::new(10), [&op].into_iter());
        let op2 = WriteOp::new(id(1), Update::Replace(Value::Int64(2)), vec![]);
        let index = index.apply_commit(Timestamp::new(20), [&op2].into_iter());

        assert_eq!(index.get(&id(1), Timestamp::new(5)), None);
        assert_eq!(index.get(&id(1), Timestamp::new(10)), Some(Value::Int64(1)));
        assert_eq!(index.get(&id(1), Timestamp::new(15)), Some(Value::Int64(1)));
        assert_eq!(index.get(&id(1), Timestamp::new(20)), Some(Value::Int64(2)));
    }

    #[test]
    fn delete_produces_tombstone() {
        let index = MvccIndex::new();
        let op = WriteOp::new(id(1), Update::Insert(Value::Int64(1)), vec![]);
        let index = index.apply_commit(Timestamp::new(10), [&op].into_iter());
        let op2 = WriteOp::new(id(1), Update::Delete, vec![]);
        let index = index.apply_commit(Timestamp::new(20), [&op2].into_iter());

        assert_eq!(index.get(&id(1), Timestamp::new(15)), Some(Value::Int64(1)));
        assert_eq!(index.get(&id(1), Timestamp::new(20)), None);
    }

    #[test]
    fn range_query_follows_index_delta_move() {
        let by_qty = IndexName::new(table(), "by_qty");
        let index = MvccIndex::new();
        let delta = IndexDelta {
            index: by_qty.clone(),
            old_key: None,
            new_key: Some(vec![5]),
        };
        let op = WriteOp::new(id(1), Update::Insert(Value::Int64(5)), vec![delta]);
        let index = index.apply_commit(Timestamp::new(10), [&op].into_iter());

        let hits = index.range(&by_qty, &Interval::all(), Timestamp::new(10));
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].0, id(1));

        let moved = IndexDelta {
            index: by_qty.clone(),
            old_key: Some(vec![5]),
            new_key: Some(vec![50]),
        };
        let op2 = WriteOp::new(id(1), Update::Replace(Value::Int64(50)), vec![moved]);
        let index = index.apply_commit(Timestamp::new(20), [&op2].into_iter());

        let hits_old = index.range(
            &by_qty,
            &Interval {
                start: vec![5],
                end: common::interval::End::Excluded(vec![6]),
            },
            Timestamp::new(20),
        );
        assert!(hits_old.is_empty());

        let hits_new = index.range(&by_qty, &Interval::all(), Timestamp::new(20));
        assert_eq!(hits_new.len(), 1);
        assert_eq!(hits_new[0].1, Value::Int64(50));
    }
}
