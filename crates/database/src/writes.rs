//! Write sets: what a transaction intends to change, staged in memory
//! until commit.
use std::collections::BTreeMap;

use common::index::IndexName;
use value::{
    DocumentId,
    Value,
};

/// The new state of a document: `Insert`/`Replace` both carry the new
/// value, `Delete` carries none. Kept as separate variants (rather than
/// `Option<Value>`) so that inserting into an already-occupied id can be
/// rejected distinctly from a blind replace.
#[derive(Clone, Debug, PartialEq)]
pub enum Update {
    Insert(Value),
    Replace(Value),
    Delete,
}

impl Update {
    pub fn new_value(&self) -> Option<&Value> {
        match self {
            Update::Insert(v) | Update::Replace(v) => Some(v),
            Update::Delete => None,
        }
    }
}

/// Where a write came from, for diagnostics only -- never consulted by
/// conflict detection.
#[derive(Clone, Debug, PartialEq, Eq, Default)]
pub enum WriteSource {
    #[default]
    Unknown,
    Mutation(String),
    Internal(&'static str),
}

impl std::fmt::Display for WriteSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            WriteSource::Unknown => write!(f, "unknown"),
            WriteSource::Mutation(name) => write!(f, "mutation:{name}"),
            WriteSource::Internal(name) => write!(f, "internal:{name}"),
        }
    }
}

/// One document's pending change, plus the index definitions it affects --
/// enough information for `index_key_writes` to compute which index keys
/// this write touches without needing the old document value (the write
/// set records the document's prior indexed keys at the time the write
/// was staged; see `transaction_index::TransactionIndex::stage_write`).
#[derive(Clone, Debug)]
pub struct WriteOp {
    pub id: DocumentId,
    pub update: Update,
    /// Index keys this write removes or adds, one entry per affected
    /// index. Populated by the transaction index when the write is
    /// staged, since only it knows a document's old projected keys.
    pub index_deltas: Vec<IndexDelta>,
}

#[derive(Clone, Debug)]
pub struct IndexDelta {
    pub index: IndexName,
    pub old_key: Option<Vec<u8>>,
    pub new_key: Option<Vec<u8>>,
}

impl WriteOp {
    pub fn new(id: DocumentId, update: Update, index_deltas: Vec<IndexDelta>) -> Self {
        Self {
            id,
            update,
            index_deltas,
        }
    }

    /// The `(index, keys)` pairs this write could conflict on: for each
    /// affected index, its old key (if any) and new key (if any) -- a
    /// reader who observed either key's presence or absence is affected.
    pub fn index_key_writes(&self) -> Vec<crate::reads::IndexKeyWrite<'_>> {
        self.index_deltas
            .iter()
            .map(|delta| {
                let mut keys = Vec::new();
                if let Some(old) = &delta.old_key {
                    keys.push(old.clone());
                }
                if let Some(new) = &delta.new_key {
                    if Some(new) != delta.old_key.as_ref() {
                        keys.push(new.clone());
                    }
                }
                crate::reads::IndexKeyWrite {
                    index: &delta.index,
                    keys,
                }
            })
            .collect()
    }
}

/// A transaction's staged changes: one `WriteOp` per document, in the
/// order last written (a second write to the same id replaces the first
/// rather than appending).
#[derive(Clone, Debug, Default)]
pub struct WriteSet {
    ops: BTreeMap<DocumentId, WriteOp>,
    source: WriteSource,
}

impl WriteSet {
    pub fn new(source: WriteSource) -> Self {
        Self {
            ops: BTreeMap::new(),
            source,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.ops.is_empty()
    }

    pub fn len(&self) -> usize {
        self.ops.len()
    }

    pub fn source(&self) -> &WriteSource {
        &self.source
    }

    pub fn stage(&mut self, op: WriteOp) {
        self.ops.insert(op.id.clone(), op);
    }

    pub fn get(&self, id: &DocumentId) -> Option<&WriteOp> {
        self.ops.get(id)
    }

    pub fn iter(&self) -> impl Iterator<Item = &WriteOp> {
        self.ops.values()
    }

    pub fn into_iter_ops(self) -> impl Iterator<Item = WriteOp> {
        self.ops.into_values()
    }
}

#[cfg(test)]
mod tests {
    use value::{
        InternalId,
        TableName,
    };

    use super::*;

    fn id(byte: u8) -> DocumentId {
        DocumentId::new(
            "items".parse::<TableName>().unwrap(),
            InternalId::from_bytes([byte; 16]),
        )
    }

    #[test]
    fn second_write_to_same_id_replaces_first() {
        let mut writes = WriteSet::new(WriteSource::Unknown);
        writes.stage(WriteOp::new(id(1), Update::Insert(Value::Int64(1)), vec![]));
        writes.stage(WriteOp::new(id(1), Update::Replace(Value::Int64(2)), vec![]));
        assert_eq!(writes.len(), 1);
        assert_eq!(writes.get(&id(1)).unwrap().update, Update::Replace(Value::Int64(2)));
    }

    #[test]
    fn index_key_writes_dedupes_identical_old_and_new_key() {
        let delta = IndexDelta {
            index: IndexName::primary("items".parse().unwrap()),
            old_key: Some(vec![1]),
            new_key: Some(vec![1]),
        };
        let op = WriteOp::new(id(1), Update::Replace(Value::Null), vec![delta]);
        let writes = op.index_key_writes();
        assert_eq!(writes[0].keys.len(), 1);
    }
}
