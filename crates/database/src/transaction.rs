//! A transaction: one logical unit of reads and writes, begun against a
//! fixed snapshot and validated against everything committed since when
//! it tries to commit.
use std::{
    sync::Arc,
    time::Instant,
};

use common::{
    index::IndexName,
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
    retention::TransactionGuard,
    schema::SchemaCache,
    transaction_index::TransactionIndex,
    writes::{
        Update,
        WriteOp,
        WriteSet,
        WriteSource,
    },
};

/// Index shapes visible to a transaction: enough to compute keys for
/// staged writes and range reads without consulting the whole snapshot's
/// index-definition table on every call.
#[derive(Clone)]
pub struct IndexShapes(pub Vec<(IndexName, Vec<String>)>);

impl IndexShapes {
    pub fn fields_for(&self, index: &IndexName) -> Vec<String> {
        self.0
            .iter()
            .find(|(name, _)| name == index)
            .map(|(_, fields)| fields.clone())
            .unwrap_or_default()
    }
}

pub struct Transaction {
    begin_ts: Timestamp,
    deadline: Instant,
    snapshot: MvccIndex,
    shapes: IndexShapes,
    writes: WriteSet,
    reads: ReadSet,
    schema: Arc<SchemaCache>,
    /// Keeps `begin_ts` registered with the retention tracker for as long
    /// as this transaction is open; dropped by `finalize`.
    retention_guard: Option<TransactionGuard>,
}

/// A transaction that is done accumulating reads and writes and is ready
/// to be handed to the committer.
pub struct FinalTransaction {
    pub begin_ts: Timestamp,
    pub reads: ReadSet,
    pub writes: WriteSet,
}

impl Transaction {
    pub fn new(snapshot: MvccIndex, shapes: IndexShapes, begin_ts: Timestamp, deadline: Instant, source: WriteSource) -> Self {
        Self {
            begin_ts,
            deadline,
            snapshot,
            shapes,
            writes: WriteSet::new(source),
            reads: ReadSet::empty(),
            schema: Arc::new(SchemaCache::empty()),
            retention_guard: None,
        }
    }

    /// Attach a retention guard so the MVCC garbage collector won't
    /// reclaim anything this transaction's begin snapshot might still
    /// read until it finalizes.
    pub fn with_retention_guard(mut self, guard: TransactionGuard) -> Self {
        self.retention_guard = Some(guard);
        self
    }

    /// Attach the schema cache writes in this transaction must validate
    /// against. Defaults to an empty cache (no constraints) if never
    /// called.
    pub fn with_schema(mut self, schema: Arc<SchemaCache>) -> Self {
        self.schema = schema;
        self
    }

    pub fn begin_ts(&self) -> Timestamp {
        self.begin_ts
    }

    pub fn has_expired(&self, now: Instant) -> bool {
        now >= self.deadline
    }

    pub fn is_readonly(&self) -> bool {
        self.writes.is_empty()
    }

    fn with_index<R>(&mut self, f: impl FnOnce(&mut TransactionIndex<'_>) -> R) -> R {
        let mut index = TransactionIndex::new(&self.snapshot, self.begin_ts, &self.writes);
        let result = f(&mut index);
        self.merge_reads(index.into_read_set());
        result
    }

    fn merge_reads(&mut self, reads: ReadSet) {
        for (index, indexed) in reads.iter_indexed() {
            for interval in indexed.intervals.iter() {
                self.reads.record_read(index.clone(), interval.clone());
            }
        }
        let total = self.reads.num_intervals();
        if total > *common::knobs::TRANSACTION_WARN_READ_SET_INTERVALS {
            tracing::warn!(
                begin_ts = self.begin_ts.value(),
                intervals = total,
                "transaction read set is unusually large, likely an unindexed scan"
            );
        }
    }

    pub fn get(&mut self, id: &DocumentId) -> anyhow::Result<Option<Value>> {
        self.check_deadline()?;
        Ok(self.with_index(|index| index.get(id)))
    }

    pub fn range(&mut self, index: &IndexName, interval: &Interval) -> anyhow::Result<Vec<(DocumentId, Value)>> {
        self.check_deadline()?;
        let fields = self.shapes.fields_for(index);
        Ok(self.with_index(|tx_index| tx_index.range(index, &fields, interval)))
    }

    pub fn insert(&mut self, id: DocumentId, value: Value) -> anyhow::Result<()> {
        self.stage(id, Update::Insert(value))
    }

    pub fn replace(&mut self, id: DocumentId, value: Value) -> anyhow::Result<()> {
        self.stage(id, Update::Replace(value))
    }

    pub fn delete(&mut self, id: DocumentId) -> anyhow::Result<()> {
        self.stage(id, Update::Delete)
    }

    fn stage(&mut self, id: DocumentId, update: Update) -> anyhow::Result<()> {
        self.check_deadline()?;
        if let Some(value) = update.new_value() {
            self.schema.check(&id.table, value)?;
        }
        let shapes = self.shapes.0.clone();
        let op = self.with_index(move |index| index.stage_write(id, update, &shapes));
        self.writes.stage(op);
        Ok(())
    }

    fn check_deadline(&self) -> anyhow::Result<()> {
        if Instant::now() >= self.deadline {
            return Err(errors::ErrorMetadata::transaction_timeout().into());
        }
        Ok(())
    }

    pub fn finalize(self) -> FinalTransaction {
        FinalTransaction {
            begin_ts: self.begin_ts,
            reads: self.reads,
            writes: self.writes,
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use value::{
        InternalId,
        TableName,
    };

    use super::*;

    fn table() -> TableName {
        "items".parse().unwrap()
    }

    fn id(byte: u8) -> DocumentId {
        DocumentId::new(table(), InternalId::from_bytes([byte; 16]))
    }

    fn new_tx() -> Transaction {
        Transaction::new(
            MvccIndex::new(),
            IndexShapes(vec![]),
            Timestamp::new(1),
            Instant::now() + Duration::from_secs(5),
            WriteSource::Unknown,
        )
    }

    #[test]
    fn insert_then_get_sees_own_write() {
        let mut tx = new_tx();
        tx.insert(id(1), Value::Int64(42)).unwrap();
        assert_eq!(tx.get(&id(1)).unwrap(), Some(Value::Int64(42)));
    }

    #[test]
    fn write_violating_a_registered_schema_is_rejected() {
        use std::collections::BTreeMap;

        use crate::schema::{
            SchemaCache,
            TableSchema,
        };

        let mut schemas = BTreeMap::new();
        schemas.insert(table(), TableSchema::new(vec!["name".to_owned()]));
        let mut tx = new_tx().with_schema(Arc::new(SchemaCache::new(schemas)));

        assert!(tx.insert(id(1), Value::Object(Default::default())).is_err());
        let named = Value::Object([("name".to_owned(), Value::String("a".to_owned()))].into_iter().collect());
        assert!(tx.insert(id(2), named).is_ok());
    }

    #[test]
    fn finalize_carries_reads_and_writes_forward() {
        let mut tx = new_tx();
        tx.get(&id(1)).unwrap();
        tx.insert(id(2), Value::Null).unwrap();
        let finalized = tx.finalize();
        assert_eq!(finalized.writes.len(), 1);
        assert!(!finalized.reads.is_empty());
    }

    #[test]
    fn expired_transaction_rejects_further_operations() {
        let mut tx = Transaction::new(
            MvccIndex::new(),
            IndexShapes(vec![]),
            Timestamp::new(1),
            Instant::now() - Duration::from_secs(1),
            WriteSource::Unknown,
        );
        assert!(tx.get(&id(1)).is_err());
    }
}
