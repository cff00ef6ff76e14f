//! The transactional core of a reactive database: an OCC transaction
//! engine over an MVCC log, with read-set invalidation powering
//! subscriptions and a query cache.
//!
//! Trimmed to just the transactional core plus a minimal per-table schema
//! cache -- no search or vector index machinery; see `DESIGN.md` for how
//! this workspace is scoped down.
use std::{
    collections::BTreeMap,
    sync::Arc,
    time::{
        Duration,
        Instant,
    },
};

use common::{
    index::IndexDefinition,
    persistence::{
        Persistence,
        RetentionValidator,
    },
    runtime::Runtime,
    types::Timestamp,
};
use parking_lot::RwLock;

pub mod cache;
pub mod committer;
mod metrics;
pub mod mvcc_index;
pub mod reads;
pub mod retention;
pub mod schema;
pub mod snapshot_manager;
pub mod subscription;
#[cfg(any(test, feature = "testing"))]
pub mod test_helpers;
pub mod token;
pub mod transaction;
pub mod transaction_index;
pub mod write_log;
pub mod writes;

pub use cache::{
    CacheKey,
    CachedValue,
    QueryCache,
};
pub use committer::CommitterClient;
pub use mvcc_index::MvccIndex;
pub use reads::ReadSet;
pub use retention::LiveTransactionTracker;
pub use schema::{
    SchemaCache,
    TableSchema,
};
pub use snapshot_manager::{
    Snapshot,
    SnapshotManager,
};
pub use subscription::{
    Subscription,
    SubscriptionManager,
    SubscriptionsClient,
};
pub use token::Token;
pub use transaction::{
    FinalTransaction,
    IndexShapes,
    Transaction,
};
pub use write_log::WriteLog;
pub use writes::{
    Update,
    WriteSource,
};

/// Top-level handle to one running database: owns the committer actor,
/// the subscription manager, the published snapshot sequence, and the
/// query cache, and is how a caller begins transactions and registers
/// subscriptions.
pub struct Database<RT: Runtime> {
    runtime: RT,
    index_shapes: IndexShapes,
    schema: Arc<SchemaCache>,
    snapshot_manager: Arc<RwLock<SnapshotManager>>,
    committer: CommitterClient,
    subscriptions: SubscriptionsClient,
    cache: Arc<QueryCache>,
    retention: Arc<LiveTransactionTracker>,
}

impl<RT: Runtime> Database<RT> {
    /// Bootstrap a database by replaying everything `persistence` has
    /// durably committed into a fresh in-memory `MvccIndex`, then start
    /// the committer and subscription workers.
    pub async fn load(
        runtime: RT,
        persistence: Arc<dyn Persistence>,
        retention_validator: Arc<dyn RetentionValidator>,
        index_definitions: Vec<IndexDefinition>,
        schema: SchemaCache,
    ) -> anyhow::Result<Self> {
        let (max_ts, entries) = persistence.load_latest().await?;

        let mut index = MvccIndex::new();
        let index_shapes = IndexShapes(
            index_definitions
                .iter()
                .map(|def| (def.name.clone(), def.fields.clone()))
                .collect(),
        );
        for definition in index_definitions {
            index = index.with_index(definition);
        }

        let mut by_ts: BTreeMap<Timestamp, Vec<(value::DocumentId, Option<value::Value>)>> = BTreeMap::new();
        for entry in entries {
            by_ts.entry(entry.ts).or_default().push((entry.id, entry.value));
        }
        for (ts, docs) in by_ts {
            let ops: Vec<_> = docs
                .into_iter()
                .map(|(id, value)| {
                    let update = match value {
                        Some(v) => writes::Update::Insert(v),
                        None => writes::Update::Delete,
                    };
                    writes::WriteOp::new(id, update, vec![])
                })
                .collect();
            index = index.apply_commit(ts, ops.iter());
        }

        let snapshot_manager = Arc::new(RwLock::new(SnapshotManager::new(
            Snapshot { ts: max_ts, index },
            *common::knobs::WRITE_LOG_CAPACITY,
        )));
        let write_log = Arc::new(RwLock::new(WriteLog::new(*common::knobs::WRITE_LOG_CAPACITY)));
        let cache = Arc::new(QueryCache::new());

        let (subscriptions, worker) = SubscriptionManager::start(write_log.clone());
        runtime.spawn("subscription_cancel_worker", worker.run());

        let retention = retention::LiveTransactionTracker::new(*common::knobs::MVCC_RETENTION);
        let combined_retention_validator = Arc::new(retention::CombinedRetentionValidator {
            tracker: retention.clone(),
            external: retention_validator,
        });

        let committer = committer::Committer::start(
            runtime.clone(),
            persistence,
            combined_retention_validator,
            snapshot_manager.clone(),
            subscriptions.clone(),
            cache.clone(),
            write_log,
            *common::knobs::COMMITTER_QUEUE_SIZE,
        );

        Ok(Self {
            runtime,
            index_shapes,
            schema: Arc::new(schema),
            snapshot_manager,
            committer,
            subscriptions,
            cache,
            retention,
        })
    }

    /// Begin a transaction reading from the latest published snapshot.
    pub fn begin_transaction(&self, source: WriteSource) -> Transaction {
        let snapshot = self.snapshot_manager.read().latest().clone();
        Transaction::new(
            snapshot.index,
            self.index_shapes.clone(),
            snapshot.ts,
            Instant::now() + *common::knobs::TRANSACTION_DEADLINE,
            source,
        )
        .with_schema(self.schema.clone())
        .with_retention_guard(self.retention.register(snapshot.ts))
    }

    /// Begin a transaction at a specific past snapshot, e.g. to replay a
    /// subscription's token. Errors if `ts` has fallen out of retention.
    pub fn begin_transaction_at_ts(&self, ts: Timestamp, source: WriteSource) -> anyhow::Result<Transaction> {
        let manager = self.snapshot_manager.read();
        let snapshot = manager.snapshot_at(ts)?;
        let guard = self.retention.register(snapshot.ts);
        Ok(Transaction::new(
            snapshot.index.clone(),
            self.index_shapes.clone(),
            snapshot.ts,
            Instant::now() + *common::knobs::TRANSACTION_DEADLINE,
            source,
        )
        .with_schema(self.schema.clone())
        .with_retention_guard(guard))
    }

    pub async fn commit(&self, transaction: Transaction, write_source: WriteSource) -> anyhow::Result<Timestamp> {
        let final_tx = transaction.finalize();
        self.committer.commit(final_tx, write_source).await
    }

    /// Subscribe to a transaction's read set: the returned `Subscription`
    /// resolves once a commit invalidates something it read.
    pub fn subscribe(&self, token: Token) -> Subscription {
        self.subscriptions.subscribe(token)
    }

    pub fn cache(&self) -> &Arc<QueryCache> {
        &self.cache
    }

    pub fn latest_ts(&self) -> Timestamp {
        self.snapshot_manager.read().latest().ts
    }

    pub fn shutdown(&self) {
        self.committer.shutdown();
    }
}

impl<RT: Runtime> Drop for Database<RT> {
    fn drop(&mut self) {
        self.committer.shutdown();
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use common::{
        index::IndexName,
        runtime::TokioRuntime,
    };
    use value::{
        DocumentId,
        InternalId,
        TableName,
        Value,
    };

    use super::*;
    use crate::test_helpers::{
        AlwaysRetained,
        InMemoryPersistence,
    };

    fn table() -> TableName {
        "items".parse().unwrap()
    }

    fn id(byte: u8) -> DocumentId {
        DocumentId::new(table(), InternalId::from_bytes([byte; 16]))
    }

    async fn new_db() -> Database<TokioRuntime> {
        Database::load(
            TokioRuntime,
            Arc::new(InMemoryPersistence::new()),
            Arc::new(AlwaysRetained),
            vec![IndexDefinition::new(IndexName::primary(table()), vec![])],
            SchemaCache::empty(),
        )
        .await
        .unwrap()
    }

    #[tokio::test]
    async fn commit_then_read_from_a_fresh_transaction() {
        let db = new_db().await;
        let mut tx = db.begin_transaction(WriteSource::Unknown);
        tx.insert(id(1), Value::Int64(7)).unwrap();
        db.commit(tx, WriteSource::Unknown).await.unwrap();

        let mut read_tx = db.begin_transaction(WriteSource::Unknown);
        assert_eq!(read_tx.get(&id(1)).unwrap(), Some(Value::Int64(7)));
    }

    #[tokio::test]
    async fn subscription_fires_on_overlapping_commit() {
        let db = new_db().await;
        let mut read_tx = db.begin_transaction(WriteSource::Unknown);
        read_tx.get(&id(1)).unwrap();
        let finalized = read_tx.finalize();
        let token = Token::new(finalized.reads, finalized.begin_ts);
        let subscription = db.subscribe(token);

        let mut write_tx = db.begin_transaction(WriteSource::Unknown);
        write_tx.insert(id(1), Value::Int64(1)).unwrap();
        db.commit(write_tx, WriteSource::Unknown).await.unwrap();

        tokio::time::timeout(Duration::from_secs(1), subscription.wait_for_invalidation())
            .await
            .expect("subscription should have been invalidated");
    }
}
