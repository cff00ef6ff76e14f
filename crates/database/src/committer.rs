//! The single-writer commit pipeline: assign a commit
//! timestamp, validate against the write log and pending writes, stage,
//! persist, then publish a new snapshot and fan out invalidations.
use std::sync::Arc;

use common::{
    persistence::{
        ConflictStrategy,
        DocumentLogEntry,
        Persistence,
        RetentionValidator,
    },
    runtime::Runtime,
    types::{
        RepeatableTimestamp,
        Timestamp,
        TimestampSource,
    },
};
use errors::ErrorMetadata;
use parking_lot::RwLock;
use tokio::sync::{
    mpsc,
    oneshot,
    Notify,
};

use crate::{
    cache::QueryCache,
    metrics,
    mvcc_index::MvccIndex,
    reads::{
        find_overlap,
        ConflictingRead,
    },
    snapshot_manager::{
        Snapshot,
        SnapshotManager,
    },
    subscription::SubscriptionsClient,
    transaction::FinalTransaction,
    write_log::{
        PendingWrites,
        WriteLog,
    },
    writes::{
        WriteOp,
        WriteSource,
    },
};

/// A conflicting read surfaced during validation, along with which stage
/// (published log vs. still-pending) caught it -- useful for diagnosing
/// false conflicts against commits that haven't reached persistence yet.
#[derive(Debug)]
pub struct ConflictingReadWithSource {
    pub read: ConflictingRead,
    pub write_source: WriteSource,
}

impl ConflictingReadWithSource {
    fn into_error(self) -> anyhow::Error {
        anyhow::Error::new(ErrorMetadata::occ_conflict(self.read.index)).context(format!(
            "conflicted with a write from {} at key {:?}",
            self.write_source, self.read.key
        ))
    }
}

enum CommitterMessage {
    Commit {
        transaction: FinalTransaction,
        write_source: WriteSource,
        result: oneshot::Sender<anyhow::Result<Timestamp>>,
    },
    Gc,
    Shutdown,
}

struct ValidatedCommit {
    commit_ts: Timestamp,
    writes: Vec<WriteOp>,
    new_snapshot: MvccIndex,
    /// `working_index` as it was before this commit folded in, so a
    /// persistence failure can restore it without re-deriving anything.
    prior_index: MvccIndex,
}

pub struct Committer<RT: Runtime> {
    runtime: RT,
    persistence: Arc<dyn Persistence>,
    retention_validator: Arc<dyn RetentionValidator>,
    timestamps: TimestampSource,
    log: Arc<RwLock<WriteLog>>,
    pending_writes: PendingWrites,
    /// The published snapshot with every still-pending commit's writes
    /// already folded in. Validation and index-key computation read from
    /// here rather than the published snapshot manager, since a pending
    /// commit that passed validation must be visible to the next one.
    working_index: MvccIndex,
    snapshot_manager: Arc<RwLock<SnapshotManager>>,
    subscriptions: SubscriptionsClient,
    cache: Arc<QueryCache>,
    /// Notified whenever `pending_writes` shrinks, so a commit waiting on
    /// the high-water mark can wake up instead of polling.
    pending_drained: Arc<Notify>,
}

impl<RT: Runtime> Committer<RT> {
    pub fn start(
        runtime: RT,
        persistence: Arc<dyn Persistence>,
        retention_validator: Arc<dyn RetentionValidator>,
        snapshot_manager: Arc<RwLock<SnapshotManager>>,
        subscriptions: SubscriptionsClient,
        cache: Arc<QueryCache>,
        write_log: Arc<RwLock<WriteLog>>,
        queue_size: usize,
    ) -> CommitterClient {
        let (sender, receiver) = mpsc::channel(queue_size);
        let mut timestamps = TimestampSource::new();
        let initial = snapshot_manager.read().latest().clone();
        timestamps.seed(initial.ts);
        let committer = Committer {
            runtime: runtime.clone(),
            persistence,
            retention_validator,
            timestamps,
            log: write_log,
            pending_writes: PendingWrites::new(),
            working_index: initial.index,
            snapshot_manager: snapshot_manager.clone(),
            subscriptions,
            cache,
            pending_drained: Arc::new(Notify::new()),
        };
        let handle = runtime.spawn("committer", async move {
            committer.go(receiver).await;
        });
        let gc_sender = sender.clone();
        runtime.spawn("committer_gc_sweep", async move {
            let mut interval = tokio::time::interval(*common::knobs::MVCC_RETENTION / 4);
            interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                interval.tick().await;
                if gc_sender.send(CommitterMessage::Gc).await.is_err() {
                    break;
                }
            }
        });
        CommitterClient {
            handle: Arc::new(parking_lot::Mutex::new(handle)),
            sender,
            snapshot_manager,
        }
    }

    async fn go(mut self, mut receiver: mpsc::Receiver<CommitterMessage>) {
        while let Some(message) = receiver.recv().await {
            match message {
                CommitterMessage::Commit {
                    transaction,
                    write_source,
                    result,
                } => {
                    let outcome = self.handle_commit(transaction, write_source).await;
                    let _ = result.send(outcome);
                },
                CommitterMessage::Gc => {
                    let _timer = metrics::gc_sweep_timer();
                    self.working_index.gc(&*self.retention_validator);
                },
                CommitterMessage::Shutdown => break,
            }
        }
    }

    async fn handle_commit(
        &mut self,
        transaction: FinalTransaction,
        write_source: WriteSource,
    ) -> anyhow::Result<Timestamp> {
        if transaction.writes.is_empty() {
            return Ok(transaction.begin_ts);
        }

        // Wait (don't reject) if too much is already staged ahead of
        // persistence; `pending_drained` wakes this up every time an entry
        // is removed from `pending_writes`, whether by a successful
        // publish or a rolled-back failure.
        while self.pending_writes.len() >= *common::knobs::PENDING_HIGH_WATER {
            self.pending_drained.notified().await;
        }

        let _timer = metrics::commit_timer();
        let validated = self.validate_commit(transaction, write_source)?;
        metrics::log_commit_writes(validated.writes.len());
        if let Err(err) = self.write_to_persistence(&validated).await {
            let commit_ts = validated.commit_ts;
            self.pending_writes.remove(commit_ts);
            self.working_index = validated.prior_index;
            self.pending_drained.notify_waiters();
            return Err(anyhow::Error::new(ErrorMetadata::persistence_unavailable(format!(
                "commit {} failed to persist: {err:#}",
                commit_ts.value()
            ))));
        }
        let commit_ts = validated.commit_ts;
        self.publish_commit(validated);
        metrics::log_commit();
        Ok(commit_ts)
    }

    fn validate_commit(
        &mut self,
        transaction: FinalTransaction,
        write_source: WriteSource,
    ) -> anyhow::Result<ValidatedCommit> {
        let commit_ts = self.timestamps.next_ts();
        if !self.retention_validator.is_retained(transaction.begin_ts) {
            errors::log_out_of_retention();
            anyhow::bail!(ErrorMetadata::out_of_retention());
        }

        if let Some(conflict) = self.commit_has_conflict(&transaction, write_source.clone())? {
            errors::log_occ_abort();
            metrics::log_commit_conflict();
            return Err(conflict.into_error());
        }

        let writes: Vec<WriteOp> = transaction.writes.into_iter_ops().collect();
        let prior_index = self.working_index.clone();
        let new_snapshot = self.working_index.apply_commit(commit_ts, writes.iter());
        self.working_index = new_snapshot.clone();

        self.pending_writes.push_back(commit_ts, writes.clone());

        Ok(ValidatedCommit {
            commit_ts,
            writes,
            new_snapshot,
            prior_index,
        })
    }

    /// A commit must check both the published write log and anything
    /// still pending persistence, since
    /// a concurrent commit may have already reserved a timestamp and
    /// staged its writes without having published them yet.
    fn commit_has_conflict(
        &self,
        transaction: &FinalTransaction,
        write_source: WriteSource,
    ) -> anyhow::Result<Option<ConflictingReadWithSource>> {
        {
            let log = self.log.read();
            for entry in log.iter_since(transaction.begin_ts) {
                if let Some(read) = find_overlap(&transaction.reads, entry.writes.iter()) {
                    return Ok(Some(ConflictingReadWithSource { read, write_source }));
                }
            }
        }
        for entry in self.pending_writes.iter_since(transaction.begin_ts) {
            if let Some(read) = find_overlap(&transaction.reads, entry.writes.iter()) {
                return Ok(Some(ConflictingReadWithSource { read, write_source }));
            }
        }
        Ok(None)
    }

    async fn write_to_persistence(&self, validated: &ValidatedCommit) -> anyhow::Result<()> {
        let entries = validated
            .writes
            .iter()
            .map(|op| DocumentLogEntry {
                ts: validated.commit_ts,
                id: op.id.clone(),
                value: op.update.new_value().cloned(),
            })
            .collect();
        self.persistence.write(entries, ConflictStrategy::Error).await
    }

    fn publish_commit(&mut self, validated: ValidatedCommit) {
        let ValidatedCommit {
            commit_ts,
            writes,
            new_snapshot,
            prior_index: _,
        } = validated;

        self.pending_writes.pop_front();
        self.pending_drained.notify_waiters();
        self.log.write().append(commit_ts, writes.clone());
        self.retention_validator.observe_commit(commit_ts);

        self.snapshot_manager.write().push(Snapshot {
            ts: commit_ts,
            index: new_snapshot,
        });

        self.cache.invalidate(&writes);
        self.subscriptions.invalidate(commit_ts, writes);
    }
}

/// Handle used by callers to submit commits; talks to the committer's
/// actor loop over a bounded channel so a slow or stuck committer turns
/// into backpressure (`Overloaded`) instead of unbounded memory growth.
pub struct CommitterClient {
    handle: Arc<parking_lot::Mutex<Box<dyn common::runtime::SpawnHandle>>>,
    sender: mpsc::Sender<CommitterMessage>,
    snapshot_manager: Arc<RwLock<SnapshotManager>>,
}

impl CommitterClient {
    pub async fn commit(&self, transaction: FinalTransaction, write_source: WriteSource) -> anyhow::Result<Timestamp> {
        if transaction.writes.is_empty() {
            return Ok(transaction.begin_ts);
        }
        let (tx, rx) = oneshot::channel();
        self.sender
            .try_send(CommitterMessage::Commit {
                transaction,
                write_source,
                result: tx,
            })
            .map_err(|_| {
                anyhow::Error::new(ErrorMetadata::overloaded(
                    "CommitterFull",
                    "Too many commits are already queued; retry after backing off",
                ))
            })?;
        rx.await.map_err(|_| anyhow::anyhow!(ErrorMetadata::internal("committer shut down")))?
    }

    pub fn latest_ts(&self) -> RepeatableTimestamp {
        RepeatableTimestamp::new_validated(self.snapshot_manager.read().latest().ts)
    }

    pub fn shutdown(&self) {
        let _ = self.sender.try_send(CommitterMessage::Shutdown);
        self.handle.lock().shutdown();
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use async_trait::async_trait;
    use common::{
        index::IndexName,
        persistence::{
            ConflictStrategy,
            DocumentLogEntry,
            Persistence,
            RetentionValidator,
        },
        runtime::TokioRuntime,
    };
    use value::{
        DocumentId,
        InternalId,
        TableName,
        Value,
    };

    use super::*;
    use crate::{
        subscription::SubscriptionManager,
        test_helpers::AlwaysRetained,
        transaction::{
            IndexShapes,
            Transaction,
        },
        writes::WriteSource,
    };

    struct NoopPersistence;

    #[async_trait]
    impl Persistence for NoopPersistence {
        async fn write(&self, _writes: Vec<DocumentLogEntry>, _conflict_strategy: ConflictStrategy) -> anyhow::Result<()> {
            Ok(())
        }

        async fn load_latest(&self) -> anyhow::Result<(Timestamp, Vec<DocumentLogEntry>)> {
            Ok((Timestamp::MIN, vec![]))
        }

        async fn scan(&self, _id: DocumentId, _as_of_ts: Timestamp) -> anyhow::Result<Option<DocumentLogEntry>> {
            Ok(None)
        }
    }

    /// Fails the first write, then behaves like `NoopPersistence` after
    /// that -- enough to exercise the rollback path without wedging the
    /// committer permanently.
    #[derive(Default)]
    struct FailingOncePersistence {
        failed_once: std::sync::atomic::AtomicBool,
    }

    #[async_trait]
    impl Persistence for FailingOncePersistence {
        async fn write(&self, _writes: Vec<DocumentLogEntry>, _conflict_strategy: ConflictStrategy) -> anyhow::Result<()> {
            if !self.failed_once.swap(true, std::sync::atomic::Ordering::SeqCst) {
                anyhow::bail!("simulated persistence failure");
            }
            Ok(())
        }

        async fn load_latest(&self) -> anyhow::Result<(Timestamp, Vec<DocumentLogEntry>)> {
            Ok((Timestamp::MIN, vec![]))
        }

        async fn scan(&self, _id: DocumentId, _as_of_ts: Timestamp) -> anyhow::Result<Option<DocumentLogEntry>> {
            Ok(None)
        }
    }

    fn id(byte: u8) -> DocumentId {
        DocumentId::new("items".parse::<TableName>().unwrap(), InternalId::from_bytes([byte; 16]))
    }

    fn start_committer() -> CommitterClient {
        let snapshot_manager = Arc::new(RwLock::new(SnapshotManager::new(
            Snapshot {
                ts: Timestamp::MIN,
                index: MvccIndex::new(),
            },
            16,
        )));
        let write_log = Arc::new(RwLock::new(WriteLog::new(16)));
        let (subscriptions, _worker) = SubscriptionManager::start(write_log.clone());
        Committer::<TokioRuntime>::start(
            TokioRuntime,
            Arc::new(NoopPersistence),
            Arc::new(AlwaysRetained),
            snapshot_manager,
            subscriptions,
            Arc::new(QueryCache::new()),
            write_log,
            16,
        )
    }

    #[tokio::test]
    async fn clean_commit_advances_the_snapshot() {
        let committer = start_committer();
        let begin_ts = committer.latest_ts().value();
        let mut tx = Transaction::new(
            MvccIndex::new(),
            IndexShapes(vec![]),
            begin_ts,
            std::time::Instant::now() + Duration::from_secs(5),
            WriteSource::Unknown,
        );
        tx.insert(id(1), Value::Int64(1)).unwrap();
        let final_tx = tx.finalize();
        let commit_ts = committer.commit(final_tx, WriteSource::Unknown).await.unwrap();
        assert!(commit_ts > begin_ts);
    }

    #[tokio::test]
    async fn conflicting_range_read_is_rejected() {
        let committer = start_committer();
        let begin_ts = committer.latest_ts().value();
        let by_qty = IndexName::new("items".parse().unwrap(), "by_qty");

        // Transaction A reads a range on by_qty and then tries to insert
        // into it after B has already committed a write inside that
        // range.
        let mut a = Transaction::new(
            MvccIndex::new(),
            IndexShapes(vec![(by_qty.clone(), vec!["qty".to_owned()])]),
            begin_ts,
            std::time::Instant::now() + Duration::from_secs(5),
            WriteSource::Unknown,
        );
        a.range(&by_qty, &common::interval::Interval::all()).unwrap();
        a.insert(id(1), Value::Int64(1)).unwrap();

        let mut b = Transaction::new(
            MvccIndex::new(),
            IndexShapes(vec![(by_qty.clone(), vec!["qty".to_owned()])]),
            begin_ts,
            std::time::Instant::now() + Duration::from_secs(5),
            WriteSource::Unknown,
        );
        b.insert(id(2), Value::Int64(2)).unwrap();
        committer.commit(b.finalize(), WriteSource::Unknown).await.unwrap();

        let result = committer.commit(a.finalize(), WriteSource::Unknown).await;
        assert!(result.is_err());
        assert!(errors::ErrorMetadataAnyhowExt::is_occ(&result.unwrap_err()));
    }

    #[tokio::test]
    async fn persistence_failure_rolls_back_so_a_later_commit_still_succeeds() {
        let snapshot_manager = Arc::new(RwLock::new(SnapshotManager::new(
            Snapshot {
                ts: Timestamp::MIN,
                index: MvccIndex::new(),
            },
            16,
        )));
        let write_log = Arc::new(RwLock::new(WriteLog::new(16)));
        let (subscriptions, _worker) = SubscriptionManager::start(write_log.clone());
        let committer = Committer::<TokioRuntime>::start(
            TokioRuntime,
            Arc::new(FailingOncePersistence::default()),
            Arc::new(AlwaysRetained),
            snapshot_manager,
            subscriptions,
            Arc::new(QueryCache::new()),
            write_log,
            16,
        );

        let begin_ts = committer.latest_ts().value();
        let mut failing = Transaction::new(
            MvccIndex::new(),
            IndexShapes(vec![]),
            begin_ts,
            std::time::Instant::now() + Duration::from_secs(5),
            WriteSource::Unknown,
        );
        failing.insert(id(1), Value::Int64(1)).unwrap();
        let result = committer.commit(failing.finalize(), WriteSource::Unknown).await;
        assert!(result.is_err());

        let begin_ts = committer.latest_ts().value();
        let mut retry = Transaction::new(
            MvccIndex::new(),
            IndexShapes(vec![]),
            begin_ts,
            std::time::Instant::now() + Duration::from_secs(5),
            WriteSource::Unknown,
        );
        retry.insert(id(1), Value::Int64(2)).unwrap();
        let commit_ts = committer.commit(retry.finalize(), WriteSource::Unknown).await.unwrap();
        assert!(commit_ts > begin_ts);
    }

    #[tokio::test]
    async fn commit_invalidates_overlapping_cache_entries() {
        let snapshot_manager = Arc::new(RwLock::new(SnapshotManager::new(
            Snapshot {
                ts: Timestamp::MIN,
                index: MvccIndex::new(),
            },
            16,
        )));
        let write_log = Arc::new(RwLock::new(WriteLog::new(16)));
        let (subscriptions, _worker) = SubscriptionManager::start(write_log.clone());
        let cache = Arc::new(QueryCache::new());
        let committer = Committer::<TokioRuntime>::start(
            TokioRuntime,
            Arc::new(NoopPersistence),
            Arc::new(AlwaysRetained),
            snapshot_manager,
            subscriptions,
            cache.clone(),
            write_log,
            16,
        );

        let begin_ts = committer.latest_ts().value();
        let mut read_tx = Transaction::new(
            MvccIndex::new(),
            IndexShapes(vec![]),
            begin_ts,
            std::time::Instant::now() + Duration::from_secs(5),
            WriteSource::Unknown,
        );
        let value = read_tx.get(&id(1)).unwrap();
        let finalized = read_tx.finalize();
        let token = crate::token::Token::new(finalized.reads, finalized.begin_ts);
        cache.fulfil(
            match cache.get(crate::cache::CacheKey { function_id: "f".to_owned(), args: vec![] }, begin_ts).await {
                crate::cache::CacheLookup::Miss(miss) => miss,
                crate::cache::CacheLookup::Hit(_) => unreachable!(),
            },
            token,
            crate::cache::CachedValue {
                value: value.unwrap_or(Value::Null),
                computed_ts: begin_ts,
            },
        );
        assert_eq!(cache.len(), 1);

        let mut write_tx = Transaction::new(
            MvccIndex::new(),
            IndexShapes(vec![]),
            begin_ts,
            std::time::Instant::now() + Duration::from_secs(5),
            WriteSource::Unknown,
        );
        write_tx.insert(id(1), Value::Int64(1)).unwrap();
        committer.commit(write_tx.finalize(), WriteSource::Unknown).await.unwrap();

        assert_eq!(cache.len(), 0);
    }
}
