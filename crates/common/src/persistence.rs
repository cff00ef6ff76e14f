//! The durability interface the committer writes through. Concrete backends
//! (Postgres, SQLite, object storage, ...) are out of scope for this crate;
//! `InMemoryPersistence` in `database::test_helpers` is the only
//! implementation this workspace ships, for tests.
use async_trait::async_trait;
use value::{
    DocumentId,
    Value,
};

use crate::types::Timestamp;

/// One document revision as it is written to or read from durable storage.
/// `value: None` represents a tombstone.
#[derive(Clone, Debug, PartialEq)]
pub struct DocumentLogEntry {
    pub ts: Timestamp,
    pub id: DocumentId,
    pub value: Option<Value>,
}

/// How a backend should react to a write that collides with an existing
/// key. The committer always uses `Error`: a collision at commit time means
/// the commit-timestamp allocator is broken, which is an `Internal` error,
/// never a retry signal.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ConflictStrategy {
    Error,
    Overwrite,
}

/// Consulted by the MVCC index's background reclamation sweep before it
/// drops a revision, so the committer and the sweeper agree on a single
/// source of truth for the retention horizon.
pub trait RetentionValidator: Send + Sync {
    /// Returns `true` if `ts` is at or above the oldest timestamp any live
    /// transaction is still allowed to read at.
    fn is_retained(&self, ts: Timestamp) -> bool;

    /// Called by the committer every time it publishes a commit, so
    /// validators that track a reference point (e.g. the oldest live
    /// transaction, falling back to the last commit once none are open)
    /// can advance it. No-op by default.
    fn observe_commit(&self, _ts: Timestamp) {}
}

#[async_trait]
pub trait Persistence: Send + Sync {
    /// Durably append every revision in `writes`, crash-atomically: on
    /// recovery either all of them are visible or none are. Must not
    /// return `Ok` before the durability barrier completes.
    async fn write(
        &self,
        writes: Vec<DocumentLogEntry>,
        conflict_strategy: ConflictStrategy,
    ) -> anyhow::Result<()>;

    /// The latest durable commit timestamp and a stream of every revision at
    /// or below it, for bootstrap.
    async fn load_latest(
        &self,
    ) -> anyhow::Result<(Timestamp, Vec<DocumentLogEntry>)>;

    /// Historical point-in-time scan, used only for cold reads below what
    /// the in-memory MVCC index retains.
    async fn scan(
        &self,
        id: DocumentId,
        as_of_ts: Timestamp,
    ) -> anyhow::Result<Option<DocumentLogEntry>>;
}
