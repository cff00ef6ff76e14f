//! Tunable limits for the transaction engine. Every knob can be overridden
//! with an environment variable of the same name for local tuning and tests.
use std::{
    sync::LazyLock,
    time::Duration,
};

use crate::env::env_config;

/// Number of commits retained in the in-memory write log. Bounds both the
/// OCC conflict-detection window and how far behind a begin timestamp can
/// lag before `iter_range` can no longer serve it from memory.
pub static WRITE_LOG_CAPACITY: LazyLock<usize> =
    LazyLock::new(|| env_config("WRITE_LOG_CAPACITY", 4096));

/// Minimum duration a document revision is kept in the MVCC index after a
/// newer revision supersedes it.
pub static MVCC_RETENTION: LazyLock<Duration> =
    LazyLock::new(|| Duration::from_secs(env_config("MVCC_RETENTION_SECS", 60)));

/// Backpressure threshold: once this many commits are staged in pending
/// writes awaiting persistence/publish, new commit submissions wait for the
/// queue to drain instead of piling up unboundedly.
pub static PENDING_HIGH_WATER: LazyLock<usize> =
    LazyLock::new(|| env_config("PENDING_HIGH_WATER", 128));

/// Eviction threshold for the query cache, in approximate bytes of retained
/// results and read sets.
pub static CACHE_CAPACITY_BYTES: LazyLock<usize> =
    LazyLock::new(|| env_config("CACHE_CAPACITY_BYTES", 64 * 1024 * 1024));

/// Default wall-clock deadline for a transaction between `begin` and
/// `commit` submission.
pub static TRANSACTION_DEADLINE: LazyLock<Duration> =
    LazyLock::new(|| Duration::from_secs(env_config("TRANSACTION_DEADLINE_SECS", 5)));

/// Depth of the committer's inbound channel. A full channel rejects new
/// commit submissions with `Overloaded` rather than blocking the caller.
pub static COMMITTER_QUEUE_SIZE: LazyLock<usize> =
    LazyLock::new(|| env_config("COMMITTER_QUEUE_SIZE", 1024));

/// Depth of the subscription manager's inbound channel for subscribe and
/// unsubscribe requests.
pub static SUBSCRIPTION_CHANNEL_SIZE: LazyLock<usize> =
    LazyLock::new(|| env_config("SUBSCRIPTION_CHANNEL_SIZE", 10_000));

/// Log a warning when a single transaction accumulates more read intervals
/// than this; usually indicates an unindexed scan.
pub static TRANSACTION_WARN_READ_SET_INTERVALS: LazyLock<usize> =
    LazyLock::new(|| env_config("TRANSACTION_WARN_READ_SET_INTERVALS", 2000));
