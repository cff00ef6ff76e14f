//! Tracks every currently-open transaction's begin timestamp so the MVCC
//! garbage collector never reclaims a revision a live transaction might
//! still read. The retention horizon is the oldest live begin timestamp
//! minus a grace window, mirroring `common::persistence::RetentionValidator`'s
//! contract: the committer's background sweep and the committer's own
//! commit-time check both consult the same `is_retained` call.
use std::{
    collections::BTreeMap,
    sync::Arc,
    time::Duration,
};

use common::{
    persistence::RetentionValidator,
    types::Timestamp,
};
use parking_lot::Mutex;

/// Refcounted set of live begin timestamps. Several transactions can share
/// the same begin timestamp (they all started against the same published
/// snapshot), so entries are reference counted rather than being a plain
/// set.
#[derive(Default)]
struct LiveSet {
    counts: BTreeMap<Timestamp, usize>,
}

impl LiveSet {
    fn register(&mut self, ts: Timestamp) {
        *self.counts.entry(ts).or_insert(0) += 1;
    }

    fn deregister(&mut self, ts: Timestamp) {
        if let Some(count) = self.counts.get_mut(&ts) {
            *count -= 1;
            if *count == 0 {
                self.counts.remove(&ts);
            }
        }
    }

    fn oldest(&self) -> Option<Timestamp> {
        self.counts.keys().next().copied()
    }
}

/// Production `RetentionValidator`: the horizon trails the oldest open
/// transaction's begin timestamp by `grace`, so a transaction that is slow
/// to commit still has a window after it reads before its snapshot can be
/// reclaimed out from under a retry. Once no transaction is open, the
/// horizon trails the last observed commit instead, so idle periods don't
/// block garbage collection indefinitely.
pub struct LiveTransactionTracker {
    live: Mutex<LiveSet>,
    last_commit_ts: Mutex<Timestamp>,
    grace: Duration,
}

impl LiveTransactionTracker {
    pub fn new(grace: Duration) -> Arc<Self> {
        Arc::new(Self {
            live: Mutex::new(LiveSet::default()),
            last_commit_ts: Mutex::new(Timestamp::MIN),
            grace,
        })
    }

    /// Register `begin_ts` as in use for the lifetime of the returned
    /// guard. Dropping the guard (e.g. when the transaction finalizes)
    /// deregisters it.
    pub fn register(self: &Arc<Self>, begin_ts: Timestamp) -> TransactionGuard {
        self.live.lock().register(begin_ts);
        TransactionGuard {
            tracker: self.clone(),
            begin_ts,
        }
    }

    /// Called by the committer every time it publishes a commit, so the
    /// horizon can still advance while no transaction is open.
    pub fn observe_commit(&self, ts: Timestamp) {
        let mut last = self.last_commit_ts.lock();
        if ts > *last {
            *last = ts;
        }
    }

    fn horizon(&self) -> Timestamp {
        let reference = self.live.lock().oldest().unwrap_or(*self.last_commit_ts.lock());
        let grace_nanos = self.grace.as_nanos().min(u128::from(u64::MAX)) as u64;
        Timestamp::new(reference.value().saturating_sub(grace_nanos))
    }
}

impl RetentionValidator for LiveTransactionTracker {
    fn is_retained(&self, ts: Timestamp) -> bool {
        ts >= self.horizon()
    }

    fn observe_commit(&self, ts: Timestamp) {
        self.observe_commit(ts);
    }
}

/// RAII handle for one transaction's registration in a
/// [`LiveTransactionTracker`]. Held by `Transaction` for as long as it is
/// open; dropped (deregistering) once it finalizes.
pub struct TransactionGuard {
    tracker: Arc<LiveTransactionTracker>,
    begin_ts: Timestamp,
}

impl Drop for TransactionGuard {
    fn drop(&mut self) {
        self.tracker.live.lock().deregister(self.begin_ts);
    }
}

/// Combines an externally supplied validator (e.g. one that also accounts
/// for replication lag or a follower's read horizon) with this process's
/// own live-transaction tracker: a revision is retained only if both agree
/// it's still needed.
pub struct CombinedRetentionValidator {
    pub tracker: Arc<LiveTransactionTracker>,
    pub external: Arc<dyn RetentionValidator>,
}

impl RetentionValidator for CombinedRetentionValidator {
    fn is_retained(&self, ts: Timestamp) -> bool {
        self.tracker.is_retained(ts) && self.external.is_retained(ts)
    }

    fn observe_commit(&self, ts: Timestamp) {
        self.tracker.observe_commit(ts);
        self.external.observe_commit(ts);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn horizon_trails_the_oldest_live_transaction() {
        let tracker = LiveTransactionTracker::new(Duration::from_secs(0));
        let guard = tracker.register(Timestamp::new(1_000));
        assert!(tracker.is_retained(Timestamp::new(1_000)));
        assert!(!tracker.is_retained(Timestamp::new(999)));
        drop(guard);
    }

    #[test]
    fn horizon_advances_once_every_transaction_finishes() {
        let tracker = LiveTransactionTracker::new(Duration::from_secs(0));
        let guard = tracker.register(Timestamp::new(1_000));
        tracker.observe_commit(Timestamp::new(2_000));
        drop(guard);
        assert!(tracker.is_retained(Timestamp::new(2_000)));
        assert!(!tracker.is_retained(Timestamp::new(1_000)));
    }

    #[test]
    fn grace_window_protects_recently_finished_transactions() {
        let tracker = LiveTransactionTracker::new(Duration::from_nanos(500));
        let guard = tracker.register(Timestamp::new(1_000));
        drop(guard);
        tracker.observe_commit(Timestamp::new(1_000));
        // horizon = last_commit_ts (1000) - grace (500) = 500.
        assert!(tracker.is_retained(Timestamp::new(500)));
        assert!(!tracker.is_retained(Timestamp::new(499)));
    }

    #[test]
    fn shared_begin_timestamp_is_refcounted() {
        let tracker = LiveTransactionTracker::new(Duration::from_secs(0));
        let a = tracker.register(Timestamp::new(1_000));
        let b = tracker.register(Timestamp::new(1_000));
        drop(a);
        assert!(!tracker.is_retained(Timestamp::new(999)), "still one live reader of ts 1000");
        drop(b);
        tracker.observe_commit(Timestamp::new(1_000));
        assert!(tracker.is_retained(Timestamp::new(1_000)));
    }
}
