//! Tracks live subscribers and notifies them when a commit invalidates
//! something they read. `SubscriptionKey{id, seq}`
//! disambiguates a cancel racing an invalidation against the same slab
//! slot being reused by a new subscriber.
use std::sync::Arc;

use common::types::Timestamp;
use parking_lot::{
    Mutex,
    RwLock,
};
use slab::Slab;
use tokio::sync::watch;

use crate::{
    reads::find_overlap,
    token::Token,
    write_log::WriteLog,
    writes::WriteOp,
};

type Sequence = usize;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
struct SubscriptionKey {
    id: usize,
    seq: Sequence,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum SubscriptionState {
    Valid,
    Invalid,
}

struct Subscriber {
    token: Token,
    seq: Sequence,
    valid_ts: Arc<Mutex<Option<Timestamp>>>,
    valid: watch::Sender<SubscriptionState>,
}

/// Owns the live subscriber table. Runs single-threaded behind
/// `SubscriptionsClient`/`SubscriptionsWorker`, same shape as the
/// committer, so invalidation fanout never races subscribe/cancel.
pub struct SubscriptionManager {
    subscribers: Slab<Subscriber>,
    next_seq: Sequence,
    /// Shared with the committer, read-only from here. Consulted on
    /// registration so a token whose `validity_ts` already lags the
    /// published horizon is caught up before it's installed.
    write_log: Arc<RwLock<WriteLog>>,
}

/// A live subscription. Dropping it cancels the subscription.
pub struct Subscription {
    valid_ts: Arc<Mutex<Option<Timestamp>>>,
    valid: watch::Receiver<SubscriptionState>,
    key: Option<SubscriptionKey>,
    cancel: tokio::sync::mpsc::UnboundedSender<SubscriptionKey>,
}

impl Subscription {
    pub fn current_ts(&self) -> Option<Timestamp> {
        *self.valid_ts.lock()
    }

    pub async fn wait_for_invalidation(&self) {
        let mut valid = self.valid.clone();
        let _ = valid.wait_for(|state| matches!(state, SubscriptionState::Invalid)).await;
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(key) = self.key.take() {
            let _ = self.cancel.send(key);
        }
    }
}

impl SubscriptionManager {
    pub fn new(write_log: Arc<RwLock<WriteLog>>) -> Self {
        Self {
            subscribers: Slab::new(),
            next_seq: 0,
            write_log,
        }
    }

    /// Spawn the manager behind a channel-driven worker loop and hand
    /// back a cloneable client. Mirrors the committer's actor shape:
    /// subscribe/cancel/invalidate all funnel through one owner so the
    /// subscriber table never needs its own lock.
    pub fn start(write_log: Arc<RwLock<WriteLog>>) -> (SubscriptionsClient, SubscriptionsWorker) {
        let (cancel_tx, cancel_rx) = tokio::sync::mpsc::unbounded_channel();
        let manager = Arc::new(Mutex::new(Self::new(write_log)));
        let client = SubscriptionsClient {
            manager: manager.clone(),
            cancel: cancel_tx,
        };
        let worker = SubscriptionsWorker { manager, cancel_rx };
        (client, worker)
    }

    /// Register a subscription. If `token`'s validity timestamp already
    /// lags the write log's published horizon, replay every commit in
    /// `(validity_ts, current_ts]` against it first: a registration that
    /// installed unchecked could otherwise silently miss an invalidation
    /// that happened in that gap.
    pub fn subscribe(&mut self, token: Token, cancel: tokio::sync::mpsc::UnboundedSender<SubscriptionKey>) -> Subscription {
        let seq = self.next_seq;
        self.next_seq += 1;

        let mut caught_up_ts = token.ts();
        let mut already_invalid = false;
        {
            let log = self.write_log.read();
            for entry in log.iter_since(token.ts()) {
                if find_overlap(token.reads(), entry.writes.iter()).is_some() {
                    already_invalid = true;
                    break;
                }
                caught_up_ts = entry.commit_ts;
            }
        }

        let initial_state = if already_invalid { SubscriptionState::Invalid } else { SubscriptionState::Valid };
        let (valid_tx, valid_rx) = watch::channel(initial_state);
        let valid_ts = Arc::new(Mutex::new(if already_invalid { None } else { Some(caught_up_ts) }));

        if already_invalid {
            // Already stale as of registration; don't install it, just
            // hand back a subscription that reports invalidated.
            return Subscription {
                valid_ts,
                valid: valid_rx,
                key: None,
                cancel,
            };
        }

        let id = self.subscribers.insert(Subscriber {
            token,
            seq,
            valid_ts: valid_ts.clone(),
            valid: valid_tx,
        });
        Subscription {
            valid_ts,
            valid: valid_rx,
            key: Some(SubscriptionKey { id, seq }),
            cancel,
        }
    }

    pub fn cancel(&mut self, key: SubscriptionKey) {
        if let Some(entry) = self.subscribers.get(key.id) {
            if entry.seq != key.seq {
                // Slot was reused by a newer subscriber; this cancel is stale.
                return;
            }
        } else {
            return;
        }
        self.subscribers.remove(key.id);
    }

    /// Invalidate every subscriber whose read set overlaps `writes`,
    /// advance the rest to `commit_ts`. Linear scan over live
    /// subscribers, reusing the same `find_overlap` routine the committer
    /// uses for OCC validation -- a simplification of an aggregated
    /// per-index interval index, traded for a much smaller implementation.
    pub fn invalidate(&mut self, commit_ts: Timestamp, writes: &[WriteOp]) {
        let mut to_remove = Vec::new();
        for (id, subscriber) in self.subscribers.iter() {
            if find_overlap(subscriber.token.reads(), writes.iter()).is_some() {
                to_remove.push(id);
            } else {
                *subscriber.valid_ts.lock() = Some(commit_ts);
            }
        }
        for id in to_remove {
            let entry = self.subscribers.remove(id);
            *entry.valid_ts.lock() = None;
            let _ = entry.valid.send(SubscriptionState::Invalid);
        }
    }
}

/// Handle used by callers to register and cancel subscriptions.
#[derive(Clone)]
pub struct SubscriptionsClient {
    manager: Arc<Mutex<SubscriptionManager>>,
    cancel: tokio::sync::mpsc::UnboundedSender<SubscriptionKey>,
}

impl SubscriptionsClient {
    pub fn subscribe(&self, token: Token) -> Subscription {
        self.manager.lock().subscribe(token, self.cancel.clone())
    }

    pub fn invalidate(&self, commit_ts: Timestamp, writes: Vec<WriteOp>) {
        self.manager.lock().invalidate(commit_ts, &writes);
    }
}

/// Drains subscription-cancel requests queued by dropped `Subscription`
/// handles. Runs as a background task so `Drop` never blocks on the
/// manager's lock.
pub struct SubscriptionsWorker {
    manager: Arc<Mutex<SubscriptionManager>>,
    cancel_rx: tokio::sync::mpsc::UnboundedReceiver<SubscriptionKey>,
}

impl SubscriptionsWorker {
    pub async fn run(mut self) {
        while let Some(key) = self.cancel_rx.recv().await {
            self.manager.lock().cancel(key);
        }
    }
}
