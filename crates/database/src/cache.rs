//! Caches the result of running a query function for a given set of
//! arguments, keyed by `(function_id, args)`. Misses
//! collapse via single-flight so that N concurrent callers asking for the
//! same uncached result only run the underlying query once, via a
//! waiting/ready entry split built on `async-broadcast` rather than a
//! full LRU plus isolate execution, since this crate has no
//! query-execution layer of its own.
use std::{
    collections::HashMap,
    future::Future,
};

use async_broadcast::{
    broadcast,
    Sender,
};
use common::types::Timestamp;
use parking_lot::Mutex;
use value::Value;

use crate::{
    reads::find_overlap,
    token::Token,
    writes::WriteOp,
};

#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct CacheKey {
    pub function_id: String,
    pub args: Vec<u8>,
}

#[derive(Clone, Debug)]
pub struct CachedValue {
    pub value: Value,
    pub computed_ts: Timestamp,
}

enum CacheEntry {
    Ready { token: Token, value: CachedValue },
    Waiting { sender: Sender<CachedValue> },
}

/// Cache of query results. `ts`-aware: a lookup at a timestamp at or after
/// the cached result's `computed_ts` is served from cache; an older
/// lookup is treated as a miss, since the cache has no way to prove the
/// cached result was already valid at an earlier timestamp it never
/// actually ran at.
#[derive(Default)]
pub struct QueryCache {
    entries: Mutex<HashMap<CacheKey, CacheEntry>>,
}

pub enum CacheLookup {
    Hit(CachedValue),
    /// No usable cached result exists. The caller should compute the
    /// query and call `fulfil` (or `abandon` on failure); it may have
    /// raced with another caller doing the same, in which case the
    /// last `fulfil` to run wins.
    Miss(CacheMiss),
}

pub struct CacheMiss {
    key: CacheKey,
}

impl QueryCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Look up `key` as of `ts`. If another caller is already computing
    /// the same key, wait for its result instead of recomputing
    /// (single-flight).
    pub async fn get(&self, key: CacheKey, ts: Timestamp) -> CacheLookup {
        enum Action {
            Join(async_broadcast::Receiver<CachedValue>),
            Lead,
        }

        let action = {
            let mut entries = self.entries.lock();
            match entries.get(&key) {
                Some(CacheEntry::Ready { value, .. }) if value.computed_ts <= ts => {
                    return CacheLookup::Hit(value.clone());
                },
                Some(CacheEntry::Waiting { sender }) => Action::Join(sender.new_receiver()),
                _ => {
                    let (sender, _receiver) = broadcast(1);
                    entries.insert(key.clone(), CacheEntry::Waiting { sender });
                    Action::Lead
                },
            }
        };

        match action {
            Action::Join(mut receiver) => match receiver.recv().await {
                Ok(value) => CacheLookup::Hit(value),
                Err(_) => CacheLookup::Miss(CacheMiss { key }),
            },
            Action::Lead => CacheLookup::Miss(CacheMiss { key }),
        }
    }

    /// Called by the single-flight winner once it has computed a result:
    /// installs it as `Ready` and wakes everyone waiting on it.
    pub fn fulfil(&self, miss: CacheMiss, token: Token, value: CachedValue) {
        let mut entries = self.entries.lock();
        if let Some(CacheEntry::Waiting { sender }) = entries.remove(&miss.key) {
            let _ = sender.try_broadcast(value.clone());
        }
        entries.insert(miss.key, CacheEntry::Ready { token, value });
    }

    /// Called if the computation failed: drops the waiting entry so
    /// anyone joined on it gets a closed-channel error and retries
    /// instead of hanging forever.
    pub fn abandon(&self, miss: CacheMiss) {
        self.entries.lock().remove(&miss.key);
    }

    /// Invalidate every ready entry whose token overlaps `writes`,
    /// reusing the same overlap routine the committer and subscription
    /// manager use.
    pub fn invalidate(&self, writes: &[WriteOp]) {
        self.entries.lock().retain(|_, entry| match entry {
            CacheEntry::Ready { token, .. } => find_overlap(token.reads(), writes.iter()).is_none(),
            CacheEntry::Waiting { .. } => true,
        });
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }
}

/// Run `compute` behind this cache's single-flight machinery: on a hit,
/// returns immediately; on a miss, runs `compute`, installs the result,
/// and returns it.
pub async fn get_or_compute<F, Fut>(cache: &QueryCache, key: CacheKey, ts: Timestamp, compute: F) -> anyhow::Result<CachedValue>
where
    F: FnOnce() -> Fut,
    Fut: Future<Output = anyhow::Result<(Token, CachedValue)>>,
{
    match cache.get(key, ts).await {
        CacheLookup::Hit(value) => Ok(value),
        CacheLookup::Miss(miss) => match compute().await {
            Ok((token, value)) => {
                cache.fulfil(miss, token, value.clone());
                Ok(value)
            },
            Err(e) => {
                cache.abandon(miss);
                Err(e)
            },
        },
    }
}

#[cfg(test)]
mod tests {
    use common::index::IndexName;
    use value::TableName;

    use super::*;
    use crate::reads::ReadSet;

    fn key() -> CacheKey {
        CacheKey {
            function_id: "listItems".to_owned(),
            args: vec![],
        }
    }

    #[tokio::test]
    async fn miss_then_fulfil_then_hit() {
        let cache = QueryCache::new();
        let lookup = cache.get(key(), Timestamp::new(10)).await;
        let CacheLookup::Miss(miss) = lookup else {
            panic!("expected a miss on an empty cache");
        };
        let token = Token::new(ReadSet::empty(), Timestamp::new(10));
        let value = CachedValue {
            value: Value::Int64(1),
            computed_ts: Timestamp::new(10),
        };
        cache.fulfil(miss, token, value);

        let lookup = cache.get(key(), Timestamp::new(10)).await;
        assert!(matches!(lookup, CacheLookup::Hit(_)));
    }

    #[tokio::test]
    async fn lookup_older_than_computed_ts_never_serves_a_future_result() {
        let cache = QueryCache::new();
        let miss = match cache.get(key(), Timestamp::new(10)).await {
            CacheLookup::Miss(m) => m,
            _ => panic!("expected a miss"),
        };
        cache.fulfil(
            miss,
            Token::new(ReadSet::empty(), Timestamp::new(10)),
            CachedValue {
                value: Value::Int64(1),
                computed_ts: Timestamp::new(10),
            },
        );

        if let CacheLookup::Hit(value) = cache.get(key(), Timestamp::new(5)).await {
            assert!(value.computed_ts <= Timestamp::new(5));
        }
    }

    #[tokio::test]
    async fn invalidate_drops_entries_overlapping_a_write() {
        let cache = QueryCache::new();
        let table: TableName = "items".parse().unwrap();
        let primary = IndexName::primary(table.clone());
        let mut reads = ReadSet::empty();
        let doc_id = value::DocumentId::new(table, value::InternalId::from_bytes([1; 16]));
        reads.record_read(primary.clone(), common::interval::Interval::point(doc_id.internal_id.to_string().into_bytes()));

        let miss = match cache.get(key(), Timestamp::new(1)).await {
            CacheLookup::Miss(m) => m,
            _ => panic!("expected a miss"),
        };
        cache.fulfil(
            miss,
            Token::new(reads, Timestamp::new(1)),
            CachedValue {
                value: Value::Int64(1),
                computed_ts: Timestamp::new(1),
            },
        );

        let delta = crate::writes::IndexDelta {
            index: primary,
            old_key: Some(doc_id.internal_id.to_string().into_bytes()),
            new_key: Some(doc_id.internal_id.to_string().into_bytes()),
        };
        let write = WriteOp::new(doc_id, crate::writes::Update::Delete, vec![delta]);
        cache.invalidate(&[write]);
        assert_eq!(cache.len(), 0);
    }
}
