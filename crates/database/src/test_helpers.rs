//! An in-memory `Persistence` implementation for tests -- this workspace
//! ships no real durability backend; the durability driver is swappable
//! and out of this crate's scope.
use std::collections::BTreeMap;

use async_trait::async_trait;
use common::{
    persistence::{
        ConflictStrategy,
        DocumentLogEntry,
        Persistence,
        RetentionValidator,
    },
    types::Timestamp,
};
use parking_lot::Mutex;
use value::DocumentId;

#[derive(Default)]
pub struct InMemoryPersistence {
    entries: Mutex<BTreeMap<Timestamp, Vec<DocumentLogEntry>>>,
}

impl InMemoryPersistence {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl Persistence for InMemoryPersistence {
    async fn write(&self, writes: Vec<DocumentLogEntry>, conflict_strategy: ConflictStrategy) -> anyhow::Result<()> {
        let mut entries = self.entries.lock();
        for write in &writes {
            if conflict_strategy == ConflictStrategy::Error && entries.contains_key(&write.ts) {
                anyhow::bail!("commit timestamp {} already written", write.ts);
            }
        }
        for write in writes {
            entries.entry(write.ts).or_default().push(write);
        }
        Ok(())
    }

    async fn load_latest(&self) -> anyhow::Result<(Timestamp, Vec<DocumentLogEntry>)> {
        let entries = self.entries.lock();
        let max_ts = entries.keys().next_back().copied().unwrap_or(Timestamp::MIN);
        let all = entries.values().flatten().cloned().collect();
        Ok((max_ts, all))
    }

    async fn scan(&self, id: DocumentId, as_of_ts: Timestamp) -> anyhow::Result<Option<DocumentLogEntry>> {
        let entries = self.entries.lock();
        Ok(entries
            .range(..=as_of_ts)
            .rev()
            .flat_map(|(_, writes)| writes.iter())
            .find(|w| w.id == id)
            .cloned())
    }
}

/// Always reports every timestamp as retained -- test databases don't
/// exercise retention GC unless they opt in with their own validator.
pub struct AlwaysRetained;

impl RetentionValidator for AlwaysRetained {
    fn is_retained(&self, _ts: Timestamp) -> bool {
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn write_then_load_latest_round_trips() {
        let persistence = InMemoryPersistence::new();
        let entry = DocumentLogEntry {
            ts: Timestamp::new(1),
            id: DocumentId::new("items".parse().unwrap(), value::InternalId::from_bytes([1; 16])),
            value: Some(value::Value::Int64(1)),
        };
        persistence.write(vec![entry.clone()], ConflictStrategy::Error).await.unwrap();
        let (max_ts, entries) = persistence.load_latest().await.unwrap();
        assert_eq!(max_ts, Timestamp::new(1));
        assert_eq!(entries, vec![entry]);
    }

    #[tokio::test]
    async fn duplicate_ts_with_error_strategy_is_rejected() {
        let persistence = InMemoryPersistence::new();
        let entry = DocumentLogEntry {
            ts: Timestamp::new(1),
            id: DocumentId::new("items".parse().unwrap(), value::InternalId::from_bytes([1; 16])),
            value: None,
        };
        persistence.write(vec![entry.clone()], ConflictStrategy::Error).await.unwrap();
        assert!(persistence.write(vec![entry], ConflictStrategy::Error).await.is_err());
    }
}
