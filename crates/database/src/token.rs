//! A `Token` externalizes a transaction's read set so a caller can hand it
//! to the subscription manager or query cache without keeping the
//! transaction itself alive.
use common::types::Timestamp;

use crate::reads::ReadSet;

/// What a subscriber or cache entry depends on: the reads that produced a
/// result, plus the timestamp they were read at. Still valid as long as no
/// commit after `ts` writes into `reads`.
#[derive(Clone, Debug)]
pub struct Token {
    reads: ReadSet,
    ts: Timestamp,
}

impl Token {
    pub fn new(reads: ReadSet, ts: Timestamp) -> Self {
        Self { reads, ts }
    }

    pub fn reads(&self) -> &ReadSet {
        &self.reads
    }

    pub fn ts(&self) -> Timestamp {
        self.ts
    }
}
