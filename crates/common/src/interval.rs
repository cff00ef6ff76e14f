//! Half-open byte-string intervals and sets of them.
//!
//! Every read a transaction performs is recorded as an `Interval`
//! `[start, end)` over index-key space, using plain `Vec<u8>` keys rather
//! than a small-vector-optimized byte key type, since this crate has no
//! need for one. A transaction's read set is then a map from
//! index identity to an `IntervalSet`, and overlap detection is "does any
//! write's index key fall inside any interval of the matching set".
use std::{
    collections::BTreeMap,
    ops::Bound,
};

pub type Key = Vec<u8>;

/// The end of a half-open interval: either excluded at a specific key, or
/// unbounded (`+inf`).
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub enum End {
    Excluded(Key),
    Unbounded,
}

impl End {
    pub fn contains(&self, key: &[u8]) -> bool {
        match self {
            End::Unbounded => true,
            End::Excluded(end) => key < end.as_slice(),
        }
    }
}

/// A single half-open range `[start, end)` over index-key space.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub struct Interval {
    pub start: Key,
    pub end: End,
}

impl Interval {
    pub fn all() -> Self {
        Self {
            start: Vec::new(),
            end: End::Unbounded,
        }
    }

    /// A degenerate interval containing exactly one key, used to record a
    /// point lookup (`get(id)`) in a read set.
    pub fn point(key: Key) -> Self {
        let mut end = key.clone();
        // The successor of `key` in byte-string order: append a zero byte.
        // This is the smallest string strictly greater than `key`.
        end.push(0);
        Self {
            start: key,
            end: End::Excluded(end),
        }
    }

    pub fn prefix(key: Key) -> Self {
        let end = match increment(&key) {
            Some(end) => End::Excluded(end),
            None => End::Unbounded,
        };
        Self { start: key, end }
    }

    pub fn contains(&self, key: &[u8]) -> bool {
        self.start.as_slice() <= key && self.end.contains(key)
    }
}

/// The lexicographic successor of a byte string under the "strings have no
/// predecessor but every finite string has a successor" model: the smallest
/// string strictly greater than `key`, found by stripping trailing 0xff
/// bytes and incrementing the first non-0xff byte. `None` if `key` is all
/// 0xff (i.e. its successor is unbounded).
fn increment(key: &[u8]) -> Option<Vec<u8>> {
    let mut out = key.to_vec();
    while let Some(&last) = out.last() {
        if last == 0xff {
            out.pop();
        } else {
            *out.last_mut().unwrap() += 1;
            return Some(out);
        }
    }
    None
}

/// A disjoint, non-adjacent set of intervals over one index's key space.
/// Overlapping or adjacent intervals are merged on insertion so that
/// `contains` stays `O(log n)` regardless of how many individual reads
/// contributed to the set.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct IntervalSet {
    /// Map from each interval's start to its end. Invariant: no two entries
    /// overlap or touch; keys are is sorted by `BTreeMap` order already.
    intervals: BTreeMap<Key, End>,
}

impl IntervalSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.intervals.is_empty()
    }

    pub fn len(&self) -> usize {
        self.intervals.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = Interval> + '_ {
        self.intervals.iter().map(|(start, end)| Interval {
            start: start.clone(),
            end: end.clone(),
        })
    }

    /// Insert `interval`, merging it with any existing intervals it
    /// overlaps or touches.
    pub fn add_interval(&mut self, interval: Interval) {
        let Interval {
            mut start,
            mut end,
        } = interval;

        // Find every existing entry that starts at or before `end` and ends
        // at or after `start`; those all merge into the new interval.
        // First, absorb a preceding interval if it reaches into `start`.
        if let Some((prev_start, prev_end)) = self
            .intervals
            .range((Bound::Unbounded, Bound::Included(start.clone())))
            .next_back()
            .map(|(s, e)| (s.clone(), e.clone()))
        {
            if prev_end.contains(&start) || prev_end == End::Excluded(start.clone()) {
                start = prev_start.clone();
                if end_order(&prev_end, &end) == std::cmp::Ordering::Greater {
                    end = prev_end.clone();
                }
                self.intervals.remove(&prev_start);
            }
        }

        // Then absorb every interval whose start falls within [start, end].
        let to_remove: Vec<Key> = self
            .intervals
            .range(start.clone()..)
            .take_while(|(s, _)| match &end {
                End::Unbounded => true,
                End::Excluded(e) => s.as_slice() <= e.as_slice(),
            })
            .map(|(s, _)| s.clone())
            .collect();
        for key in to_remove {
            if let Some(existing_end) = self.intervals.remove(&key) {
                if end_order(&existing_end, &end) == std::cmp::Ordering::Greater {
                    end = existing_end;
                }
            }
        }

        self.intervals.insert(start, end);
    }

    /// Does any interval in this set contain `key`?
    pub fn contains(&self, key: &[u8]) -> bool {
        match self
            .intervals
            .range((Bound::Unbounded, Bound::Included(key.to_vec())))
            .next_back()
        {
            Some((start, end)) => start.as_slice() <= key && end.contains(key),
            None => false,
        }
    }
}

fn end_order(a: &End, b: &End) -> std::cmp::Ordering {
    match (a, b) {
        (End::Unbounded, End::Unbounded) => std::cmp::Ordering::Equal,
        (End::Unbounded, End::Excluded(_)) => std::cmp::Ordering::Greater,
        (End::Excluded(_), End::Unbounded) => std::cmp::Ordering::Less,
        (End::Excluded(a), End::Excluded(b)) => a.cmp(b),
    }
}
