//! Non-colliding sequence numbers for one originating identity.
//!
//! The ledger rejects a transaction unless its sequence is exactly one past
//! the account's current value, so concurrent submitters must never share an
//! ordinal. Allocation is a single atomic read-and-advance with no suspension
//! point in between.

use std::sync::atomic::{AtomicI64, Ordering};

#[derive(Debug)]
pub struct SequenceAllocator {
    last: AtomicI64,
}

impl SequenceAllocator {
    /// `base` is the sequence the ledger currently reports for the origin.
    pub fn new(base: i64) -> Self {
        Self {
            last: AtomicI64::new(base),
        }
    }

    /// Reserves the next `n` ordinals.
    pub fn allocate(&self, n: usize) -> SequenceRange {
        let n = i64::try_from(n).unwrap_or(i64::MAX);
        let previous = self.last.fetch_add(n, Ordering::SeqCst);
        SequenceRange {
            next: previous + 1,
            end: previous + n,
        }
    }

    pub fn next(&self) -> i64 {
        self.last.fetch_add(1, Ordering::SeqCst) + 1
    }

    /// Re-seeds from a fresh remote read.
    pub fn reset(&self, base: i64) {
        let previous = self.last.swap(base, Ordering::SeqCst);
        if base < previous {
            tracing::debug!(previous, base, "sequence allocator moved backwards on reset");
        }
    }

    pub fn last_issued(&self) -> i64 {
        self.last.load(Ordering::SeqCst)
    }
}

/// Inclusive range of reserved ordinals.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SequenceRange {
    next: i64,
    end: i64,
}

impl SequenceRange {
    pub fn first(&self) -> i64 {
        self.next
    }

    pub fn last(&self) -> i64 {
        self.end
    }

    pub fn is_empty(&self) -> bool {
        self.next > self.end
    }
}

impl Iterator for SequenceRange {
    type Item = i64;

    fn next(&mut self) -> Option<i64> {
        if self.next > self.end {
            return None;
        }
        let value = self.next;
        self.next += 1;
        Some(value)
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let len = usize::try_from((self.end - self.next + 1).max(0)).unwrap_or(usize::MAX);
        (len, Some(len))
    }
}

impl ExactSizeIterator for SequenceRange {}

/// How an [`OrderedSubmitter`](crate::engine::submit::OrderedSubmitter)
/// learns the origin's sequence.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SequenceMode {
    /// One remote read, then every ordinal is allocated locally.
    Snapshot,
    /// Re-read the remote sequence before every `chunk` submissions.
    Refresh { chunk: usize },
}
