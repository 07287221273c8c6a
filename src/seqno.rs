// Copyright (c) 2024-present, fjall-rs
// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

use crate::{sync::atomic::RelaxedAtomicU64, SeqNo};
use std::sync::Arc;

/// Thread-safe sequence number generator
///
/// Holds the last assigned sequence number. Numbers are only handed out
/// while holding the journal writer lock, which orders them; the counter
/// itself does not publish any other memory, so it can stay relaxed.
#[derive(Clone, Default, Debug)]
pub struct SequenceNumberCounter(Arc<RelaxedAtomicU64>);

impl SequenceNumberCounter {
    /// Creates a new counter, setting it to some previous value
    #[must_use]
    pub fn new(prev: SeqNo) -> Self {
        Self(Arc::new(RelaxedAtomicU64::new(prev)))
    }

    /// Gets the last assigned sequence number.
    #[must_use]
    pub fn get(&self) -> SeqNo {
        self.0.load()
    }

    /// Assigns the next sequence number.
    #[cfg(test)]
    #[must_use]
    pub fn next(&self) -> SeqNo {
        self.0.fetch_add(1) + 1
    }

    /// Assigns `n` consecutive sequence numbers, returning the first one.
    #[must_use]
    pub fn next_n(&self, n: u64) -> SeqNo {
        debug_assert!(n > 0);
        self.0.fetch_add(n) + 1
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_log::test;

    #[test]
    fn seqno_starts_at_one() {
        let counter = SequenceNumberCounter::default();
        assert_eq!(0, counter.get());
        assert_eq!(1, counter.next());
        assert_eq!(2, counter.next());
        assert_eq!(3, counter.next_n(3));
        assert_eq!(5, counter.get());
    }

    #[test]
    fn seqno_continues_after_recovered() {
        let counter = SequenceNumberCounter::new(10);
        assert_eq!(10, counter.get());
        assert_eq!(11, counter.next());
    }
}
