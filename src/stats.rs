// Copyright (c) 2024-present, fjall-rs
// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

use crate::sync::atomic::{RelaxedAtomicU64, RelaxedAtomicUsize};

/// Counters about background work and write stalls
#[derive(Debug, Default)]
pub struct Stats {
    pub(crate) flushes_completed: RelaxedAtomicUsize,
    pub(crate) compactions_completed: RelaxedAtomicUsize,
    pub(crate) flush_failures: RelaxedAtomicUsize,
    pub(crate) compaction_failures: RelaxedAtomicUsize,
    pub(crate) write_stalls: RelaxedAtomicUsize,
    pub(crate) bytes_flushed: RelaxedAtomicU64,
    pub(crate) bytes_compacted: RelaxedAtomicU64,
}

impl Stats {
    /// Number of memtables written to segments
    #[must_use]
    pub fn flushes_completed(&self) -> usize {
        self.flushes_completed.load()
    }

    /// Number of finished compactions, including trivial moves
    #[must_use]
    pub fn compactions_completed(&self) -> usize {
        self.compactions_completed.load()
    }

    /// Number of failed flush attempts
    #[must_use]
    pub fn flush_failures(&self) -> usize {
        self.flush_failures.load()
    }

    /// Number of failed compaction attempts
    #[must_use]
    pub fn compaction_failures(&self) -> usize {
        self.compaction_failures.load()
    }

    /// Number of times a writer had to wait for the write buffer to drain
    #[must_use]
    pub fn write_stalls(&self) -> usize {
        self.write_stalls.load()
    }

    /// Bytes written by flushes
    #[must_use]
    pub fn bytes_flushed(&self) -> u64 {
        self.bytes_flushed.load()
    }

    /// Bytes written by compactions
    #[must_use]
    pub fn bytes_compacted(&self) -> u64 {
        self.bytes_compacted.load()
    }
}
