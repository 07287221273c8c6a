// Copyright (c) 2024-present, fjall-rs
// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

use crate::{
    instrumentation::{InstrumentationSink, StatCode},
    sync::{atomic::AcqRelAtomicU64, InstrumentedCondvar, InstrumentedMutex},
};
use std::{sync::Arc, time::Duration};

/// Keeps track of the size of the tree's write buffer
/// (active and sealed memtables) and lets writers wait for it to drain
pub struct WriteBufferManager {
    size: AcqRelAtomicU64,
    gate: InstrumentedMutex<()>,
    drained: InstrumentedCondvar,
}

impl WriteBufferManager {
    pub fn new(sink: Option<Arc<dyn InstrumentationSink>>) -> Self {
        Self {
            size: AcqRelAtomicU64::default(),
            gate: InstrumentedMutex::new(()),
            drained: InstrumentedCondvar::with_instrumentation(StatCode::WriteStallWait, sink),
        }
    }

    pub fn get(&self) -> u64 {
        self.size.load()
    }

    // Adds some bytes to the write buffer counter.
    //
    // Returns the counter *after* incrementing.
    pub fn allocate(&self, n: u64) -> u64 {
        self.size.fetch_add(n) + n
    }

    // Frees some bytes from the write buffer counter and wakes up stalled writers.
    //
    // Returns the counter *after* decrementing.
    pub fn free(&self, n: u64) -> u64 {
        let mut now = self.size.load();

        let after = loop {
            let subbed = now.saturating_sub(n);

            match self.size.compare_exchange_weak(now, subbed) {
                Ok(_) => break subbed,
                Err(observed) => now = observed,
            }
        };

        // NOTE: Take the gate so a writer between its size check and
        // its wait cannot miss this notification
        let _gate = self.gate.lock();
        self.drained.notify_all();

        after
    }

    /// Blocks until the buffer is below `limit`.
    ///
    /// `should_abort` is polled every `poll` interval; the wait ends early
    /// with `false` if it returns `true`.
    pub fn wait_below(
        &self,
        limit: u64,
        poll: Duration,
        mut should_abort: impl FnMut() -> bool,
    ) -> bool {
        let mut gate = self.gate.lock();

        loop {
            if self.get() < limit {
                return true;
            }

            if should_abort() {
                return false;
            }

            let (guard, _) = self.drained.wait_timeout(gate, poll);
            gate = guard;
        }
    }
}
