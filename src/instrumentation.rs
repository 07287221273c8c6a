// Copyright (c) 2024-present, fjall-rs
// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

use std::{sync::Arc, time::Duration};

/// Identifies what a recorded duration or counter refers to
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
#[non_exhaustive]
pub enum StatCode {
    /// Not recorded
    None,

    /// Time spent waiting for the write sequencing lock
    DbMutexWait,

    /// Time spent waiting for the version metadata lock
    MetadataMutexWait,

    /// Time spent waiting to commit a finished flush
    FlushCommitWait,

    /// Time spent waiting for the snapshot registry
    SnapshotTrackerWait,

    /// Time spent waiting for the compaction bookkeeping lock
    CompactionStateWait,

    /// Time writers were stalled because the write buffer was full
    WriteStallWait,

    /// Duration of a journal fsync
    JournalSync,

    /// Duration of writing a memtable to a segment
    FlushDuration,

    /// Duration of a single compaction
    CompactionDuration,

    /// Number of mutations admitted
    KeysWritten,

    /// Code reserved for embedders
    Custom(u32),
}

/// Receives timings and counters from the engine
///
/// All methods are called from foreground and background threads,
/// so implementations should be cheap and non-blocking.
pub trait InstrumentationSink: Send + Sync {
    /// Records that something identified by `code` took `duration`.
    fn record_duration(&self, code: StatCode, duration: Duration);

    /// Adds `n` to the counter identified by `code`.
    fn increment(&self, code: StatCode, n: u64) {
        let _ = (code, n);
    }
}

/// Optional sink, does nothing if absent
#[derive(Clone, Default)]
pub(crate) struct Instrumentation(Option<Arc<dyn InstrumentationSink>>);

impl Instrumentation {
    pub fn new(sink: Option<Arc<dyn InstrumentationSink>>) -> Self {
        Self(sink)
    }

    /// Runs `f`, recording its duration if a sink is installed.
    pub fn timed<T>(&self, code: StatCode, f: impl FnOnce() -> T) -> T {
        match &self.0 {
            Some(sink) if code != StatCode::None => {
                let start = std::time::Instant::now();
                let result = f();
                sink.record_duration(code, start.elapsed());
                result
            }
            _ => f(),
        }
    }

    pub fn increment(&self, code: StatCode, n: u64) {
        if let Some(sink) = &self.0 {
            sink.increment(code, n);
        }
    }
}
