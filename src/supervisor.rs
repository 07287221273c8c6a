// Copyright (c) 2024-present, fjall-rs
// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

use crate::{
    buffer_sequence::BufferSequence,
    compaction::{self, state::CompactionState, CompactionStrategy},
    instrumentation::Instrumentation,
    journal::Journal,
    poison_dart::PoisonSignal,
    seqno::SequenceNumberCounter,
    snapshot_tracker::SnapshotTracker,
    stats::Stats,
    stop_signal::StopSignal,
    sync::{atomic::RelaxedAtomicUsize, InstrumentedCondvar, InstrumentedMutex},
    version::VersionDirectory,
    worker_pool::WorkerMessage,
    write_buffer_manager::WriteBufferManager,
    Config,
};
use std::sync::Arc;
use std_semaphore::Semaphore;

/// State shared between the tree handles, snapshots and background workers
pub struct SupervisorInner {
    pub config: Config,

    /// Last assigned sequence number
    pub seqno: SequenceNumberCounter,

    pub snapshot_tracker: Arc<SnapshotTracker>,

    /// Journal aka Commit log aka Write-ahead log (WAL)
    ///
    /// Its writer lock is the sequencing critical section of all writes.
    pub(crate) journal: Journal,

    /// Active and sealed memtables
    pub(crate) buffers: BufferSequence,

    pub(crate) directory: VersionDirectory,

    pub(crate) write_buffer_manager: WriteBufferManager,

    pub(crate) compaction_state: CompactionState,
    pub(crate) compaction_strategy: Arc<dyn CompactionStrategy>,

    /// Limits the amount of concurrently running flushes
    pub(crate) flush_semaphore: Semaphore,

    /// Serializes committing finished flushes
    pub(crate) flush_commit_lock: InstrumentedMutex<()>,

    /// Notified every time flushed memtables are committed
    pub(crate) flush_committed: InstrumentedCondvar,

    pub(crate) flush_failures_in_row: RelaxedAtomicUsize,
    pub(crate) compaction_failures_in_row: RelaxedAtomicUsize,

    pub(crate) stats: Stats,
    pub(crate) stop_signal: StopSignal,

    /// Set if writes are halted, because durability cannot be guaranteed anymore
    pub(crate) is_poisoned: PoisonSignal,

    pub(crate) instrumentation: Instrumentation,

    pub(crate) worker_sender: flume::Sender<WorkerMessage>,
}

#[derive(Clone)]
pub struct Supervisor(Arc<SupervisorInner>);

impl std::ops::Deref for Supervisor {
    type Target = SupervisorInner;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl Supervisor {
    pub fn new(inner: SupervisorInner) -> Self {
        Self(Arc::new(inner))
    }
}

impl SupervisorInner {
    pub fn is_poisoned(&self) -> bool {
        self.is_poisoned.load()
    }

    /// Asks the worker pool to flush a sealed memtable.
    pub fn notify_flush(&self) {
        if self.worker_sender.try_send(WorkerMessage::Flush).is_err() {
            log::warn!("Worker queue is full, could not schedule flush");
        }
    }

    /// Asks the worker pool to check if compaction is needed.
    pub fn notify_compaction(&self) {
        self.worker_sender.try_send(WorkerMessage::Compact).ok();
    }

    pub(crate) fn compaction_options(&self) -> compaction::worker::Options<'_> {
        compaction::worker::Options {
            config: &self.config,
            directory: &self.directory,
            state: &self.compaction_state,
            snapshot_tracker: &self.snapshot_tracker,
            strategy: self.compaction_strategy.as_ref(),
            stop_signal: &self.stop_signal,
            stats: &self.stats,
            instrumentation: &self.instrumentation,
        }
    }
}
