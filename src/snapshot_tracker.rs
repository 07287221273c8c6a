// Copyright (c) 2024-present, fjall-rs
// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

use crate::{
    instrumentation::{InstrumentationSink, StatCode},
    sync::{atomic::AcqRelAtomicU64, InstrumentedMutex},
    SeqNo,
};
use std::{collections::BTreeMap, sync::Arc};

/// Keeps track of open snapshots and the highest visible sequence number
///
/// Every read registers its sequence number bound here for as long as it runs,
/// so flushes and compactions can compute which versions are still needed.
#[allow(clippy::module_name_repetitions)]
pub struct SnapshotTracker {
    /// Open snapshot bounds mapped to the amount of readers using them
    open: InstrumentedMutex<BTreeMap<SeqNo, usize>>,

    /// Highest sequence number whose write is fully applied to the memtable
    visible: AcqRelAtomicU64,
}

impl SnapshotTracker {
    pub fn new(visible: SeqNo, sink: Option<Arc<dyn InstrumentationSink>>) -> Self {
        Self {
            open: InstrumentedMutex::with_instrumentation(
                BTreeMap::new(),
                StatCode::SnapshotTrackerWait,
                sink,
            ),
            visible: AcqRelAtomicU64::new(visible),
        }
    }

    /// Makes all writes up to `seqno` visible to new readers.
    pub fn publish(&self, seqno: SeqNo) {
        debug_assert!(seqno >= self.visible.load());
        self.visible.store(seqno);
    }

    pub fn visible_seqno(&self) -> SeqNo {
        self.visible.load()
    }

    /// Opens a snapshot at the currently visible sequence number.
    pub fn open(&self) -> SeqNo {
        let mut open = self.open.lock();

        // NOTE: Read the visible seqno while holding the lock, so a
        // concurrent watermark computation cannot miss this reader
        let seqno = self.visible.load();
        *open.entry(seqno).or_default() += 1;

        log::trace!("open snapshot {seqno}");
        seqno
    }

    /// Opens a snapshot at a given sequence number.
    pub fn open_at(&self, seqno: SeqNo) {
        log::trace!("open snapshot {seqno}");
        *self.open.lock().entry(seqno).or_default() += 1;
    }

    pub fn close(&self, seqno: SeqNo) {
        log::trace!("close snapshot {seqno}");

        let mut open = self.open.lock();

        if let Some(count) = open.get_mut(&seqno) {
            *count -= 1;

            if *count == 0 {
                open.remove(&seqno);
            }
        } else {
            log::error!("Closed snapshot {seqno} that was never opened");
        }
    }

    /// Returns the lowest sequence number any reader may still read at.
    ///
    /// For every key, the newest version at or below the watermark and all
    /// versions above it must be retained; older ones may be dropped.
    pub fn gc_watermark(&self) -> SeqNo {
        let open = self.open.lock();

        open.keys()
            .next()
            .copied()
            .unwrap_or_else(|| self.visible.load())
    }

    pub fn open_count(&self) -> usize {
        self.open.lock().values().sum()
    }
}
