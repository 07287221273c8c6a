// Copyright (c) 2024-present, fjall-rs
// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

use crate::{
    instrumentation::{InstrumentationSink, StatCode},
    segment::meta::SegmentId,
    sync::{InstrumentedCondvar, InstrumentedMutex},
    HashSet,
};
use std::sync::{Arc, MutexGuard};

/// Segments that are currently inputs of a running compaction
///
/// A hidden segment must not be picked by another compaction.
#[derive(Debug, Default)]
pub struct HiddenSet(HashSet<SegmentId>);

impl HiddenSet {
    pub fn is_hidden(&self, id: SegmentId) -> bool {
        self.0.contains(&id)
    }

    pub fn is_any_hidden(&self, ids: &[SegmentId]) -> bool {
        ids.iter().any(|id| self.is_hidden(*id))
    }

    pub fn hide(&mut self, ids: &[SegmentId]) {
        self.0.extend(ids.iter().copied());
    }

    pub fn show(&mut self, ids: &[SegmentId]) {
        for id in ids {
            self.0.remove(id);
        }
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }
}

/// Bookkeeping shared by all compactions of a tree
pub struct CompactionState {
    hidden: InstrumentedMutex<HiddenSet>,

    /// Notified every time segments are shown again
    released: InstrumentedCondvar,
}

impl CompactionState {
    pub fn new(sink: Option<Arc<dyn InstrumentationSink>>) -> Self {
        Self {
            hidden: InstrumentedMutex::with_instrumentation(
                HiddenSet::default(),
                StatCode::CompactionStateWait,
                sink,
            ),
            released: InstrumentedCondvar::new(),
        }
    }

    pub fn lock(&self) -> MutexGuard<'_, HiddenSet> {
        self.hidden.lock()
    }

    /// Waits for some compaction to release its inputs, or for the timeout.
    pub fn wait_for_release<'a>(
        &self,
        guard: MutexGuard<'a, HiddenSet>,
        timeout: std::time::Duration,
    ) -> MutexGuard<'a, HiddenSet> {
        self.released.wait_timeout(guard, timeout).0
    }

    fn show(&self, ids: &[SegmentId]) {
        self.hidden.lock().show(ids);
        self.released.notify_all();
    }
}

/// Shows the hidden segments again when dropped
pub struct HiddenGuard<'a> {
    state: &'a CompactionState,
    ids: Vec<SegmentId>,
}

impl<'a> HiddenGuard<'a> {
    /// Hides `ids` in the already locked hidden set.
    pub fn new(state: &'a CompactionState, hidden: &mut HiddenSet, ids: &[SegmentId]) -> Self {
        hidden.hide(ids);

        Self {
            state,
            ids: ids.to_vec(),
        }
    }
}

impl Drop for HiddenGuard<'_> {
    fn drop(&mut self) {
        self.state.show(&self.ids);
    }
}
