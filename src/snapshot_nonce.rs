// Copyright (c) 2024-present, fjall-rs
// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

use crate::{snapshot_tracker::SnapshotTracker, SeqNo};
use std::sync::Arc;

/// Holds a snapshot seqno and automatically frees it from the snapshot tracker when dropped
pub struct SnapshotNonce {
    pub(crate) seqno: SeqNo,
    tracker: Arc<SnapshotTracker>,
}

impl Drop for SnapshotNonce {
    fn drop(&mut self) {
        self.tracker.close(self.seqno);
    }
}

impl SnapshotNonce {
    /// Opens a snapshot at the currently visible sequence number.
    pub fn new(tracker: Arc<SnapshotTracker>) -> Self {
        let seqno = tracker.open();
        Self { seqno, tracker }
    }

    pub fn at(tracker: Arc<SnapshotTracker>, seqno: SeqNo) -> Self {
        tracker.open_at(seqno);
        Self { seqno, tracker }
    }
}

impl Clone for SnapshotNonce {
    fn clone(&self) -> Self {
        Self::at(self.tracker.clone(), self.seqno)
    }
}
