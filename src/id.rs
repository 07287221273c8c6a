// Copyright (c) 2024-present, fjall-rs
// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

use crate::{segment::meta::SegmentId, sync::atomic::RelaxedAtomicU64};
use std::sync::Arc;

/// Hands out segment IDs
///
/// The counter is restored from the manifest on recovery.
#[derive(Clone, Debug, Default)]
pub struct SegmentIdGenerator(Arc<RelaxedAtomicU64>);

impl SegmentIdGenerator {
    pub fn new(next: SegmentId) -> Self {
        Self(Arc::new(RelaxedAtomicU64::new(next)))
    }

    pub fn next(&self) -> SegmentId {
        self.0.fetch_add(1)
    }

    /// Peeks the next ID that will be handed out
    pub fn peek(&self) -> SegmentId {
        self.0.load()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_log::test;

    #[test]
    fn segment_ids_are_monotonic() {
        let generator = SegmentIdGenerator::new(5);
        assert_eq!(5, generator.next());
        assert_eq!(6, generator.clone().next());
        assert_eq!(7, generator.peek());
    }
}
