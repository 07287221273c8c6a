// Copyright (c) 2024-present, fjall-rs
// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

use crate::segment::{meta::SegmentId, Segment};
use std::sync::Arc;

/// A level of the LSM-tree
///
/// L0 may hold overlapping segments and is ordered newest first.
/// All deeper levels are sorted runs: segments are key-disjoint and
/// ordered by their lowest key.
#[derive(Clone, Default)]
pub struct Level {
    segments: Vec<Arc<Segment>>,
    is_disjoint: bool,
}

impl std::fmt::Debug for Level {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_list()
            .entries(self.segments.iter().map(|x| x.id()))
            .finish()
    }
}

impl Level {
    pub fn new(is_disjoint: bool) -> Self {
        Self {
            segments: Vec::with_capacity(10),
            is_disjoint,
        }
    }

    fn sort(&mut self) {
        if self.is_disjoint {
            self.segments
                .sort_by(|a, b| a.meta.key_range.0.cmp(&b.meta.key_range.0));
        } else {
            // Newest first, by highest sequence number
            self.segments.sort_by(|a, b| {
                (b.meta.seqnos.1, b.meta.id).cmp(&(a.meta.seqnos.1, a.meta.id))
            });
        }
    }

    pub fn insert(&mut self, segment: Arc<Segment>) {
        self.segments.push(segment);
        self.sort();
    }

    pub fn remove(&mut self, id: SegmentId) -> Option<Arc<Segment>> {
        let idx = self.segments.iter().position(|x| x.id() == id)?;
        Some(self.segments.remove(idx))
    }

    pub fn contains_id(&self, id: SegmentId) -> bool {
        self.segments.iter().any(|x| x.id() == id)
    }

    pub fn len(&self) -> usize {
        self.segments.len()
    }

    pub fn is_empty(&self) -> bool {
        self.segments.is_empty()
    }

    /// Size of all segment files in bytes
    pub fn size(&self) -> u64 {
        self.segments.iter().map(|x| x.meta.file_size).sum()
    }

    pub fn iter(&self) -> impl DoubleEndedIterator<Item = &Arc<Segment>> {
        self.segments.iter()
    }

    /// Segments that overlap the key range `[min, max]`
    pub fn overlapping<'a>(
        &'a self,
        min: &'a [u8],
        max: &'a [u8],
    ) -> impl Iterator<Item = &'a Arc<Segment>> + 'a {
        self.segments
            .iter()
            .filter(move |x| x.meta.overlaps_key_range(min, max))
    }

    /// Segments that may contain `key`, in read order
    pub fn candidates_for_key<'a>(
        &'a self,
        key: &'a [u8],
    ) -> Box<dyn Iterator<Item = &'a Arc<Segment>> + 'a> {
        if self.is_disjoint {
            let idx = self
                .segments
                .partition_point(|x| &*x.meta.key_range.1 < key);

            Box::new(
                self.segments
                    .get(idx)
                    .filter(|x| x.meta.contains_key(key))
                    .into_iter(),
            )
        } else {
            Box::new(self.segments.iter().filter(|x| x.meta.contains_key(key)))
        }
    }
}
