// Copyright (c) 2024-present, fjall-rs
// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

use super::Segment;
use crate::{range::UserKeyRange, value::InternalValue};
use std::{collections::VecDeque, ops::Bound, sync::Arc};

/// Lazily loads the blocks of a segment, yielding the items of a key range
///
/// Blocks are consumed from both ends; once the front and back meet,
/// the remaining buffered items are shared.
pub struct Reader {
    segment: Arc<Segment>,
    range: UserKeyRange,

    /// Next block to load from the front
    lo: usize,

    /// One past the next block to load from the back
    hi: usize,

    front: VecDeque<InternalValue>,
    back: VecDeque<InternalValue>,

    done: bool,
}

impl Reader {
    pub fn new(segment: Arc<Segment>, range: UserKeyRange) -> Self {
        let index = &segment.block_index;

        let lo = match &range.0 {
            Bound::Included(key) | Bound::Excluded(key) => index.seek_lower(key),
            Bound::Unbounded => 0,
        };

        let hi = match &range.1 {
            Bound::Included(key) | Bound::Excluded(key) => index.seek_upper(key) + 1,
            Bound::Unbounded => index.len(),
        }
        .min(index.len());

        Self {
            segment,
            range,
            lo,
            hi,
            front: VecDeque::new(),
            back: VecDeque::new(),
            done: false,
        }
    }

    fn below_start(&self, key: &[u8]) -> bool {
        match &self.range.0 {
            Bound::Included(start) => key < &**start,
            Bound::Excluded(start) => key <= &**start,
            Bound::Unbounded => false,
        }
    }

    fn above_end(&self, key: &[u8]) -> bool {
        match &self.range.1 {
            Bound::Included(end) => key > &**end,
            Bound::Excluded(end) => key >= &**end,
            Bound::Unbounded => false,
        }
    }

    fn load(&self, idx: usize) -> crate::Result<VecDeque<InternalValue>> {
        let block = self.segment.load_block(idx)?;
        Ok(block.items.into_vec().into())
    }
}

impl Iterator for Reader {
    type Item = crate::Result<InternalValue>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            if self.done {
                return None;
            }

            let item = if let Some(item) = self.front.pop_front() {
                item
            } else if self.lo < self.hi {
                match self.load(self.lo) {
                    Ok(items) => {
                        self.front = items;
                        self.lo += 1;
                        continue;
                    }
                    Err(e) => {
                        self.done = true;
                        return Some(Err(e));
                    }
                }
            } else if let Some(item) = self.back.pop_front() {
                item
            } else {
                return None;
            };

            if self.below_start(&item.key.user_key) {
                continue;
            }

            if self.above_end(&item.key.user_key) {
                self.done = true;
                return None;
            }

            return Some(Ok(item));
        }
    }
}

impl DoubleEndedIterator for Reader {
    fn next_back(&mut self) -> Option<Self::Item> {
        loop {
            if self.done {
                return None;
            }

            let item = if let Some(item) = self.back.pop_back() {
                item
            } else if self.lo < self.hi {
                match self.load(self.hi - 1) {
                    Ok(items) => {
                        self.back = items;
                        self.hi -= 1;
                        continue;
                    }
                    Err(e) => {
                        self.done = true;
                        return Some(Err(e));
                    }
                }
            } else if let Some(item) = self.front.pop_back() {
                item
            } else {
                return None;
            };

            if self.above_end(&item.key.user_key) {
                continue;
            }

            if self.below_start(&item.key.user_key) {
                self.done = true;
                return None;
            }

            return Some(Ok(item));
        }
    }
}
