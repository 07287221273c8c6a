// Copyright (c) 2024-present, fjall-rs
// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

use crate::value::InternalValue;
use min_max_heap::MinMaxHeap;

pub type BoxedIterator<'a> = Box<dyn DoubleEndedIterator<Item = crate::Result<InternalValue>> + Send + 'a>;

type IteratorIndex = usize;

#[derive(Debug)]
struct HeapItem(IteratorIndex, InternalValue);

impl PartialEq for HeapItem {
    fn eq(&self, other: &Self) -> bool {
        self.1 == other.1
    }
}
impl Eq for HeapItem {}

impl PartialOrd for HeapItem {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for HeapItem {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.1.key.cmp(&other.1.key)
    }
}

/// This iterator can iterate through N iterators simultaneously in order
/// This is achieved by advancing the iterators that yield the lowest/highest item
/// and merging using a simple k-way merge algorithm
///
/// Every version of every key is yielded, in internal key order
/// (user key ascending, seqno descending). Both ends can be consumed
/// in any interleaving: the heap holds the front and the back item of
/// every source, and an iterator never yields the same item from both ends.
#[allow(clippy::module_name_repetitions)]
pub struct MergeIterator<'a> {
    iterators: Vec<BoxedIterator<'a>>,
    heap: MinMaxHeap<HeapItem>,
    initialized_lo: bool,
    initialized_hi: bool,
}

impl<'a> MergeIterator<'a> {
    /// Initializes a new merge iterator
    pub fn new(iterators: Vec<BoxedIterator<'a>>) -> Self {
        let heap = MinMaxHeap::with_capacity(iterators.len() * 2);

        Self {
            iterators,
            heap,
            initialized_lo: false,
            initialized_hi: false,
        }
    }

    fn advance(&mut self, idx: IteratorIndex) -> crate::Result<()> {
        if let Some(iterator) = self.iterators.get_mut(idx) {
            if let Some(item) = iterator.next() {
                self.heap.push(HeapItem(idx, item?));
            }
        }

        Ok(())
    }

    fn advance_back(&mut self, idx: IteratorIndex) -> crate::Result<()> {
        if let Some(iterator) = self.iterators.get_mut(idx) {
            if let Some(item) = iterator.next_back() {
                self.heap.push(HeapItem(idx, item?));
            }
        }

        Ok(())
    }

    fn initialize_lo(&mut self) -> crate::Result<()> {
        for idx in 0..self.iterators.len() {
            self.advance(idx)?;
        }

        self.initialized_lo = true;
        Ok(())
    }

    fn initialize_hi(&mut self) -> crate::Result<()> {
        for idx in 0..self.iterators.len() {
            self.advance_back(idx)?;
        }

        self.initialized_hi = true;
        Ok(())
    }
}

impl<'a> Iterator for MergeIterator<'a> {
    type Item = crate::Result<InternalValue>;

    fn next(&mut self) -> Option<Self::Item> {
        if !self.initialized_lo {
            if let Err(e) = self.initialize_lo() {
                return Some(Err(e));
            }
        }

        let HeapItem(idx, item) = self.heap.pop_min()?;

        if let Err(e) = self.advance(idx) {
            return Some(Err(e));
        }

        Some(Ok(item))
    }
}

impl<'a> DoubleEndedIterator for MergeIterator<'a> {
    fn next_back(&mut self) -> Option<Self::Item> {
        if !self.initialized_hi {
            if let Err(e) = self.initialize_hi() {
                return Some(Err(e));
            }
        }

        let HeapItem(idx, item) = self.heap.pop_max()?;

        if let Err(e) = self.advance_back(idx) {
            return Some(Err(e));
        }

        Some(Ok(item))
    }
}
