// Copyright (c) 2024-present, fjall-rs
// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

use super::Memtable;
use crate::{
    range::{internal_range, UserKeyRange},
    value::{InternalKey, InternalValue},
};
use std::{ops::Bound, sync::Arc};

/// Owned, double-ended iterator over a memtable range
///
/// Keeps the memtable alive and re-seeks the skiplist from the last
/// yielded key on every step, so it never borrows from the memtable.
pub struct MemtableIter {
    memtable: Arc<Memtable>,
    lo: Bound<InternalKey>,
    hi: Bound<InternalKey>,
    done: bool,
}

impl MemtableIter {
    pub fn new(memtable: Arc<Memtable>, range: &UserKeyRange) -> Self {
        let (lo, hi) = internal_range(range);

        Self {
            memtable,
            lo,
            hi,
            done: false,
        }
    }
}

impl Iterator for MemtableIter {
    type Item = InternalValue;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }

        let Some(entry) = self
            .memtable
            .items
            .range((self.lo.clone(), self.hi.clone()))
            .next()
        else {
            self.done = true;
            return None;
        };

        self.lo = Bound::Excluded(entry.key().clone());

        Some(InternalValue {
            key: entry.key().clone(),
            value: entry.value().clone(),
        })
    }
}

impl DoubleEndedIterator for MemtableIter {
    fn next_back(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }

        let Some(entry) = self
            .memtable
            .items
            .range((self.lo.clone(), self.hi.clone()))
            .next_back()
        else {
            self.done = true;
            return None;
        };

        self.hi = Bound::Excluded(entry.key().clone());

        Some(InternalValue {
            key: entry.key().clone(),
            value: entry.value().clone(),
        })
    }
}
