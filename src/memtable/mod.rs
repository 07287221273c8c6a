// Copyright (c) 2024-present, fjall-rs
// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

mod iter;

pub use iter::MemtableIter;

use crate::{
    sync::atomic::{AcqRelAtomicBool, RelaxedAtomicU64},
    value::{InternalKey, InternalValue, SeqNo, UserValue, ValueType},
};
use crossbeam_skiplist::SkipMap;

/// Memtables are identified by the ID of the journal they are logged to
pub type MemtableId = u64;

/// Lifecycle of a memtable
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum MemtableState {
    /// Accepting writes
    Mutable,

    /// Sealed, waiting to be flushed; still serves reads
    Immutable,

    /// Contents are registered in a segment, retired once unreferenced
    Flushed,
}

/// The memtable serves as an intermediary storage for new items
///
/// Backed by a lock-free skiplist, so any number of writers
/// can insert concurrently.
pub struct Memtable {
    id: MemtableId,

    pub(crate) items: SkipMap<InternalKey, UserValue>,

    /// Approximate memtable size
    ///
    /// If this grows too large, the memtable is rotated
    approximate_size: RelaxedAtomicU64,

    highest_seqno: RelaxedAtomicU64,

    sealed: AcqRelAtomicBool,
    flushed: AcqRelAtomicBool,
}

impl std::fmt::Debug for Memtable {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "Memtable#{}({:?}, {} items, {}B)",
            self.id,
            self.state(),
            self.len(),
            self.size()
        )
    }
}

impl Memtable {
    pub fn new(id: MemtableId) -> Self {
        Self {
            id,
            items: SkipMap::new(),
            approximate_size: RelaxedAtomicU64::default(),
            highest_seqno: RelaxedAtomicU64::default(),
            sealed: AcqRelAtomicBool::default(),
            flushed: AcqRelAtomicBool::default(),
        }
    }

    pub fn id(&self) -> MemtableId {
        self.id
    }

    pub fn state(&self) -> MemtableState {
        if self.flushed.load() {
            MemtableState::Flushed
        } else if self.sealed.load() {
            MemtableState::Immutable
        } else {
            MemtableState::Mutable
        }
    }

    pub(crate) fn seal(&self) {
        self.sealed.store(true);
    }

    pub(crate) fn mark_flushed(&self) {
        debug_assert!(self.sealed.load());
        self.flushed.store(true);
    }

    /// Returns the newest version of `key` with a seqno at or below `seqno`.
    #[cfg(test)]
    pub fn get(&self, key: &[u8], seqno: SeqNo) -> Option<InternalValue> {
        let mut result = None;

        self.scan_versions(key, seqno, |item| {
            result = Some(item);
            false
        });

        result
    }

    /// Visits versions of `key` at or below `seqno`, newest first, until `visit` returns `false`.
    ///
    /// Returns `false` if the visitor stopped the scan.
    pub fn scan_versions(
        &self,
        key: &[u8],
        seqno: SeqNo,
        mut visit: impl FnMut(InternalValue) -> bool,
    ) -> bool {
        // NOTE: Versions are sorted by Reverse(seqno), so (key, seqno)
        // is the lowest internal key that may be visible to the reader
        //
        // Example: We search for "abc" at seqno 4
        //
        // key -> seqno
        //
        // a   -> 7
        // abc -> 5
        // abc -> 4 <<< Start of the range
        // abc -> 3
        // abcdef -> 6
        let start = InternalKey::new(key, seqno, ValueType::Value);

        for entry in self.items.range(start..) {
            let internal_key = entry.key();

            // We are past the searched key
            if &*internal_key.user_key != key {
                break;
            }

            let item = InternalValue {
                key: internal_key.clone(),
                value: entry.value().clone(),
            };

            if !visit(item) {
                return false;
            }
        }

        true
    }

    /// Get approximate size of memtable in bytes
    pub fn size(&self) -> u64 {
        self.approximate_size.load()
    }

    /// Count the amount of items in the memtable
    pub fn len(&self) -> usize {
        self.items.len()
    }

    /// Returns `true` if the memtable is empty
    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Inserts an item into the memtable
    ///
    /// Returns the item size and the memtable size after the insert.
    pub fn insert(&self, item: InternalValue) -> (u64, u64) {
        debug_assert!(
            !self.sealed.load(),
            "inserted into sealed memtable {}",
            self.id
        );

        let item_size = item.size() as u64;

        let size_before = self.approximate_size.fetch_add(item_size);
        self.highest_seqno.fetch_max(item.key.seqno);

        self.items.insert(item.key, item.value);

        (item_size, size_before + item_size)
    }

    /// Returns the highest sequence number in the memtable
    pub fn highest_seqno(&self) -> Option<SeqNo> {
        if self.is_empty() {
            None
        } else {
            Some(self.highest_seqno.load())
        }
    }
}
