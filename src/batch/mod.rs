// Copyright (c) 2024-present, fjall-rs
// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

pub mod item;

use crate::{value::ValueType, SeqNo, Tree};
use item::Item as BatchItem;

/// Options of a single write
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct WriteOptions {
    /// Sync the journal to disk before the write returns
    ///
    /// Default = false
    pub sync: bool,

    /// Fail with [`crate::Error::Busy`] instead of waiting
    /// when the write buffer is full
    ///
    /// Default = false
    pub no_slowdown: bool,
}

/// An atomic write batch
///
/// Allows atomically writing across multiple keys: all items are
/// written into a single journal record, get consecutive sequence
/// numbers and become visible at the same time.
#[doc(alias = "WriteBatch")]
pub struct Batch {
    pub(crate) data: Vec<BatchItem>,
    tree: Tree,
}

impl Batch {
    /// Initializes a new write batch.
    ///
    /// This function is called by [`Tree::batch`].
    pub(crate) fn new(tree: Tree) -> Self {
        Self {
            data: Vec::new(),
            tree,
        }
    }

    /// Initializes a new write batch with space for `n` items.
    #[must_use]
    pub fn with_capacity(mut self, n: usize) -> Self {
        self.data.reserve(n);
        self
    }

    /// Returns the amount of items in the batch.
    #[must_use]
    pub fn len(&self) -> usize {
        self.data.len()
    }

    /// Returns `true` if the batch holds no items.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Inserts a key-value pair into the batch.
    pub fn insert<K: AsRef<[u8]>, V: AsRef<[u8]>>(&mut self, key: K, value: V) {
        self.data.push(BatchItem::new_unchecked(
            key.as_ref(),
            value.as_ref(),
            ValueType::Value,
        ));
    }

    /// Adds a tombstone marker for a key.
    pub fn remove<K: AsRef<[u8]>>(&mut self, key: K) {
        self.data.push(BatchItem::new_unchecked(
            key.as_ref(),
            *b"",
            ValueType::Tombstone,
        ));
    }

    /// Adds a merge operand for a key.
    ///
    /// Committing fails if the tree has no merge operator.
    pub fn merge<K: AsRef<[u8]>, V: AsRef<[u8]>>(&mut self, key: K, operand: V) {
        self.data.push(BatchItem::new_unchecked(
            key.as_ref(),
            operand.as_ref(),
            ValueType::Merge,
        ));
    }

    /// Commits the batch to the tree atomically.
    ///
    /// Returns the sequence number of the last item, or `None`
    /// if the batch was empty.
    ///
    /// # Errors
    ///
    /// Will return `Err` if an IO error occurs, or an item is invalid.
    pub fn commit(self) -> crate::Result<Option<SeqNo>> {
        self.commit_with(WriteOptions::default())
    }

    /// Commits the batch to the tree atomically, with custom write options.
    ///
    /// # Errors
    ///
    /// Will return `Err` if an IO error occurs, or an item is invalid.
    pub fn commit_with(self, opts: WriteOptions) -> crate::Result<Option<SeqNo>> {
        if self.data.is_empty() {
            return Ok(None);
        }

        for item in &self.data {
            item.validate()?;
        }

        self.tree.write_items(self.data, opts).map(Some)
    }
}
