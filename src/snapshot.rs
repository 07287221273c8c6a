// Copyright (c) 2024-present, fjall-rs
// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

use crate::{
    iter::Iter,
    mvcc_stream::VersionCollector,
    range::{into_user_range, prefix_to_range},
    snapshot_nonce::SnapshotNonce,
    supervisor::{Supervisor, SupervisorInner},
    SeqNo, UserValue,
};
use std::ops::RangeBounds;

/// Resolves the value of `key` that is visible at `seqno`.
///
/// Memtables are searched newest first, then L0 newest first,
/// then every deeper level.
pub(crate) fn get_at(
    supervisor: &SupervisorInner,
    key: &[u8],
    seqno: SeqNo,
) -> crate::Result<Option<UserValue>> {
    let merge_operator = supervisor.config.merge_operator.as_deref();

    // IMPORTANT: Memtables first, then the version, see Iter::new
    let memtables = supervisor.buffers.snapshot();
    let version = supervisor.directory.current();

    let mut collector = VersionCollector::default();

    for memtable in &memtables {
        if !memtable.scan_versions(key, seqno, |item| collector.push(item)) {
            return collector.resolve(merge_operator);
        }
    }

    for level in version.levels() {
        for segment in level.candidates_for_key(key) {
            if !segment.scan_versions(key, seqno, |item| collector.push(item))? {
                return collector.resolve(merge_operator);
            }
        }
    }

    collector.resolve(merge_operator)
}

/// A snapshot captures a read-only point-in-time view of the tree at the time the snapshot was created.
///
/// As long as the snapshot is open, old versions of objects will not be evicted as to
/// keep the snapshot consistent. Thus, snapshots should only be kept around for as little as possible.
///
/// Snapshots do not persist across restarts.
#[derive(Clone)]
pub struct Snapshot {
    supervisor: Supervisor,
    nonce: SnapshotNonce,
}

impl Snapshot {
    pub(crate) fn new(supervisor: Supervisor, nonce: SnapshotNonce) -> Self {
        log::trace!("Opening snapshot with seqno: {}", nonce.seqno);
        Self { supervisor, nonce }
    }

    /// Returns the sequence number the snapshot reads at.
    #[must_use]
    pub fn seqno(&self) -> SeqNo {
        self.nonce.seqno
    }

    /// Retrieves an item from the snapshot.
    ///
    /// # Examples
    ///
    /// ```
    /// # let folder = tempfile::tempdir()?;
    /// # use talus::Config;
    /// #
    /// # let tree = Config::new(folder).open()?;
    /// let snapshot = tree.snapshot();
    ///
    /// tree.insert("a", "my_value")?;
    ///
    /// let item = snapshot.get("a")?;
    /// assert_eq!(None, item);
    /// #
    /// # Ok::<(), talus::Error>(())
    /// ```
    ///
    /// # Errors
    ///
    /// Will return `Err` if an IO error occurs.
    pub fn get<K: AsRef<[u8]>>(&self, key: K) -> crate::Result<Option<UserValue>> {
        get_at(&self.supervisor, key.as_ref(), self.nonce.seqno)
    }

    /// Returns `true` if the snapshot contains the specified key.
    ///
    /// # Errors
    ///
    /// Will return `Err` if an IO error occurs.
    pub fn contains_key<K: AsRef<[u8]>>(&self, key: K) -> crate::Result<bool> {
        self.get(key).map(|x| x.is_some())
    }

    /// Scans the entire snapshot, returning the amount of items.
    ///
    /// # Errors
    ///
    /// Will return `Err` if an IO error occurs.
    pub fn len(&self) -> crate::Result<usize> {
        let mut count = 0;

        for item in self.iter() {
            let _ = item?;
            count += 1;
        }

        Ok(count)
    }

    /// Returns `true` if the snapshot is empty.
    ///
    /// # Errors
    ///
    /// Will return `Err` if an IO error occurs.
    pub fn is_empty(&self) -> crate::Result<bool> {
        self.iter().next().transpose().map(|x| x.is_none())
    }

    /// Returns an iterator that scans through the entire snapshot.
    ///
    /// Avoid using this function, or limit it as otherwise it may scan a lot of items.
    #[must_use]
    pub fn iter(&self) -> Iter {
        self.range::<&[u8], _>(..)
    }

    /// Returns an iterator over a range of items in the snapshot.
    ///
    /// # Examples
    ///
    /// ```
    /// # let folder = tempfile::tempdir()?;
    /// # use talus::Config;
    /// #
    /// # let tree = Config::new(folder).open()?;
    /// tree.insert("a", "abc")?;
    /// tree.insert("b", "abc")?;
    ///
    /// let snapshot = tree.snapshot();
    ///
    /// tree.insert("c", "abc")?;
    ///
    /// assert_eq!(2, snapshot.range("a"..="c").count());
    /// #
    /// # Ok::<(), talus::Error>(())
    /// ```
    #[must_use]
    pub fn range<K: AsRef<[u8]>, R: RangeBounds<K>>(&self, range: R) -> Iter {
        Iter::new(&self.supervisor, self.nonce.clone(), into_user_range(&range))
    }

    /// Returns an iterator over all items in the snapshot that start with `prefix`.
    #[must_use]
    pub fn prefix<K: AsRef<[u8]>>(&self, prefix: K) -> Iter {
        Iter::new(
            &self.supervisor,
            self.nonce.clone(),
            prefix_to_range(prefix.as_ref()),
        )
    }
}
