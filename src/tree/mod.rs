// Copyright (c) 2024-present, fjall-rs
// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

pub mod inner;

use crate::{
    batch::{item::Item as BatchItem, Batch, WriteOptions},
    buffer_sequence::BufferSequence,
    compaction::{state::CompactionState, worker::compact_range, Leveled},
    file::JOURNALS_FOLDER,
    instrumentation::{Instrumentation, StatCode},
    iter::Iter,
    journal::writer::{PersistMode, Writer as JournalWriter},
    path::absolute_path,
    poison_dart::{PoisonDart, PoisonSignal},
    range::{into_user_range, prefix_to_range},
    recovery::recover_journals,
    seqno::SequenceNumberCounter,
    snapshot::{get_at, Snapshot},
    snapshot_nonce::SnapshotNonce,
    snapshot_tracker::SnapshotTracker,
    stats::Stats,
    stop_signal::StopSignal,
    supervisor::{Supervisor, SupervisorInner},
    sync::{atomic::RelaxedAtomicUsize, InstrumentedCondvar, InstrumentedMutex},
    value::ValueType,
    version::VersionDirectory,
    worker_pool::WorkerPool,
    write_buffer_manager::WriteBufferManager,
    Config, SeqNo, UserValue,
};
use inner::TreeInner;
use std::{ops::RangeBounds, sync::Arc, time::Duration};
use std_semaphore::Semaphore;

/// Seals the active memtable and switches the journal, so the memtable can be flushed
///
/// Must be called while holding the journal writer lock.
///
/// Returns `false` if the active memtable is empty.
fn rotate_memtable(
    supervisor: &SupervisorInner,
    journal_writer: &mut JournalWriter,
) -> crate::Result<bool> {
    let active = supervisor.buffers.active();

    if active.is_empty() {
        return Ok(false);
    }

    debug_assert_eq!(journal_writer.id(), active.id());

    let next_id = active.id() + 1;

    // NOTE: If the new journal cannot be created, we keep writing into the current one
    journal_writer.rotate(next_id).inspect_err(|e| {
        log::error!("Failed to rotate journal, keeping memtable {}: {e:?}", active.id());
    })?;

    supervisor.buffers.rotate(next_id);

    log::debug!(
        "Sealed memtable {} ({}B), active memtable is now {next_id}",
        active.id(),
        active.size(),
    );

    supervisor.notify_flush();

    Ok(true)
}

/// A log-structured merge tree (LSM tree/LSMT)
///
/// The tree is thread-safe and can be cloned cheaply; the last
/// handle that is dropped stops the background workers.
#[doc(alias = "keyspace")]
#[doc(alias = "table")]
#[derive(Clone)]
pub struct Tree(Arc<TreeInner>);

impl std::ops::Deref for Tree {
    type Target = TreeInner;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl Tree {
    /// Opens the tree at the configured folder.
    ///
    /// Will create a new tree if the folder does not exist or recover a previous state
    /// if it exists.
    ///
    /// # Errors
    ///
    /// Will return `Err` if an IO error occurs, or if the tree is corrupted.
    pub(crate) fn open(mut config: Config) -> crate::Result<Self> {
        config.path = absolute_path(&config.path)?;

        log::info!("Opening tree at {}", config.path.display());

        std::fs::create_dir_all(&config.path)?;

        let sink = config.instrumentation.clone();

        let directory = VersionDirectory::recover(
            &config.path,
            config.level_count,
            config.manifest_checkpoint_interval,
            sink.clone(),
        )?;

        let recovered = recover_journals(
            config.path.join(JOURNALS_FOLDER),
            directory.log_number(),
            config.journal_recovery_mode,
            sink.clone(),
        )?;

        let last_seqno = directory
            .last_seqno()
            .max(recovered.max_seqno.unwrap_or_default());

        log::debug!("Recovered tree with seqno={last_seqno}");

        let recovered_bytes = recovered.active.size()
            + recovered.sealed.iter().map(|x| x.size()).sum::<u64>();

        let sealed_count = recovered.sealed.len();

        let write_buffer_manager = WriteBufferManager::new(sink.clone());
        write_buffer_manager.allocate(recovered_bytes);

        let worker_pool = WorkerPool::prepare();
        let is_poisoned = PoisonSignal::default();

        let supervisor = Supervisor::new(SupervisorInner {
            seqno: SequenceNumberCounter::new(last_seqno),
            snapshot_tracker: Arc::new(SnapshotTracker::new(last_seqno, sink.clone())),
            journal: recovered.journal,
            buffers: BufferSequence::new(recovered.active, recovered.sealed),
            directory,
            write_buffer_manager,
            compaction_state: CompactionState::new(sink.clone()),
            compaction_strategy: Arc::new(Leveled),
            flush_semaphore: Semaphore::new(config.flush_concurrency.try_into().unwrap_or(isize::MAX)),
            flush_commit_lock: InstrumentedMutex::with_instrumentation(
                (),
                StatCode::FlushCommitWait,
                sink.clone(),
            ),
            flush_committed: InstrumentedCondvar::with_instrumentation(
                StatCode::FlushCommitWait,
                sink.clone(),
            ),
            flush_failures_in_row: RelaxedAtomicUsize::default(),
            compaction_failures_in_row: RelaxedAtomicUsize::default(),
            stats: Stats::default(),
            stop_signal: StopSignal::default(),
            is_poisoned: is_poisoned.clone(),
            instrumentation: Instrumentation::new(sink),
            worker_sender: worker_pool.sender.clone(),
            config,
        });

        let poison_dart = PoisonDart::new("talus:worker", is_poisoned);

        worker_pool.start(supervisor.config.worker_threads, &supervisor, &poison_dart)?;

        let tree = Self(Arc::new(TreeInner {
            supervisor,
            worker_pool,
        }));

        // NOTE: Journals of a previous run that were not flushed yet
        for _ in 0..sealed_count {
            tree.supervisor.notify_flush();
        }
        tree.supervisor.notify_compaction();

        Ok(tree)
    }

    /// Initializes a new, atomic write batch.
    ///
    /// Items may be written to multiple keys, the batch is applied
    /// as a whole, or not at all.
    #[must_use]
    pub fn batch(&self) -> Batch {
        Batch::new(self.clone())
    }

    /// Inserts a key-value pair into the tree.
    ///
    /// If the key already exists, the item will be overwritten.
    ///
    /// Returns the sequence number of the write.
    ///
    /// # Examples
    ///
    /// ```
    /// # let folder = tempfile::tempdir()?;
    /// use talus::Config;
    ///
    /// let tree = Config::new(folder).open()?;
    /// tree.insert("a", "abc")?;
    ///
    /// assert_eq!(Some("abc".as_bytes().into()), tree.get("a")?);
    /// #
    /// # Ok::<(), talus::Error>(())
    /// ```
    ///
    /// # Errors
    ///
    /// Will return `Err` if an IO error occurs.
    pub fn insert<K: AsRef<[u8]>, V: AsRef<[u8]>>(
        &self,
        key: K,
        value: V,
    ) -> crate::Result<SeqNo> {
        self.insert_with(key, value, WriteOptions::default())
    }

    /// Inserts a key-value pair into the tree, with custom write options.
    ///
    /// # Errors
    ///
    /// Will return `Err` if an IO error occurs.
    pub fn insert_with<K: AsRef<[u8]>, V: AsRef<[u8]>>(
        &self,
        key: K,
        value: V,
        opts: WriteOptions,
    ) -> crate::Result<SeqNo> {
        let item = BatchItem::new(key.as_ref(), value.as_ref(), ValueType::Value)?;
        self.write_items(vec![item], opts)
    }

    /// Removes an item from the tree.
    ///
    /// The key is not physically removed, but shadowed by a tombstone
    /// that is dropped during compaction.
    ///
    /// # Errors
    ///
    /// Will return `Err` if an IO error occurs.
    pub fn remove<K: AsRef<[u8]>>(&self, key: K) -> crate::Result<SeqNo> {
        self.remove_with(key, WriteOptions::default())
    }

    /// Removes an item from the tree, with custom write options.
    ///
    /// # Errors
    ///
    /// Will return `Err` if an IO error occurs.
    pub fn remove_with<K: AsRef<[u8]>>(
        &self,
        key: K,
        opts: WriteOptions,
    ) -> crate::Result<SeqNo> {
        let item = BatchItem::new(key.as_ref(), *b"", ValueType::Tombstone)?;
        self.write_items(vec![item], opts)
    }

    /// Writes a merge operand for a key.
    ///
    /// Operands are combined with the key's previous value by the
    /// configured merge operator when the key is read, flushed or compacted.
    ///
    /// # Errors
    ///
    /// Will return `Err` if an IO error occurs, or no merge operator is configured.
    pub fn merge<K: AsRef<[u8]>, V: AsRef<[u8]>>(
        &self,
        key: K,
        operand: V,
    ) -> crate::Result<SeqNo> {
        let item = BatchItem::new(key.as_ref(), operand.as_ref(), ValueType::Merge)?;
        self.write_items(vec![item], WriteOptions::default())
    }

    /// Waits until the write buffer has room for new writes.
    fn admit(&self, no_slowdown: bool) -> crate::Result<()> {
        let supervisor = &self.supervisor;
        let limit = supervisor.config.max_write_buffer_size;

        if supervisor.write_buffer_manager.get() < limit {
            return Ok(());
        }

        if no_slowdown {
            return Err(crate::Error::Busy);
        }

        supervisor.stats.write_stalls.fetch_add(1);

        log::debug!(
            "Write buffer is full ({}B >= {limit}B), stalling write",
            supervisor.write_buffer_manager.get(),
        );

        loop {
            if supervisor.is_poisoned() {
                return Err(crate::Error::Poisoned);
            }

            // NOTE: If there is nothing to flush, the active memtable
            // has to be sealed, otherwise memory is never freed
            if supervisor.buffers.sealed_count() == 0 {
                let mut journal_writer = supervisor.journal.get_writer();

                let has_sealed = supervisor.buffers.sealed_count() > 0
                    || rotate_memtable(supervisor, &mut journal_writer)?;

                if !has_sealed {
                    log::warn!("Write buffer is over budget, but there is nothing to flush");
                    return Ok(());
                }
            }

            let has_room = supervisor.write_buffer_manager.wait_below(
                limit,
                Duration::from_millis(100),
                || {
                    supervisor.is_poisoned()
                        || supervisor.stop_signal.is_stopped()
                        || supervisor.buffers.sealed_count() == 0
                },
            );

            if has_room {
                return Ok(());
            }

            if supervisor.stop_signal.is_stopped() {
                return Err(crate::Error::Poisoned);
            }
        }
    }

    /// Applies items as one atomic write.
    ///
    /// Returns the sequence number of the last item.
    pub(crate) fn write_items(
        &self,
        items: Vec<BatchItem>,
        opts: WriteOptions,
    ) -> crate::Result<SeqNo> {
        let supervisor = &self.supervisor;

        if supervisor.is_poisoned() {
            return Err(crate::Error::Poisoned);
        }

        if supervisor.config.merge_operator.is_none()
            && items.iter().any(|x| x.value_type == ValueType::Merge)
        {
            return Err(crate::Error::InvalidArgument(
                "merge operands require a merge operator",
            ));
        }

        self.admit(opts.no_slowdown)?;

        let item_count = items.len() as u64;

        let mut journal_writer = supervisor.journal.get_writer();

        // NOTE: Another writer may have poisoned the tree while we waited for the lock
        if supervisor.is_poisoned() {
            return Err(crate::Error::Poisoned);
        }

        let first_seqno = supervisor.seqno.get() + 1;

        // IMPORTANT: A failed journal write may leave a partial record in the
        // journal buffer, so no more writes can be accepted
        if let Err(e) = journal_writer.write_batch(&items, first_seqno) {
            log::error!("Failed to write to journal: {e:?}");
            supervisor.is_poisoned.store(true);
            return Err(e);
        }

        let persist_mode = if opts.sync {
            Some(PersistMode::SyncAll)
        } else if supervisor.config.manual_journal_persist {
            None
        } else {
            Some(PersistMode::Buffer)
        };

        if let Some(mode) = persist_mode {
            let result = if mode == PersistMode::Buffer {
                journal_writer.persist(mode)
            } else {
                supervisor
                    .instrumentation
                    .timed(StatCode::JournalSync, || journal_writer.persist(mode))
            };

            if let Err(e) = result {
                log::error!("Failed to persist journal: {e:?}");
                supervisor.is_poisoned.store(true);
                return Err(e.into());
            }
        }

        let seqno = supervisor.seqno.next_n(item_count);
        debug_assert_eq!(first_seqno, seqno);

        let (added_bytes, memtable_size) = supervisor.buffers.insert(
            items
                .into_iter()
                .enumerate()
                .map(|(idx, item)| item.into_internal(seqno + idx as SeqNo)),
        );

        let last_seqno = seqno + item_count - 1;

        // IMPORTANT: Publish only after the items are in the memtable,
        // so a reader never sees a seqno without its data
        supervisor.snapshot_tracker.publish(last_seqno);

        supervisor.write_buffer_manager.allocate(added_bytes);

        if memtable_size > supervisor.config.max_memtable_size {
            log::trace!("Memtable reached threshold size ({memtable_size}B)");

            // NOTE: The write itself succeeded, a failed rotation is retried by the next write
            if let Err(e) = rotate_memtable(supervisor, &mut journal_writer) {
                log::warn!("Memtable rotation failed: {e:?}");
            }
        }

        drop(journal_writer);

        supervisor
            .instrumentation
            .increment(StatCode::KeysWritten, item_count);

        Ok(last_seqno)
    }

    /// Retrieves an item from the tree.
    ///
    /// # Examples
    ///
    /// ```
    /// # let folder = tempfile::tempdir()?;
    /// use talus::Config;
    ///
    /// let tree = Config::new(folder).open()?;
    /// tree.insert("a", "my_value")?;
    ///
    /// let item = tree.get("a")?;
    /// assert_eq!(Some("my_value".as_bytes().into()), item);
    /// #
    /// # Ok::<(), talus::Error>(())
    /// ```
    ///
    /// # Errors
    ///
    /// Will return `Err` if an IO error occurs.
    pub fn get<K: AsRef<[u8]>>(&self, key: K) -> crate::Result<Option<UserValue>> {
        let nonce = SnapshotNonce::new(self.supervisor.snapshot_tracker.clone());
        get_at(&self.supervisor, key.as_ref(), nonce.seqno)
    }

    /// Returns `true` if the tree contains the specified key.
    ///
    /// # Errors
    ///
    /// Will return `Err` if an IO error occurs.
    pub fn contains_key<K: AsRef<[u8]>>(&self, key: K) -> crate::Result<bool> {
        self.get(key).map(|x| x.is_some())
    }

    /// Scans the entire tree, returning the amount of items.
    ///
    /// ###### Caution
    ///
    /// This operation scans the entire tree: O(n) complexity!
    ///
    /// Never, under any circumstances, use .`len()` == 0 to check
    /// if the tree is empty, use [`Tree::is_empty`] instead.
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

    /// Returns `true` if the tree is empty.
    ///
    /// Stops scanning at the first visible item.
    ///
    /// # Errors
    ///
    /// Will return `Err` if an IO error occurs.
    pub fn is_empty(&self) -> crate::Result<bool> {
        self.iter().next().transpose().map(|x| x.is_none())
    }

    /// Opens a read-only point-in-time snapshot of the tree.
    ///
    /// Dropping the snapshot will close the snapshot.
    #[must_use]
    pub fn snapshot(&self) -> Snapshot {
        let nonce = SnapshotNonce::new(self.supervisor.snapshot_tracker.clone());
        Snapshot::new(self.supervisor.clone(), nonce)
    }

    /// Opens a snapshot at the given sequence number.
    ///
    /// A sequence number above the currently visible one
    /// is capped, to not expose writes that are still in flight.
    ///
    /// Versions that were already garbage collected cannot be restored,
    /// so the snapshot is only consistent for sequence numbers at or above
    /// the oldest open snapshot.
    #[must_use]
    pub fn snapshot_at(&self, seqno: SeqNo) -> Snapshot {
        let tracker = &self.supervisor.snapshot_tracker;
        let seqno = seqno.min(tracker.visible_seqno());

        let nonce = SnapshotNonce::at(tracker.clone(), seqno);
        Snapshot::new(self.supervisor.clone(), nonce)
    }

    /// Returns an iterator that scans through the entire tree.
    ///
    /// Avoid using this function, or limit it as otherwise it may scan a lot of items.
    ///
    /// # Examples
    ///
    /// ```
    /// # let folder = tempfile::tempdir()?;
    /// use talus::Config;
    ///
    /// let tree = Config::new(folder).open()?;
    /// tree.insert("a", "abc")?;
    /// tree.insert("f", "abc")?;
    /// tree.insert("g", "abc")?;
    ///
    /// assert_eq!(3, tree.iter().count());
    /// #
    /// # Ok::<(), talus::Error>(())
    /// ```
    #[must_use]
    pub fn iter(&self) -> Iter {
        self.range::<&[u8], _>(..)
    }

    /// Returns an iterator over a range of items.
    ///
    /// # Examples
    ///
    /// ```
    /// # let folder = tempfile::tempdir()?;
    /// use talus::Config;
    ///
    /// let tree = Config::new(folder).open()?;
    /// tree.insert("a", "abc")?;
    /// tree.insert("f", "abc")?;
    /// tree.insert("g", "abc")?;
    ///
    /// assert_eq!(2, tree.range("a"..="f").count());
    /// #
    /// # Ok::<(), talus::Error>(())
    /// ```
    #[must_use]
    pub fn range<K: AsRef<[u8]>, R: RangeBounds<K>>(&self, range: R) -> Iter {
        let nonce = SnapshotNonce::new(self.supervisor.snapshot_tracker.clone());
        Iter::new(&self.supervisor, nonce, into_user_range(&range))
    }

    /// Returns an iterator over all items that start with `prefix`.
    ///
    /// # Examples
    ///
    /// ```
    /// # let folder = tempfile::tempdir()?;
    /// use talus::Config;
    ///
    /// let tree = Config::new(folder).open()?;
    /// tree.insert("a", "abc")?;
    /// tree.insert("ab", "abc")?;
    /// tree.insert("abc", "abc")?;
    /// tree.insert("b", "abc")?;
    ///
    /// assert_eq!(3, tree.prefix("a").count());
    /// #
    /// # Ok::<(), talus::Error>(())
    /// ```
    #[must_use]
    pub fn prefix<K: AsRef<[u8]>>(&self, prefix: K) -> Iter {
        let nonce = SnapshotNonce::new(self.supervisor.snapshot_tracker.clone());
        Iter::new(&self.supervisor, nonce, prefix_to_range(prefix.as_ref()))
    }

    /// Flushes the journal to disk, making sure all written data
    /// is persisted according to the given mode.
    ///
    /// Only needed if manual journal persistence is enabled, or writes
    /// did not set [`WriteOptions::sync`].
    ///
    /// # Errors
    ///
    /// Will return `Err` if an IO error occurs.
    pub fn persist(&self, mode: PersistMode) -> crate::Result<()> {
        self.supervisor
            .instrumentation
            .timed(StatCode::JournalSync, || self.supervisor.journal.persist(mode))
            .inspect_err(|e| {
                log::error!("Failed to persist journal: {e:?}");
            })
    }

    /// Seals the active memtable and waits until all memtables are
    /// written to segments.
    ///
    /// # Errors
    ///
    /// Will return `Err` if an IO error occurs, or the tree is poisoned
    /// because flushing failed repeatedly.
    pub fn flush(&self) -> crate::Result<()> {
        let supervisor = &self.supervisor;

        let target = {
            let mut journal_writer = supervisor.journal.get_writer();
            rotate_memtable(supervisor, &mut journal_writer)?;
            supervisor.buffers.active_id()
        };

        log::debug!("Waiting for memtables below {target} to be flushed");

        supervisor.notify_flush();

        let mut lock = supervisor.flush_commit_lock.lock();

        while supervisor.buffers.oldest_unflushed_id() < target {
            if supervisor.is_poisoned() {
                return Err(crate::Error::Poisoned);
            }

            lock = supervisor
                .flush_committed
                .wait_timeout(lock, Duration::from_millis(100))
                .0;
        }

        drop(lock);

        Ok(())
    }

    /// Compacts all segments that overlap the given range into the last level.
    ///
    /// Only data that is already flushed is compacted, call [`Tree::flush`] first
    /// to include memtables.
    ///
    /// # Errors
    ///
    /// Will return `Err` if an IO error occurs.
    pub fn compact_range<K: AsRef<[u8]>, R: RangeBounds<K>>(&self, range: R) -> crate::Result<()> {
        let range = into_user_range(&range);
        compact_range(&self.supervisor.compaction_options(), &range)
    }

    /// Compacts the entire tree into a single sorted run in the last level.
    ///
    /// # Errors
    ///
    /// Will return `Err` if an IO error occurs.
    pub fn major_compact(&self) -> crate::Result<()> {
        log::info!("Starting major compaction");
        self.compact_range::<&[u8], _>(..)
    }

    /// Returns counters about background work.
    #[must_use]
    pub fn stats(&self) -> &Stats {
        &self.supervisor.stats
    }

    /// Returns `true` if writes are halted because background work failed persistently.
    #[must_use]
    pub fn is_poisoned(&self) -> bool {
        self.supervisor.is_poisoned()
    }

    /// Returns the sequence number of the last visible write.
    #[must_use]
    pub fn visible_seqno(&self) -> SeqNo {
        self.supervisor.snapshot_tracker.visible_seqno()
    }

    /// Returns the amount of segments in the current version.
    #[must_use]
    pub fn segment_count(&self) -> usize {
        self.supervisor.directory.current().segment_count()
    }

    /// Returns the amount of segments per level, starting at L0.
    #[must_use]
    pub fn level_segment_counts(&self) -> Vec<usize> {
        self.supervisor
            .directory
            .current()
            .levels()
            .iter()
            .map(crate::version::level::Level::len)
            .collect()
    }

    /// Returns the size of all segment files in bytes.
    #[must_use]
    pub fn disk_space(&self) -> u64 {
        self.supervisor
            .directory
            .current()
            .levels()
            .iter()
            .map(crate::version::level::Level::size)
            .sum()
    }

    /// Returns the amount of sealed memtables that are not flushed yet.
    #[must_use]
    pub fn sealed_memtable_count(&self) -> usize {
        self.supervisor.buffers.sealed_count()
    }

    /// Returns the approximate size of all memtables in bytes.
    #[must_use]
    pub fn write_buffer_size(&self) -> u64 {
        self.supervisor.write_buffer_manager.get()
    }

    /// Returns the amount of versions that are kept alive by readers.
    #[must_use]
    pub fn live_version_count(&self) -> usize {
        self.supervisor.directory.live_versions()
    }

    /// Returns the amount of open snapshots.
    #[must_use]
    pub fn snapshot_count(&self) -> usize {
        self.supervisor.snapshot_tracker.open_count()
    }
}
