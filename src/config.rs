// Copyright (c) 2024-present, fjall-rs
// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

use crate::{
    instrumentation::InstrumentationSink, journal::error::RecoveryMode,
    merge_operator::MergeOperator, Tree,
};
use std::{
    path::{Path, PathBuf},
    sync::Arc,
};

fn default_worker_threads() -> usize {
    std::thread::available_parallelism()
        .map(usize::from)
        .unwrap_or(1)
        .min(4)
}

/// Tree configuration builder
#[allow(clippy::struct_excessive_bools)]
pub struct Config {
    /// Base path of the tree
    pub(crate) path: PathBuf,

    /// Size at which the active memtable is sealed
    pub(crate) max_memtable_size: u64,

    /// Max size of all memtables (active and sealed) before writes stall
    pub(crate) max_write_buffer_size: u64,

    pub(crate) level_count: u8,
    pub(crate) level_ratio: u8,
    pub(crate) l0_threshold: u8,
    pub(crate) target_segment_size: u64,
    pub(crate) block_size: u32,

    pub(crate) worker_threads: usize,
    pub(crate) flush_concurrency: usize,

    /// If `false`, writes with `sync` unset are still flushed to the OS
    pub(crate) manual_journal_persist: bool,

    pub(crate) journal_recovery_mode: RecoveryMode,
    pub(crate) manifest_checkpoint_interval: usize,
    pub(crate) max_background_retries: usize,

    pub(crate) merge_operator: Option<Arc<dyn MergeOperator>>,
    pub(crate) instrumentation: Option<Arc<dyn InstrumentationSink>>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            path: ".talus.data".into(),
            max_memtable_size: /* 16 MiB */ 16 * 1_024 * 1_024,
            max_write_buffer_size: /* 64 MiB */ 64 * 1_024 * 1_024,
            level_count: 7,
            level_ratio: 10,
            l0_threshold: 4,
            target_segment_size: /* 64 MiB */ 64 * 1_024 * 1_024,
            block_size: /* 4 KiB */ 4 * 1_024,
            worker_threads: default_worker_threads(),
            flush_concurrency: 1,
            manual_journal_persist: false,
            journal_recovery_mode: RecoveryMode::default(),
            manifest_checkpoint_interval: 100,
            max_background_retries: 8,
            merge_operator: None,
            instrumentation: None,
        }
    }
}

impl Config {
    /// Creates a new configuration
    pub fn new<P: AsRef<Path>>(path: P) -> Self {
        Self {
            path: path.as_ref().into(),
            ..Default::default()
        }
    }

    /// Sets the size at which the active memtable is sealed and queued for flushing.
    ///
    /// The memtable is sealed by the first write that grows it past
    /// this size, a memtable of exactly this size stays active.
    ///
    /// Default = 16 MiB
    ///
    /// # Panics
    ///
    /// Panics if bytes is 0.
    #[must_use]
    pub fn max_memtable_size(mut self, bytes: u64) -> Self {
        assert!(bytes > 0);

        self.max_memtable_size = bytes;
        self
    }

    /// Sets the memory budget of all memtables.
    ///
    /// If the active and sealed memtables grow larger than this,
    /// writers are stalled until flushes catch up.
    ///
    /// Default = 64 MiB
    ///
    /// # Panics
    ///
    /// Panics if bytes is 0.
    #[must_use]
    pub fn max_write_buffer_size(mut self, bytes: u64) -> Self {
        assert!(bytes > 0);

        self.max_write_buffer_size = bytes;
        self
    }

    /// Sets the amount of levels of the tree (depth of tree).
    ///
    /// Default = 7, like `RocksDB`
    ///
    /// # Panics
    ///
    /// Panics if n is less than 2.
    #[must_use]
    pub fn level_count(mut self, n: u8) -> Self {
        assert!(n >= 2);

        self.level_count = n;
        self
    }

    /// Sets the size ratio between two adjacent levels.
    ///
    /// Default = 10
    ///
    /// # Panics
    ///
    /// Panics if ratio is less than 2.
    #[must_use]
    pub fn level_ratio(mut self, ratio: u8) -> Self {
        assert!(ratio >= 2);

        self.level_ratio = ratio;
        self
    }

    /// Sets the amount of L0 segments that triggers a compaction into L1.
    ///
    /// Default = 4
    ///
    /// Same as `level0_file_num_compaction_trigger` in `RocksDB`
    ///
    /// # Panics
    ///
    /// Panics if n is 0.
    #[must_use]
    pub fn l0_threshold(mut self, n: u8) -> Self {
        assert!(n > 0);

        self.l0_threshold = n;
        self
    }

    /// Sets the size at which compactions start a new output segment.
    ///
    /// Default = 64 MiB
    ///
    /// # Panics
    ///
    /// Panics if bytes is 0.
    #[must_use]
    pub fn target_segment_size(mut self, bytes: u64) -> Self {
        assert!(bytes > 0);

        self.target_segment_size = bytes;
        self
    }

    /// Sets the block size of segments.
    ///
    /// Default = 4 KiB
    ///
    /// # Panics
    ///
    /// Panics if the block size is smaller than 1 KiB (1024 bytes).
    #[must_use]
    pub fn block_size(mut self, block_size: u32) -> Self {
        assert!(block_size >= 1_024);

        self.block_size = block_size;
        self
    }

    /// Sets the amount of background worker threads.
    ///
    /// Default = number of cores, at most 4
    ///
    /// # Panics
    ///
    /// Panics if n is 0.
    #[must_use]
    pub fn worker_threads(mut self, n: usize) -> Self {
        assert!(n > 0);

        self.worker_threads = n;
        self
    }

    /// Sets how many memtables may be flushed at the same time.
    ///
    /// Flushes always commit in memtable order.
    ///
    /// Default = 1
    ///
    /// # Panics
    ///
    /// Panics if n is 0.
    #[must_use]
    pub fn flush_concurrency(mut self, n: usize) -> Self {
        assert!(n > 0);

        self.flush_concurrency = n;
        self
    }

    /// If `true`, writes are only buffered in the journal writer,
    /// and the user has to call [`Tree::persist`] (or write with `sync`)
    /// to make them durable.
    ///
    /// If `false`, every write is at least handed to the OS, so it survives
    /// an application crash (but not a power loss).
    ///
    /// Default = false
    #[must_use]
    pub fn manual_journal_persist(mut self, flag: bool) -> Self {
        self.manual_journal_persist = flag;
        self
    }

    /// Sets how journal corruption is handled when opening the tree.
    ///
    /// Default = [`RecoveryMode::TolerateCorruptTail`]
    #[must_use]
    pub fn journal_recovery_mode(mut self, mode: RecoveryMode) -> Self {
        self.journal_recovery_mode = mode;
        self
    }

    /// Sets after how many edits the manifest is rolled over into a new file.
    ///
    /// Default = 100
    ///
    /// # Panics
    ///
    /// Panics if n is 0.
    #[must_use]
    pub fn manifest_checkpoint_interval(mut self, n: usize) -> Self {
        assert!(n > 0);

        self.manifest_checkpoint_interval = n;
        self
    }

    /// Sets how many consecutive flush failures are retried
    /// before the tree stops accepting writes.
    ///
    /// Default = 8
    #[must_use]
    pub fn max_background_retries(mut self, n: usize) -> Self {
        self.max_background_retries = n;
        self
    }

    /// Installs a merge operator, enabling [`Tree::merge`].
    #[must_use]
    pub fn merge_operator(mut self, op: Arc<dyn MergeOperator>) -> Self {
        self.merge_operator = Some(op);
        self
    }

    /// Installs a sink that receives lock wait times and other statistics.
    #[must_use]
    pub fn instrumentation(mut self, sink: Arc<dyn InstrumentationSink>) -> Self {
        self.instrumentation = Some(sink);
        self
    }

    /// Opens a tree using the config.
    ///
    /// # Errors
    ///
    /// Will return `Err` if an IO error occurs, or if the tree is corrupted.
    pub fn open(self) -> crate::Result<Tree> {
        Tree::open(self)
    }
}
