// Copyright (c) 2024-present, fjall-rs
// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

use crate::{journal::writer::PersistMode, supervisor::Supervisor, worker_pool::WorkerPool};

pub struct TreeInner {
    pub(crate) supervisor: Supervisor,

    /// Background flush & compaction threads
    pub(crate) worker_pool: WorkerPool,
}

impl Drop for TreeInner {
    fn drop(&mut self) {
        log::debug!("Dropping TreeInner");

        log::debug!("Sending stop signal to threads");
        self.supervisor.stop_signal.send();

        // NOTE: Running flushes and compactions either finish or abort,
        // anything not flushed is recovered from the journal
        self.worker_pool.join();

        if let Err(e) = self.supervisor.journal.persist(PersistMode::SyncAll) {
            log::error!("Failed to persist journal on drop: {e:?}");
        }

        log::debug!("Tree is closed");
    }
}
