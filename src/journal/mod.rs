// Copyright (c) 2024-present, fjall-rs
// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

pub mod error;
pub mod manager;
pub mod reader;
pub mod record;
pub mod recovery;
pub mod writer;


use self::writer::{journal_path, PersistMode, Writer};
use crate::{
    file::fsync_directory,
    instrumentation::{InstrumentationSink, StatCode},
    sync::InstrumentedMutex,
};
use std::{
    path::{Path, PathBuf},
    sync::{Arc, MutexGuard},
};

/// Journals are identified by the ID of the memtable they log
pub type JournalId = u64;

/// Write-ahead log of the tree
///
/// The journal writer lock doubles as the sequencing critical section of
/// the write path: while it is held, a writer assigns sequence numbers,
/// appends its record and inserts into the active memtable, so journal
/// order, sequence number order and memtable order always agree.
pub struct Journal {
    folder: PathBuf,
    writer: InstrumentedMutex<Writer>,
}

impl std::fmt::Debug for Journal {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.path().display())
    }
}

impl Drop for Journal {
    fn drop(&mut self) {
        log::trace!("Dropping journal, trying to flush");

        match self.persist(PersistMode::SyncAll) {
            Ok(()) => {
                log::trace!("Flushed journal successfully");
            }
            Err(e) => {
                log::error!("Flush error on drop: {e:?}");
            }
        }
    }
}

impl Journal {
    fn from_writer(
        folder: &Path,
        writer: Writer,
        sink: Option<Arc<dyn InstrumentationSink>>,
    ) -> Self {
        Self {
            folder: folder.into(),
            writer: InstrumentedMutex::with_instrumentation(writer, StatCode::DbMutexWait, sink),
        }
    }

    /// Creates a new, empty journal file inside `folder`.
    pub fn create_new<P: AsRef<Path>>(
        folder: P,
        id: JournalId,
        sink: Option<Arc<dyn InstrumentationSink>>,
    ) -> crate::Result<Self> {
        let folder = folder.as_ref();
        let path = journal_path(folder, id);
        log::trace!("Creating new journal at {}", path.display());

        std::fs::create_dir_all(folder).inspect_err(|e| {
            log::error!(
                "Failed to create journal folder at {}: {e:?}",
                folder.display(),
            );
        })?;

        let writer = Writer::create_new(id, &path)?;

        // IMPORTANT: fsync folder on Unix
        fsync_directory(folder)?;

        Ok(Self::from_writer(folder, writer, sink))
    }

    /// Reopens a recovered journal, appending after its last valid record.
    pub fn from_file<P: AsRef<Path>>(
        folder: P,
        id: JournalId,
        sink: Option<Arc<dyn InstrumentationSink>>,
    ) -> crate::Result<Self> {
        let folder = folder.as_ref();
        let writer = Writer::from_file(id, journal_path(folder, id))?;
        Ok(Self::from_writer(folder, writer, sink))
    }

    /// Hands out write access for the journal.
    pub(crate) fn get_writer(&self) -> MutexGuard<'_, Writer> {
        self.writer.lock()
    }

    pub fn path(&self) -> PathBuf {
        self.get_writer().path.clone()
    }

    /// Persists the journal.
    pub fn persist(&self, mode: PersistMode) -> crate::Result<()> {
        let mut journal_writer = self.get_writer();
        journal_writer.persist(mode).map_err(Into::into)
    }

    /// Deletes journals that are fully contained in segments.
    pub fn remove_obsolete(&self, log_number: JournalId) -> crate::Result<usize> {
        manager::remove_obsolete_journals(&self.folder, log_number)
    }
}
