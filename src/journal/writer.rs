// Copyright (c) 2024-present, fjall-rs
// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

use super::{
    record::{encode_payload, write_framed},
    JournalId,
};
use crate::{
    batch::item::Item as BatchItem,
    file::fsync_directory,
    sync::test_point::{self, FailPoint},
    SeqNo,
};
use std::{
    fs::{File, OpenOptions},
    io::{BufWriter, Write},
    path::{Path, PathBuf},
};

pub const JOURNAL_BUFFER_BYTES: usize = 8 * 1_024;

/// Builds the file path of a journal inside the journals folder
pub fn journal_path<P: AsRef<Path>>(folder: P, id: JournalId) -> PathBuf {
    folder
        .as_ref()
        .join(format!("{id}.{}", crate::file::JOURNAL_EXTENSION))
}

pub struct Writer {
    pub(crate) id: JournalId,
    pub(crate) path: PathBuf,
    file: BufWriter<File>,
    buf: Vec<u8>,
    file_pos: u64,

    is_buffer_dirty: bool,
}

/// The persist mode allows setting the durability guarantee of previous writes
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum PersistMode {
    /// Flushes data to OS buffers. This allows the OS to write out data in case of an
    /// application crash.
    ///
    /// When this function returns, data is **not** guaranteed to be persisted in case
    /// of a power loss event or OS crash.
    Buffer,

    /// Flushes data using `fdatasync`.
    ///
    /// Use if you know that `fdatasync` is sufficient for your file system and/or operating system.
    SyncData,

    /// Flushes data + metadata using `fsync`.
    SyncAll,
}

impl Writer {
    /// ID of the journal that is currently written to
    pub fn id(&self) -> JournalId {
        self.id
    }

    /// Seals the current journal file, and continues writing into a new file
    ///
    /// If any step fails, the writer keeps writing into the old journal, so
    /// the rotation can simply be retried.
    pub fn rotate(&mut self, next_id: JournalId) -> crate::Result<()> {
        debug_assert!(next_id > self.id);

        self.persist(PersistMode::SyncAll)?;

        log::debug!(
            "Sealing active journal {} at {:?}, len={}B",
            self.id,
            self.path,
            self.file_pos,
        );

        let folder = self.path.parent().map(Path::to_path_buf).unwrap_or_default();

        let new_path = journal_path(&folder, next_id);
        log::debug!("Rotating active journal to {new_path:?}");

        // NOTE: A failed rotation may have left the next journal behind.
        // Nothing was ever written into it, so it is truncated
        let next = Self::open_empty(next_id, &new_path, false)?;

        // IMPORTANT: fsync folder on Unix
        test_point::check(FailPoint::JournalRotate, &folder)?;
        fsync_directory(&folder)?;

        *self = next;

        Ok(())
    }

    pub fn create_new<P: AsRef<Path>>(id: JournalId, path: P) -> crate::Result<Self> {
        Self::open_empty(id, path, true)
    }

    fn open_empty<P: AsRef<Path>>(id: JournalId, path: P, exclusive: bool) -> crate::Result<Self> {
        let path = path.as_ref();

        let mut opts = OpenOptions::new();
        opts.write(true);

        if exclusive {
            opts.create_new(true);
        } else {
            opts.create(true).truncate(true);
        }

        let file = opts.open(path)?;
        file.sync_all()?;

        Ok(Self {
            id,
            path: path.into(),
            file: BufWriter::with_capacity(JOURNAL_BUFFER_BYTES, file),
            buf: Vec::new(),
            file_pos: 0,
            is_buffer_dirty: false,
        })
    }

    /// Reopens an existing (already recovered and truncated) journal for appending.
    pub fn from_file<P: AsRef<Path>>(id: JournalId, path: P) -> crate::Result<Self> {
        let path = path.as_ref();

        let file = OpenOptions::new().append(true).open(path)?;
        let file_pos = file.metadata()?.len();

        Ok(Self {
            id,
            path: path.into(),
            file: BufWriter::with_capacity(JOURNAL_BUFFER_BYTES, file),
            buf: Vec::new(),
            file_pos,
            is_buffer_dirty: false,
        })
    }

    /// Persists the journal file.
    pub(crate) fn persist(&mut self, mode: PersistMode) -> std::io::Result<()> {
        log::trace!("Persist journal {:?} with mode={mode:?}", self.path);

        if self.is_buffer_dirty {
            self.file.flush()?;
            self.is_buffer_dirty = false;
        }

        match mode {
            PersistMode::SyncAll => self.file.get_mut().sync_all(),
            PersistMode::SyncData => self.file.get_mut().sync_data(),
            PersistMode::Buffer => Ok(()),
        }
    }

    /// Appends one record holding all `items`, the first item gets `seqno`
    ///
    /// Returns the amount of bytes written.
    pub fn write_batch(&mut self, items: &[BatchItem], seqno: SeqNo) -> crate::Result<usize> {
        if items.is_empty() {
            return Ok(0);
        }

        self.is_buffer_dirty = true;

        self.buf.clear();
        encode_payload(&mut self.buf, items, seqno)?;

        let byte_count = write_framed(&mut self.file, &self.buf)?;
        self.file_pos += byte_count as u64;

        Ok(byte_count)
    }
}
