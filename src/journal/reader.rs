// Copyright (c) 2024-present, fjall-rs
// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

use super::{
    error::{RecoveryError, RecoveryMode},
    record::{decode_payload, read_frame, Frame, Record, RECORD_HEADER_SIZE},
};
use std::{
    fs::OpenOptions,
    path::{Path, PathBuf},
};

macro_rules! fail_iter {
    ($e:expr) => {
        match $e {
            Ok(v) => v,
            Err(e) => return Some(Err(e.into())),
        }
    };
}

/// Returns the position of the first intact record after `pos`
fn next_valid_record_after(bytes: &[u8], pos: usize) -> Option<usize> {
    // NOTE: The frame length of a corrupt record cannot be trusted,
    // so every following offset is probed
    (pos + 1..bytes.len()).find(|&offset| matches!(read_frame(bytes, offset), Frame::Valid(_)))
}

/// Reads the records of a journal file
///
/// A torn tail (a record that was not fully written before a crash) ends
/// the journal. A checksum mismatch at the very end is treated like a torn
/// tail as well, while a corrupt record followed by intact records is
/// interior corruption and fails recovery (unless invalid records are skipped).
///
/// Once the journal is exhausted, the file is truncated to the last valid
/// position to prevent corrupt bytes at the end of the file, which would
/// jeopardize future writes into the file.
#[allow(clippy::module_name_repetitions)]
pub struct JournalReader {
    path: PathBuf,
    bytes: Vec<u8>,
    pos: usize,
    last_valid_pos: usize,
    mode: RecoveryMode,
    skipped_records: usize,
    is_done: bool,
}

impl JournalReader {
    pub fn new<P: AsRef<Path>>(path: P, mode: RecoveryMode) -> crate::Result<Self> {
        let path = path.as_ref();
        let bytes = std::fs::read(path)?;

        Ok(Self {
            path: path.into(),
            bytes,
            pos: 0,
            last_valid_pos: 0,
            mode,
            skipped_records: 0,
            is_done: false,
        })
    }

    /// Amount of corrupt records that were skipped
    pub fn skipped_records(&self) -> usize {
        self.skipped_records
    }

    fn truncate_to_last_valid_pos(&self) -> crate::Result<()> {
        if self.last_valid_pos >= self.bytes.len() {
            return Ok(());
        }

        log::debug!(
            "Truncating journal {:?} from {}B to {}B",
            self.path,
            self.bytes.len(),
            self.last_valid_pos,
        );

        let file = OpenOptions::new().write(true).open(&self.path)?;
        file.set_len(self.last_valid_pos as u64)?;
        file.sync_all()?;

        Ok(())
    }

    fn finish(&mut self) -> crate::Result<()> {
        self.is_done = true;
        self.truncate_to_last_valid_pos()
    }
}

impl Iterator for JournalReader {
    type Item = crate::Result<Record>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.is_done {
            return None;
        }

        loop {
            match read_frame(&self.bytes, self.pos) {
                Frame::Valid(payload) => {
                    let record = decode_payload(payload);

                    self.pos += RECORD_HEADER_SIZE + payload.len();

                    match record {
                        Ok(record) => {
                            self.last_valid_pos = self.pos;
                            return Some(Ok(record));
                        }
                        Err(e) => {
                            self.is_done = true;
                            return Some(Err(e));
                        }
                    }
                }
                frame @ (Frame::Torn | Frame::Corrupt { .. }) => {
                    if self.pos >= self.bytes.len() {
                        fail_iter!(self.finish());
                        return None;
                    }

                    // NOTE: A damaged length field looks like a torn tail,
                    // so intact records after it are searched in both cases
                    let Some(next_pos) = next_valid_record_after(&self.bytes, self.pos) else {
                        log::debug!(
                            "Journal {:?} has a torn tail at {}, discarding {}B",
                            self.path,
                            self.pos,
                            self.bytes.len() - self.pos,
                        );

                        fail_iter!(self.finish());
                        return None;
                    };

                    if let Frame::Corrupt { len } = frame {
                        if next_pos != self.pos + RECORD_HEADER_SIZE + len {
                            log::warn!(
                                "Corrupt record length at {} in journal {:?}",
                                self.pos,
                                self.path,
                            );
                        }
                    }

                    match self.mode {
                        RecoveryMode::SkipInvalidBatches => {
                            log::warn!(
                                "Skipping corrupt record at {} in journal {:?}",
                                self.pos,
                                self.path,
                            );

                            // NOTE: The skipped bytes stay in the file, and are skipped again on next recovery
                            self.skipped_records += 1;
                            self.pos = next_pos;
                            self.last_valid_pos = next_pos;
                        }
                        RecoveryMode::TolerateCorruptTail => {
                            log::error!(
                                "Invalid record at {} in journal {:?}: checksum mismatch",
                                self.pos,
                                self.path,
                            );

                            self.is_done = true;
                            return Some(Err(crate::Error::JournalRecovery(
                                RecoveryError::ChecksumMismatch,
                            )));
                        }
                    }
                }
            }
        }
    }
}
