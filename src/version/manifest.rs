// Copyright (c) 2024-present, fjall-rs
// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

//! The manifest is the log of version edits
//!
//! ```text
//! [CURRENT] -> "MANIFEST-{id}"
//!
//! [MANIFEST-{id}]
//!   [len; 4 bytes] [xxh3(edit); 8 bytes] [snapshot edit]
//!   [len; 4 bytes] [xxh3(edit); 8 bytes] [edit]
//!   ...
//! ```
//!
//! Every manifest starts with a full snapshot, so replaying a single
//! manifest file restores the complete state. The `CURRENT` file is
//! atomically rewritten to switch to a new manifest.

use super::edit::VersionEdit;
use crate::{
    coding::{Decode, Encode},
    file::{fsync_directory, rewrite_atomic, CURRENT_FILE, MANIFEST_PREFIX},
    journal::{
        record::{read_frame, write_framed, Frame, RECORD_HEADER_SIZE},
        JournalId,
    },
    segment::meta::{SegmentId, SegmentMeta},
    sync::test_point::{self, FailPoint},
    SeqNo,
};
use std::{
    fs::{File, OpenOptions},
    io::Write,
    path::{Path, PathBuf},
};

pub type ManifestId = u64;

pub fn manifest_path<P: AsRef<Path>>(folder: P, id: ManifestId) -> PathBuf {
    folder.as_ref().join(format!("{MANIFEST_PREFIX}{id}"))
}

/// Appends edits to the active manifest file
pub struct ManifestWriter {
    id: ManifestId,
    path: PathBuf,
    file: File,
    buf: Vec<u8>,
    edit_count: usize,
}

impl ManifestWriter {
    /// Writes a new manifest starting with `snapshot`, and points `CURRENT` to it.
    pub fn create<P: AsRef<Path>>(
        folder: P,
        id: ManifestId,
        snapshot: &VersionEdit,
    ) -> crate::Result<Self> {
        let folder = folder.as_ref();
        let path = manifest_path(folder, id);

        log::debug!("Writing manifest checkpoint {path:?}");

        let file = OpenOptions::new()
            .create_new(true)
            .write(true)
            .open(&path)?;

        let mut writer = Self {
            id,
            path,
            file,
            buf: Vec::new(),
            edit_count: 0,
        };

        writer.write_edit(snapshot)?;
        writer.file.sync_all()?;

        // IMPORTANT: fsync folder on Unix
        fsync_directory(folder)?;

        rewrite_atomic(
            folder.join(CURRENT_FILE),
            format!("{MANIFEST_PREFIX}{id}\n").as_bytes(),
        )?;

        Ok(writer)
    }

    pub fn id(&self) -> ManifestId {
        self.id
    }

    /// Amount of edits appended since the snapshot
    pub fn edit_count(&self) -> usize {
        self.edit_count
    }

    fn write_edit(&mut self, edit: &VersionEdit) -> crate::Result<()> {
        self.buf.clear();
        edit.encode_into(&mut self.buf)?;

        let mut frame = Vec::with_capacity(RECORD_HEADER_SIZE + self.buf.len());
        write_framed(&mut frame, &self.buf)?;

        self.file.write_all(&frame)?;
        Ok(())
    }

    /// Durably appends an edit.
    pub fn append(&mut self, edit: &VersionEdit) -> crate::Result<()> {
        test_point::check(FailPoint::ManifestAppend, &self.path)?;

        self.write_edit(edit)?;
        self.file.sync_data()?;
        self.edit_count += 1;
        Ok(())
    }
}

/// State reconstructed by replaying a manifest
#[derive(Debug, Default, Eq, PartialEq)]
pub struct ManifestState {
    pub levels: Vec<Vec<SegmentMeta>>,
    pub log_number: JournalId,
    pub last_seqno: SeqNo,
    pub next_segment_id: SegmentId,
}

impl ManifestState {
    pub fn apply(&mut self, edit: VersionEdit) -> crate::Result<()> {
        match edit {
            VersionEdit::Flush {
                log_number,
                last_seqno,
                added,
            } => {
                self.log_number = self.log_number.max(log_number);
                self.last_seqno = self.last_seqno.max(last_seqno);

                for meta in added {
                    self.next_segment_id = self.next_segment_id.max(meta.id + 1);

                    let Some(l0) = self.levels.first_mut() else {
                        return Err(crate::Error::Corruption("manifest has no levels"));
                    };
                    l0.push(meta);
                }
            }
            VersionEdit::Compaction { removed, added } => {
                for level in &mut self.levels {
                    level.retain(|x| !removed.contains(&x.id));
                }

                for (level_idx, meta) in added {
                    self.next_segment_id = self.next_segment_id.max(meta.id + 1);

                    let Some(level) = self.levels.get_mut(usize::from(level_idx)) else {
                        return Err(crate::Error::Corruption("manifest references unknown level"));
                    };
                    level.push(meta);
                }
            }
            VersionEdit::Snapshot {
                levels,
                log_number,
                last_seqno,
                next_segment_id,
            } => {
                self.levels = levels;
                self.log_number = log_number;
                self.last_seqno = last_seqno;
                self.next_segment_id = next_segment_id;
            }
        }

        Ok(())
    }

    pub fn to_snapshot(&self) -> VersionEdit {
        VersionEdit::Snapshot {
            levels: self.levels.clone(),
            log_number: self.log_number,
            last_seqno: self.last_seqno,
            next_segment_id: self.next_segment_id,
        }
    }
}

/// Reads the manifest `CURRENT` points to, returns `None` for a fresh tree
pub fn recover<P: AsRef<Path>>(folder: P) -> crate::Result<Option<(ManifestId, ManifestState)>> {
    let folder = folder.as_ref();
    let current_path = folder.join(CURRENT_FILE);

    if !current_path.try_exists()? {
        return Ok(None);
    }

    let current = std::fs::read_to_string(&current_path)?;

    let Some(id) = current
        .trim()
        .strip_prefix(MANIFEST_PREFIX)
        .and_then(|x| x.parse::<ManifestId>().ok())
    else {
        log::error!("Invalid CURRENT file content: {current:?}");
        return Err(crate::Error::Corruption("invalid CURRENT file"));
    };

    let path = manifest_path(folder, id);
    log::debug!("Recovering manifest {path:?}");

    let bytes = std::fs::read(&path)?;

    let mut state = ManifestState::default();
    let mut pos = 0;
    let mut edit_count = 0;

    loop {
        match read_frame(&bytes, pos) {
            Frame::Valid(payload) => {
                let mut reader = payload;
                let edit = VersionEdit::decode_from(&mut reader)?;

                if edit_count == 0 && !matches!(edit, VersionEdit::Snapshot { .. }) {
                    return Err(crate::Error::Corruption(
                        "manifest does not start with a snapshot",
                    ));
                }

                state.apply(edit)?;

                pos += RECORD_HEADER_SIZE + payload.len();
                edit_count += 1;
            }
            Frame::Torn | Frame::Corrupt { .. } => {
                let has_more = (pos + 1..bytes.len())
                    .any(|offset| matches!(read_frame(&bytes, offset), Frame::Valid(_)));

                if has_more {
                    log::error!("Manifest {path:?} is corrupt at {pos}");
                    return Err(crate::Error::Corruption("manifest checksum mismatch"));
                }

                if pos < bytes.len() {
                    // NOTE: An edit that was not completely written was never acknowledged
                    log::warn!(
                        "Discarding incomplete manifest edit at {pos} ({}B)",
                        bytes.len() - pos,
                    );
                }

                break;
            }
        }
    }

    if edit_count == 0 {
        return Err(crate::Error::Corruption("manifest is empty"));
    }

    log::debug!("Replayed {edit_count} manifest edits");

    Ok(Some((id, state)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::segment::meta::tests::meta;
    use tempfile::tempdir;
    use test_log::test;

    fn initial() -> VersionEdit {
        VersionEdit::Snapshot {
            levels: vec![vec![], vec![]],
            log_number: 1,
            last_seqno: 0,
            next_segment_id: 1,
        }
    }

    #[test]
    fn manifest_replay() -> crate::Result<()> {
        let dir = tempdir()?;
        assert!(recover(dir.path())?.is_none());

        {
            let mut writer = ManifestWriter::create(dir.path(), 1, &initial())?;

            writer.append(&VersionEdit::Flush {
                log_number: 3,
                last_seqno: 10,
                added: vec![meta(1, b"a", b"c"), meta(2, b"b", b"d")],
            })?;

            writer.append(&VersionEdit::Compaction {
                removed: vec![1, 2],
                added: vec![(1, meta(3, b"a", b"d"))],
            })?;

            assert_eq!(2, writer.edit_count());
        }

        let (id, state) = recover(dir.path())?.expect("should exist");
        assert_eq!(1, id);
        assert_eq!(3, state.log_number);
        assert_eq!(10, state.last_seqno);
        assert_eq!(4, state.next_segment_id);
        assert_eq!(
            vec![vec![], vec![meta(3, b"a", b"d")]],
            state.levels
        );

        Ok(())
    }

    #[test]
    fn manifest_torn_tail() -> crate::Result<()> {
        let dir = tempdir()?;

        let path = {
            let mut writer = ManifestWriter::create(dir.path(), 1, &initial())?;
            writer.append(&VersionEdit::Flush {
                log_number: 2,
                last_seqno: 5,
                added: vec![meta(1, b"a", b"c")],
            })?;
            manifest_path(dir.path(), 1)
        };

        {
            let mut file = OpenOptions::new().append(true).open(&path)?;
            file.write_all(&[0, 0, 1, 0, 7, 7])?;
        }

        let (_, state) = recover(dir.path())?.expect("should exist");
        assert_eq!(2, state.log_number);
        assert_eq!(1, state.levels.first().map(Vec::len).unwrap_or_default());

        Ok(())
    }

    #[test]
    fn manifest_interior_corruption() -> crate::Result<()> {
        let dir = tempdir()?;

        let path = {
            let mut writer = ManifestWriter::create(dir.path(), 1, &initial())?;
            for id in 1..=3 {
                writer.append(&VersionEdit::Flush {
                    log_number: id + 1,
                    last_seqno: id,
                    added: vec![meta(id, b"a", b"c")],
                })?;
            }
            manifest_path(dir.path(), 1)
        };

        let mut bytes = std::fs::read(&path)?;
        if let Some(byte) = bytes.get_mut(RECORD_HEADER_SIZE + 1) {
            *byte ^= 0xFF;
        }
        std::fs::write(&path, &bytes)?;

        assert!(matches!(
            recover(dir.path()),
            Err(crate::Error::Corruption(_))
        ));

        Ok(())
    }

    #[test]
    fn manifest_checkpoint_switches_current() -> crate::Result<()> {
        let dir = tempdir()?;

        ManifestWriter::create(dir.path(), 1, &initial())?;

        let snapshot = VersionEdit::Snapshot {
            levels: vec![vec![meta(9, b"x", b"y")], vec![]],
            log_number: 5,
            last_seqno: 50,
            next_segment_id: 10,
        };
        ManifestWriter::create(dir.path(), 2, &snapshot)?;

        let (id, state) = recover(dir.path())?.expect("should exist");
        assert_eq!(2, id);
        assert_eq!(snapshot, state.to_snapshot());

        Ok(())
    }
}
