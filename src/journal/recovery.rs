// Copyright (c) 2024-present, fjall-rs
// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

use super::{error::RecoveryError, JournalId};
use crate::file::JOURNAL_EXTENSION;
use std::path::{Path, PathBuf};

/// Lists all journal files in the journals folder, sorted by ID ascending
///
/// Files without the journal extension (for example `.DS_Store`) are ignored.
pub fn list_journals<P: AsRef<Path>>(folder: P) -> crate::Result<Vec<(JournalId, PathBuf)>> {
    let folder = folder.as_ref();

    let mut journals = Vec::<(JournalId, PathBuf)>::new();

    for dirent in std::fs::read_dir(folder)? {
        let dirent = dirent?;
        let path = dirent.path();
        let filename = dirent.file_name();

        let Some(filename) = filename.to_str() else {
            log::error!("Invalid journal file name: {filename:?}");
            return Err(crate::Error::JournalRecovery(RecoveryError::InvalidFileName));
        };

        if !Path::new(filename)
            .extension()
            .is_some_and(|ext| ext.eq_ignore_ascii_case(JOURNAL_EXTENSION))
        {
            log::trace!("Ignoring non-journal file {path:?}");
            continue;
        }

        if !dirent.file_type()?.is_file() {
            log::warn!("Ignoring journal directory {path:?}");
            continue;
        }

        let Some(basename) = Path::new(filename).file_stem().and_then(|x| x.to_str()) else {
            log::error!("Invalid journal file name: {filename}");
            return Err(crate::Error::JournalRecovery(RecoveryError::InvalidFileName));
        };

        let journal_id = basename.parse::<JournalId>().map_err(|_| {
            log::error!("Invalid journal file name: {filename}");
            crate::Error::JournalRecovery(RecoveryError::InvalidFileName)
        })?;

        journals.push((journal_id, path));
    }

    journals.sort_by(|(a, _), (b, _)| a.cmp(b));

    log::trace!("Found journals: {journals:?}");

    Ok(journals)
}
