// Copyright (c) 2024-present, fjall-rs
// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

use super::{recovery::list_journals, JournalId};
use std::path::Path;

/// Deletes every journal whose ID is below `log_number`
///
/// Called once the version directory has durably recorded that all
/// memtables logged to those journals are contained in segments.
///
/// Returns the amount of deleted journals.
pub fn remove_obsolete_journals<P: AsRef<Path>>(
    folder: P,
    log_number: JournalId,
) -> crate::Result<usize> {
    let mut count = 0;

    for (id, path) in list_journals(folder)? {
        if id >= log_number {
            break;
        }

        // NOTE: The journals are fully flushed, and the manifest points
        // past them, so they are never replayed again
        log::trace!("Removing fully flushed journal {path:?}");
        std::fs::remove_file(&path)?;
        count += 1;
    }

    if count > 0 {
        log::debug!("Removed {count} obsolete journal(s) below {log_number}");
    }

    Ok(count)
}
