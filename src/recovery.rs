// Copyright (c) 2024-present, fjall-rs
// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

use crate::{
    file::fsync_directory,
    instrumentation::InstrumentationSink,
    journal::{
        error::RecoveryMode, reader::JournalReader, recovery::list_journals, Journal, JournalId,
    },
    memtable::Memtable,
    value::SeqNo,
};
use std::{path::Path, sync::Arc};

/// Write buffers rebuilt from the journals
pub struct RecoveredBuffers {
    /// Journal new writes go to
    pub journal: Journal,

    /// Memtable of the active journal
    pub active: Arc<Memtable>,

    /// Memtables of older journals that still need to be flushed, oldest first
    pub sealed: Vec<Arc<Memtable>>,

    /// Highest sequence number found in any journal
    pub max_seqno: Option<SeqNo>,
}

fn replay_journal(path: &Path, id: JournalId, mode: RecoveryMode) -> crate::Result<Memtable> {
    log::debug!("Replaying journal {path:?}");

    let memtable = Memtable::new(id);
    let mut reader = JournalReader::new(path, mode)?;
    let mut record_count = 0_usize;

    for record in reader.by_ref() {
        let record = record?;

        for (idx, item) in record.items.into_iter().enumerate() {
            memtable.insert(item.into_internal(record.seqno + idx as SeqNo));
        }

        record_count += 1;
    }

    if reader.skipped_records() > 0 {
        log::warn!(
            "Skipped {} corrupt record(s) in journal {path:?}",
            reader.skipped_records(),
        );
    }

    log::debug!(
        "Replayed {record_count} record(s) of journal {id}, {} items, {}B",
        memtable.len(),
        memtable.size(),
    );

    Ok(memtable)
}

/// Rebuilds the memtables from all journals that are not contained in segments.
///
/// Journals below `log_number` are fully flushed and deleted.
/// The newest journal is reopened for appending, the others are sealed.
pub fn recover_journals<P: AsRef<Path>>(
    folder: P,
    log_number: JournalId,
    mode: RecoveryMode,
    sink: Option<Arc<dyn InstrumentationSink>>,
) -> crate::Result<RecoveredBuffers> {
    let folder = folder.as_ref();

    std::fs::create_dir_all(folder)?;

    let mut journals = Vec::new();
    let mut removed_count = 0;

    for (id, path) in list_journals(folder)? {
        if id < log_number {
            log::debug!("Removing journal {id}, it is already flushed");
            std::fs::remove_file(&path)?;
            removed_count += 1;
        } else {
            journals.push((id, path));
        }
    }

    if removed_count > 0 {
        fsync_directory(folder)?;
    }

    let Some((active_id, _)) = journals.last().cloned() else {
        log::debug!("No journals to recover, starting journal {log_number}");

        return Ok(RecoveredBuffers {
            journal: Journal::create_new(folder, log_number, sink)?,
            active: Arc::new(Memtable::new(log_number)),
            sealed: vec![],
            max_seqno: None,
        });
    };

    let mut memtables = journals
        .iter()
        .map(|(id, path)| replay_journal(path, *id, mode).map(Arc::new))
        .collect::<crate::Result<Vec<_>>>()?;

    let max_seqno = memtables.iter().filter_map(|x| x.highest_seqno()).max();

    // NOTE: `journals` is not empty, so neither are the memtables
    let Some(active) = memtables.pop() else {
        return Err(crate::Error::Corruption("journal vanished during recovery"));
    };

    log::debug!(
        "Recovered {} sealed memtable(s), active journal is {active_id}",
        memtables.len(),
    );

    Ok(RecoveredBuffers {
        journal: Journal::from_file(folder, active_id, sink)?,
        active,
        sealed: memtables,
        max_seqno,
    })
}
