// Copyright (c) 2024-present, fjall-rs
// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

use super::flush_memtable;
use crate::{
    instrumentation::StatCode, segment::writer::Options, supervisor::SupervisorInner,
    version::edit::VersionEdit,
};

/// Flushes the oldest pending memtable, then commits all flushes that are ready.
///
/// Returns `false` if there was nothing to flush.
///
/// On error, the memtable is handed back to the flush queue.
pub fn run(supervisor: &SupervisorInner) -> crate::Result<bool> {
    let Some(memtable) = supervisor.buffers.pick_next_for_flush() else {
        log::trace!("No memtable to flush");
        return Ok(false);
    };

    let result = {
        let _permit = supervisor.flush_semaphore.access();

        // NOTE: Get the watermark only now, so snapshots that were closed while
        // waiting for a permit do not hold back garbage collection
        let gc_watermark = supervisor.snapshot_tracker.gc_watermark();
        let segment_id = supervisor.directory.segment_id_generator().next();

        let opts = Options {
            folder: supervisor.directory.segments_folder().to_path_buf(),
            block_size: supervisor.config.block_size,
        };

        supervisor
            .instrumentation
            .timed(StatCode::FlushDuration, || {
                flush_memtable(
                    &memtable,
                    segment_id,
                    &opts,
                    gc_watermark,
                    supervisor.config.merge_operator.clone(),
                )
            })
    };

    match result {
        Ok(segment) => supervisor.buffers.mark_written(memtable.id(), segment),
        Err(e) => {
            supervisor.buffers.mark_failed(memtable.id());
            return Err(e);
        }
    }

    commit_ready(supervisor)?;

    Ok(true)
}

/// Installs the segments of all flushed memtables that can be committed in order.
///
/// A flushed memtable can only be committed once all older memtables are
/// committed, otherwise the journal of an older memtable could be deleted
/// before its data is durable in a segment.
pub fn commit_ready(supervisor: &SupervisorInner) -> crate::Result<()> {
    let _lock = supervisor.flush_commit_lock.lock();

    let ready = supervisor.buffers.ready_prefix();

    let Some(last_id) = ready.last().map(|(id, _)| *id) else {
        log::trace!("No flushed memtables ready to commit");
        return Ok(());
    };

    let segments = ready
        .iter()
        .filter_map(|(_, segment)| segment.clone())
        .collect::<Vec<_>>();

    let last_seqno = segments
        .iter()
        .map(|x| x.meta.seqnos.1)
        .max()
        .unwrap_or_else(|| supervisor.directory.last_seqno());

    let bytes_written: u64 = segments.iter().map(|x| x.meta.file_size).sum();

    let edit = VersionEdit::Flush {
        log_number: last_id + 1,
        last_seqno,
        added: segments.iter().map(|x| x.meta.clone()).collect(),
    };

    // IMPORTANT: The segments have to be durably registered before the
    // memtables are retired, otherwise reads could miss data
    if let Err(e) = supervisor.directory.log_and_apply(edit, &segments) {
        log::error!("Failed to commit flushed memtables up to {last_id}: {e:?}");

        for (id, _) in &ready {
            supervisor.buffers.mark_failed(*id);
        }

        return Err(e);
    }

    let freed = supervisor.buffers.retire(last_id);
    supervisor.write_buffer_manager.free(freed);

    supervisor.stats.flushes_completed.fetch_add(ready.len());
    supervisor.stats.bytes_flushed.fetch_add(bytes_written);

    match supervisor.journal.remove_obsolete(last_id + 1) {
        Ok(count) => log::trace!("Removed {count} obsolete journal(s)"),
        Err(e) => log::warn!("Failed to remove obsolete journals: {e:?}"),
    }

    log::debug!(
        "Committed {} flushed memtable(s) up to {last_id}, freed {freed}B of write buffer",
        ready.len(),
    );

    supervisor.flush_committed.notify_all();

    Ok(())
}

/// Time to wait before retrying a failed background task
pub fn backoff(failures: usize) -> std::time::Duration {
    let exponent = u32::try_from(failures.saturating_sub(1)).unwrap_or(u32::MAX).min(16);
    let ms = 100_u64.saturating_mul(2_u64.saturating_pow(exponent));

    std::time::Duration::from_millis(ms.min(5_000))
}
