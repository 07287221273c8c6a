// Copyright (c) 2024-present, fjall-rs
// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

use super::{
    state::{CompactionState, HiddenGuard},
    stream::CompactionStream,
    Choice, CompactionStrategy, Input as CompactionPayload,
};
use crate::{
    instrumentation::{Instrumentation, StatCode},
    merge::{BoxedIterator, MergeIterator},
    range::UserKeyRange,
    segment::{meta::SegmentId, writer::MultiWriter, Segment},
    snapshot_tracker::SnapshotTracker,
    stats::Stats,
    stop_signal::StopSignal,
    sync::test_point::{self, FailPoint},
    version::{edit::VersionEdit, Version, VersionDirectory},
    Config, UserKey,
};
use std::{
    ops::Bound,
    sync::Arc,
    time::{Duration, Instant},
};

/// Compaction options
pub struct Options<'a> {
    /// Configuration of tree
    pub config: &'a Config,

    pub directory: &'a VersionDirectory,

    /// Segments that are already being compacted
    pub state: &'a CompactionState,

    /// Snapshot tracker (required for computing which versions can be dropped)
    pub snapshot_tracker: &'a SnapshotTracker,

    pub strategy: &'a dyn CompactionStrategy,

    pub stop_signal: &'a StopSignal,

    pub stats: &'a Stats,

    pub instrumentation: &'a Instrumentation,
}

/// Runs one compaction chosen by the compaction strategy.
///
/// Returns `true` if the strategy found something to do.
pub fn do_compaction(opts: &Options) -> crate::Result<bool> {
    if opts.stop_signal.is_stopped() {
        log::debug!("compactor: stopping before compaction because of stop signal");
        return Ok(false);
    }

    let (version, choice, _guard) = {
        let mut hidden = opts.state.lock();

        // NOTE: Compactions install their version before showing their
        // inputs again, so under the lock the current version is up to
        // date for all segments that are not hidden
        let version = opts.directory.current();

        log::trace!("compactor: consulting compaction strategy {:?}", opts.strategy.get_name());
        let choice = opts.strategy.choose(&version, &hidden, opts.config);

        let guard = match &choice {
            Choice::Move(input) | Choice::Merge(input) => Some(HiddenGuard::new(
                opts.state,
                &mut hidden,
                &input.segment_ids,
            )),
            Choice::DoNothing => None,
        };

        (version, choice, guard)
    };

    match choice {
        Choice::DoNothing => {
            log::trace!("Compactor chose to do nothing");
            Ok(false)
        }
        Choice::Move(payload) => {
            move_segments(opts, &version, &payload)?;
            Ok(true)
        }
        Choice::Merge(payload) => {
            merge_segments(opts, &version, &payload)?;
            Ok(true)
        }
    }
}

/// Compacts every segment overlapping `range` into the last level.
///
/// Segments of all levels that overlap the key range of a picked segment
/// are picked as well, so the result is a single sorted run in the last level.
pub fn compact_range(opts: &Options, range: &UserKeyRange) -> crate::Result<()> {
    let (version, payload, _guard) = {
        let mut hidden = opts.state.lock();

        loop {
            if opts.stop_signal.is_stopped() {
                log::debug!("compactor: not compacting range because of stop signal");
                return Ok(());
            }

            let version = opts.directory.current();
            let segment_ids = overlapping_closure(&version, range);

            if segment_ids.is_empty() {
                log::debug!("compactor: no segments overlap the requested range");
                return Ok(());
            }

            if hidden.is_any_hidden(&segment_ids) {
                log::trace!("compactor: waiting for running compactions to release segments");
                hidden = opts.state.wait_for_release(hidden, Duration::from_millis(100));
                continue;
            }

            let guard = HiddenGuard::new(opts.state, &mut hidden, &segment_ids);

            #[allow(clippy::cast_possible_truncation)]
            let payload = CompactionPayload {
                segment_ids,
                dest_level: version.last_level_index() as u8,
                target_size: opts.config.target_segment_size,
            };

            break (version, payload, guard);
        }
    };

    merge_segments(opts, &version, &payload)
}

/// IDs of all segments overlapping `range`, extended until no other
/// segment overlaps the key range covered by the picked ones
fn overlapping_closure(version: &Version, range: &UserKeyRange) -> Vec<SegmentId> {
    let mut picked: Vec<&Arc<Segment>> = version
        .iter_segments()
        .filter(|x| x.meta.overlaps(range))
        .collect();

    let mut hull: Option<(UserKey, UserKey)> = None;

    loop {
        for segment in &picked {
            let (min, max) = &segment.meta.key_range;

            hull = Some(match hull {
                None => (min.clone(), max.clone()),
                Some((lo, hi)) => (lo.min(min.clone()), hi.max(max.clone())),
            });
        }

        let Some((lo, hi)) = &hull else {
            return vec![];
        };

        let range = (Bound::Included(lo.clone()), Bound::Included(hi.clone()));

        let extended: Vec<_> = version
            .iter_segments()
            .filter(|x| x.meta.overlaps(&range))
            .collect();

        if extended.len() == picked.len() {
            return picked.iter().map(|x| x.id()).collect();
        }

        picked = extended;
    }
}

/// Re-assigns segments to another level without rewriting them
fn move_segments(opts: &Options, version: &Version, payload: &CompactionPayload) -> crate::Result<()> {
    let added = payload
        .segment_ids
        .iter()
        .filter_map(|id| version.get_segment(*id))
        .map(|x| (payload.dest_level, x.meta.clone()))
        .collect::<Vec<_>>();

    if added.len() != payload.segment_ids.len() {
        log::warn!("compactor: segments to move are not in the current version anymore");
        return Ok(());
    }

    log::debug!(
        "compactor: Moving segments {:?} to level {}",
        payload.segment_ids,
        payload.dest_level,
    );

    opts.directory.log_and_apply(
        VersionEdit::Compaction {
            removed: payload.segment_ids.clone(),
            added,
        },
        &[],
    )?;

    opts.stats.compactions_completed.fetch_add(1);

    Ok(())
}

fn merge_segments(
    opts: &Options,
    version: &Version,
    payload: &CompactionPayload,
) -> crate::Result<()> {
    let to_merge = payload
        .segment_ids
        .iter()
        .filter_map(|id| version.get_segment(*id))
        .cloned()
        .collect::<Vec<_>>();

    if to_merge.len() != payload.segment_ids.len() {
        log::warn!("compactor: segments to merge are not in the current version anymore");
        return Ok(());
    }

    log::debug!(
        "compactor: Chosen {} segments to compact into level {}",
        to_merge.len(),
        payload.dest_level,
    );

    let start = Instant::now();

    let created = opts
        .instrumentation
        .timed(StatCode::CompactionDuration, || {
            write_merged(opts, version, payload, &to_merge)
        })?;

    let Some((created_segments, bytes_written)) = created else {
        return Ok(());
    };

    let added = created_segments
        .iter()
        .map(|x| (payload.dest_level, x.meta.clone()))
        .collect();

    opts.directory
        .log_and_apply(
            VersionEdit::Compaction {
                removed: payload.segment_ids.clone(),
                added,
            },
            &created_segments,
        )
        .inspect_err(|e| log::error!("compactor: failed to install compaction result: {e:?}"))?;

    log::debug!(
        "Compacted in {}ms ({} segments created)",
        start.elapsed().as_millis(),
        created_segments.len()
    );

    opts.stats.compactions_completed.fetch_add(1);
    opts.stats.bytes_compacted.fetch_add(bytes_written);

    Ok(())
}

/// Writes the merged output segments
///
/// Returns `None` if the compaction was aborted because of the stop signal.
fn write_merged(
    opts: &Options,
    version: &Version,
    payload: &CompactionPayload,
    to_merge: &[Arc<Segment>],
) -> crate::Result<Option<(Vec<Arc<Segment>>, u64)>> {
    let segments_folder = opts.directory.segments_folder();

    test_point::check(FailPoint::CompactionWrite, segments_folder)?;

    let iters = to_merge
        .iter()
        .map(|x| Box::new(x.range((Bound::Unbounded, Bound::Unbounded))) as BoxedIterator<'_>)
        .collect();

    let dest_level = usize::from(payload.dest_level);
    let gc_watermark = opts.snapshot_tracker.gc_watermark();

    // NOTE: Tombstones can only be evicted if there is nothing underneath
    // the destination level they could be shadowing
    let mut stream = CompactionStream::new(
        MergeIterator::new(iters),
        gc_watermark,
        opts.config.merge_operator.clone(),
        |key: &[u8]| !version.has_data_below(dest_level, key),
    );

    let mut writer = MultiWriter::new(
        payload.target_size,
        opts.directory.segment_id_generator().clone(),
        crate::segment::writer::Options {
            folder: segments_folder.to_path_buf(),
            block_size: opts.config.block_size,
        },
    )?;

    for (idx, item) in stream.by_ref().enumerate() {
        if let Err(e) = item.and_then(|item| writer.write(item)) {
            writer.abort();
            return Err(e);
        }

        if idx % 10_000 == 0 && opts.stop_signal.is_stopped() {
            log::debug!("compactor: stopping amidst compaction because of stop signal");
            writer.abort();
            return Ok(None);
        }
    }

    log::trace!(
        "compactor: dropped {} versions below watermark {gc_watermark}",
        stream.dropped_versions()
    );

    let metas = writer.finish()?;
    let bytes_written = metas.iter().map(|x| x.file_size).sum();

    let mut created = Vec::with_capacity(metas.len());
    let mut metas = metas.into_iter();

    while let Some(meta) = metas.next() {
        let id = meta.id;

        match Segment::open(segments_folder, meta) {
            Ok(segment) => created.push(Arc::new(segment)),
            Err(e) => {
                log::error!("compactor: failed to open created segment {id}: {e:?}");

                for segment in &created {
                    segment.mark_obsolete();
                }

                for id in std::iter::once(id).chain(metas.map(|x| x.id)) {
                    if let Err(e) = std::fs::remove_file(segments_folder.join(id.to_string())) {
                        log::warn!("Failed to remove segment {id}: {e:?}");
                    }
                }

                return Err(e);
            }
        }
    }

    Ok(Some((created, bytes_written)))
}
