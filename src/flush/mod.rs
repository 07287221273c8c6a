// Copyright (c) 2024-present, fjall-rs
// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

pub mod worker;

use crate::{
    compaction::stream::CompactionStream,
    memtable::{Memtable, MemtableIter},
    merge_operator::MergeOperator,
    segment::{
        meta::{SegmentId, SegmentMeta},
        writer::{Options, Writer},
        Segment,
    },
    sync::test_point::{self, FailPoint},
    SeqNo,
};
use std::{ops::Bound, sync::Arc};

/// Writes a sealed memtable into a new level-0 segment.
///
/// Versions that no snapshot at or above `gc_watermark` can see are dropped.
/// Tombstones are always kept, as older data may exist in segments.
///
/// Returns `None` if nothing was left to write. On error, the partially
/// written segment file is removed.
pub fn flush_memtable(
    memtable: &Arc<Memtable>,
    segment_id: SegmentId,
    opts: &Options,
    gc_watermark: SeqNo,
    merge_operator: Option<Arc<dyn MergeOperator>>,
) -> crate::Result<Option<Arc<Segment>>> {
    log::debug!(
        "Flushing memtable {} ({} items, {}B) -> segment {segment_id}",
        memtable.id(),
        memtable.len(),
        memtable.size(),
    );

    test_point::check(FailPoint::FlushWrite, &opts.folder)?;

    let writer = Writer::new(segment_id, opts.clone())?;
    let path = writer.path().to_path_buf();

    let iter = MemtableIter::new(memtable.clone(), &(Bound::Unbounded, Bound::Unbounded)).map(Ok);
    let stream = CompactionStream::new(iter, gc_watermark, merge_operator, |_: &[u8]| false);

    let result = write_segment(writer, stream).and_then(|meta| match meta {
        Some(meta) => Segment::open(&opts.folder, meta).map(|x| Some(Arc::new(x))),
        None => Ok(None),
    });

    match result {
        Ok(Some(segment)) => {
            log::debug!(
                "Flushed memtable {} into segment {segment_id} ({}B)",
                memtable.id(),
                segment.meta.file_size
            );
            Ok(Some(segment))
        }
        Ok(None) => {
            log::debug!("Memtable {} had nothing to flush", memtable.id());
            Ok(None)
        }
        Err(e) => {
            log::warn!("Flush of memtable {} failed: {e:?}", memtable.id());

            if let Err(e) = std::fs::remove_file(&path) {
                if e.kind() != std::io::ErrorKind::NotFound {
                    log::warn!("Failed to remove partial segment {path:?}: {e:?}");
                }
            }

            Err(e)
        }
    }
}

fn write_segment(
    mut writer: Writer,
    items: impl Iterator<Item = crate::Result<crate::value::InternalValue>>,
) -> crate::Result<Option<SegmentMeta>> {
    for item in items {
        writer.write(item?)?;
    }

    writer.finish()
}
