// Copyright (c) 2024-present, fjall-rs
// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

use crate::{
    memtable::MemtableIter,
    merge::{BoxedIterator, MergeIterator},
    mvcc_stream::MvccStream,
    range::UserKeyRange,
    snapshot_nonce::SnapshotNonce,
    supervisor::SupervisorInner,
    version::Version,
    KvPair,
};
use std::sync::Arc;

/// A lazy, double-ended iterator over the key-value pairs of a snapshot
//
// We need to hold the snapshot nonce so the GC watermark does not
// move past this snapshot nonce, removing data that may still be read.
//
// The version is pinned as well, so its segment files
// stay alive until the iterator is dropped.
pub struct Iter {
    inner: MvccStream<MergeIterator<'static>>,

    #[allow(unused)]
    nonce: SnapshotNonce,

    #[allow(unused)]
    version: Arc<Version>,
}

impl Iter {
    pub(crate) fn new(supervisor: &SupervisorInner, nonce: SnapshotNonce, range: UserKeyRange) -> Self {
        // IMPORTANT: Memtables first, then the version
        //
        // A flush that commits in between makes a memtable show up twice
        // (deduplicated while reading); the other way around, its data could be missed
        let memtables = supervisor.buffers.snapshot();
        let version = supervisor.directory.current();

        let mut sources: Vec<BoxedIterator<'static>> =
            Vec::with_capacity(memtables.len() + version.segment_count());

        for memtable in memtables {
            if memtable.is_empty() {
                continue;
            }
            sources.push(Box::new(MemtableIter::new(memtable, &range).map(Ok)));
        }

        for segment in version.iter_segments() {
            if segment.meta.seqnos.0 > nonce.seqno || !segment.meta.overlaps(&range) {
                continue;
            }
            sources.push(Box::new(segment.range(range.clone())));
        }

        log::trace!(
            "Created iterator over {} source(s) at seqno={}",
            sources.len(),
            nonce.seqno,
        );

        let inner = MvccStream::new(
            MergeIterator::new(sources),
            nonce.seqno,
            supervisor.config.merge_operator.clone(),
        );

        Self {
            inner,
            nonce,
            version,
        }
    }
}

impl Iterator for Iter {
    type Item = crate::Result<KvPair>;

    fn next(&mut self) -> Option<Self::Item> {
        self.inner.next()
    }
}

impl DoubleEndedIterator for Iter {
    fn next_back(&mut self) -> Option<Self::Item> {
        self.inner.next_back()
    }
}
