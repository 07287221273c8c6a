// Copyright (c) 2024-present, fjall-rs
// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

use crate::{
    memtable::{Memtable, MemtableId},
    segment::Segment,
    value::InternalValue,
};
use std::{
    collections::VecDeque,
    sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard},
};

/// Flush progress of a sealed memtable
#[derive(Clone, Debug)]
pub enum FlushState {
    /// Waiting for a flush worker
    Pending,

    /// A flush worker is writing its segment
    InFlight,

    /// The segment is written, but not yet registered in a version
    ///
    /// `None` if the memtable had nothing to write.
    Written(Option<Arc<Segment>>),
}

pub struct SealedMemtable {
    pub memtable: Arc<Memtable>,
    pub state: FlushState,
}

pub struct Buffers {
    pub active: Arc<Memtable>,

    /// Sealed memtables, oldest first
    pub sealed: VecDeque<SealedMemtable>,
}

/// The ordered chain of in-memory write buffers
///
/// Exactly one memtable is mutable at a time; rotation seals it and
/// installs a new one with the next ID. Sealed memtables keep serving
/// reads until their contents are registered in a version.
///
/// Inserts take the read lock, so they never overlap with a rotation.
pub struct BufferSequence {
    buffers: RwLock<Buffers>,
}

impl BufferSequence {
    pub fn new(active: Arc<Memtable>, sealed: Vec<Arc<Memtable>>) -> Self {
        for memtable in &sealed {
            memtable.seal();
        }

        Self {
            buffers: RwLock::new(Buffers {
                active,
                sealed: sealed
                    .into_iter()
                    .map(|memtable| SealedMemtable {
                        memtable,
                        state: FlushState::Pending,
                    })
                    .collect(),
            }),
        }
    }

    #[track_caller]
    #[allow(clippy::expect_used)]
    fn read_lock(&self) -> RwLockReadGuard<'_, Buffers> {
        self.buffers.read().expect("lock is poisoned")
    }

    #[track_caller]
    #[allow(clippy::expect_used)]
    fn write_lock(&self) -> RwLockWriteGuard<'_, Buffers> {
        self.buffers.write().expect("lock is poisoned")
    }

    pub fn active(&self) -> Arc<Memtable> {
        self.read_lock().active.clone()
    }

    pub fn active_id(&self) -> MemtableId {
        self.read_lock().active.id()
    }

    /// Inserts items into the active memtable, without it being rotated in between
    ///
    /// Returns the amount of added bytes and the memtable size afterwards.
    pub fn insert(&self, items: impl IntoIterator<Item = InternalValue>) -> (u64, u64) {
        let buffers = self.read_lock();

        let mut added = 0;
        let mut size_after = buffers.active.size();

        for item in items {
            let (item_size, size) = buffers.active.insert(item);
            added += item_size;
            size_after = size;
        }

        (added, size_after)
    }

    /// Seals the active memtable and installs a new one with `next_id`
    ///
    /// The caller keeps the journal in lockstep, so `next_id` is the
    /// ID of the journal that new writes go to.
    pub fn rotate(&self, next_id: MemtableId) -> Arc<Memtable> {
        let mut buffers = self.write_lock();

        debug_assert!(next_id > buffers.active.id());

        let sealed = std::mem::replace(&mut buffers.active, Arc::new(Memtable::new(next_id)));
        sealed.seal();

        log::debug!(
            "Rotated memtable {} ({}B), new active memtable is {next_id}",
            sealed.id(),
            sealed.size(),
        );

        buffers.sealed.push_back(SealedMemtable {
            memtable: sealed.clone(),
            state: FlushState::Pending,
        });

        sealed
    }

    /// All memtables, newest first
    pub fn snapshot(&self) -> Vec<Arc<Memtable>> {
        let buffers = self.read_lock();

        let mut memtables = Vec::with_capacity(buffers.sealed.len() + 1);
        memtables.push(buffers.active.clone());
        memtables.extend(buffers.sealed.iter().rev().map(|x| x.memtable.clone()));
        memtables
    }

    pub fn sealed_count(&self) -> usize {
        self.read_lock().sealed.len()
    }

    /// ID of the oldest memtable that is not yet registered in a version
    pub fn oldest_unflushed_id(&self) -> MemtableId {
        let buffers = self.read_lock();

        buffers
            .sealed
            .front()
            .map_or_else(|| buffers.active.id(), |x| x.memtable.id())
    }

    /// Amount of sealed memtables no flush has claimed yet
    pub fn pending_count(&self) -> usize {
        self.read_lock()
            .sealed
            .iter()
            .filter(|x| matches!(x.state, FlushState::Pending))
            .count()
    }

    /// Claims the oldest pending memtable for flushing.
    pub fn pick_next_for_flush(&self) -> Option<Arc<Memtable>> {
        let mut buffers = self.write_lock();

        let entry = buffers
            .sealed
            .iter_mut()
            .find(|x| matches!(x.state, FlushState::Pending))?;

        entry.state = FlushState::InFlight;
        Some(entry.memtable.clone())
    }

    fn set_state(&self, id: MemtableId, state: FlushState) {
        let mut buffers = self.write_lock();

        if let Some(entry) = buffers.sealed.iter_mut().find(|x| x.memtable.id() == id) {
            entry.state = state;
        } else {
            log::warn!("Sealed memtable {id} vanished while being flushed");
        }
    }

    /// Parks the written segment of a memtable until it can be committed.
    pub fn mark_written(&self, id: MemtableId, segment: Option<Arc<Segment>>) {
        self.set_state(id, FlushState::Written(segment));
    }

    /// Hands a memtable back to the flush queue.
    pub fn mark_failed(&self, id: MemtableId) {
        self.set_state(id, FlushState::Pending);
    }

    /// Returns the longest prefix (oldest first) of memtables whose segments are written
    pub fn ready_prefix(&self) -> Vec<(MemtableId, Option<Arc<Segment>>)> {
        self.read_lock()
            .sealed
            .iter()
            .map_while(|x| match &x.state {
                FlushState::Written(segment) => Some((x.memtable.id(), segment.clone())),
                _ => None,
            })
            .collect()
    }

    /// Removes sealed memtables up to (and including) `last_id`
    ///
    /// Must only be called once their segments are visible in the current version.
    ///
    /// Returns the amount of bytes freed.
    pub fn retire(&self, last_id: MemtableId) -> u64 {
        let mut buffers = self.write_lock();
        let mut freed = 0;

        while buffers
            .sealed
            .front()
            .is_some_and(|x| x.memtable.id() <= last_id)
        {
            if let Some(entry) = buffers.sealed.pop_front() {
                entry.memtable.mark_flushed();
                freed += entry.memtable.size();

                log::trace!("Retired memtable {}", entry.memtable.id());
            }
        }

        freed
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::value::ValueType;
    use test_log::test;

    fn value(key: &[u8], seqno: u64) -> InternalValue {
        InternalValue::from_components(key, *b"v", seqno, ValueType::Value)
    }

    #[test]
    fn buffer_sequence_rotate() {
        let buffers = BufferSequence::new(Arc::new(Memtable::new(1)), vec![]);
        buffers.insert([value(b"a", 1)]);

        let sealed = buffers.rotate(2);
        assert_eq!(1, sealed.id());
        assert_eq!(crate::memtable::MemtableState::Immutable, sealed.state());
        assert_eq!(2, buffers.active_id());
        assert_eq!(1, buffers.sealed_count());
        assert_eq!(1, buffers.oldest_unflushed_id());

        let ids = buffers.snapshot().iter().map(|x| x.id()).collect::<Vec<_>>();
        assert_eq!(vec![2, 1], ids);
    }

    #[test]
    fn buffer_sequence_ready_prefix_is_ordered() {
        let buffers = BufferSequence::new(Arc::new(Memtable::new(1)), vec![]);
        buffers.rotate(2);
        buffers.rotate(3);
        buffers.rotate(4);

        let first = buffers.pick_next_for_flush().expect("should exist");
        let second = buffers.pick_next_for_flush().expect("should exist");
        let third = buffers.pick_next_for_flush().expect("should exist");
        assert!(buffers.pick_next_for_flush().is_none());
        assert_eq!((1, 2, 3), (first.id(), second.id(), third.id()));

        // Newer flush finished first, but must wait for the older one
        buffers.mark_written(2, None);
        assert!(buffers.ready_prefix().is_empty());

        buffers.mark_written(1, None);
        let ready = buffers.ready_prefix();
        assert_eq!(
            vec![1, 2],
            ready.iter().map(|(id, _)| *id).collect::<Vec<_>>()
        );

        buffers.retire(2);
        assert_eq!(1, buffers.sealed_count());
        assert_eq!(crate::memtable::MemtableState::Flushed, first.state());

        buffers.mark_failed(3);
        assert_eq!(
            Some(3),
            buffers.pick_next_for_flush().map(|memtable| memtable.id())
        );
    }

    #[test]
    fn buffer_sequence_inserts_never_cross_rotation() {
        let buffers = Arc::new(BufferSequence::new(Arc::new(Memtable::new(1)), vec![]));

        let writers = (0..4u64)
            .map(|t| {
                let buffers = buffers.clone();
                std::thread::spawn(move || {
                    for i in 0..1_000u64 {
                        let key = (t * 1_000 + i).to_be_bytes();
                        buffers.insert([value(&key, t * 1_000 + i + 1)]);
                    }
                })
            })
            .collect::<Vec<_>>();

        for id in 2..10 {
            buffers.rotate(id);
        }

        for writer in writers {
            writer.join().expect("should join");
        }

        let total: usize = buffers.snapshot().iter().map(|x| x.len()).sum();
        assert_eq!(4_000, total);
    }
}
