// Copyright (c) 2024-present, fjall-rs
// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

use super::{
    edit::VersionEdit,
    manifest::{self, manifest_path, ManifestState, ManifestWriter},
    Version, VersionId,
};
use crate::{
    file::{MANIFEST_PREFIX, SEGMENTS_FOLDER},
    id::SegmentIdGenerator,
    instrumentation::{InstrumentationSink, StatCode},
    journal::JournalId,
    segment::{meta::SegmentId, Segment},
    sync::InstrumentedMutex,
    HashSet, SeqNo,
};
use arc_swap::ArcSwap;
use std::{
    path::{Path, PathBuf},
    sync::{Arc, Weak},
};

/// Everything that is only touched while holding the metadata lock
struct MetadataState {
    manifest: ManifestWriter,

    /// Oldest journal that is still needed for recovery
    log_number: JournalId,

    /// Highest sequence number contained in segments
    last_seqno: SeqNo,

    /// Every version ever installed, to count the ones still pinned
    versions: Vec<Weak<Version>>,

    next_version_id: VersionId,

    /// Set if an append failed and the manifest may end in a partial edit
    needs_checkpoint: bool,
}

/// Owns the current version and the manifest
///
/// Installing a version (`log_and_apply`) is serialized by the metadata
/// lock: the edit is made durable in the manifest first, then the new
/// version is published. Readers pin the current version without taking
/// any lock.
pub struct VersionDirectory {
    folder: PathBuf,
    segments_folder: PathBuf,

    current: ArcSwap<Version>,
    state: InstrumentedMutex<MetadataState>,

    segment_id: SegmentIdGenerator,
    checkpoint_interval: usize,
}

impl VersionDirectory {
    fn from_parts(
        folder: &Path,
        version: Version,
        manifest: ManifestWriter,
        state: &ManifestState,
        checkpoint_interval: usize,
        sink: Option<Arc<dyn InstrumentationSink>>,
    ) -> Self {
        let next_version_id = version.id() + 1;
        let version = Arc::new(version);

        Self {
            folder: folder.into(),
            segments_folder: folder.join(SEGMENTS_FOLDER),
            state: InstrumentedMutex::with_instrumentation(
                MetadataState {
                    manifest,
                    log_number: state.log_number,
                    last_seqno: state.last_seqno,
                    versions: vec![Arc::downgrade(&version)],
                    next_version_id,
                    needs_checkpoint: false,
                },
                StatCode::MetadataMutexWait,
                sink,
            ),
            current: ArcSwap::new(version),
            segment_id: SegmentIdGenerator::new(state.next_segment_id),
            checkpoint_interval,
        }
    }

    /// Creates the manifest of a new, empty tree.
    pub fn create_new<P: AsRef<Path>>(
        folder: P,
        level_count: u8,
        checkpoint_interval: usize,
        sink: Option<Arc<dyn InstrumentationSink>>,
    ) -> crate::Result<Self> {
        let folder = folder.as_ref();
        std::fs::create_dir_all(folder.join(SEGMENTS_FOLDER))?;

        let state = ManifestState {
            levels: vec![vec![]; level_count.into()],
            log_number: 1,
            last_seqno: 0,
            next_segment_id: 1,
        };

        let manifest = ManifestWriter::create(folder, 1, &state.to_snapshot())?;

        Ok(Self::from_parts(
            folder,
            Version::new(0, level_count),
            manifest,
            &state,
            checkpoint_interval,
            sink,
        ))
    }

    /// Restores the last durable version, or creates a new tree if there is none
    ///
    /// Segment files that are not part of the recovered version are leftovers
    /// of unfinished flushes or compactions, and are deleted. The recovered
    /// state is written into a fresh manifest.
    pub fn recover<P: AsRef<Path>>(
        folder: P,
        level_count: u8,
        checkpoint_interval: usize,
        sink: Option<Arc<dyn InstrumentationSink>>,
    ) -> crate::Result<Self> {
        let folder = folder.as_ref();

        let Some((manifest_id, mut state)) = manifest::recover(folder)? else {
            log::debug!("No manifest found, creating new tree at {folder:?}");
            return Self::create_new(folder, level_count, checkpoint_interval, sink);
        };

        let level_count = usize::from(level_count);

        if state.levels.iter().skip(level_count).any(|x| !x.is_empty()) {
            log::error!(
                "Tree has {} levels, cannot reopen with {level_count} levels",
                state.levels.len()
            );
            return Err(crate::Error::InvalidArgument("level count cannot be reduced"));
        }
        state.levels.resize_with(level_count, Vec::new);

        let segments_folder = folder.join(SEGMENTS_FOLDER);
        std::fs::create_dir_all(&segments_folder)?;

        let mut live_ids = HashSet::default();

        let levels = state
            .levels
            .iter()
            .map(|level| {
                level
                    .iter()
                    .map(|meta| {
                        live_ids.insert(meta.id);
                        Segment::open(&segments_folder, meta.clone()).map(Arc::new)
                    })
                    .collect::<crate::Result<Vec<_>>>()
            })
            .collect::<crate::Result<Vec<_>>>()?;

        let highest_orphan = remove_orphan_segments(&segments_folder, &live_ids)?;
        if let Some(id) = highest_orphan {
            state.next_segment_id = state.next_segment_id.max(id + 1);
        }

        let version = Version::from_levels(0, levels);

        log::debug!(
            "Recovered version with {} segments, log_number={}, last_seqno={}",
            version.segment_count(),
            state.log_number,
            state.last_seqno,
        );

        let manifest = ManifestWriter::create(folder, manifest_id + 1, &state.to_snapshot())?;
        remove_old_manifests(folder, manifest.id())?;

        Ok(Self::from_parts(
            folder,
            version,
            manifest,
            &state,
            checkpoint_interval,
            sink,
        ))
    }

    /// Pins the current version.
    pub fn current(&self) -> Arc<Version> {
        self.current.load_full()
    }

    pub fn segments_folder(&self) -> &Path {
        &self.segments_folder
    }

    pub fn segment_id_generator(&self) -> &SegmentIdGenerator {
        &self.segment_id
    }

    /// Oldest journal that is still needed for recovery
    pub fn log_number(&self) -> JournalId {
        self.state.lock().log_number
    }

    /// Highest sequence number contained in segments
    pub fn last_seqno(&self) -> SeqNo {
        self.state.lock().last_seqno
    }

    /// Amount of versions that are still alive (the current one, plus every pinned one)
    pub fn live_versions(&self) -> usize {
        let mut state = self.state.lock();
        state.versions.retain(|x| x.strong_count() > 0);
        state.versions.len()
    }

    /// Durably records `edit` and installs the resulting version
    ///
    /// `new_segments` are the opened segments the edit adds.
    ///
    /// Segments removed by the edit are deleted from disk once the last
    /// version (or read) referencing them is gone.
    ///
    /// On error, the current version is unchanged. If the edit is known to not
    /// be in the manifest, the segments it would have added are marked obsolete,
    /// so their files are deleted once the caller drops them. Otherwise (the
    /// manifest could not be rolled over after a failed append) the files are
    /// kept, and cleaned up as orphans on the next open if the edit did not land.
    pub fn log_and_apply(
        &self,
        edit: VersionEdit,
        new_segments: &[Arc<Segment>],
    ) -> crate::Result<Arc<Version>> {
        let mut state = self.state.lock();

        let current = self.current.load_full();

        if state.needs_checkpoint {
            self.checkpoint(&mut state, &current)
                .inspect_err(|_| discard_segments(&current, new_segments))?;
        }

        let next = match current.apply(state.next_version_id, &edit, new_segments) {
            Ok(version) => Arc::new(version),
            Err(e) => {
                discard_segments(&current, new_segments);
                return Err(e);
            }
        };

        if let Err(e) = state.manifest.append(&edit) {
            log::error!("Failed to append edit to manifest: {e:?}");

            // NOTE: The manifest may now end in a partial edit, so it must not
            // be appended to anymore
            match self.checkpoint(&mut state, &current) {
                Ok(()) => discard_segments(&current, new_segments),
                Err(e) => {
                    log::error!("Failed to roll over manifest, keeping files of unapplied edit: {e:?}");
                    state.needs_checkpoint = true;
                }
            }

            return Err(e);
        }

        state.next_version_id += 1;

        match &edit {
            VersionEdit::Flush {
                log_number,
                last_seqno,
                ..
            } => {
                state.log_number = state.log_number.max(*log_number);
                state.last_seqno = state.last_seqno.max(*last_seqno);
            }
            VersionEdit::Compaction { removed, .. } => {
                let re_added = edit.added_ids();

                for id in removed.iter().filter(|id| !re_added.contains(id)) {
                    if let Some(segment) = current.get_segment(*id) {
                        segment.mark_obsolete();
                    }
                }
            }
            VersionEdit::Snapshot { .. } => {}
        }

        self.current.store(next.clone());

        state.versions.retain(|x| x.strong_count() > 0);
        state.versions.push(Arc::downgrade(&next));

        log::debug!("Installed version {}", next.id());
        log::trace!("{next:?}");

        if state.manifest.edit_count() >= self.checkpoint_interval {
            if let Err(e) = self.checkpoint(&mut state, &next) {
                log::warn!("Manifest checkpoint failed, continuing with old manifest: {e:?}");
            }
        }

        Ok(next)
    }

    /// Rolls the manifest over into a new file starting with a snapshot of `version`
    fn checkpoint(&self, state: &mut MetadataState, version: &Version) -> crate::Result<()> {
        let snapshot = VersionEdit::Snapshot {
            levels: version.to_metas(),
            log_number: state.log_number,
            last_seqno: state.last_seqno,
            next_segment_id: self.segment_id.peek(),
        };

        let old_id = state.manifest.id();
        let new_id = old_id + 1;

        match ManifestWriter::create(&self.folder, new_id, &snapshot) {
            Ok(manifest) => {
                state.manifest = manifest;
                state.needs_checkpoint = false;

                if let Err(e) = std::fs::remove_file(manifest_path(&self.folder, old_id)) {
                    log::warn!("Failed to remove old manifest {old_id}: {e:?}");
                }

                Ok(())
            }
            Err(e) => {
                if let Err(e) = std::fs::remove_file(manifest_path(&self.folder, new_id)) {
                    if e.kind() != std::io::ErrorKind::NotFound {
                        log::warn!("Failed to remove incomplete manifest {new_id}: {e:?}");
                    }
                }

                Err(e)
            }
        }
    }
}

/// Marks the segments of an edit that was not applied as obsolete
fn discard_segments(current: &Version, new_segments: &[Arc<Segment>]) {
    for segment in new_segments
        .iter()
        .filter(|x| current.get_segment(x.id()).is_none())
    {
        log::debug!("Discarding segment {} of unapplied edit", segment.id());
        segment.mark_obsolete();
    }
}

/// Deletes segment files that are not referenced by the manifest, returns the highest deleted ID
fn remove_orphan_segments(
    folder: &Path,
    live_ids: &HashSet<SegmentId>,
) -> crate::Result<Option<SegmentId>> {
    let mut highest = None;

    for dirent in std::fs::read_dir(folder)? {
        let dirent = dirent?;
        let path = dirent.path();

        let Some(id) = dirent
            .file_name()
            .to_str()
            .and_then(|x| x.parse::<SegmentId>().ok())
        else {
            log::warn!("Ignoring unknown file in segments folder: {path:?}");
            continue;
        };

        if live_ids.contains(&id) {
            continue;
        }

        log::info!("Removing orphaned segment file {path:?}");
        std::fs::remove_file(&path)?;

        highest = highest.max(Some(id));
    }

    Ok(highest)
}

fn remove_old_manifests(folder: &Path, active: manifest::ManifestId) -> crate::Result<()> {
    for dirent in std::fs::read_dir(folder)? {
        let dirent = dirent?;

        let Some(id) = dirent
            .file_name()
            .to_str()
            .and_then(|x| x.strip_prefix(MANIFEST_PREFIX))
            .and_then(|x| x.parse::<manifest::ManifestId>().ok())
        else {
            continue;
        };

        if id != active {
            log::debug!("Removing old manifest {id}");
            std::fs::remove_file(dirent.path())?;
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        segment::writer::{Options, Writer},
        sync::test_point::{fail_at, FailPoint},
        value::{InternalValue, ValueType},
    };
    use tempfile::tempdir;
    use test_log::test;

    fn write_segment(dir: &VersionDirectory, keys: &[&[u8]], seqno: SeqNo) -> crate::Result<Arc<Segment>> {
        let id = dir.segment_id_generator().next();

        let mut writer = Writer::new(
            id,
            Options {
                folder: dir.segments_folder().to_path_buf(),
                block_size: 4_096,
            },
        )?;

        for key in keys {
            writer.write(InternalValue::from_components(*key, *b"v", seqno, ValueType::Value))?;
        }

        let meta = writer.finish()?.expect("should not be empty");
        Ok(Arc::new(Segment::open(dir.segments_folder(), meta)?))
    }

    fn flush(dir: &VersionDirectory, segment: &Arc<Segment>, log_number: JournalId) -> crate::Result<Arc<Version>> {
        dir.log_and_apply(
            VersionEdit::Flush {
                log_number,
                last_seqno: segment.meta.seqnos.1,
                added: vec![segment.meta.clone()],
            },
            std::slice::from_ref(segment),
        )
    }

    #[test]
    fn version_directory_flush_and_recover() -> crate::Result<()> {
        let folder = tempdir()?;

        {
            let dir = VersionDirectory::create_new(folder.path(), 3, 100, None)?;
            let segment = write_segment(&dir, &[b"a", b"b"], 5)?;
            let version = flush(&dir, &segment, 2)?;

            assert_eq!(1, version.id());
            assert_eq!(1, version.segment_count());
            assert_eq!(2, dir.log_number());
            assert_eq!(5, dir.last_seqno());
        }

        // Leftover of an unfinished flush
        std::fs::write(folder.path().join(SEGMENTS_FOLDER).join("77"), b"garbage")?;

        let dir = VersionDirectory::recover(folder.path(), 3, 100, None)?;
        let version = dir.current();

        assert_eq!(1, version.segment_count());
        assert_eq!(2, dir.log_number());
        assert_eq!(5, dir.last_seqno());
        assert!(!folder.path().join(SEGMENTS_FOLDER).join("77").try_exists()?);
        assert!(dir.segment_id_generator().peek() >= 78);
        assert!(folder.path().join("MANIFEST-2").try_exists()?);
        assert!(!folder.path().join("MANIFEST-1").try_exists()?);

        Ok(())
    }

    #[test]
    fn version_directory_pinned_version_keeps_segments() -> crate::Result<()> {
        let folder = tempdir()?;
        let dir = VersionDirectory::create_new(folder.path(), 3, 100, None)?;

        let old = write_segment(&dir, &[b"a"], 1)?;
        flush(&dir, &old, 2)?;

        let pinned = dir.current();
        let old_path = old.path().to_path_buf();
        drop(old);

        let new = write_segment(&dir, &[b"a"], 1)?;
        dir.log_and_apply(
            VersionEdit::Compaction {
                removed: vec![pinned.level(0).and_then(|x| x.iter().next()).map(|x| x.id()).unwrap_or_default()],
                added: vec![(2, new.meta.clone())],
            },
            &[new],
        )?;

        assert_eq!(2, dir.live_versions());
        assert!(old_path.try_exists()?);

        drop(pinned);
        assert_eq!(1, dir.live_versions());
        assert!(!old_path.try_exists()?);

        Ok(())
    }

    #[test]
    fn version_directory_trivial_move_keeps_file() -> crate::Result<()> {
        let folder = tempdir()?;
        let dir = VersionDirectory::create_new(folder.path(), 3, 100, None)?;

        let segment = write_segment(&dir, &[b"a"], 1)?;
        flush(&dir, &segment, 2)?;

        let version = dir.log_and_apply(
            VersionEdit::Compaction {
                removed: vec![segment.id()],
                added: vec![(1, segment.meta.clone())],
            },
            &[],
        )?;

        assert_eq!(Some(1), version.level_of(segment.id()));
        let path = segment.path().to_path_buf();
        drop(segment);
        drop(version);

        // Only the superseded versions are gone
        assert_eq!(1, dir.live_versions());
        assert!(path.try_exists()?);

        Ok(())
    }

    #[test]
    fn version_directory_failed_edit_discards_segments() -> crate::Result<()> {
        let folder = tempdir()?;
        let dir = VersionDirectory::create_new(folder.path(), 3, 100, None)?;

        let kept = write_segment(&dir, &[b"a"], 1)?;
        flush(&dir, &kept, 2)?;

        let segment = write_segment(&dir, &[b"b"], 2)?;
        let path = segment.path().to_path_buf();

        {
            let _guard = fail_at(FailPoint::ManifestAppend, folder.path(), 1);
            assert!(flush(&dir, &segment, 3).is_err());
        }

        let version = dir.current();
        assert_eq!(1, version.segment_count());
        assert_eq!(2, dir.log_number());
        assert!(version.get_segment(segment.id()).is_none());

        drop(segment);
        assert!(!path.try_exists()?);
        assert!(kept.path().try_exists()?);

        // The manifest was rolled over, and further edits succeed
        let segment = write_segment(&dir, &[b"b"], 2)?;
        flush(&dir, &segment, 3)?;
        drop(version);
        drop(dir);

        let dir = VersionDirectory::recover(folder.path(), 3, 100, None)?;
        assert_eq!(2, dir.current().segment_count());
        assert_eq!(3, dir.log_number());

        Ok(())
    }

    #[test]
    fn version_directory_checkpoint() -> crate::Result<()> {
        let folder = tempdir()?;

        {
            let dir = VersionDirectory::create_new(folder.path(), 3, 2, None)?;

            for log_number in 2..6 {
                let segment = write_segment(&dir, &[b"a"], log_number)?;
                flush(&dir, &segment, log_number)?;
            }

            assert!(!folder.path().join("MANIFEST-1").try_exists()?);
        }

        let dir = VersionDirectory::recover(folder.path(), 3, 2, None)?;
        assert_eq!(4, dir.current().segment_count());
        assert_eq!(5, dir.log_number());

        Ok(())
    }

    #[test]
    fn version_directory_rejects_fewer_levels() -> crate::Result<()> {
        let folder = tempdir()?;

        {
            let dir = VersionDirectory::create_new(folder.path(), 4, 100, None)?;
            let segment = write_segment(&dir, &[b"a"], 1)?;
            flush(&dir, &segment, 2)?;
            dir.log_and_apply(
                VersionEdit::Compaction {
                    removed: vec![segment.id()],
                    added: vec![(3, segment.meta.clone())],
                },
                &[],
            )?;
        }

        assert!(matches!(
            VersionDirectory::recover(folder.path(), 3, 100, None),
            Err(crate::Error::InvalidArgument(_))
        ));

        Ok(())
    }
}
