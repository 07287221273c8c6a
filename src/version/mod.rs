// Copyright (c) 2024-present, fjall-rs
// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

pub mod directory;
pub mod edit;
pub mod level;
pub mod manifest;

pub use directory::VersionDirectory;

use crate::{
    segment::{
        meta::{SegmentId, SegmentMeta},
        Segment,
    },
    HashMap,
};
use edit::VersionEdit;
use level::Level;
use std::sync::Arc;

/// Versions are numbered in creation order
pub type VersionId = u64;

/// An immutable snapshot of the set of live segments, per level
///
/// Readers pin a version by holding its `Arc`, which keeps all of its
/// segment files alive, even when a later version removed them.
pub struct Version {
    id: VersionId,
    levels: Vec<Level>,
}

impl std::fmt::Debug for Version {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "Version#{}", self.id)?;

        for (idx, level) in self.levels.iter().enumerate() {
            writeln!(f, "L{idx}: {level:?}")?;
        }

        Ok(())
    }
}

impl Version {
    /// Creates an empty version.
    pub fn new(id: VersionId, level_count: u8) -> Self {
        let levels = (0..level_count).map(|idx| Level::new(idx > 0)).collect();
        Self { id, levels }
    }

    /// Builds a version from recovered segments, grouped per level.
    pub fn from_levels(id: VersionId, segments: Vec<Vec<Arc<Segment>>>) -> Self {
        let levels = segments
            .into_iter()
            .enumerate()
            .map(|(idx, segments)| {
                let mut level = Level::new(idx > 0);
                for segment in segments {
                    level.insert(segment);
                }
                level
            })
            .collect();

        Self { id, levels }
    }

    pub fn id(&self) -> VersionId {
        self.id
    }

    pub fn levels(&self) -> &[Level] {
        &self.levels
    }

    pub fn level(&self, idx: usize) -> Option<&Level> {
        self.levels.get(idx)
    }

    pub fn level_count(&self) -> usize {
        self.levels.len()
    }

    pub fn last_level_index(&self) -> usize {
        self.levels.len().saturating_sub(1)
    }

    pub fn segment_count(&self) -> usize {
        self.levels.iter().map(Level::len).sum()
    }

    /// All segments, from L0 to the last level
    pub fn iter_segments(&self) -> impl Iterator<Item = &Arc<Segment>> {
        self.levels.iter().flat_map(Level::iter)
    }

    pub fn get_segment(&self, id: SegmentId) -> Option<&Arc<Segment>> {
        self.iter_segments().find(|x| x.id() == id)
    }

    #[cfg(test)]
    pub fn level_of(&self, id: SegmentId) -> Option<usize> {
        self.levels.iter().position(|level| level.contains_id(id))
    }

    /// Returns `true` if a level deeper than `level_idx` may contain `key`
    ///
    /// If not, nothing can exist beneath an entry written to `level_idx`.
    pub fn has_data_below(&self, level_idx: usize, key: &[u8]) -> bool {
        self.levels
            .iter()
            .skip(level_idx + 1)
            .any(|level| level.candidates_for_key(key).next().is_some())
    }

    /// Segment metadata per level, as written into manifest checkpoints
    pub fn to_metas(&self) -> Vec<Vec<SegmentMeta>> {
        self.levels
            .iter()
            .map(|level| level.iter().map(|x| x.meta.clone()).collect())
            .collect()
    }

    /// Creates the successor of this version
    ///
    /// Added segments are looked up in `new_segments` first, then in this
    /// version (a trivially moved segment is re-added from here).
    pub fn apply(
        &self,
        id: VersionId,
        edit: &VersionEdit,
        new_segments: &[Arc<Segment>],
    ) -> crate::Result<Self> {
        let lookup = new_segments
            .iter()
            .map(|x| (x.id(), x.clone()))
            .collect::<HashMap<_, _>>();

        let resolve = |id: SegmentId| -> crate::Result<Arc<Segment>> {
            lookup
                .get(&id)
                .or_else(|| self.get_segment(id))
                .cloned()
                .ok_or(crate::Error::Corruption("edit references unknown segment"))
        };

        let mut levels = self.levels.clone();

        match edit {
            VersionEdit::Flush { added, .. } => {
                let Some(l0) = levels.first_mut() else {
                    return Err(crate::Error::Corruption("version has no levels"));
                };

                for meta in added {
                    l0.insert(resolve(meta.id)?);
                }
            }
            VersionEdit::Compaction { removed, added } => {
                // NOTE: Resolve before removing, moved segments are taken from the old version
                let added = added
                    .iter()
                    .map(|(level, meta)| Ok((*level, resolve(meta.id)?)))
                    .collect::<crate::Result<Vec<_>>>()?;

                for id in removed {
                    for level in &mut levels {
                        level.remove(*id);
                    }
                }

                for (level_idx, segment) in added {
                    let Some(level) = levels.get_mut(usize::from(level_idx)) else {
                        return Err(crate::Error::Corruption("edit references unknown level"));
                    };

                    level.insert(segment);
                }
            }
            VersionEdit::Snapshot { .. } => {
                return Err(crate::Error::InvalidArgument(
                    "snapshot edits cannot be applied to a live version",
                ));
            }
        }

        Ok(Self { id, levels })
    }
}
