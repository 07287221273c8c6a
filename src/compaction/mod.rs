// Copyright (c) 2024-present, fjall-rs
// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

//! Contains compaction strategies

pub(crate) mod leveled;
pub(crate) mod state;
pub(crate) mod stream;
pub(crate) mod worker;

use crate::{segment::meta::SegmentId, version::Version, Config};
use state::HiddenSet;

/// Input for the compactor
///
/// The compaction strategy chooses which segments to compact and how.
/// That information is given to the compactor.
#[derive(Debug, Eq, PartialEq)]
pub struct Input {
    /// Segments to compact
    pub segment_ids: Vec<SegmentId>,

    /// Level to put the created segments into
    pub dest_level: u8,

    /// Segment target size
    ///
    /// If a segment compaction reaches the level, a new segment is started.
    /// This results in a sorted "run" of segments
    pub target_size: u64,
}

/// Describes what to do (compact or not)
#[derive(Debug, Eq, PartialEq)]
pub enum Choice {
    /// Just do nothing.
    DoNothing,

    /// Moves segments into another level without rewriting them.
    Move(Input),

    /// Merges segments into new segments in the destination level.
    Merge(Input),
}

/// Trait for a compaction strategy
///
/// The strategy receives the current version and the segments that are
/// already being compacted, and emits a choice on what to do.
#[allow(clippy::module_name_repetitions)]
pub trait CompactionStrategy: Send + Sync {
    /// Name of the strategy, used in log messages
    fn get_name(&self) -> &'static str;

    /// Decides on what to do based on the current state of the tree's levels
    fn choose(&self, version: &Version, hidden: &HiddenSet, config: &Config) -> Choice;
}

pub use leveled::Strategy as Leveled;
