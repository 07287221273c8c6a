// Copyright (c) 2024-present, fjall-rs
// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

use super::{state::HiddenSet, Choice, CompactionStrategy, Input as CompactionInput};
use crate::{segment::Segment, version::Version, Config, UserKey};
use std::sync::Arc;

/// Leveled compaction strategy (LCS)
///
/// If a level reaches its target size, parts of it are merged into overlapping segments in the next level
///
/// LCS suffers from high write amplification, but decent read & space amplification
///
/// More info here: <https://opensource.docs.scylladb.com/stable/cql/compaction.html#leveled-compaction-strategy-lcs>
#[derive(Default)]
pub struct Strategy;

fn get_key_range(segments: &[&Arc<Segment>]) -> Option<(UserKey, UserKey)> {
    let (first, rest) = segments.split_first()?;
    let (mut min, mut max) = first.meta.key_range.clone();

    for other in rest {
        if other.meta.key_range.0 < min {
            min = other.meta.key_range.0.clone();
        }
        if other.meta.key_range.1 > max {
            max = other.meta.key_range.1.clone();
        }
    }

    Some((min, max))
}

/// Desired size of Ln (n >= 1) in bytes
///
/// L1 should hold as much as a full L0, every other level `ratio` times its predecessor.
pub fn level_target_size(config: &Config, level_idx: usize) -> u64 {
    let l1 = u64::from(config.l0_threshold).saturating_mul(config.target_segment_size);
    let exponent = u32::try_from(level_idx.saturating_sub(1)).unwrap_or(u32::MAX);

    l1.saturating_mul(u64::from(config.level_ratio).saturating_pow(exponent))
}

/// A level that wants to be compacted
struct Candidate {
    level_idx: usize,
    score: f64,
    reclaimable: u64,

    /// Lowest segment ID of the input, lower means older
    oldest: u64,

    is_trivial_move: bool,
    segment_ids: Vec<u64>,
}

impl Candidate {
    fn new(
        level_idx: usize,
        score: f64,
        upper: &[&Arc<Segment>],
        lower: &[&Arc<Segment>],
    ) -> Self {
        let reclaimable = upper
            .iter()
            .chain(lower)
            .map(|x| x.meta.reclaimable_bytes())
            .sum();

        let oldest = upper.iter().map(|x| x.id()).min().unwrap_or_default();

        let is_trivial_move =
            upper.len() == 1 && lower.is_empty() && upper.iter().all(|x| x.meta.tombstone_count == 0);

        Self {
            level_idx,
            score,
            reclaimable,
            oldest,
            is_trivial_move,
            segment_ids: upper.iter().chain(lower).map(|x| x.id()).collect(),
        }
    }

    /// Higher score first, then more reclaimable space, then older data, then lower level
    fn is_preferred_over(&self, other: &Self) -> bool {
        self.score
            .total_cmp(&other.score)
            .then(self.reclaimable.cmp(&other.reclaimable))
            .then(other.oldest.cmp(&self.oldest))
            .then(other.level_idx.cmp(&self.level_idx))
            .is_gt()
    }
}

#[allow(clippy::cast_precision_loss)]
fn score(size: u64, target: u64) -> f64 {
    size as f64 / target.max(1) as f64
}

fn choose_l0(version: &Version, hidden: &HiddenSet, config: &Config) -> Option<Candidate> {
    let l0 = version.level(0)?;
    let l1 = version.level(1)?;

    let score = score(l0.len() as u64, config.l0_threshold.into());
    if score < 1.0 {
        return None;
    }

    // NOTE: All L0 segments are compacted together, so older versions
    // can never end up above newer ones
    let upper = l0.iter().collect::<Vec<_>>();
    if upper.iter().any(|x| hidden.is_hidden(x.id())) {
        return None;
    }

    let (min, max) = get_key_range(&upper)?;
    let lower = l1.overlapping(&min, &max).collect::<Vec<_>>();
    if lower.iter().any(|x| hidden.is_hidden(x.id())) {
        return None;
    }

    Some(Candidate::new(0, score, &upper, &lower))
}

fn choose_ln(
    version: &Version,
    hidden: &HiddenSet,
    config: &Config,
    level_idx: usize,
) -> Option<Candidate> {
    let level = version.level(level_idx)?;
    let next_level = version.level(level_idx + 1)?;

    let score = score(level.size(), level_target_size(config, level_idx));
    if score < 1.0 {
        return None;
    }

    level
        .iter()
        .filter(|x| !hidden.is_hidden(x.id()))
        .filter_map(|segment| {
            let (min, max) = &segment.meta.key_range;
            let lower = next_level.overlapping(min, max).collect::<Vec<_>>();

            if lower.iter().any(|x| hidden.is_hidden(x.id())) {
                None
            } else {
                Some(Candidate::new(level_idx, score, &[segment], &lower))
            }
        })
        .reduce(|best, other| {
            if other.is_preferred_over(&best) {
                other
            } else {
                best
            }
        })
}

impl CompactionStrategy for Strategy {
    fn get_name(&self) -> &'static str {
        "LeveledStrategy"
    }

    fn choose(&self, version: &Version, hidden: &HiddenSet, config: &Config) -> Choice {
        let candidates = std::iter::once(choose_l0(version, hidden, config))
            .chain((1..version.last_level_index()).map(|idx| choose_ln(version, hidden, config, idx)))
            .flatten();

        let best = candidates.reduce(|best, other| {
            if other.is_preferred_over(&best) {
                other
            } else {
                best
            }
        });

        let Some(best) = best else {
            return Choice::DoNothing;
        };

        log::trace!(
            "Chose L{} (score={:.2}, reclaimable={}B) for compaction",
            best.level_idx,
            best.score,
            best.reclaimable,
        );

        #[allow(clippy::cast_possible_truncation)]
        let input = CompactionInput {
            segment_ids: best.segment_ids,
            dest_level: (best.level_idx + 1) as u8,
            target_size: config.target_segment_size,
        };

        if best.is_trivial_move {
            Choice::Move(input)
        } else {
            Choice::Merge(input)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        segment::writer::{Options, Writer},
        value::{InternalValue, ValueType},
    };
    use std::path::Path;
    use tempfile::tempdir;
    use test_log::test;

    /// Writes a small segment, pretending it has a file size of `size`
    fn fixture_segment(
        folder: &Path,
        id: u64,
        min: &[u8],
        max: &[u8],
        size: u64,
        tombstone: bool,
    ) -> crate::Result<Arc<Segment>> {
        let mut writer = Writer::new(
            id,
            Options {
                folder: folder.to_path_buf(),
                block_size: 4_096,
            },
        )?;

        let value_type = if tombstone {
            ValueType::Tombstone
        } else {
            ValueType::Value
        };

        writer.write(InternalValue::from_components(min, *b"", id, value_type))?;
        if min != max {
            writer.write(InternalValue::from_components(max, *b"", id, ValueType::Value))?;
        }

        let mut meta = writer.finish()?.expect("should not be empty");
        meta.file_size = size;

        Ok(Arc::new(Segment::open(folder, meta)?))
    }

    fn config(folder: &Path) -> Config {
        Config::new(folder)
            .level_count(4)
            .l0_threshold(4)
            .level_ratio(10)
            .target_segment_size(100)
    }

    #[test]
    fn leveled_empty_levels() {
        let config = Config::new(".");
        let version = Version::new(0, 7);

        assert_eq!(
            Strategy.choose(&version, &HiddenSet::default(), &config),
            Choice::DoNothing
        );
    }

    #[test]
    fn leveled_l0_threshold() -> crate::Result<()> {
        let folder = tempdir()?;
        let config = config(folder.path());

        let mut segments = vec![];
        for id in 1..=3 {
            segments.push(fixture_segment(folder.path(), id, b"a", b"z", 10, false)?);
        }

        let version = Version::from_levels(0, vec![segments.clone(), vec![], vec![], vec![]]);
        assert_eq!(
            Strategy.choose(&version, &HiddenSet::default(), &config),
            Choice::DoNothing
        );

        segments.push(fixture_segment(folder.path(), 4, b"a", b"z", 10, false)?);
        let l1 = fixture_segment(folder.path(), 5, b"b", b"c", 10, false)?;
        let l1_outside = fixture_segment(folder.path(), 6, b"zz", b"zzz", 10, false)?;

        let version = Version::from_levels(0, vec![segments, vec![l1, l1_outside], vec![], vec![]]);

        let Choice::Merge(mut input) = Strategy.choose(&version, &HiddenSet::default(), &config)
        else {
            panic!("should merge");
        };
        input.segment_ids.sort_unstable();

        assert_eq!(vec![1, 2, 3, 4, 5], input.segment_ids);
        assert_eq!(1, input.dest_level);
        assert_eq!(100, input.target_size);

        Ok(())
    }

    #[test]
    fn leveled_skips_hidden() -> crate::Result<()> {
        let folder = tempdir()?;
        let config = config(folder.path());

        let segments = (1..=4)
            .map(|id| fixture_segment(folder.path(), id, b"a", b"z", 10, false))
            .collect::<crate::Result<Vec<_>>>()?;

        let version = Version::from_levels(0, vec![segments, vec![], vec![], vec![]]);

        let mut hidden = HiddenSet::default();
        hidden.hide(&[2]);

        assert_eq!(Strategy.choose(&version, &hidden, &config), Choice::DoNothing);

        Ok(())
    }

    #[test]
    fn leveled_trivial_move() -> crate::Result<()> {
        let folder = tempdir()?;
        let config = config(folder.path()).l0_threshold(1);

        let l0 = fixture_segment(folder.path(), 1, b"a", b"c", 10, false)?;
        let l1 = fixture_segment(folder.path(), 2, b"d", b"f", 10, false)?;

        let version = Version::from_levels(0, vec![vec![l0], vec![l1], vec![], vec![]]);

        assert_eq!(
            Strategy.choose(&version, &HiddenSet::default(), &config),
            Choice::Move(CompactionInput {
                segment_ids: vec![1],
                dest_level: 1,
                target_size: 100,
            })
        );

        Ok(())
    }

    #[test]
    fn leveled_tombstones_are_rewritten() -> crate::Result<()> {
        let folder = tempdir()?;
        let config = config(folder.path()).l0_threshold(1);

        let l0 = fixture_segment(folder.path(), 1, b"a", b"c", 10, true)?;
        let version = Version::from_levels(0, vec![vec![l0], vec![], vec![], vec![]]);

        assert!(matches!(
            Strategy.choose(&version, &HiddenSet::default(), &config),
            Choice::Merge(_)
        ));

        Ok(())
    }

    #[test]
    fn leveled_ln_over_target() -> crate::Result<()> {
        let folder = tempdir()?;
        let config = config(folder.path());

        // L1 target = 4 * 100 bytes
        let l1 = vec![
            fixture_segment(folder.path(), 1, b"a", b"b", 200, false)?,
            fixture_segment(folder.path(), 2, b"c", b"d", 200, false)?,
            fixture_segment(folder.path(), 3, b"e", b"f", 100, false)?,
        ];
        let l2 = vec![fixture_segment(folder.path(), 4, b"c", b"c", 10, false)?];

        let version = Version::from_levels(0, vec![vec![], l1, l2, vec![]]);

        let choice = Strategy.choose(&version, &HiddenSet::default(), &config);
        assert!(matches!(
            choice,
            Choice::Move(CompactionInput { dest_level: 2, .. })
                | Choice::Merge(CompactionInput { dest_level: 2, .. })
        ));

        Ok(())
    }

    #[test]
    fn leveled_prefers_higher_score() -> crate::Result<()> {
        let folder = tempdir()?;
        let config = config(folder.path());

        let l0 = (1..=4)
            .map(|id| fixture_segment(folder.path(), id, b"a", b"z", 10, false))
            .collect::<crate::Result<Vec<_>>>()?;

        // L1 is 3x over its target, L0 only 1x
        let l1 = vec![fixture_segment(folder.path(), 5, b"0", b"1", 1_200, false)?];

        let version = Version::from_levels(0, vec![l0, l1, vec![], vec![]]);

        assert_eq!(
            Strategy.choose(&version, &HiddenSet::default(), &config),
            Choice::Move(CompactionInput {
                segment_ids: vec![5],
                dest_level: 2,
                target_size: 100,
            })
        );

        Ok(())
    }

    #[test]
    fn level_target_sizes() {
        let config = Config::new(".")
            .l0_threshold(4)
            .level_ratio(10)
            .target_segment_size(1_000);

        assert_eq!(4_000, level_target_size(&config, 1));
        assert_eq!(40_000, level_target_size(&config, 2));
        assert_eq!(400_000, level_target_size(&config, 3));
    }
}
