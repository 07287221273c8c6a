// Copyright (c) 2024-present, fjall-rs
// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

use crate::{
    value::{InternalKey, ValueType},
    SeqNo, UserKey,
};
use std::ops::{Bound, RangeBounds};

/// Owned user key range
pub type UserKeyRange = (Bound<UserKey>, Bound<UserKey>);

/// Converts any range over byte-like keys into an owned range.
pub fn into_user_range<K: AsRef<[u8]>, R: RangeBounds<K>>(range: &R) -> UserKeyRange {
    let map = |bound: Bound<&K>| match bound {
        Bound::Included(k) => Bound::Included(UserKey::from(k.as_ref())),
        Bound::Excluded(k) => Bound::Excluded(UserKey::from(k.as_ref())),
        Bound::Unbounded => Bound::Unbounded,
    };

    (map(range.start_bound()), map(range.end_bound()))
}

/// Returns the range covering all keys starting with `prefix`.
pub fn prefix_to_range(prefix: &[u8]) -> UserKeyRange {
    if prefix.is_empty() {
        return (Bound::Unbounded, Bound::Unbounded);
    }

    let start = Bound::Included(UserKey::from(prefix));

    // Increment the last byte that is not 0xFF, dropping everything after it
    let mut end = prefix.to_vec();
    while let Some(last) = end.pop() {
        if last < u8::MAX {
            end.push(last + 1);
            return (start, Bound::Excluded(end.into()));
        }
    }

    (start, Bound::Unbounded)
}

/// Maps a user key range onto the internal key space.
///
/// Versions of a key are sorted newest first, so `(key, SeqNo::MAX)` is
/// the smallest internal key of `key` and `(key, 0)` the largest.
pub fn internal_range(range: &UserKeyRange) -> (Bound<InternalKey>, Bound<InternalKey>) {
    let lo = match &range.0 {
        Bound::Included(k) => Bound::Included(InternalKey::new(
            k.clone(),
            SeqNo::MAX,
            ValueType::Tombstone,
        )),
        Bound::Excluded(k) => Bound::Excluded(InternalKey::new(k.clone(), 0, ValueType::Value)),
        Bound::Unbounded => Bound::Unbounded,
    };

    let hi = match &range.1 {
        Bound::Included(k) => Bound::Included(InternalKey::new(k.clone(), 0, ValueType::Value)),
        Bound::Excluded(k) => Bound::Excluded(InternalKey::new(
            k.clone(),
            SeqNo::MAX,
            ValueType::Tombstone,
        )),
        Bound::Unbounded => Bound::Unbounded,
    };

    (lo, hi)
}

/// Returns `true` if `key` lies inside the range.
#[cfg(test)]
pub fn contains(range: &UserKeyRange, key: &[u8]) -> bool {
    let above_lo = match &range.0 {
        Bound::Included(lo) => key >= &**lo,
        Bound::Excluded(lo) => key > &**lo,
        Bound::Unbounded => true,
    };

    let below_hi = match &range.1 {
        Bound::Included(hi) => key <= &**hi,
        Bound::Excluded(hi) => key < &**hi,
        Bound::Unbounded => true,
    };

    above_lo && below_hi
}

/// Returns `true` if the closed interval `[min, max]` intersects the range.
pub fn overlaps(range: &UserKeyRange, min: &[u8], max: &[u8]) -> bool {
    let hi_ok = match &range.1 {
        Bound::Included(hi) => min <= &**hi,
        Bound::Excluded(hi) => min < &**hi,
        Bound::Unbounded => true,
    };

    let lo_ok = match &range.0 {
        Bound::Included(lo) => max >= &**lo,
        Bound::Excluded(lo) => max > &**lo,
        Bound::Unbounded => true,
    };

    lo_ok && hi_ok
}
