// Copyright (c) 2024-present, fjall-rs
// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

use crate::{
    coding::{Decode, DecodeError, Encode, EncodeError},
    range::{overlaps, UserKeyRange},
    SeqNo, UserKey,
};
use byteorder::{BigEndian, ReadBytesExt, WriteBytesExt};
use std::io::{Read, Write};

/// Segment IDs are handed out in creation order
pub type SegmentId = u64;

/// Metadata of a segment, as recorded in the manifest
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct SegmentMeta {
    pub id: SegmentId,

    /// Lowest and highest user key
    pub key_range: (UserKey, UserKey),

    /// Lowest and highest sequence number
    pub seqnos: (SeqNo, SeqNo),

    /// Number of entries, including every version and tombstone
    pub item_count: u64,

    /// Number of distinct user keys
    pub key_count: u64,

    pub tombstone_count: u64,

    pub file_size: u64,
}

impl SegmentMeta {
    pub fn contains_key(&self, key: &[u8]) -> bool {
        let (min, max) = &self.key_range;
        key >= &**min && key <= &**max
    }

    pub fn overlaps(&self, range: &UserKeyRange) -> bool {
        overlaps(range, &self.key_range.0, &self.key_range.1)
    }

    pub fn overlaps_key_range(&self, min: &[u8], max: &[u8]) -> bool {
        &*self.key_range.0 <= max && &*self.key_range.1 >= min
    }

    /// Estimates how many bytes a rewrite could reclaim:
    /// tombstones and shadowed versions, weighted by the average entry size
    pub fn reclaimable_bytes(&self) -> u64 {
        if self.item_count == 0 {
            return 0;
        }

        let stale = self.tombstone_count + (self.item_count - self.key_count);
        let stale = stale.min(self.item_count);

        ((u128::from(self.file_size) * u128::from(stale)) / u128::from(self.item_count))
            .try_into()
            .unwrap_or(u64::MAX)
    }
}

impl Encode for SegmentMeta {
    fn encode_into<W: Write>(&self, writer: &mut W) -> Result<(), EncodeError> {
        writer.write_u64::<BigEndian>(self.id)?;

        for key in [&self.key_range.0, &self.key_range.1] {
            // NOTE: Key lengths are validated on the write path
            #[allow(clippy::cast_possible_truncation)]
            writer.write_u16::<BigEndian>(key.len() as u16)?;
            writer.write_all(key)?;
        }

        writer.write_u64::<BigEndian>(self.seqnos.0)?;
        writer.write_u64::<BigEndian>(self.seqnos.1)?;
        writer.write_u64::<BigEndian>(self.item_count)?;
        writer.write_u64::<BigEndian>(self.key_count)?;
        writer.write_u64::<BigEndian>(self.tombstone_count)?;
        writer.write_u64::<BigEndian>(self.file_size)?;

        Ok(())
    }
}

fn read_key<R: Read>(reader: &mut R) -> Result<UserKey, DecodeError> {
    let len = reader.read_u16::<BigEndian>()?;
    let mut key = vec![0; len.into()];
    reader.read_exact(&mut key)?;
    Ok(key.into())
}

impl Decode for SegmentMeta {
    fn decode_from<R: Read>(reader: &mut R) -> Result<Self, DecodeError> {
        let id = reader.read_u64::<BigEndian>()?;

        let min = read_key(reader)?;
        let max = read_key(reader)?;

        let lo = reader.read_u64::<BigEndian>()?;
        let hi = reader.read_u64::<BigEndian>()?;

        let item_count = reader.read_u64::<BigEndian>()?;
        let key_count = reader.read_u64::<BigEndian>()?;
        let tombstone_count = reader.read_u64::<BigEndian>()?;
        let file_size = reader.read_u64::<BigEndian>()?;

        Ok(Self {
            id,
            key_range: (min, max),
            seqnos: (lo, hi),
            item_count,
            key_count,
            tombstone_count,
            file_size,
        })
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use test_log::test;

    pub fn meta(id: SegmentId, min: &[u8], max: &[u8]) -> SegmentMeta {
        SegmentMeta {
            id,
            key_range: (min.into(), max.into()),
            seqnos: (1, 10),
            item_count: 100,
            key_count: 50,
            tombstone_count: 10,
            file_size: 1_000,
        }
    }

    #[test]
    fn segment_meta_codec() -> crate::Result<()> {
        let meta = meta(7, b"abc", b"xyz");
        let bytes = meta.encode_into_vec();
        assert_eq!(meta, SegmentMeta::decode_from(&mut &bytes[..])?);
        Ok(())
    }

    #[test]
    fn segment_meta_reclaimable() {
        // 50 shadowed + 10 tombstones out of 100 items
        assert_eq!(600, meta(0, b"a", b"b").reclaimable_bytes());
    }

    #[test]
    fn segment_meta_key_range() {
        let meta = meta(0, b"c", b"f");
        assert!(meta.contains_key(b"c"));
        assert!(meta.contains_key(b"e"));
        assert!(!meta.contains_key(b"g"));
        assert!(meta.overlaps_key_range(b"a", b"c"));
        assert!(!meta.overlaps_key_range(b"g", b"h"));
    }
}
