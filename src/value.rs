// Copyright (c) 2024-present, fjall-rs
// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

use crate::coding::{Decode, DecodeError, Encode, EncodeError};
use byteorder::{BigEndian, ReadBytesExt, WriteBytesExt};
use std::{
    cmp::Reverse,
    io::{Read, Write},
    sync::Arc,
};

/// User defined key
pub type UserKey = Arc<[u8]>;

/// User defined data (blob of bytes)
pub type UserValue = Arc<[u8]>;

/// A key-value pair as returned by reads
pub type KvPair = (UserKey, UserValue);

/// Sequence number, a monotonically increasing counter
///
/// Every mutation gets its own sequence number; the first write
/// of a fresh tree is assigned `1`.
///
/// A value with a higher sequence number shadows an item with the
/// same key and lower sequence number. This enables MVCC.
///
/// Old versions are lazily garbage-collected during flush and compaction.
pub type SeqNo = u64;

/// Kind of a mutation
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
#[allow(clippy::module_name_repetitions)]
pub enum ValueType {
    /// Existing value
    Value,

    /// Deleted value
    Tombstone,

    /// Merge operand, combined with older versions by the merge operator
    Merge,
}

impl TryFrom<u8> for ValueType {
    type Error = DecodeError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(Self::Value),
            1 => Ok(Self::Tombstone),
            2 => Ok(Self::Merge),
            _ => Err(DecodeError::InvalidTag(("ValueType", value))),
        }
    }
}

impl From<ValueType> for u8 {
    fn from(value: ValueType) -> Self {
        match value {
            ValueType::Value => 0,
            ValueType::Tombstone => 1,
            ValueType::Merge => 2,
        }
    }
}

/// Key of an entry inside the memtable and segments
///
/// Sorted by user key ascending, then sequence number descending,
/// so the newest version of a key comes first.
#[derive(Clone, PartialEq, Eq)]
pub struct InternalKey {
    pub user_key: UserKey,
    pub seqno: SeqNo,
    pub value_type: ValueType,
}

impl std::fmt::Debug for InternalKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{:?}:{}:{}",
            self.user_key,
            self.seqno,
            match self.value_type {
                ValueType::Value => "V",
                ValueType::Tombstone => "T",
                ValueType::Merge => "M",
            },
        )
    }
}

impl InternalKey {
    pub fn new<K: Into<UserKey>>(user_key: K, seqno: SeqNo, value_type: ValueType) -> Self {
        Self {
            user_key: user_key.into(),
            seqno,
            value_type,
        }
    }

    pub fn is_tombstone(&self) -> bool {
        self.value_type == ValueType::Tombstone
    }
}

impl PartialOrd for InternalKey {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

// Order by user key, THEN by sequence number
// This is one of the most important functions
// Otherwise queries will not match expected behaviour
impl Ord for InternalKey {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        (&self.user_key, Reverse(self.seqno)).cmp(&(&other.user_key, Reverse(other.seqno)))
    }
}

/// A single versioned entry, the unit that flows from the
/// memtable through flushes and compactions
#[derive(Clone, PartialEq, Eq)]
pub struct InternalValue {
    pub key: InternalKey,
    pub value: UserValue,
}

impl std::fmt::Debug for InternalValue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{:?} => {:?}",
            self.key,
            if self.value.len() >= 64 {
                format!("[ ... {} bytes ]", self.value.len())
            } else {
                format!("{:?}", self.value)
            }
        )
    }
}

impl PartialOrd for InternalValue {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for InternalValue {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.key.cmp(&other.key)
    }
}

impl InternalValue {
    pub fn from_components<K: Into<UserKey>, V: Into<UserValue>>(
        user_key: K,
        value: V,
        seqno: SeqNo,
        value_type: ValueType,
    ) -> Self {
        Self {
            key: InternalKey::new(user_key, seqno, value_type),
            value: value.into(),
        }
    }

    #[cfg(test)]
    pub fn new_tombstone<K: Into<UserKey>>(user_key: K, seqno: SeqNo) -> Self {
        Self::from_components(user_key, vec![], seqno, ValueType::Tombstone)
    }

    pub fn is_tombstone(&self) -> bool {
        self.key.is_tombstone()
    }

    /// Approximate in-memory footprint of this entry
    pub fn size(&self) -> usize {
        std::mem::size_of::<SeqNo>()
            + std::mem::size_of::<ValueType>()
            + self.key.user_key.len()
            + self.value.len()
    }
}

impl Encode for InternalValue {
    fn encode_into<W: Write>(&self, writer: &mut W) -> Result<(), EncodeError> {
        writer.write_u8(u8::from(self.key.value_type))?;
        writer.write_u64::<BigEndian>(self.key.seqno)?;

        // NOTE: Key and value lengths are validated on the write path
        #[allow(clippy::cast_possible_truncation)]
        writer.write_u16::<BigEndian>(self.key.user_key.len() as u16)?;
        writer.write_all(&self.key.user_key)?;

        #[allow(clippy::cast_possible_truncation)]
        writer.write_u32::<BigEndian>(self.value.len() as u32)?;
        writer.write_all(&self.value)?;

        Ok(())
    }
}

impl Decode for InternalValue {
    fn decode_from<R: Read>(reader: &mut R) -> Result<Self, DecodeError> {
        let value_type = ValueType::try_from(reader.read_u8()?)?;
        let seqno = reader.read_u64::<BigEndian>()?;

        let key_len = reader.read_u16::<BigEndian>()?;
        let mut key = vec![0; key_len.into()];
        reader.read_exact(&mut key)?;

        let value_len = reader.read_u32::<BigEndian>()?;
        let mut value = vec![0; value_len as usize];
        reader.read_exact(&mut value)?;

        Ok(Self::from_components(key, value, seqno, value_type))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_log::test;

    #[test]
    fn internal_key_order_newest_first() {
        let a = InternalKey::new(*b"a", 5, ValueType::Value);
        let b = InternalKey::new(*b"a", 3, ValueType::Tombstone);
        let c = InternalKey::new(*b"b", 9, ValueType::Value);

        let mut keys = vec![c.clone(), b.clone(), a.clone()];
        keys.sort();

        assert_eq!(vec![a, b, c], keys);
    }

    #[test]
    fn internal_value_codec() -> crate::Result<()> {
        let value = InternalValue::from_components(*b"abc", *b"def", 77, ValueType::Merge);
        let bytes = value.encode_into_vec();
        let decoded = InternalValue::decode_from(&mut &bytes[..])?;
        assert_eq!(value, decoded);
        assert_eq!(ValueType::Merge, decoded.key.value_type);
        Ok(())
    }

    #[test]
    fn value_type_invalid_tag() {
        assert!(matches!(
            ValueType::try_from(9),
            Err(DecodeError::InvalidTag(("ValueType", 9)))
        ));
    }
}
