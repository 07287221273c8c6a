// Copyright (c) 2024-present, fjall-rs
// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

use crate::{
    coding::{Decode, DecodeError, Encode, EncodeError},
    value::{InternalValue, SeqNo, UserKey, UserValue, ValueType},
};
use byteorder::{BigEndian, ReadBytesExt, WriteBytesExt};
use std::io::{Read, Write};

/// A single mutation of a batch, before it was assigned a sequence number
#[derive(Clone, PartialEq, Eq)]
pub struct Item {
    /// User-defined key - an arbitrary byte array
    ///
    /// Supports up to 65535 bytes
    pub key: UserKey,

    /// User-defined value - an arbitrary byte array
    ///
    /// Supports up to 2^32 - 1 bytes
    pub value: UserValue,

    /// Kind of mutation
    pub value_type: ValueType,
}

impl std::fmt::Debug for Item {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{:?}:{} => {:?}",
            self.key,
            match self.value_type {
                ValueType::Value => "V",
                ValueType::Tombstone => "T",
                ValueType::Merge => "M",
            },
            self.value
        )
    }
}

impl Item {
    /// Validates key and value limits.
    pub fn new<K: Into<UserKey>, V: Into<UserValue>>(
        key: K,
        value: V,
        value_type: ValueType,
    ) -> crate::Result<Self> {
        let item = Self::new_unchecked(key, value, value_type);
        item.validate()?;
        Ok(item)
    }

    /// Creates an item that still needs to be validated before it is written.
    pub(crate) fn new_unchecked<K: Into<UserKey>, V: Into<UserValue>>(
        key: K,
        value: V,
        value_type: ValueType,
    ) -> Self {
        Self {
            key: key.into(),
            value: value.into(),
            value_type,
        }
    }

    pub(crate) fn validate(&self) -> crate::Result<()> {
        if self.key.is_empty() {
            return Err(crate::Error::InvalidArgument("key may not be empty"));
        }

        if u16::try_from(self.key.len()).is_err() {
            return Err(crate::Error::InvalidArgument(
                "keys can be up to 65535 bytes long",
            ));
        }

        if u32::try_from(self.value.len()).is_err() {
            return Err(crate::Error::InvalidArgument(
                "values can be up to 2^32 - 1 bytes long",
            ));
        }

        Ok(())
    }

    pub(crate) fn into_internal(self, seqno: SeqNo) -> InternalValue {
        InternalValue::from_components(self.key, self.value, seqno, self.value_type)
    }
}

impl Encode for Item {
    fn encode_into<W: Write>(&self, writer: &mut W) -> Result<(), EncodeError> {
        writer.write_u8(u8::from(self.value_type))?;

        // NOTE: Key and value lengths are validated in Item::new
        #[allow(clippy::cast_possible_truncation)]
        writer.write_u16::<BigEndian>(self.key.len() as u16)?;
        writer.write_all(&self.key)?;

        #[allow(clippy::cast_possible_truncation)]
        writer.write_u32::<BigEndian>(self.value.len() as u32)?;
        writer.write_all(&self.value)?;

        Ok(())
    }
}

impl Decode for Item {
    fn decode_from<R: Read>(reader: &mut R) -> Result<Self, DecodeError> {
        let value_type = ValueType::try_from(reader.read_u8()?)?;

        let key_len = reader.read_u16::<BigEndian>()?;
        if key_len == 0 {
            return Err(DecodeError::InvalidLength("key"));
        }
        let mut key = vec![0; key_len.into()];
        reader.read_exact(&mut key)?;

        let value_len = reader.read_u32::<BigEndian>()?;
        let mut value = vec![0; value_len as usize];
        reader.read_exact(&mut value)?;

        Ok(Self {
            key: key.into(),
            value: value.into(),
            value_type,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_log::test;

    #[test]
    fn batch_item_rejects_empty_key() {
        assert!(matches!(
            Item::new(*b"", *b"v", ValueType::Value),
            Err(crate::Error::InvalidArgument(_))
        ));
    }

    #[test]
    fn batch_item_rejects_long_key() {
        let key = vec![0; usize::from(u16::MAX) + 1];
        assert!(matches!(
            Item::new(key, *b"v", ValueType::Value),
            Err(crate::Error::InvalidArgument(_))
        ));

        let key = vec![0; usize::from(u16::MAX)];
        assert!(Item::new(key, *b"v", ValueType::Value).is_ok());
    }
}
