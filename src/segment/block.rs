// Copyright (c) 2024-present, fjall-rs
// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

use crate::{
    coding::{Decode, DecodeError, Encode},
    value::InternalValue,
};
use byteorder::{BigEndian, ReadBytesExt};

/// Size of the checksum that trails every block
pub const CHECKSUM_SIZE: usize = std::mem::size_of::<u64>();

/// Contains the items of a block after decompressing & deserializing.
///
/// On disk, a block is laid out as
///
/// \[item count; 4 bytes\] \[items\] \[xxh3 of everything before; 8 bytes\]
#[derive(Clone, Debug)]
pub struct ValueBlock {
    pub items: Box<[InternalValue]>,
}

impl ValueBlock {
    /// Serializes items into a checksummed block.
    pub fn encode(items: &[InternalValue]) -> Vec<u8> {
        let mut bytes =
            Vec::with_capacity(items.iter().map(InternalValue::size).sum::<usize>() + 32);

        // NOTE: A block never holds more than u32::MAX items
        #[allow(clippy::cast_possible_truncation)]
        bytes.extend_from_slice(&(items.len() as u32).to_be_bytes());

        for item in items {
            bytes.extend_from_slice(&item.encode_into_vec());
        }

        let checksum = xxhash_rust::xxh3::xxh3_64(&bytes);
        bytes.extend_from_slice(&checksum.to_be_bytes());

        bytes
    }

    /// Parses a block, verifying its checksum.
    pub fn decode(bytes: &[u8]) -> crate::Result<Self> {
        let Some(split) = bytes.len().checked_sub(CHECKSUM_SIZE) else {
            return Err(crate::Error::Corruption("block too short"));
        };

        let (payload, mut checksum) = bytes.split_at(split);

        let expected = checksum.read_u64::<BigEndian>()?;
        if xxhash_rust::xxh3::xxh3_64(payload) != expected {
            return Err(crate::Error::Corruption("block checksum mismatch"));
        }

        let mut reader = payload;
        let item_count = reader.read_u32::<BigEndian>()?;

        let items = (0..item_count)
            .map(|_| InternalValue::decode_from(&mut reader))
            .collect::<Result<Box<[_]>, DecodeError>>()?;

        Ok(Self { items })
    }
}
