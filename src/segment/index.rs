// Copyright (c) 2024-present, fjall-rs
// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

use crate::{
    coding::{Decode, DecodeError, Encode, EncodeError},
    UserKey,
};
use byteorder::{BigEndian, ReadBytesExt, WriteBytesExt};
use std::io::{Read, Write};

/// Points to a block on disk
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct BlockHandle {
    /// Key of the first item in the block
    pub first_key: UserKey,

    /// Position of block in file
    pub offset: u64,

    /// Size of block in bytes, including its checksum
    pub size: u32,
}

impl Encode for BlockHandle {
    fn encode_into<W: Write>(&self, writer: &mut W) -> Result<(), EncodeError> {
        writer.write_u64::<BigEndian>(self.offset)?;
        writer.write_u32::<BigEndian>(self.size)?;

        // NOTE: Key lengths are validated on the write path
        #[allow(clippy::cast_possible_truncation)]
        writer.write_u16::<BigEndian>(self.first_key.len() as u16)?;
        writer.write_all(&self.first_key)?;

        Ok(())
    }
}

impl Decode for BlockHandle {
    fn decode_from<R: Read>(reader: &mut R) -> Result<Self, DecodeError> {
        let offset = reader.read_u64::<BigEndian>()?;
        let size = reader.read_u32::<BigEndian>()?;

        let key_len = reader.read_u16::<BigEndian>()?;
        let mut first_key = vec![0; key_len.into()];
        reader.read_exact(&mut first_key)?;

        Ok(Self {
            first_key: first_key.into(),
            offset,
            size,
        })
    }
}

/// The block index maps the first key of every block to its position,
/// and is fully loaded into memory when a segment is opened
#[derive(Debug, Default)]
pub struct BlockIndex(Box<[BlockHandle]>);

impl BlockIndex {
    pub fn new(handles: Vec<BlockHandle>) -> Self {
        Self(handles.into_boxed_slice())
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn get(&self, idx: usize) -> Option<&BlockHandle> {
        self.0.get(idx)
    }

    /// Returns the first block that may contain `key`.
    ///
    /// Versions of one key may span multiple blocks, so this is the
    /// last block whose first key is *strictly* lower than `key`.
    pub fn seek_lower(&self, key: &[u8]) -> usize {
        self.0
            .partition_point(|handle| &*handle.first_key < key)
            .saturating_sub(1)
    }

    /// Returns the last block that may contain `key`.
    pub fn seek_upper(&self, key: &[u8]) -> usize {
        self.0
            .partition_point(|handle| &*handle.first_key <= key)
            .saturating_sub(1)
    }
}

impl Encode for BlockIndex {
    fn encode_into<W: Write>(&self, writer: &mut W) -> Result<(), EncodeError> {
        // NOTE: A segment never has more than u32::MAX blocks
        #[allow(clippy::cast_possible_truncation)]
        writer.write_u32::<BigEndian>(self.0.len() as u32)?;

        for handle in &*self.0 {
            handle.encode_into(writer)?;
        }

        Ok(())
    }
}

impl Decode for BlockIndex {
    fn decode_from<R: Read>(reader: &mut R) -> Result<Self, DecodeError> {
        let len = reader.read_u32::<BigEndian>()?;

        let handles = (0..len)
            .map(|_| BlockHandle::decode_from(reader))
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Self::new(handles))
    }
}
