// Copyright (c) 2024-present, fjall-rs
// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

use super::error::RecoveryError;
use crate::{
    batch::item::Item as BatchItem,
    coding::{Decode, DecodeError, Encode, EncodeError},
    SeqNo,
};
use byteorder::{BigEndian, ByteOrder, ReadBytesExt, WriteBytesExt};
use std::io::{Cursor, Write};

/// length + checksum
pub const RECORD_HEADER_SIZE: usize = 4 + 8;

/// A journal record holds one atomic write (a single write or a whole batch)
///
/// On disk, every record is framed like this:
///
/// ```text
/// [payload len; 4 bytes] [xxh3(payload); 8 bytes] [payload]
/// ```
///
/// and the payload consists of:
///
/// ```text
/// [start seqno; 8 bytes] [item count; 4 bytes] [item]*
/// ```
///
/// The items of a record are assigned consecutive sequence numbers,
/// starting at the record's start seqno.
#[derive(Debug, Eq, PartialEq)]
pub struct Record {
    pub seqno: SeqNo,
    pub items: Vec<BatchItem>,
}

impl Record {
    /// Sequence number of the last item of the record
    #[cfg(test)]
    pub fn last_seqno(&self) -> SeqNo {
        self.seqno + self.items.len().saturating_sub(1) as u64
    }
}

/// Encodes a record payload into `buf`.
pub fn encode_payload(
    buf: &mut Vec<u8>,
    items: &[BatchItem],
    seqno: SeqNo,
) -> Result<(), EncodeError> {
    buf.write_u64::<BigEndian>(seqno)?;

    // NOTE: entries.len() is surely never > u32::MAX
    #[allow(clippy::cast_possible_truncation)]
    buf.write_u32::<BigEndian>(items.len() as u32)?;

    for item in items {
        item.encode_into(buf)?;
    }

    Ok(())
}

/// Writes the frame header and payload.
pub fn write_framed<W: Write>(writer: &mut W, payload: &[u8]) -> Result<usize, EncodeError> {
    // NOTE: A record is bounded by the value size limit
    #[allow(clippy::cast_possible_truncation)]
    writer.write_u32::<BigEndian>(payload.len() as u32)?;
    writer.write_u64::<BigEndian>(xxhash_rust::xxh3::xxh3_64(payload))?;
    writer.write_all(payload)?;

    Ok(RECORD_HEADER_SIZE + payload.len())
}

/// Outcome of looking at the bytes at some file position
pub enum Frame<'a> {
    /// An intact record payload
    Valid(&'a [u8]),

    /// A header announcing more bytes than the file has, or nothing at all
    Torn,

    /// A complete frame whose checksum does not match
    Corrupt { len: usize },
}

pub fn read_frame(bytes: &[u8], pos: usize) -> Frame<'_> {
    let Some(header) = bytes.get(pos..pos + RECORD_HEADER_SIZE) else {
        return Frame::Torn;
    };

    let len = BigEndian::read_u32(header) as usize;
    let expected_checksum = BigEndian::read_u64(header.get(4..).unwrap_or_default());

    // NOTE: A zero-length record is never written, so this is the zeroed
    // tail of a file that was extended but not filled before a crash
    if len == 0 {
        return Frame::Torn;
    }

    let start = pos + RECORD_HEADER_SIZE;

    let Some(payload) = bytes.get(start..start + len) else {
        return Frame::Torn;
    };

    if xxhash_rust::xxh3::xxh3_64(payload) == expected_checksum {
        Frame::Valid(payload)
    } else {
        Frame::Corrupt { len }
    }
}

/// Decodes a payload whose checksum was already verified.
pub fn decode_payload(payload: &[u8]) -> crate::Result<Record> {
    let mut reader = Cursor::new(payload);

    let seqno = reader.read_u64::<BigEndian>()?;
    let item_count = reader.read_u32::<BigEndian>()?;

    let mut items = Vec::with_capacity(item_count.min(1_024) as usize);

    for _ in 0..item_count {
        match BatchItem::decode_from(&mut reader) {
            Ok(item) => items.push(item),
            Err(DecodeError::Io(e)) if e.kind() == std::io::ErrorKind::UnexpectedEof => {
                log::error!("Invalid record: insufficient length");
                return Err(crate::Error::JournalRecovery(
                    RecoveryError::InsufficientLength,
                ));
            }
            Err(e) => return Err(e.into()),
        }
    }

    if reader.position() != payload.len() as u64 {
        log::error!("Invalid record: trailing bytes after {item_count} items");
        return Err(crate::Error::JournalRecovery(RecoveryError::TooManyItems));
    }

    Ok(Record { seqno, items })
}
