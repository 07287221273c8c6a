// Copyright (c) 2024-present, fjall-rs
// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

use crate::{
    coding::{Decode, DecodeError, Encode, EncodeError},
    journal::JournalId,
    segment::meta::{SegmentId, SegmentMeta},
    SeqNo,
};
use byteorder::{BigEndian, ReadBytesExt, WriteBytesExt};
use std::io::{Read, Write};

const TAG_FLUSH: u8 = 1;
const TAG_COMPACTION: u8 = 2;
const TAG_SNAPSHOT: u8 = 3;

/// An atomic change of the set of live segments, as recorded in the manifest
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum VersionEdit {
    /// Flushed memtables were written into new L0 segments
    Flush {
        /// Oldest journal that is still needed for recovery
        log_number: JournalId,

        /// Highest sequence number contained in segments
        last_seqno: SeqNo,

        added: Vec<SegmentMeta>,
    },

    /// Segments were rewritten (or moved) into other levels
    Compaction {
        removed: Vec<SegmentId>,

        /// Destination level and metadata of every added segment
        ///
        /// A trivially moved segment is both removed and added.
        added: Vec<(u8, SegmentMeta)>,
    },

    /// Full state, written at the start of every manifest file
    Snapshot {
        levels: Vec<Vec<SegmentMeta>>,
        log_number: JournalId,
        last_seqno: SeqNo,
        next_segment_id: SegmentId,
    },
}

impl VersionEdit {
    /// IDs of segments the edit introduces (or moves)
    pub fn added_ids(&self) -> Vec<SegmentId> {
        match self {
            Self::Flush { added, .. } => added.iter().map(|x| x.id).collect(),
            Self::Compaction { added, .. } => added.iter().map(|(_, x)| x.id).collect(),
            Self::Snapshot { levels, .. } => levels.iter().flatten().map(|x| x.id).collect(),
        }
    }
}

fn write_metas<W: Write>(writer: &mut W, metas: &[SegmentMeta]) -> Result<(), EncodeError> {
    // NOTE: Segment count is surely never > u32::MAX
    #[allow(clippy::cast_possible_truncation)]
    writer.write_u32::<BigEndian>(metas.len() as u32)?;

    for meta in metas {
        meta.encode_into(writer)?;
    }

    Ok(())
}

fn read_metas<R: Read>(reader: &mut R) -> Result<Vec<SegmentMeta>, DecodeError> {
    let count = reader.read_u32::<BigEndian>()?;

    let mut metas = Vec::with_capacity(count.min(1_024) as usize);
    for _ in 0..count {
        metas.push(SegmentMeta::decode_from(reader)?);
    }

    Ok(metas)
}

impl Encode for VersionEdit {
    fn encode_into<W: Write>(&self, writer: &mut W) -> Result<(), EncodeError> {
        match self {
            Self::Flush {
                log_number,
                last_seqno,
                added,
            } => {
                writer.write_u8(TAG_FLUSH)?;
                writer.write_u64::<BigEndian>(*log_number)?;
                writer.write_u64::<BigEndian>(*last_seqno)?;
                write_metas(writer, added)?;
            }
            Self::Compaction { removed, added } => {
                writer.write_u8(TAG_COMPACTION)?;

                #[allow(clippy::cast_possible_truncation)]
                writer.write_u32::<BigEndian>(removed.len() as u32)?;
                for id in removed {
                    writer.write_u64::<BigEndian>(*id)?;
                }

                #[allow(clippy::cast_possible_truncation)]
                writer.write_u32::<BigEndian>(added.len() as u32)?;
                for (level, meta) in added {
                    writer.write_u8(*level)?;
                    meta.encode_into(writer)?;
                }
            }
            Self::Snapshot {
                levels,
                log_number,
                last_seqno,
                next_segment_id,
            } => {
                writer.write_u8(TAG_SNAPSHOT)?;
                writer.write_u64::<BigEndian>(*log_number)?;
                writer.write_u64::<BigEndian>(*last_seqno)?;
                writer.write_u64::<BigEndian>(*next_segment_id)?;

                // NOTE: Level count is bounded by config
                #[allow(clippy::cast_possible_truncation)]
                writer.write_u8(levels.len() as u8)?;
                for level in levels {
                    write_metas(writer, level)?;
                }
            }
        }

        Ok(())
    }
}

impl Decode for VersionEdit {
    fn decode_from<R: Read>(reader: &mut R) -> Result<Self, DecodeError> {
        match reader.read_u8()? {
            TAG_FLUSH => {
                let log_number = reader.read_u64::<BigEndian>()?;
                let last_seqno = reader.read_u64::<BigEndian>()?;
                let added = read_metas(reader)?;

                Ok(Self::Flush {
                    log_number,
                    last_seqno,
                    added,
                })
            }
            TAG_COMPACTION => {
                let removed_count = reader.read_u32::<BigEndian>()?;
                let mut removed = Vec::with_capacity(removed_count.min(1_024) as usize);
                for _ in 0..removed_count {
                    removed.push(reader.read_u64::<BigEndian>()?);
                }

                let added_count = reader.read_u32::<BigEndian>()?;
                let mut added = Vec::with_capacity(added_count.min(1_024) as usize);
                for _ in 0..added_count {
                    let level = reader.read_u8()?;
                    added.push((level, SegmentMeta::decode_from(reader)?));
                }

                Ok(Self::Compaction { removed, added })
            }
            TAG_SNAPSHOT => {
                let log_number = reader.read_u64::<BigEndian>()?;
                let last_seqno = reader.read_u64::<BigEndian>()?;
                let next_segment_id = reader.read_u64::<BigEndian>()?;

                let level_count = reader.read_u8()?;
                let mut levels = Vec::with_capacity(level_count.into());
                for _ in 0..level_count {
                    levels.push(read_metas(reader)?);
                }

                Ok(Self::Snapshot {
                    levels,
                    log_number,
                    last_seqno,
                    next_segment_id,
                })
            }
            tag => Err(DecodeError::InvalidTag(("VersionEdit", tag))),
        }
    }
}
