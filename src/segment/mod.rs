// Copyright (c) 2024-present, fjall-rs
// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

pub mod block;
pub mod index;
pub mod meta;
pub mod reader;
pub mod writer;

use self::{block::ValueBlock, index::BlockIndex, meta::SegmentMeta, reader::Reader};
use crate::{
    coding::Decode,
    range::UserKeyRange,
    sync::{atomic::AcqRelAtomicBool, InstrumentedMutex},
    value::InternalValue,
    SeqNo,
};
use byteorder::{BigEndian, ReadBytesExt};
use std::{
    fs::File,
    io::{Read, Seek, SeekFrom},
    path::{Path, PathBuf},
    sync::Arc,
};

pub const TRAILER_MAGIC: &[u8; 4] = b"TLS1";

/// index offset + index size + index checksum + magic
pub const TRAILER_SIZE: usize = 8 + 4 + 8 + TRAILER_MAGIC.len();

/// Disk segment (a.k.a. `SSTable`, `sorted string table`) that is located on disk
///
/// A segment is an immutable list of key-value pairs, split into checksummed blocks (see [`block::ValueBlock`]).
/// The block offset and size in the file is saved in the "block index".
///
/// Deleted entries are represented by tombstones.
///
/// Segments are shared between versions through `Arc`. Once a segment was removed
/// from the current version it is marked obsolete, and its file is deleted when
/// the last reference (a pinned version, or a running read) goes away.
pub struct Segment {
    pub meta: SegmentMeta,

    path: PathBuf,
    file: InstrumentedMutex<File>,

    /// Translates key (first item of a block) to block offset (address inside file) and size
    pub(crate) block_index: BlockIndex,

    obsolete: AcqRelAtomicBool,
}

impl std::fmt::Debug for Segment {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Segment:{}", self.meta.id)
    }
}

impl Drop for Segment {
    fn drop(&mut self) {
        if self.obsolete.load() {
            log::debug!("Deleting obsolete segment file {:?}", self.path);

            if let Err(e) = std::fs::remove_file(&self.path) {
                log::warn!("Failed to delete obsolete segment {:?}: {e:?}", self.path);
            }
        }
    }
}

impl Segment {
    /// Opens a segment file, loading its block index.
    pub fn open<P: AsRef<Path>>(folder: P, meta: SegmentMeta) -> crate::Result<Self> {
        let path = folder.as_ref().join(meta.id.to_string());
        log::trace!("Opening segment {path:?}");

        let mut file = File::open(&path)?;
        let file_size = file.metadata()?.len();

        if file_size < TRAILER_SIZE as u64 {
            return Err(crate::Error::Corruption("segment too short"));
        }

        file.seek(SeekFrom::End(-(TRAILER_SIZE as i64)))?;

        let index_offset = file.read_u64::<BigEndian>()?;
        let index_size = file.read_u32::<BigEndian>()?;
        let index_checksum = file.read_u64::<BigEndian>()?;

        let mut magic = [0; TRAILER_MAGIC.len()];
        file.read_exact(&mut magic)?;

        if &magic != TRAILER_MAGIC {
            return Err(crate::Error::Corruption("invalid segment trailer"));
        }

        if index_offset + u64::from(index_size) + TRAILER_SIZE as u64 != file_size {
            return Err(crate::Error::Corruption("segment index out of bounds"));
        }

        let mut index_bytes = vec![0; index_size as usize];
        file.seek(SeekFrom::Start(index_offset))?;
        file.read_exact(&mut index_bytes)?;

        if xxhash_rust::xxh3::xxh3_64(&index_bytes) != index_checksum {
            return Err(crate::Error::Corruption("segment index checksum mismatch"));
        }

        let block_index = BlockIndex::decode_from(&mut &index_bytes[..])?;

        Ok(Self {
            meta,
            path,
            file: InstrumentedMutex::new(file),
            block_index,
            obsolete: AcqRelAtomicBool::default(),
        })
    }

    pub fn id(&self) -> meta::SegmentId {
        self.meta.id
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Marks the segment for deletion once it is no longer referenced.
    pub(crate) fn mark_obsolete(&self) {
        self.obsolete.store(true);
    }

    pub(crate) fn load_block(&self, idx: usize) -> crate::Result<ValueBlock> {
        let Some(handle) = self.block_index.get(idx) else {
            return Err(crate::Error::Corruption("block index out of bounds"));
        };

        let mut bytes = vec![0; handle.size as usize];

        {
            let mut file = self.file.lock();
            file.seek(SeekFrom::Start(handle.offset))?;
            file.read_exact(&mut bytes)?;
        }

        ValueBlock::decode(&bytes)
    }

    /// Visits versions of `key` at or below `seqno`, newest first, until `visit` returns `false`.
    ///
    /// Returns `false` if the visitor stopped the scan.
    pub fn scan_versions(
        &self,
        key: &[u8],
        seqno: SeqNo,
        mut visit: impl FnMut(InternalValue) -> bool,
    ) -> crate::Result<bool> {
        if !self.meta.contains_key(key) {
            return Ok(true);
        }

        // All versions in this segment are too new
        if self.meta.seqnos.0 > seqno {
            return Ok(true);
        }

        let mut idx = self.block_index.seek_lower(key);

        while let Some(handle) = self.block_index.get(idx) {
            if &*handle.first_key > key {
                break;
            }

            let block = self.load_block(idx)?;

            for item in block.items.into_vec() {
                match (*item.key.user_key).cmp(key) {
                    std::cmp::Ordering::Less => continue,
                    std::cmp::Ordering::Greater => return Ok(true),
                    std::cmp::Ordering::Equal => {}
                }

                if item.key.seqno > seqno {
                    continue;
                }

                if !visit(item) {
                    return Ok(false);
                }
            }

            idx += 1;
        }

        Ok(true)
    }

    /// Returns the newest version of `key` with a seqno at or below `seqno`.
    pub fn get(&self, key: &[u8], seqno: SeqNo) -> crate::Result<Option<InternalValue>> {
        let mut result = None;

        self.scan_versions(key, seqno, |item| {
            result = Some(item);
            false
        })?;

        Ok(result)
    }

    /// Creates a lazy iterator over a key range.
    pub fn range(self: &Arc<Self>, range: UserKeyRange) -> Reader {
        Reader::new(self.clone(), range)
    }
}

#[cfg(test)]
mod tests {
    use super::{
        writer::{MultiWriter, Options, Writer},
        *,
    };
    use crate::{id::SegmentIdGenerator, range::into_user_range, value::ValueType};
    use std::ops::Bound;
    use test_log::test;

    fn write_segment(folder: &Path, items: Vec<InternalValue>) -> crate::Result<Arc<Segment>> {
        let mut writer = Writer::new(
            0,
            Options {
                folder: folder.into(),
                block_size: 64,
            },
        )?;

        for item in items {
            writer.write(item)?;
        }

        let Some(meta) = writer.finish()? else {
            panic!("segment should not be empty");
        };

        Ok(Arc::new(Segment::open(folder, meta)?))
    }

    fn items() -> Vec<InternalValue> {
        let mut items = vec![];

        for key in 0u32..200 {
            let key = key.to_be_bytes();

            if key[3] % 10 == 0 {
                for seqno in (1..=5u64).rev() {
                    items.push(InternalValue::from_components(
                        key,
                        seqno.to_string().into_bytes(),
                        seqno,
                        ValueType::Value,
                    ));
                }
            } else {
                items.push(InternalValue::from_components(
                    key,
                    *b"v",
                    1,
                    ValueType::Value,
                ));
            }
        }

        items
    }

    #[test]
    fn segment_point_reads() -> crate::Result<()> {
        let dir = tempfile::tempdir()?;
        let segment = write_segment(dir.path(), items())?;

        assert_eq!(200, segment.meta.key_count);
        assert_eq!(180 + 20 * 5, segment.meta.item_count);
        assert!(segment.block_index.len() > 10);

        for key in 0u32..200 {
            let key = key.to_be_bytes();
            let item = segment.get(&key, SeqNo::MAX)?;

            if key[3] % 10 == 0 {
                assert_eq!(Some(5), item.map(|x| x.key.seqno));
                assert_eq!(Some(3), segment.get(&key, 3)?.map(|x| x.key.seqno));
            } else {
                assert_eq!(Some(1), item.map(|x| x.key.seqno));
            }
        }

        assert!(segment.get(&500u32.to_be_bytes(), SeqNo::MAX)?.is_none());
        assert!(segment.get(&7u32.to_be_bytes(), 0)?.is_none());

        Ok(())
    }

    #[test]
    fn segment_versions_across_blocks() -> crate::Result<()> {
        let dir = tempfile::tempdir()?;

        let items = (1..=100u64)
            .rev()
            .map(|seqno| {
                InternalValue::from_components(*b"hot", *b"0123456789", seqno, ValueType::Value)
            })
            .collect::<Vec<_>>();

        let segment = write_segment(dir.path(), items)?;
        assert!(segment.block_index.len() > 1);

        let mut seqnos = vec![];
        segment.scan_versions(b"hot", 50, |item| {
            seqnos.push(item.key.seqno);
            true
        })?;

        assert_eq!((1..=50).rev().collect::<Vec<_>>(), seqnos);

        Ok(())
    }

    #[test]
    fn segment_range_both_ends() -> crate::Result<()> {
        let dir = tempfile::tempdir()?;
        let segment = write_segment(dir.path(), items())?;

        let range = into_user_range(&(10u32.to_be_bytes()..20u32.to_be_bytes()));
        let forward = segment.range(range.clone()).collect::<crate::Result<Vec<_>>>()?;
        let mut backward = segment.range(range).rev().collect::<crate::Result<Vec<_>>>()?;
        backward.reverse();

        assert_eq!(5 + 9, forward.len());
        assert_eq!(forward, backward);

        let all = segment
            .range((Bound::Unbounded, Bound::Unbounded))
            .collect::<crate::Result<Vec<_>>>()?;
        assert_eq!(items(), all);

        Ok(())
    }

    #[test]
    fn segment_range_ping_pong() -> crate::Result<()> {
        let dir = tempfile::tempdir()?;
        let segment = write_segment(dir.path(), items())?;

        let mut iter = segment.range((Bound::Unbounded, Bound::Unbounded));
        let mut count = 0;

        loop {
            let item = if count % 2 == 0 {
                iter.next()
            } else {
                iter.next_back()
            };

            match item {
                Some(item) => {
                    item?;
                    count += 1;
                }
                None => break,
            }
        }

        assert_eq!(items().len(), count);

        Ok(())
    }

    #[test]
    fn segment_deleted_when_obsolete() -> crate::Result<()> {
        let dir = tempfile::tempdir()?;
        let segment = write_segment(dir.path(), items())?;
        let path = segment.path().to_path_buf();

        let reader = segment.range((Bound::Unbounded, Bound::Unbounded));
        segment.mark_obsolete();
        drop(segment);

        // The reader still holds the segment
        assert!(path.try_exists()?);
        assert_eq!(items().len(), reader.count());

        assert!(!path.try_exists()?);

        Ok(())
    }

    #[test]
    fn segment_detects_corrupt_block() -> crate::Result<()> {
        let dir = tempfile::tempdir()?;
        let segment = write_segment(dir.path(), items())?;
        let meta = segment.meta.clone();
        drop(segment);

        let path = dir.path().join("0");
        let mut bytes = std::fs::read(&path)?;
        if let Some(byte) = bytes.get_mut(20) {
            *byte ^= 0xFF;
        }
        std::fs::write(&path, bytes)?;

        let segment = Segment::open(dir.path(), meta)?;
        assert!(matches!(
            segment.get(&0u32.to_be_bytes(), SeqNo::MAX),
            Err(crate::Error::Corruption(_))
        ));

        Ok(())
    }

    #[test]
    fn multi_writer_splits_on_key_boundaries() -> crate::Result<()> {
        let dir = tempfile::tempdir()?;

        let mut writer = MultiWriter::new(
            256,
            SegmentIdGenerator::new(10),
            Options {
                folder: dir.path().into(),
                block_size: 64,
            },
        )?;

        for item in items() {
            writer.write(item)?;
        }

        let metas = writer.finish()?;
        assert!(metas.len() > 2);

        for pair in metas.windows(2) {
            if let [a, b] = pair {
                assert!(a.key_range.1 < b.key_range.0);
                assert_eq!(a.id + 1, b.id);
            }
        }

        assert_eq!(
            items().len() as u64,
            metas.iter().map(|x| x.item_count).sum::<u64>()
        );

        Ok(())
    }
}
