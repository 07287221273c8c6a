// Copyright (c) 2024-present, fjall-rs
// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

use super::{
    block::ValueBlock,
    index::{BlockHandle, BlockIndex},
    meta::{SegmentId, SegmentMeta},
    TRAILER_MAGIC,
};
use crate::{coding::Encode, id::SegmentIdGenerator, value::InternalValue, SeqNo, UserKey};
use byteorder::{BigEndian, WriteBytesExt};
use std::{
    fs::File,
    io::{BufWriter, Write},
    path::{Path, PathBuf},
};

#[derive(Clone, Debug)]
pub struct Options {
    pub folder: PathBuf,
    pub block_size: u32,
}

/// Serializes values into blocks and writes them to disk
///
/// Also takes care of creating the block index
pub struct Writer {
    pub segment_id: SegmentId,
    path: PathBuf,
    opts: Options,

    file: BufWriter<File>,
    file_pos: u64,

    chunk: Vec<InternalValue>,
    chunk_size: usize,
    handles: Vec<BlockHandle>,

    item_count: u64,
    key_count: u64,
    tombstone_count: u64,

    first_key: Option<UserKey>,
    last_key: Option<UserKey>,
    lowest_seqno: SeqNo,
    highest_seqno: SeqNo,
}

impl Writer {
    pub fn new(segment_id: SegmentId, opts: Options) -> crate::Result<Self> {
        let path = opts.folder.join(segment_id.to_string());
        let file = File::create(&path)?;

        Ok(Self {
            segment_id,
            path,
            opts,
            file: BufWriter::with_capacity(u16::MAX.into(), file),
            file_pos: 0,
            chunk: Vec::with_capacity(1_000),
            chunk_size: 0,
            handles: Vec::with_capacity(100),
            item_count: 0,
            key_count: 0,
            tombstone_count: 0,
            first_key: None,
            last_key: None,
            lowest_seqno: SeqNo::MAX,
            highest_seqno: 0,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn file_pos(&self) -> u64 {
        self.file_pos + self.chunk_size as u64
    }

    pub fn last_key(&self) -> Option<&UserKey> {
        self.last_key.as_ref()
    }

    /// Writes an item
    ///
    /// Items need to be written in internal key order.
    pub fn write(&mut self, item: InternalValue) -> crate::Result<()> {
        if let Some(last_key) = &self.last_key {
            debug_assert!(
                **last_key <= *item.key.user_key,
                "segment writer got unordered keys"
            );

            if *last_key != item.key.user_key {
                self.key_count += 1;
            }
        } else {
            self.key_count += 1;
            self.first_key = Some(item.key.user_key.clone());
        }

        if item.is_tombstone() {
            self.tombstone_count += 1;
        }

        self.item_count += 1;
        self.lowest_seqno = self.lowest_seqno.min(item.key.seqno);
        self.highest_seqno = self.highest_seqno.max(item.key.seqno);
        self.last_key = Some(item.key.user_key.clone());

        self.chunk_size += item.size();
        self.chunk.push(item);

        if self.chunk_size >= self.opts.block_size as usize {
            self.spill_block()?;
        }

        Ok(())
    }

    /// Writes the buffered items as a new block
    fn spill_block(&mut self) -> crate::Result<()> {
        let Some(first) = self.chunk.first() else {
            return Ok(());
        };

        let bytes = ValueBlock::encode(&self.chunk);

        // NOTE: Block size is bounded by the configured block size plus one item
        #[allow(clippy::cast_possible_truncation)]
        self.handles.push(BlockHandle {
            first_key: first.key.user_key.clone(),
            offset: self.file_pos,
            size: bytes.len() as u32,
        });

        self.file.write_all(&bytes)?;
        self.file_pos += bytes.len() as u64;

        self.chunk.clear();
        self.chunk_size = 0;

        Ok(())
    }

    /// Finishes the segment, making sure all data is written durably
    ///
    /// Returns `None` and removes the file if no item was written.
    pub fn finish(mut self) -> crate::Result<Option<SegmentMeta>> {
        self.spill_block()?;

        let (Some(first_key), Some(last_key)) = (self.first_key.take(), self.last_key.take())
        else {
            log::trace!("Dropping empty segment {}", self.segment_id);
            drop(self.file);
            std::fs::remove_file(&self.path)?;
            return Ok(None);
        };

        let index = BlockIndex::new(std::mem::take(&mut self.handles));
        let index_bytes = index.encode_into_vec();
        let index_offset = self.file_pos;

        self.file.write_all(&index_bytes)?;

        // Trailer
        self.file.write_u64::<BigEndian>(index_offset)?;

        // NOTE: Index size is bounded by block count
        #[allow(clippy::cast_possible_truncation)]
        self.file.write_u32::<BigEndian>(index_bytes.len() as u32)?;
        self.file
            .write_u64::<BigEndian>(xxhash_rust::xxh3::xxh3_64(&index_bytes))?;
        self.file.write_all(TRAILER_MAGIC)?;

        self.file.flush()?;
        self.file.get_mut().sync_all()?;

        // IMPORTANT: fsync folder on Unix, the manifest will reference this file
        if let Some(folder) = self.path.parent() {
            crate::file::fsync_directory(folder)?;
        }

        let file_size = self.file.get_ref().metadata()?.len();

        log::trace!(
            "Written segment {} with {} items ({file_size}B)",
            self.segment_id,
            self.item_count,
        );

        Ok(Some(SegmentMeta {
            id: self.segment_id,
            key_range: (first_key, last_key),
            seqnos: (self.lowest_seqno, self.highest_seqno),
            item_count: self.item_count,
            key_count: self.key_count,
            tombstone_count: self.tombstone_count,
            file_size,
        }))
    }
}

/// Like `Writer` but will rotate to a new segment, once a segment grows larger than `target_size`
///
/// Rotation only happens between two user keys, so all versions of a key
/// end up in the same segment and the resulting run is key-disjoint.
#[allow(clippy::module_name_repetitions)]
pub struct MultiWriter {
    /// Target size of segments in bytes
    pub target_size: u64,

    opts: Options,
    id_generator: SegmentIdGenerator,

    created_items: Vec<SegmentMeta>,
    written_paths: Vec<PathBuf>,

    writer: Writer,
}

impl MultiWriter {
    /// Sets up a new `MultiWriter` at the given segments folder
    pub fn new(
        target_size: u64,
        id_generator: SegmentIdGenerator,
        opts: Options,
    ) -> crate::Result<Self> {
        let writer = Writer::new(id_generator.next(), opts.clone())?;

        Ok(Self {
            target_size,
            opts,
            id_generator,
            created_items: Vec::with_capacity(10),
            written_paths: vec![writer.path().to_path_buf()],
            writer,
        })
    }

    /// Flushes the current writer, stores its metadata, and sets up a new writer for the next segment
    fn rotate(&mut self) -> crate::Result<()> {
        log::debug!("Rotating segment writer");

        let new_writer = Writer::new(self.id_generator.next(), self.opts.clone())?;
        self.written_paths.push(new_writer.path().to_path_buf());

        let old_writer = std::mem::replace(&mut self.writer, new_writer);

        if let Some(meta) = old_writer.finish()? {
            self.created_items.push(meta);
        }

        Ok(())
    }

    /// Writes an item
    pub fn write(&mut self, item: InternalValue) -> crate::Result<()> {
        let at_key_boundary = self
            .writer
            .last_key()
            .is_some_and(|last| *last != item.key.user_key);

        if at_key_boundary && self.writer.file_pos() >= self.target_size {
            self.rotate()?;
        }

        self.writer.write(item)
    }

    /// Finishes the last segment, making sure all data is written durably
    ///
    /// Returns the metadata of created segments
    pub fn finish(mut self) -> crate::Result<Vec<SegmentMeta>> {
        match self.writer.finish() {
            Ok(Some(meta)) => self.created_items.push(meta),
            Ok(None) => {}
            Err(e) => {
                remove_files(&self.written_paths);
                return Err(e);
            }
        }

        Ok(self.created_items)
    }

    /// Discards everything written so far.
    pub fn abort(self) {
        let paths = self.written_paths;
        drop(self.writer);
        remove_files(&paths);
    }
}

fn remove_files(paths: &[PathBuf]) {
    for path in paths {
        if let Err(e) = std::fs::remove_file(path) {
            if e.kind() != std::io::ErrorKind::NotFound {
                log::warn!("Failed to remove aborted segment file {path:?}: {e:?}");
            }
        }
    }
}
