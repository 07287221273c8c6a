// Copyright (c) 2024-present, fjall-rs
// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

//! Talus is an embeddable log-structured merge-tree (LSM-tree) key-value storage engine written in Rust. It features:
//!
//! - Thread-safe BTreeMap-like API
//! - 100% safe & stable Rust
//! - Write-ahead journal with configurable durability
//! - Leveled compaction in background threads
//! - Range & prefix searching with forward and reverse iteration
//! - Snapshots (MVCC)
//! - Atomic write batches
//! - Merge operators for read-modify-write without reading
//!
//! It is not:
//!
//! - a standalone server
//! - a relational or wide-column database: it has no notion of columns
//!
//! Keys are limited to 65536 bytes, values are limited to 2^32 bytes. As is normal with any kind of storage engine, larger keys and values have a bigger performance impact.
//!
//! ```
//! use talus::{Config, PersistMode};
//! #
//! # let folder = tempfile::tempdir()?;
//!
//! let tree = Config::new(&folder).open()?;
//!
//! // Write some data
//! tree.insert("a", "hello")?;
//!
//! // And retrieve it
//! let bytes = tree.get("a")?;
//!
//! // Or remove it again
//! tree.remove("a")?;
//!
//! // Search by prefix
//! for kv in tree.prefix("prefix") {
//!   // ...
//! }
//!
//! // Search by range
//! for kv in tree.range("a"..="z") {
//!   // ...
//! }
//!
//! // Iterators implement DoubleEndedIterator, so you can search backwards, too!
//! for kv in tree.prefix("prefix").rev() {
//!   // ...
//! }
//!
//! // Sync the journal to disk to make sure data is definitely durable
//! // When the tree is dropped, it will try to persist with `PersistMode::SyncAll` as well
//! tree.persist(PersistMode::SyncAll)?;
//! #
//! # Ok::<_, talus::Error>(())
//! ```

#![forbid(unsafe_code)]
#![deny(clippy::all, missing_docs, clippy::cargo)]
#![deny(clippy::unwrap_used)]
#![deny(clippy::indexing_slicing)]
#![warn(clippy::pedantic, clippy::nursery)]
#![warn(clippy::expect_used)]
#![allow(clippy::missing_const_for_fn)]
#![warn(clippy::multiple_crate_versions)]
#![cfg_attr(docsrs, feature(doc_cfg))]

mod batch;
mod buffer_sequence;
mod coding;

/// Contains compaction strategies
pub mod compaction;

mod config;
mod error;
mod file;
mod flush;
mod id;
mod instrumentation;
mod iter;
mod journal;
mod memtable;
mod merge;
mod merge_operator;
mod mvcc_stream;
mod path;
mod poison_dart;
mod range;
mod recovery;
mod segment;
mod seqno;
mod snapshot;
mod snapshot_nonce;
mod snapshot_tracker;
mod stats;
mod stop_signal;
mod supervisor;

/// Synchronization primitives and test seams
pub mod sync;

mod tree;
mod value;
mod version;
mod worker_pool;
mod write_buffer_manager;

pub(crate) type HashMap<K, V> = std::collections::HashMap<K, V, xxhash_rust::xxh3::Xxh3Builder>;
pub(crate) type HashSet<K> = std::collections::HashSet<K, xxhash_rust::xxh3::Xxh3Builder>;

pub use {
    batch::{Batch, WriteOptions},
    coding::{DecodeError, EncodeError},
    config::Config,
    error::{Error, Result},
    instrumentation::{InstrumentationSink, StatCode},
    iter::Iter,
    journal::{
        error::{RecoveryError, RecoveryMode},
        writer::PersistMode,
    },
    merge_operator::MergeOperator,
    snapshot::Snapshot,
    stats::Stats,
    tree::Tree,
    value::{KvPair, SeqNo, UserKey, UserValue},
};
