// Copyright (c) 2024-present, fjall-rs
// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

/// Recovery mode to use
///
/// Based on `RocksDB`'s WAL Recovery Modes: <https://github.com/facebook/rocksdb/wiki/WAL-Recovery-Modes>
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
#[non_exhaustive]
pub enum RecoveryMode {
    /// The last record in a journal may be torn on crash,
    /// and will be discarded without error.
    ///
    /// A corrupt record that is followed by intact records
    /// fails recovery, so any data up to the tail will be consistent.
    ///
    /// This is the default mode.
    #[default]
    TolerateCorruptTail,

    /// Skips corrupt (invalid checksum) records. This may violate
    /// consistency, but will recover as much data as possible.
    SkipInvalidBatches,
}

/// Errors that can occur during journal recovery
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
#[allow(clippy::module_name_repetitions)]
pub enum RecoveryError {
    /// Record had less items than its header announced
    InsufficientLength,

    /// Record had trailing bytes after the announced items
    TooManyItems,

    /// The checksum value does not match the expected value
    ChecksumMismatch,

    /// A journal file name could not be parsed
    InvalidFileName,
}

impl std::fmt::Display for RecoveryError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "RecoveryError({self:?})")
    }
}

impl std::error::Error for RecoveryError {}
