// Copyright (c) 2024-present, fjall-rs
// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

use crate::{
    coding::{DecodeError, EncodeError},
    journal::error::RecoveryError as JournalRecoveryError,
};

/// Errors that may occur in the storage engine
#[derive(Debug)]
pub enum Error {
    /// I/O error
    Io(std::io::Error),

    /// Serialization failed
    Encode(EncodeError),

    /// Deserialization failed
    Decode(DecodeError),

    /// Error during journal recovery
    JournalRecovery(JournalRecoveryError),

    /// A checksum or format violation in a segment or the manifest
    Corruption(&'static str),

    /// Malformed request, e.g. an empty key
    InvalidArgument(&'static str),

    /// The write buffer is full and the caller asked not to be stalled
    Busy,

    /// The tree halted writes because durability can no longer be guaranteed
    Poisoned,
}

impl Error {
    /// Returns `true` if the error is caused by damaged on-disk data.
    #[must_use]
    pub fn is_corruption(&self) -> bool {
        matches!(
            self,
            Self::Corruption(_) | Self::JournalRecovery(_) | Self::Decode(_)
        )
    }
}

impl std::fmt::Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "TalusError: {self:?}")
    }
}

impl From<std::io::Error> for Error {
    fn from(inner: std::io::Error) -> Self {
        Self::Io(inner)
    }
}

impl From<EncodeError> for Error {
    fn from(value: EncodeError) -> Self {
        Self::Encode(value)
    }
}

impl From<DecodeError> for Error {
    fn from(value: DecodeError) -> Self {
        Self::Decode(value)
    }
}

impl From<JournalRecoveryError> for Error {
    fn from(value: JournalRecoveryError) -> Self {
        Self::JournalRecovery(value)
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Io(e) => Some(e),
            Self::Encode(e) => Some(e),
            Self::Decode(e) => Some(e),
            Self::JournalRecovery(e) => Some(e),
            _ => None,
        }
    }
}

/// Result helper type
pub type Result<T> = std::result::Result<T, Error>;
