// Copyright (c) 2024-present, fjall-rs
// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

/// Combines merge operands with an existing value
///
/// Merge operands are written with [`crate::Tree::merge`] and resolved lazily:
/// on read, and during flushes and compactions once no snapshot needs
/// the individual operands anymore.
///
/// # Examples
///
/// ```
/// use talus::MergeOperator;
///
/// /// Interprets values as big-endian u64 counters
/// struct Counter;
///
/// impl MergeOperator for Counter {
///     fn name(&self) -> &'static str {
///         "counter"
///     }
///
///     fn merge(&self, _key: &[u8], existing: Option<&[u8]>, operands: &[&[u8]]) -> Option<Vec<u8>> {
///         let mut sum = match existing {
///             Some(bytes) => u64::from_be_bytes(bytes.try_into().ok()?),
///             None => 0,
///         };
///
///         for operand in operands {
///             sum += u64::from_be_bytes((*operand).try_into().ok()?);
///         }
///
///         Some(sum.to_be_bytes().to_vec())
///     }
/// }
/// ```
pub trait MergeOperator: Send + Sync {
    /// Name of the operator, used in log messages
    fn name(&self) -> &'static str;

    /// Folds `operands` (oldest first) onto `existing`.
    ///
    /// `existing` is `None` if the key had no value or was deleted.
    ///
    /// Returning `None` signals that the operands could not be merged,
    /// which fails the read, flush or compaction that tried to resolve them.
    fn merge(&self, key: &[u8], existing: Option<&[u8]>, operands: &[&[u8]]) -> Option<Vec<u8>>;
}
