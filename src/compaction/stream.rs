// Copyright (c) 2024-present, fjall-rs
// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

use crate::{
    merge_operator::MergeOperator,
    mvcc_stream::{apply_merge, split_merge_chain},
    value::{InternalValue, SeqNo, UserKey, ValueType},
};
use std::{collections::VecDeque, sync::Arc};

/// Garbage-collects versions out of a sorted stream of entries
///
/// Per key, all versions newer than the GC watermark are kept, because
/// some open snapshot may still read them. Of the versions at or below the
/// watermark, only the newest one survives:
///
/// - a value shadows everything older
/// - a tombstone is dropped entirely if `drop_tombstone` says no older
///   data can exist beneath the output
/// - a merge operand chain is folded into a single value if there is a
///   base to fold onto (and a merge operator), otherwise kept as is
pub struct CompactionStream<I, F>
where
    I: Iterator<Item = crate::Result<InternalValue>>,
    F: Fn(&[u8]) -> bool,
{
    inner: I,
    gc_watermark: SeqNo,
    merge_operator: Option<Arc<dyn MergeOperator>>,
    drop_tombstone: F,

    peeked: Option<InternalValue>,
    output: VecDeque<InternalValue>,

    dropped_versions: u64,
}

impl<I, F> CompactionStream<I, F>
where
    I: Iterator<Item = crate::Result<InternalValue>>,
    F: Fn(&[u8]) -> bool,
{
    pub fn new(
        inner: I,
        gc_watermark: SeqNo,
        merge_operator: Option<Arc<dyn MergeOperator>>,
        drop_tombstone: F,
    ) -> Self {
        Self {
            inner,
            gc_watermark,
            merge_operator,
            drop_tombstone,
            peeked: None,
            output: VecDeque::new(),
            dropped_versions: 0,
        }
    }

    /// Amount of versions that were garbage-collected so far
    pub fn dropped_versions(&self) -> u64 {
        self.dropped_versions
    }

    fn retain(&mut self, key: &UserKey, mut versions: Vec<InternalValue>) -> crate::Result<()> {
        let total = versions.len();

        let split = versions
            .iter()
            .position(|item| item.key.seqno <= self.gc_watermark)
            .unwrap_or(total);

        let expired = versions.split_off(split);
        self.output.extend(versions);

        let Some(head) = expired.first() else {
            return Ok(());
        };

        match head.key.value_type {
            ValueType::Value => {
                self.output.push_back(head.clone());
                self.dropped_versions += (expired.len() - 1) as u64;
            }
            ValueType::Tombstone => {
                if (self.drop_tombstone)(&**key) {
                    log::trace!("Dropping tombstone for {key:?}");
                    self.dropped_versions += expired.len() as u64;
                } else {
                    self.output.push_back(head.clone());
                    self.dropped_versions += (expired.len() - 1) as u64;
                }
            }
            ValueType::Merge => {
                let (operands, base) = split_merge_chain(&expired);
                let chain_len = operands.len();

                let foldable = self.merge_operator.is_some()
                    && (base.is_some() || (self.drop_tombstone)(&**key));

                if foldable {
                    let base_value = base
                        .filter(|item| item.key.value_type == ValueType::Value)
                        .map(|item| &*item.value);

                    let merged = apply_merge(
                        self.merge_operator.as_deref(),
                        key,
                        base_value,
                        &operands,
                    )?;

                    self.output.push_back(InternalValue::from_components(
                        key.clone(),
                        merged,
                        head.key.seqno,
                        ValueType::Value,
                    ));
                    self.dropped_versions += (expired.len() - 1) as u64;
                } else {
                    // Keep the operand chain and the version it is based on
                    let kept = (chain_len + 1).min(expired.len());
                    self.dropped_versions += (expired.len() - kept) as u64;
                    self.output.extend(expired.into_iter().take(kept));
                }
            }
        }

        Ok(())
    }
}

impl<I, F> Iterator for CompactionStream<I, F>
where
    I: Iterator<Item = crate::Result<InternalValue>>,
    F: Fn(&[u8]) -> bool,
{
    type Item = crate::Result<InternalValue>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            if let Some(item) = self.output.pop_front() {
                return Some(Ok(item));
            }

            let head = match self.peeked.take() {
                Some(item) => item,
                None => match self.inner.next()? {
                    Ok(item) => item,
                    Err(e) => return Some(Err(e)),
                },
            };

            let key = head.key.user_key.clone();
            let mut versions = vec![head];

            loop {
                match self.inner.next() {
                    Some(Ok(item)) if item.key.user_key == key => versions.push(item),
                    Some(Ok(item)) => {
                        self.peeked = Some(item);
                        break;
                    }
                    Some(Err(e)) => return Some(Err(e)),
                    None => break,
                }
            }

            if let Err(e) = self.retain(&key, versions) {
                return Some(Err(e));
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_log::test;

    struct Sum;

    impl MergeOperator for Sum {
        fn name(&self) -> &'static str {
            "sum"
        }

        fn merge(&self, _: &[u8], existing: Option<&[u8]>, operands: &[&[u8]]) -> Option<Vec<u8>> {
            let mut sum = existing.map_or(0, |v| v.first().copied().unwrap_or_default());
            for operand in operands {
                sum += operand.first().copied()?;
            }
            Some(vec![sum])
        }
    }

    fn run(
        mut items: Vec<InternalValue>,
        gc_watermark: SeqNo,
        bottommost: bool,
    ) -> crate::Result<Vec<(Vec<u8>, SeqNo, ValueType)>> {
        items.sort();

        CompactionStream::new(
            items.into_iter().map(Ok),
            gc_watermark,
            Some(Arc::new(Sum)),
            |_: &[u8]| bottommost,
        )
        .map(|item| item.map(|item| (item.key.user_key.to_vec(), item.key.seqno, item.key.value_type)))
        .collect()
    }

    #[test]
    fn compaction_stream_keeps_newest_below_watermark() -> crate::Result<()> {
        let items = vec![
            InternalValue::from_components(*b"a", *b"1", 1, ValueType::Value),
            InternalValue::from_components(*b"a", *b"2", 2, ValueType::Value),
            InternalValue::from_components(*b"a", *b"3", 3, ValueType::Value),
            InternalValue::from_components(*b"b", *b"1", 4, ValueType::Value),
        ];

        assert_eq!(
            vec![
                (b"a".to_vec(), 3, ValueType::Value),
                (b"b".to_vec(), 4, ValueType::Value),
            ],
            run(items.clone(), 10, false)?,
        );

        // A snapshot at 2 still needs version 2
        assert_eq!(
            vec![
                (b"a".to_vec(), 3, ValueType::Value),
                (b"a".to_vec(), 2, ValueType::Value),
                (b"b".to_vec(), 4, ValueType::Value),
            ],
            run(items, 2, false)?,
        );

        Ok(())
    }

    #[test]
    fn compaction_stream_tombstones() -> crate::Result<()> {
        let items = vec![
            InternalValue::from_components(*b"a", *b"1", 1, ValueType::Value),
            InternalValue::new_tombstone(*b"a", 2),
        ];

        assert_eq!(
            vec![(b"a".to_vec(), 2, ValueType::Tombstone)],
            run(items.clone(), 10, false)?,
        );

        assert!(run(items.clone(), 10, true)?.is_empty());

        // Tombstone is above the watermark, must stay
        assert_eq!(
            vec![
                (b"a".to_vec(), 2, ValueType::Tombstone),
                (b"a".to_vec(), 1, ValueType::Value),
            ],
            run(items, 1, true)?,
        );

        Ok(())
    }

    #[test]
    fn compaction_stream_folds_merge_operands() -> crate::Result<()> {
        let mut items = vec![
            InternalValue::from_components(*b"a", [1u8], 1, ValueType::Value),
            InternalValue::from_components(*b"a", [2u8], 2, ValueType::Merge),
            InternalValue::from_components(*b"a", [3u8], 3, ValueType::Merge),
        ];
        items.sort();

        let folded = CompactionStream::new(
            items.into_iter().map(Ok),
            10,
            Some(Arc::new(Sum)),
            |_: &[u8]| false,
        )
        .collect::<crate::Result<Vec<_>>>()?;

        assert_eq!(1, folded.len());
        let item = folded.first().expect("should exist");
        assert_eq!(ValueType::Value, item.key.value_type);
        assert_eq!(3, item.key.seqno);
        assert_eq!(&[6], &*item.value);

        Ok(())
    }

    #[test]
    fn compaction_stream_keeps_unbased_operands() -> crate::Result<()> {
        let items = vec![
            InternalValue::from_components(*b"a", [2u8], 2, ValueType::Merge),
            InternalValue::from_components(*b"a", [3u8], 3, ValueType::Merge),
        ];

        // Older data may live in deeper levels
        assert_eq!(
            vec![
                (b"a".to_vec(), 3, ValueType::Merge),
                (b"a".to_vec(), 2, ValueType::Merge),
            ],
            run(items.clone(), 10, false)?,
        );

        // Nothing beneath, so the chain can be folded
        assert_eq!(
            vec![(b"a".to_vec(), 3, ValueType::Value)],
            run(items, 10, true)?,
        );

        Ok(())
    }

    #[test]
    fn compaction_stream_merge_onto_tombstone() -> crate::Result<()> {
        let items = vec![
            InternalValue::from_components(*b"a", [9u8], 1, ValueType::Value),
            InternalValue::new_tombstone(*b"a", 2),
            InternalValue::from_components(*b"a", [3u8], 3, ValueType::Merge),
        ];

        let mut sorted = items;
        sorted.sort();

        let folded = CompactionStream::new(
            sorted.into_iter().map(Ok),
            10,
            Some(Arc::new(Sum)),
            |_: &[u8]| false,
        )
        .collect::<crate::Result<Vec<_>>>()?;

        assert_eq!(1, folded.len());
        assert_eq!(&[3], &*folded.first().expect("should exist").value);

        Ok(())
    }
}
