// Copyright (c) 2024-present, fjall-rs
// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

use crate::{
    merge_operator::MergeOperator,
    value::{InternalValue, KvPair, SeqNo, UserValue, ValueType},
};
use std::sync::Arc;

/// Splits a version chain (newest first) that starts with merge operands
/// into its operands (oldest first) and the version it is based on, if any.
pub fn split_merge_chain(versions: &[InternalValue]) -> (Vec<&[u8]>, Option<&InternalValue>) {
    let chain_len = versions
        .iter()
        .take_while(|item| item.key.value_type == ValueType::Merge)
        .count();

    let (chain, rest) = versions.split_at(chain_len);

    let operands = chain.iter().rev().map(|item| &*item.value).collect();

    (operands, rest.first())
}

/// Applies the merge operator to a chain of operands.
pub fn apply_merge(
    merge_operator: Option<&dyn MergeOperator>,
    key: &[u8],
    base: Option<&[u8]>,
    operands: &[&[u8]],
) -> crate::Result<UserValue> {
    let Some(operator) = merge_operator else {
        return Err(crate::Error::InvalidArgument(
            "found merge operands, but no merge operator is configured",
        ));
    };

    match operator.merge(key, base, operands) {
        Some(value) => Ok(value.into()),
        None => {
            log::error!(
                "Merge operator {:?} failed to merge {} operand(s) of key {key:?}",
                operator.name(),
                operands.len()
            );
            Err(crate::Error::InvalidArgument("merge operator failed"))
        }
    }
}

/// Resolves the versions of a key that are visible to a reader (newest first) to its value.
pub fn resolve(
    versions: &[InternalValue],
    merge_operator: Option<&dyn MergeOperator>,
) -> crate::Result<Option<UserValue>> {
    let Some(newest) = versions.first() else {
        return Ok(None);
    };

    match newest.key.value_type {
        ValueType::Value => Ok(Some(newest.value.clone())),
        ValueType::Tombstone => Ok(None),
        ValueType::Merge => {
            let (operands, base) = split_merge_chain(versions);

            let base = base
                .filter(|item| item.key.value_type == ValueType::Value)
                .map(|item| &*item.value);

            apply_merge(merge_operator, &newest.key.user_key, base, &operands).map(Some)
        }
    }
}

/// Collects the visible versions of a single key during a point read
///
/// Versions are pushed newest first, across memtables and segments;
/// collection is complete as soon as a version that does not depend on
/// older versions (a value or a tombstone) was seen.
#[derive(Default)]
pub struct VersionCollector {
    versions: Vec<InternalValue>,
}

impl VersionCollector {
    /// Adds a version, returns `true` if older versions are still needed.
    ///
    /// A version that is not older than the last one pushed is a duplicate
    /// (a memtable and the segment it was flushed into) and is ignored.
    pub fn push(&mut self, item: InternalValue) -> bool {
        if let Some(last) = self.versions.last() {
            if item.key.seqno >= last.key.seqno {
                return last.key.value_type == ValueType::Merge;
            }
        }

        let is_merge = item.key.value_type == ValueType::Merge;
        self.versions.push(item);
        is_merge
    }

    #[cfg(test)]
    pub fn is_complete(&self) -> bool {
        self.versions
            .last()
            .is_some_and(|item| item.key.value_type != ValueType::Merge)
    }

    pub fn resolve(
        self,
        merge_operator: Option<&dyn MergeOperator>,
    ) -> crate::Result<Option<UserValue>> {
        resolve(&self.versions, merge_operator)
    }
}

/// Turns a stream of internal entries into the key-value pairs visible at a sequence number
///
/// All versions of one key are gathered, versions newer than the snapshot
/// are skipped, and the rest is resolved: values are returned, tombstones
/// hide the key, and merge operands are folded onto their base.
pub struct MvccStream<I: DoubleEndedIterator<Item = crate::Result<InternalValue>>> {
    inner: I,
    seqno: SeqNo,
    merge_operator: Option<Arc<dyn MergeOperator>>,

    front: Option<InternalValue>,
    back: Option<InternalValue>,
}

impl<I: DoubleEndedIterator<Item = crate::Result<InternalValue>>> MvccStream<I> {
    pub fn new(inner: I, seqno: SeqNo, merge_operator: Option<Arc<dyn MergeOperator>>) -> Self {
        Self {
            inner,
            seqno,
            merge_operator,
            front: None,
            back: None,
        }
    }

    fn next_raw(&mut self) -> Option<crate::Result<InternalValue>> {
        if let Some(item) = self.front.take() {
            return Some(Ok(item));
        }

        match self.inner.next() {
            Some(item) => Some(item),
            None => self.back.take().map(Ok),
        }
    }

    fn next_back_raw(&mut self) -> Option<crate::Result<InternalValue>> {
        if let Some(item) = self.back.take() {
            return Some(Ok(item));
        }

        match self.inner.next_back() {
            Some(item) => Some(item),
            None => self.front.take().map(Ok),
        }
    }

    fn peek_front(&mut self) -> crate::Result<Option<&InternalValue>> {
        if self.front.is_none() {
            self.front = match self.inner.next() {
                Some(item) => Some(item?),
                None => self.back.take(),
            };
        }

        Ok(self.front.as_ref())
    }

    fn peek_back(&mut self) -> crate::Result<Option<&InternalValue>> {
        if self.back.is_none() {
            self.back = match self.inner.next_back() {
                Some(item) => Some(item?),
                None => self.front.take(),
            };
        }

        Ok(self.back.as_ref())
    }

    fn resolve(&self, versions: &[InternalValue]) -> crate::Result<Option<UserValue>> {
        resolve(versions, self.merge_operator.as_deref())
    }
}

impl<I: DoubleEndedIterator<Item = crate::Result<InternalValue>>> Iterator for MvccStream<I> {
    type Item = crate::Result<KvPair>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            let head = match self.next_raw()? {
                Ok(item) => item,
                Err(e) => return Some(Err(e)),
            };

            let key = head.key.user_key.clone();
            let mut versions = Vec::with_capacity(1);

            if head.key.seqno <= self.seqno {
                versions.push(head);
            }

            loop {
                match self.peek_front() {
                    Ok(Some(next)) if next.key.user_key == key => {}
                    Ok(_) => break,
                    Err(e) => return Some(Err(e)),
                }

                if let Some(item) = self.front.take() {
                    if item.key.seqno <= self.seqno {
                        versions.push(item);
                    }
                }
            }

            // NOTE: A reader may see a memtable and the segment it was just
            // flushed into, so the same version can show up twice
            versions.dedup_by_key(|x| x.key.seqno);

            match self.resolve(&versions) {
                Ok(Some(value)) => return Some(Ok((key, value))),
                Ok(None) => continue,
                Err(e) => return Some(Err(e)),
            }
        }
    }
}

impl<I: DoubleEndedIterator<Item = crate::Result<InternalValue>>> DoubleEndedIterator
    for MvccStream<I>
{
    fn next_back(&mut self) -> Option<Self::Item> {
        loop {
            let tail = match self.next_back_raw()? {
                Ok(item) => item,
                Err(e) => return Some(Err(e)),
            };

            let key = tail.key.user_key.clone();
            let mut versions = Vec::with_capacity(1);

            if tail.key.seqno <= self.seqno {
                versions.push(tail);
            }

            loop {
                match self.peek_back() {
                    Ok(Some(prev)) if prev.key.user_key == key => {}
                    Ok(_) => break,
                    Err(e) => return Some(Err(e)),
                }

                if let Some(item) = self.back.take() {
                    if item.key.seqno <= self.seqno {
                        versions.push(item);
                    }
                }
            }

            // Versions were collected oldest first
            versions.reverse();

            versions.dedup_by_key(|x| x.key.seqno);

            match self.resolve(&versions) {
                Ok(Some(value)) => return Some(Ok((key, value))),
                Ok(None) => continue,
                Err(e) => return Some(Err(e)),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_log::test;

    struct Concat;

    impl MergeOperator for Concat {
        fn name(&self) -> &'static str {
            "concat"
        }

        fn merge(&self, _: &[u8], existing: Option<&[u8]>, operands: &[&[u8]]) -> Option<Vec<u8>> {
            let mut value = existing.map(<[u8]>::to_vec).unwrap_or_default();
            for operand in operands {
                value.extend_from_slice(operand);
            }
            Some(value)
        }
    }

    fn stream(
        items: Vec<InternalValue>,
        seqno: SeqNo,
    ) -> MvccStream<std::vec::IntoIter<crate::Result<InternalValue>>> {
        let mut items = items;
        items.sort();

        MvccStream::new(
            items.into_iter().map(Ok).collect::<Vec<_>>().into_iter(),
            seqno,
            Some(Arc::new(Concat)),
        )
    }

    fn fixture() -> Vec<InternalValue> {
        vec![
            InternalValue::from_components(*b"a", *b"1", 1, ValueType::Value),
            InternalValue::from_components(*b"a", *b"2", 2, ValueType::Value),
            InternalValue::new_tombstone(*b"a", 3),
            InternalValue::from_components(*b"b", *b"x", 4, ValueType::Value),
            InternalValue::from_components(*b"b", *b"y", 5, ValueType::Merge),
            InternalValue::from_components(*b"b", *b"z", 6, ValueType::Merge),
            InternalValue::from_components(*b"c", *b"q", 7, ValueType::Merge),
        ]
    }

    fn pairs(iter: impl Iterator<Item = crate::Result<KvPair>>) -> Vec<(Vec<u8>, Vec<u8>)> {
        iter.map(|item| {
            let (k, v) = item.expect("should not fail");
            (k.to_vec(), v.to_vec())
        })
        .collect()
    }

    #[test]
    fn mvcc_stream_snapshot_bounds() {
        assert_eq!(
            vec![(b"a".to_vec(), b"2".to_vec())],
            pairs(stream(fixture(), 2))
        );

        assert_eq!(
            vec![(b"b".to_vec(), b"xy".to_vec())],
            pairs(stream(fixture(), 5))
        );

        assert_eq!(
            vec![
                (b"b".to_vec(), b"xyz".to_vec()),
                (b"c".to_vec(), b"q".to_vec())
            ],
            pairs(stream(fixture(), SeqNo::MAX))
        );
    }

    #[test]
    fn mvcc_stream_reverse() {
        let mut reversed = pairs(stream(fixture(), SeqNo::MAX).rev());
        reversed.reverse();
        assert_eq!(pairs(stream(fixture(), SeqNo::MAX)), reversed);

        let mut reversed = pairs(stream(fixture(), 2).rev());
        reversed.reverse();
        assert_eq!(pairs(stream(fixture(), 2)), reversed);
    }

    #[test]
    fn mvcc_stream_ping_pong() {
        let mut iter = stream(fixture(), 2);
        assert_eq!(b"a", &*iter.next_back().expect("exists").expect("ok").0);
        assert!(iter.next().is_none());

        let mut iter = stream(fixture(), SeqNo::MAX);
        assert_eq!(b"b", &*iter.next().expect("exists").expect("ok").0);
        assert_eq!(b"c", &*iter.next_back().expect("exists").expect("ok").0);
        assert!(iter.next().is_none());
        assert!(iter.next_back().is_none());
    }

    #[test]
    fn mvcc_stream_merge_without_operator() {
        let mut iter = MvccStream::new(
            vec![Ok(InternalValue::from_components(
                *b"c",
                *b"q",
                7,
                ValueType::Merge,
            ))]
            .into_iter(),
            SeqNo::MAX,
            None,
        );

        assert!(matches!(
            iter.next(),
            Some(Err(crate::Error::InvalidArgument(_)))
        ));
    }

    #[test]
    fn version_collector_stops_at_base() {
        let mut collector = VersionCollector::default();
        assert!(collector.push(InternalValue::from_components(
            *b"k",
            *b"2",
            3,
            ValueType::Merge
        )));
        assert!(!collector.is_complete());
        assert!(!collector.push(InternalValue::from_components(
            *b"k",
            *b"1",
            1,
            ValueType::Value
        )));
        assert!(collector.is_complete());

        let value = collector.resolve(Some(&Concat)).expect("should merge");
        assert_eq!(Some(b"12".as_slice().into()), value);
    }

    #[test]
    fn merge_onto_tombstone_has_no_base() {
        let versions = vec![
            InternalValue::from_components(*b"k", *b"n", 3, ValueType::Merge),
            InternalValue::new_tombstone(*b"k", 2),
            InternalValue::from_components(*b"k", *b"old", 1, ValueType::Value),
        ];

        let value = resolve(&versions, Some(&Concat)).expect("should merge");
        assert_eq!(Some(b"n".as_slice().into()), value);
    }
}
