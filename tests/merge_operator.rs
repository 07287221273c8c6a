use std::sync::Arc;
use talus::{Config, MergeOperator};
use test_log::test;

struct Counter;

impl MergeOperator for Counter {
    fn name(&self) -> &'static str {
        "counter"
    }

    fn merge(&self, _key: &[u8], existing: Option<&[u8]>, operands: &[&[u8]]) -> Option<Vec<u8>> {
        let mut sum = match existing {
            Some(bytes) => u64::from_be_bytes(bytes.try_into().ok()?),
            None => 0,
        };

        for operand in operands {
            sum += u64::from_be_bytes((*operand).try_into().ok()?);
        }

        Some(sum.to_be_bytes().to_vec())
    }
}

fn counter_value(value: Option<talus::UserValue>) -> Option<u64> {
    value.and_then(|x| Some(u64::from_be_bytes((*x).try_into().ok()?)))
}

#[test]
fn merge_without_operator() -> talus::Result<()> {
    let folder = tempfile::tempdir()?;

    let tree = Config::new(&folder).open()?;

    assert!(matches!(
        tree.merge("a", 1_u64.to_be_bytes()),
        Err(talus::Error::InvalidArgument(_))
    ));

    let mut batch = tree.batch();
    batch.insert("b", "b");
    batch.merge("a", 1_u64.to_be_bytes());
    assert!(matches!(batch.commit(), Err(talus::Error::InvalidArgument(_))));

    assert!(tree.is_empty()?);
    assert_eq!(0, tree.visible_seqno());

    Ok(())
}

#[test]
fn merge_memtable() -> talus::Result<()> {
    let folder = tempfile::tempdir()?;

    let tree = Config::new(&folder)
        .merge_operator(Arc::new(Counter))
        .open()?;

    tree.merge("a", 1_u64.to_be_bytes())?;
    tree.merge("a", 2_u64.to_be_bytes())?;
    assert_eq!(Some(3), counter_value(tree.get("a")?));

    tree.insert("a", 10_u64.to_be_bytes())?;
    tree.merge("a", 5_u64.to_be_bytes())?;
    assert_eq!(Some(15), counter_value(tree.get("a")?));

    tree.remove("a")?;
    tree.merge("a", 7_u64.to_be_bytes())?;
    assert_eq!(Some(7), counter_value(tree.get("a")?));

    assert_eq!(Some(3), counter_value(tree.snapshot_at(2).get("a")?));

    Ok(())
}

#[test]
fn merge_across_flush_and_compaction() -> talus::Result<()> {
    let folder = tempfile::tempdir()?;

    let tree = Config::new(&folder)
        .merge_operator(Arc::new(Counter))
        .open()?;

    tree.insert("a", 100_u64.to_be_bytes())?;
    tree.flush()?;

    tree.merge("a", 1_u64.to_be_bytes())?;
    tree.flush()?;

    tree.merge("a", 2_u64.to_be_bytes())?;
    assert_eq!(Some(103), counter_value(tree.get("a")?));

    let items = tree.iter().collect::<talus::Result<Vec<_>>>()?;
    assert_eq!(1, items.len());

    tree.flush()?;
    assert_eq!(3, tree.segment_count());
    assert_eq!(Some(103), counter_value(tree.get("a")?));

    tree.major_compact()?;
    assert_eq!(1, tree.segment_count());
    assert_eq!(Some(103), counter_value(tree.get("a")?));

    Ok(())
}

#[test]
fn merge_batch_and_recovery() -> talus::Result<()> {
    let folder = tempfile::tempdir()?;

    {
        let tree = Config::new(&folder)
            .merge_operator(Arc::new(Counter))
            .open()?;

        let mut batch = tree.batch();
        batch.merge("a", 1_u64.to_be_bytes());
        batch.merge("a", 1_u64.to_be_bytes());
        batch.merge("b", 4_u64.to_be_bytes());
        batch.commit()?;

        assert_eq!(Some(2), counter_value(tree.get("a")?));
        assert_eq!(Some(4), counter_value(tree.get("b")?));
    }

    {
        let tree = Config::new(&folder)
            .merge_operator(Arc::new(Counter))
            .open()?;

        assert_eq!(Some(2), counter_value(tree.get("a")?));
        assert_eq!(Some(4), counter_value(tree.get("b")?));
        assert_eq!(3, tree.visible_seqno());
    }

    Ok(())
}
