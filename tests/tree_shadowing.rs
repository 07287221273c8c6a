use talus::Config;
use test_log::test;

#[test]
fn tree_shadowing_upsert() -> talus::Result<()> {
    let folder = tempfile::tempdir()?;

    let tree = Config::new(&folder).open()?;

    let key = "1";
    let value = b"oldvalue";

    assert_eq!(tree.len()?, 0);
    tree.insert(key, *value)?;
    assert_eq!(tree.len()?, 1);
    assert_eq!(tree.get(key)?.as_deref(), Some(&value[..]));

    tree.flush()?;
    assert_eq!(tree.len()?, 1);
    assert_eq!(tree.get(key)?.as_deref(), Some(&value[..]));

    let value = b"newvalue";

    tree.insert(key, *value)?;
    assert_eq!(tree.len()?, 1);
    assert_eq!(tree.get(key)?.as_deref(), Some(&value[..]));

    tree.flush()?;
    assert_eq!(tree.len()?, 1);
    assert_eq!(tree.get(key)?.as_deref(), Some(&value[..]));

    Ok(())
}

#[test]
fn tree_shadowing_delete() -> talus::Result<()> {
    let folder = tempfile::tempdir()?;

    let tree = Config::new(&folder).open()?;

    let key = "1";
    let value = b"oldvalue";

    tree.insert(key, *value)?;
    assert_eq!(tree.len()?, 1);

    tree.flush()?;
    assert_eq!(tree.len()?, 1);
    assert_eq!(tree.get(key)?.as_deref(), Some(&value[..]));

    tree.remove(key)?;
    assert_eq!(tree.len()?, 0);
    assert!(tree.get(key)?.is_none());

    tree.flush()?;
    assert_eq!(tree.len()?, 0);
    assert!(tree.get(key)?.is_none());

    Ok(())
}

#[test]
fn tree_shadowing_range() -> talus::Result<()> {
    const ITEM_COUNT: usize = 1_000;

    let folder = tempfile::tempdir()?;

    let tree = Config::new(&folder).block_size(1_024).open()?;

    for x in 0..ITEM_COUNT as u64 {
        tree.insert(x.to_be_bytes(), "old")?;
    }

    tree.flush()?;
    assert_eq!(tree.len()?, ITEM_COUNT);

    for x in 0..ITEM_COUNT as u64 {
        tree.insert(x.to_be_bytes(), "new")?;
    }

    assert_eq!(tree.len()?, ITEM_COUNT);
    assert!(tree
        .iter()
        .all(|x| x.map(|(_, v)| &*v == b"new").unwrap_or(false)));

    tree.flush()?;

    assert_eq!(tree.len()?, ITEM_COUNT);
    assert!(tree
        .iter()
        .rev()
        .all(|x| x.map(|(_, v)| &*v == b"new").unwrap_or(false)));

    Ok(())
}
