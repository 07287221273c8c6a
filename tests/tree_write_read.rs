use talus::Config;
use test_log::test;

#[test]
fn tree_write_and_read() -> talus::Result<()> {
    let folder = tempfile::tempdir()?;

    let tree = Config::new(&folder).open()?;

    tree.insert("a", "abc")?;
    tree.insert("b", "def")?;
    tree.insert("c", "ghi")?;

    assert_eq!(3, tree.len()?);
    assert_eq!(Some("abc".as_bytes().into()), tree.get("a")?);
    assert_eq!(Some("def".as_bytes().into()), tree.get("b")?);
    assert_eq!(Some("ghi".as_bytes().into()), tree.get("c")?);
    assert_eq!(None, tree.get("d")?);

    tree.flush()?;

    assert_eq!(3, tree.len()?);
    assert_eq!(Some("abc".as_bytes().into()), tree.get("a")?);
    assert_eq!(Some("def".as_bytes().into()), tree.get("b")?);
    assert_eq!(Some("ghi".as_bytes().into()), tree.get("c")?);
    assert_eq!(None, tree.get("d")?);

    Ok(())
}

#[test]
fn tree_put_put_delete_snapshots() -> talus::Result<()> {
    let folder = tempfile::tempdir()?;

    let tree = Config::new(&folder).open()?;

    assert_eq!(1, tree.insert("a", "1")?);
    assert_eq!(2, tree.insert("a", "2")?);
    assert_eq!(3, tree.remove("a")?);

    assert_eq!(Some("1".as_bytes().into()), tree.snapshot_at(1).get("a")?);
    assert_eq!(Some("2".as_bytes().into()), tree.snapshot_at(2).get("a")?);
    assert_eq!(None, tree.snapshot_at(3).get("a")?);
    assert_eq!(None, tree.get("a")?);

    Ok(())
}

#[test]
fn tree_snapshot_at_is_capped() -> talus::Result<()> {
    let folder = tempfile::tempdir()?;

    let tree = Config::new(&folder).open()?;

    tree.insert("a", "1")?;

    let snapshot = tree.snapshot_at(1_000);
    assert_eq!(1, snapshot.seqno());

    tree.insert("b", "2")?;
    assert!(!snapshot.contains_key("b")?);
    assert!(tree.contains_key("b")?);

    Ok(())
}

#[test]
fn tree_invalid_keys() -> talus::Result<()> {
    let folder = tempfile::tempdir()?;

    let tree = Config::new(&folder).open()?;

    assert!(matches!(
        tree.insert("", "abc"),
        Err(talus::Error::InvalidArgument(_))
    ));

    let big_key = vec![0; 65_536];
    assert!(matches!(
        tree.insert(big_key, "abc"),
        Err(talus::Error::InvalidArgument(_))
    ));

    let max_key = vec![0; 65_535];
    tree.insert(max_key.clone(), "abc")?;
    assert!(tree.contains_key(&max_key)?);

    // NOTE: Rejected writes do not use up sequence numbers
    assert_eq!(1, tree.visible_seqno());

    Ok(())
}

#[test]
fn tree_is_empty() -> talus::Result<()> {
    let folder = tempfile::tempdir()?;

    let tree = Config::new(&folder).open()?;
    assert!(tree.is_empty()?);

    tree.insert("a", "abc")?;
    assert!(!tree.is_empty()?);

    tree.remove("a")?;
    assert!(tree.is_empty()?);

    Ok(())
}
