use std::time::{Duration, Instant};
use talus::{
    sync::test_point::{fail_at, FailPoint},
    Config,
};
use test_log::test;

fn segment_files(folder: &std::path::Path) -> std::io::Result<usize> {
    Ok(std::fs::read_dir(folder.join("segments"))?.count())
}

fn wait_until(timeout: Duration, mut condition: impl FnMut() -> bool) -> bool {
    let start = Instant::now();

    while start.elapsed() < timeout {
        if condition() {
            return true;
        }
        std::thread::sleep(Duration::from_millis(10));
    }

    condition()
}

#[test]
fn failed_journal_rotation_is_retried_by_next_flush() -> talus::Result<()> {
    let folder = tempfile::tempdir()?;
    let tree = Config::new(&folder).open()?;

    tree.insert("a", "1")?;

    {
        let _guard = fail_at(FailPoint::JournalRotate, folder.path(), 1);
        assert!(tree.flush().is_err());
    }

    assert_eq!(0, tree.sealed_memtable_count());
    assert!(!tree.is_poisoned());

    // Writes still go into the active memtable and its journal
    tree.insert("b", "2")?;
    tree.flush()?;

    assert_eq!(1, tree.segment_count());
    assert_eq!(Some("1".as_bytes().into()), tree.get("a")?);
    assert_eq!(Some("2".as_bytes().into()), tree.get("b")?);

    tree.insert("c", "3")?;
    drop(tree);

    let tree = Config::new(&folder).open()?;
    assert_eq!(3, tree.len()?);

    Ok(())
}

#[test]
fn flush_is_retried_with_backoff() -> talus::Result<()> {
    let folder = tempfile::tempdir()?;
    let tree = Config::new(&folder).open()?;

    tree.insert("a", "1")?;

    let _guard = fail_at(FailPoint::FlushWrite, folder.path(), 2);
    let start = Instant::now();

    tree.flush()?;

    // 100ms after the first failure, 200ms after the second
    assert!(start.elapsed() >= Duration::from_millis(300));

    assert_eq!(2, tree.stats().flush_failures());
    assert_eq!(1, tree.stats().flushes_completed());
    assert_eq!(1, tree.segment_count());
    assert_eq!(0, tree.sealed_memtable_count());
    assert_eq!(1, segment_files(folder.path())?);
    assert!(!tree.is_poisoned());

    Ok(())
}

#[test]
fn persistent_flush_failure_poisons_tree() -> talus::Result<()> {
    let folder = tempfile::tempdir()?;

    {
        let tree = Config::new(&folder).max_background_retries(2).open()?;

        tree.insert("a", "1")?;

        let guard = fail_at(FailPoint::FlushWrite, folder.path(), usize::MAX);

        assert!(matches!(tree.flush(), Err(talus::Error::Poisoned)));
        assert!(tree.is_poisoned());
        assert_eq!(3, tree.stats().flush_failures());
        assert_eq!(0, tree.segment_count());

        assert!(matches!(tree.insert("b", "2"), Err(talus::Error::Poisoned)));

        // Reads are still served
        assert_eq!(Some("1".as_bytes().into()), tree.get("a")?);

        drop(guard);
    }

    // The journal still holds everything that was acknowledged
    let tree = Config::new(&folder).open()?;
    assert!(!tree.is_poisoned());
    assert_eq!(Some("1".as_bytes().into()), tree.get("a")?);
    assert_eq!(None, tree.get("b")?);

    tree.insert("b", "2")?;
    tree.flush()?;
    assert_eq!(0, tree.sealed_memtable_count());
    assert_eq!(2, tree.len()?);

    Ok(())
}

#[test]
fn failed_flush_commit_hands_memtable_back() -> talus::Result<()> {
    let folder = tempfile::tempdir()?;

    {
        let tree = Config::new(&folder).open()?;

        tree.insert("a", "1")?;
        tree.insert("b", "2")?;

        let _guard = fail_at(FailPoint::ManifestAppend, folder.path(), 1);

        tree.flush()?;

        assert_eq!(1, tree.stats().flush_failures());
        assert_eq!(1, tree.stats().flushes_completed());
        assert_eq!(0, tree.sealed_memtable_count());
        assert_eq!(1, tree.segment_count());

        // The segment of the failed commit was deleted
        assert_eq!(1, segment_files(folder.path())?);
    }

    let tree = Config::new(&folder).open()?;
    assert_eq!(1, tree.segment_count());
    assert_eq!(2, tree.len()?);

    Ok(())
}

#[test]
fn failed_major_compaction_keeps_version() -> talus::Result<()> {
    let folder = tempfile::tempdir()?;
    let tree = Config::new(&folder).open()?;

    for round in 0..2 {
        for key in ["a", "b", "c"] {
            tree.insert(key, format!("{round}"))?;
        }
        tree.flush()?;
    }

    assert_eq!(2, tree.segment_count());

    {
        let _guard = fail_at(FailPoint::CompactionWrite, folder.path(), 1);
        assert!(tree.major_compact().is_err());
    }

    assert_eq!(2, tree.segment_count());
    assert_eq!(2, segment_files(folder.path())?);
    assert_eq!(1, tree.live_version_count());
    assert_eq!(Some("1".as_bytes().into()), tree.get("b")?);
    assert!(!tree.is_poisoned());

    // The segments were released again
    tree.major_compact()?;

    assert_eq!(1, tree.segment_count());
    assert_eq!(1, segment_files(folder.path())?);
    assert_eq!(3, tree.len()?);
    assert_eq!(Some("1".as_bytes().into()), tree.get("b")?);

    Ok(())
}

#[test]
fn background_compaction_failure_is_not_fatal() -> talus::Result<()> {
    let folder = tempfile::tempdir()?;

    let tree = Config::new(&folder)
        .l0_threshold(2)
        .max_background_retries(1)
        .open()?;

    let guard = fail_at(FailPoint::CompactionWrite, folder.path(), usize::MAX);

    for round in 0..2 {
        for key in ["a", "b", "c"] {
            tree.insert(key, format!("{round}"))?;
        }
        tree.flush()?;
    }

    // One retry, then compaction pauses until the next flush
    assert!(wait_until(Duration::from_secs(10), || {
        tree.stats().compaction_failures() >= 2
    }));

    assert!(!tree.is_poisoned());
    assert_eq!(2, tree.segment_count());
    assert_eq!(Some("1".as_bytes().into()), tree.get("a")?);

    drop(guard);

    tree.insert("d", "2")?;
    tree.flush()?;

    assert!(wait_until(Duration::from_secs(10), || {
        tree.level_segment_counts().first().copied().unwrap_or_default() < 2
    }));

    assert!(tree.stats().compactions_completed() >= 1);
    assert_eq!(4, tree.len()?);

    Ok(())
}
