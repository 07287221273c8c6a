// Copyright (c) 2024-present, fjall-rs
// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

//! Test seams of the engine
//!
//! A wait hook runs right before a thread blocks on an instrumented condition
//! variable. Tests use it to inject scheduling delays. In release builds the
//! hook does not exist and waiting does not call into this module.
//!
//! Fail points make I/O steps of the engine fail on purpose. A fail point is
//! armed for a folder, so only trees stored inside that folder are affected.

use crate::{instrumentation::StatCode, sync::atomic::RelaxedAtomicUsize};
use std::{
    path::{Path, PathBuf},
    sync::{Mutex, PoisonError},
};

#[cfg(debug_assertions)]
type WaitHook = std::sync::Arc<dyn Fn(StatCode) + Send + Sync>;

#[cfg(debug_assertions)]
static WAIT_HOOK: std::sync::RwLock<Option<WaitHook>> = std::sync::RwLock::new(None);

/// Installs a hook that runs every time a thread is about to wait.
///
/// Only available in debug builds.
#[cfg(debug_assertions)]
pub fn set_wait_hook<F: Fn(StatCode) + Send + Sync + 'static>(hook: F) {
    let mut lock = WAIT_HOOK
        .write()
        .unwrap_or_else(std::sync::PoisonError::into_inner);
    *lock = Some(std::sync::Arc::new(hook));
}

/// Removes the wait hook.
///
/// Only available in debug builds.
#[cfg(debug_assertions)]
pub fn clear_wait_hook() {
    let mut lock = WAIT_HOOK
        .write()
        .unwrap_or_else(std::sync::PoisonError::into_inner);
    *lock = None;
}

#[cfg(debug_assertions)]
pub(crate) fn before_wait(code: StatCode) {
    // NOTE: Clone the hook out so it does not run under the lock
    let hook = WAIT_HOOK
        .read()
        .unwrap_or_else(std::sync::PoisonError::into_inner)
        .clone();

    if let Some(hook) = hook {
        hook(code);
    }
}

#[cfg(not(debug_assertions))]
#[inline(always)]
pub(crate) fn before_wait(_code: StatCode) {}

/// I/O steps that can be made to fail
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
#[non_exhaustive]
pub enum FailPoint {
    /// Syncing the journals folder after a new journal was created by a rotation
    JournalRotate,

    /// Writing the segment of a flushed memtable
    FlushWrite,

    /// Writing the output segments of a compaction
    CompactionWrite,

    /// Appending a version edit to the manifest
    ManifestAppend,
}

struct ArmedFailure {
    point: FailPoint,
    folder: PathBuf,
    remaining: usize,
}

static ARMED_COUNT: RelaxedAtomicUsize = RelaxedAtomicUsize::new(0);
static FAILURES: Mutex<Vec<ArmedFailure>> = Mutex::new(Vec::new());

/// Disarms its fail point when dropped
#[must_use = "the fail point is disarmed when the guard is dropped"]
pub struct FailGuard {
    point: FailPoint,
    folder: PathBuf,
}

impl Drop for FailGuard {
    fn drop(&mut self) {
        let mut failures = FAILURES.lock().unwrap_or_else(PoisonError::into_inner);
        let before = failures.len();
        failures.retain(|x| !(x.point == self.point && x.folder == self.folder));
        ARMED_COUNT.fetch_sub(before - failures.len());
    }
}

/// Makes the next `times` operations at `point` fail for all files inside `folder`.
///
/// Pass `usize::MAX` to fail until the guard is dropped.
///
/// # Examples
///
/// ```
/// use talus::sync::test_point::{fail_at, FailPoint};
///
/// let folder = tempfile::tempdir()?;
/// let tree = talus::Config::new(&folder).open()?;
///
/// let _guard = fail_at(FailPoint::JournalRotate, &folder, 1);
///
/// tree.insert("a", "a")?;
/// assert!(tree.flush().is_err());
/// tree.flush()?;
/// #
/// # Ok::<(), talus::Error>(())
/// ```
pub fn fail_at<P: AsRef<Path>>(point: FailPoint, folder: P, times: usize) -> FailGuard {
    let folder = folder.as_ref().to_path_buf();

    FAILURES
        .lock()
        .unwrap_or_else(PoisonError::into_inner)
        .push(ArmedFailure {
            point,
            folder: folder.clone(),
            remaining: times,
        });
    ARMED_COUNT.fetch_add(1);

    FailGuard { point, folder }
}

/// Returns an error if `point` is armed for a folder containing `path`.
pub(crate) fn check(point: FailPoint, path: &Path) -> std::io::Result<()> {
    if ARMED_COUNT.load() == 0 {
        return Ok(());
    }

    let mut failures = FAILURES.lock().unwrap_or_else(PoisonError::into_inner);

    let armed = failures
        .iter_mut()
        .find(|x| x.point == point && x.remaining > 0 && path.starts_with(&x.folder));

    if let Some(failure) = armed {
        failure.remaining -= 1;
        log::warn!("Failing {point:?} for {path:?}");
        return Err(std::io::Error::other(format!("fail point {point:?} triggered")));
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_log::test;

    #[test]
    fn fail_point_scoped_to_folder() {
        let _guard = fail_at(FailPoint::FlushWrite, "/talus/a", 2);

        assert!(check(FailPoint::FlushWrite, Path::new("/talus/b/segments/1")).is_ok());
        assert!(check(FailPoint::CompactionWrite, Path::new("/talus/a/segments/1")).is_ok());

        assert!(check(FailPoint::FlushWrite, Path::new("/talus/a/segments/1")).is_err());
        assert!(check(FailPoint::FlushWrite, Path::new("/talus/a/segments/2")).is_err());
        assert!(check(FailPoint::FlushWrite, Path::new("/talus/a/segments/3")).is_ok());
    }

    #[test]
    fn fail_point_disarmed_on_drop() {
        {
            let _guard = fail_at(FailPoint::ManifestAppend, "/talus/c", usize::MAX);
            assert!(check(FailPoint::ManifestAppend, Path::new("/talus/c/MANIFEST-1")).is_err());
            assert!(check(FailPoint::ManifestAppend, Path::new("/talus/c/MANIFEST-1")).is_err());
        }

        assert!(check(FailPoint::ManifestAppend, Path::new("/talus/c/MANIFEST-1")).is_ok());
    }
}
