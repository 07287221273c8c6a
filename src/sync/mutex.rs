// Copyright (c) 2024-present, fjall-rs
// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

use super::test_point;
use crate::instrumentation::{InstrumentationSink, StatCode};
use std::{
    sync::{Arc, Condvar, Mutex, MutexGuard},
    time::{Duration, Instant},
};

/// Mutex that reports the time spent blocked on it
///
/// Time is only measured if a sink is installed and the stat code is
/// not [`StatCode::None`]; otherwise locking is a plain [`Mutex::lock`].
pub struct InstrumentedMutex<T> {
    inner: Mutex<T>,
    stat_code: StatCode,
    sink: Option<Arc<dyn InstrumentationSink>>,
}

impl<T: Default> Default for InstrumentedMutex<T> {
    fn default() -> Self {
        Self::new(T::default())
    }
}

impl<T> InstrumentedMutex<T> {
    /// Creates a mutex that is not instrumented.
    #[must_use]
    pub fn new(value: T) -> Self {
        Self {
            inner: Mutex::new(value),
            stat_code: StatCode::None,
            sink: None,
        }
    }

    /// Creates a mutex that reports lock wait time as `stat_code`.
    #[must_use]
    pub fn with_instrumentation(
        value: T,
        stat_code: StatCode,
        sink: Option<Arc<dyn InstrumentationSink>>,
    ) -> Self {
        Self {
            inner: Mutex::new(value),
            stat_code,
            sink,
        }
    }

    fn active_sink(&self) -> Option<&Arc<dyn InstrumentationSink>> {
        if self.stat_code == StatCode::None {
            None
        } else {
            self.sink.as_ref()
        }
    }

    /// Acquires the lock, blocking until it is available.
    ///
    /// # Panics
    ///
    /// Panics if another thread panicked while holding the lock.
    #[allow(clippy::expect_used)]
    pub fn lock(&self) -> MutexGuard<'_, T> {
        if let Some(sink) = self.active_sink() {
            let start = Instant::now();
            let guard = self.inner.lock().expect("lock is poisoned");
            sink.record_duration(self.stat_code, start.elapsed());
            guard
        } else {
            self.inner.lock().expect("lock is poisoned")
        }
    }

    /// Acquires the lock if it is free.
    ///
    /// # Panics
    ///
    /// Panics if another thread panicked while holding the lock.
    #[allow(clippy::expect_used)]
    pub fn try_lock(&self) -> Option<MutexGuard<'_, T>> {
        match self.inner.try_lock() {
            Ok(guard) => Some(guard),
            Err(std::sync::TryLockError::WouldBlock) => None,
            Err(std::sync::TryLockError::Poisoned(_)) => panic!("lock is poisoned"),
        }
    }
}

/// Condition variable that reports the time spent waiting on it
pub struct InstrumentedCondvar {
    inner: Condvar,
    stat_code: StatCode,
    sink: Option<Arc<dyn InstrumentationSink>>,
}

impl Default for InstrumentedCondvar {
    fn default() -> Self {
        Self::new()
    }
}

impl InstrumentedCondvar {
    /// Creates a condition variable that is not instrumented.
    #[must_use]
    pub fn new() -> Self {
        Self {
            inner: Condvar::new(),
            stat_code: StatCode::None,
            sink: None,
        }
    }

    /// Creates a condition variable that reports wait time as `stat_code`.
    #[must_use]
    pub fn with_instrumentation(
        stat_code: StatCode,
        sink: Option<Arc<dyn InstrumentationSink>>,
    ) -> Self {
        Self {
            inner: Condvar::new(),
            stat_code,
            sink,
        }
    }

    fn active_sink(&self) -> Option<&Arc<dyn InstrumentationSink>> {
        if self.stat_code == StatCode::None {
            None
        } else {
            self.sink.as_ref()
        }
    }

    /// Blocks until notified. Spurious wakeups are possible.
    ///
    /// # Panics
    ///
    /// Panics if another thread panicked while holding the lock.
    #[allow(clippy::expect_used)]
    pub fn wait<'a, T>(&self, guard: MutexGuard<'a, T>) -> MutexGuard<'a, T> {
        test_point::before_wait(self.stat_code);

        if let Some(sink) = self.active_sink() {
            let start = Instant::now();
            let guard = self.inner.wait(guard).expect("lock is poisoned");
            sink.record_duration(self.stat_code, start.elapsed());
            guard
        } else {
            self.inner.wait(guard).expect("lock is poisoned")
        }
    }

    /// Blocks until notified or until `timeout` elapsed.
    ///
    /// Returns `true` as second element if the wait timed out.
    ///
    /// # Panics
    ///
    /// Panics if another thread panicked while holding the lock.
    #[allow(clippy::expect_used)]
    pub fn wait_timeout<'a, T>(
        &self,
        guard: MutexGuard<'a, T>,
        timeout: Duration,
    ) -> (MutexGuard<'a, T>, bool) {
        test_point::before_wait(self.stat_code);

        let start = self.active_sink().map(|_| Instant::now());

        let (guard, result) = self
            .inner
            .wait_timeout(guard, timeout)
            .expect("lock is poisoned");

        if let (Some(start), Some(sink)) = (start, self.active_sink()) {
            sink.record_duration(self.stat_code, start.elapsed());
        }

        (guard, result.timed_out())
    }

    /// Wakes up one waiting thread.
    pub fn notify_one(&self) {
        self.inner.notify_one();
    }

    /// Wakes up all waiting threads.
    pub fn notify_all(&self) {
        self.inner.notify_all();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sync::atomic::RelaxedAtomicU64;
    use test_log::test;

    #[derive(Default)]
    struct CountingSink {
        calls: RelaxedAtomicU64,
    }

    impl InstrumentationSink for CountingSink {
        fn record_duration(&self, code: StatCode, _duration: Duration) {
            assert_eq!(StatCode::Custom(1), code);
            self.calls.fetch_add(1);
        }
    }

    #[test]
    fn mutex_without_sink() {
        let mutex = InstrumentedMutex::new(5);
        *mutex.lock() += 1;
        assert_eq!(6, *mutex.lock());
    }

    #[test]
    fn mutex_reports_wait_time() {
        let sink = Arc::new(CountingSink::default());
        let mutex =
            InstrumentedMutex::with_instrumentation(0, StatCode::Custom(1), Some(sink.clone()));

        *mutex.lock() += 1;
        *mutex.lock() += 1;

        assert_eq!(2, *mutex.lock());
        assert_eq!(3, sink.calls.load());
    }

    #[test]
    fn mutex_none_code_is_not_timed() {
        let sink = Arc::new(CountingSink::default());
        let mutex = InstrumentedMutex::with_instrumentation(0, StatCode::None, Some(sink.clone()));
        *mutex.lock() += 1;
        assert_eq!(0, sink.calls.load());
    }

    #[test]
    fn condvar_wait_timeout() {
        let mutex = InstrumentedMutex::new(());
        let condvar = InstrumentedCondvar::new();

        let guard = mutex.lock();
        let (_guard, timed_out) = condvar.wait_timeout(guard, Duration::from_millis(5));
        assert!(timed_out);
    }

    #[test]
    fn condvar_signal_all() {
        let state = Arc::new((InstrumentedMutex::new(false), InstrumentedCondvar::new()));

        let waiters = (0..4)
            .map(|_| {
                let state = state.clone();
                std::thread::spawn(move || {
                    let (mutex, condvar) = &*state;
                    let mut guard = mutex.lock();
                    while !*guard {
                        guard = condvar.wait(guard);
                    }
                })
            })
            .collect::<Vec<_>>();

        {
            let (mutex, condvar) = &*state;
            *mutex.lock() = true;
            condvar.notify_all();
        }

        for waiter in waiters {
            waiter.join().expect("should join");
        }
    }

    #[test]
    #[cfg(debug_assertions)]
    fn condvar_wait_hook_delays() {
        let hits = Arc::new(RelaxedAtomicU64::default());

        {
            let hits = hits.clone();
            test_point::set_wait_hook(move |code| {
                if code == StatCode::Custom(77) {
                    hits.fetch_add(1);
                    std::thread::sleep(Duration::from_millis(1));
                }
            });
        }

        let mutex = InstrumentedMutex::new(());
        let condvar = InstrumentedCondvar::with_instrumentation(StatCode::Custom(77), None);

        let guard = mutex.lock();
        let (guard, _) = condvar.wait_timeout(guard, Duration::from_millis(1));
        let _ = condvar.wait_timeout(guard, Duration::from_millis(1));

        test_point::clear_wait_hook();

        assert_eq!(2, hits.load());
    }
}
