// Copyright (c) 2024-present, fjall-rs
// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

use crate::{
    compaction::worker::do_compaction,
    flush::worker::{backoff, run as run_flush},
    poison_dart::PoisonDart,
    supervisor::Supervisor,
};
use std::{sync::Mutex, thread::JoinHandle};

#[derive(Debug)]
pub enum WorkerMessage {
    Flush,
    Compact,
    Close,
}

type WorkerHandle = JoinHandle<crate::Result<()>>;

pub struct WorkerPool {
    thread_handles: Mutex<Vec<WorkerHandle>>,
    pub(crate) rx: flume::Receiver<WorkerMessage>,
    pub(crate) sender: flume::Sender<WorkerMessage>,
}

impl WorkerPool {
    pub fn prepare() -> Self {
        let (sender, rx) = flume::bounded(1_000);

        Self {
            thread_handles: Mutex::default(),
            rx,
            sender,
        }
    }

    pub fn start(
        &self,
        pool_size: usize,
        supervisor: &Supervisor,
        poison_dart: &PoisonDart,
    ) -> crate::Result<()> {
        log::debug!("Starting worker pool with {pool_size} threads");

        let thread_handles = (0..pool_size)
            .map(|i| {
                std::thread::Builder::new()
                    .name("talus:worker".to_string())
                    .spawn({
                        log::trace!("Starting talus worker thread #{i}");

                        let worker_state = WorkerState {
                            pool_size,
                            worker_id: i,
                            rx: self.rx.clone(),
                            supervisor: supervisor.clone(),
                            sender: self.sender.clone(),
                            poison_dart: poison_dart.clone(),
                        };

                        move || loop {
                            match worker_tick(&worker_state) {
                                Ok(should_abort) => {
                                    if should_abort {
                                        log::debug!("Worker #{i} closes because tree is dropping");
                                        return Ok(());
                                    }
                                }
                                Err(e) => {
                                    log::error!("Worker #{i} crashed: {e:?}");
                                    worker_state.poison_dart.poison();
                                    return Err(e);
                                }
                            }
                        }
                    })
            })
            .collect::<Result<_, _>>()?;

        *self.lock_handles() = thread_handles;

        Ok(())
    }

    #[allow(clippy::expect_used)]
    fn lock_handles(&self) -> std::sync::MutexGuard<'_, Vec<WorkerHandle>> {
        self.thread_handles.lock().expect("lock is poisoned")
    }

    /// Asks all workers to close and waits for them to exit.
    pub fn join(&self) {
        let handles = std::mem::take(&mut *self.lock_handles());

        for _ in 0..handles.len() {
            self.sender.send(WorkerMessage::Close).ok();
        }

        for handle in handles {
            match handle.join() {
                Ok(Ok(())) => {}
                Ok(Err(e)) => log::debug!("Worker exited with error: {e:?}"),
                Err(_) => log::error!("Worker panicked"),
            }
        }
    }
}

struct WorkerState {
    pool_size: usize,
    worker_id: usize,
    supervisor: Supervisor,
    rx: flume::Receiver<WorkerMessage>,
    sender: flume::Sender<WorkerMessage>,
    poison_dart: PoisonDart,
}

/// Sleeps for the given duration, but wakes up early on shutdown
fn sleep_unless_stopped(ctx: &WorkerState, duration: std::time::Duration) {
    let step = std::time::Duration::from_millis(10);
    let start = std::time::Instant::now();

    while start.elapsed() < duration && !ctx.supervisor.stop_signal.is_stopped() {
        std::thread::sleep(step);
    }
}

fn worker_tick(ctx: &WorkerState) -> crate::Result<bool> {
    let Ok(item) = ctx.rx.recv() else {
        return Ok(true);
    };

    log::trace!("Worker #{} got message: {item:?}", ctx.worker_id);

    if ctx.supervisor.stop_signal.is_stopped() {
        return Ok(matches!(item, WorkerMessage::Close));
    }

    match item {
        WorkerMessage::Close => {
            return Ok(true);
        }
        WorkerMessage::Flush => {
            if ctx.supervisor.is_poisoned() {
                return Ok(false);
            }

            match run_flush(&ctx.supervisor) {
                Ok(false) => {}
                Ok(true) => {
                    ctx.supervisor.flush_failures_in_row.store(0);

                    for _ in 0..ctx.pool_size {
                        ctx.supervisor.notify_compaction();
                    }

                    if ctx.supervisor.buffers.pending_count() > 0 {
                        ctx.supervisor.notify_flush();
                    }
                }
                Err(e) => {
                    ctx.supervisor.stats.flush_failures.fetch_add(1);
                    let failures = ctx.supervisor.flush_failures_in_row.fetch_add(1) + 1;

                    if failures > ctx.supervisor.config.max_background_retries {
                        log::error!("Flush failed {failures} times in a row, giving up");
                        return Err(e);
                    }

                    let wait = backoff(failures);
                    log::warn!("Flush failed ({failures} in a row), retrying in {wait:?}: {e:?}");

                    sleep_unless_stopped(ctx, wait);
                    ctx.supervisor.notify_flush();
                }
            }
        }
        WorkerMessage::Compact => {
            // NOTE: Let one worker prioritize flushing if there are pending flushes
            //
            // Disable when only 1 worker exists to avoid deadlock
            if ctx.pool_size > 1 && ctx.worker_id == 0 && ctx.supervisor.buffers.pending_count() > 0
            {
                ctx.sender.send(WorkerMessage::Compact).ok();
                return Ok(false);
            }

            match do_compaction(&ctx.supervisor.compaction_options()) {
                Ok(false) => {}
                Ok(true) => {
                    ctx.supervisor.compaction_failures_in_row.store(0);

                    // There may be more work left
                    ctx.supervisor.notify_compaction();
                }
                Err(e) => {
                    ctx.supervisor.stats.compaction_failures.fetch_add(1);
                    let failures = ctx.supervisor.compaction_failures_in_row.fetch_add(1) + 1;

                    if failures > ctx.supervisor.config.max_background_retries {
                        log::error!(
                            "Compaction failed {failures} times in a row, pausing until next flush: {e:?}",
                        );
                        return Ok(false);
                    }

                    let wait = backoff(failures);
                    log::warn!(
                        "Compaction failed ({failures} in a row), retrying in {wait:?}: {e:?}"
                    );

                    sleep_unless_stopped(ctx, wait);
                    ctx.supervisor.notify_compaction();
                }
            }
        }
    }

    Ok(false)
}
