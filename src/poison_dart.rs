// Copyright (c) 2024-present, fjall-rs
// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

use crate::sync::atomic::AcqRelAtomicBool;
use std::sync::Arc;

pub type PoisonSignal = Arc<AcqRelAtomicBool>;

/// RAII guard to catch panics in background workers
/// and halt writes to the tree
#[derive(Clone)]
pub struct PoisonDart {
    name: &'static str,
    signal: PoisonSignal,
}

impl PoisonDart {
    pub fn new(name: &'static str, signal: PoisonSignal) -> Self {
        Self { name, signal }
    }

    pub fn poison(&self) {
        log::error!("Halting writes, worker {:?} hit an unrecoverable failure", self.name);
        self.signal.store(true);
    }
}

impl Drop for PoisonDart {
    fn drop(&mut self) {
        if std::thread::panicking() {
            log::error!(
                "Poisoning tree because of panic in background worker {:?}",
                self.name
            );
            self.signal.store(true);
        }
    }
}
