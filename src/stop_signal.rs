// Copyright (c) 2024-present, fjall-rs
// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

use crate::sync::atomic::AcqRelAtomicBool;
use std::sync::Arc;

/// Cooperative shutdown flag polled by background work
#[derive(Clone, Debug, Default)]
pub struct StopSignal(Arc<AcqRelAtomicBool>);

impl StopSignal {
    pub fn send(&self) {
        self.0.store(true);
    }

    pub fn is_stopped(&self) -> bool {
        self.0.load()
    }
}
