// Copyright (c) 2024-present, fjall-rs
// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

//! Synchronization primitives used throughout the engine

pub mod atomic;
mod mutex;
pub mod test_point;

pub use mutex::{InstrumentedCondvar, InstrumentedMutex};
