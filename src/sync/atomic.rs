// Copyright (c) 2024-present, fjall-rs
// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

//! Atomics with their memory ordering fixed by type.
//!
//! [`RelaxedAtomicU64`] and friends only ever use [`Ordering::Relaxed`]; they are
//! meant for counters and flags where no other memory is published together with
//! the value.
//!
//! [`AcqRelAtomicU64`] and friends load with [`Ordering::Acquire`], store with
//! [`Ordering::Release`] and use [`Ordering::AcqRel`] for read-modify-write
//! operations. Use these whenever a thread publishes data that another thread
//! must fully observe once it sees the new value.
//!
//! Neither kind offers sequentially consistent operations.

use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};

macro_rules! atomic_common {
    ($name:ident, $ty:ty, $atomic:ty, $load:expr, $store:expr, $rmw:expr, $fail:expr) => {
        impl $name {
            /// Creates a new atomic.
            #[must_use]
            pub const fn new(value: $ty) -> Self {
                Self(<$atomic>::new(value))
            }

            /// Loads the value.
            #[must_use]
            pub fn load(&self) -> $ty {
                self.0.load($load)
            }

            /// Stores a value.
            pub fn store(&self, value: $ty) {
                self.0.store(value, $store);
            }

            /// Stores a value, returning the previous one.
            pub fn swap(&self, value: $ty) -> $ty {
                self.0.swap(value, $rmw)
            }

            /// Stores `new` if the value is `current`.
            ///
            /// May fail spuriously, so use in a loop.
            ///
            /// # Errors
            ///
            /// Returns the observed value if it was not `current`.
            pub fn compare_exchange_weak(&self, current: $ty, new: $ty) -> Result<$ty, $ty> {
                self.0.compare_exchange_weak(current, new, $rmw, $fail)
            }

            /// Stores `new` if the value is `current`.
            ///
            /// # Errors
            ///
            /// Returns the observed value if it was not `current`.
            pub fn compare_exchange(&self, current: $ty, new: $ty) -> Result<$ty, $ty> {
                self.0.compare_exchange(current, new, $rmw, $fail)
            }

            /// Bitwise "and", returning the previous value.
            pub fn fetch_and(&self, value: $ty) -> $ty {
                self.0.fetch_and(value, $rmw)
            }

            /// Bitwise "or", returning the previous value.
            pub fn fetch_or(&self, value: $ty) -> $ty {
                self.0.fetch_or(value, $rmw)
            }

            /// Bitwise "xor", returning the previous value.
            pub fn fetch_xor(&self, value: $ty) -> $ty {
                self.0.fetch_xor(value, $rmw)
            }
        }

        impl std::fmt::Debug for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                write!(f, "{:?}", self.load())
            }
        }
    };
}

macro_rules! atomic_integer {
    ($name:ident, $ty:ty, $rmw:expr) => {
        impl $name {
            /// Adds to the value (wrapping), returning the previous value.
            pub fn fetch_add(&self, value: $ty) -> $ty {
                self.0.fetch_add(value, $rmw)
            }

            /// Subtracts from the value (wrapping), returning the previous value.
            pub fn fetch_sub(&self, value: $ty) -> $ty {
                self.0.fetch_sub(value, $rmw)
            }

            /// Stores the maximum of the current and given value,
            /// returning the previous value.
            pub fn fetch_max(&self, value: $ty) -> $ty {
                self.0.fetch_max(value, $rmw)
            }
        }
    };
}

macro_rules! relaxed_atomic {
    ($(#[$doc:meta])* $name:ident, $ty:ty, $atomic:ty) => {
        $(#[$doc])*
        #[derive(Default)]
        pub struct $name($atomic);

        atomic_common!(
            $name,
            $ty,
            $atomic,
            Ordering::Relaxed,
            Ordering::Relaxed,
            Ordering::Relaxed,
            Ordering::Relaxed
        );
    };
}

macro_rules! acq_rel_atomic {
    ($(#[$doc:meta])* $name:ident, $ty:ty, $atomic:ty) => {
        $(#[$doc])*
        #[derive(Default)]
        pub struct $name($atomic);

        atomic_common!(
            $name,
            $ty,
            $atomic,
            Ordering::Acquire,
            Ordering::Release,
            Ordering::AcqRel,
            Ordering::Acquire
        );
    };
}

relaxed_atomic!(
    /// `u64` with relaxed ordering only
    RelaxedAtomicU64,
    u64,
    AtomicU64
);
atomic_integer!(RelaxedAtomicU64, u64, Ordering::Relaxed);

relaxed_atomic!(
    /// `usize` with relaxed ordering only
    RelaxedAtomicUsize,
    usize,
    AtomicUsize
);
atomic_integer!(RelaxedAtomicUsize, usize, Ordering::Relaxed);

relaxed_atomic!(
    /// `bool` with relaxed ordering only
    RelaxedAtomicBool,
    bool,
    AtomicBool
);

acq_rel_atomic!(
    /// `u64` with acquire loads, release stores and acquire-release updates
    AcqRelAtomicU64,
    u64,
    AtomicU64
);
atomic_integer!(AcqRelAtomicU64, u64, Ordering::AcqRel);

acq_rel_atomic!(
    /// `usize` with acquire loads, release stores and acquire-release updates
    AcqRelAtomicUsize,
    usize,
    AtomicUsize
);
atomic_integer!(AcqRelAtomicUsize, usize, Ordering::AcqRel);

acq_rel_atomic!(
    /// `bool` with acquire loads, release stores and acquire-release updates
    AcqRelAtomicBool,
    bool,
    AtomicBool
);
