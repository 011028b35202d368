//! Synchronization primitives with optional loom support.
//!
//! The bloom filter words, statistics counters, and frame clock use these
//! types so they can be model checked under loom. Slot memory does not: a
//! slot is a view over raw mmap'd memory and always uses std atomics.

#[cfg(not(feature = "loom"))]
pub use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

#[cfg(feature = "loom")]
pub use loom::sync::atomic::{AtomicBool, AtomicU64, Ordering};
