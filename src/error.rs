//! Error types for cache construction.
//!
//! Hot-path operations never fail with an error: a full bucket is reported
//! as `false` from `insert`, and unknown hashes are `None` or a no-op. The
//! only fallible step is building the cache.

use std::fmt;
use std::io;

/// Errors that can occur while constructing a [`DrawCallCache`].
///
/// [`DrawCallCache`]: crate::DrawCallCache
#[derive(Debug)]
pub enum DrawCacheError {
    /// The backing memory for the slot table could not be mapped.
    Allocation(io::Error),

    /// The requested capacity is zero.
    InvalidCapacity(usize),

    /// The bloom filter must have at least one bit per entry.
    InvalidBloomBits(usize),
}

impl fmt::Display for DrawCacheError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Allocation(e) => write!(f, "failed to allocate slot table: {e}"),
            Self::InvalidCapacity(c) => write!(f, "invalid capacity: {c}"),
            Self::InvalidBloomBits(b) => write!(f, "invalid bloom bits per entry: {b}"),
        }
    }
}

impl std::error::Error for DrawCacheError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Allocation(e) => Some(e),
            _ => None,
        }
    }
}

impl From<io::Error> for DrawCacheError {
    fn from(e: io::Error) -> Self {
        Self::Allocation(e)
    }
}

/// Result type for cache construction.
pub type DrawCacheResult<T> = Result<T, DrawCacheError>;
