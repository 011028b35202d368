//! Sizing constants and cache configuration.

use crate::region::HugepageSize;
use serde::Deserialize;

/// Size of one slot in bytes (one cache line).
pub const SLOT_SIZE: usize = 64;

/// Number of slots per bucket.
pub const SLOTS_PER_BUCKET: usize = 8;

/// Size of one bucket in bytes.
pub const BUCKET_SIZE: usize = SLOT_SIZE * SLOTS_PER_BUCKET;

/// Default capacity (entries).
pub const DEFAULT_CAPACITY: usize = 16 * 1024;

/// Smallest capacity a cache is built with. Smaller requests are raised.
pub const MIN_CAPACITY: usize = 1024;

/// Largest capacity a cache is built with (1GB of slots).
pub const MAX_CAPACITY: usize = 1 << 24;

/// Default bloom filter bits per entry (~0.8% false positives with k=3).
pub const DEFAULT_BLOOM_BITS_PER_ENTRY: usize = 10;

/// Number of bit indices derived per hash in the bloom filter.
pub const BLOOM_HASHES: u64 = 3;

/// Hit count above which `record_execution` flags an entry HOT.
pub const DEFAULT_HOT_THRESHOLD: i32 = 100;

/// Hit count at which an entry becomes eligible for indirect draws.
pub const DEFAULT_INDIRECT_THRESHOLD: i32 = 10;

/// Entries in each per-thread lookup ring. Must be a power of two.
pub const LOOKUP_RING_SIZE: usize = 64;

const _: () = assert!(LOOKUP_RING_SIZE.is_power_of_two());
const _: () = assert!(MIN_CAPACITY.is_power_of_two() && MAX_CAPACITY.is_power_of_two());
const _: () = assert!(MIN_CAPACITY >= SLOTS_PER_BUCKET);

/// Configuration for a [`DrawCallCache`].
///
/// Every field has a default, so a TOML table may name only the fields it
/// wants to override.
///
/// [`DrawCallCache`]: crate::DrawCallCache
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct DrawCacheConfig {
    /// Requested number of entries. Rounded up to a power of two and clamped
    /// to [`MIN_CAPACITY`, `MAX_CAPACITY`].
    pub capacity: usize,
    /// Bloom filter bits per entry.
    pub bloom_bits_per_entry: usize,
    /// `record_execution` sets HOT once `hit_count` exceeds this.
    pub hot_threshold: i32,
    /// `indirect_ready_entries` flags entries with at least this many hits.
    pub indirect_threshold: i32,
    /// Hugepage preference for the slot table.
    pub hugepage_size: HugepageSize,
    /// NUMA node to bind the slot table to (Linux only).
    pub numa_node: Option<u32>,
}

impl Default for DrawCacheConfig {
    fn default() -> Self {
        Self {
            capacity: DEFAULT_CAPACITY,
            bloom_bits_per_entry: DEFAULT_BLOOM_BITS_PER_ENTRY,
            hot_threshold: DEFAULT_HOT_THRESHOLD,
            indirect_threshold: DEFAULT_INDIRECT_THRESHOLD,
            hugepage_size: HugepageSize::None,
            numa_node: None,
        }
    }
}

impl DrawCacheConfig {
    /// The capacity the slot table is actually built with.
    pub fn effective_capacity(&self) -> usize {
        effective_capacity(self.capacity)
    }

    /// Number of buckets for the effective capacity.
    pub fn num_buckets(&self) -> usize {
        self.effective_capacity() / SLOTS_PER_BUCKET
    }

    /// Bytes of slot memory for the effective capacity.
    pub fn table_bytes(&self) -> usize {
        self.effective_capacity() * SLOT_SIZE
    }
}

/// Round `requested` up to a power of two and clamp it to the supported range.
#[inline]
pub fn effective_capacity(requested: usize) -> usize {
    requested
        .checked_next_power_of_two()
        .unwrap_or(MAX_CAPACITY)
        .clamp(MIN_CAPACITY, MAX_CAPACITY)
}
