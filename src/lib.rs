//! drawcache: a lock-free cache of draw-call metadata for real-time renderers.
//!
//! A render loop fingerprints each draw call from the integers it binds
//! (shader, VAO, buffers, counts) and asks the cache whether it has seen it
//! before. Lookups cost a ring probe, three bloom bit tests, and one
//! vectorized bucket scan. Usage statistics gathered along the way drive the
//! HOT, COLD, and INDIRECT_READY classifications that the graphics layer
//! uses to pick a submission path.
//!
//! - **Hashing**: [`compute_hash`] / [`DrawCall::hash`]
//! - **Storage**: fixed-capacity slot table in one off-heap mapping, one
//!   64-byte slot per entry, 8 slots per bucket
//! - **Prefilter**: [`BloomFilter`] over every inserted hash
//! - **Accelerator**: per-thread [`LookupRing`] of recent hash to slot pairs
//! - **Cache**: [`DrawCallCache`] and its [`DrawCacheBuilder`]
//! - **Statistics**: [`Statistics`] snapshots of [`CacheCounters`]
//!
//! # Architecture
//!
//! ```text
//!          DrawCall --hash--> u64
//!                              |
//!                              v
//!                   +---------------------+
//!                   |  LookupRing (per    |  hit: re-check slot hash
//!                   |  thread, 64 pairs)  |-----------------------+
//!                   +---------------------+                       |
//!                              | miss                             |
//!                              v                                  |
//!                   +---------------------+                       |
//!                   |    BloomFilter      |--> definitely absent  |
//!                   +---------------------+                       |
//!                              | maybe                            |
//!                              v                                  v
//!   +-----------------------------------------------------------------+
//!   | slot table (mmap)  bucket = hash & mask, 8 x 64B slots/bucket   |
//!   |   claim: CAS empty/tombstone -> hash                            |
//!   |   full:  CAS oldest victim -> hash                              |
//!   +-----------------------------------------------------------------+
//! ```
//!
//! # Example
//!
//! ```ignore
//! use drawcache::{DrawCall, DrawCallCache, EntryFlags};
//!
//! let cache = DrawCallCache::builder().capacity(1 << 16).build()?;
//!
//! let draw = DrawCall {
//!     shader_id: 12,
//!     vao_id: 4,
//!     vertex_count: 1024,
//!     index_count: 3072,
//!     flags: EntryFlags::INDEXED,
//!     ..Default::default()
//! };
//!
//! let hash = draw.hash();
//! match cache.lookup(hash) {
//!     Some(entry) if entry.is_indirect_ready() => { /* batch it */ }
//!     Some(_) => {}
//!     None => {
//!         cache.insert(hash, &draw);
//!     }
//! }
//!
//! // once per frame
//! cache.advance_frame();
//! cache.mark_cold_entries(600);
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

mod sync;

mod config;
mod error;
mod hash;

mod entry;
mod region;
mod table;

mod accelerator;
mod bloom;
mod metrics;

mod cache;

pub use config::{
    BLOOM_HASHES, BUCKET_SIZE, DEFAULT_BLOOM_BITS_PER_ENTRY, DEFAULT_CAPACITY,
    DEFAULT_HOT_THRESHOLD, DEFAULT_INDIRECT_THRESHOLD, DrawCacheConfig, LOOKUP_RING_SIZE,
    MAX_CAPACITY, MIN_CAPACITY, SLOT_SIZE, SLOTS_PER_BUCKET, effective_capacity,
};
pub use error::{DrawCacheError, DrawCacheResult};
pub use hash::{DrawCall, EMPTY_HASH, TOMBSTONE_HASH, compute_hash, is_reserved};

pub use entry::{Entry, EntryFlags};
pub use region::{HugepageSize, PageSize, Region};

pub use accelerator::LookupRing;
pub use bloom::BloomFilter;
pub use metrics::{CacheCounters, Statistics};

pub use cache::{DrawCacheBuilder, DrawCallCache};
