//! The draw-call cache.
//!
//! [`DrawCallCache`] ties the pieces together:
//!
//! - lookups go through the calling thread's [`LookupRing`], then the
//!   [`BloomFilter`], then a vectorized scan of one bucket
//! - inserts claim a free slot with a CAS on its hash, or evict the least
//!   recently seen entry of a full bucket
//! - bulk scans sweep every slot to reclassify entries as HOT, COLD, or
//!   INDIRECT_READY
//!
//! Nothing blocks. Once [`close`] has been called every operation becomes a
//! no-op, and the slot memory is unmapped by [`release`] or on drop.
//!
//! [`close`]: DrawCallCache::close
//! [`release`]: DrawCallCache::release

use crate::accelerator::LookupRing;
use crate::bloom::BloomFilter;
use crate::config::{DrawCacheConfig, SLOTS_PER_BUCKET};
use crate::entry::{Entry, EntryFlags, SlotFields};
use crate::error::{DrawCacheError, DrawCacheResult};
use crate::hash::{DrawCall, TOMBSTONE_HASH, is_reserved};
use crate::metrics::{CacheCounters, Statistics};
use crate::region::HugepageSize;
use crate::sync::{AtomicBool, AtomicU64, Ordering};
use crate::table::{Claim, SlotTable};
use crossbeam_utils::CachePadded;
use std::cell::RefCell;
use thread_local::ThreadLocal;
use tracing::{debug, info};

/// Attempts at overwriting an eviction victim before giving up.
const EVICTION_ATTEMPTS: usize = 2;

/// Memory that lives until release.
struct Storage {
    table: SlotTable,
    bloom: BloomFilter,
}

/// A concurrent, fixed-capacity cache of draw-call metadata.
///
/// All operations take `&self` and may be called from any number of threads.
/// Wrap the cache in an `Arc` to share it.
///
/// # Example
///
/// ```ignore
/// use drawcache::{DrawCall, DrawCallCache, EntryFlags};
///
/// let cache = DrawCallCache::new(16384)?;
/// let draw = DrawCall {
///     shader_id: 3,
///     vao_id: 7,
///     vertex_count: 36,
///     flags: EntryFlags::STATIC,
///     ..Default::default()
/// };
///
/// let hash = draw.hash();
/// if cache.lookup(hash).is_none() {
///     cache.insert(hash, &draw);
/// }
/// cache.advance_frame();
/// ```
pub struct DrawCallCache {
    storage: Option<Storage>,
    rings: ThreadLocal<RefCell<LookupRing>>,
    counters: CacheCounters,
    frame: CachePadded<AtomicU64>,
    epoch: CachePadded<AtomicU64>,
    closed: AtomicBool,
    capacity: usize,
    hot_threshold: i32,
    indirect_threshold: i32,
}

impl DrawCallCache {
    /// Create a cache with default settings and the given capacity.
    ///
    /// The capacity is rounded up to a power of two and clamped to
    /// [`MIN_CAPACITY`, `MAX_CAPACITY`].
    ///
    /// [`MIN_CAPACITY`]: crate::MIN_CAPACITY
    /// [`MAX_CAPACITY`]: crate::MAX_CAPACITY
    pub fn new(capacity: usize) -> DrawCacheResult<Self> {
        Self::builder().capacity(capacity).build()
    }

    /// Create a builder for configuring a cache.
    pub fn builder() -> DrawCacheBuilder {
        DrawCacheBuilder::new()
    }

    fn from_config(config: &DrawCacheConfig) -> DrawCacheResult<Self> {
        let capacity = config.effective_capacity();
        let table = SlotTable::new(capacity, config.hugepage_size, config.numa_node)?;
        let bloom = BloomFilter::new(capacity, config.bloom_bits_per_entry);
        debug_assert_eq!(table.capacity(), capacity);

        info!(
            capacity,
            buckets = table.num_buckets(),
            table_bytes = table.mapped_bytes(),
            bloom_bits = bloom.bits(),
            "draw call cache ready"
        );

        Ok(Self {
            storage: Some(Storage { table, bloom }),
            rings: ThreadLocal::new(),
            counters: CacheCounters::new(),
            frame: CachePadded::new(AtomicU64::new(0)),
            epoch: CachePadded::new(AtomicU64::new(0)),
            closed: AtomicBool::new(false),
            capacity,
            hot_threshold: config.hot_threshold,
            indirect_threshold: config.indirect_threshold,
        })
    }

    /// Storage, unless the cache has been closed.
    #[inline(always)]
    fn live(&self) -> Option<&Storage> {
        if self.closed.load(Ordering::Acquire) {
            None
        } else {
            self.storage.as_ref()
        }
    }

    #[inline(always)]
    fn ring(&self) -> &RefCell<LookupRing> {
        self.rings.get_or_default()
    }

    /// Slot index currently holding `hash`, without touching the entry.
    ///
    /// A ring hit is trusted only if the slot still holds `hash`.
    #[inline]
    fn resolve(&self, storage: &Storage, hash: u64) -> Option<usize> {
        if is_reserved(hash) {
            return None;
        }

        let ring = self.ring();
        let cached = ring.borrow().get(hash);
        if let Some(index) = cached {
            let index = index as usize;
            if storage.table.slot(index).load_hash() == hash {
                return Some(index);
            }
            ring.borrow_mut().invalidate(hash);
        }

        if !storage.bloom.might_contain(hash) {
            return None;
        }

        let index = storage.table.find(hash)?;
        ring.borrow_mut().put(hash, index as u32);
        Some(index)
    }

    // ---------------------------------------------------------------------
    // Lookup and insert
    // ---------------------------------------------------------------------

    /// Look up an entry and count the use.
    ///
    /// On a hit the entry's `hit_count` is incremented and its
    /// `last_seen_frame` raised to the current frame before the snapshot is
    /// taken.
    #[inline]
    pub fn lookup(&self, hash: u64) -> Option<Entry> {
        let storage = self.live()?;

        match self.resolve(storage, hash) {
            Some(index) => {
                let slot = storage.table.slot(index);
                slot.touch(self.current_frame());
                self.counters.record_lookup(true);
                Some(slot.snapshot(hash))
            }
            None => {
                self.counters.record_lookup(false);
                None
            }
        }
    }

    /// True if an entry for `hash` is present. Does not count as a use and
    /// does not update statistics.
    #[inline]
    pub fn contains(&self, hash: u64) -> bool {
        self.live()
            .is_some_and(|storage| self.resolve(storage, hash).is_some())
    }

    /// Insert a new entry for `hash`.
    ///
    /// Returns `false` if an entry for `hash` already exists, the cache is
    /// closed, or the bucket is full and the eviction victim kept changing
    /// under us. Concurrent inserts of the same new hash may both succeed.
    pub fn insert(&self, hash: u64, draw: &DrawCall) -> bool {
        let Some(storage) = self.live() else {
            return false;
        };
        if is_reserved(hash) || self.resolve(storage, hash).is_some() {
            return false;
        }

        let fields = SlotFields::from(draw);
        let frame = self.current_frame();

        // set bloom bits first so the hash is never visible without them
        storage.bloom.add(hash);

        match storage.table.claim(hash) {
            Claim::Claimed { index, lost_races } => {
                storage.table.write(index, &fields, frame);
                self.counters.record_collisions(lost_races as u64);
                self.counters.record_insert(true);
                self.ring().borrow_mut().put(hash, index as u32);
                true
            }
            Claim::Full { lost_races } => {
                self.counters.record_collisions(lost_races as u64 + 1);
                self.evict_and_insert(storage, hash, &fields, frame)
            }
        }
    }

    /// Replace the least recently seen entry in `hash`'s bucket.
    fn evict_and_insert(
        &self,
        storage: &Storage,
        hash: u64,
        fields: &SlotFields,
        frame: u64,
    ) -> bool {
        for _ in 0..EVICTION_ATTEMPTS {
            let (index, victim) = storage.table.oldest(hash);

            if storage.table.replace(index, victim, hash) {
                storage.table.write(index, fields, frame);

                let mut ring = self.ring().borrow_mut();
                if is_reserved(victim) {
                    // a slot freed up since the claim attempt
                    self.counters.record_insert(true);
                } else {
                    ring.invalidate(victim);
                    self.counters.record_insert(false);
                }
                ring.put(hash, index as u32);
                return true;
            }

            self.counters.record_collisions(1);
        }

        false
    }

    /// Tombstone the entry for `hash`. Returns `true` if this call removed it.
    ///
    /// The slot is reclaimed by a later insert into the same bucket. The
    /// hash's bloom bits stay set.
    pub fn invalidate(&self, hash: u64) -> bool {
        let Some(storage) = self.live() else {
            return false;
        };
        let Some(index) = self.resolve(storage, hash) else {
            return false;
        };

        let slot = storage.table.slot(index);
        let observed = slot.flags();
        if !storage.table.replace(index, hash, TOMBSTONE_HASH) {
            return false;
        }

        slot.retire(observed);
        self.counters.record_invalidate();
        self.ring().borrow_mut().invalidate(hash);
        true
    }

    /// Add one execution of `nanos` to the entry for `hash`.
    ///
    /// Each execution counts as a use. Once `hit_count` passes the hot
    /// threshold the entry is flagged HOT (and no longer COLD). Unknown
    /// hashes are ignored.
    pub fn record_execution(&self, hash: u64, nanos: u64) {
        let Some(storage) = self.live() else {
            return;
        };
        let Some(index) = self.resolve(storage, hash) else {
            return;
        };

        let slot = storage.table.slot(index);
        slot.total_execution_nanos.fetch_add(nanos, Ordering::AcqRel);
        let hits = slot.touch(self.current_frame());

        if hits > self.hot_threshold {
            slot.set_flags(EntryFlags::HOT);
            slot.clear_flags(EntryFlags::COLD);
        }
    }

    // ---------------------------------------------------------------------
    // Frames
    // ---------------------------------------------------------------------

    /// Move to the next frame and return its number.
    pub fn advance_frame(&self) -> u64 {
        if self.live().is_none() {
            return self.current_frame();
        }
        self.epoch.fetch_add(1, Ordering::AcqRel);
        self.frame.fetch_add(1, Ordering::AcqRel) + 1
    }

    /// The current frame number. Starts at 0.
    #[inline]
    pub fn current_frame(&self) -> u64 {
        self.frame.load(Ordering::Acquire)
    }

    /// The current epoch. Advances with the frame counter.
    pub fn current_epoch(&self) -> u64 {
        self.epoch.load(Ordering::Acquire)
    }

    // ---------------------------------------------------------------------
    // Bulk scans
    // ---------------------------------------------------------------------

    /// Snapshots of every entry flagged HOT.
    pub fn hot_entries(&self) -> Vec<Entry> {
        let Some(storage) = self.live() else {
            return Vec::new();
        };

        let mut entries = Vec::new();
        for slot in storage.table.slots() {
            let hash = slot.load_hash();
            if !is_reserved(hash) && slot.flags().contains(EntryFlags::HOT) {
                entries.push(slot.snapshot(hash));
            }
        }

        debug!(count = entries.len(), "hot entry scan");
        entries
    }

    /// Flag every entry used at least the indirect threshold number of times
    /// as INDIRECT_READY, and return snapshots of them.
    pub fn indirect_ready_entries(&self) -> Vec<Entry> {
        let Some(storage) = self.live() else {
            return Vec::new();
        };

        let mut entries = Vec::new();
        for slot in storage.table.slots() {
            let hash = slot.load_hash();
            if is_reserved(hash) {
                continue;
            }
            if slot.hit_count.load(Ordering::Acquire) >= self.indirect_threshold {
                slot.set_flags(EntryFlags::INDIRECT_READY);
                entries.push(slot.snapshot(hash));
            }
        }

        debug!(count = entries.len(), "indirect ready scan");
        entries
    }

    /// Flag entries not seen for more than `frame_threshold` frames as COLD
    /// (clearing HOT). Returns how many entries matched.
    pub fn mark_cold_entries(&self, frame_threshold: u64) -> usize {
        let Some(storage) = self.live() else {
            return 0;
        };

        let now = self.current_frame();
        let mut marked = 0;
        for slot in storage.table.slots() {
            if is_reserved(slot.load_hash()) {
                continue;
            }
            let last_seen = slot.last_seen_frame.load(Ordering::Acquire);
            if now.saturating_sub(last_seen) > frame_threshold {
                slot.set_flags(EntryFlags::COLD);
                slot.clear_flags(EntryFlags::HOT);
                marked += 1;
            }
        }

        debug!(marked, frame = now, frame_threshold, "cold entry scan");
        marked
    }

    // ---------------------------------------------------------------------
    // Lifecycle
    // ---------------------------------------------------------------------

    /// Remove every entry and reset statistics.
    ///
    /// The bloom filter and the calling thread's lookup ring are cleared.
    /// Other threads' rings are left stale and re-validated on use. The frame
    /// counter keeps running. Inserts racing with `clear` may survive it.
    pub fn clear(&self) {
        let Some(storage) = self.live() else {
            return;
        };

        storage.table.reset();
        storage.bloom.clear();
        self.ring().borrow_mut().clear();
        self.counters.reset();

        info!(capacity = self.capacity, "draw call cache cleared");
    }

    /// Stop serving requests. Returns `true` if this call closed the cache.
    ///
    /// Idempotent and callable from any thread. Memory stays mapped until
    /// [`release`](Self::release) or drop.
    pub fn close(&self) -> bool {
        let closed_now = !self.closed.swap(true, Ordering::AcqRel);
        if closed_now {
            info!(
                entries = self.counters.live_entries(),
                frame = self.current_frame(),
                "draw call cache closed"
            );
        }
        closed_now
    }

    /// Close the cache and unmap its memory. Idempotent.
    pub fn release(&mut self) {
        self.close();
        if let Some(storage) = self.storage.take() {
            let bytes = storage.table.mapped_bytes();
            drop(storage);
            debug!(bytes, "draw call cache memory released");
        }
    }

    /// True once [`close`](Self::close) has been called.
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    // ---------------------------------------------------------------------
    // Size and statistics
    // ---------------------------------------------------------------------

    /// Number of live entries.
    pub fn len(&self) -> usize {
        self.counters.live_entries() as usize
    }

    /// True if there are no live entries.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Number of slots.
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Number of buckets.
    pub fn num_buckets(&self) -> usize {
        self.capacity / SLOTS_PER_BUCKET
    }

    /// Snapshot of the counters.
    pub fn statistics(&self) -> Statistics {
        self.counters.snapshot(self.capacity, self.current_frame())
    }
}

impl Drop for DrawCallCache {
    fn drop(&mut self) {
        if self.storage.is_some() {
            debug!("draw call cache dropped without release");
            self.release();
        }
    }
}

impl std::fmt::Debug for DrawCallCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DrawCallCache")
            .field("capacity", &self.capacity)
            .field("len", &self.len())
            .field("frame", &self.current_frame())
            .field("closed", &self.is_closed())
            .finish()
    }
}

/// Builder for [`DrawCallCache`].
///
/// # Example
///
/// ```ignore
/// use drawcache::{DrawCallCache, HugepageSize};
///
/// let cache = DrawCallCache::builder()
///     .capacity(1 << 16)
///     .bloom_bits_per_entry(12)
///     .hugepage_size(HugepageSize::TwoMegabyte)
///     .build()?;
/// ```
#[derive(Debug, Clone, Default)]
pub struct DrawCacheBuilder {
    config: DrawCacheConfig,
}

impl DrawCacheBuilder {
    /// Create a builder with default settings.
    pub fn new() -> Self {
        Self::default()
    }

    /// Start from an existing configuration, e.g. one read from TOML.
    pub fn from_config(config: DrawCacheConfig) -> Self {
        Self { config }
    }

    /// Set the number of entries (default: 16384).
    ///
    /// Rounded up to a power of two and clamped to the supported range.
    pub fn capacity(mut self, capacity: usize) -> Self {
        self.config.capacity = capacity;
        self
    }

    /// Set the bloom filter bits per entry (default: 10).
    pub fn bloom_bits_per_entry(mut self, bits: usize) -> Self {
        self.config.bloom_bits_per_entry = bits;
        self
    }

    /// Set the hit count above which executions flag an entry HOT
    /// (default: 100).
    pub fn hot_threshold(mut self, hits: i32) -> Self {
        self.config.hot_threshold = hits;
        self
    }

    /// Set the hit count at which an entry becomes INDIRECT_READY
    /// (default: 10).
    pub fn indirect_threshold(mut self, hits: i32) -> Self {
        self.config.indirect_threshold = hits;
        self
    }

    /// Set the hugepage preference for the slot table.
    ///
    /// Falls back to regular pages if hugepages are unavailable.
    pub fn hugepage_size(mut self, size: HugepageSize) -> Self {
        self.config.hugepage_size = size;
        self
    }

    /// Bind the slot table to a NUMA node (Linux only).
    pub fn numa_node(mut self, node: u32) -> Self {
        self.config.numa_node = Some(node);
        self
    }

    /// Build the cache.
    pub fn build(self) -> DrawCacheResult<DrawCallCache> {
        if self.config.capacity == 0 {
            return Err(DrawCacheError::InvalidCapacity(0));
        }
        if self.config.bloom_bits_per_entry == 0 {
            return Err(DrawCacheError::InvalidBloomBits(0));
        }

        DrawCallCache::from_config(&self.config)
    }
}
