//! Bucketed slot table over off-heap memory.
//!
//! The table is `capacity` 64-byte [`Slot`]s in one mapping, grouped into
//! buckets of [`SLOTS_PER_BUCKET`]. A hash lives in bucket
//! `hash & bucket_mask` and never anywhere else: buckets are both the
//! open-addressing unit and the eviction scope.
//!
//! Ownership of a slot is decided by a single-word CAS on its hash. The
//! winning thread then stores the remaining fields, so a reader may briefly
//! observe the new hash with stale metadata. Only `hash` carries identity.
//!
//! ```text
//! bucket 0                      bucket 1
//! +----+----+----+-- .. --+----+----+----+-- ..
//! | s0 | s1 | s2 |        | s7 | s0 | s1 |
//! +----+----+----+-- .. --+----+----+----+-- ..
//!  64B  64B  64B            64B
//! ```

use crate::config::{SLOT_SIZE, SLOTS_PER_BUCKET};
use crate::entry::{Slot, SlotFields};
use crate::hash::{EMPTY_HASH, TOMBSTONE_HASH, is_reserved};
use crate::region::{HugepageSize, Region};
use std::io;
use std::ptr::NonNull;
use std::sync::atomic::Ordering;

/// Outcome of trying to claim a free slot in a bucket.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Claim {
    /// This thread now owns the slot at `index`.
    Claimed {
        /// Slot index.
        index: usize,
        /// CAS attempts lost to other threads before winning.
        lost_races: u32,
    },
    /// No empty or tombstoned slot was left in the bucket.
    Full {
        /// CAS attempts lost to other threads along the way.
        lost_races: u32,
    },
}

/// Fixed-capacity table of cache-line slots.
pub(crate) struct SlotTable {
    slots: NonNull<Slot>,
    capacity: usize,
    bucket_mask: u64,
    region: Region,
}

// SAFETY: `slots` points into `region`, which lives as long as the table.
// Every slot field is an atomic, so shared access from any thread is sound.
unsafe impl Send for SlotTable {}
unsafe impl Sync for SlotTable {}

impl SlotTable {
    /// Map a zero-filled table of `capacity` slots.
    ///
    /// `capacity` must be a power of two and a multiple of
    /// [`SLOTS_PER_BUCKET`].
    pub(crate) fn new(
        capacity: usize,
        hugepage_size: HugepageSize,
        numa_node: Option<u32>,
    ) -> io::Result<Self> {
        debug_assert!(capacity.is_power_of_two());
        debug_assert!(capacity >= SLOTS_PER_BUCKET);

        let region = Region::map(capacity * SLOT_SIZE, hugepage_size, numa_node)?;
        debug_assert_eq!(region.as_ptr() as usize % SLOT_SIZE, 0);

        // SAFETY: mmap returns non-null page-aligned memory.
        let slots = unsafe { NonNull::new_unchecked(region.as_ptr().cast::<Slot>()) };
        let num_buckets = capacity / SLOTS_PER_BUCKET;

        Ok(Self {
            slots,
            capacity,
            bucket_mask: num_buckets as u64 - 1,
            region,
        })
    }

    #[inline]
    pub(crate) fn capacity(&self) -> usize {
        self.capacity
    }

    #[inline]
    pub(crate) fn num_buckets(&self) -> usize {
        self.capacity / SLOTS_PER_BUCKET
    }

    /// Bytes mapped for the table.
    pub(crate) fn mapped_bytes(&self) -> usize {
        self.region.len()
    }

    /// Index of the first slot of the bucket `hash` belongs to.
    #[inline(always)]
    pub(crate) fn bucket_start(&self, hash: u64) -> usize {
        ((hash & self.bucket_mask) as usize) * SLOTS_PER_BUCKET
    }

    #[inline(always)]
    pub(crate) fn slot(&self, index: usize) -> &Slot {
        debug_assert!(index < self.capacity);
        // SAFETY: index < capacity and the mapping holds capacity slots.
        unsafe { &*self.slots.as_ptr().add(index) }
    }

    #[inline(always)]
    fn bucket(&self, start: usize) -> &[Slot] {
        debug_assert!(start + SLOTS_PER_BUCKET <= self.capacity);
        // SAFETY: start is bucket-aligned and the whole bucket is in bounds.
        unsafe { std::slice::from_raw_parts(self.slots.as_ptr().add(start), SLOTS_PER_BUCKET) }
    }

    /// Iterate over every slot, in index order.
    pub(crate) fn slots(&self) -> impl Iterator<Item = &Slot> {
        (0..self.capacity).map(move |i| self.slot(i))
    }

    /// Find the slot holding `hash` in its bucket.
    ///
    /// The vector scan is a speculative filter; each candidate is re-checked
    /// with a SeqCst load before it is trusted.
    #[inline]
    pub(crate) fn find(&self, hash: u64) -> Option<usize> {
        debug_assert!(!is_reserved(hash));
        let start = self.bucket_start(hash);
        let bucket = self.bucket(start);

        let mut mask = match_mask(bucket, hash);
        while mask != 0 {
            let i = mask.trailing_zeros() as usize;
            mask &= mask - 1;

            if bucket[i].load_hash() == hash {
                return Some(start + i);
            }
        }

        None
    }

    /// Claim an empty or tombstoned slot in `hash`'s bucket.
    pub(crate) fn claim(&self, hash: u64) -> Claim {
        let start = self.bucket_start(hash);
        let bucket = self.bucket(start);
        let mut lost_races = 0;

        let mut mask = match_mask(bucket, EMPTY_HASH) | match_mask(bucket, TOMBSTONE_HASH);
        while mask != 0 {
            let i = mask.trailing_zeros() as usize;
            mask &= mask - 1;

            let observed = bucket[i].load_hash();
            if !is_reserved(observed) {
                continue;
            }

            match bucket[i].hash.compare_exchange(
                observed,
                hash,
                Ordering::SeqCst,
                Ordering::Relaxed,
            ) {
                Ok(_) => {
                    return Claim::Claimed {
                        index: start + i,
                        lost_races,
                    };
                }
                Err(_) => lost_races += 1,
            }
        }

        Claim::Full { lost_races }
    }

    /// The least recently seen slot in `hash`'s bucket and the hash it held.
    ///
    /// Ties go to the lowest index. Free slots found during the sweep are
    /// returned immediately with their sentinel so the caller can claim them.
    pub(crate) fn oldest(&self, hash: u64) -> (usize, u64) {
        let start = self.bucket_start(hash);
        let bucket = self.bucket(start);

        let mut victim = 0;
        let mut victim_hash = bucket[0].load_hash();
        let mut victim_frame = u64::MAX;

        for (i, slot) in bucket.iter().enumerate() {
            let h = slot.load_hash();
            if is_reserved(h) {
                return (start + i, h);
            }

            let frame = slot.last_seen_frame.load(Ordering::Acquire);
            if frame < victim_frame {
                victim = i;
                victim_hash = h;
                victim_frame = frame;
            }
        }

        (start + victim, victim_hash)
    }

    /// Swap the hash at `index` from `expected` to `hash`.
    #[inline]
    pub(crate) fn replace(&self, index: usize, expected: u64, hash: u64) -> bool {
        self.slot(index)
            .hash
            .compare_exchange(expected, hash, Ordering::SeqCst, Ordering::Relaxed)
            .is_ok()
    }

    /// Fill in the metadata of a slot this thread owns.
    #[inline]
    pub(crate) fn write(&self, index: usize, fields: &SlotFields, frame: u64) {
        self.slot(index).write(fields, frame);
    }

    /// Zero every slot.
    pub(crate) fn reset(&self) {
        for slot in self.slots() {
            slot.reset();
        }
    }
}

/// Bitmask of slots in `bucket` whose stored hash equals `needle`.
///
/// Hash words sit 64 bytes apart, so AVX2 gathers them four at a time.
#[cfg(all(target_arch = "x86_64", target_feature = "avx2"))]
#[inline]
fn match_mask(bucket: &[Slot], needle: u64) -> u8 {
    use std::arch::x86_64::*;

    const STRIDE: i64 = (SLOT_SIZE / 8) as i64;

    // SAFETY: bucket holds 8 slots; every gathered address is the hash word
    // of one of them. Relaxed-equivalent reads; callers re-check atomically.
    unsafe {
        let base = bucket.as_ptr() as *const i64;
        let offsets = _mm256_set_epi64x(3 * STRIDE, 2 * STRIDE, STRIDE, 0);
        let target = _mm256_set1_epi64x(needle as i64);

        let lo = _mm256_i64gather_epi64::<8>(base, offsets);
        let hi = _mm256_i64gather_epi64::<8>(base.add(4 * STRIDE as usize), offsets);

        let lo_eq = _mm256_cmpeq_epi64(lo, target);
        let hi_eq = _mm256_cmpeq_epi64(hi, target);

        let lo_mask = _mm256_movemask_pd(_mm256_castsi256_pd(lo_eq)) as u8;
        let hi_mask = _mm256_movemask_pd(_mm256_castsi256_pd(hi_eq)) as u8;

        lo_mask | (hi_mask << 4)
    }
}

/// Bitmask of slots in `bucket` whose stored hash equals `needle`.
///
/// NEON has no gather, so pairs of hash words are combined into one
/// 128-bit register per compare.
#[cfg(target_arch = "aarch64")]
#[inline]
fn match_mask(bucket: &[Slot], needle: u64) -> u8 {
    use std::arch::aarch64::*;

    const STRIDE: usize = SLOT_SIZE / 8;

    // SAFETY: bucket holds 8 slots; every load is the hash word of one of
    // them. Relaxed-equivalent reads; callers re-check atomically.
    unsafe {
        let base = bucket.as_ptr() as *const u64;
        let target = vdupq_n_u64(needle);
        let mut mask = 0u8;

        for pair in 0..SLOTS_PER_BUCKET / 2 {
            let a = vld1_u64(base.add(2 * pair * STRIDE));
            let b = vld1_u64(base.add((2 * pair + 1) * STRIDE));
            let eq = vceqq_u64(vcombine_u64(a, b), target);

            if vgetq_lane_u64(eq, 0) != 0 {
                mask |= 1 << (2 * pair);
            }
            if vgetq_lane_u64(eq, 1) != 0 {
                mask |= 1 << (2 * pair + 1);
            }
        }

        mask
    }
}

/// Scalar fallback for the bucket scan.
#[cfg(not(any(
    all(target_arch = "x86_64", target_feature = "avx2"),
    target_arch = "aarch64"
)))]
#[inline]
fn match_mask(bucket: &[Slot], needle: u64) -> u8 {
    let mut mask = 0u8;
    for (i, slot) in bucket.iter().enumerate() {
        if slot.hash.load(Ordering::Relaxed) == needle {
            mask |= 1 << i;
        }
    }
    mask
}
