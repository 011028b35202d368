//! Per-thread ring of recently resolved hashes.
//!
//! Each thread that touches a cache gets its own [`LookupRing`], so the ring
//! is plain memory with no synchronization. It is a hint: the slot index it
//! returns must be checked against the slot's stored hash before use, since
//! other threads may have evicted or invalidated the entry since.

use crate::config::LOOKUP_RING_SIZE;
use crate::hash::EMPTY_HASH;

const RING_MASK: usize = LOOKUP_RING_SIZE - 1;

/// A fixed ring of (hash, slot index) pairs, overwritten round-robin.
#[repr(C, align(64))]
pub struct LookupRing {
    hashes: [u64; LOOKUP_RING_SIZE],
    slots: [u32; LOOKUP_RING_SIZE],
    head: usize,
}

impl Default for LookupRing {
    fn default() -> Self {
        Self::new()
    }
}

impl LookupRing {
    /// An empty ring.
    pub const fn new() -> Self {
        Self {
            hashes: [EMPTY_HASH; LOOKUP_RING_SIZE],
            slots: [0; LOOKUP_RING_SIZE],
            head: 0,
        }
    }

    /// Remember that `hash` resolved to `slot`, overwriting the oldest pair.
    #[inline]
    pub fn put(&mut self, hash: u64, slot: u32) {
        let i = self.head & RING_MASK;
        self.hashes[i] = hash;
        self.slots[i] = slot;
        self.head = self.head.wrapping_add(1);
    }

    /// Slot index last recorded for `hash`, if any.
    #[inline]
    pub fn get(&self, hash: u64) -> Option<u32> {
        if hash == EMPTY_HASH {
            return None;
        }
        position(&self.hashes, hash).map(|i| self.slots[i])
    }

    /// Forget every pair recorded for `hash`.
    pub fn invalidate(&mut self, hash: u64) {
        if hash == EMPTY_HASH {
            return;
        }
        for (h, slot) in self.hashes.iter_mut().zip(self.slots.iter_mut()) {
            if *h == hash {
                *h = EMPTY_HASH;
                *slot = 0;
            }
        }
    }

    /// Forget everything.
    pub fn clear(&mut self) {
        self.hashes = [EMPTY_HASH; LOOKUP_RING_SIZE];
        self.slots = [0; LOOKUP_RING_SIZE];
        self.head = 0;
    }
}

/// Index of the first lane equal to `needle`.
#[cfg(all(target_arch = "x86_64", target_feature = "avx2"))]
#[inline]
fn position(hashes: &[u64; LOOKUP_RING_SIZE], needle: u64) -> Option<usize> {
    use std::arch::x86_64::*;

    const LANES: usize = 4;

    // SAFETY: every load reads LANES in-bounds u64s; unaligned loads are used.
    unsafe {
        let target = _mm256_set1_epi64x(needle as i64);
        let base = hashes.as_ptr();

        let mut chunk = 0;
        while chunk + LANES <= LOOKUP_RING_SIZE {
            let v = _mm256_loadu_si256(base.add(chunk) as *const __m256i);
            let eq = _mm256_cmpeq_epi64(v, target);
            let mask = _mm256_movemask_pd(_mm256_castsi256_pd(eq));
            if mask != 0 {
                return Some(chunk + mask.trailing_zeros() as usize);
            }
            chunk += LANES;
        }

        hashes[chunk..]
            .iter()
            .position(|&h| h == needle)
            .map(|i| chunk + i)
    }
}

/// Index of the first lane equal to `needle`.
#[cfg(target_arch = "aarch64")]
#[inline]
fn position(hashes: &[u64; LOOKUP_RING_SIZE], needle: u64) -> Option<usize> {
    use std::arch::aarch64::*;

    const LANES: usize = 2;

    // SAFETY: every load reads LANES in-bounds u64s.
    unsafe {
        let target = vdupq_n_u64(needle);
        let base = hashes.as_ptr();

        let mut chunk = 0;
        while chunk + LANES <= LOOKUP_RING_SIZE {
            let eq = vceqq_u64(vld1q_u64(base.add(chunk)), target);
            if vgetq_lane_u64(eq, 0) != 0 {
                return Some(chunk);
            }
            if vgetq_lane_u64(eq, 1) != 0 {
                return Some(chunk + 1);
            }
            chunk += LANES;
        }

        hashes[chunk..]
            .iter()
            .position(|&h| h == needle)
            .map(|i| chunk + i)
    }
}

/// Scalar fallback.
#[cfg(not(any(
    all(target_arch = "x86_64", target_feature = "avx2"),
    target_arch = "aarch64"
)))]
#[inline]
fn position(hashes: &[u64; LOOKUP_RING_SIZE], needle: u64) -> Option<usize> {
    hashes.iter().position(|&h| h == needle)
}
