//! Lock-free bloom filter over inserted hashes.
//!
//! Consulted before any bucket scan so a miss on a never-seen draw call
//! costs three bit tests. Bits are only ever set, except by [`clear`], so
//! the filter has no false negatives. Invalidated or evicted hashes keep
//! their bits and surface as false positives, which the bucket scan then
//! rejects.
//!
//! [`clear`]: BloomFilter::clear

use crate::config::BLOOM_HASHES;
use crate::sync::{AtomicU64, Ordering};

/// A fixed-size bloom filter with `k = 3` double-hashed indices.
pub struct BloomFilter {
    words: Box<[AtomicU64]>,
    bits: u64,
}

impl BloomFilter {
    /// Create a filter sized for `capacity` entries at `bits_per_entry`.
    ///
    /// The bit count is rounded up to a whole number of 64-bit words.
    pub fn new(capacity: usize, bits_per_entry: usize) -> Self {
        let requested = capacity.saturating_mul(bits_per_entry).max(64);
        let num_words = requested.div_ceil(64);
        let words: Box<[AtomicU64]> = (0..num_words).map(|_| AtomicU64::new(0)).collect();

        Self {
            bits: (num_words * 64) as u64,
            words,
        }
    }

    /// Number of bits in the filter.
    #[inline]
    pub fn bits(&self) -> u64 {
        self.bits
    }

    /// Record `hash` as present.
    #[inline]
    pub fn add(&self, hash: u64) {
        for index in self.indices(hash) {
            let (word, mask) = Self::locate(index);
            self.words[word].fetch_or(mask, Ordering::Release);
        }
    }

    /// False means `hash` was never added since the last clear.
    #[inline]
    pub fn might_contain(&self, hash: u64) -> bool {
        self.indices(hash).all(|index| {
            let (word, mask) = Self::locate(index);
            self.words[word].load(Ordering::Acquire) & mask != 0
        })
    }

    /// Unset every bit.
    pub fn clear(&self) {
        for word in self.words.iter() {
            word.store(0, Ordering::Release);
        }
    }

    /// Number of set bits. Linear in the filter size.
    pub fn count_ones(&self) -> u64 {
        self.words
            .iter()
            .map(|w| w.load(Ordering::Relaxed).count_ones() as u64)
            .sum()
    }

    #[inline(always)]
    fn indices(&self, hash: u64) -> impl Iterator<Item = u64> + use<> {
        let h1 = hash;
        let h2 = hash.rotate_left(17);
        let bits = self.bits;
        (0..BLOOM_HASHES).map(move |i| h1.wrapping_add(i.wrapping_mul(h2)) % bits)
    }

    #[inline(always)]
    fn locate(index: u64) -> (usize, u64) {
        ((index / 64) as usize, 1u64 << (index % 64))
    }
}

impl std::fmt::Debug for BloomFilter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BloomFilter")
            .field("bits", &self.bits)
            .finish_non_exhaustive()
    }
}

#[cfg(all(test, not(feature = "loom")))]
mod tests {
    use super::*;
    use crate::hash::compute_hash;

    #[test]
    fn test_sizing_rounds_to_words() {
        assert_eq!(BloomFilter::new(1024, 10).bits(), 10240);
        assert_eq!(BloomFilter::new(3, 7).bits(), 64);
        assert_eq!(BloomFilter::new(100, 1).bits(), 128);
    }

    #[test]
    fn test_empty_filter_contains_nothing() {
        let bloom = BloomFilter::new(1024, 10);
        for h in 1..1000u64 {
            assert!(!bloom.might_contain(h));
        }
        assert_eq!(bloom.count_ones(), 0);
    }

    #[test]
    fn test_no_false_negatives() {
        let bloom = BloomFilter::new(4096, 10);
        let hashes: Vec<u64> = (0..4096).map(|i| compute_hash(i, i * 3, 0, 36, 0, 1, 4, 0)).collect();

        for &h in &hashes {
            bloom.add(h);
        }
        for &h in &hashes {
            assert!(bloom.might_contain(h));
        }
    }

    #[test]
    fn test_false_positive_rate() {
        // 10 bits per entry with k=3 is around 1.7%; allow generous slack
        let bloom = BloomFilter::new(4096, 10);
        for i in 0..4096 {
            bloom.add(compute_hash(i, 0, 0, 0, 0, 0, 0, 0));
        }

        let false_positives = (0..10_000)
            .filter(|&i| bloom.might_contain(compute_hash(i, 1, 0, 0, 0, 0, 0, 0)))
            .count();
        assert!(false_positives < 500, "{false_positives} false positives");
    }

    #[test]
    fn test_clear() {
        let bloom = BloomFilter::new(1024, 10);
        bloom.add(42);
        assert!(bloom.might_contain(42));
        assert!(bloom.count_ones() > 0);

        bloom.clear();
        assert!(!bloom.might_contain(42));
        assert_eq!(bloom.count_ones(), 0);
    }

    #[test]
    fn test_add_sets_at_most_k_bits() {
        let bloom = BloomFilter::new(1024, 10);
        bloom.add(0xDEAD_BEEF);
        let ones = bloom.count_ones();
        assert!((1..=BLOOM_HASHES).contains(&ones));
    }

    #[test]
    fn test_concurrent_adds() {
        use std::sync::Arc;

        let bloom = Arc::new(BloomFilter::new(8192, 10));
        let handles: Vec<_> = (0..4)
            .map(|t| {
                let bloom = bloom.clone();
                std::thread::spawn(move || {
                    for i in 0..2000 {
                        bloom.add(compute_hash(t, i, 0, 0, 0, 0, 0, 0));
                    }
                })
            })
            .collect();

        for h in handles {
            h.join().unwrap();
        }

        for t in 0..4 {
            for i in 0..2000 {
                assert!(bloom.might_contain(compute_hash(t, i, 0, 0, 0, 0, 0, 0)));
            }
        }
    }
}
