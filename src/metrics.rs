//! Cache statistics.
//!
//! - [`CacheCounters`] - per-instance atomic counters, updated lock-free
//! - [`Statistics`] - point-in-time snapshot with derived ratios

use crate::sync::{AtomicU64, Ordering};
use crossbeam_utils::CachePadded;
use std::fmt;

/// Atomic counters owned by one cache instance.
///
/// Each counter sits on its own cache line so lookup threads bumping `hits`
/// do not contend with inserting threads bumping `inserts`.
#[derive(Debug, Default)]
pub struct CacheCounters {
    lookups: CachePadded<AtomicU64>,
    hits: CachePadded<AtomicU64>,
    misses: CachePadded<AtomicU64>,
    inserts: CachePadded<AtomicU64>,
    evictions: CachePadded<AtomicU64>,
    collisions: CachePadded<AtomicU64>,
    live_entries: CachePadded<AtomicU64>,
}

impl CacheCounters {
    /// Create zeroed counters.
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a lookup and whether it hit.
    #[inline]
    pub fn record_lookup(&self, hit: bool) {
        self.lookups.fetch_add(1, Ordering::Relaxed);
        if hit {
            self.hits.fetch_add(1, Ordering::Relaxed);
        } else {
            self.misses.fetch_add(1, Ordering::Relaxed);
        }
    }

    /// Record a successful insert. `claimed` is true when it took a free
    /// slot rather than evicting.
    #[inline]
    pub fn record_insert(&self, claimed: bool) {
        self.inserts.fetch_add(1, Ordering::Relaxed);
        if claimed {
            self.live_entries.fetch_add(1, Ordering::Relaxed);
        } else {
            self.evictions.fetch_add(1, Ordering::Relaxed);
        }
    }

    /// Record `n` lost slot races or full-bucket fallbacks.
    #[inline]
    pub fn record_collisions(&self, n: u64) {
        if n > 0 {
            self.collisions.fetch_add(n, Ordering::Relaxed);
        }
    }

    /// Record a tombstoned entry.
    #[inline]
    pub fn record_invalidate(&self) {
        // saturate: a concurrent clear may have already zeroed the count
        let _ = self
            .live_entries
            .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |n| n.checked_sub(1));
    }

    /// Number of live entries.
    #[inline]
    pub fn live_entries(&self) -> u64 {
        self.live_entries.load(Ordering::Relaxed)
    }

    /// Zero every counter.
    pub fn reset(&self) {
        self.lookups.store(0, Ordering::Relaxed);
        self.hits.store(0, Ordering::Relaxed);
        self.misses.store(0, Ordering::Relaxed);
        self.inserts.store(0, Ordering::Relaxed);
        self.evictions.store(0, Ordering::Relaxed);
        self.collisions.store(0, Ordering::Relaxed);
        self.live_entries.store(0, Ordering::Relaxed);
    }

    /// Build a [`Statistics`] snapshot.
    pub fn snapshot(&self, capacity: usize, current_frame: u64) -> Statistics {
        let lookups = self.lookups.load(Ordering::Relaxed);
        let hits = self.hits.load(Ordering::Relaxed);
        let entry_count = self.live_entries.load(Ordering::Relaxed);

        Statistics {
            lookups,
            hits,
            misses: self.misses.load(Ordering::Relaxed),
            inserts: self.inserts.load(Ordering::Relaxed),
            evictions: self.evictions.load(Ordering::Relaxed),
            collisions: self.collisions.load(Ordering::Relaxed),
            entry_count,
            capacity,
            hit_rate: ratio(hits, lookups),
            load_factor: ratio(entry_count, capacity as u64),
            current_frame,
        }
    }
}

fn ratio(num: u64, den: u64) -> f64 {
    if den == 0 { 0.0 } else { num as f64 / den as f64 }
}

/// A point-in-time view of a cache's counters.
///
/// Counters are read individually, so under concurrent load the fields may
/// not be mutually consistent (e.g. `hits + misses` can trail `lookups`).
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct Statistics {
    /// Lookups performed.
    pub lookups: u64,
    /// Lookups that found an entry.
    pub hits: u64,
    /// Lookups that found nothing.
    pub misses: u64,
    /// Successful inserts, including those that evicted.
    pub inserts: u64,
    /// Inserts that replaced an existing entry.
    pub evictions: u64,
    /// Lost slot races and full buckets.
    pub collisions: u64,
    /// Live entries.
    pub entry_count: u64,
    /// Slot capacity.
    pub capacity: usize,
    /// `hits / lookups`, or 0 with no lookups.
    pub hit_rate: f64,
    /// `entry_count / capacity`.
    pub load_factor: f64,
    /// Frame counter at the time of the snapshot.
    pub current_frame: u64,
}

impl fmt::Display for Statistics {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "entries={}/{} ({:.1}% full) lookups={} hits={} misses={} hit_rate={:.2}% \
             inserts={} evictions={} collisions={} frame={}",
            self.entry_count,
            self.capacity,
            self.load_factor * 100.0,
            self.lookups,
            self.hits,
            self.misses,
            self.hit_rate * 100.0,
            self.inserts,
            self.evictions,
            self.collisions,
            self.current_frame,
        )
    }
}

#[cfg(all(test, not(feature = "loom")))]
mod tests {
    use super::*;

    #[test]
    fn test_record_lookup() {
        let counters = CacheCounters::new();
        counters.record_lookup(true);
        counters.record_lookup(true);
        counters.record_lookup(false);

        let stats = counters.snapshot(1024, 0);
        assert_eq!(stats.lookups, 3);
        assert_eq!(stats.hits, 2);
        assert_eq!(stats.misses, 1);
        assert!((stats.hit_rate - 2.0 / 3.0).abs() < 1e-9);
    }

    #[test]
    fn test_record_insert() {
        let counters = CacheCounters::new();
        counters.record_insert(true);
        counters.record_insert(true);
        counters.record_insert(false);

        let stats = counters.snapshot(1024, 5);
        assert_eq!(stats.inserts, 3);
        assert_eq!(stats.evictions, 1);
        assert_eq!(stats.entry_count, 2);
        assert_eq!(stats.current_frame, 5);
        assert!((stats.load_factor - 2.0 / 1024.0).abs() < 1e-9);
    }

    #[test]
    fn test_invalidate_saturates() {
        let counters = CacheCounters::new();
        counters.record_invalidate();
        assert_eq!(counters.live_entries(), 0);

        counters.record_insert(true);
        counters.record_invalidate();
        assert_eq!(counters.live_entries(), 0);
    }

    #[test]
    fn test_empty_ratios() {
        let stats = CacheCounters::new().snapshot(0, 0);
        assert_eq!(stats.hit_rate, 0.0);
        assert_eq!(stats.load_factor, 0.0);
    }

    #[test]
    fn test_reset() {
        let counters = CacheCounters::new();
        counters.record_lookup(true);
        counters.record_insert(false);
        counters.record_collisions(4);
        counters.reset();

        assert_eq!(counters.snapshot(1024, 0), Statistics {
            capacity: 1024,
            ..Default::default()
        });
    }

    #[test]
    fn test_display() {
        let counters = CacheCounters::new();
        counters.record_insert(true);
        counters.record_lookup(true);
        let text = counters.snapshot(1024, 3).to_string();
        assert!(text.contains("entries=1/1024"));
        assert!(text.contains("hit_rate=100.00%"));
        assert!(text.contains("frame=3"));
    }
}

#[cfg(all(test, feature = "loom"))]
mod loom_tests {
    use super::*;
    use loom::sync::Arc;
    use loom::thread;

    /// Concurrent lookups from two threads are both counted.
    #[test]
    fn test_concurrent_lookups() {
        loom::model(|| {
            let counters = Arc::new(CacheCounters::new());

            let c1 = counters.clone();
            let c2 = counters.clone();

            let t1 = thread::spawn(move || c1.record_lookup(true));
            let t2 = thread::spawn(move || c2.record_lookup(false));

            t1.join().unwrap();
            t2.join().unwrap();

            let stats = counters.snapshot(1024, 0);
            assert_eq!(stats.lookups, 2);
            assert_eq!(stats.hits, 1);
            assert_eq!(stats.misses, 1);
        });
    }

    /// An insert racing an invalidate never underflows the live count.
    #[test]
    fn test_insert_invalidate_race() {
        loom::model(|| {
            let counters = Arc::new(CacheCounters::new());

            let c1 = counters.clone();
            let c2 = counters.clone();

            let t1 = thread::spawn(move || c1.record_insert(true));
            let t2 = thread::spawn(move || c2.record_invalidate());

            t1.join().unwrap();
            t2.join().unwrap();

            assert!(counters.live_entries() <= 1);
        });
    }
}
