//! Multi-threaded stress tests.

#![cfg(not(feature = "loom"))]

use drawcache::{DrawCall, DrawCallCache, EntryFlags};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::thread;

const THREADS: usize = 8;

fn draw(thread: usize, i: usize) -> DrawCall {
    DrawCall {
        shader_id: thread as i32,
        vao_id: i as i32,
        vertex_buffer_id: 1,
        vertex_count: 36,
        index_count: 0,
        instance_count: 1,
        primitive_type: 4,
        flags: EntryFlags::STATIC,
    }
}

#[test]
fn concurrent_inserts_of_disjoint_hashes() {
    // plenty of headroom so buckets rarely fill
    let cache = Arc::new(DrawCallCache::new(1 << 16).unwrap());
    let per_thread = 1000;

    let handles: Vec<_> = (0..THREADS)
        .map(|t| {
            let cache = Arc::clone(&cache);
            thread::spawn(move || {
                let mut inserted = 0;
                for i in 0..per_thread {
                    let d = draw(t, i);
                    if cache.insert(d.hash(), &d) {
                        inserted += 1;
                    }
                }
                inserted
            })
        })
        .collect();

    let inserted: usize = handles.into_iter().map(|h| h.join().unwrap()).sum();
    assert_eq!(inserted, THREADS * per_thread);

    let stats = cache.statistics();
    assert_eq!(stats.inserts, (THREADS * per_thread) as u64);
    assert_eq!(
        stats.entry_count + stats.evictions,
        (THREADS * per_thread) as u64
    );

    // everything not evicted is findable from a thread that never saw it
    let found = (0..THREADS)
        .flat_map(|t| (0..per_thread).map(move |i| draw(t, i)))
        .filter(|d| cache.lookup(d.hash()).is_some())
        .count();
    assert_eq!(found as u64, stats.entry_count);
}

#[test]
fn concurrent_lookups_count_every_hit() {
    let cache = Arc::new(DrawCallCache::new(1 << 14).unwrap());
    let shared: Vec<DrawCall> = (0..256).map(|i| draw(99, i)).collect();
    for d in &shared {
        assert!(cache.insert(d.hash(), d));
    }
    let shared = Arc::new(shared);
    let rounds = 100;

    let handles: Vec<_> = (0..THREADS)
        .map(|_| {
            let cache = Arc::clone(&cache);
            let shared = Arc::clone(&shared);
            thread::spawn(move || {
                for _ in 0..rounds {
                    for d in shared.iter() {
                        assert!(cache.lookup(d.hash()).is_some());
                    }
                }
            })
        })
        .collect();

    for h in handles {
        h.join().unwrap();
    }

    for d in shared.iter() {
        let entry = cache.lookup(d.hash()).unwrap();
        // insert + every thread's rounds + this lookup
        assert_eq!(entry.hit_count as usize, 1 + THREADS * rounds + 1);
    }

    let stats = cache.statistics();
    assert_eq!(stats.misses, 0);
    assert_eq!(stats.hits, stats.lookups);
}

#[test]
fn concurrent_executions_accumulate() {
    let cache = Arc::new(DrawCallCache::new(1024).unwrap());
    let d = draw(0, 0);
    let hash = d.hash();
    cache.insert(hash, &d);

    let per_thread = 500;
    let handles: Vec<_> = (0..THREADS)
        .map(|_| {
            let cache = Arc::clone(&cache);
            thread::spawn(move || {
                for _ in 0..per_thread {
                    cache.record_execution(hash, 10);
                }
            })
        })
        .collect();

    for h in handles {
        h.join().unwrap();
    }

    let entry = cache.lookup(hash).unwrap();
    assert_eq!(
        entry.total_execution_time_nanos,
        (THREADS * per_thread * 10) as u64
    );
    assert_eq!(entry.hit_count as usize, 1 + THREADS * per_thread + 1);
    assert!(entry.is_hot());
}

#[test]
fn contended_bucket_keeps_invariants() {
    // every thread fights over the same bucket
    let cache = Arc::new(DrawCallCache::new(1024).unwrap());
    let buckets = cache.num_buckets() as u64;
    let per_thread = 2000u64;

    let handles: Vec<_> = (0..THREADS as u64)
        .map(|t| {
            let cache = Arc::clone(&cache);
            thread::spawn(move || {
                let d = draw(0, 0);
                for i in 0..per_thread {
                    let hash = 7 + (1 + t * per_thread + i) * buckets;
                    cache.insert(hash, &d);
                    cache.lookup(hash);
                }
            })
        })
        .collect();

    for h in handles {
        h.join().unwrap();
    }

    // the bucket never holds more than its 8 slots
    assert!(cache.len() <= 8);
    assert!(cache.statistics().evictions > 0);

    for entry in cache.indirect_ready_entries() {
        assert!(entry.first_seen_frame <= entry.last_seen_frame);
    }
}

#[test]
fn evicted_entry_misses_on_the_thread_that_cached_it() {
    let cache = DrawCallCache::new(1024).unwrap();
    let buckets = cache.num_buckets() as u64;
    let hashes: Vec<u64> = (1..=9).map(|k| 21 + k * buckets).collect();
    let (evicted, replacement) = (hashes[0], hashes[8]);

    let original = draw(1, 1);
    assert!(cache.insert(evicted, &original));
    assert_eq!(cache.lookup(evicted).unwrap().shader_id, 1);
    cache.advance_frame();

    let other = DrawCall {
        shader_id: 77,
        vao_id: 78,
        vertex_count: 3,
        ..original
    };
    thread::scope(|s| {
        s.spawn(|| {
            for &h in &hashes[1..8] {
                assert!(cache.insert(h, &original));
            }
            assert!(cache.insert(replacement, &other));
        });
    });
    assert_eq!(cache.statistics().evictions, 1);

    // the stale ring entry on this thread points at the reused slot
    for _ in 0..3 {
        assert!(cache.lookup(evicted).is_none());
    }

    let entry = cache.lookup(replacement).unwrap();
    assert_eq!(entry.shader_id, 77);
    assert_eq!(entry.vao_id, 78);
    assert_eq!(entry.vertex_count, 3);
    assert_eq!(entry.first_seen_frame, 1);
}

#[test]
fn frames_advance_while_serving() {
    let cache = Arc::new(DrawCallCache::new(1 << 14).unwrap());
    let stop = Arc::new(AtomicBool::new(false));
    let ops = Arc::new(AtomicUsize::new(0));

    let workers: Vec<_> = (0..4)
        .map(|t| {
            let cache = Arc::clone(&cache);
            let stop = Arc::clone(&stop);
            let ops = Arc::clone(&ops);
            thread::spawn(move || {
                let mut i = 0;
                while !stop.load(Ordering::Relaxed) {
                    let d = draw(t, i % 512);
                    if cache.lookup(d.hash()).is_none() {
                        cache.insert(d.hash(), &d);
                    }
                    cache.record_execution(d.hash(), 100);
                    i += 1;
                }
                ops.fetch_add(i, Ordering::Relaxed);
            })
        })
        .collect();

    for frame in 1..=200u64 {
        assert_eq!(cache.advance_frame(), frame);
        if frame % 20 == 0 {
            cache.mark_cold_entries(50);
            for entry in cache.hot_entries() {
                assert!(entry.is_hot() || entry.is_cold());
            }
        }
    }

    stop.store(true, Ordering::Relaxed);
    for w in workers {
        w.join().unwrap();
    }

    assert_eq!(cache.current_frame(), 200);
    assert!(ops.load(Ordering::Relaxed) > 0);
    assert!(cache.len() <= 4 * 512);
}

#[test]
fn close_races_with_operations() {
    let cache = Arc::new(DrawCallCache::new(1 << 12).unwrap());

    let handles: Vec<_> = (0..THREADS)
        .map(|t| {
            let cache = Arc::clone(&cache);
            thread::spawn(move || {
                for i in 0..5000 {
                    let d = draw(t, i);
                    cache.insert(d.hash(), &d);
                    cache.lookup(d.hash());
                    if t == 0 && i == 2500 {
                        cache.close();
                    }
                }
            })
        })
        .collect();

    for h in handles {
        h.join().unwrap();
    }

    assert!(cache.is_closed());
    assert!(!cache.close());
    let d = draw(0, 0);
    assert!(!cache.insert(d.hash(), &d));
    assert!(cache.lookup(d.hash()).is_none());
}
