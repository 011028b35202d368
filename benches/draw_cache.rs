//! Benchmarks for DrawCallCache operations.
//!
//! Run with: cargo bench --bench draw_cache

use criterion::{BenchmarkId, Criterion, Throughput, black_box, criterion_group, criterion_main};
use drawcache::{DrawCall, DrawCallCache, EntryFlags, compute_hash};
use std::sync::Arc;
use std::thread;

/// A draw call that differs from its neighbours in shader and VAO.
fn make_draw(index: usize) -> DrawCall {
    DrawCall {
        shader_id: (index % 512) as i32,
        vao_id: (index / 512) as i32,
        vertex_buffer_id: index as i32,
        vertex_count: 36,
        index_count: 0,
        instance_count: 1,
        primitive_type: 4,
        flags: EntryFlags::STATIC,
    }
}

fn populated(capacity: usize, num_items: usize) -> (DrawCallCache, Vec<u64>) {
    let cache = DrawCallCache::new(capacity).expect("failed to create cache");
    let hashes: Vec<u64> = (0..num_items).map(|i| make_draw(i).hash()).collect();
    for (i, &hash) in hashes.iter().enumerate() {
        cache.insert(hash, &make_draw(i));
    }
    (cache, hashes)
}

/// Benchmark hashing.
fn bench_hash(c: &mut Criterion) {
    let mut group = c.benchmark_group("draw_cache/hash");
    group.throughput(Throughput::Elements(1));

    group.bench_function("compute_hash", |b| {
        let mut i = 0i32;
        b.iter(|| {
            let h = compute_hash(
                black_box(i),
                black_box(7),
                black_box(11),
                36,
                0,
                1,
                4,
                0,
            );
            i = i.wrapping_add(1);
            black_box(h)
        });
    });

    group.finish();
}

/// Benchmark insert operations.
fn bench_insert(c: &mut Criterion) {
    let mut group = c.benchmark_group("draw_cache/insert");

    for power in [14, 16, 18] {
        let capacity = 1usize << power;

        group.throughput(Throughput::Elements(1));
        group.bench_with_input(
            BenchmarkId::new("single", format!("2^{}", power)),
            &capacity,
            |b, &capacity| {
                let cache = DrawCallCache::new(capacity).expect("failed to create cache");
                let mut idx = 0usize;

                // keeps inserting new hashes, so steady state is eviction
                b.iter(|| {
                    let draw = make_draw(idx);
                    black_box(cache.insert(black_box(draw.hash()), &draw));
                    idx = idx.wrapping_add(1);
                });
            },
        );
    }

    group.finish();
}

/// Benchmark lookup hits, served mostly from the bucket scan.
fn bench_lookup_hit(c: &mut Criterion) {
    let mut group = c.benchmark_group("draw_cache/lookup_hit");

    for power in [14, 16, 18] {
        let capacity = 1usize << power;
        let num_items = capacity / 2; // ~50% load factor
        let (cache, hashes) = populated(capacity, num_items);

        group.throughput(Throughput::Elements(1));
        group.bench_with_input(
            BenchmarkId::new("hit", format!("2^{}", power)),
            &power,
            |b, _| {
                let mut idx = 0usize;
                b.iter(|| {
                    let result = black_box(cache.lookup(black_box(hashes[idx])));
                    debug_assert!(result.is_some());
                    idx = (idx + 1) % num_items;
                });
            },
        );
    }

    group.finish();
}

/// Benchmark lookups of a small working set that fits in the lookup ring.
fn bench_lookup_ring(c: &mut Criterion) {
    let mut group = c.benchmark_group("draw_cache/lookup_ring");

    let (cache, hashes) = populated(1 << 16, 32);

    group.throughput(Throughput::Elements(1));
    group.bench_function("hit", |b| {
        let mut idx = 0usize;
        b.iter(|| {
            black_box(cache.lookup(black_box(hashes[idx])));
            idx = (idx + 1) % hashes.len();
        });
    });

    group.finish();
}

/// Benchmark lookup misses, mostly rejected by the bloom filter.
fn bench_lookup_miss(c: &mut Criterion) {
    let mut group = c.benchmark_group("draw_cache/lookup_miss");

    for power in [14, 16, 18] {
        let capacity = 1usize << power;
        let num_items = capacity / 2;
        let (cache, _) = populated(capacity, num_items);

        let miss_hashes: Vec<u64> = (num_items..num_items * 2)
            .map(|i| make_draw(i).hash())
            .collect();

        group.throughput(Throughput::Elements(1));
        group.bench_with_input(
            BenchmarkId::new("miss", format!("2^{}", power)),
            &power,
            |b, _| {
                let mut idx = 0usize;
                b.iter(|| {
                    black_box(cache.lookup(black_box(miss_hashes[idx])));
                    idx = (idx + 1) % num_items;
                });
            },
        );
    }

    group.finish();
}

/// Benchmark the per-frame classification sweeps.
fn bench_scans(c: &mut Criterion) {
    let mut group = c.benchmark_group("draw_cache/scan");

    let capacity = 1usize << 16;
    let (cache, _) = populated(capacity, capacity / 2);

    group.throughput(Throughput::Elements(capacity as u64));

    group.bench_function("mark_cold", |b| {
        b.iter(|| {
            cache.advance_frame();
            black_box(cache.mark_cold_entries(black_box(60)))
        });
    });

    group.bench_function("indirect_ready", |b| {
        b.iter(|| black_box(cache.indirect_ready_entries()));
    });

    group.finish();
}

/// Benchmark concurrent operations.
fn bench_concurrent(c: &mut Criterion) {
    let mut group = c.benchmark_group("draw_cache/concurrent");

    let capacity = 1usize << 18;
    let num_items = capacity / 2;
    let (cache, hashes) = populated(capacity, num_items);
    let cache = Arc::new(cache);
    let hashes = Arc::new(hashes);

    let items_per_thread = 10_000usize;

    for num_threads in [2, 4, 8] {
        group.throughput(Throughput::Elements(
            (num_threads * items_per_thread) as u64,
        ));

        group.bench_with_input(
            BenchmarkId::new("lookup", num_threads),
            &num_threads,
            |b, &num_threads| {
                b.iter(|| {
                    let handles: Vec<_> = (0..num_threads)
                        .map(|t| {
                            let cache = Arc::clone(&cache);
                            let hashes = Arc::clone(&hashes);
                            thread::spawn(move || {
                                let base = t * items_per_thread;
                                for i in 0..items_per_thread {
                                    let idx = (base + i) % num_items;
                                    black_box(cache.lookup(black_box(hashes[idx])));
                                }
                            })
                        })
                        .collect();

                    for h in handles {
                        h.join().unwrap();
                    }
                });
            },
        );

        group.bench_with_input(
            BenchmarkId::new("mixed", num_threads),
            &num_threads,
            |b, &num_threads| {
                b.iter(|| {
                    let handles: Vec<_> = (0..num_threads)
                        .map(|t| {
                            let cache = Arc::clone(&cache);
                            let hashes = Arc::clone(&hashes);
                            thread::spawn(move || {
                                let base = t * items_per_thread;
                                for i in 0..items_per_thread {
                                    let idx = (base + i) % num_items;
                                    if i % 5 == 0 {
                                        // 20% inserts of new draw calls
                                        let draw = make_draw(num_items + base + i);
                                        black_box(cache.insert(draw.hash(), &draw));
                                    } else {
                                        black_box(cache.lookup(black_box(hashes[idx])));
                                    }
                                }
                            })
                        })
                        .collect();

                    for h in handles {
                        h.join().unwrap();
                    }
                });
            },
        );
    }

    group.finish();
}

criterion_group!(
    benches,
    bench_hash,
    bench_insert,
    bench_lookup_hit,
    bench_lookup_ring,
    bench_lookup_miss,
    bench_scans,
    bench_concurrent,
);
criterion_main!(benches);
