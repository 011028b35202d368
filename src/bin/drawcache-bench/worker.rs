//! Worker thread issuing synthetic draw calls.

use crate::config::WorkloadConfig;
use crate::metrics;

use drawcache::{DrawCall, DrawCallCache, EntryFlags};
use rand::prelude::*;
use rand_xoshiro::Xoshiro256PlusPlus;
use std::sync::atomic::{AtomicU8, Ordering};
use std::time::Instant;

/// Run phase, controlled by the main thread and read by workers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum Phase {
    /// Run the workload but don't count it.
    Warmup = 0,
    /// Count operations.
    Running = 1,
    /// Workers should exit.
    Stop = 2,
}

impl Phase {
    #[inline]
    pub fn from_u8(v: u8) -> Self {
        match v {
            0 => Phase::Warmup,
            1 => Phase::Running,
            _ => Phase::Stop,
        }
    }
}

/// Shared state between the main thread and workers.
pub struct SharedState {
    phase: AtomicU8,
}

impl SharedState {
    pub fn new() -> Self {
        Self {
            phase: AtomicU8::new(Phase::Warmup as u8),
        }
    }

    #[inline]
    pub fn phase(&self) -> Phase {
        Phase::from_u8(self.phase.load(Ordering::Acquire))
    }

    pub fn set_phase(&self, phase: Phase) {
        self.phase.store(phase as u8, Ordering::Release);
    }
}

/// Generate the scene: `count` distinct draw calls with a plausible mix of
/// indexed, instanced, and static geometry.
pub fn generate_scene(count: usize, seed: u64) -> Vec<DrawCall> {
    let mut rng = Xoshiro256PlusPlus::seed_from_u64(seed);

    (0..count)
        .map(|i| {
            let indexed = rng.random_bool(0.7);
            let instanced = rng.random_bool(0.1);
            let vertex_count = rng.random_range(3..65_536);

            let mut flags = EntryFlags::empty();
            if indexed {
                flags |= EntryFlags::INDEXED;
            }
            if instanced {
                flags |= EntryFlags::INSTANCED;
            }
            if rng.random_bool(0.5) {
                flags |= EntryFlags::STATIC;
            }

            DrawCall {
                shader_id: rng.random_range(1..256),
                vao_id: i as i32 + 1,
                vertex_buffer_id: rng.random_range(1..4096),
                vertex_count,
                index_count: if indexed { vertex_count * 3 } else { 0 },
                instance_count: if instanced { rng.random_range(2..1024) } else { 1 },
                primitive_type: 4,
                flags,
            }
        })
        .collect()
}

/// Run a single worker thread until the phase turns to [`Phase::Stop`].
pub fn run_worker(
    id: usize,
    workload: &WorkloadConfig,
    scene: &[DrawCall],
    cache: &DrawCallCache,
    shared: &SharedState,
) {
    let mut rng = Xoshiro256PlusPlus::seed_from_u64(workload.seed.wrapping_add(id as u64 + 1));
    let hashes: Vec<u64> = scene.iter().map(DrawCall::hash).collect();

    loop {
        let phase = shared.phase();
        if phase == Phase::Stop {
            break;
        }

        // skewed pick: low indices are the scene's frequently drawn objects
        let u: f64 = rng.random();
        let index = ((u.powf(workload.skew) * scene.len() as f64) as usize).min(scene.len() - 1);
        let hash = hashes[index];

        let execution = rng.random_range(1..=workload.max_execution_nanos);

        let start = Instant::now();
        let missed = cache.lookup(hash).is_none();
        if missed {
            cache.insert(hash, &scene[index]);
        }
        cache.record_execution(hash, execution);
        let elapsed = start.elapsed().as_nanos() as u64;

        if phase == Phase::Running {
            metrics::DRAWS.increment();
            if missed {
                metrics::MISSES.increment();
            }
            let _ = metrics::DRAW_LATENCY.increment(elapsed);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_scene_is_deterministic() {
        let a = generate_scene(100, 7);
        let b = generate_scene(100, 7);
        assert_eq!(a, b);
        assert_ne!(a, generate_scene(100, 8));
    }

    #[test]
    fn test_scene_hashes_are_distinct() {
        let scene = generate_scene(1000, 1);
        let mut hashes: Vec<u64> = scene.iter().map(DrawCall::hash).collect();
        hashes.sort_unstable();
        hashes.dedup();
        assert_eq!(hashes.len(), 1000);
    }

    #[test]
    fn test_phase_roundtrip() {
        for phase in [Phase::Warmup, Phase::Running, Phase::Stop] {
            assert_eq!(Phase::from_u8(phase as u8), phase);
        }
    }
}
