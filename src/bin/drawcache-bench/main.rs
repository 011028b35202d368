//! In-process load driver for the draw-call cache.
//!
//! Worker threads replay a synthetic scene of draw calls against one shared
//! cache while the main thread plays the render loop: it advances the frame
//! counter on a fixed interval and periodically runs the classification
//! sweeps, logging cache statistics as it goes.

mod config;
mod logging;
mod metrics;
mod worker;

use crate::config::Config;
use crate::metrics::Percentiles;
use crate::worker::{Phase, SharedState};

use clap::Parser;
use drawcache::{DrawCacheBuilder, DrawCallCache};
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::{Duration, Instant};
use tracing::{error, info, warn};

#[derive(Parser)]
#[command(name = "drawcache-bench")]
#[command(about = "In-process draw-call cache benchmark")]
struct Args {
    /// Path to configuration file
    config: PathBuf,
}

fn main() {
    let args = Args::parse();

    let config = match Config::load(&args.config) {
        Ok(c) => c,
        Err(e) => {
            eprintln!("Failed to load config: {e}");
            std::process::exit(1);
        }
    };

    logging::init(&config.logging);

    if let Err(e) = run(config) {
        error!("{e}");
        std::process::exit(1);
    }
}

fn run(config: Config) -> Result<(), Box<dyn std::error::Error>> {
    log_config(&config);

    let mut cache = Arc::new(DrawCacheBuilder::from_config(config.cache.clone()).build()?);
    let scene = Arc::new(worker::generate_scene(
        config.workload.draw_calls,
        config.workload.seed,
    ));
    let shared = Arc::new(SharedState::new());

    // Signal handler
    let running = Arc::new(AtomicBool::new(true));
    let r = running.clone();
    ctrlc::set_handler(move || {
        if !r.swap(false, Ordering::SeqCst) {
            warn!("received second signal, forcing immediate exit");
            std::process::exit(1);
        }
        info!("received shutdown signal, stopping workers");
    })?;

    let config = Arc::new(config);
    let mut handles = Vec::with_capacity(config.general.threads);

    for id in 0..config.general.threads {
        let cache = Arc::clone(&cache);
        let scene = Arc::clone(&scene);
        let shared = Arc::clone(&shared);
        let config = Arc::clone(&config);

        let handle = thread::Builder::new()
            .name(format!("worker-{id}"))
            .spawn(move || {
                worker::run_worker(id, &config.workload, &scene, &cache, &shared);
            })?;

        handles.push(handle);
    }

    info!(warmup = ?config.general.warmup, "warming up");

    // Main thread: render loop
    let start = Instant::now();
    let report_interval = Duration::from_secs(1);
    let mut last_report = Instant::now();
    let mut last_draws = 0u64;
    let mut last_histogram = None;
    let mut measure_start: Option<Instant> = None;
    let mut next_frame = Instant::now() + config.general.frame_interval;

    loop {
        let now = Instant::now();
        if next_frame > now {
            thread::sleep(next_frame - now);
        }
        next_frame += config.general.frame_interval;

        if !running.load(Ordering::SeqCst) {
            break;
        }

        let frame = cache.advance_frame();
        if frame % config.general.sweep_frames == 0 {
            sweep(&cache, config.workload.cold_frames, frame);
        }

        let elapsed = start.elapsed();
        if elapsed >= config.general.warmup + config.general.duration {
            break;
        }

        if measure_start.is_none() && elapsed >= config.general.warmup {
            shared.set_phase(Phase::Running);
            measure_start = Some(Instant::now());
            last_report = Instant::now();
            last_draws = metrics::DRAWS.value();
            last_histogram = metrics::DRAW_LATENCY.load();
            info!(duration = ?config.general.duration, "running");
        }

        if measure_start.is_some() && last_report.elapsed() >= report_interval {
            let draws = metrics::DRAWS.value();
            let rate = (draws - last_draws) as f64 / last_report.elapsed().as_secs_f64();
            last_draws = draws;
            last_report = Instant::now();

            let current_histogram = metrics::DRAW_LATENCY.load();
            let p = Percentiles::interval(current_histogram.as_ref(), last_histogram.as_ref());
            last_histogram = current_histogram;

            info!(
                draws_per_sec = rate as u64,
                p50_us = p.p50,
                p99_us = p.p99,
                max_us = p.max,
                "{}",
                cache.statistics()
            );
        }
    }

    shared.set_phase(Phase::Stop);
    for handle in handles {
        if handle.join().is_err() {
            warn!("worker thread panicked");
        }
    }

    let measured = measure_start.map(|s| s.elapsed()).unwrap_or_default();
    log_summary(&cache, measured);

    cache.close();
    if let Some(cache) = Arc::get_mut(&mut cache) {
        cache.release();
    }

    Ok(())
}

/// Run the per-interval classification sweeps.
fn sweep(cache: &DrawCallCache, cold_frames: u64, frame: u64) {
    let cold = cache.mark_cold_entries(cold_frames);
    let indirect = cache.indirect_ready_entries().len();
    let hot = cache.hot_entries().len();

    info!(frame, hot, indirect, cold, "classification sweep");
}

fn log_config(config: &Config) {
    info!(
        capacity = config.cache.effective_capacity(),
        table_bytes = config.cache.table_bytes(),
        bloom_bits_per_entry = config.cache.bloom_bits_per_entry,
        hugepages = ?config.cache.hugepage_size,
        "cache configuration"
    );
    info!(
        threads = config.general.threads,
        duration = ?config.general.duration,
        warmup = ?config.general.warmup,
        frame_interval = ?config.general.frame_interval,
        sweep_frames = config.general.sweep_frames,
        draw_calls = config.workload.draw_calls,
        skew = config.workload.skew,
        "workload configuration"
    );
}

fn log_summary(cache: &DrawCallCache, measured: Duration) {
    let draws = metrics::DRAWS.value();
    let misses = metrics::MISSES.value();
    let secs = measured.as_secs_f64();
    let rate = if secs > 0.0 { draws as f64 / secs } else { 0.0 };
    let latency = metrics::DRAW_LATENCY
        .load()
        .map(|hist| Percentiles::from_histogram(&hist))
        .unwrap_or_default();

    let stats = cache.statistics();
    info!(
        draws,
        draws_per_sec = rate as u64,
        misses,
        p50_us = latency.p50,
        p90_us = latency.p90,
        p99_us = latency.p99,
        p999_us = latency.p999,
        max_us = latency.max,
        hit_rate = %format!("{:.2}%", stats.hit_rate * 100.0),
        entries = stats.entry_count,
        evictions = stats.evictions,
        collisions = stats.collisions,
        frames = stats.current_frame,
        "final summary"
    );
}
