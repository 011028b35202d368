//! Load driver metrics.

use metriken::histogram::Histogram;
use metriken::{AtomicHistogram, Counter, metric};

#[metric(name = "draw_count", description = "Draw calls issued while running")]
pub static DRAWS: Counter = Counter::new();

#[metric(name = "draw_misses", description = "Draw calls that missed the cache")]
pub static MISSES: Counter = Counter::new();

#[metric(
    name = "draw_latency",
    description = "Lookup + insert + record latency histogram (nanoseconds)"
)]
pub static DRAW_LATENCY: AtomicHistogram = AtomicHistogram::new(7, 64);

/// Latency summary in microseconds.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct Percentiles {
    pub p50: f64,
    pub p90: f64,
    pub p99: f64,
    pub p999: f64,
    pub max: f64,
}

impl Percentiles {
    pub fn from_histogram(hist: &Histogram) -> Self {
        Self {
            p50: percentile_from_histogram(hist, 50.0) / 1000.0,
            p90: percentile_from_histogram(hist, 90.0) / 1000.0,
            p99: percentile_from_histogram(hist, 99.0) / 1000.0,
            p999: percentile_from_histogram(hist, 99.9) / 1000.0,
            max: percentile_from_histogram(hist, 100.0) / 1000.0,
        }
    }

    /// Percentiles of everything recorded between `previous` and `current`.
    pub fn interval(current: Option<&Histogram>, previous: Option<&Histogram>) -> Self {
        match (current, previous) {
            (Some(current), Some(previous)) => current
                .wrapping_sub(previous)
                .map(|delta| Self::from_histogram(&delta))
                .unwrap_or_default(),
            (Some(current), None) => Self::from_histogram(current),
            _ => Self::default(),
        }
    }
}

fn percentile_from_histogram(hist: &Histogram, p: f64) -> f64 {
    if let Ok(Some(results)) = hist.percentiles(&[p])
        && let Some((_pct, bucket)) = results.first()
    {
        return bucket.end() as f64;
    }
    0.0
}
