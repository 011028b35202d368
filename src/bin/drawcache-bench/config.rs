//! Configuration for the draw-call cache load driver.

use drawcache::DrawCacheConfig;
use serde::Deserialize;
use std::time::Duration;

/// Top-level configuration.
#[derive(Deserialize)]
pub struct Config {
    pub general: GeneralConfig,
    #[serde(default)]
    pub cache: DrawCacheConfig,
    pub workload: WorkloadConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// General run settings.
#[derive(Deserialize)]
pub struct GeneralConfig {
    /// How long to run the measurement phase.
    #[serde(deserialize_with = "deserialize_duration")]
    pub duration: Duration,
    /// How long to warm up before recording.
    #[serde(deserialize_with = "deserialize_duration")]
    pub warmup: Duration,
    /// Number of worker threads issuing draw calls.
    pub threads: usize,
    /// Wall-clock length of one frame (e.g. "16ms").
    #[serde(
        default = "default_frame_interval",
        deserialize_with = "deserialize_duration"
    )]
    pub frame_interval: Duration,
    /// Run the classification sweeps every this many frames.
    #[serde(default = "default_sweep_frames")]
    pub sweep_frames: u64,
}

/// Synthetic draw-call workload.
#[derive(Deserialize)]
pub struct WorkloadConfig {
    /// Number of distinct draw calls in the scene.
    pub draw_calls: usize,
    /// Seed for generating the scene and worker RNGs.
    #[serde(default = "default_seed")]
    pub seed: u64,
    /// Skew toward low-numbered draw calls. 1.0 is uniform; larger values
    /// concentrate traffic on a smaller hot set.
    #[serde(default = "default_skew")]
    pub skew: f64,
    /// Frames without a hit before an entry is marked cold.
    #[serde(default = "default_cold_frames")]
    pub cold_frames: u64,
    /// Upper bound for synthetic execution times.
    #[serde(default = "default_max_execution_nanos")]
    pub max_execution_nanos: u64,
}

/// Log output settings.
#[derive(Deserialize)]
pub struct LoggingConfig {
    /// Default filter when RUST_LOG is not set.
    #[serde(default = "default_level")]
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_level(),
        }
    }
}

fn default_frame_interval() -> Duration {
    Duration::from_millis(16)
}

fn default_sweep_frames() -> u64 {
    60
}

fn default_seed() -> u64 {
    42
}

fn default_skew() -> f64 {
    2.0
}

fn default_cold_frames() -> u64 {
    120
}

fn default_max_execution_nanos() -> u64 {
    50_000
}

fn default_level() -> String {
    "info".to_string()
}

impl Config {
    pub fn load(path: &std::path::Path) -> Result<Self, Box<dyn std::error::Error>> {
        let contents = std::fs::read_to_string(path)?;
        let config: Config = toml::from_str(&contents)?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<(), String> {
        if self.general.threads == 0 {
            return Err("general.threads must be at least 1".to_string());
        }
        if self.general.frame_interval.is_zero() {
            return Err("general.frame_interval must be non-zero".to_string());
        }
        if self.general.sweep_frames == 0 {
            return Err("general.sweep_frames must be at least 1".to_string());
        }
        if self.workload.draw_calls == 0 {
            return Err("workload.draw_calls must be at least 1".to_string());
        }
        if self.workload.skew < 1.0 {
            return Err(format!(
                "workload.skew must be >= 1.0 (got {})",
                self.workload.skew
            ));
        }
        if self.workload.max_execution_nanos == 0 {
            return Err("workload.max_execution_nanos must be at least 1".to_string());
        }
        Ok(())
    }
}

/// Deserialize a duration from a human-readable string (e.g., "60s", "16ms").
fn deserialize_duration<'de, D>(deserializer: D) -> Result<Duration, D::Error>
where
    D: serde::Deserializer<'de>,
{
    let s = String::deserialize(deserializer)?;
    humantime::parse_duration(&s).map_err(serde::de::Error::custom)
}
