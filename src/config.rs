//! Runtime configuration.
//!
//! Configuration is read-only: it is loaded from a YAML document (or taken
//! from [`PaddockConfig::default`]) and then handed to the components at
//! construction time. Every field has a default, so a partial document, or an
//! empty one, is valid. Intervals are stored as milliseconds.
//!
//! ```yaml
//! detection:
//!   scan_interval_ms: 2000
//!   monitor_interval_ms: 1000
//!   demo_fallback: true
//! shared_memory:
//!   process_names: ["rFactor2.exe", "Le Mans Ultimate.exe"]
//! track:
//!   cache_dir: /var/lib/paddock/outlines
//! ```

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::debug;

use crate::{Result, TelemetryError};

/// Overrides the outline cache directory.
pub const ENV_CACHE_DIR: &str = "PADDOCK_CACHE_DIR";
/// Overrides `detection.demo_fallback` (`true`/`false`/`1`/`0`).
pub const ENV_DEMO_FALLBACK: &str = "PADDOCK_DEMO_FALLBACK";

/// Top-level configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PaddockConfig {
    pub detection: DetectionConfig,
    pub synthetic: SyntheticConfig,
    pub shared_memory: SharedMemoryConfig,
    pub iracing: IracingConfig,
    pub track: TrackConfig,
}

/// Game detection and arbitration timing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DetectionConfig {
    /// Probe cadence while no live source is connected
    pub scan_interval_ms: u64,
    /// Probe cadence for the active source while connected
    pub monitor_interval_ms: u64,
    /// Upper bound on waiting for the detection loop during shutdown
    pub shutdown_timeout_ms: u64,
    /// Run synthetic telemetry when no simulator is live
    pub demo_fallback: bool,
}

impl Default for DetectionConfig {
    fn default() -> Self {
        Self {
            scan_interval_ms: 2000,
            monitor_interval_ms: 1000,
            shutdown_timeout_ms: 2000,
            demo_fallback: true,
        }
    }
}

impl DetectionConfig {
    pub fn scan_interval(&self) -> Duration {
        Duration::from_millis(self.scan_interval_ms)
    }

    pub fn monitor_interval(&self) -> Duration {
        Duration::from_millis(self.monitor_interval_ms)
    }

    pub fn shutdown_timeout(&self) -> Duration {
        Duration::from_millis(self.shutdown_timeout_ms)
    }
}

/// Synthetic (demo) telemetry generation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SyntheticConfig {
    pub tick_interval_ms: u64,
    /// Fixed RNG seed; `None` seeds from the OS
    pub seed: Option<u64>,
    /// Length of one synthetic lap in seconds
    pub lap_seconds: f32,
    pub stop_timeout_ms: u64,
}

impl Default for SyntheticConfig {
    fn default() -> Self {
        Self { tick_interval_ms: 16, seed: None, lap_seconds: 90.0, stop_timeout_ms: 1000 }
    }
}

impl SyntheticConfig {
    pub fn tick_interval(&self) -> Duration {
        Duration::from_millis(self.tick_interval_ms)
    }

    pub fn stop_timeout(&self) -> Duration {
        Duration::from_millis(self.stop_timeout_ms)
    }
}

/// rFactor 2 / Le Mans Ultimate shared memory polling.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SharedMemoryConfig {
    pub poll_interval_ms: u64,
    pub process_names: Vec<String>,
    pub stop_timeout_ms: u64,
}

impl Default for SharedMemoryConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: 20,
            process_names: vec!["rFactor2.exe".to_string(), "Le Mans Ultimate.exe".to_string()],
            stop_timeout_ms: 1000,
        }
    }
}

impl SharedMemoryConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn stop_timeout(&self) -> Duration {
        Duration::from_millis(self.stop_timeout_ms)
    }
}

/// iRacing SDK settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct IracingConfig {
    pub process_names: Vec<String>,
    /// First reconnect delay after the sim goes away; doubles up to `reconnect_max_ms`
    pub reconnect_initial_ms: u64,
    pub reconnect_max_ms: u64,
    pub stop_timeout_ms: u64,
}

impl Default for IracingConfig {
    fn default() -> Self {
        Self {
            process_names: vec!["iRacingSim64DX11.exe".to_string()],
            reconnect_initial_ms: 500,
            reconnect_max_ms: 5000,
            stop_timeout_ms: 1000,
        }
    }
}

impl IracingConfig {
    pub fn reconnect_initial(&self) -> Duration {
        Duration::from_millis(self.reconnect_initial_ms)
    }

    pub fn reconnect_max(&self) -> Duration {
        Duration::from_millis(self.reconnect_max_ms)
    }

    pub fn stop_timeout(&self) -> Duration {
        Duration::from_millis(self.stop_timeout_ms)
    }
}

/// Track outline capture.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TrackConfig {
    /// Directory holding `track_<id>.json` outlines
    pub cache_dir: PathBuf,
    /// Telemetry sampling cadence of the outline feeder
    pub feed_interval_ms: u64,
}

impl Default for TrackConfig {
    fn default() -> Self {
        Self { cache_dir: default_cache_dir(), feed_interval_ms: 16 }
    }
}

impl TrackConfig {
    pub fn feed_interval(&self) -> Duration {
        Duration::from_millis(self.feed_interval_ms)
    }
}

/// Per-user data directory, or the temp dir when the platform has none.
pub fn default_cache_dir() -> PathBuf {
    dirs::data_local_dir()
        .unwrap_or_else(std::env::temp_dir)
        .join("paddock")
        .join("track_outlines")
}

impl PaddockConfig {
    /// Parse a YAML document. Unknown keys are ignored, missing keys default.
    pub fn from_yaml_str(yaml: &str) -> Result<Self> {
        if yaml.trim().is_empty() {
            return Ok(Self::default());
        }
        let config: Self = serde_yaml_ng::from_str(yaml)
            .map_err(|e| TelemetryError::parse_error("Configuration YAML", e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Load from a YAML file and apply environment overrides.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)
            .map_err(|e| TelemetryError::file_error(path.to_path_buf(), e))?;
        let mut config = Self::from_yaml_str(&text)?;
        config.apply_env_overrides();
        debug!(path = %path.display(), "Loaded configuration");
        Ok(config)
    }

    /// Apply `PADDOCK_*` environment overrides.
    pub fn apply_env_overrides(&mut self) {
        self.apply_overrides_from(|key| std::env::var(key).ok());
    }

    /// Apply overrides from an arbitrary lookup. Unparseable values are ignored.
    pub fn apply_overrides_from<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(dir) = lookup(ENV_CACHE_DIR).filter(|v| !v.trim().is_empty()) {
            debug!(cache_dir = %dir, "Cache directory overridden from environment");
            self.track.cache_dir = PathBuf::from(dir);
        }

        if let Some(raw) = lookup(ENV_DEMO_FALLBACK) {
            match raw.trim().to_ascii_lowercase().as_str() {
                "1" | "true" | "yes" | "on" => self.detection.demo_fallback = true,
                "0" | "false" | "no" | "off" => self.detection.demo_fallback = false,
                other => debug!(value = other, "Ignoring unrecognised {}", ENV_DEMO_FALLBACK),
            }
        }
    }

    /// Reject values that would make a loop spin.
    pub fn validate(&self) -> Result<()> {
        let intervals = [
            ("detection.scan_interval_ms", self.detection.scan_interval_ms),
            ("detection.monitor_interval_ms", self.detection.monitor_interval_ms),
            ("synthetic.tick_interval_ms", self.synthetic.tick_interval_ms),
            ("shared_memory.poll_interval_ms", self.shared_memory.poll_interval_ms),
            ("iracing.reconnect_initial_ms", self.iracing.reconnect_initial_ms),
            ("iracing.reconnect_max_ms", self.iracing.reconnect_max_ms),
            ("track.feed_interval_ms", self.track.feed_interval_ms),
        ];
        for (name, value) in intervals {
            if value == 0 {
                return Err(TelemetryError::config_error(format!("{name} must be greater than 0")));
            }
        }

        if self.iracing.reconnect_max_ms < self.iracing.reconnect_initial_ms {
            return Err(TelemetryError::config_error(
                "iracing.reconnect_max_ms must not be below iracing.reconnect_initial_ms",
            ));
        }

        if !(self.synthetic.lap_seconds.is_finite() && self.synthetic.lap_seconds > 1.0) {
            return Err(TelemetryError::config_error("synthetic.lap_seconds must be above 1"));
        }

        Ok(())
    }
}
