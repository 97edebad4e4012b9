//! Live sim-racing telemetry with automatic game detection.
//!
//! Paddock reads telemetry from whichever supported simulator is running and
//! hands consumers a single, stable handle to it. When no simulator is live,
//! a synthetic demo session takes over so displays always have something to
//! show.
//!
//! # Features
//!
//! - **Game detection**: iRacing and rFactor 2 / Le Mans Ultimate are probed
//!   in the background; the first one found becomes the current source
//! - **Demo fallback**: a deterministic synthetic field of cars runs whenever
//!   nothing is live
//! - **One handle**: [`TelemetryAccessProxy`] forwards every call to the
//!   current source, across switches
//! - **Track outlines**: the player's first lap on a track is dead-reckoned
//!   into a normalized outline and cached on disk
//!
//! # Quick Start
//!
//! ```rust,no_run
//! use paddock::{Paddock, PaddockConfig, TelemetrySource, vars};
//!
//! #[tokio::main]
//! async fn main() -> paddock::Result<()> {
//!     paddock::init_logging("paddock=info");
//!
//!     let paddock = Paddock::new(PaddockConfig::default())?;
//!     paddock.start().await;
//!
//!     let telemetry = paddock.telemetry();
//!     println!("{} rpm on {}", telemetry.scalar_f32(vars::RPM), telemetry.track_name());
//!
//!     paddock.shutdown().await;
//!     Ok(())
//! }
//! ```

mod error;
#[cfg(any(test, feature = "benchmark"))]
pub mod test_utils;
pub mod types;
mod yaml_utils;

pub mod config;
pub mod logging;
pub mod process;
pub mod schema;
pub mod source;

// iRacing SDK
pub mod provider;
pub mod providers;
pub mod sdk;

pub mod controller;
pub mod proxy;
pub mod sources;
pub mod track;

// Platform-specific modules
#[cfg(windows)]
pub mod windows;

pub use config::PaddockConfig;
pub use controller::{ArbitrationState, ControllerEvent, GameDetectionController};
pub use error::*;
pub use logging::init_logging;
pub use proxy::TelemetryAccessProxy;
pub use schema::{SessionInfo, SessionInfoParser};
pub use source::{DriverSessionInfo, SourceEvent, SourceId, TelemetrySource, vars};
pub use sources::{CallbackTelemetrySource, SharedMemoryTelemetrySource, SyntheticTelemetrySource};
pub use track::{OutlineCache, OutlineFeeder, TrackOutline, TrackOutlineCapture};

use parking_lot::Mutex;
use std::sync::Arc;
use tracing::info;

/// Everything wired together: the controller with both live sources
/// registered, a proxy over it, and outline capture fed from the proxy.
///
/// Built by [`Paddock::new`] from configuration; [`Paddock::with_sources`]
/// accepts arbitrary sources instead.
pub struct Paddock {
    config: PaddockConfig,
    controller: Arc<GameDetectionController>,
    proxy: TelemetryAccessProxy,
    capture: Arc<TrackOutlineCapture>,
    feeder: Mutex<Option<OutlineFeeder>>,
}

impl Paddock {
    /// Validate `config` and register iRacing, then rFactor 2.
    pub fn new(config: PaddockConfig) -> Result<Self> {
        config.validate()?;
        let synthetic = Arc::new(SyntheticTelemetrySource::new(config.synthetic.clone()));
        let sources: Vec<Arc<dyn TelemetrySource>> = vec![
            Arc::new(CallbackTelemetrySource::iracing(config.iracing.clone())),
            Arc::new(SharedMemoryTelemetrySource::with_defaults(config.shared_memory.clone())),
        ];
        Ok(Self::with_sources(config, synthetic, sources))
    }

    /// Wire `synthetic` and `sources` (in priority order) without validation.
    pub fn with_sources(
        config: PaddockConfig,
        synthetic: Arc<dyn TelemetrySource>,
        sources: Vec<Arc<dyn TelemetrySource>>,
    ) -> Self {
        let controller = Arc::new(GameDetectionController::new(synthetic, config.detection.clone()));
        for source in sources {
            controller.register(source);
        }
        let proxy = TelemetryAccessProxy::new(controller.resolver());
        let capture = Arc::new(TrackOutlineCapture::new(OutlineCache::new(config.track.cache_dir.clone())));

        Self { config, controller, proxy, capture, feeder: Mutex::new(None) }
    }

    /// Start detection and the outline feeder. Idempotent.
    pub async fn start(&self) {
        self.controller.start().await;

        let mut feeder = self.feeder.lock();
        if feeder.is_none() {
            let source: Arc<dyn TelemetrySource> = Arc::new(self.proxy.clone());
            *feeder = Some(OutlineFeeder::spawn(source, Arc::clone(&self.capture), self.config.track.feed_interval()));
            info!(sources = ?self.controller.registered_sources(), "Paddock started");
        }
    }

    /// Stop the feeder, then detection and every running source. Idempotent.
    pub async fn shutdown(&self) {
        let feeder = self.feeder.lock().take();
        if let Some(feeder) = feeder {
            feeder.stop(self.config.detection.shutdown_timeout()).await;
        }
        self.controller.shutdown().await;
    }

    /// The stable telemetry handle for consumers.
    pub fn telemetry(&self) -> TelemetryAccessProxy {
        self.proxy.clone()
    }

    pub fn controller(&self) -> &Arc<GameDetectionController> {
        &self.controller
    }

    pub fn capture(&self) -> &Arc<TrackOutlineCapture> {
        &self.capture
    }

    pub fn config(&self) -> &PaddockConfig {
        &self.config
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_wiring_registers_iracing_before_rfactor() {
        let paddock = Paddock::new(PaddockConfig::default()).unwrap();
        assert_eq!(paddock.controller().registered_sources(), vec!["iracing".to_string(), "rfactor2".to_string()]);
        assert_eq!(paddock.telemetry().current_id(), "demo");
    }

    #[test]
    fn invalid_config_is_rejected() {
        let mut config = PaddockConfig::default();
        config.iracing.reconnect_initial_ms = 0;
        assert!(matches!(Paddock::new(config), Err(TelemetryError::Config { .. })));
    }
}
