//! One stable telemetry handle for consumers.

use async_trait::async_trait;
use std::sync::Arc;
use tokio::sync::broadcast;

use crate::Result;
use crate::source::{DriverSessionInfo, SourceEvent, TelemetrySource};

pub const PROXY_SOURCE_ID: &str = "proxy";

/// Answers "which source is current right now?".
pub type SourceResolver = Arc<dyn Fn() -> Arc<dyn TelemetrySource> + Send + Sync>;

/// Forwards every call to whichever source the resolver names at call time.
///
/// Two consecutive calls may be answered by different sources if the
/// controller switched in between; each answer is self-consistent on its
/// own. Events are not carried across switches: [`subscribe`] hands out the
/// receiver of the source current at that moment, so long-lived consumers
/// should poll accessors rather than rely on notifications.
///
/// [`subscribe`]: TelemetrySource::subscribe
#[derive(Clone)]
pub struct TelemetryAccessProxy {
    resolver: SourceResolver,
}

impl TelemetryAccessProxy {
    pub fn new(resolver: SourceResolver) -> Self {
        Self { resolver }
    }

    /// Proxy that always forwards to `source`.
    pub fn fixed(source: Arc<dyn TelemetrySource>) -> Self {
        Self::new(Arc::new(move || Arc::clone(&source)))
    }

    /// The source that would answer a call made now.
    pub fn current(&self) -> Arc<dyn TelemetrySource> {
        (self.resolver)()
    }

    pub fn current_id(&self) -> String {
        self.current().id().to_string()
    }
}

#[async_trait]
impl TelemetrySource for TelemetryAccessProxy {
    fn id(&self) -> &str {
        PROXY_SOURCE_ID
    }

    fn display_name(&self) -> &str {
        "Current telemetry source"
    }

    async fn is_game_running(&self) -> Result<bool> {
        self.current().is_game_running().await
    }

    fn is_connected(&self) -> bool {
        self.current().is_connected()
    }

    fn scalar_f32(&self, name: &str) -> f32 {
        self.current().scalar_f32(name)
    }

    fn scalar_i32(&self, name: &str) -> i32 {
        self.current().scalar_i32(name)
    }

    fn scalar_bool(&self, name: &str) -> bool {
        self.current().scalar_bool(name)
    }

    fn array_f32(&self, name: &str, car_idx: usize) -> f32 {
        self.current().array_f32(name, car_idx)
    }

    fn array_i32(&self, name: &str, car_idx: usize) -> i32 {
        self.current().array_i32(name, car_idx)
    }

    fn array_bool(&self, name: &str, car_idx: usize) -> bool {
        self.current().array_bool(name, car_idx)
    }

    fn driver_count(&self) -> usize {
        self.current().driver_count()
    }

    fn player_car_index(&self) -> i32 {
        self.current().player_car_index()
    }

    fn driver_info(&self, car_idx: i32) -> Option<DriverSessionInfo> {
        self.current().driver_info(car_idx)
    }

    fn track_name(&self) -> String {
        self.current().track_name()
    }

    fn track_id(&self) -> Option<i32> {
        self.current().track_id()
    }

    fn track_length_km(&self) -> f32 {
        self.current().track_length_km()
    }

    fn session_lap_limit(&self) -> Option<u32> {
        self.current().session_lap_limit()
    }

    async fn start(&self) -> Result<()> {
        self.current().start().await
    }

    async fn stop(&self) {
        self.current().stop().await
    }

    fn subscribe(&self) -> broadcast::Receiver<SourceEvent> {
        self.current().subscribe()
    }
}
