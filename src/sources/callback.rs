//! iRacing telemetry source over a push-style SDK.
//!
//! The SDK owns polling; this source only listens. One listener task
//! forwards SDK events as [`SourceEvent`]s and, on session changes, parses the
//! session YAML into a [`SessionDigest`] held behind a lock. Telemetry reads
//! go straight to the SDK, so there is no local frame copy to keep in sync.
//!
//! Answers whatever variables the SDK's frame carries under iRacing names,
//! which covers everything in [`vars`](crate::source::vars) except
//! `CarIdxLateralOffset`.

use async_trait::async_trait;
use parking_lot::{Mutex, RwLock};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast::{self, error::RecvError};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::worker::Worker;
use crate::Result;
use crate::config::IracingConfig;
use crate::providers::DefaultProviderFactory;
use crate::schema::{SessionInfo, SessionInfoParser};
use crate::sdk::{IracingSdk, SdkEvent, TelemetrySdk};
use crate::source::{DriverSessionInfo, EVENT_CHANNEL_CAPACITY, SourceEvent, TelemetrySource};

pub const CALLBACK_SOURCE_ID: &str = "iracing";

/// Everything the source needs from one session document.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SessionDigest {
    pub roster: Vec<DriverSessionInfo>,
    pub track_name: String,
    pub track_id: Option<i32>,
    pub track_length_km: f32,
    pub lap_limit: Option<u32>,
    pub player_car_idx: i32,
}

impl SessionDigest {
    pub fn from_session(info: &SessionInfo) -> Self {
        Self {
            roster: info.drivers().iter().map(|driver| driver.to_session_info()).collect(),
            track_name: info.weekend_info.display_name().to_string(),
            track_id: info.weekend_info.track_id,
            track_length_km: info.weekend_info.track_length_km().unwrap_or(0.0),
            lap_limit: info.lap_limit(),
            player_car_idx: info.player_car_idx(),
        }
    }
}

/// State shared between the source handle and its listener task.
struct Inner<S> {
    sdk: Arc<S>,
    parser: Mutex<SessionInfoParser>,
    digest: RwLock<Option<Arc<SessionDigest>>>,
    events: broadcast::Sender<SourceEvent>,
}

impl<S: TelemetrySdk> Inner<S> {
    /// Re-read the SDK's session document. A document that fails to parse
    /// leaves the previous digest in place.
    fn refresh_session(&self) {
        let Some(yaml) = self.sdk.session_yaml() else {
            debug!("Session update without a session document");
            return;
        };

        let parsed = self.parser.lock().parse(&yaml);
        match parsed {
            Ok(info) => {
                let digest = SessionDigest::from_session(&info);
                debug!(
                    track = %digest.track_name,
                    drivers = digest.roster.len(),
                    player = digest.player_car_idx,
                    "Session digest updated"
                );
                *self.digest.write() = Some(Arc::new(digest));
            }
            Err(e) => warn!(error = %e, "Session YAML rejected, keeping previous session"),
        }
    }

    /// Forget the session. Returns whether there was one.
    fn clear_session(&self) -> bool {
        self.parser.lock().clear();
        self.digest.write().take().is_some()
    }

    fn digest(&self) -> Option<Arc<SessionDigest>> {
        self.digest.read().clone()
    }

    async fn listen(&self, mut sdk_events: broadcast::Receiver<SdkEvent>, cancel: CancellationToken) {
        loop {
            let received = tokio::select! {
                _ = cancel.cancelled() => break,
                received = sdk_events.recv() => received,
            };

            let forwarded = match received {
                Ok(SdkEvent::Connected) => SourceEvent::Connected,
                Ok(SdkEvent::TelemetryUpdated) => SourceEvent::TelemetryUpdated,
                Ok(SdkEvent::SessionInfoUpdated) => {
                    self.refresh_session();
                    SourceEvent::SessionInfoUpdated
                }
                Ok(SdkEvent::Disconnected) => {
                    self.clear_session();
                    SourceEvent::Disconnected
                }
                Err(RecvError::Lagged(skipped)) => {
                    // A session update or a disconnect may be among the skipped events
                    debug!(skipped, "SDK event listener lagged");
                    if self.sdk.is_connected() {
                        self.refresh_session();
                        continue;
                    }
                    if !self.clear_session() {
                        continue;
                    }
                    SourceEvent::Disconnected
                }
                Err(RecvError::Closed) => break,
            };
            let _ = self.events.send(forwarded);
        }
        debug!("SDK event listener exited");
    }
}

/// Telemetry source driven by a [`TelemetrySdk`]'s events.
pub struct CallbackTelemetrySource<S: TelemetrySdk> {
    inner: Arc<Inner<S>>,
    stop_timeout: Duration,
    worker: Worker,
}

impl CallbackTelemetrySource<IracingSdk<DefaultProviderFactory>> {
    /// iRacing source over the platform's SDK.
    pub fn iracing(config: IracingConfig) -> Self {
        let stop_timeout = config.stop_timeout();
        Self::new(Arc::new(IracingSdk::with_defaults(config)), stop_timeout)
    }
}

impl<S: TelemetrySdk> CallbackTelemetrySource<S> {
    pub fn new(sdk: Arc<S>, stop_timeout: Duration) -> Self {
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        let inner = Inner {
            sdk,
            parser: Mutex::new(SessionInfoParser::new()),
            digest: RwLock::new(None),
            events,
        };
        Self { inner: Arc::new(inner), stop_timeout, worker: Worker::new() }
    }

    pub fn sdk(&self) -> &Arc<S> {
        &self.inner.sdk
    }

    /// The parsed session, if one has been received since connecting.
    pub fn session(&self) -> Option<Arc<SessionDigest>> {
        self.inner.digest()
    }

    fn with_session<T>(&self, default: T, f: impl FnOnce(&SessionDigest) -> Option<T>) -> T {
        self.inner.digest.read().as_deref().and_then(f).unwrap_or(default)
    }
}

#[async_trait]
impl<S: TelemetrySdk> TelemetrySource for CallbackTelemetrySource<S> {
    fn id(&self) -> &str {
        CALLBACK_SOURCE_ID
    }

    fn display_name(&self) -> &str {
        "iRacing"
    }

    async fn is_game_running(&self) -> Result<bool> {
        self.inner.sdk.is_sim_running().await
    }

    fn is_connected(&self) -> bool {
        self.inner.sdk.is_connected()
    }

    fn scalar_f32(&self, name: &str) -> f32 {
        self.inner.sdk.read_f32(name, 0).unwrap_or(0.0)
    }

    fn scalar_i32(&self, name: &str) -> i32 {
        self.inner.sdk.read_i32(name, 0).unwrap_or(0)
    }

    fn scalar_bool(&self, name: &str) -> bool {
        self.inner.sdk.read_bool(name, 0).unwrap_or(false)
    }

    fn array_f32(&self, name: &str, car_idx: usize) -> f32 {
        self.inner.sdk.read_f32(name, car_idx).unwrap_or(0.0)
    }

    fn array_i32(&self, name: &str, car_idx: usize) -> i32 {
        self.inner.sdk.read_i32(name, car_idx).unwrap_or(0)
    }

    fn array_bool(&self, name: &str, car_idx: usize) -> bool {
        self.inner.sdk.read_bool(name, car_idx).unwrap_or(false)
    }

    fn driver_count(&self) -> usize {
        self.with_session(0, |s| Some(s.roster.len()))
    }

    fn player_car_index(&self) -> i32 {
        self.with_session(-1, |s| Some(s.player_car_idx))
    }

    fn driver_info(&self, car_idx: i32) -> Option<DriverSessionInfo> {
        let digest = self.inner.digest()?;
        digest.roster.iter().find(|driver| driver.car_idx == car_idx).cloned()
    }

    fn track_name(&self) -> String {
        self.with_session(String::new(), |s| Some(s.track_name.clone()))
    }

    fn track_id(&self) -> Option<i32> {
        self.inner.digest()?.track_id
    }

    fn track_length_km(&self) -> f32 {
        self.with_session(0.0, |s| Some(s.track_length_km))
    }

    fn session_lap_limit(&self) -> Option<u32> {
        self.inner.digest()?.lap_limit
    }

    async fn start(&self) -> Result<()> {
        // Subscribe before starting the SDK so its first events are seen
        let sdk_events = self.inner.sdk.subscribe();
        let inner = Arc::clone(&self.inner);
        let spawned = self.worker.spawn_with(move |cancel| async move {
            inner.listen(sdk_events, cancel).await;
        });

        self.inner.sdk.start().await?;
        if spawned {
            info!("iRacing source started");
        }
        Ok(())
    }

    async fn stop(&self) {
        let listener_stopped = self.worker.stop(self.stop_timeout, "iracing-listener").await;
        self.inner.sdk.stop().await;
        self.inner.clear_session();
        if listener_stopped {
            info!("iRacing source stopped");
            let _ = self.inner.events.send(SourceEvent::Disconnected);
        }
    }

    fn subscribe(&self) -> broadcast::Receiver<SourceEvent> {
        self.inner.events.subscribe()
    }
}
