//! Push-style iRacing SDK.
//!
//! [`TelemetrySdk`] is the seam the callback source is written against: an
//! SDK that owns its own polling, announces changes through events, and
//! answers typed reads against the newest frame. [`IracingSdk`] is the real
//! implementation. Its pump task opens a [`Provider`] through a
//! [`ProviderFactory`], publishes every frame, fetches session YAML when the
//! session version moves, and reopens with backoff whenever the sim goes away.
//!
//! ```text
//! ProviderFactory::open ──► Provider::next_frame ──► watch<Arc<FramePacket>>
//!        ▲                          │                         │
//!        │ backoff                  │ Ok(None)                ▼
//!        └───────── Disconnected ◄──┘                 read_f32 / read_i32
//! ```

use async_trait::async_trait;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tokio::sync::{broadcast, watch};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};

use crate::Result;
use crate::config::IracingConfig;
use crate::process::{ProcessProbe, SysinfoProcessProbe};
use crate::provider::{Provider, ProviderFactory};
use crate::providers::DefaultProviderFactory;
use crate::source::EVENT_CHANNEL_CAPACITY;
use crate::sources::worker::Worker;
use crate::types::FramePacket;

/// Base delay of the transient error backoff: 100 ms, 200 ms, ... 1.6 s.
const ERROR_BACKOFF_BASE: Duration = Duration::from_millis(50);
const ERROR_BACKOFF_MAX_SHIFT: u32 = 5;

/// Notifications from the SDK's polling task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SdkEvent {
    Connected,
    Disconnected,
    TelemetryUpdated,
    SessionInfoUpdated,
}

/// A simulator SDK that polls on its own and pushes change notifications.
#[async_trait]
pub trait TelemetrySdk: Send + Sync + 'static {
    /// Start polling. Idempotent.
    async fn start(&self) -> Result<()>;

    /// Stop polling and forget the current frame. Idempotent.
    async fn stop(&self);

    fn subscribe(&self) -> broadcast::Receiver<SdkEvent>;

    /// Whether frames are currently arriving.
    fn is_connected(&self) -> bool;

    /// Whether the simulator process exists, regardless of SDK state.
    async fn is_sim_running(&self) -> Result<bool>;

    fn read_f32(&self, name: &str, index: usize) -> Option<f32>;
    fn read_i32(&self, name: &str, index: usize) -> Option<i32>;
    fn read_bool(&self, name: &str, index: usize) -> Option<bool>;

    /// The latest session document, if one has been seen this connection.
    fn session_yaml(&self) -> Option<String>;
}

/// State shared between the SDK handle and its pump task.
struct Shared {
    frame_tx: watch::Sender<Option<Arc<FramePacket>>>,
    session_tx: watch::Sender<Option<Arc<str>>>,
    events: broadcast::Sender<SdkEvent>,
    connected: AtomicBool,
}

impl Shared {
    fn mark_connected(&self) {
        if !self.connected.swap(true, Ordering::AcqRel) {
            info!("iRacing connected");
            let _ = self.events.send(SdkEvent::Connected);
        }
    }

    /// Drop the frame and session, then announce the disconnect if there was
    /// a connection to lose.
    fn mark_disconnected(&self) {
        self.frame_tx.send_replace(None);
        self.session_tx.send_replace(None);
        if self.connected.swap(false, Ordering::AcqRel) {
            info!("iRacing disconnected");
            let _ = self.events.send(SdkEvent::Disconnected);
        }
    }

    fn with_frame<T>(&self, f: impl FnOnce(&FramePacket) -> Option<T>) -> Option<T> {
        self.frame_tx.borrow().as_deref().and_then(f)
    }
}

/// Why a provider stopped being read.
enum ProviderExit {
    Cancelled,
    Ended { frames: u64 },
}

/// Sleep for `delay` unless cancelled first. Returns `false` on cancellation.
async fn sleep_or_cancel(cancel: &CancellationToken, delay: Duration) -> bool {
    tokio::select! {
        _ = cancel.cancelled() => false,
        _ = tokio::time::sleep(delay) => true,
    }
}

/// Read frames from one provider until it ends or the task is cancelled.
async fn drain_provider<P: Provider>(provider: &mut P, shared: &Shared, cancel: &CancellationToken) -> ProviderExit {
    let mut frames = 0u64;
    let mut error_count = 0u32;
    let mut last_session_version = None;

    loop {
        let next = tokio::select! {
            _ = cancel.cancelled() => return ProviderExit::Cancelled,
            next = provider.next_frame() => next,
        };

        match next {
            Ok(Some(frame)) => {
                frames += 1;
                error_count = 0;
                shared.mark_connected();

                let version = frame.session_version;
                if last_session_version != Some(version) {
                    debug!(from = ?last_session_version, to = version, "Session version changed");
                    match provider.session_yaml(version).await {
                        Ok(Some(yaml)) => {
                            debug!(version, bytes = yaml.len(), "Session YAML fetched");
                            shared.session_tx.send_replace(Some(Arc::from(yaml)));
                            let _ = shared.events.send(SdkEvent::SessionInfoUpdated);
                        }
                        Ok(None) => debug!(version, "No session YAML yet"),
                        Err(e) => warn!(version, error = %e, "Failed to fetch session YAML"),
                    }
                    last_session_version = Some(version);
                }

                trace!(tick = frame.tick, frames, "Frame published");
                shared.frame_tx.send_replace(Some(Arc::new(frame)));
                let _ = shared.events.send(SdkEvent::TelemetryUpdated);
            }
            Ok(None) => return ProviderExit::Ended { frames },
            Err(e) => {
                error_count += 1;
                let backoff = ERROR_BACKOFF_BASE * (1 << error_count.min(ERROR_BACKOFF_MAX_SHIFT));
                warn!(error = %e, attempt = error_count, backoff_ms = backoff.as_millis() as u64, "Provider error");
                if !sleep_or_cancel(cancel, backoff).await {
                    return ProviderExit::Cancelled;
                }
            }
        }
    }
}

/// Open, drain, and reopen providers until cancelled.
async fn pump<F: ProviderFactory>(factory: Arc<F>, shared: Arc<Shared>, config: IracingConfig, cancel: CancellationToken) {
    let initial = config.reconnect_initial();
    let max = config.reconnect_max();
    let mut delay = initial;

    loop {
        let opened = tokio::select! {
            _ = cancel.cancelled() => break,
            opened = factory.open() => opened,
        };

        match opened {
            Ok(mut provider) => {
                debug!(tick_rate = provider.tick_rate(), "Provider opened");
                match drain_provider(&mut provider, &shared, &cancel).await {
                    ProviderExit::Cancelled => break,
                    ProviderExit::Ended { frames } => {
                        info!(frames, "iRacing session ended");
                        shared.mark_disconnected();
                        if frames > 0 {
                            delay = initial;
                        }
                    }
                }
            }
            Err(e) if e.is_retryable() => debug!(error = %e, retry_ms = delay.as_millis() as u64, "iRacing not available"),
            Err(e) => warn!(error = %e, hint = e.recovery_hint(), retry_ms = delay.as_millis() as u64, "iRacing SDK unusable"),
        }

        if !sleep_or_cancel(&cancel, delay).await {
            break;
        }
        delay = (delay * 2).min(max);
    }

    debug!("iRacing pump exited");
}

/// The iRacing SDK: a pump task over [`Provider`]s plus typed frame reads.
pub struct IracingSdk<F: ProviderFactory> {
    config: IracingConfig,
    factory: Arc<F>,
    probe: Arc<dyn ProcessProbe>,
    shared: Arc<Shared>,
    worker: Worker,
}

impl IracingSdk<DefaultProviderFactory> {
    /// SDK over the platform's provider and the OS process table.
    pub fn with_defaults(config: IracingConfig) -> Self {
        Self::new(config, DefaultProviderFactory::default(), Arc::new(SysinfoProcessProbe::new()))
    }
}

impl<F: ProviderFactory> IracingSdk<F> {
    pub fn new(config: IracingConfig, factory: F, probe: Arc<dyn ProcessProbe>) -> Self {
        let (frame_tx, _) = watch::channel(None);
        let (session_tx, _) = watch::channel(None);
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        let shared = Shared { frame_tx, session_tx, events, connected: AtomicBool::new(false) };
        Self { config, factory: Arc::new(factory), probe, shared: Arc::new(shared), worker: Worker::new() }
    }

    /// The newest frame, if connected.
    pub fn frame(&self) -> Option<Arc<FramePacket>> {
        self.shared.frame_tx.borrow().clone()
    }

    /// Watch frames as they are published.
    pub fn watch_frames(&self) -> watch::Receiver<Option<Arc<FramePacket>>> {
        self.shared.frame_tx.subscribe()
    }
}

#[async_trait]
impl<F: ProviderFactory> TelemetrySdk for IracingSdk<F> {
    async fn start(&self) -> Result<()> {
        let factory = Arc::clone(&self.factory);
        let shared = Arc::clone(&self.shared);
        let config = self.config.clone();

        if self.worker.spawn_with(move |cancel| pump(factory, shared, config, cancel)) {
            info!("iRacing SDK started");
        }
        Ok(())
    }

    async fn stop(&self) {
        if self.worker.stop(self.config.stop_timeout(), "iracing-pump").await {
            self.shared.mark_disconnected();
            info!("iRacing SDK stopped");
        }
    }

    fn subscribe(&self) -> broadcast::Receiver<SdkEvent> {
        self.shared.events.subscribe()
    }

    fn is_connected(&self) -> bool {
        self.shared.connected.load(Ordering::Acquire)
    }

    async fn is_sim_running(&self) -> Result<bool> {
        self.probe.any_running(&self.config.process_names).await
    }

    fn read_f32(&self, name: &str, index: usize) -> Option<f32> {
        self.shared.with_frame(|frame| frame.read_f32(name, index))
    }

    fn read_i32(&self, name: &str, index: usize) -> Option<i32> {
        self.shared.with_frame(|frame| frame.read_i32(name, index))
    }

    fn read_bool(&self, name: &str, index: usize) -> Option<bool> {
        self.shared.with_frame(|frame| frame.read_bool(name, index))
    }

    fn session_yaml(&self) -> Option<String> {
        self.shared.session_tx.borrow().as_deref().map(str::to_string)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::{FrameBuilder, ScriptStep, ScriptedFactory, StaticProcessProbe};

    fn frame(rpm: f32, session_version: u32) -> FramePacket {
        FrameBuilder::new()
            .f32("RPM", &[rpm])
            .i32("Gear", &[3])
            .bool("OnPitRoad", &[true])
            .f32("CarIdxLapDistPct", &[0.1, 0.2, 0.3])
            .build(1, session_version)
    }

    fn sdk(factory: ScriptedFactory) -> IracingSdk<ScriptedFactory> {
        IracingSdk::new(IracingConfig::default(), factory, Arc::new(StaticProcessProbe::new(true)))
    }

    #[tokio::test(start_paused = true)]
    async fn publishes_frames_and_session_changes() {
        let factory = ScriptedFactory::new("WeekendInfo:\n TrackName: test\n");
        factory.push_session(vec![
            ScriptStep::Frame(frame(4000.0, 1)),
            ScriptStep::Frame(frame(4100.0, 1)),
            ScriptStep::Frame(frame(4200.0, 2)),
        ]);
        let sdk = sdk(factory.clone());
        let mut events = sdk.subscribe();
        sdk.start().await.unwrap();

        let expected = [
            SdkEvent::Connected,
            SdkEvent::SessionInfoUpdated,
            SdkEvent::TelemetryUpdated,
            SdkEvent::TelemetryUpdated,
            SdkEvent::SessionInfoUpdated,
            SdkEvent::TelemetryUpdated,
        ];
        for event in expected {
            assert_eq!(events.recv().await.unwrap(), event);
        }

        assert!(sdk.is_connected());
        assert_eq!(sdk.read_f32("RPM", 0), Some(4200.0));
        assert_eq!(sdk.read_i32("Gear", 0), Some(3));
        assert_eq!(sdk.read_f32("Gear", 0), Some(3.0));
        assert_eq!(sdk.read_bool("OnPitRoad", 0), Some(true));
        assert_eq!(sdk.read_f32("CarIdxLapDistPct", 2), Some(0.3));
        assert_eq!(sdk.read_f32("CarIdxLapDistPct", 3), None);
        assert_eq!(sdk.read_f32("Unknown", 0), None);
        assert!(sdk.session_yaml().unwrap().contains("TrackName"));
        assert_eq!(factory.yaml_requests(), 2);

        sdk.stop().await;
        sdk.stop().await;
        assert!(!sdk.is_connected());
        assert!(sdk.frame().is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn provider_end_disconnects_and_reopens() {
        let factory = ScriptedFactory::new("WeekendInfo:\n TrackName: test\n");
        factory.push_session(vec![ScriptStep::Frame(frame(3000.0, 1)), ScriptStep::End]);
        factory.push_session(vec![ScriptStep::Frame(frame(5000.0, 1))]);
        let sdk = sdk(factory.clone());
        let mut events = sdk.subscribe();
        sdk.start().await.unwrap();

        assert_eq!(events.recv().await.unwrap(), SdkEvent::Connected);
        assert_eq!(events.recv().await.unwrap(), SdkEvent::SessionInfoUpdated);
        assert_eq!(events.recv().await.unwrap(), SdkEvent::TelemetryUpdated);
        assert_eq!(events.recv().await.unwrap(), SdkEvent::Disconnected);
        assert!(!sdk.is_connected());
        assert_eq!(sdk.read_f32("RPM", 0), None);
        assert!(sdk.session_yaml().is_none());

        assert_eq!(events.recv().await.unwrap(), SdkEvent::Connected);
        assert_eq!(events.recv().await.unwrap(), SdkEvent::SessionInfoUpdated);
        assert_eq!(events.recv().await.unwrap(), SdkEvent::TelemetryUpdated);
        assert_eq!(sdk.read_f32("RPM", 0), Some(5000.0));
        assert_eq!(factory.opens(), 2);

        sdk.stop().await;
    }

    #[tokio::test(start_paused = true)]
    async fn failed_opens_back_off_exponentially() {
        let factory = ScriptedFactory::new("");
        let sdk = sdk(factory.clone());
        sdk.start().await.unwrap();

        // Opens at 0, 0.5, 1.5, and 3.5 seconds
        tokio::time::sleep(Duration::from_millis(3600)).await;
        assert_eq!(factory.opens(), 4);
        assert!(!sdk.is_connected());

        // Capped at 5 s: 7.5, 12.5, 17.5
        tokio::time::sleep(Duration::from_millis(14_000)).await;
        assert_eq!(factory.opens(), 7);

        sdk.stop().await;
    }

    #[tokio::test(start_paused = true)]
    async fn transient_errors_are_retried() {
        let factory = ScriptedFactory::new("WeekendInfo:\n TrackName: test\n");
        factory.push_session(vec![ScriptStep::Fail, ScriptStep::Fail, ScriptStep::Frame(frame(6100.0, 1))]);
        let sdk = sdk(factory.clone());
        sdk.start().await.unwrap();

        tokio::time::sleep(Duration::from_millis(400)).await;
        assert!(sdk.is_connected());
        assert_eq!(sdk.read_f32("RPM", 0), Some(6100.0));
        assert_eq!(factory.opens(), 1);
        sdk.stop().await;
    }

    #[tokio::test]
    async fn sim_liveness_uses_the_probe() {
        let probe = Arc::new(StaticProcessProbe::new(false));
        let sdk = IracingSdk::new(IracingConfig::default(), ScriptedFactory::new(""), probe.clone());
        assert!(!sdk.is_sim_running().await.unwrap());
        probe.set_running(true);
        assert!(sdk.is_sim_running().await.unwrap());
        probe.set_failing(true);
        assert!(sdk.is_sim_running().await.is_err());
        assert_eq!(probe.calls(), 3);
    }
}
