//! Game detection and source arbitration.
//!
//! The controller decides which [`TelemetrySource`] is authoritative. With no
//! simulator running it keeps the synthetic source going (`DemoMode`); when a
//! registered source reports its game alive, the synthetic source is stopped
//! and the live one started (`Connected`). While connected only the active
//! source is probed, so two simulators open at once never fight.
//!
//! ```text
//!            start()
//!               │
//!               ▼            probe(i) == Ok(true)
//!   ┌──────► DemoMode ─────────────────────────────► Connected(id)
//!   │     (or Scanning)                                   │
//!   │                                                     │ probe(active) != Ok(true)
//!   └─────────────────────────────────────────────────────┘
//! ```
//!
//! The background loop is nothing more than [`GameDetectionController::tick`]
//! on a timer, which keeps every transition testable without waiting.

use parking_lot::RwLock;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::{Mutex as AsyncMutex, Notify, broadcast, watch};
use tokio_stream::wrappers::WatchStream;
use tracing::{debug, info, trace, warn};

use crate::config::DetectionConfig;
use crate::proxy::SourceResolver;
use crate::source::{SourceId, TelemetrySource};
use crate::sources::worker::Worker;

/// Which source, if any, is authoritative.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ArbitrationState {
    /// No live source; synthetic telemetry is running
    DemoMode,
    /// No live source and demo fallback is disabled
    Scanning,
    Connected(SourceId),
}

impl ArbitrationState {
    pub fn is_connected(&self) -> bool {
        matches!(self, ArbitrationState::Connected(_))
    }
}

/// Transitions announced by the controller.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ControllerEvent {
    DemoActivated,
    GameDetected { source_id: SourceId },
    GameDisconnected { source_id: SourceId },
}

struct ControllerInner {
    config: DetectionConfig,
    synthetic: Arc<dyn TelemetrySource>,
    sources: RwLock<Vec<Arc<dyn TelemetrySource>>>,
    active: RwLock<Option<Arc<dyn TelemetrySource>>>,
    state_tx: watch::Sender<ArbitrationState>,
    events: broadcast::Sender<ControllerEvent>,
    wake: Notify,
    /// Serializes arbitration steps against each other and against shutdown
    step: AsyncMutex<()>,
    shut_down: AtomicBool,
}

impl ControllerInner {
    fn state(&self) -> ArbitrationState {
        self.state_tx.borrow().clone()
    }

    fn set_state(&self, state: ArbitrationState) {
        let previous = self.state_tx.send_replace(state.clone());
        if previous != state {
            info!(from = ?previous, to = ?state, "Arbitration state changed");
        }
    }

    fn current_source(&self) -> Arc<dyn TelemetrySource> {
        self.active.read().clone().unwrap_or_else(|| Arc::clone(&self.synthetic))
    }

    /// Back to demo mode, or to scanning when demo fallback is off.
    async fn enter_fallback(&self) {
        if !self.config.demo_fallback {
            self.set_state(ArbitrationState::Scanning);
            return;
        }
        if let Err(e) = self.synthetic.start().await {
            warn!(error = %e, "Synthetic source failed to start");
        }
        self.set_state(ArbitrationState::DemoMode);
        let _ = self.events.send(ControllerEvent::DemoActivated);
    }

    async fn tick(&self) -> ArbitrationState {
        let _step = self.step.lock().await;
        if self.shut_down.load(Ordering::Acquire) {
            return self.state();
        }

        let active = self.active.read().clone();
        match active {
            Some(source) => self.monitor(source).await,
            None => self.scan().await,
        }
        self.state()
    }

    /// Probe registered sources in order; the first live one wins.
    async fn scan(&self) {
        let candidates = self.sources.read().clone();
        for source in candidates {
            match source.is_game_running().await {
                Ok(true) => {}
                Ok(false) => {
                    trace!(source = %source.id(), "Game not running");
                    continue;
                }
                Err(e) => {
                    debug!(source = %source.id(), error = %e, retryable = e.is_retryable(), "Liveness probe failed");
                    continue;
                }
            }

            info!(source = %source.id(), "Game detected");
            self.synthetic.stop().await;
            if let Err(e) = source.start().await {
                warn!(source = %source.id(), error = %e, hint = e.recovery_hint(), "Detected source failed to start");
                source.stop().await;
                if self.config.demo_fallback
                    && let Err(e) = self.synthetic.start().await
                {
                    warn!(error = %e, "Synthetic source failed to restart");
                }
                continue;
            }

            let source_id = source.id().to_string();
            *self.active.write() = Some(source);
            self.set_state(ArbitrationState::Connected(source_id.clone()));
            let _ = self.events.send(ControllerEvent::GameDetected { source_id });
            return;
        }
    }

    /// Probe only the active source; fall back when it is gone.
    async fn monitor(&self, source: Arc<dyn TelemetrySource>) {
        let alive = match source.is_game_running().await {
            Ok(alive) => alive,
            Err(e) => {
                warn!(source = %source.id(), error = %e, "Liveness probe failed, treating game as gone");
                false
            }
        };
        if alive {
            trace!(source = %source.id(), "Active game still running");
            return;
        }

        let source_id = source.id().to_string();
        info!(source = %source_id, "Game no longer running");
        source.stop().await;
        *self.active.write() = None;
        let _ = self.events.send(ControllerEvent::GameDisconnected { source_id });
        self.enter_fallback().await;
    }
}

/// Owns the source registry and the arbitration loop.
pub struct GameDetectionController {
    inner: Arc<ControllerInner>,
    worker: Worker,
}

impl GameDetectionController {
    pub fn new(synthetic: Arc<dyn TelemetrySource>, config: DetectionConfig) -> Self {
        let initial = if config.demo_fallback { ArbitrationState::DemoMode } else { ArbitrationState::Scanning };
        let (state_tx, _) = watch::channel(initial);
        let (events, _) = broadcast::channel(crate::source::EVENT_CHANNEL_CAPACITY);
        let inner = ControllerInner {
            config,
            synthetic,
            sources: RwLock::new(Vec::new()),
            active: RwLock::new(None),
            state_tx,
            events,
            wake: Notify::new(),
            step: AsyncMutex::new(()),
            shut_down: AtomicBool::new(false),
        };
        Self { inner: Arc::new(inner), worker: Worker::new() }
    }

    /// Add a live source. Registration order breaks ties between games
    /// running at the same time. A second source with the same id is ignored.
    pub fn register(&self, source: Arc<dyn TelemetrySource>) {
        let mut sources = self.inner.sources.write();
        if sources.iter().any(|s| s.id() == source.id()) {
            warn!(source = %source.id(), "Source already registered");
            return;
        }
        debug!(source = %source.id(), position = sources.len(), "Source registered");
        sources.push(source);
    }

    pub fn registered_sources(&self) -> Vec<SourceId> {
        self.inner.sources.read().iter().map(|s| s.id().to_string()).collect()
    }

    /// Enter demo mode (or scanning) and spawn the arbitration loop.
    /// Idempotent; does nothing after [`shutdown`](Self::shutdown).
    pub async fn start(&self) {
        if self.inner.shut_down.load(Ordering::Acquire) {
            debug!("Controller already shut down, not starting");
            return;
        }
        if self.worker.is_running() {
            return;
        }

        {
            let _step = self.inner.step.lock().await;
            if self.inner.active.read().is_none() {
                self.inner.enter_fallback().await;
            }
        }

        let inner = Arc::clone(&self.inner);
        let spawned = self.worker.spawn_with(move |cancel| async move {
            loop {
                let delay = if inner.state().is_connected() {
                    inner.config.monitor_interval()
                } else {
                    inner.config.scan_interval()
                };
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = tokio::time::sleep(delay) => {}
                    _ = inner.wake.notified() => debug!("Arbitration woken early"),
                }
                inner.tick().await;
            }
            debug!("Arbitration loop exited");
        });

        if spawned {
            info!(
                scan_ms = self.inner.config.scan_interval_ms,
                monitor_ms = self.inner.config.monitor_interval_ms,
                sources = self.inner.sources.read().len(),
                "Game detection started"
            );
        }
    }

    /// Run one arbitration step now and return the resulting state.
    pub async fn tick(&self) -> ArbitrationState {
        self.inner.tick().await
    }

    /// Wake the loop for an immediate step, e.g. when a source saw its game exit.
    pub fn signal_source_disappeared(&self) {
        self.inner.wake.notify_one();
    }

    pub fn state(&self) -> ArbitrationState {
        self.inner.state()
    }

    pub fn watch_state(&self) -> watch::Receiver<ArbitrationState> {
        self.inner.state_tx.subscribe()
    }

    /// State changes as a stream, starting with the current state.
    pub fn state_stream(&self) -> WatchStream<ArbitrationState> {
        WatchStream::new(self.watch_state())
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ControllerEvent> {
        self.inner.events.subscribe()
    }

    /// The live source, `None` in demo mode or while scanning.
    pub fn active_source(&self) -> Option<Arc<dyn TelemetrySource>> {
        self.inner.active.read().clone()
    }

    /// The live source, or the synthetic source when there is none.
    pub fn current_source(&self) -> Arc<dyn TelemetrySource> {
        self.inner.current_source()
    }

    pub fn synthetic_source(&self) -> Arc<dyn TelemetrySource> {
        Arc::clone(&self.inner.synthetic)
    }

    /// Resolver for [`crate::TelemetryAccessProxy`], answering
    /// [`current_source`](Self::current_source) on every call.
    pub fn resolver(&self) -> SourceResolver {
        let inner = Arc::clone(&self.inner);
        Arc::new(move || inner.current_source())
    }

    /// Stop the loop, then the active and synthetic sources. Idempotent.
    pub async fn shutdown(&self) {
        if self.inner.shut_down.swap(true, Ordering::AcqRel) {
            return;
        }

        let timeout = self.inner.config.shutdown_timeout();
        self.worker.stop(timeout, "detection").await;

        // A step still running past the timeout is left to finish on its own
        let step = tokio::time::timeout(timeout, self.inner.step.lock()).await;
        if step.is_err() {
            warn!("Arbitration step still running at shutdown");
        }

        let active = self.inner.active.write().take();
        if let Some(source) = active {
            source.stop().await;
        }
        self.inner.synthetic.stop().await;
        info!("Game detection shut down");
    }
}

impl Drop for GameDetectionController {
    fn drop(&mut self) {
        self.inner.shut_down.store(true, Ordering::Release);
    }
}
