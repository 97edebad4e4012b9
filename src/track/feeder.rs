//! Background task pumping telemetry into [`TrackOutlineCapture`].

use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::TrackOutlineCapture;
use crate::source::{TelemetrySource, vars};

/// Per-tick bookkeeping of the feeder: which track the capture was told about.
#[derive(Debug, Default)]
pub struct FeedCursor {
    track_id: Option<i32>,
}

impl FeedCursor {
    /// Feed one sample, starting or abandoning sessions as the source's
    /// track and connection change.
    pub fn step(&mut self, source: &dyn TelemetrySource, capture: &TrackOutlineCapture, dt: f32) {
        if !source.is_connected() {
            if self.track_id.take().is_some() {
                capture.reset();
            }
            return;
        }

        let Some(track_id) = source.track_id() else {
            return;
        };

        if self.track_id != Some(track_id) {
            capture.reset();
            capture.begin_session(track_id, &source.track_name());
            self.track_id = Some(track_id);
            return;
        }

        if capture.is_recording() {
            capture.record_sample(
                source.scalar_f32(vars::SPEED),
                source.scalar_f32(vars::YAW),
                source.scalar_f32(vars::LAP_DIST_PCT),
                dt,
            );
        }
    }
}

/// Handle to the spawned feeder task.
pub struct OutlineFeeder {
    cancel: CancellationToken,
    handle: Mutex<Option<JoinHandle<()>>>,
}

impl OutlineFeeder {
    /// Sample `source` every `interval` and drive `capture` with it.
    pub fn spawn(
        source: Arc<dyn TelemetrySource>,
        capture: Arc<TrackOutlineCapture>,
        interval: Duration,
    ) -> Self {
        let cancel = CancellationToken::new();
        let task_cancel = cancel.clone();

        let handle = tokio::spawn(async move {
            info!(interval_ms = interval.as_millis() as u64, "Outline feeder started");
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            let mut cursor = FeedCursor::default();
            let mut last = Instant::now();

            loop {
                tokio::select! {
                    _ = task_cancel.cancelled() => break,
                    _ = ticker.tick() => {}
                }
                let now = Instant::now();
                let dt = now.duration_since(last).as_secs_f32();
                last = now;
                cursor.step(source.as_ref(), &capture, dt);
            }

            capture.reset();
            info!("Outline feeder stopped");
        });

        Self { cancel, handle: Mutex::new(Some(handle)) }
    }

    /// Stop the task. Idempotent.
    pub async fn stop(&self, timeout: Duration) {
        self.cancel.cancel();
        let handle = self.handle.lock().take();
        if let Some(handle) = handle {
            match tokio::time::timeout(timeout, handle).await {
                Ok(Ok(())) => debug!("Outline feeder joined"),
                Ok(Err(e)) => warn!("Outline feeder task failed: {}", e),
                Err(_) => warn!(timeout_ms = timeout.as_millis() as u64, "Outline feeder did not stop in time"),
            }
        }
    }
}

impl Drop for OutlineFeeder {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}
