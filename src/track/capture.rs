//! Dead-reckoned outline capture state machine.

use parking_lot::Mutex;
use std::sync::Arc;
use tokio::sync::{broadcast, watch};
use tracing::{debug, info, trace, warn};

use super::cache::OutlineCache;
use super::resample::{OUTLINE_POINTS, crossed_start_finish, normalize, resample};
use super::{OutlinePoint, TrackOutline, TrackOutlineSample};

/// Samples required before a start/finish crossing completes a lap.
pub const MIN_LAP_SAMPLES: usize = 50;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CapturePhase {
    Idle,
    Recording,
    Captured,
}

#[derive(Debug)]
struct CaptureState {
    phase: CapturePhase,
    track_id: Option<i32>,
    track_name: String,
    samples: Vec<TrackOutlineSample>,
    x: f64,
    y: f64,
    last_pct: Option<f32>,
    /// Samples only count once the car is at the start of a lap
    armed: bool,
}

impl CaptureState {
    fn idle() -> Self {
        Self {
            phase: CapturePhase::Idle,
            track_id: None,
            track_name: String::new(),
            samples: Vec::new(),
            x: 0.0,
            y: 0.0,
            last_pct: None,
            armed: false,
        }
    }

    fn recording(track_id: i32, track_name: &str) -> Self {
        Self {
            phase: CapturePhase::Recording,
            track_id: Some(track_id),
            track_name: track_name.to_string(),
            samples: Vec::with_capacity(4096),
            ..Self::idle()
        }
    }
}

/// Records one lap of dead-reckoned positions per unseen track and turns it
/// into a normalized [`TrackOutline`].
///
/// Single writer: only the telemetry consumption path calls
/// [`record_sample`](Self::record_sample). Readers get the finished outline
/// as an `Arc` swapped in atomically, never a partially built one.
pub struct TrackOutlineCapture {
    state: Mutex<CaptureState>,
    cache: OutlineCache,
    outline_tx: watch::Sender<Option<Arc<TrackOutline>>>,
    ready_tx: broadcast::Sender<Arc<TrackOutline>>,
}

impl TrackOutlineCapture {
    pub fn new(cache: OutlineCache) -> Self {
        let (outline_tx, _) = watch::channel(None);
        let (ready_tx, _) = broadcast::channel(8);
        Self { state: Mutex::new(CaptureState::idle()), cache, outline_tx, ready_tx }
    }

    /// Enter a session on `track_id`: load from cache or start recording.
    /// Re-entering the track currently being recorded or shown is a no-op.
    pub fn begin_session(&self, track_id: i32, track_name: &str) {
        let mut state = self.state.lock();
        if state.phase != CapturePhase::Idle && state.track_id == Some(track_id) {
            return;
        }

        if let Some(outline) = self.cache.load(track_id) {
            info!(track_id, track_name, "Track outline loaded from cache");
            *state = CaptureState {
                phase: CapturePhase::Captured,
                track_id: Some(track_id),
                track_name: outline.track_name.clone(),
                ..CaptureState::idle()
            };
            self.outline_tx.send_replace(Some(Arc::new(outline)));
            return;
        }

        info!(track_id, track_name, "Recording track outline");
        *state = CaptureState::recording(track_id, track_name);
        self.outline_tx.send_replace(None);
    }

    /// Integrate one telemetry sample. Ignored unless recording.
    ///
    /// `speed` is m/s, `heading` radians, `lap_dist_pct` in `[0,1]`, `dt` seconds.
    pub fn record_sample(&self, speed: f32, heading: f32, lap_dist_pct: f32, dt: f32) {
        if !(speed.is_finite() && heading.is_finite() && lap_dist_pct.is_finite() && dt.is_finite())
            || !(0.0..=1.0).contains(&lap_dist_pct)
            || dt < 0.0
        {
            trace!(speed, heading, lap_dist_pct, dt, "Discarding unusable sample");
            return;
        }

        let mut state = self.state.lock();
        if state.phase != CapturePhase::Recording {
            return;
        }

        let step = f64::from(speed) * f64::from(dt);
        state.x += step * f64::from(heading).sin();
        state.y += step * f64::from(heading).cos();

        let crossed = crossed_start_finish(state.last_pct, lap_dist_pct);
        state.last_pct = Some(lap_dist_pct);

        if !state.armed {
            if crossed || lap_dist_pct < 0.1 {
                debug!(lap_dist_pct, "Outline capture armed at start of lap");
                state.armed = true;
            } else {
                return;
            }
        } else if crossed && state.samples.len() >= MIN_LAP_SAMPLES {
            self.complete_lap(&mut state);
            return;
        } else if crossed {
            debug!(samples = state.samples.len(), "Lap too sparse, recording another");
            state.samples.clear();
        }

        let sample = TrackOutlineSample { lap_dist_pct, x: state.x as f32, y: state.y as f32 };
        state.samples.push(sample);
    }

    fn complete_lap(&self, state: &mut CaptureState) {
        let Some(track_id) = state.track_id else {
            return;
        };

        let resampled = resample(&state.samples, OUTLINE_POINTS);
        let outline = Arc::new(TrackOutline {
            track_id,
            track_name: state.track_name.clone(),
            points: normalize(&resampled),
        });

        info!(track_id, samples = state.samples.len(), "Track outline captured");
        state.samples = Vec::new();
        state.phase = CapturePhase::Captured;

        self.outline_tx.send_replace(Some(Arc::clone(&outline)));

        if let Err(e) = self.cache.store(&outline) {
            warn!(track_id, "Failed to persist track outline: {}", e);
        }

        let _ = self.ready_tx.send(outline);
    }

    /// Discard any in-progress capture and return to `Idle`.
    /// A published outline stays readable.
    pub fn reset(&self) {
        let mut state = self.state.lock();
        if state.phase == CapturePhase::Recording {
            debug!(track_id = ?state.track_id, samples = state.samples.len(), "Abandoning outline capture");
        }
        *state = CaptureState::idle();
    }

    /// Points of the current outline; empty until one is captured or loaded.
    pub fn current_outline(&self) -> Vec<OutlinePoint> {
        self.outline_tx.borrow().as_ref().map(|o| o.points.clone()).unwrap_or_default()
    }

    pub fn outline(&self) -> Option<Arc<TrackOutline>> {
        self.outline_tx.borrow().clone()
    }

    pub fn is_recording(&self) -> bool {
        self.state.lock().phase == CapturePhase::Recording
    }

    pub fn phase(&self) -> CapturePhase {
        self.state.lock().phase
    }

    pub fn track_id(&self) -> Option<i32> {
        self.state.lock().track_id
    }

    /// Fired once per successful capture (not for cache loads).
    pub fn subscribe_ready(&self) -> broadcast::Receiver<Arc<TrackOutline>> {
        self.ready_tx.subscribe()
    }

    /// Every outline publication, including cache loads.
    pub fn watch_outline(&self) -> watch::Receiver<Option<Arc<TrackOutline>>> {
        self.outline_tx.subscribe()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::track::resample::fallback_outline;
    use std::f32::consts::TAU;

    /// Drive one lap around a circle of radius `r` in `n` steps, then the
    /// sample that crosses the line.
    fn drive_circle(capture: &TrackOutlineCapture, n: usize, r: f32) {
        let chord = 2.0 * r * (TAU / n as f32 / 2.0).sin();
        for i in 0..=n {
            let pct = (i % n) as f32 / n as f32;
            let heading = TAU * pct;
            capture.record_sample(chord, heading, pct, 1.0);
        }
    }

    fn capture_in(dir: &tempfile::TempDir) -> TrackOutlineCapture {
        TrackOutlineCapture::new(OutlineCache::new(dir.path()))
    }

    #[test]
    fn circle_lap_produces_normalized_outline() {
        let dir = tempfile::tempdir().unwrap();
        let capture = capture_in(&dir);
        let mut ready = capture.subscribe_ready();

        capture.begin_session(42, "Roundabout");
        assert!(capture.is_recording());
        assert!(capture.current_outline().is_empty());

        drive_circle(&capture, 100, 50.0);

        assert_eq!(capture.phase(), CapturePhase::Captured);
        let points = capture.current_outline();
        assert_eq!(points.len(), OUTLINE_POINTS);

        let (min_x, max_x) = points.iter().fold((f32::MAX, f32::MIN), |(a, b), p| (a.min(p.x), b.max(p.x)));
        let (min_y, max_y) = points.iter().fold((f32::MAX, f32::MIN), |(a, b), p| (a.min(p.y), b.max(p.y)));
        let longest = (max_x - min_x).max(max_y - min_y);
        assert!((longest - 0.9).abs() < 1e-3);
        assert!(((min_x + max_x) / 2.0 - 0.5).abs() < 0.02);
        assert!(((min_y + max_y) / 2.0 - 0.5).abs() < 0.02);
        assert!(points.iter().all(|p| (0.0..=1.0).contains(&p.x) && (0.0..=1.0).contains(&p.y)));

        let fired = ready.try_recv().unwrap();
        assert_eq!(fired.track_id, 42);
        assert!(ready.try_recv().is_err());
        assert!(OutlineCache::new(dir.path()).load(42).is_some());
    }

    #[test]
    fn cached_track_skips_recording() {
        let dir = tempfile::tempdir().unwrap();
        let first = capture_in(&dir);
        first.begin_session(42, "Roundabout");
        drive_circle(&first, 100, 50.0);
        let captured = first.current_outline();

        let second = capture_in(&dir);
        let mut ready = second.subscribe_ready();
        second.begin_session(42, "Roundabout");

        assert_eq!(second.phase(), CapturePhase::Captured);
        assert!(!second.is_recording());
        for (a, b) in second.current_outline().iter().zip(&captured) {
            assert!((a.x - b.x).abs() < 1e-6 && (a.y - b.y).abs() < 1e-6);
        }
        assert!(ready.try_recv().is_err());
    }

    #[test]
    fn stationary_car_yields_fallback_outline() {
        let dir = tempfile::tempdir().unwrap();
        let capture = capture_in(&dir);
        capture.begin_session(3, "Parked");
        for i in 0..=60 {
            let pct = (i % 60) as f32 / 60.0;
            capture.record_sample(0.0, 1.0, pct, 0.016);
        }
        assert_eq!(capture.phase(), CapturePhase::Captured);
        assert_eq!(capture.current_outline(), fallback_outline());
    }

    #[test]
    fn recording_waits_for_start_of_lap() {
        let dir = tempfile::tempdir().unwrap();
        let capture = capture_in(&dir);
        capture.begin_session(9, "Midlap");

        // Join mid-lap: nothing counts until the line is crossed.
        for i in 50..100 {
            capture.record_sample(10.0, 0.0, i as f32 / 100.0, 0.1);
        }
        assert!(capture.is_recording());

        drive_circle(&capture, 100, 30.0);
        assert_eq!(capture.phase(), CapturePhase::Captured);
    }

    #[test]
    fn sparse_lap_keeps_recording() {
        let dir = tempfile::tempdir().unwrap();
        let capture = capture_in(&dir);
        capture.begin_session(11, "Sparse");
        drive_circle(&capture, 20, 30.0);
        assert!(capture.is_recording());
    }

    #[test]
    fn lap_needs_exactly_the_minimum_samples() {
        let dir = tempfile::tempdir().unwrap();

        // 0, 1/50 .. 49/50 then the crossing: fifty samples completes
        let enough = capture_in(&dir);
        enough.begin_session(12, "Fifty");
        drive_circle(&enough, MIN_LAP_SAMPLES, 30.0);
        assert_eq!(enough.phase(), CapturePhase::Captured);
        assert_eq!(enough.current_outline().len(), OUTLINE_POINTS);

        let short = capture_in(&dir);
        short.begin_session(13, "FortyNine");
        drive_circle(&short, MIN_LAP_SAMPLES - 1, 30.0);
        assert!(short.is_recording());
        assert!(OutlineCache::new(dir.path()).load(13).is_none());
    }

    #[test]
    fn reset_abandons_capture_without_persisting() {
        let dir = tempfile::tempdir().unwrap();
        let capture = capture_in(&dir);
        capture.begin_session(12, "Abandoned");
        for i in 0..80 {
            capture.record_sample(20.0, 0.3, i as f32 / 100.0, 0.1);
        }
        capture.reset();

        assert_eq!(capture.phase(), CapturePhase::Idle);
        assert!(!OutlineCache::new(dir.path()).path_for(12).exists());

        // Samples are ignored until the next session begins
        capture.record_sample(20.0, 0.3, 0.99, 0.1);
        capture.record_sample(20.0, 0.3, 0.01, 0.1);
        assert_eq!(capture.phase(), CapturePhase::Idle);
    }

    #[test]
    fn same_track_begin_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let capture = capture_in(&dir);
        capture.begin_session(13, "Twice");
        for i in 0..30 {
            capture.record_sample(20.0, 0.0, i as f32 / 100.0, 0.1);
        }
        capture.begin_session(13, "Twice");
        assert!(capture.is_recording());
        assert_eq!(capture.state.lock().samples.len(), 30);
    }

    #[test]
    fn unusable_samples_are_ignored() {
        let dir = tempfile::tempdir().unwrap();
        let capture = capture_in(&dir);
        capture.begin_session(14, "Noise");
        capture.record_sample(f32::NAN, 0.0, 0.0, 0.1);
        capture.record_sample(10.0, 0.0, 1.5, 0.1);
        capture.record_sample(10.0, 0.0, 0.0, -1.0);
        assert!(capture.state.lock().samples.is_empty());
    }
}
