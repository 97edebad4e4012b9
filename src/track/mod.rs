//! # Track Outline Capture
//!
//! Simulators rarely publish track geometry, so the outline shown on a track
//! map is captured from the player's own driving. While the car completes one
//! lap, its position is dead-reckoned by integrating speed along the heading:
//!
//! ```text
//! x += speed · sin(heading) · dt
//! y += speed · cos(heading) · dt
//! ```
//!
//! Each estimate is tagged with the lap-distance fraction. When the fraction
//! wraps from above 0.9 to below 0.1 with at least
//! [`MIN_LAP_SAMPLES`](capture::MIN_LAP_SAMPLES) samples collected, the lap is
//! resampled to [`OUTLINE_POINTS`] evenly spaced fractions, normalized into
//! the unit square with 5% padding, published, and cached on disk keyed by
//! track id. The next session on the same track loads the cached outline and
//! never records.
//!
//! ## Pipeline
//!
//! ```text
//! ┌──────────────┐   Speed/Yaw/LapDistPct   ┌─────────────────────┐
//! │ OutlineFeeder│ ───────────────────────► │ TrackOutlineCapture │
//! └──────────────┘                          │  Idle → Recording   │
//!        ▲                                  │       → Captured    │
//!        │ TelemetrySource (proxy)          └──────────┬──────────┘
//!                                    resample → normalize → publish
//!                                                      │
//!                                                      ▼
//!                                              OutlineCache (JSON)
//! ```
//!
//! A car parked for the whole "lap" yields a degenerate bounding box; the
//! capture then publishes a generic oval rather than a collapsed shape.

use serde::{Deserialize, Serialize};

pub mod cache;
pub mod capture;
pub mod feeder;
pub mod resample;

pub use cache::OutlineCache;
pub use capture::{CapturePhase, TrackOutlineCapture};
pub use feeder::{FeedCursor, OutlineFeeder};
pub use resample::{OUTLINE_POINTS, fallback_outline};

/// A point of a normalized outline, both coordinates in `[0,1]`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct OutlinePoint {
    pub x: f32,
    pub y: f32,
}

/// One dead-reckoned position tied to lap progress.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TrackOutlineSample {
    pub lap_dist_pct: f32,
    pub x: f32,
    pub y: f32,
}

/// A finished outline for one track.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrackOutline {
    pub track_id: i32,
    pub track_name: String,
    pub points: Vec<OutlinePoint>,
}
