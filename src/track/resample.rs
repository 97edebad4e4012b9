//! Outline geometry: resampling and unit-square normalization.

use std::f32::consts::TAU;

use super::{OutlinePoint, TrackOutlineSample};

/// Points in every finished outline.
pub const OUTLINE_POINTS: usize = 200;

/// Margin kept clear on every side of the unit square.
pub const OUTLINE_PADDING: f32 = 0.05;

/// Bounding boxes with a larger side below this are treated as degenerate.
pub const DEGENERATE_EPSILON: f32 = 1e-6;

/// Resample a lap of samples into `count` points at evenly spaced lap
/// fractions `i / count`.
///
/// Each target is linearly interpolated between the nearest sample below and
/// the nearest sample above it. Targets before the first sample or after the
/// last wrap across the start/finish line.
pub fn resample(samples: &[TrackOutlineSample], count: usize) -> Vec<OutlinePoint> {
    if samples.is_empty() || count == 0 {
        return Vec::new();
    }

    let mut sorted = samples.to_vec();
    sorted.sort_by(|a, b| a.lap_dist_pct.total_cmp(&b.lap_dist_pct));
    let n = sorted.len();

    (0..count)
        .map(|i| {
            let target = i as f32 / count as f32;
            let upper = sorted.partition_point(|s| s.lap_dist_pct < target);

            let (below, below_pct) = match upper {
                0 => (&sorted[n - 1], sorted[n - 1].lap_dist_pct - 1.0),
                _ => (&sorted[upper - 1], sorted[upper - 1].lap_dist_pct),
            };
            let (above, above_pct) = match upper {
                u if u == n => (&sorted[0], sorted[0].lap_dist_pct + 1.0),
                u => (&sorted[u], sorted[u].lap_dist_pct),
            };

            let span = above_pct - below_pct;
            let t = if span > f32::EPSILON { ((target - below_pct) / span).clamp(0.0, 1.0) } else { 0.0 };

            OutlinePoint { x: below.x + (above.x - below.x) * t, y: below.y + (above.y - below.y) * t }
        })
        .collect()
}

/// Fit points into `[0,1]²` preserving aspect ratio.
///
/// The longer axis spans `[OUTLINE_PADDING, 1 - OUTLINE_PADDING]` and the
/// shorter axis is centred. Degenerate input yields [`fallback_outline`].
pub fn normalize(points: &[OutlinePoint]) -> Vec<OutlinePoint> {
    let Some(first) = points.first() else {
        return fallback_outline();
    };

    let (mut min_x, mut max_x, mut min_y, mut max_y) = (first.x, first.x, first.y, first.y);
    for p in points {
        min_x = min_x.min(p.x);
        max_x = max_x.max(p.x);
        min_y = min_y.min(p.y);
        max_y = max_y.max(p.y);
    }

    let width = max_x - min_x;
    let height = max_y - min_y;
    let longest = width.max(height);
    if !longest.is_finite() || longest < DEGENERATE_EPSILON {
        return fallback_outline();
    }

    let usable = 1.0 - 2.0 * OUTLINE_PADDING;
    let scale = usable / longest;
    let offset_x = OUTLINE_PADDING + (usable - width * scale) / 2.0;
    let offset_y = OUTLINE_PADDING + (usable - height * scale) / 2.0;

    points
        .iter()
        .map(|p| OutlinePoint { x: offset_x + (p.x - min_x) * scale, y: offset_y + (p.y - min_y) * scale })
        .collect()
}

/// Generic oval shown when no real outline is available.
pub fn fallback_outline() -> Vec<OutlinePoint> {
    (0..OUTLINE_POINTS)
        .map(|i| {
            let angle = TAU * i as f32 / OUTLINE_POINTS as f32;
            OutlinePoint { x: 0.5 + 0.45 * angle.cos(), y: 0.5 + 0.3 * angle.sin() }
        })
        .collect()
}

/// The lap fraction wrapped from the end of the lap back to the start.
pub fn crossed_start_finish(last_pct: Option<f32>, pct: f32) -> bool {
    matches!(last_pct, Some(last) if last > 0.9 && pct < 0.1)
}
