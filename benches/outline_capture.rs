//! Benchmarks for the track outline pipeline
//!
//! Measures:
//! - Resampling a recorded lap to the fixed outline size
//! - Normalizing into the unit square
//! - Feeding a whole lap of samples through `TrackOutlineCapture`
//!
//! Platform: Cross-platform (synthetic laps, writes to a temp cache dir)

use criterion::{BatchSize, BenchmarkId, Criterion, criterion_group, criterion_main};
use paddock::test_utils::circle_lap_samples;
use paddock::track::resample::{OUTLINE_POINTS, normalize, resample};
use paddock::track::{OutlineCache, TrackOutlineCapture};
use std::f32::consts::TAU;
use std::hint::black_box;

fn bench_resample(c: &mut Criterion) {
    let mut group = c.benchmark_group("resample");

    // 60 Hz over a 1.5 to 8 minute lap
    for samples in [5_400usize, 14_400, 28_800] {
        let lap = circle_lap_samples(samples, 800.0);
        group.bench_with_input(BenchmarkId::from_parameter(samples), &lap, |b, lap| {
            b.iter(|| black_box(resample(black_box(lap), OUTLINE_POINTS)))
        });
    }

    group.finish();
}

fn bench_normalize(c: &mut Criterion) {
    let points = resample(&circle_lap_samples(5_400, 800.0), OUTLINE_POINTS);
    c.bench_function("normalize", |b| b.iter(|| black_box(normalize(black_box(&points)))));
}

fn bench_full_lap(c: &mut Criterion) {
    let samples = 5_400;

    c.bench_function("capture_full_lap", |b| {
        b.iter_batched(
            // A fresh cache dir per iteration keeps every session a cache miss
            || tempfile::tempdir().expect("temp dir"),
            |dir| {
                let capture = TrackOutlineCapture::new(OutlineCache::new(dir.path()));
                capture.begin_session(7, "Bench Ring");
                for i in 0..=samples {
                    let pct = (i % samples) as f32 / samples as f32;
                    capture.record_sample(45.0, TAU * pct, pct, 1.0 / 60.0);
                }
                black_box(capture.outline())
            },
            BatchSize::SmallInput,
        )
    });
}

criterion_group!(benches, bench_resample, bench_normalize, bench_full_lap);
criterion_main!(benches);
