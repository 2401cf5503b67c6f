//! Activity Tracker Benchmarks
//!
//! Ingestion throughput of the windowed tracker and per-event orchestrator
//! dispatch cost, using criterion

use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use damage_capture_rust::*;
use std::hint::black_box;

fn bench_tracker_ingestion(c: &mut Criterion) {
    let mut group = c.benchmark_group("tracker_ingestion");

    // Events per second of simulated damage
    let rates = [("sparse", 2u64), ("typing", 30), ("video", 240), ("storm", 2000)];

    for (name, rate) in rates {
        let step = (1000 / rate).max(1);
        group.throughput(Throughput::Elements(rate));

        group.bench_with_input(BenchmarkId::new("one_second", name), &step, |b, &step| {
            b.iter(|| {
                let mut tracker = WindowedActivityTracker::new(ActivityConfig::default());
                let mut t = 0;
                while t < 1000 {
                    let region = ChangeRegion::from_origin_size((t % 640) as i32, 0, 128, 64);
                    tracker.record_change(TimestampedChange::new(region, t));
                    if t % 100 == 0 {
                        tracker.tick(t);
                    }
                    t += step;
                }
                black_box(tracker.is_streaming())
            })
        });
    }

    group.finish();
}

struct NullGrabber;

impl StillFrameGrabber for NullGrabber {
    fn grab(&mut self, _drawable: u32, region: &ChangeRegion) -> CaptureResult<RawImage> {
        Ok(RawImage::new(Vec::new(), region.width(), region.height(), PixelFormat::BGRA8))
    }

    fn implementation_name(&self) -> String {
        "null".to_string()
    }
}

struct NullSource;

impl ChangeEventSource for NullSource {
    fn next_event(&mut self, _timeout: std::time::Duration) -> CaptureResult<Option<ChangeEvent>> {
        Ok(None)
    }

    fn pointer_position(&mut self) -> CaptureResult<CursorPosition> {
        Ok(CursorPosition::default())
    }

    fn cursor_image(&mut self) -> CaptureResult<CursorImage> {
        Ok(CursorImage::default())
    }

    fn surface_size(&self) -> SurfaceSize {
        SurfaceSize::new(1920, 1080)
    }

    fn implementation_name(&self) -> String {
        "null".to_string()
    }
}

fn bench_damage_dispatch(c: &mut Criterion) {
    let mut group = c.benchmark_group("damage_dispatch");

    group.bench_function("still_path", |b| {
        let mut orchestrator = CaptureOrchestratorBuilder::new()
            .source(Box::new(NullSource))
            .grabber(Box::new(NullGrabber))
            .encoder(Box::new(UnavailableEncoder::new("bench")))
            .build()
            .expect("orchestrator");
        let mut t = 0u64;

        b.iter(|| {
            // one event per second keeps the tracker idle
            t += 1000;
            let event = ChangeEvent::Damage {
                region: ChangeRegion::from_origin_size(0, 0, 32, 32),
                drawable: 1,
            };
            orchestrator.handle_event(black_box(event), t);
        })
    });

    group.finish();
}

criterion_group!(benches, bench_tracker_ingestion, bench_damage_dispatch);
criterion_main!(benches);
