//! Scripted collaborators shared by the orchestrator integration tests

#![allow(dead_code)]

use damage_capture_rust::{
    capture::{ChangeEvent, ChangeEventSource, StillFrameGrabber},
    encoder::{EncodedFrame, EncoderSession, StreamEncoder},
    ActivityTracker, CaptureError, CaptureOrchestrator, CaptureOrchestratorBuilder,
    CaptureOutput, CaptureResult, ChangeRegion, Codec, CursorImage, CursorPosition,
    EncoderError, PixelFormat, RawImage, RetryPolicy, SurfaceSize, TimestampedChange,
};
use damage_capture_rust::error::EncoderResult;
use damage_capture_rust::types::DrawableId;

use bytes::Bytes;
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

pub fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

pub fn region(n: i32) -> ChangeRegion {
    ChangeRegion::from_origin_size(n * 10, n * 5, 64, 32)
}

pub fn damage(n: i32) -> ChangeEvent {
    ChangeEvent::Damage {
        region: region(n),
        drawable: 1,
    }
}

/// Event source that replays a fixed queue, then reports a lost connection
pub struct ScriptedSource {
    events: VecDeque<ChangeEvent>,
    surface: SurfaceSize,
    pointer: CursorPosition,
    cursor_serial: u32,
}

impl ScriptedSource {
    pub fn new(events: Vec<ChangeEvent>) -> Self {
        Self {
            events: events.into(),
            surface: SurfaceSize::new(1920, 1080),
            pointer: CursorPosition::new(0, 0),
            cursor_serial: 0,
        }
    }
}

impl ChangeEventSource for ScriptedSource {
    fn next_event(&mut self, _timeout: Duration) -> CaptureResult<Option<ChangeEvent>> {
        match self.events.pop_front() {
            Some(event) => {
                if let ChangeEvent::Reconfigure { width, height } = event {
                    self.surface = SurfaceSize::new(width, height);
                }
                self.pointer.x += 1;
                Ok(Some(event))
            }
            None => Err(CaptureError::ConnectionLost("script exhausted".to_string())),
        }
    }

    fn pointer_position(&mut self) -> CaptureResult<CursorPosition> {
        Ok(self.pointer)
    }

    fn cursor_image(&mut self) -> CaptureResult<CursorImage> {
        self.cursor_serial += 1;
        Ok(CursorImage {
            width: 16,
            height: 16,
            serial: self.cursor_serial,
            pixels: vec![0xff00_00ff; 256],
            ..Default::default()
        })
    }

    fn surface_size(&self) -> SurfaceSize {
        self.surface
    }

    fn implementation_name(&self) -> String {
        "scripted".to_string()
    }
}

#[derive(Debug, Default)]
pub struct TrackerLog {
    pub records: Vec<TimestampedChange>,
    pub ticks: Vec<u64>,
    pub resets: u32,
}

/// Tracker whose verdict after the n-th recorded change is `script[n]`.
///
/// Past the end of the script the last verdict repeats. `reset` returns to
/// idle and restarts the script.
pub struct ScriptedTracker {
    script: Vec<bool>,
    position: usize,
    streaming: bool,
    pub log: Arc<Mutex<TrackerLog>>,
}

impl ScriptedTracker {
    pub fn new(script: Vec<bool>) -> Self {
        Self {
            script,
            position: 0,
            streaming: false,
            log: Arc::new(Mutex::new(TrackerLog::default())),
        }
    }

    /// Idle for the first `idle` changes, streaming afterwards
    pub fn streaming_after(idle: usize) -> Self {
        let mut script = vec![false; idle];
        script.push(true);
        Self::new(script)
    }
}

impl ActivityTracker for ScriptedTracker {
    fn record_change(&mut self, change: TimestampedChange) {
        if let Some(&verdict) = self
            .script
            .get(self.position)
            .or_else(|| self.script.last())
        {
            self.streaming = verdict;
        }
        self.position += 1;
        self.log.lock().records.push(change);
    }

    fn tick(&mut self, now_millis: u64) {
        self.log.lock().ticks.push(now_millis);
    }

    fn is_streaming(&self) -> bool {
        self.streaming
    }

    fn reset(&mut self) {
        self.streaming = false;
        self.position = 0;
        self.log.lock().resets += 1;
    }
}

#[derive(Debug, Default)]
pub struct GrabLog {
    pub grabs: Vec<(DrawableId, ChangeRegion)>,
    pub failures: u32,
}

/// Grabber returning blank BGRA pixels, optionally failing every call
pub struct CountingGrabber {
    pub fail: bool,
    pub log: Arc<Mutex<GrabLog>>,
}

impl CountingGrabber {
    pub fn new() -> Self {
        Self {
            fail: false,
            log: Arc::new(Mutex::new(GrabLog::default())),
        }
    }

    pub fn failing() -> Self {
        Self {
            fail: true,
            ..Self::new()
        }
    }
}

impl StillFrameGrabber for CountingGrabber {
    fn grab(&mut self, drawable: DrawableId, region: &ChangeRegion) -> CaptureResult<RawImage> {
        let mut log = self.log.lock();
        if self.fail {
            log.failures += 1;
            return Err(CaptureError::GrabFailed("scripted failure".to_string()));
        }
        log.grabs.push((drawable, *region));
        let size = region.area() as usize * 4;
        Ok(RawImage::new(
            vec![0; size],
            region.width(),
            region.height(),
            PixelFormat::BGRA8,
        ))
    }

    fn implementation_name(&self) -> String {
        "counting".to_string()
    }
}

/// Encoder calls in the order they happened
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EncoderCall {
    Create,
    CreateFailed,
    Encode,
    EncodeFailed,
    Destroy,
}

#[derive(Debug, Default)]
pub struct EncoderLog {
    pub calls: Vec<EncoderCall>,
    pub live: u32,
    pub peak_live: u32,
    /// Number of upcoming `create_session` calls that fail
    pub fail_creates: u32,
    /// Number of upcoming `encode_next_frame` calls that fail
    pub fail_encodes: u32,
    pub surfaces: Vec<SurfaceSize>,
}

impl EncoderLog {
    pub fn count(&self, call: EncoderCall) -> usize {
        self.calls.iter().filter(|c| **c == call).count()
    }
}

/// Encoder counting session lifecycle calls
pub struct FakeEncoder {
    pub log: Arc<Mutex<EncoderLog>>,
}

impl FakeEncoder {
    pub fn new() -> Self {
        Self {
            log: Arc::new(Mutex::new(EncoderLog::default())),
        }
    }

    pub fn failing_first(n: u32) -> Self {
        let encoder = Self::new();
        encoder.log.lock().fail_creates = n;
        encoder
    }
}

impl StreamEncoder for FakeEncoder {
    fn create_session(&mut self, surface: SurfaceSize) -> EncoderResult<Box<dyn EncoderSession>> {
        let mut log = self.log.lock();
        if log.fail_creates > 0 {
            log.fail_creates -= 1;
            log.calls.push(EncoderCall::CreateFailed);
            return Err(EncoderError::SessionCreateFailed(
                "scripted failure".to_string(),
            ));
        }
        log.calls.push(EncoderCall::Create);
        log.surfaces.push(surface);
        log.live += 1;
        log.peak_live = log.peak_live.max(log.live);
        Ok(Box::new(FakeSession {
            log: Arc::clone(&self.log),
            frames: 0,
        }))
    }

    fn name(&self) -> String {
        "fake".to_string()
    }
}

struct FakeSession {
    log: Arc<Mutex<EncoderLog>>,
    frames: u64,
}

impl EncoderSession for FakeSession {
    fn encode_next_frame(&mut self) -> EncoderResult<EncodedFrame> {
        let mut log = self.log.lock();
        if log.fail_encodes > 0 {
            log.fail_encodes -= 1;
            log.calls.push(EncoderCall::EncodeFailed);
            return Err(EncoderError::FrameTimeout { timeout_ms: 500 });
        }
        log.calls.push(EncoderCall::Encode);
        self.frames += 1;
        Ok(EncodedFrame {
            frame_id: self.frames,
            codec: Codec::Hevc,
            data: Bytes::from_static(&[0, 0, 0, 1, 0x26, 0x01]),
            keyframe: self.frames == 1,
            elapsed: Duration::from_millis(1),
        })
    }

    fn frames_encoded(&self) -> u64 {
        self.frames
    }
}

impl Drop for FakeSession {
    fn drop(&mut self) {
        let mut log = self.log.lock();
        log.calls.push(EncoderCall::Destroy);
        log.live -= 1;
    }
}

/// Orchestrator wired to fakes, with handles to every fake's log
pub struct Harness {
    pub orchestrator: CaptureOrchestrator,
    pub tracker: Arc<Mutex<TrackerLog>>,
    pub grabber: Arc<Mutex<GrabLog>>,
    pub encoder: Arc<Mutex<EncoderLog>>,
    pub outputs: Arc<Mutex<Vec<CaptureOutput>>>,
}

impl Harness {
    pub fn new(tracker: ScriptedTracker, encoder: FakeEncoder) -> Self {
        Self::with(tracker, CountingGrabber::new(), encoder, RetryPolicy::default(), false)
    }

    pub fn with(
        tracker: ScriptedTracker,
        grabber: CountingGrabber,
        encoder: FakeEncoder,
        retry: RetryPolicy,
        still_fallback: bool,
    ) -> Self {
        init_logging();
        let tracker_log = Arc::clone(&tracker.log);
        let grab_log = Arc::clone(&grabber.log);
        let encoder_log = Arc::clone(&encoder.log);
        let outputs = Arc::new(Mutex::new(Vec::new()));
        let sink_outputs = Arc::clone(&outputs);

        let orchestrator = CaptureOrchestratorBuilder::new()
            .retry_policy(retry)
            .still_fallback(still_fallback)
            .source(Box::new(ScriptedSource::new(Vec::new())))
            .tracker(Box::new(tracker))
            .grabber(Box::new(grabber))
            .encoder(Box::new(encoder))
            .sink(move |output| sink_outputs.lock().push(output))
            .build()
            .expect("orchestrator");

        Self {
            orchestrator,
            tracker: tracker_log,
            grabber: grab_log,
            encoder: encoder_log,
            outputs,
        }
    }

    /// Dispatch damage events `from..to`, 10ms apart
    pub fn feed_damage(&mut self, from: i32, to: i32) {
        for n in from..to {
            self.orchestrator.handle_event(damage(n), (n as u64) * 10);
        }
    }

    pub fn grabs(&self) -> usize {
        self.grabber.lock().grabs.len()
    }

    pub fn calls(&self) -> Vec<EncoderCall> {
        self.encoder.lock().calls.clone()
    }
}
