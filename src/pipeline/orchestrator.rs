//! Damage-driven capture orchestrator
//!
//! A single-threaded event loop. Each iteration:
//!
//! 1. forwards a tick to the activity tracker so stale activity expires,
//! 2. samples the pointer position,
//! 3. blocks for at most one tick interval on the next change event,
//! 4. dispatches it: damage goes through the tracker, and the verdict picks
//!    either a still-frame grab or one grab-and-encode on the live encoder
//!    session, creating the session on demand.
//!
//! At most one encoder session is alive at any time. It is destroyed as soon
//! as the verdict turns idle (on a damage event or when a tick expires the
//! activity), on surface reconfiguration, and on teardown.

use crate::{
    activity::{ActivityTracker, WindowedActivityTracker},
    capture::{ChangeEvent, ChangeEventSource, Capturer, StillFrameGrabber},
    clock::{Clock, MonotonicClock},
    encoder::{default_encoder, EncodedFrame, EncoderSession, StreamEncoder},
    error::{CaptureError, CaptureResult},
    types::{
        ActivityConfig, ActivityVerdict, ChangeRegion, CursorImage, CursorPosition, DrawableId,
        HwEncoderConfig, OrchestratorConfig, OrchestratorStats, RawImage, RetryPolicy,
        SurfaceSize, TimestampedChange,
    },
};

use parking_lot::Mutex;
use std::{
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
    time::Duration,
};

/// Output of one capture tick
#[derive(Debug, Clone)]
pub enum CaptureOutput {
    /// Pixels of a damaged region (idle path)
    Still {
        drawable: DrawableId,
        region: ChangeRegion,
        image: RawImage,
    },
    /// One compressed frame (streaming path)
    Encoded(EncodedFrame),
    /// New cursor shape after a cursor-change notification
    Cursor(CursorImage),
}

/// Consumer of capture output
pub type OutputSink = Box<dyn FnMut(CaptureOutput)>;

/// Capture path state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OrchestratorState {
    /// No encoder session
    Idle,
    /// Encoder session live and healthy
    Streaming,
    /// Session creation failed during the current activity run
    StreamingFailed {
        consecutive_failures: u32,
        /// Earliest time of the next attempt; `None` while suspended until
        /// the activity run ends
        retry_at_millis: Option<u64>,
    },
}

/// Owns the event source, the tracker and the encoder session slot
pub struct CaptureOrchestrator {
    config: OrchestratorConfig,
    source: Box<dyn ChangeEventSource>,
    tracker: Box<dyn ActivityTracker>,
    grabber: Box<dyn StillFrameGrabber>,
    encoder: Box<dyn StreamEncoder>,
    session: Option<Box<dyn EncoderSession>>,
    clock: Box<dyn Clock>,
    sink: OutputSink,
    state: OrchestratorState,
    verdict: ActivityVerdict,
    surface: SurfaceSize,
    last_cursor: Option<CursorPosition>,
    stats: Arc<Mutex<OrchestratorStats>>,
}

impl CaptureOrchestrator {
    /// Create an orchestrator from its collaborators
    pub fn new(
        config: OrchestratorConfig,
        source: Box<dyn ChangeEventSource>,
        tracker: Box<dyn ActivityTracker>,
        grabber: Box<dyn StillFrameGrabber>,
        encoder: Box<dyn StreamEncoder>,
        clock: Box<dyn Clock>,
        sink: OutputSink,
    ) -> CaptureResult<Self> {
        config.validate()?;
        let surface = source.surface_size();

        log::info!(
            "Capture orchestrator ready: source={}, grabber={}, encoder={}, surface={}",
            source.implementation_name(),
            grabber.implementation_name(),
            encoder.name(),
            surface
        );

        Ok(Self {
            config,
            source,
            tracker,
            grabber,
            encoder,
            session: None,
            clock,
            sink,
            state: OrchestratorState::Idle,
            verdict: ActivityVerdict::Idle,
            surface,
            last_cursor: None,
            stats: Arc::new(Mutex::new(OrchestratorStats::default())),
        })
    }

    /// Run until `stop` is set or the event connection fails.
    ///
    /// The encoder session is destroyed before returning either way.
    pub fn run(&mut self, stop: &AtomicBool) -> CaptureResult<()> {
        let result = loop {
            if stop.load(Ordering::Relaxed) {
                break Ok(());
            }
            if let Err(e) = self.run_once() {
                log::error!("Capture loop stopped: {}", e);
                break Err(e);
            }
        };
        self.shutdown();
        result
    }

    /// One loop iteration. Returns whether an event was dispatched.
    pub fn run_once(&mut self) -> CaptureResult<bool> {
        let now = self.clock.now_millis();
        self.tick(now);
        self.poll_pointer();

        match self.source.next_event(self.config.tick_interval)? {
            Some(event) => {
                let now = self.clock.now_millis();
                self.handle_event(event, now);
                Ok(true)
            }
            None => Ok(false),
        }
    }

    /// Periodic timeout: lets the tracker expire stale activity.
    ///
    /// When that ends a streaming run, the session is released right away
    /// instead of waiting for the next damage event.
    pub fn tick(&mut self, now_millis: u64) {
        self.stats.lock().ticks += 1;
        self.tracker.tick(now_millis);

        if self.verdict.is_streaming() && !self.tracker.is_streaming() {
            self.switch_verdict(ActivityVerdict::Idle);
            self.destroy_session("activity expired");
            self.state = OrchestratorState::Idle;
        }
    }

    /// Dispatch one change event observed at `now_millis`
    pub fn handle_event(&mut self, event: ChangeEvent, now_millis: u64) {
        log::trace!("Event {} at {}ms", event.kind(), now_millis);
        match event {
            ChangeEvent::Damage { region, drawable } => self.on_damage(region, drawable, now_millis),
            ChangeEvent::CursorChange => self.on_cursor_change(),
            ChangeEvent::Reconfigure { width, height } => self.on_reconfigure(width, height),
        }
    }

    /// Destroy any live session; safe to call between any two events
    pub fn shutdown(&mut self) {
        self.destroy_session("shutdown");
        self.state = OrchestratorState::Idle;
    }

    pub fn state(&self) -> OrchestratorState {
        self.state
    }

    /// Tracker verdict as of the last damage event or expiring tick
    pub fn verdict(&self) -> ActivityVerdict {
        self.verdict
    }

    pub fn has_session(&self) -> bool {
        self.session.is_some()
    }

    pub fn surface(&self) -> SurfaceSize {
        self.surface
    }

    pub fn last_cursor(&self) -> Option<CursorPosition> {
        self.last_cursor
    }

    pub fn config(&self) -> &OrchestratorConfig {
        &self.config
    }

    /// Snapshot of the counters
    pub fn stats(&self) -> OrchestratorStats {
        self.stats.lock().clone()
    }

    /// Shared handle for observing the counters from another thread
    pub fn stats_handle(&self) -> Arc<Mutex<OrchestratorStats>> {
        Arc::clone(&self.stats)
    }

    fn switch_verdict(&mut self, verdict: ActivityVerdict) {
        if verdict == self.verdict {
            return;
        }
        self.stats.lock().path_switches += 1;
        match verdict {
            ActivityVerdict::Streaming => log::info!("Stream start"),
            ActivityVerdict::Idle => log::info!("Stream stop"),
        }
        self.verdict = verdict;
    }

    fn poll_pointer(&mut self) {
        match self.source.pointer_position() {
            Ok(position) if self.last_cursor != Some(position) => {
                log::trace!("Pointer at ({}, {})", position.x, position.y);
                self.last_cursor = Some(position);
                self.stats.lock().cursor_moves += 1;
            }
            Ok(_) => {}
            Err(e) => log::debug!("Pointer query failed: {}", e),
        }
    }

    fn on_cursor_change(&mut self) {
        self.stats.lock().cursor_changes += 1;
        match self.source.cursor_image() {
            Ok(cursor) => {
                log::debug!(
                    "Cursor changed: {}x{} hot=({}, {}) serial={}",
                    cursor.width,
                    cursor.height,
                    cursor.xhot,
                    cursor.yhot,
                    cursor.serial
                );
                (self.sink)(CaptureOutput::Cursor(cursor));
            }
            Err(e) => log::warn!("Cursor image unavailable: {}", e),
        }
    }

    fn on_reconfigure(&mut self, width: u32, height: u32) {
        self.stats.lock().reconfigures += 1;
        self.surface = SurfaceSize::new(width, height);
        log::info!("Surface reconfigured to {}", self.surface);

        self.tracker.reset();
        self.destroy_session("surface reconfigured");
        self.state = OrchestratorState::Idle;
        self.verdict = ActivityVerdict::Idle;
    }

    fn on_damage(&mut self, region: ChangeRegion, drawable: DrawableId, now_millis: u64) {
        self.stats.lock().damage_events += 1;
        self.tracker
            .record_change(TimestampedChange::new(region, now_millis));

        let verdict = self.tracker.verdict();
        self.switch_verdict(verdict);

        match verdict {
            ActivityVerdict::Idle => {
                self.destroy_session("activity stopped");
                self.state = OrchestratorState::Idle;
                self.grab_still(drawable, region);
            }
            ActivityVerdict::Streaming => {
                if self.session.is_none() && !self.try_create_session(now_millis) {
                    if self.config.still_fallback_on_encoder_failure {
                        self.grab_still(drawable, region);
                    }
                    return;
                }
                self.encode_frame();
            }
        }
    }

    /// Attempt to fill the empty session slot, honouring the retry policy
    fn try_create_session(&mut self, now_millis: u64) -> bool {
        let previous_failures = match self.state {
            OrchestratorState::StreamingFailed {
                consecutive_failures,
                retry_at_millis,
            } => match retry_at_millis {
                None => return false,
                Some(at) if now_millis < at => return false,
                Some(_) => consecutive_failures,
            },
            _ => 0,
        };

        match self.encoder.create_session(self.surface) {
            Ok(session) => {
                self.session = Some(session);
                self.state = OrchestratorState::Streaming;
                self.stats.lock().sessions_created += 1;
                log::info!(
                    "Encoder session created ({}, {})",
                    self.encoder.name(),
                    self.surface
                );
                true
            }
            Err(e) => {
                let failures = previous_failures + 1;
                self.stats.lock().session_create_failures += 1;

                let policy = &self.config.retry;
                let retry_at_millis = if !e.is_recoverable() || policy.is_exhausted(failures) {
                    log::warn!(
                        "Encoder session creation failed ({} in a row), suspended until activity stops: {}",
                        failures,
                        e
                    );
                    None
                } else {
                    let delay = policy.delay_after(failures);
                    log::warn!(
                        "Encoder session creation failed ({} in a row), retrying in {:?}: {}",
                        failures,
                        delay,
                        e
                    );
                    Some(now_millis + delay.as_millis() as u64)
                };

                self.state = OrchestratorState::StreamingFailed {
                    consecutive_failures: failures,
                    retry_at_millis,
                };
                false
            }
        }
    }

    fn encode_frame(&mut self) {
        let Some(session) = self.session.as_mut() else {
            return;
        };

        match session.encode_next_frame() {
            Ok(frame) => {
                {
                    let mut stats = self.stats.lock();
                    stats.frames_encoded += 1;
                    stats.bytes_encoded += frame.size() as u64;
                }
                log::trace!(
                    "Frame {} encoded: {} bytes in {:?}",
                    frame.frame_id,
                    frame.size(),
                    frame.elapsed
                );
                (self.sink)(CaptureOutput::Encoded(frame));
            }
            Err(e) => {
                self.stats.lock().encode_failures += 1;
                log::warn!("Encode failed, frame skipped: {}", e);
            }
        }
    }

    fn grab_still(&mut self, drawable: DrawableId, region: ChangeRegion) {
        match self.grabber.grab(drawable, &region) {
            Ok(image) => {
                self.stats.lock().stills_captured += 1;
                log::debug!("Still captured: {}", region);
                (self.sink)(CaptureOutput::Still {
                    drawable,
                    region,
                    image,
                });
            }
            Err(e) => {
                self.stats.lock().still_failures += 1;
                log::warn!("Still grab of {} failed, skipped: {}", region, e);
            }
        }
    }

    fn destroy_session(&mut self, reason: &str) {
        if let Some(session) = self.session.take() {
            let frames = session.frames_encoded();
            drop(session);
            self.stats.lock().sessions_destroyed += 1;
            log::info!("Encoder session destroyed ({}) after {} frames", reason, frames);
        }
    }
}

impl Drop for CaptureOrchestrator {
    fn drop(&mut self) {
        self.shutdown();
    }
}

/// Builder for [`CaptureOrchestrator`]
pub struct CaptureOrchestratorBuilder {
    config: OrchestratorConfig,
    source: Option<Box<dyn ChangeEventSource>>,
    grabber: Option<Box<dyn StillFrameGrabber>>,
    tracker: Option<Box<dyn ActivityTracker>>,
    encoder: Option<Box<dyn StreamEncoder>>,
    clock: Option<Box<dyn Clock>>,
    sink: Option<OutputSink>,
}

impl CaptureOrchestratorBuilder {
    /// Create a new builder
    pub fn new() -> Self {
        Self {
            config: OrchestratorConfig::default(),
            source: None,
            grabber: None,
            tracker: None,
            encoder: None,
            clock: None,
            sink: None,
        }
    }

    /// Replace the whole configuration
    pub fn config(mut self, config: OrchestratorConfig) -> Self {
        self.config = config;
        self
    }

    /// Set the X display name
    pub fn display(mut self, display: impl Into<String>) -> Self {
        self.config.display = Some(display.into());
        self
    }

    /// Set the tick interval
    pub fn tick_interval(mut self, interval: Duration) -> Self {
        self.config.tick_interval = interval;
        self
    }

    /// Set the activity classifier parameters
    pub fn activity(mut self, activity: ActivityConfig) -> Self {
        self.config.activity = activity;
        self
    }

    /// Set the hardware encoder configuration
    pub fn encoder_config(mut self, encoder: HwEncoderConfig) -> Self {
        self.config.encoder = encoder;
        self
    }

    /// Set the session creation retry policy
    pub fn retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.config.retry = retry;
        self
    }

    /// Grab stills while streaming has no encoder session
    pub fn still_fallback(mut self, enabled: bool) -> Self {
        self.config.still_fallback_on_encoder_failure = enabled;
        self
    }

    pub fn source(mut self, source: Box<dyn ChangeEventSource>) -> Self {
        self.source = Some(source);
        self
    }

    pub fn grabber(mut self, grabber: Box<dyn StillFrameGrabber>) -> Self {
        self.grabber = Some(grabber);
        self
    }

    pub fn tracker(mut self, tracker: Box<dyn ActivityTracker>) -> Self {
        self.tracker = Some(tracker);
        self
    }

    pub fn encoder(mut self, encoder: Box<dyn StreamEncoder>) -> Self {
        self.encoder = Some(encoder);
        self
    }

    pub fn clock(mut self, clock: Box<dyn Clock>) -> Self {
        self.clock = Some(clock);
        self
    }

    /// Set the capture output consumer
    pub fn sink<F>(mut self, sink: F) -> Self
    where
        F: FnMut(CaptureOutput) + 'static,
    {
        self.sink = Some(Box::new(sink));
        self
    }

    /// Connect to the configured display, then build.
    ///
    /// Fails when the display or a required extension is unavailable.
    pub fn connect(mut self) -> CaptureResult<CaptureOrchestrator> {
        let (source, grabber) = Capturer::connect(self.config.display.as_deref())?;
        self.source = Some(source);
        self.grabber = Some(grabber);
        self.build()
    }

    /// Build the orchestrator; unset collaborators get their defaults
    pub fn build(self) -> CaptureResult<CaptureOrchestrator> {
        let source = self.source.ok_or_else(|| {
            CaptureError::InvalidConfiguration("no change-event source".to_string())
        })?;
        let grabber = self.grabber.ok_or_else(|| {
            CaptureError::InvalidConfiguration("no still-frame grabber".to_string())
        })?;
        let tracker = match self.tracker {
            Some(tracker) => tracker,
            None => Box::new(WindowedActivityTracker::new(self.config.activity.clone())),
        };
        let encoder = match self.encoder {
            Some(encoder) => encoder,
            None => default_encoder(&self.config.encoder, self.config.display.as_deref())?,
        };
        let clock = self.clock.unwrap_or_else(|| Box::new(MonotonicClock));
        let sink = self.sink.unwrap_or_else(|| Box::new(|_| {}));

        CaptureOrchestrator::new(self.config, source, tracker, grabber, encoder, clock, sink)
    }
}

impl Default for CaptureOrchestratorBuilder {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::encoder::UnavailableEncoder;
    use crate::types::PixelFormat;
    use std::collections::VecDeque;

    struct IdleSource;

    impl ChangeEventSource for IdleSource {
        fn next_event(&mut self, _timeout: Duration) -> CaptureResult<Option<ChangeEvent>> {
            Ok(None)
        }

        fn pointer_position(&mut self) -> CaptureResult<CursorPosition> {
            Ok(CursorPosition::new(5, 5))
        }

        fn cursor_image(&mut self) -> CaptureResult<CursorImage> {
            Err(CaptureError::CursorQueryFailed("none".to_string()))
        }

        fn surface_size(&self) -> SurfaceSize {
            SurfaceSize::new(640, 480)
        }

        fn implementation_name(&self) -> String {
            "idle".to_string()
        }
    }

    struct BlankGrabber;

    impl StillFrameGrabber for BlankGrabber {
        fn grab(&mut self, _drawable: DrawableId, region: &ChangeRegion) -> CaptureResult<RawImage> {
            let size = region.area() as usize * 4;
            Ok(RawImage::new(vec![0; size], region.width(), region.height(), PixelFormat::BGRA8))
        }

        fn implementation_name(&self) -> String {
            "blank".to_string()
        }
    }

    /// Verdicts handed out one per damage event, then the last one repeats
    struct Script(VecDeque<bool>, bool);

    impl ActivityTracker for Script {
        fn record_change(&mut self, _change: TimestampedChange) {
            if let Some(next) = self.0.pop_front() {
                self.1 = next;
            }
        }
        fn tick(&mut self, _now_millis: u64) {}
        fn is_streaming(&self) -> bool {
            self.1
        }
        fn reset(&mut self) {
            self.1 = false;
        }
    }

    struct FixedClock;

    impl Clock for FixedClock {
        fn now_millis(&self) -> u64 {
            0
        }
    }

    fn orchestrator(verdicts: &[bool], retry: RetryPolicy) -> CaptureOrchestrator {
        CaptureOrchestratorBuilder::new()
            .retry_policy(retry)
            .source(Box::new(IdleSource))
            .grabber(Box::new(BlankGrabber))
            .tracker(Box::new(Script(verdicts.iter().copied().collect(), false)))
            .encoder(Box::new(UnavailableEncoder::new("test")))
            .clock(Box::new(FixedClock))
            .build()
            .unwrap()
    }

    fn damage() -> ChangeEvent {
        ChangeEvent::Damage {
            region: ChangeRegion::from_origin_size(0, 0, 8, 8),
            drawable: 1,
        }
    }

    #[test]
    fn test_builder_requires_source_and_grabber() {
        let result = CaptureOrchestratorBuilder::new().build();
        assert!(matches!(result, Err(CaptureError::InvalidConfiguration(_))));
    }

    #[test]
    fn test_initial_state_is_idle() {
        let orchestrator = orchestrator(&[], RetryPolicy::default());
        assert_eq!(orchestrator.state(), OrchestratorState::Idle);
        assert!(!orchestrator.has_session());
        assert_eq!(orchestrator.surface(), SurfaceSize::new(640, 480));
    }

    #[test]
    fn test_failed_creation_backs_off() {
        let retry = RetryPolicy {
            max_consecutive_failures: 0,
            backoff_base: Duration::from_millis(100),
            backoff_max: Duration::from_secs(1),
        };
        let mut orchestrator = orchestrator(&[true], retry);

        orchestrator.handle_event(damage(), 0);
        orchestrator.handle_event(damage(), 10);
        assert_eq!(
            orchestrator.state(),
            OrchestratorState::StreamingFailed {
                consecutive_failures: 2,
                retry_at_millis: Some(110),
            }
        );

        // inside the backoff window: no attempt
        orchestrator.handle_event(damage(), 50);
        assert_eq!(orchestrator.stats().session_create_failures, 2);

        orchestrator.handle_event(damage(), 110);
        assert_eq!(orchestrator.stats().session_create_failures, 3);
    }

    #[test]
    fn test_exhausted_retries_resume_after_idle() {
        let retry = RetryPolicy {
            max_consecutive_failures: 2,
            ..RetryPolicy::unbounded()
        };
        let mut orchestrator = orchestrator(&[true, true, true, false, true], retry);

        for t in 0..3 {
            orchestrator.handle_event(damage(), t);
        }
        assert_eq!(orchestrator.stats().session_create_failures, 2);
        assert!(matches!(
            orchestrator.state(),
            OrchestratorState::StreamingFailed { retry_at_millis: None, .. }
        ));

        orchestrator.handle_event(damage(), 3);
        assert_eq!(orchestrator.state(), OrchestratorState::Idle);

        orchestrator.handle_event(damage(), 4);
        assert_eq!(orchestrator.stats().session_create_failures, 3);
    }

    #[test]
    fn test_expiring_tick_ends_failed_run() {
        let mut orchestrator = CaptureOrchestratorBuilder::new()
            .source(Box::new(IdleSource))
            .grabber(Box::new(BlankGrabber))
            .encoder(Box::new(UnavailableEncoder::new("test")))
            .clock(Box::new(FixedClock))
            .build()
            .unwrap();

        // sustained 64x64 motion for 200ms with the default thresholds
        for t in (0..=200).step_by(10) {
            let event = ChangeEvent::Damage {
                region: ChangeRegion::from_origin_size(0, 0, 64, 64),
                drawable: 1,
            };
            orchestrator.handle_event(event, t);
        }
        assert!(orchestrator.verdict().is_streaming());
        assert!(matches!(
            orchestrator.state(),
            OrchestratorState::StreamingFailed { .. }
        ));

        orchestrator.tick(600);
        assert!(orchestrator.verdict().is_streaming());

        orchestrator.tick(700);
        assert_eq!(orchestrator.verdict(), ActivityVerdict::Idle);
        assert_eq!(orchestrator.state(), OrchestratorState::Idle);
        assert_eq!(orchestrator.stats().path_switches, 2);
    }

    #[test]
    fn test_run_once_ticks_and_samples_pointer() {
        let mut orchestrator = orchestrator(&[], RetryPolicy::default());
        assert!(!orchestrator.run_once().unwrap());
        assert!(!orchestrator.run_once().unwrap());

        let stats = orchestrator.stats();
        assert_eq!(stats.ticks, 2);
        assert_eq!(stats.cursor_moves, 1);
        assert_eq!(orchestrator.last_cursor(), Some(CursorPosition::new(5, 5)));
    }

    #[test]
    fn test_run_honours_stop_flag() {
        let mut orchestrator = orchestrator(&[], RetryPolicy::default());
        let stop = AtomicBool::new(true);
        assert!(orchestrator.run(&stop).is_ok());
        assert_eq!(orchestrator.stats().ticks, 0);
    }

    #[test]
    fn test_still_fallback_while_encoder_unavailable() {
        let mut orchestrator = CaptureOrchestratorBuilder::new()
            .still_fallback(true)
            .source(Box::new(IdleSource))
            .grabber(Box::new(BlankGrabber))
            .tracker(Box::new(Script(VecDeque::from(vec![true]), false)))
            .encoder(Box::new(UnavailableEncoder::new("test")))
            .build()
            .unwrap();

        orchestrator.handle_event(damage(), 0);
        let stats = orchestrator.stats();
        assert_eq!(stats.stills_captured, 1);
        assert_eq!(stats.frames_encoded, 0);
    }
}
