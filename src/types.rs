//! Core types: change regions, activity verdicts, images and configuration

use crate::error::{CaptureError, CaptureResult};
use std::fmt;
use std::time::Duration;

/// Windowing-system identifier of the drawable a change was reported on
pub type DrawableId = u32;

/// Rectangular area reported as modified, in surface-local pixels.
///
/// `right` and `bottom` are exclusive edges, so `right - left` is the width.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ChangeRegion {
    pub top: i32,
    pub bottom: i32,
    pub left: i32,
    pub right: i32,
}

impl ChangeRegion {
    /// Build a region from its four edges, rejecting inverted rectangles
    pub fn new(top: i32, bottom: i32, left: i32, right: i32) -> CaptureResult<Self> {
        if top > bottom || left > right {
            return Err(CaptureError::InvalidRegion {
                left,
                top,
                width: right.saturating_sub(left).max(0) as u32,
                height: bottom.saturating_sub(top).max(0) as u32,
            });
        }
        Ok(Self { top, bottom, left, right })
    }

    /// Build a region from an origin and a size, as damage events report it.
    ///
    /// Far edges past `i32::MAX` are clamped, so `left <= right` and
    /// `top <= bottom` always hold.
    pub fn from_origin_size(x: i32, y: i32, width: u32, height: u32) -> Self {
        Self {
            top: y,
            bottom: far_edge(y, height),
            left: x,
            right: far_edge(x, width),
        }
    }

    pub fn width(&self) -> u32 {
        if self.right > self.left {
            self.right.abs_diff(self.left)
        } else {
            0
        }
    }

    pub fn height(&self) -> u32 {
        if self.bottom > self.top {
            self.bottom.abs_diff(self.top)
        } else {
            0
        }
    }

    pub fn area(&self) -> u64 {
        self.width() as u64 * self.height() as u64
    }

    pub fn is_empty(&self) -> bool {
        self.area() == 0
    }

}

fn far_edge(origin: i32, extent: u32) -> i32 {
    let edge = i64::from(origin) + i64::from(extent);
    i32::try_from(edge).unwrap_or(i32::MAX)
}

impl fmt::Display for ChangeRegion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}x{}+{}+{}",
            self.width(),
            self.height(),
            self.left,
            self.top
        )
    }
}

/// A change region stamped with the monotonic time it was observed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimestampedChange {
    pub region: ChangeRegion,
    pub observed_at_millis: u64,
}

impl TimestampedChange {
    pub fn new(region: ChangeRegion, observed_at_millis: u64) -> Self {
        Self { region, observed_at_millis }
    }
}

/// Activity classification published by an activity tracker
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ActivityVerdict {
    /// Sparse redraws; grab still frames
    #[default]
    Idle,
    /// Sustained motion; stream through the hardware encoder
    Streaming,
}

impl ActivityVerdict {
    pub fn from_streaming(streaming: bool) -> Self {
        if streaming {
            ActivityVerdict::Streaming
        } else {
            ActivityVerdict::Idle
        }
    }

    pub fn is_streaming(&self) -> bool {
        matches!(self, ActivityVerdict::Streaming)
    }
}

/// Last observed pointer coordinates, root-relative
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct CursorPosition {
    pub x: i32,
    pub y: i32,
}

impl CursorPosition {
    pub fn new(x: i32, y: i32) -> Self {
        Self { x, y }
    }
}

/// Cursor shape fetched after a cursor-change notification
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct CursorImage {
    pub x: i32,
    pub y: i32,
    pub width: u32,
    pub height: u32,
    pub xhot: u32,
    pub yhot: u32,
    pub serial: u32,
    /// ARGB, one `u32` per pixel, row-major
    pub pixels: Vec<u32>,
}

/// Dimensions of the captured surface
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SurfaceSize {
    pub width: u32,
    pub height: u32,
}

impl SurfaceSize {
    pub fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }
}

impl fmt::Display for SurfaceSize {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}x{}", self.width, self.height)
    }
}

/// Pixel format for raw image data
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PixelFormat {
    /// Red, Green, Blue, Alpha (8 bits per channel)
    RGBA8,
    /// Blue, Green, Red, Alpha (8 bits per channel)
    BGRA8,
    /// Red, Green, Blue (8 bits per channel)
    RGB8,
}

impl PixelFormat {
    /// Get the number of bytes per pixel
    pub fn bytes_per_pixel(&self) -> usize {
        match self {
            PixelFormat::RGBA8 | PixelFormat::BGRA8 => 4,
            PixelFormat::RGB8 => 3,
        }
    }
}

impl fmt::Display for PixelFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PixelFormat::RGBA8 => write!(f, "RGBA8"),
            PixelFormat::BGRA8 => write!(f, "BGRA8"),
            PixelFormat::RGB8 => write!(f, "RGB8"),
        }
    }
}

/// Raw image data container
#[derive(Debug, Clone)]
pub struct RawImage {
    /// Pixel data
    pub data: Vec<u8>,
    /// Image width in pixels
    pub width: u32,
    /// Image height in pixels
    pub height: u32,
    /// Pixel format
    pub format: PixelFormat,
    /// Stride (bytes per row, may include padding)
    pub stride: usize,
}

impl RawImage {
    /// Create a new RawImage
    pub fn new(data: Vec<u8>, width: u32, height: u32, format: PixelFormat) -> Self {
        let stride = (width as usize) * format.bytes_per_pixel();
        Self {
            data,
            width,
            height,
            format,
            stride,
        }
    }

    /// Get the total size in bytes
    pub fn size(&self) -> usize {
        self.data.len()
    }

    /// Check if the image data is valid
    pub fn is_valid(&self) -> bool {
        let expected_size = self.stride * (self.height as usize);
        self.data.len() >= expected_size
    }
}

/// Video codec produced by the hardware encoder
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Codec {
    H264,
    Hevc,
}

impl Codec {
    /// Extension used for raw elementary-stream dumps
    pub fn file_extension(&self) -> &'static str {
        match self {
            Codec::H264 => "h264",
            Codec::Hevc => "hevc",
        }
    }
}

impl fmt::Display for Codec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Codec::H264 => write!(f, "H.264"),
            Codec::Hevc => write!(f, "HEVC"),
        }
    }
}

/// Fixed hardware encoder settings, consumed only by the encoder backend
#[derive(Debug, Clone)]
pub struct HwEncoderConfig {
    pub codec: Codec,
    /// Target frame rate (frames per second)
    pub fps: u32,
    /// Average bitrate in bits per second
    pub avg_bitrate: u32,
    /// Peak bitrate in bits per second
    pub peak_bitrate: u32,
    /// Keyframe interval in frames
    pub gop_length: u32,
    /// Quantizer for CQP rate control (nvenc, x264) and the initial QP (vaapi)
    pub qp: u32,
    /// Prefer the low-latency preset of the backend
    pub low_latency: bool,
    /// Composite the pointer into encoded frames
    pub with_cursor: bool,
    /// How long one grab-and-encode call may block
    pub frame_timeout: Duration,
}

impl Default for HwEncoderConfig {
    fn default() -> Self {
        let avg_bitrate = 8_000_000;
        Self {
            codec: Codec::Hevc,
            fps: 60,
            avg_bitrate,
            peak_bitrate: avg_bitrate / 2 * 3,
            gop_length: 100,
            qp: 26,
            low_latency: true,
            with_cursor: false,
            frame_timeout: Duration::from_millis(500),
        }
    }
}

impl HwEncoderConfig {
    /// H.264 preset with otherwise default settings
    pub fn h264() -> Self {
        Self {
            codec: Codec::H264,
            ..Default::default()
        }
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<(), String> {
        if self.fps == 0 || self.fps > 240 {
            return Err(format!("FPS must be 1-240, got {}", self.fps));
        }
        if self.avg_bitrate == 0 {
            return Err("Average bitrate must be non-zero".to_string());
        }
        if self.peak_bitrate < self.avg_bitrate {
            return Err(format!(
                "Peak bitrate {} is below average bitrate {}",
                self.peak_bitrate, self.avg_bitrate
            ));
        }
        if self.gop_length == 0 {
            return Err("GOP length must be non-zero".to_string());
        }
        if self.qp > 51 {
            return Err(format!("QP must be 0-51, got {}", self.qp));
        }
        if self.frame_timeout.is_zero() {
            return Err("Frame timeout must be non-zero".to_string());
        }
        Ok(())
    }
}

/// Parameters of the windowed activity classifier
#[derive(Debug, Clone)]
pub struct ActivityConfig {
    /// Length of the sliding window of remembered changes
    pub window_ms: u64,
    /// Changes needed inside the window before streaming starts
    pub start_min_events: usize,
    /// Minimum time between oldest and newest change in the window to start;
    /// keeps a single burst of redraws from counting as motion
    pub start_min_span_ms: u64,
    /// Minimum total changed area (pixels) inside the window to start
    pub start_min_area: u64,
    /// While streaming, fewer changes than this in the window stops the stream
    pub stop_below_events: usize,
    /// Streaming stops once no change arrived for this long
    pub idle_timeout_ms: u64,
}

impl Default for ActivityConfig {
    fn default() -> Self {
        Self {
            window_ms: 1000,
            start_min_events: 8,
            start_min_span_ms: 200,
            start_min_area: 64 * 64,
            stop_below_events: 3,
            idle_timeout_ms: 500,
        }
    }
}

impl ActivityConfig {
    /// Validate the configuration
    pub fn validate(&self) -> Result<(), String> {
        if self.window_ms == 0 {
            return Err("Activity window must be non-zero".to_string());
        }
        if self.start_min_events == 0 {
            return Err("start_min_events must be at least 1".to_string());
        }
        if self.stop_below_events > self.start_min_events {
            return Err(format!(
                "stop_below_events ({}) must not exceed start_min_events ({})",
                self.stop_below_events, self.start_min_events
            ));
        }
        if self.start_min_span_ms >= self.window_ms {
            return Err(format!(
                "start_min_span_ms ({}) must be shorter than the window ({})",
                self.start_min_span_ms, self.window_ms
            ));
        }
        Ok(())
    }
}

/// Bounded retry policy for encoder session creation
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Consecutive failures after which creation is suspended until the
    /// activity run ends (0 = never suspend)
    pub max_consecutive_failures: u32,
    /// Delay before the third attempt; doubles with each further failure
    pub backoff_base: Duration,
    /// Upper bound on the delay between attempts
    pub backoff_max: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_consecutive_failures: 8,
            backoff_base: Duration::from_millis(50),
            backoff_max: Duration::from_secs(2),
        }
    }
}

impl RetryPolicy {
    /// Retry on every streaming event, never suspend
    pub fn unbounded() -> Self {
        Self {
            max_consecutive_failures: 0,
            backoff_base: Duration::ZERO,
            backoff_max: Duration::ZERO,
        }
    }

    /// Delay to wait after `failures` consecutive failed attempts.
    ///
    /// The first retry is immediate (next streaming event).
    pub fn delay_after(&self, failures: u32) -> Duration {
        if failures <= 1 {
            return Duration::ZERO;
        }
        let exponent = (failures - 2).min(16);
        self.backoff_base
            .saturating_mul(1u32 << exponent)
            .min(self.backoff_max)
    }

    /// Whether creation should be suspended for the rest of the activity run
    pub fn is_exhausted(&self, failures: u32) -> bool {
        self.max_consecutive_failures != 0 && failures >= self.max_consecutive_failures
    }
}

/// Orchestrator configuration
#[derive(Debug, Clone)]
pub struct OrchestratorConfig {
    /// X display name; `None` uses `$DISPLAY`
    pub display: Option<String>,
    /// Period of the activity-expiry tick (and the event wait timeout)
    pub tick_interval: Duration,
    pub activity: ActivityConfig,
    pub encoder: HwEncoderConfig,
    pub retry: RetryPolicy,
    /// Grab a still frame on streaming events that have no encoder session
    pub still_fallback_on_encoder_failure: bool,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            display: None,
            tick_interval: Duration::from_millis(100),
            activity: ActivityConfig::default(),
            encoder: HwEncoderConfig::default(),
            retry: RetryPolicy::default(),
            still_fallback_on_encoder_failure: false,
        }
    }
}

impl OrchestratorConfig {
    /// Validate this configuration and every nested one
    pub fn validate(&self) -> CaptureResult<()> {
        if self.tick_interval.is_zero() {
            return Err(CaptureError::InvalidConfiguration(
                "tick interval must be non-zero".to_string(),
            ));
        }
        self.activity
            .validate()
            .map_err(CaptureError::InvalidConfiguration)?;
        self.encoder
            .validate()
            .map_err(CaptureError::InvalidConfiguration)?;
        Ok(())
    }
}

/// Counters kept by the orchestrator
#[derive(Debug, Clone, Default)]
pub struct OrchestratorStats {
    pub ticks: u64,
    pub damage_events: u64,
    pub cursor_changes: u64,
    pub reconfigures: u64,
    pub cursor_moves: u64,
    pub stills_captured: u64,
    pub still_failures: u64,
    pub frames_encoded: u64,
    pub encode_failures: u64,
    pub bytes_encoded: u64,
    pub sessions_created: u64,
    pub session_create_failures: u64,
    pub sessions_destroyed: u64,
    pub path_switches: u64,
}

impl OrchestratorStats {
    /// Share of damage events served by the encoder path, as a percentage
    pub fn streaming_share_percent(&self) -> f64 {
        let served = self.stills_captured + self.frames_encoded;
        if served == 0 {
            0.0
        } else {
            (self.frames_encoded as f64 / served as f64) * 100.0
        }
    }

    /// Sessions currently alive according to the counters
    pub fn live_sessions(&self) -> u64 {
        self.sessions_created - self.sessions_destroyed
    }
}
