//! Damage-driven screen capture
//!
//! Watches the X server for damage, cursor and reconfigure notifications and
//! picks a capture path per damage event: a still-frame grab of the damaged
//! region while the screen is mostly static, or a hardware video encoder
//! session while it is actively changing. At most one encoder session exists
//! at a time, and it is torn down as soon as activity stops.
//!
//! # Example
//!
//! ```no_run
//! use damage_capture_rust::{CaptureOrchestratorBuilder, CaptureOutput};
//! use std::sync::atomic::AtomicBool;
//! use std::time::Duration;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let mut orchestrator = CaptureOrchestratorBuilder::new()
//!     .tick_interval(Duration::from_millis(50))
//!     .sink(|output| match output {
//!         CaptureOutput::Still { region, .. } => println!("still {}", region),
//!         CaptureOutput::Encoded(frame) => println!("frame {} bytes", frame.size()),
//!         CaptureOutput::Cursor(_) => {}
//!     })
//!     .connect()?;
//!
//! let stop = AtomicBool::new(false);
//! orchestrator.run(&stop)?;
//! # Ok(())
//! # }
//! ```

#![allow(missing_docs)]
#![cfg_attr(docsrs, feature(doc_cfg))]

pub mod activity;
pub mod capture;
pub mod clock;
pub mod dump;
pub mod encoder;
pub mod error;
pub mod pipeline;
pub mod types;

// Re-export main types
pub use activity::{ActivityTracker, WindowedActivityTracker};
pub use capture::{ChangeEvent, ChangeEventSource, Capturer, StillFrameGrabber};
pub use clock::{Clock, MonotonicClock};
pub use dump::{BitstreamDump, BmpDumper, CaptureDump};
pub use encoder::{EncodedFrame, EncoderSession, StreamEncoder, UnavailableEncoder};
pub use error::{CaptureError, CaptureResult, EncoderError, EncoderResult};
pub use pipeline::{
    CaptureOrchestrator, CaptureOrchestratorBuilder, CaptureOutput, ChannelSink,
    OrchestratorState,
};
pub use types::{
    ActivityConfig, ActivityVerdict, ChangeRegion, Codec, CursorImage, CursorPosition,
    HwEncoderConfig, OrchestratorConfig, OrchestratorStats, PixelFormat, RawImage, RetryPolicy,
    SurfaceSize, TimestampedChange,
};

/// Library version information
pub fn version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}

/// Get library capabilities
pub fn capabilities() -> String {
    let mut caps = Vec::new();

    #[cfg(target_os = "linux")]
    caps.push("X11 DAMAGE/XFIXES");

    if cfg!(feature = "gst-encoder") {
        caps.push("GStreamer encoder");
    } else {
        caps.push("Stills only");
    }

    caps.join(", ")
}
