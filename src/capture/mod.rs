//! Windowing-system collaborators: change events and still-frame grabs

pub mod traits;

#[cfg(target_os = "linux")]
pub mod linux;

pub use traits::{
    ChangeEvent, ChangeEventSource, DefaultPixelConverter, PixelFormatConverter,
    StillFrameGrabber,
};

use crate::error::CaptureResult;

/// Platform-specific capture backend factory
pub struct Capturer;

impl Capturer {
    /// Open the display and subscribe to change notifications.
    ///
    /// Failure here is fatal for a capture session: the display is
    /// unreachable or lacks a required extension.
    pub fn connect(
        display: Option<&str>,
    ) -> CaptureResult<(Box<dyn ChangeEventSource>, Box<dyn StillFrameGrabber>)> {
        #[cfg(target_os = "linux")]
        {
            let capture = linux::LinuxCapture::connect(display)?;
            Ok((Box::new(capture.source), Box::new(capture.grabber)))
        }

        #[cfg(not(target_os = "linux"))]
        {
            let _ = display;
            Err(crate::error::CaptureError::PlatformError(
                "Damage-driven capture is only available on Linux/X11".to_string(),
            ))
        }
    }
}
