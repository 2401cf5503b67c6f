//! Linux X11 capture: DAMAGE/XFIXES change events and GetImage stills

mod x11_capture;
mod x11_events;

pub use x11_capture::X11FrameGrabber;
pub use x11_events::X11EventSource;

use crate::error::{CaptureError, CaptureResult};

use std::sync::Arc;
use x11rb::rust_connection::RustConnection;

/// Event source and grabber sharing one X11 connection
pub struct LinuxCapture {
    pub source: X11EventSource,
    pub grabber: X11FrameGrabber,
}

impl LinuxCapture {
    /// Connect to `display` (or `$DISPLAY`) and subscribe to change events
    pub fn connect(display: Option<&str>) -> CaptureResult<Self> {
        if display.is_none() && std::env::var("DISPLAY").is_err() {
            return Err(CaptureError::DisplayConnectionFailed(
                "No X11 display found ($DISPLAY is unset)".to_string(),
            ));
        }

        let (connection, screen_num) = RustConnection::connect(display).map_err(|e| {
            CaptureError::DisplayConnectionFailed(format!(
                "{}: {}",
                display.unwrap_or("$DISPLAY"),
                e
            ))
        })?;
        let connection = Arc::new(connection);

        let source = X11EventSource::subscribe(Arc::clone(&connection), screen_num)?;
        let grabber = X11FrameGrabber::new(connection, screen_num);

        log::info!(
            "Connected to X11 display {} (screen {}, {})",
            display.unwrap_or("$DISPLAY"),
            screen_num,
            source.surface()
        );

        Ok(Self { source, grabber })
    }
}
