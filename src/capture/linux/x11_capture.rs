//! X11 still-frame grabs of damaged regions

use crate::{
    capture::traits::StillFrameGrabber,
    error::{CaptureError, CaptureResult},
    types::{ChangeRegion, DrawableId, PixelFormat, RawImage},
};

use std::sync::Arc;
use x11rb::{
    connection::Connection,
    protocol::xproto::{self, ImageFormat},
    rust_connection::RustConnection,
};

/// X11 GetImage grabber
pub struct X11FrameGrabber {
    connection: Arc<RustConnection>,
    screen_num: usize,
}

impl X11FrameGrabber {
    pub(super) fn new(connection: Arc<RustConnection>, screen_num: usize) -> Self {
        Self {
            connection,
            screen_num,
        }
    }

    /// Pixel layout of the root visual
    fn root_pixel_format(&self) -> CaptureResult<PixelFormat> {
        let setup = self.connection.setup();
        let screen = &setup.roots[self.screen_num];
        let visual = setup
            .roots
            .iter()
            .flat_map(|screen| &screen.allowed_depths)
            .flat_map(|depth| &depth.visuals)
            .find(|v| v.visual_id == screen.root_visual)
            .ok_or_else(|| CaptureError::GrabFailed("Visual not found".to_string()))?;

        // BGR visuals keep blue in the lower bits
        if visual.blue_mask < visual.red_mask {
            Ok(PixelFormat::BGRA8)
        } else {
            Ok(PixelFormat::RGBA8)
        }
    }
}

impl StillFrameGrabber for X11FrameGrabber {
    fn grab(&mut self, drawable: DrawableId, region: &ChangeRegion) -> CaptureResult<RawImage> {
        if region.is_empty() {
            return Err(CaptureError::InvalidRegion {
                left: region.left,
                top: region.top,
                width: region.width(),
                height: region.height(),
            });
        }

        let image_reply = xproto::get_image(
            &*self.connection,
            ImageFormat::Z_PIXMAP,
            drawable,
            region.left as i16,
            region.top as i16,
            region.width() as u16,
            region.height() as u16,
            !0, // All planes
        )
        .map_err(|e| CaptureError::GrabFailed(format!("X11 GetImage error: {}", e)))?
        .reply()
        .map_err(|e| CaptureError::GrabFailed(format!("X11 GetImage reply error: {}", e)))?;

        // Depth 24 and 32 ZPixmaps both arrive as 32 bits per pixel
        let pixel_format = match image_reply.depth {
            24 | 32 => self.root_pixel_format()?,
            depth => {
                return Err(CaptureError::GrabFailed(format!(
                    "Unsupported bit depth: {}",
                    depth
                )))
            }
        };

        let expected = region.area() as usize * pixel_format.bytes_per_pixel();
        if image_reply.data.len() < expected {
            return Err(CaptureError::GrabFailed(format!(
                "Short image: got {} bytes, expected {}",
                image_reply.data.len(),
                expected
            )));
        }

        let mut data = image_reply.data;
        data.truncate(expected);
        Ok(RawImage::new(data, region.width(), region.height(), pixel_format))
    }

    fn implementation_name(&self) -> String {
        "X11 GetImage".to_string()
    }
}
