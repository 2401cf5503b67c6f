//! Traits for change-event sources and still-frame grabbing

use crate::error::CaptureResult;
use crate::types::{ChangeRegion, CursorImage, CursorPosition, DrawableId, RawImage, SurfaceSize};
use std::time::Duration;

/// One change notification from the windowing system
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChangeEvent {
    /// A region of `drawable` was modified
    Damage {
        region: ChangeRegion,
        drawable: DrawableId,
    },
    /// The cursor image changed
    CursorChange,
    /// The captured surface was resized or reconfigured
    Reconfigure { width: u32, height: u32 },
}

impl ChangeEvent {
    /// Short name used in logs
    pub fn kind(&self) -> &'static str {
        match self {
            ChangeEvent::Damage { .. } => "damage",
            ChangeEvent::CursorChange => "cursor-change",
            ChangeEvent::Reconfigure { .. } => "reconfigure",
        }
    }
}

/// Source of change notifications, delivered one at a time in arrival order
pub trait ChangeEventSource {
    /// Block until the next event or until `timeout` elapses (`Ok(None)`).
    ///
    /// An `Err` means the connection is unusable.
    fn next_event(&mut self, timeout: Duration) -> CaptureResult<Option<ChangeEvent>>;

    /// Current pointer coordinates relative to the captured surface
    fn pointer_position(&mut self) -> CaptureResult<CursorPosition>;

    /// Fetch the current cursor image
    fn cursor_image(&mut self) -> CaptureResult<CursorImage>;

    /// Last known size of the captured surface
    fn surface_size(&self) -> SurfaceSize;

    /// Get the implementation name
    fn implementation_name(&self) -> String;
}

/// Synchronous grab of the current pixels of a region
pub trait StillFrameGrabber {
    fn grab(&mut self, drawable: DrawableId, region: &ChangeRegion) -> CaptureResult<RawImage>;

    /// Get the implementation name
    fn implementation_name(&self) -> String;
}

/// Helper trait for pixel layout conversion
pub trait PixelFormatConverter {
    /// Swap the red and blue channels of 4-byte pixels in place
    fn swap_red_blue(&self, data: &mut [u8]);

    /// Flip image vertically
    fn flip_vertical(&self, data: &mut [u8], width: u32, height: u32, bytes_per_pixel: u32);
}

/// Default implementation for pixel format conversion
pub struct DefaultPixelConverter;

impl PixelFormatConverter for DefaultPixelConverter {
    fn swap_red_blue(&self, data: &mut [u8]) {
        for chunk in data.chunks_exact_mut(4) {
            chunk.swap(0, 2);
        }
    }

    fn flip_vertical(&self, data: &mut [u8], width: u32, height: u32, bytes_per_pixel: u32) {
        let row_size = (width * bytes_per_pixel) as usize;
        let mut temp_row = vec![0u8; row_size];

        for y in 0..height / 2 {
            let top_offset = (y * width * bytes_per_pixel) as usize;
            let bottom_offset = ((height - 1 - y) * width * bytes_per_pixel) as usize;

            temp_row.copy_from_slice(&data[top_offset..top_offset + row_size]);
            data.copy_within(bottom_offset..bottom_offset + row_size, top_offset);
            data[bottom_offset..bottom_offset + row_size].copy_from_slice(&temp_row);
        }
    }
}
