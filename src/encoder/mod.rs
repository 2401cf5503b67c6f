//! Hardware stream encoder sessions
//!
//! A [`StreamEncoder`] allocates [`EncoderSession`]s. A session is the scarce
//! hardware resource: it exists from a successful `create_session` until it
//! is dropped, and dropping it releases the device session.

#[cfg(feature = "gst-encoder")]
pub mod gst;

#[cfg(feature = "gst-encoder")]
pub use gst::GstStreamEncoder;

use crate::{
    error::{EncoderError, EncoderResult},
    types::{Codec, HwEncoderConfig, SurfaceSize},
};

use bytes::Bytes;
use std::time::Duration;

/// One compressed access unit produced by a session
#[derive(Debug, Clone)]
pub struct EncodedFrame {
    /// 1-based index within the session
    pub frame_id: u64,
    pub codec: Codec,
    pub data: Bytes,
    pub keyframe: bool,
    /// Time spent in the grab-and-encode call
    pub elapsed: Duration,
}

impl EncodedFrame {
    pub fn size(&self) -> usize {
        self.data.len()
    }
}

/// Factory for encoder sessions
pub trait StreamEncoder {
    /// Allocate a session for a surface of the given size.
    ///
    /// May fail when no compatible device exists or the session limit is
    /// reached. Anything partially allocated is released before returning.
    fn create_session(&mut self, surface: SurfaceSize) -> EncoderResult<Box<dyn EncoderSession>>;

    /// Backend name for logs
    fn name(&self) -> String;
}

/// A live encode session; drop it to destroy the session
pub trait EncoderSession {
    /// Grab the next frame and encode it (blocking)
    fn encode_next_frame(&mut self) -> EncoderResult<EncodedFrame>;

    /// Frames produced so far
    fn frames_encoded(&self) -> u64;
}

/// Encoder used when no hardware backend is compiled in; creation always fails
pub struct UnavailableEncoder {
    reason: String,
}

impl UnavailableEncoder {
    pub fn new(reason: impl Into<String>) -> Self {
        Self {
            reason: reason.into(),
        }
    }
}

impl StreamEncoder for UnavailableEncoder {
    fn create_session(&mut self, _surface: SurfaceSize) -> EncoderResult<Box<dyn EncoderSession>> {
        Err(EncoderError::Unavailable(self.reason.clone()))
    }

    fn name(&self) -> String {
        "unavailable".to_string()
    }
}

/// Best encoder backend compiled into this build
pub fn default_encoder(
    config: &HwEncoderConfig,
    display: Option<&str>,
) -> EncoderResult<Box<dyn StreamEncoder>> {
    config
        .validate()
        .map_err(EncoderError::InvalidConfiguration)?;

    #[cfg(feature = "gst-encoder")]
    {
        Ok(Box::new(GstStreamEncoder::new(
            config.clone(),
            display.map(str::to_string),
        )))
    }

    #[cfg(not(feature = "gst-encoder"))]
    {
        let _ = display;
        Ok(Box::new(UnavailableEncoder::new(
            "built without the gst-encoder feature",
        )))
    }
}
