//! GStreamer-backed hardware encode sessions
//!
//! # Pipeline
//!
//! ```text
//! ximagesrc (root window)
//!   → videoconvert
//!   → video/x-raw,format=NV12
//!   → <best-encoder>            nvh26xenc | vaapih26xenc | x26xenc
//!   → <parser>                  byte-stream, one access unit per buffer
//!   → appsink (pulled by encode_next_frame)
//! ```

use super::{EncodedFrame, EncoderSession, StreamEncoder};
use crate::{
    error::{EncoderError, EncoderResult},
    types::{Codec, HwEncoderConfig, SurfaceSize},
};

use bytes::Bytes;
use gstreamer::prelude::*;
use gstreamer_app::AppSink;
use once_cell::sync::OnceCell;
use std::time::{Duration, Instant};

static GST_INIT: OnceCell<Result<(), String>> = OnceCell::new();

/// Initialise GStreamer once per process
fn ensure_initialized() -> EncoderResult<()> {
    GST_INIT
        .get_or_init(|| gstreamer::init().map_err(|e| e.to_string()))
        .clone()
        .map_err(EncoderError::Unavailable)
}

/// Encoder element candidates, hardware first
fn candidates(codec: Codec) -> &'static [&'static str] {
    match codec {
        Codec::H264 => &["nvh264enc", "vaapih264enc", "x264enc"],
        Codec::Hevc => &["nvh265enc", "vaapih265enc", "x265enc"],
    }
}

/// First candidate element installed on this system
fn select_encoder(codec: Codec) -> Option<&'static str> {
    let found = candidates(codec)
        .iter()
        .copied()
        .find(|name| gstreamer::ElementFactory::find(name).is_some());
    match found {
        Some(name) => log::info!("{} encoder selected: {}", codec, name),
        None => log::warn!("No {} encoder element installed", codec),
    }
    found
}

/// Element properties derived from the fixed encoder configuration
fn encoder_properties(element: &str, config: &HwEncoderConfig) -> String {
    let kbps = config.avg_bitrate / 1000;
    let peak_kbps = config.peak_bitrate / 1000;
    let gop = config.gop_length;
    let qp = config.qp;
    if element.starts_with("nvh") {
        let preset = if config.low_latency { "low-latency-hp" } else { "hq" };
        format!(
            "bitrate={kbps} max-bitrate={peak_kbps} gop-size={gop} rc-mode=vbr preset={preset} qp-const={qp}"
        )
    } else if element.starts_with("vaapi") {
        format!("bitrate={kbps} keyframe-period={gop} rate-control=vbr init-qp={qp}")
    } else {
        let tune = if config.low_latency { "tune=zerolatency " } else { "" };
        // x265enc's qp property forces CQP, so only x264enc takes the quantizer
        let quantizer = if element == "x264enc" {
            format!(" quantizer={qp}")
        } else {
            String::new()
        };
        format!("{tune}bitrate={kbps} key-int-max={gop} speed-preset=veryfast{quantizer}")
    }
}

fn output_caps(codec: Codec) -> (&'static str, &'static str) {
    match codec {
        Codec::H264 => (
            "video/x-h264,stream-format=byte-stream,alignment=au",
            "h264parse",
        ),
        Codec::Hevc => (
            "video/x-h265,stream-format=byte-stream,alignment=au",
            "h265parse",
        ),
    }
}

/// Session factory building one GStreamer pipeline per session
pub struct GstStreamEncoder {
    config: HwEncoderConfig,
    display: Option<String>,
}

impl GstStreamEncoder {
    pub fn new(config: HwEncoderConfig, display: Option<String>) -> Self {
        Self { config, display }
    }

    fn pipeline_description(&self, element: &str, surface: SurfaceSize) -> String {
        let display = self
            .display
            .as_deref()
            .map(|d| format!("display-name={d} "))
            .unwrap_or_default();
        let (caps, parser) = output_caps(self.config.codec);
        format!(
            "ximagesrc {display}use-damage=false show-pointer={cursor} \
               endx={endx} endy={endy} \
             ! video/x-raw,framerate={fps}/1 \
             ! videoconvert \
             ! video/x-raw,format=NV12 \
             ! {element} {props} \
             ! {caps} \
             ! {parser} \
             ! appsink name=sink max-buffers=4 drop=true sync=false emit-signals=false",
            cursor = self.config.with_cursor,
            endx = surface.width.saturating_sub(1),
            endy = surface.height.saturating_sub(1),
            fps = self.config.fps,
            props = encoder_properties(element, &self.config),
        )
    }
}

impl StreamEncoder for GstStreamEncoder {
    fn create_session(&mut self, surface: SurfaceSize) -> EncoderResult<Box<dyn EncoderSession>> {
        ensure_initialized()?;

        let element = select_encoder(self.config.codec).ok_or_else(|| {
            EncoderError::Unavailable(format!("no {} encoder element", self.config.codec))
        })?;

        let desc = self.pipeline_description(element, surface);
        log::debug!("Encoder pipeline: {}", desc);

        let pipeline = gstreamer::parse::launch(&desc)
            .map_err(|e| EncoderError::SessionCreateFailed(format!("parse pipeline: {}", e)))?
            .downcast::<gstreamer::Pipeline>()
            .map_err(|_| EncoderError::SessionCreateFailed("expected a pipeline".to_string()))?;

        let appsink = match pipeline
            .by_name("sink")
            .and_then(|element| element.downcast::<AppSink>().ok())
        {
            Some(appsink) => appsink,
            None => {
                let _ = pipeline.set_state(gstreamer::State::Null);
                return Err(EncoderError::SessionCreateFailed(
                    "appsink 'sink' missing".to_string(),
                ));
            }
        };

        // Device and session-limit errors surface while going to PLAYING
        let started = pipeline
            .set_state(gstreamer::State::Playing)
            .map_err(|e| e.to_string())
            .and_then(|_| {
                let (result, _, _) = pipeline.state(gstreamer::ClockTime::from_seconds(2));
                result.map(|_| ()).map_err(|e| e.to_string())
            });
        if let Err(e) = started {
            let _ = pipeline.set_state(gstreamer::State::Null);
            return Err(EncoderError::SessionCreateFailed(format!(
                "{} refused to start: {}",
                element, e
            )));
        }

        log::info!("Encoder session started ({}, {})", element, surface);
        Ok(Box::new(GstEncoderSession {
            pipeline,
            appsink,
            codec: self.config.codec,
            frame_timeout: self.config.frame_timeout,
            frames: 0,
        }))
    }

    fn name(&self) -> String {
        format!("GStreamer {}", self.config.codec)
    }
}

struct GstEncoderSession {
    pipeline: gstreamer::Pipeline,
    appsink: AppSink,
    codec: Codec,
    frame_timeout: Duration,
    frames: u64,
}

impl EncoderSession for GstEncoderSession {
    fn encode_next_frame(&mut self) -> EncoderResult<EncodedFrame> {
        let started = Instant::now();
        let timeout_ms = self.frame_timeout.as_millis() as u64;

        let sample = match self
            .appsink
            .try_pull_sample(gstreamer::ClockTime::from_mseconds(timeout_ms))
        {
            Some(sample) => sample,
            None if self.appsink.is_eos() => {
                return Err(EncoderError::EncodeFailed("pipeline reached EOS".to_string()))
            }
            None => return Err(EncoderError::FrameTimeout { timeout_ms }),
        };

        let buffer = sample
            .buffer()
            .ok_or_else(|| EncoderError::EncodeFailed("sample without buffer".to_string()))?;
        let keyframe = !buffer.flags().contains(gstreamer::BufferFlags::DELTA_UNIT);
        let map = buffer
            .map_readable()
            .map_err(|_| EncoderError::EncodeFailed("buffer not readable".to_string()))?;

        self.frames += 1;
        Ok(EncodedFrame {
            frame_id: self.frames,
            codec: self.codec,
            data: Bytes::copy_from_slice(map.as_slice()),
            keyframe,
            elapsed: started.elapsed(),
        })
    }

    fn frames_encoded(&self) -> u64 {
        self.frames
    }
}

impl Drop for GstEncoderSession {
    fn drop(&mut self) {
        if let Err(e) = self.pipeline.set_state(gstreamer::State::Null) {
            log::warn!("Encoder session teardown failed: {}", e);
        }
        log::info!("Encoder session destroyed after {} frames", self.frames);
    }
}
