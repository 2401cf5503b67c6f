//! On-disk dumps of capture output
//!
//! Stills are written as numbered 32-bit BMP files (`0.bmp`, `1.bmp`, ...),
//! encoded frames are appended to a raw elementary stream file.

use crate::{
    capture::{DefaultPixelConverter, PixelFormatConverter},
    encoder::EncodedFrame,
    error::{CaptureError, CaptureResult},
    pipeline::CaptureOutput,
    types::{Codec, PixelFormat, RawImage},
};

use std::{
    fs::{self, File},
    io::{BufWriter, Write},
    path::{Path, PathBuf},
};

const FILE_HEADER_LEN: u32 = 14;
const INFO_HEADER_LEN: u32 = 40;
const BMP_MAGIC: u16 = 0x4d42;

/// Writes still frames as sequentially numbered BMP files
pub struct BmpDumper {
    dir: PathBuf,
    next_index: u64,
    converter: DefaultPixelConverter,
}

impl BmpDumper {
    /// Dump into `dir`, creating it if needed
    pub fn new(dir: impl Into<PathBuf>) -> CaptureResult<Self> {
        let dir = dir.into();
        fs::create_dir_all(&dir)?;
        Ok(Self {
            dir,
            next_index: 0,
            converter: DefaultPixelConverter,
        })
    }

    /// Index the next file will get
    pub fn next_index(&self) -> u64 {
        self.next_index
    }

    /// Write `image` and return the path of the new file
    pub fn write(&mut self, image: &RawImage) -> CaptureResult<PathBuf> {
        let bytes = self.encode(image)?;
        let path = self.dir.join(format!("{}.bmp", self.next_index));
        fs::write(&path, bytes)?;
        self.next_index += 1;
        log::debug!("Still written to {}", path.display());
        Ok(path)
    }

    /// Serialize `image` as a bottom-up 32 bpp BMP
    pub fn encode(&self, image: &RawImage) -> CaptureResult<Vec<u8>> {
        let swap = match image.format {
            PixelFormat::BGRA8 => false,
            PixelFormat::RGBA8 => true,
            other => {
                return Err(CaptureError::InvalidConfiguration(format!(
                    "BMP dump needs 32-bit pixels, got {}",
                    other
                )))
            }
        };
        if !image.is_valid() {
            return Err(CaptureError::GrabFailed(format!(
                "Image data too short for {}x{}",
                image.width, image.height
            )));
        }

        // Rows packed without stride padding
        let row = image.width as usize * 4;
        let mut pixels = Vec::with_capacity(row * image.height as usize);
        for y in 0..image.height as usize {
            let start = y * image.stride;
            pixels.extend_from_slice(&image.data[start..start + row]);
        }
        if swap {
            self.converter.swap_red_blue(&mut pixels);
        }
        self.converter
            .flip_vertical(&mut pixels, image.width, image.height, 4);

        let image_size = pixels.len() as u32;
        let offset = FILE_HEADER_LEN + INFO_HEADER_LEN;

        let mut out = Vec::with_capacity((offset + image_size) as usize);
        out.extend_from_slice(&BMP_MAGIC.to_le_bytes());
        out.extend_from_slice(&(offset + image_size).to_le_bytes());
        out.extend_from_slice(&0u16.to_le_bytes());
        out.extend_from_slice(&0u16.to_le_bytes());
        out.extend_from_slice(&offset.to_le_bytes());

        out.extend_from_slice(&INFO_HEADER_LEN.to_le_bytes());
        out.extend_from_slice(&(image.width as i32).to_le_bytes());
        out.extend_from_slice(&(image.height as i32).to_le_bytes());
        out.extend_from_slice(&1u16.to_le_bytes()); // planes
        out.extend_from_slice(&32u16.to_le_bytes()); // bpp
        out.extend_from_slice(&0u32.to_le_bytes()); // BI_RGB
        out.extend_from_slice(&image_size.to_le_bytes());
        out.extend_from_slice(&0i32.to_le_bytes());
        out.extend_from_slice(&0i32.to_le_bytes());
        out.extend_from_slice(&0u32.to_le_bytes());
        out.extend_from_slice(&0u32.to_le_bytes());

        out.extend_from_slice(&pixels);
        Ok(out)
    }
}

/// Appends encoded frames to an elementary stream file
pub struct BitstreamDump {
    path: PathBuf,
    writer: BufWriter<File>,
    bytes_written: u64,
}

impl BitstreamDump {
    /// Create (truncate) `path`
    pub fn create(path: impl AsRef<Path>) -> CaptureResult<Self> {
        let path = path.as_ref().to_path_buf();
        let file = File::create(&path)?;
        log::info!("Dumping encoded stream to {}", path.display());
        Ok(Self {
            path,
            writer: BufWriter::new(file),
            bytes_written: 0,
        })
    }

    /// Default file name for a codec inside `dir`
    pub fn default_path(dir: impl AsRef<Path>, codec: Codec) -> PathBuf {
        dir.as_ref()
            .join(format!("capture.{}", codec.file_extension()))
    }

    pub fn write_frame(&mut self, frame: &EncodedFrame) -> CaptureResult<()> {
        self.writer.write_all(&frame.data)?;
        self.bytes_written += frame.size() as u64;
        Ok(())
    }

    pub fn bytes_written(&self) -> u64 {
        self.bytes_written
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn flush(&mut self) -> CaptureResult<()> {
        self.writer.flush()?;
        Ok(())
    }
}

/// Routes capture output to the configured dumps
#[derive(Default)]
pub struct CaptureDump {
    pub stills: Option<BmpDumper>,
    pub bitstream: Option<BitstreamDump>,
}

impl CaptureDump {
    /// Write one output; kinds without a configured dump are skipped
    pub fn write(&mut self, output: &CaptureOutput) -> CaptureResult<()> {
        match output {
            CaptureOutput::Still { image, .. } => {
                if let Some(stills) = self.stills.as_mut() {
                    stills.write(image)?;
                }
            }
            CaptureOutput::Encoded(frame) => {
                if let Some(bitstream) = self.bitstream.as_mut() {
                    bitstream.write_frame(frame)?;
                }
            }
            CaptureOutput::Cursor(_) => {}
        }
        Ok(())
    }

    pub fn flush(&mut self) -> CaptureResult<()> {
        if let Some(bitstream) = self.bitstream.as_mut() {
            bitstream.flush()?;
        }
        Ok(())
    }
}
