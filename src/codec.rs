//! Codec adapter contract. The pipeline only talks to media through
//! [`MediaCodec`]; `crate::ffmpeg::FfmpegCodec` is the production implementation.

use std::fs::File;
use std::io::BufWriter;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use image::codecs::pnm::{PnmEncoder, PnmSubtype, SampleEncoding};
use image::{ExtendedColorType, ImageEncoder, RgbImage};

use crate::error::ThumbnailError;

/// Receives normalized progress in [0,1] for a single codec invocation.
pub type ProgressCallback = Arc<dyn Fn(f64) + Send + Sync>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
pub struct Dimensions {
    pub width: u32,
    pub height: u32,
}

impl Dimensions {
    pub fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }
}

impl std::fmt::Display for Dimensions {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}x{}", self.width, self.height)
    }
}

/// What the pipeline needs to know about a source before planning.
#[derive(Debug, Clone, PartialEq)]
pub struct MediaInfo {
    pub duration: f64,
    pub width: u32,
    pub height: u32,
    /// Source frame rate, 0.0 when unknown.
    pub fps: f64,
    pub has_audio: bool,
}

impl MediaInfo {
    pub fn dimensions(&self) -> Dimensions {
        Dimensions::new(self.width, self.height)
    }
}

/// A decoded frame, RGB with 8 bits per channel.
#[derive(Clone, PartialEq, Eq)]
pub struct Frame(RgbImage);

impl Frame {
    pub fn new(image: RgbImage) -> Self {
        Self(image)
    }

    /// Wrap packed RGB24 bytes. `None` when `data` does not hold exactly `dims` pixels.
    pub fn from_raw(dims: Dimensions, data: Vec<u8>) -> Option<Self> {
        RgbImage::from_raw(dims.width, dims.height, data).map(Self)
    }

    pub fn expected_len(dims: Dimensions) -> usize {
        dims.width as usize * dims.height as usize * 3
    }

    pub fn dimensions(&self) -> Dimensions {
        let (width, height) = self.0.dimensions();
        Dimensions::new(width, height)
    }

    pub fn image(&self) -> &RgbImage {
        &self.0
    }

    /// Write the frame as a binary PPM, the format the encoders read back.
    pub fn write_ppm(&self, path: &Path) -> Result<(), ThumbnailError> {
        let file = BufWriter::new(File::create(path)?);
        PnmEncoder::new(file)
            .with_subtype(PnmSubtype::Pixmap(SampleEncoding::Binary))
            .write_image(
                self.0.as_raw(),
                self.0.width(),
                self.0.height(),
                ExtendedColorType::Rgb8,
            )?;
        Ok(())
    }
}

impl std::fmt::Debug for Frame {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Frame")
            .field("width", &self.0.width())
            .field("height", &self.0.height())
            .finish()
    }
}

/// A frame already written to disk plus how long it is displayed in the output.
#[derive(Debug, Clone, PartialEq)]
pub struct TimedFrame {
    pub path: PathBuf,
    pub display_seconds: f64,
}

/// Shared-palette GIF encode request. `palette` holds at most 256 RGB entries.
pub struct GifJob<'a> {
    pub frames: &'a [TimedFrame],
    pub palette: &'a [[u8; 3]],
    pub output: &'a Path,
    pub progress: Option<ProgressCallback>,
}

/// A window of source audio to splice into the output, in seconds.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AudioWindow {
    pub start: f64,
    pub duration: f64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct AudioTrack {
    pub source: PathBuf,
    pub windows: Vec<AudioWindow>,
    pub bitrate_kbps: u32,
}

/// H.264 encode request.
pub struct Mp4Job<'a> {
    pub frames: &'a [TimedFrame],
    pub fps: f64,
    pub crf: u32,
    pub max_bitrate_kbps: u32,
    pub audio: Option<AudioTrack>,
    pub output: &'a Path,
    pub progress: Option<ProgressCallback>,
}

/// Black-box media capability: probe, decode-and-scale one frame, derive a
/// palette, encode a frame sequence. Implementations must be deterministic
/// for identical inputs.
pub trait MediaCodec: Send + Sync {
    fn probe(&self, source: &Path) -> Result<MediaInfo, ThumbnailError>;

    /// Decode the frame shown at `timestamp` seconds, scaled to `size`.
    /// Returns `Ok(None)` when the source has no frame at that position.
    fn decode_frame(
        &self,
        source: &Path,
        timestamp: f64,
        size: Dimensions,
    ) -> Result<Option<Frame>, ThumbnailError>;

    /// Representative colours across every frame, at most `max_colors` of them
    /// for `max_colors` >= 4.
    fn generate_palette(
        &self,
        frames: &[TimedFrame],
        max_colors: u32,
    ) -> Result<Vec<[u8; 3]>, ThumbnailError>;

    fn encode_gif(&self, job: GifJob<'_>) -> Result<(), ThumbnailError>;

    fn encode_mp4(&self, job: Mp4Job<'_>) -> Result<(), ThumbnailError>;
}

impl<C: MediaCodec + ?Sized> MediaCodec for Arc<C> {
    fn probe(&self, source: &Path) -> Result<MediaInfo, ThumbnailError> {
        (**self).probe(source)
    }

    fn decode_frame(
        &self,
        source: &Path,
        timestamp: f64,
        size: Dimensions,
    ) -> Result<Option<Frame>, ThumbnailError> {
        (**self).decode_frame(source, timestamp, size)
    }

    fn generate_palette(
        &self,
        frames: &[TimedFrame],
        max_colors: u32,
    ) -> Result<Vec<[u8; 3]>, ThumbnailError> {
        (**self).generate_palette(frames, max_colors)
    }

    fn encode_gif(&self, job: GifJob<'_>) -> Result<(), ThumbnailError> {
        (**self).encode_gif(job)
    }

    fn encode_mp4(&self, job: Mp4Job<'_>) -> Result<(), ThumbnailError> {
        (**self).encode_mp4(job)
    }
}
