//! Output format strategies.

use std::path::Path;

use super::palette::reduce_palette;
use crate::codec::{
    AudioTrack, AudioWindow, Dimensions, GifJob, MediaCodec, MediaInfo, Mp4Job, ProgressCallback,
    TimedFrame,
};
use crate::error::ThumbnailError;
use crate::options::{OutputFormat, ThumbnailOptions};
use crate::planner::SectionPlan;
use crate::resize::even_dimensions;

/// Highest frame rate either format is written at.
pub const MAX_OUTPUT_FPS: f64 = 30.0;

/// Everything an encoder may look at.
pub struct EncodeInput<'a> {
    pub source: &'a Path,
    pub media: &'a MediaInfo,
    pub plan: &'a SectionPlan,
    pub frames: &'a [TimedFrame],
    pub options: &'a ThumbnailOptions,
    pub progress: Option<ProgressCallback>,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct EncodeOutcome {
    pub has_audio: bool,
}

pub trait Encoder: Send + Sync {
    fn format(&self) -> OutputFormat;

    /// Size frames must be decoded at for this format, given the resizer's target.
    fn frame_dimensions(&self, target: Dimensions) -> Dimensions {
        target
    }

    /// Nominal output frame rate reported in the result.
    fn output_fps(&self, plan: &SectionPlan, options: &ThumbnailOptions, original_fps: f64) -> f64;

    fn encode(
        &self,
        codec: &dyn MediaCodec,
        input: &EncodeInput<'_>,
        output: &Path,
    ) -> Result<EncodeOutcome, ThumbnailError>;
}

pub fn encoder_for(format: OutputFormat) -> Box<dyn Encoder> {
    match format {
        OutputFormat::Gif => Box::new(GifEncoder),
        OutputFormat::Mp4 => Box::new(Mp4Encoder),
    }
}

fn sampling_rate(plan: &SectionPlan, options: &ThumbnailOptions) -> f64 {
    plan.frames_per_section as f64 / options.section_duration()
}

/// Shared-palette looping GIF.
#[derive(Debug, Clone, Copy, Default)]
pub struct GifEncoder;

impl Encoder for GifEncoder {
    fn format(&self) -> OutputFormat {
        OutputFormat::Gif
    }

    fn output_fps(&self, plan: &SectionPlan, options: &ThumbnailOptions, _original_fps: f64) -> f64 {
        sampling_rate(plan, options).clamp(1.0, MAX_OUTPUT_FPS)
    }

    fn encode(
        &self,
        codec: &dyn MediaCodec,
        input: &EncodeInput<'_>,
        output: &Path,
    ) -> Result<EncodeOutcome, ThumbnailError> {
        let colors = input.options.gif_colors();
        let proposed = codec.generate_palette(input.frames, colors)?;
        let palette = reduce_palette(&proposed, colors, input.options.gif_fuzz());
        codec.encode_gif(GifJob {
            frames: input.frames,
            palette: &palette,
            output,
            progress: input.progress.clone(),
        })?;
        Ok(EncodeOutcome { has_audio: false })
    }
}

/// H.264 MP4 with optional spliced audio.
#[derive(Debug, Clone, Copy, Default)]
pub struct Mp4Encoder;

impl Mp4Encoder {
    /// CRF for a quality in [1, 100]: 100 → 1, 1 → 31.
    pub fn crf(quality: u32) -> u32 {
        (31.0 - 30.0 * quality as f64 / 100.0).round() as u32
    }

    pub fn max_bitrate_kbps(quality: u32) -> u32 {
        (500.0 + 4500.0 * quality as f64 / 100.0).round() as u32
    }

    fn audio_track(input: &EncodeInput<'_>) -> Option<AudioTrack> {
        if !input.options.include_audio() {
            return None;
        }
        if !input.media.has_audio {
            log::warn!(
                target: "vidthumb::render",
                "includeAudio requested but {} has no audio stream",
                input.source.display()
            );
            return None;
        }
        Some(AudioTrack {
            source: input.source.to_path_buf(),
            windows: input
                .plan
                .sections
                .iter()
                .map(|s| AudioWindow {
                    start: s.section.start_time,
                    duration: s.section.duration,
                })
                .collect(),
            bitrate_kbps: input.options.audio_quality(),
        })
    }
}

impl Encoder for Mp4Encoder {
    fn format(&self) -> OutputFormat {
        OutputFormat::Mp4
    }

    fn frame_dimensions(&self, target: Dimensions) -> Dimensions {
        even_dimensions(target)
    }

    fn output_fps(&self, plan: &SectionPlan, options: &ThumbnailOptions, original_fps: f64) -> f64 {
        let fps = sampling_rate(plan, options).min(MAX_OUTPUT_FPS);
        if original_fps > 0.0 {
            fps.min(original_fps)
        } else {
            fps
        }
    }

    fn encode(
        &self,
        codec: &dyn MediaCodec,
        input: &EncodeInput<'_>,
        output: &Path,
    ) -> Result<EncodeOutcome, ThumbnailError> {
        let audio = Self::audio_track(input);
        let has_audio = audio.is_some();
        let quality = input.options.quality();
        codec.encode_mp4(Mp4Job {
            frames: input.frames,
            fps: self.output_fps(input.plan, input.options, input.media.fps),
            crf: Self::crf(quality),
            max_bitrate_kbps: Self::max_bitrate_kbps(quality),
            audio,
            output,
            progress: input.progress.clone(),
        })?;
        Ok(EncodeOutcome { has_audio })
    }
}
