//! FFmpeg-backed [`MediaCodec`]. Stream inspection goes through ffprobe; it and
//! every decode, palette and encode run as child processes managed by the runner.

mod builder;
pub mod discovery;
mod error;
pub mod ffprobe;
mod frames;
mod progress;
mod runner;
pub mod temp;
#[cfg(any(test, feature = "integration-test-api"))]
mod verify;

pub use builder::{format_args_for_display_multiline, h264_encoder};
pub use error::{FfmpegErrorPayload, parse_ffmpeg_error};
pub use runner::{active_ffmpeg_count, terminate_all_ffmpeg};
pub use temp::{TempCleanup, cleanup_old_temp_files};
#[cfg(any(test, feature = "integration-test-api"))]
pub use verify::verify_media;

use std::path::Path;

use crate::codec::{Dimensions, Frame, GifJob, MediaCodec, MediaInfo, Mp4Job, TimedFrame};
use crate::error::ThumbnailError;
use builder::{
    Mp4Args, build_decode_frame_args, build_gif_args, build_mp4_args, build_palettegen_args,
};
use frames::{read_palette, write_concat_list, write_palette};
use runner::{run_ffmpeg_blocking, run_ffmpeg_capture};
use temp::WorkDir;

/// Path to string for FFmpeg args or logging.
pub fn path_to_string(path: &(impl AsRef<Path> + ?Sized)) -> String {
    path.as_ref().to_string_lossy().to_string()
}

#[derive(Debug, Clone, Copy, Default)]
pub struct FfmpegCodec;

impl FfmpegCodec {
    pub fn new() -> Self {
        Self
    }
}

fn sequence_seconds(frames: &[TimedFrame]) -> f64 {
    frames.iter().map(|f| f.display_seconds).sum()
}

impl MediaCodec for FfmpegCodec {
    fn probe(&self, source: &Path) -> Result<MediaInfo, ThumbnailError> {
        ffprobe::probe(source)
    }

    fn decode_frame(
        &self,
        source: &Path,
        timestamp: f64,
        size: Dimensions,
    ) -> Result<Option<Frame>, ThumbnailError> {
        let args = build_decode_frame_args(source, timestamp, size);
        let data = run_ffmpeg_capture(&args)?;
        if data.is_empty() {
            return Ok(None);
        }
        let received = data.len();
        Frame::from_raw(size, data).map(Some).ok_or_else(|| {
            ThumbnailError::external_tool(
                0,
                format!(
                    "decoded frame at {}s has {} bytes, expected {} for {}",
                    timestamp,
                    received,
                    Frame::expected_len(size),
                    size
                ),
            )
        })
    }

    fn generate_palette(
        &self,
        frames: &[TimedFrame],
        max_colors: u32,
    ) -> Result<Vec<[u8; 3]>, ThumbnailError> {
        let work = WorkDir::new()?;
        let list = write_concat_list(&work, frames)?;
        let output = work.file("palette.png");
        run_ffmpeg_blocking(&build_palettegen_args(&list, max_colors, &output), None, None)?;
        let palette = read_palette(&output)?;
        log::debug!(
            target: "vidthumb::ffmpeg",
            "palettegen: {} colors from {} frames",
            palette.len(),
            frames.len()
        );
        Ok(palette)
    }

    fn encode_gif(&self, job: GifJob<'_>) -> Result<(), ThumbnailError> {
        let work = WorkDir::new()?;
        let list = write_concat_list(&work, job.frames)?;
        let palette = write_palette(&work, job.palette)?;
        let args = build_gif_args(&list, &palette, job.output);
        log::debug!(
            target: "vidthumb::ffmpeg",
            "gif encode: {} frames, {} colors -> {}",
            job.frames.len(),
            job.palette.len(),
            job.output.display()
        );
        run_ffmpeg_blocking(&args, Some(sequence_seconds(job.frames)), job.progress)
    }

    fn encode_mp4(&self, job: Mp4Job<'_>) -> Result<(), ThumbnailError> {
        let work = WorkDir::new()?;
        let list = write_concat_list(&work, job.frames)?;
        let audio = job
            .audio
            .as_ref()
            .map(|a| (a.source.as_path(), a.windows.as_slice(), a.bitrate_kbps));
        let args = build_mp4_args(&Mp4Args {
            concat_list: &list,
            fps: job.fps,
            crf: job.crf,
            max_bitrate_kbps: job.max_bitrate_kbps,
            audio,
            output: job.output,
        });
        log::debug!(
            target: "vidthumb::ffmpeg",
            "mp4 encode: {} frames at {} fps -> {}",
            job.frames.len(),
            job.fps,
            job.output.display()
        );
        run_ffmpeg_blocking(&args, Some(sequence_seconds(job.frames)), job.progress)
    }
}
