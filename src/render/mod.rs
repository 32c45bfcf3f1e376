//! Render pipeline: decode every planned sample into a private work directory,
//! then hand the frame sequence to the format's [`Encoder`]. Sections and
//! frames are processed strictly in planned order, and only one decoded frame
//! is held in memory at a time.

mod encoder;
pub mod palette;

pub use encoder::{
    EncodeInput, EncodeOutcome, Encoder, GifEncoder, MAX_OUTPUT_FPS, Mp4Encoder, encoder_for,
};

use std::fs;
use std::path::Path;
use std::sync::Arc;

use crate::codec::{MediaCodec, MediaInfo, ProgressCallback, TimedFrame};
use crate::error::{InputError, ThumbnailError};
use crate::ffmpeg::temp::WorkDir;
use crate::options::ThumbnailOptions;
use crate::planner::SectionPlan;
use crate::resize::target_dimensions;
use crate::result::{RenderFacts, SectionInfo};

/// Share of overall progress spent decoding; the rest is encoding.
const DECODE_PROGRESS_SHARE: f64 = 0.5;

#[derive(Debug, Clone)]
pub struct RenderOutput {
    pub artifact: Vec<u8>,
    pub sections: Vec<SectionInfo>,
    pub facts: RenderFacts,
}

/// Decode, resize and encode `plan` from `source`.
pub fn render<C: MediaCodec>(
    codec: &C,
    source: &Path,
    media: &MediaInfo,
    plan: &SectionPlan,
    options: &ThumbnailOptions,
    progress: Option<ProgressCallback>,
) -> Result<RenderOutput, ThumbnailError> {
    let encoder = encoder_for(options.format());
    let target = target_dimensions(
        media.dimensions(),
        options.width(),
        options.height(),
        options.maintain_aspect_ratio(),
    );
    let size = encoder.frame_dimensions(target);
    log::info!(
        target: "vidthumb::render",
        "rendering {} from {} ({} sections, {} samples) at {}",
        options.format(),
        source.display(),
        plan.sections.len(),
        plan.total_samples(),
        size
    );

    let work = WorkDir::new()?;
    let total_samples = plan.total_samples().max(1) as f64;
    let mut attempted = 0usize;
    let mut frames: Vec<TimedFrame> = Vec::with_capacity(plan.total_samples());
    let mut sections = Vec::with_capacity(plan.sections.len());

    for (index, planned) in plan.sections.iter().enumerate() {
        let section_start = frames.len();
        for &timestamp in &planned.timestamps {
            attempted += 1;
            match codec.decode_frame(source, timestamp, size)? {
                Some(frame) if frame.dimensions() == size => {
                    let path = work.file(&format!("frame-{:05}.ppm", frames.len()));
                    frame.write_ppm(&path)?;
                    frames.push(TimedFrame {
                        path,
                        display_seconds: 0.0,
                    });
                }
                Some(frame) => {
                    return Err(ThumbnailError::external_tool(
                        0,
                        format!(
                            "decoder returned {} frame at {}s, expected {}",
                            frame.dimensions(),
                            timestamp,
                            size
                        ),
                    ));
                }
                None => log::warn!(
                    target: "vidthumb::render",
                    "no frame at {:.3}s in section {}, skipping",
                    timestamp,
                    index
                ),
            }
            if let Some(cb) = progress.as_ref() {
                cb(attempted as f64 / total_samples * DECODE_PROGRESS_SHARE);
            }
        }

        let decoded = frames.len() - section_start;
        if decoded == 0 {
            return Err(InputError::NoFramesDecoded { index }.into());
        }
        let display_seconds = planned.section.duration / decoded as f64;
        for timed in &mut frames[section_start..] {
            timed.display_seconds = display_seconds;
        }
        sections.push(SectionInfo {
            start_time: planned.section.start_time,
            duration: planned.section.duration,
            frames: decoded as u32,
        });
    }

    let output = work.file(&format!("output.{}", options.format().extension()));
    let encode_progress = progress.map(|cb| -> ProgressCallback {
        Arc::new(move |p: f64| cb(DECODE_PROGRESS_SHARE + p * (1.0 - DECODE_PROGRESS_SHARE)))
    });
    let input = EncodeInput {
        source,
        media,
        plan,
        frames: &frames,
        options,
        progress: encode_progress,
    };
    let outcome = encoder.encode(codec, &input, &output)?;
    let artifact = fs::read(&output)?;
    log::info!(
        target: "vidthumb::render",
        "encoded {} frames into {} bytes",
        frames.len(),
        artifact.len()
    );

    Ok(RenderOutput {
        artifact,
        sections,
        facts: RenderFacts {
            dimensions: size,
            original_fps: media.fps,
            output_fps: encoder.output_fps(plan, options, media.fps),
            has_audio: outcome.has_audio,
        },
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::{AudioWindow, Dimensions, Frame, GifJob, Mp4Job};
    use crate::options::{OutputFormat, ThumbnailRequest, VideoSection};
    use crate::planner::plan;
    use parking_lot::Mutex;

    /// Decodes solid frames, refuses timestamps at or past `last_frame`.
    struct ScriptedCodec {
        last_frame: f64,
        decoded: Mutex<Vec<f64>>,
        gif_palette_len: Mutex<Option<usize>>,
        display_seconds: Mutex<Vec<f64>>,
        mp4_audio: Mutex<Option<Option<Vec<AudioWindow>>>>,
    }

    impl ScriptedCodec {
        fn new(last_frame: f64) -> Self {
            Self {
                last_frame,
                decoded: Mutex::new(Vec::new()),
                gif_palette_len: Mutex::new(None),
                display_seconds: Mutex::new(Vec::new()),
                mp4_audio: Mutex::new(None),
            }
        }

        fn record_frames(&self, frames: &[TimedFrame]) {
            for f in frames {
                assert!(f.path.is_file(), "{} not spooled", f.path.display());
            }
            *self.display_seconds.lock() = frames.iter().map(|f| f.display_seconds).collect();
        }
    }

    impl MediaCodec for ScriptedCodec {
        fn probe(&self, _source: &Path) -> Result<MediaInfo, ThumbnailError> {
            unreachable!("render never inspects the source")
        }

        fn decode_frame(
            &self,
            _source: &Path,
            timestamp: f64,
            size: Dimensions,
        ) -> Result<Option<Frame>, ThumbnailError> {
            self.decoded.lock().push(timestamp);
            if timestamp >= self.last_frame {
                return Ok(None);
            }
            let shade = (timestamp * 10.0) as u8;
            Ok(Frame::from_raw(
                size,
                [shade, 0, 255 - shade].repeat(Frame::expected_len(size) / 3),
            ))
        }

        fn generate_palette(
            &self,
            frames: &[TimedFrame],
            _max_colors: u32,
        ) -> Result<Vec<[u8; 3]>, ThumbnailError> {
            self.record_frames(frames);
            Ok((0..16u8).map(|i| [i * 16, 0, 255 - i * 16]).collect())
        }

        fn encode_gif(&self, job: GifJob<'_>) -> Result<(), ThumbnailError> {
            self.record_frames(job.frames);
            *self.gif_palette_len.lock() = Some(job.palette.len());
            std::fs::write(job.output, b"GIF89a")?;
            Ok(())
        }

        fn encode_mp4(&self, job: Mp4Job<'_>) -> Result<(), ThumbnailError> {
            self.record_frames(job.frames);
            *self.mp4_audio.lock() = Some(job.audio.map(|a| a.windows));
            std::fs::write(job.output, b"ftypisom")?;
            Ok(())
        }
    }

    fn media(has_audio: bool) -> MediaInfo {
        MediaInfo {
            duration: 90.0,
            width: 1920,
            height: 1080,
            fps: 30.0,
            has_audio,
        }
    }

    #[test]
    fn gif_render_decodes_in_order_and_reports_sections() {
        let codec = ScriptedCodec::new(f64::MAX);
        let opts = ThumbnailRequest {
            auto_sections: Some(3),
            width: Some(32),
            gif_colors: Some(4),
            ..Default::default()
        }
        .validate()
        .unwrap();
        let p = plan(90.0, 30.0, &opts).unwrap();
        let out = render(&codec, Path::new("in.mp4"), &media(false), &p, &opts, None).unwrap();

        assert_eq!(out.artifact, b"GIF89a");
        assert_eq!(out.facts.dimensions, Dimensions::new(32, 18));
        assert_eq!(out.sections.iter().map(|s| s.frames).sum::<u32>(), 30);
        let decoded = codec.decoded.lock().clone();
        let mut sorted_within_sections = decoded.clone();
        sorted_within_sections[..10].sort_by(f64::total_cmp);
        assert_eq!(decoded, sorted_within_sections);
        assert_eq!(decoded[10], 43.5);
        assert!(codec.gif_palette_len.lock().unwrap() <= 4);
    }

    #[test]
    fn every_frame_lasts_its_share_of_the_section() {
        let codec = ScriptedCodec::new(f64::MAX);
        let opts = ThumbnailOptions::default();
        let p = plan(90.0, 30.0, &opts).unwrap();
        render(&codec, Path::new("in.mp4"), &media(false), &p, &opts, None).unwrap();

        let shown = codec.display_seconds.lock().clone();
        assert_eq!(shown.len(), 10);
        assert!(shown.iter().all(|s| (s - 0.3).abs() < 1e-9), "{:?}", shown);
    }

    #[test]
    fn frames_past_the_end_are_skipped() {
        let codec = ScriptedCodec::new(11.0);
        let opts = ThumbnailRequest {
            sections: Some(vec![VideoSection::new(10.0, 2.0)]),
            frames_per_section: Some(4),
            ..Default::default()
        }
        .validate()
        .unwrap();
        let p = plan(12.0, 30.0, &opts).unwrap();
        let out = render(&codec, Path::new("in.mp4"), &media(false), &p, &opts, None).unwrap();
        assert_eq!(out.sections[0].frames, 2);
        assert_eq!(out.sections[0].duration, 2.0);
        assert_eq!(*codec.display_seconds.lock(), vec![1.0, 1.0]);
    }

    #[test]
    fn section_without_frames_is_an_input_error() {
        let codec = ScriptedCodec::new(0.0);
        let opts = ThumbnailOptions::default();
        let p = plan(90.0, 30.0, &opts).unwrap();
        let err = render(&codec, Path::new("in.mp4"), &media(false), &p, &opts, None).unwrap_err();
        assert!(matches!(
            err,
            ThumbnailError::Input(InputError::NoFramesDecoded { index: 0 })
        ));
    }

    #[test]
    fn mp4_audio_only_when_source_has_it() {
        let opts = ThumbnailRequest {
            format: Some(OutputFormat::Mp4),
            include_audio: Some(true),
            width: Some(33),
            ..Default::default()
        }
        .validate()
        .unwrap();
        let p = plan(90.0, 30.0, &opts).unwrap();

        let codec = ScriptedCodec::new(f64::MAX);
        let out = render(&codec, Path::new("in.mp4"), &media(true), &p, &opts, None).unwrap();
        assert!(out.facts.has_audio);
        assert!(matches!(*codec.mp4_audio.lock(), Some(Some(_))));
        assert_eq!(out.facts.dimensions, Dimensions::new(32, 18));

        let codec = ScriptedCodec::new(f64::MAX);
        let out = render(&codec, Path::new("in.mp4"), &media(false), &p, &opts, None).unwrap();
        assert!(!out.facts.has_audio);
        assert_eq!(*codec.mp4_audio.lock(), Some(None));
    }

    #[test]
    fn mp4_audio_windows_follow_the_planned_sections() {
        let opts = ThumbnailRequest {
            format: Some(OutputFormat::Mp4),
            include_audio: Some(true),
            auto_sections: Some(3),
            section_duration: Some(2.0),
            ..Default::default()
        }
        .validate()
        .unwrap();
        let p = plan(90.0, 30.0, &opts).unwrap();
        let codec = ScriptedCodec::new(f64::MAX);
        render(&codec, Path::new("in.mp4"), &media(true), &p, &opts, None).unwrap();

        let expected: Vec<AudioWindow> = p
            .sections
            .iter()
            .map(|s| AudioWindow {
                start: s.section.start_time,
                duration: s.section.duration,
            })
            .collect();
        assert_eq!(expected.len(), 3);
        assert_eq!(expected[0].start, 0.0);
        assert_eq!(codec.mp4_audio.lock().clone(), Some(Some(expected)));
    }

    #[test]
    fn frames_are_spooled_to_disk_and_removed_afterwards() {
        let codec = ScriptedCodec::new(f64::MAX);
        let opts = ThumbnailOptions::default();
        let p = plan(90.0, 30.0, &opts).unwrap();
        let spooled = Arc::new(Mutex::new(Vec::new()));

        struct Spy<'a>(&'a ScriptedCodec, Arc<Mutex<Vec<std::path::PathBuf>>>);
        impl MediaCodec for Spy<'_> {
            fn probe(&self, source: &Path) -> Result<MediaInfo, ThumbnailError> {
                self.0.probe(source)
            }
            fn decode_frame(
                &self,
                source: &Path,
                timestamp: f64,
                size: Dimensions,
            ) -> Result<Option<Frame>, ThumbnailError> {
                self.0.decode_frame(source, timestamp, size)
            }
            fn generate_palette(
                &self,
                frames: &[TimedFrame],
                max_colors: u32,
            ) -> Result<Vec<[u8; 3]>, ThumbnailError> {
                self.1.lock().extend(frames.iter().map(|f| f.path.clone()));
                self.0.generate_palette(frames, max_colors)
            }
            fn encode_gif(&self, job: GifJob<'_>) -> Result<(), ThumbnailError> {
                self.0.encode_gif(job)
            }
            fn encode_mp4(&self, job: Mp4Job<'_>) -> Result<(), ThumbnailError> {
                self.0.encode_mp4(job)
            }
        }

        let spy = Spy(&codec, Arc::clone(&spooled));
        render(&spy, Path::new("in.mp4"), &media(false), &p, &opts, None).unwrap();
        let spooled = spooled.lock();
        assert_eq!(spooled.len(), 10);
        assert!(spooled[0].ends_with("frame-00000.ppm"));
        assert!(spooled.iter().all(|p| !p.exists()));
    }

    #[test]
    fn progress_is_monotonic_and_reaches_half_after_decoding() {
        let codec = ScriptedCodec::new(f64::MAX);
        let opts = ThumbnailOptions::default();
        let p = plan(90.0, 30.0, &opts).unwrap();
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        let cb: ProgressCallback = Arc::new(move |v| sink.lock().push(v));
        render(&codec, Path::new("in.mp4"), &media(false), &p, &opts, Some(cb)).unwrap();
        let seen = seen.lock().clone();
        assert_eq!(seen.len(), 10);
        assert!(seen.windows(2).all(|w| w[0] <= w[1]));
        assert!((seen[9] - DECODE_PROGRESS_SHARE).abs() < 1e-9);
    }
}
