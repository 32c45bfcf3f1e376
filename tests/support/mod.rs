#![allow(dead_code)]

use std::fs;
use std::path::{Path, PathBuf};
use std::process::{Command, ExitStatus, Stdio};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use vidthumb_core::ThumbnailError;
use vidthumb_core::codec::{Dimensions, Frame, GifJob, MediaCodec, MediaInfo, Mp4Job, TimedFrame};

/// Deterministic in-memory codec that counts every call.
pub struct FakeCodec {
    pub media: MediaInfo,
    pub encode_delay: Duration,
    pub probes: AtomicUsize,
    pub decodes: AtomicUsize,
    pub palettes: AtomicUsize,
    pub encodes: AtomicUsize,
}

impl FakeCodec {
    pub fn new(media: MediaInfo) -> Self {
        Self {
            media,
            encode_delay: Duration::ZERO,
            probes: AtomicUsize::new(0),
            decodes: AtomicUsize::new(0),
            palettes: AtomicUsize::new(0),
            encodes: AtomicUsize::new(0),
        }
    }

    /// 90 s 1920x1080 @ 30 fps with audio.
    pub fn hd() -> Self {
        Self::new(MediaInfo {
            duration: 90.0,
            width: 1920,
            height: 1080,
            fps: 30.0,
            has_audio: true,
        })
    }

    pub fn with_encode_delay(mut self, delay: Duration) -> Self {
        self.encode_delay = delay;
        self
    }

    pub fn codec_calls(&self) -> usize {
        self.probes.load(Ordering::SeqCst)
            + self.decodes.load(Ordering::SeqCst)
            + self.palettes.load(Ordering::SeqCst)
            + self.encodes.load(Ordering::SeqCst)
    }

    pub fn renders(&self) -> usize {
        self.encodes.load(Ordering::SeqCst)
    }

    fn write_artifact(&self, output: &Path, magic: &[u8], frames: usize) -> Result<(), ThumbnailError> {
        self.encodes.fetch_add(1, Ordering::SeqCst);
        if !self.encode_delay.is_zero() {
            std::thread::sleep(self.encode_delay);
        }
        let mut bytes = magic.to_vec();
        bytes.extend_from_slice(&(frames as u32).to_le_bytes());
        fs::write(output, bytes)?;
        Ok(())
    }
}

impl MediaCodec for FakeCodec {
    fn probe(&self, _source: &Path) -> Result<MediaInfo, ThumbnailError> {
        self.probes.fetch_add(1, Ordering::SeqCst);
        Ok(self.media.clone())
    }

    fn decode_frame(
        &self,
        _source: &Path,
        timestamp: f64,
        size: Dimensions,
    ) -> Result<Option<Frame>, ThumbnailError> {
        self.decodes.fetch_add(1, Ordering::SeqCst);
        if timestamp >= self.media.duration {
            return Ok(None);
        }
        let shade = ((timestamp / self.media.duration) * 255.0) as u8;
        Ok(Frame::from_raw(
            size,
            [shade, 128, 255 - shade].repeat(Frame::expected_len(size) / 3),
        ))
    }

    fn generate_palette(
        &self,
        frames: &[TimedFrame],
        max_colors: u32,
    ) -> Result<Vec<[u8; 3]>, ThumbnailError> {
        self.palettes.fetch_add(1, Ordering::SeqCst);
        let steps = (frames.len() as u32).clamp(1, max_colors.max(4));
        Ok((0..steps)
            .map(|i| {
                let shade = (i * 255 / steps) as u8;
                [shade, 128, 255 - shade]
            })
            .collect())
    }

    fn encode_gif(&self, job: GifJob<'_>) -> Result<(), ThumbnailError> {
        self.write_artifact(job.output, b"GIF89a", job.frames.len())
    }

    fn encode_mp4(&self, job: Mp4Job<'_>) -> Result<(), ThumbnailError> {
        self.write_artifact(job.output, b"\0\0\0\x18ftypisom", job.frames.len())
    }
}

/// A source file whose first bytes are unique to `tag`.
pub fn fake_source(dir: &Path, name: &str, tag: &str) -> PathBuf {
    let path = dir.join(name);
    let mut content = format!("fake video {}\n", tag).into_bytes();
    content.resize(16 * 1024, 0xAB);
    fs::write(&path, content).expect("write fake source");
    path
}

pub fn options_json(cache_dir: &Path, extra: serde_json::Value) -> serde_json::Value {
    let mut value = serde_json::json!({ "cacheDir": cache_dir });
    if let (Some(base), Some(extra)) = (value.as_object_mut(), extra.as_object()) {
        for (k, v) in extra {
            base.insert(k.clone(), v.clone());
        }
    }
    value
}

pub fn options(cache_dir: &Path, extra: serde_json::Value) -> vidthumb_core::ThumbnailOptions {
    vidthumb_core::sidecar_api::options_from_value(options_json(cache_dir, extra))
        .expect("valid options")
}

pub struct IntegrationEnv {
    pub ffmpeg: PathBuf,
    dir: tempfile::TempDir,
}

impl IntegrationEnv {
    pub fn new() -> Self {
        let ffmpeg = vidthumb_core::ffmpeg::discovery::get_ffmpeg_path()
            .expect("FFmpeg not found")
            .to_path_buf();
        let dir = tempfile::tempdir().expect("tempdir");
        Self { ffmpeg, dir }
    }

    pub fn path(&self, name: &str) -> PathBuf {
        self.dir.path().join(name)
    }

    pub fn with_test_video(&self, name: &str, duration_secs: f32, with_audio: bool) -> PathBuf {
        let output_path = self.path(name);
        let status = create_test_video(&self.ffmpeg, &output_path, duration_secs, with_audio)
            .expect("failed to create test video");
        assert!(status.success(), "ffmpeg failed to create test video");
        output_path
    }
}

/// testsrc at 320x240 / 30 fps, optionally with a sine tone.
pub fn create_test_video(
    ffmpeg: &Path,
    output_path: &Path,
    duration_secs: f32,
    with_audio: bool,
) -> std::io::Result<ExitStatus> {
    let mut cmd = Command::new(ffmpeg);
    cmd.args(["-loglevel", "error", "-y", "-f", "lavfi", "-i"])
        .arg(format!("testsrc=duration={}:size=320x240:rate=30", duration_secs));
    if with_audio {
        cmd.args(["-f", "lavfi", "-i"])
            .arg(format!("sine=frequency=440:duration={}", duration_secs))
            .args(["-c:a", "aac", "-shortest"]);
    }
    cmd.args(["-c:v", "mpeg4", "-q:v", "5", "-pix_fmt", "yuv420p"])
        .arg(output_path)
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .status()
}
