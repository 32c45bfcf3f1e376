//! Request configuration. `ThumbnailRequest` is the loose JSON shape callers send;
//! `ThumbnailOptions` is the validated, immutable form the pipeline consumes.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{InputError, OptionsError, ThumbnailError};

/// Version token for cache key invalidation. Bump when rendering output changes.
pub const CACHE_KEY_VERSION: &str = "vidthumb-v1";

pub const DEFAULT_QUALITY: u32 = 75;
pub const DEFAULT_FRAMES_PER_SECTION: u32 = 10;
pub const DEFAULT_SECTION_DURATION: f64 = 3.0;
/// Upper bound on sections per request, explicit or automatic.
pub const MAX_SECTIONS: u32 = 1000;
/// Upper bound on framesPerSection.
pub const MAX_FRAMES_PER_SECTION: u32 = 1000;
/// Upper bound on a requested output side, in pixels.
pub const MAX_SIDE: u32 = 8192;
pub const DEFAULT_AUDIO_QUALITY: u32 = 128;
pub const DEFAULT_GIF_COLORS: u32 = 256;
pub const DEFAULT_GIF_FUZZ: u32 = 30;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutputFormat {
    #[default]
    Gif,
    Mp4,
}

impl OutputFormat {
    pub fn as_str(self) -> &'static str {
        match self {
            OutputFormat::Gif => "gif",
            OutputFormat::Mp4 => "mp4",
        }
    }

    pub fn extension(self) -> &'static str {
        self.as_str()
    }
}

impl std::fmt::Display for OutputFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One sampling window, in seconds.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VideoSection {
    pub start_time: f64,
    pub duration: f64,
}

impl VideoSection {
    pub fn new(start_time: f64, duration: f64) -> Self {
        Self {
            start_time,
            duration,
        }
    }

    pub fn end_time(&self) -> f64 {
        self.start_time + self.duration
    }
}

/// Options as received from JSON. Every field is optional; missing fields take
/// the documented defaults.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct ThumbnailRequest {
    pub quality: Option<u32>,
    /// Derive framesPerSection from the source frame rate. Default false.
    pub auto_frames: Option<bool>,
    pub frames_per_section: Option<u32>,
    pub sections: Option<Vec<VideoSection>>,
    pub auto_sections: Option<u32>,
    pub section_duration: Option<f64>,
    pub width: Option<u32>,
    pub height: Option<u32>,
    pub maintain_aspect_ratio: Option<bool>,
    pub output_path: Option<PathBuf>,
    pub cache_dir: Option<PathBuf>,
    pub format: Option<OutputFormat>,
    pub include_audio: Option<bool>,
    /// Audio bitrate in kbps. Only used for mp4.
    pub audio_quality: Option<u32>,
    pub gif_colors: Option<u32>,
    pub gif_fuzz: Option<u32>,
}

impl ThumbnailRequest {
    pub fn from_json(json: &str) -> Result<Self, OptionsError> {
        if json.trim().is_empty() {
            return Ok(Self::default());
        }
        serde_json::from_str(json).map_err(|e| OptionsError::Malformed(e.to_string()))
    }

    /// Check every field and produce immutable options. Performs no I/O.
    pub fn validate(self) -> Result<ThumbnailOptions, ThumbnailError> {
        let sections = self.sections.unwrap_or_default();
        if !sections.is_empty() && self.auto_sections.is_some() {
            return Err(OptionsError::ConflictingSections.into());
        }

        let quality = self.quality.unwrap_or(DEFAULT_QUALITY);
        check_range("quality", quality, 1, 100)?;
        let frames_per_section = self
            .frames_per_section
            .unwrap_or(DEFAULT_FRAMES_PER_SECTION);
        check_positive("framesPerSection", frames_per_section as f64)?;
        check_range("framesPerSection", frames_per_section, 1, MAX_FRAMES_PER_SECTION)?;
        if let Some(n) = self.auto_sections {
            check_positive("autoSections", n as f64)?;
            check_range("autoSections", n, 1, MAX_SECTIONS)?;
        }
        let section_count = u32::try_from(sections.len()).unwrap_or(u32::MAX);
        check_range("sections", section_count, 0, MAX_SECTIONS)?;
        let section_duration = self.section_duration.unwrap_or(DEFAULT_SECTION_DURATION);
        check_positive("sectionDuration", section_duration)?;
        if let Some(w) = self.width {
            check_positive("width", w as f64)?;
            check_range("width", w, 1, MAX_SIDE)?;
        }
        if let Some(h) = self.height {
            check_positive("height", h as f64)?;
            check_range("height", h, 1, MAX_SIDE)?;
        }
        let audio_quality = self.audio_quality.unwrap_or(DEFAULT_AUDIO_QUALITY);
        check_range("audioQuality", audio_quality, 32, 256)?;
        let gif_colors = self.gif_colors.unwrap_or(DEFAULT_GIF_COLORS);
        check_range("gifColors", gif_colors, 2, 256)?;
        let gif_fuzz = self.gif_fuzz.unwrap_or(DEFAULT_GIF_FUZZ);
        check_range("gifFuzz", gif_fuzz, 1, 100)?;

        for (index, section) in sections.iter().enumerate() {
            if !section.start_time.is_finite() || section.start_time < 0.0 {
                return Err(InputError::InvalidSection {
                    index,
                    reason: format!("startTime must be >= 0 (got {})", section.start_time),
                }
                .into());
            }
            if !section.duration.is_finite() || section.duration <= 0.0 {
                return Err(InputError::InvalidSection {
                    index,
                    reason: format!("duration must be > 0 (got {})", section.duration),
                }
                .into());
            }
        }

        Ok(ThumbnailOptions {
            quality,
            auto_frames: self.auto_frames.unwrap_or(false),
            frames_per_section,
            sections,
            auto_sections: self.auto_sections,
            section_duration,
            width: self.width,
            height: self.height,
            maintain_aspect_ratio: self.maintain_aspect_ratio.unwrap_or(true),
            output_path: self.output_path,
            cache_dir: self.cache_dir,
            format: self.format.unwrap_or_default(),
            include_audio: self.include_audio.unwrap_or(false),
            audio_quality,
            gif_colors,
            gif_fuzz,
        })
    }
}

fn check_range(field: &'static str, value: u32, min: u32, max: u32) -> Result<(), OptionsError> {
    if value < min || value > max {
        return Err(OptionsError::OutOfRange {
            field,
            value: value as f64,
            min: min as f64,
            max: max as f64,
        });
    }
    Ok(())
}

fn check_positive(field: &'static str, value: f64) -> Result<(), OptionsError> {
    if !value.is_finite() || value <= 0.0 {
        return Err(OptionsError::NotPositive { field, value });
    }
    Ok(())
}

/// Validated request configuration. Read-only to the pipeline.
#[derive(Debug, Clone, PartialEq)]
pub struct ThumbnailOptions {
    quality: u32,
    auto_frames: bool,
    frames_per_section: u32,
    sections: Vec<VideoSection>,
    auto_sections: Option<u32>,
    section_duration: f64,
    width: Option<u32>,
    height: Option<u32>,
    maintain_aspect_ratio: bool,
    output_path: Option<PathBuf>,
    cache_dir: Option<PathBuf>,
    format: OutputFormat,
    include_audio: bool,
    audio_quality: u32,
    gif_colors: u32,
    gif_fuzz: u32,
}

impl Default for ThumbnailOptions {
    fn default() -> Self {
        Self {
            quality: DEFAULT_QUALITY,
            auto_frames: false,
            frames_per_section: DEFAULT_FRAMES_PER_SECTION,
            sections: Vec::new(),
            auto_sections: None,
            section_duration: DEFAULT_SECTION_DURATION,
            width: None,
            height: None,
            maintain_aspect_ratio: true,
            output_path: None,
            cache_dir: None,
            format: OutputFormat::Gif,
            include_audio: false,
            audio_quality: DEFAULT_AUDIO_QUALITY,
            gif_colors: DEFAULT_GIF_COLORS,
            gif_fuzz: DEFAULT_GIF_FUZZ,
        }
    }
}

impl ThumbnailOptions {
    /// Parse and validate a JSON options blob in one step.
    pub fn from_json(json: &str) -> Result<Self, ThumbnailError> {
        ThumbnailRequest::from_json(json)?.validate()
    }

    pub fn quality(&self) -> u32 {
        self.quality
    }

    pub fn auto_frames(&self) -> bool {
        self.auto_frames
    }

    pub fn frames_per_section(&self) -> u32 {
        self.frames_per_section
    }

    pub fn sections(&self) -> &[VideoSection] {
        &self.sections
    }

    pub fn auto_sections(&self) -> Option<u32> {
        self.auto_sections
    }

    pub fn section_duration(&self) -> f64 {
        self.section_duration
    }

    pub fn width(&self) -> Option<u32> {
        self.width
    }

    pub fn height(&self) -> Option<u32> {
        self.height
    }

    pub fn maintain_aspect_ratio(&self) -> bool {
        self.maintain_aspect_ratio
    }

    pub fn output_path(&self) -> Option<&Path> {
        self.output_path.as_deref()
    }

    pub fn cache_dir(&self) -> Option<&Path> {
        self.cache_dir.as_deref()
    }

    pub fn format(&self) -> OutputFormat {
        self.format
    }

    /// Audio only applies to mp4; always false for gif.
    pub fn include_audio(&self) -> bool {
        self.format == OutputFormat::Mp4 && self.include_audio
    }

    pub fn audio_quality(&self) -> u32 {
        self.audio_quality
    }

    pub fn gif_colors(&self) -> u32 {
        self.gif_colors
    }

    pub fn gif_fuzz(&self) -> u32 {
        self.gif_fuzz
    }

    /// Frames per section after applying `autoFrames` against the source frame rate.
    pub fn effective_frames_per_section(&self, source_fps: f64) -> u32 {
        if !self.auto_frames || !source_fps.is_finite() || source_fps <= 0.0 {
            return self.frames_per_section;
        }
        let frames_in_section = (source_fps * self.section_duration).floor() as u32;
        if self.section_duration <= 3.0 {
            frames_in_section.clamp(5, 30)
        } else {
            frames_in_section.clamp(10, 45)
        }
    }

    /// Canonical, location-free serialization of everything that affects the
    /// artifact bytes. `outputPath` and `cacheDir` are excluded.
    pub fn options_cache_key(&self) -> String {
        let sections = self
            .sections
            .iter()
            .map(|s| format!("{}+{}", s.start_time, s.duration))
            .collect::<Vec<_>>()
            .join(",");
        let common = format!(
            "{}|q={}|af={}|fps={}|sections={}|auto={}|sd={}|w={}|h={}|ar={}|fmt={}",
            CACHE_KEY_VERSION,
            self.quality,
            self.auto_frames,
            self.frames_per_section,
            sections,
            self.auto_sections
                .map(|n| n.to_string())
                .as_deref()
                .unwrap_or(""),
            self.section_duration,
            self.width.map(|w| w.to_string()).as_deref().unwrap_or(""),
            self.height.map(|h| h.to_string()).as_deref().unwrap_or(""),
            self.maintain_aspect_ratio,
            self.format,
        );
        match self.format {
            OutputFormat::Gif => format!(
                "{}|colors={}|fuzz={}",
                common, self.gif_colors, self.gif_fuzz
            ),
            OutputFormat::Mp4 if self.include_audio => {
                format!("{}|audio=true|aq={}", common, self.audio_quality)
            }
            OutputFormat::Mp4 => format!("{}|audio=false", common),
        }
    }
}
