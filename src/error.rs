//! Error types for thumbnail generation. `ThumbnailError` implements Display and
//! Serialize so JSON callers (CLI, sidecar) get a readable message.

use std::path::PathBuf;

use crate::ffmpeg::parse_ffmpeg_error;

/// Problems with the source video or the requested sections.
#[derive(Debug, thiserror::Error)]
pub enum InputError {
    #[error("Input video file not found: {}", .0.display())]
    SourceNotFound(PathBuf),

    #[error("Failed to read input video {}: {source}", path.display())]
    SourceUnreadable {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Could not probe input video: {0}")]
    Unprobeable(String),

    #[error("Source duration must be positive (got {0})")]
    NonPositiveSourceDuration(f64),

    #[error(
        "Section {index} ({start}s + {duration}s) exceeds source duration {source_duration}s"
    )]
    SectionOutOfBounds {
        index: usize,
        start: f64,
        duration: f64,
        source_duration: f64,
    },

    #[error("Section {index} is invalid: {reason}")]
    InvalidSection { index: usize, reason: String },

    #[error("Section {index} has no decodable frames")]
    NoFramesDecoded { index: usize },
}

/// Out-of-range or conflicting configuration. Raised before any I/O.
#[derive(Debug, thiserror::Error)]
pub enum OptionsError {
    #[error("{field} must be between {min} and {max} (got {value})")]
    OutOfRange {
        field: &'static str,
        value: f64,
        min: f64,
        max: f64,
    },

    #[error("{field} must be positive (got {value})")]
    NotPositive { field: &'static str, value: f64 },

    #[error("sections and autoSections are mutually exclusive")]
    ConflictingSections,

    #[error("Invalid options payload: {0}")]
    Malformed(String),
}

/// Cache subsystem failures. Callers degrade to an uncached render on these.
#[derive(Debug, thiserror::Error)]
pub enum CacheError {
    #[error("Cache directory {} is not writable: {source}", path.display())]
    Unwritable {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Corrupt cache metadata {}: {reason}", path.display())]
    CorruptMetadata { path: PathBuf, reason: String },
}

#[derive(Debug, thiserror::Error)]
pub enum ThumbnailError {
    #[error(transparent)]
    Input(#[from] InputError),

    #[error(transparent)]
    Options(#[from] OptionsError),

    #[error(transparent)]
    Cache(#[from] CacheError),

    #[error("{0}")]
    Io(#[from] std::io::Error),

    #[error("Image I/O failed: {0}")]
    Image(#[from] image::ImageError),

    #[error("{0}")]
    FfmpegNotFound(String),

    #[error("FFmpeg failed (code {code}): {stderr}")]
    ExternalTool { code: i32, stderr: String },

    #[error("Codec invocation timed out after {0}s")]
    TimedOut(u64),

    #[error("Aborted")]
    Aborted,
}

impl ThumbnailError {
    pub fn aborted() -> Self {
        Self::Aborted
    }

    pub fn external_tool(code: i32, stderr: impl Into<String>) -> Self {
        Self::ExternalTool {
            code,
            stderr: stderr.into(),
        }
    }

    /// Short machine-readable category for JSON callers.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Input(_) => "input",
            Self::Options(_) => "options",
            Self::Cache(_) => "cache",
            Self::Io(_) | Self::Image(_) => "io",
            Self::FfmpegNotFound(_)
            | Self::ExternalTool { .. }
            | Self::TimedOut(_)
            | Self::Aborted => "external_tool",
        }
    }
}

impl serde::Serialize for ThumbnailError {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        match self {
            ThumbnailError::ExternalTool { code, stderr } => {
                let payload = parse_ffmpeg_error(stderr, Some(*code));
                let json =
                    serde_json::json!({ "summary": payload.summary, "detail": payload.detail });
                serializer.serialize_str(&json.to_string())
            }
            _ => serializer.serialize_str(&self.to_string()),
        }
    }
}

impl From<String> for ThumbnailError {
    fn from(s: String) -> Self {
        if s == "Aborted" {
            ThumbnailError::Aborted
        } else {
            ThumbnailError::ExternalTool {
                code: -1,
                stderr: s,
            }
        }
    }
}

impl From<&str> for ThumbnailError {
    fn from(s: &str) -> Self {
        s.to_string().into()
    }
}
