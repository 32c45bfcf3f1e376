//! JSON facade shared by the `vidthumb` and `vidthumb-sidecar` binaries: path +
//! JSON options in, serializable results and error payloads out.

use std::path::{Path, PathBuf};

use serde_json::Value;

use crate::cache::{CacheStore, default_cache_dir, sweep_stale_temp_files};
use crate::codec::ProgressCallback;
use crate::error::{OptionsError, ThumbnailError};
use crate::ffmpeg::discovery::{get_available_encoders, get_ffmpeg_path};
use crate::ffmpeg::temp::STALE_AFTER;
use crate::ffmpeg::{
    cleanup_old_temp_files, h264_encoder, parse_ffmpeg_error, terminate_all_ffmpeg,
};
use crate::generator::ThumbnailGenerator;
use crate::options::{OutputFormat, ThumbnailOptions, ThumbnailRequest};
use crate::result::ThumbnailResult;

pub type SidecarProgressEmitter = ProgressCallback;

const PROTOCOL_VERSION: u8 = 1;

#[derive(Debug, serde::Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AppCapabilitiesResult {
    pub protocol_version: u8,
    pub formats: Vec<OutputFormat>,
    pub h264_encoder: &'static str,
    pub ffmpeg_path: Option<String>,
    /// Whether the FFmpeg build offers the H.264 encoder mp4 output needs.
    pub mp4_available: bool,
}

#[derive(Debug, serde::Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FingerprintResult {
    pub fingerprint: String,
    pub cache_dir: PathBuf,
    pub cached: bool,
}

/// Error shape written to JSON callers.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrorPayload {
    pub kind: &'static str,
    pub summary: String,
    pub detail: String,
}

pub fn error_payload(err: &ThumbnailError) -> ErrorPayload {
    let (summary, detail) = match err {
        ThumbnailError::Aborted => ("Aborted".to_string(), "Aborted".to_string()),
        ThumbnailError::ExternalTool { code, stderr } if *code == -1 => {
            (stderr.clone(), stderr.clone())
        }
        ThumbnailError::ExternalTool { code, stderr } => {
            let parsed = parse_ffmpeg_error(stderr, Some(*code));
            (parsed.summary, parsed.detail)
        }
        _ => {
            let text = err.to_string();
            (text.clone(), text)
        }
    };
    ErrorPayload {
        kind: err.kind(),
        summary,
        detail,
    }
}

/// Options from a JSON value. `null` means all defaults.
pub fn options_from_value(value: Value) -> Result<ThumbnailOptions, ThumbnailError> {
    if value.is_null() {
        return Ok(ThumbnailOptions::default());
    }
    let request: ThumbnailRequest =
        serde_json::from_value(value).map_err(|e| OptionsError::Malformed(e.to_string()))?;
    request.validate()
}

pub fn app_capabilities() -> Result<AppCapabilitiesResult, ThumbnailError> {
    let ffmpeg_path = get_ffmpeg_path().ok().map(|p| p.display().to_string());
    let mp4_available = match ffmpeg_path {
        Some(_) => get_available_encoders()
            .map(|encoders| encoders.iter().any(|e| e == h264_encoder()))
            .unwrap_or_else(|e| {
                log::warn!(target: "vidthumb::sidecar", "encoder detection failed: {}", e);
                false
            }),
        None => false,
    };
    Ok(AppCapabilitiesResult {
        protocol_version: PROTOCOL_VERSION,
        formats: vec![OutputFormat::Gif, OutputFormat::Mp4],
        h264_encoder: h264_encoder(),
        ffmpeg_path,
        mp4_available,
    })
}

/// Fingerprint a request and report whether the cache already holds it.
/// Does not create the cache directory.
pub fn fingerprint(input_path: &Path, options: Value) -> Result<FingerprintResult, ThumbnailError> {
    let options = options_from_value(options)?;
    let generator = ThumbnailGenerator::default();
    let fp = generator.fingerprint(input_path, &options)?;
    let cache_dir = generator.cache_dir_for(&options);
    let cached = cache_dir.is_dir()
        && CacheStore::open(&cache_dir)
            .ok()
            .and_then(|store| store.lookup(&fp).ok().flatten())
            .is_some();
    Ok(FingerprintResult {
        fingerprint: fp.to_string(),
        cache_dir,
        cached,
    })
}

pub fn generate_with_events(
    input_path: &Path,
    options: Value,
    progress: Option<SidecarProgressEmitter>,
) -> Result<ThumbnailResult, ThumbnailError> {
    let options = options_from_value(options)?;
    ThumbnailGenerator::default().generate_with_progress(input_path, &options, progress)
}

/// Kill every in-flight codec process. Returns how many were running.
pub fn cancel_all() -> usize {
    let killed = terminate_all_ffmpeg();
    if killed > 0 {
        log::debug!(target: "vidthumb::sidecar", "cancelled {} codec process(es)", killed);
    }
    killed
}

/// Sweep work directories and cache publish temps left by earlier processes.
pub fn cleanup_startup_temp() {
    let removed = cleanup_old_temp_files();
    if removed > 0 {
        log::info!(target: "vidthumb::sidecar", "removed {} stale work dir(s)", removed);
    }
    sweep_stale_temp_files(default_cache_dir(), STALE_AFTER);
}
