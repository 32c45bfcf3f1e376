//! Source probing via `ffprobe -print_format json`.

use std::path::Path;

use serde::Deserialize;

use super::path_to_string;
use super::runner::run_ffprobe_capture;
use crate::codec::MediaInfo;
use crate::error::{InputError, ThumbnailError};

#[derive(Debug, Deserialize)]
struct FfprobeFormat {
    duration: Option<String>,
}

#[derive(Debug, Deserialize)]
struct FfprobeStream {
    codec_type: Option<String>,
    width: Option<u32>,
    height: Option<u32>,
    #[serde(default)]
    duration: Option<String>,
    r_frame_rate: Option<String>,
    #[serde(default)]
    avg_frame_rate: Option<String>,
}

#[derive(Debug, Deserialize)]
struct FfprobeOutput {
    format: Option<FfprobeFormat>,
    #[serde(default)]
    streams: Vec<FfprobeStream>,
}

fn parse_frame_rate(s: &str) -> Option<f64> {
    let (num, den) = s.split_once('/')?;
    let num: f64 = num.trim().parse().ok()?;
    let den: f64 = den.trim().parse().ok()?;
    if den == 0.0 || num <= 0.0 {
        return None;
    }
    Some(num / den)
}

fn parse_seconds(s: Option<&String>) -> Option<f64> {
    s.and_then(|v| v.parse::<f64>().ok())
        .filter(|d| d.is_finite() && *d > 0.0)
}

/// Parse ffprobe JSON. Requires a video stream with known dimensions.
pub fn parse_ffprobe_json(json: &str) -> Result<MediaInfo, ThumbnailError> {
    let output: FfprobeOutput = serde_json::from_str(json)
        .map_err(|e| InputError::Unprobeable(format!("Failed to parse ffprobe JSON: {}", e)))?;

    let video = output
        .streams
        .iter()
        .find(|s| s.codec_type.as_deref() == Some("video"))
        .ok_or_else(|| InputError::Unprobeable("no video stream".to_string()))?;
    let (width, height) = match (video.width, video.height) {
        (Some(w), Some(h)) if w > 0 && h > 0 => (w, h),
        _ => {
            return Err(InputError::Unprobeable(
                "video stream has no dimensions".to_string(),
            )
            .into());
        }
    };

    let duration = parse_seconds(output.format.as_ref().and_then(|f| f.duration.as_ref()))
        .or_else(|| parse_seconds(video.duration.as_ref()))
        .unwrap_or(0.0);
    // avg_frame_rate is the real rate for VFR sources; r_frame_rate can be a timebase.
    let fps = video
        .avg_frame_rate
        .as_deref()
        .and_then(parse_frame_rate)
        .or_else(|| video.r_frame_rate.as_deref().and_then(parse_frame_rate))
        .unwrap_or(0.0);
    let has_audio = output
        .streams
        .iter()
        .any(|s| s.codec_type.as_deref() == Some("audio"));

    Ok(MediaInfo {
        duration,
        width,
        height,
        fps,
        has_audio,
    })
}

/// A failed ffprobe run means the source could not be read. Cancellation,
/// timeouts and spawn failures keep their own errors.
fn source_error_on_failure(err: ThumbnailError) -> ThumbnailError {
    match err {
        ThumbnailError::ExternalTool { code, stderr } if code > 0 => {
            InputError::Unprobeable(format!("ffprobe failed: {}", stderr.trim())).into()
        }
        other => other,
    }
}

/// Run ffprobe on `path`.
pub fn probe(path: &Path) -> Result<MediaInfo, ThumbnailError> {
    log::debug!(
        target: "vidthumb::ffmpeg::ffprobe",
        "probe: path={}",
        path.display()
    );

    let args: Vec<String> = [
        "-v",
        "error",
        "-print_format",
        "json",
        "-show_format",
        "-show_streams",
    ]
    .into_iter()
    .map(String::from)
    .chain(std::iter::once(path_to_string(path)))
    .collect();
    let stdout = run_ffprobe_capture(&args).map_err(source_error_on_failure)?;

    let json = String::from_utf8(stdout)
        .map_err(|_| InputError::Unprobeable("ffprobe output was not valid UTF-8".to_string()))?;
    parse_ffprobe_json(&json)
}
