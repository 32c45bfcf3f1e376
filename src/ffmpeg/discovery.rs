//! Locating the `ffmpeg` and `ffprobe` binaries.
//!
//! Order: `FFMPEG_PATH`, well-known install locations, then `PATH`. The result is
//! cached for the process lifetime. `ffprobe` is expected next to `ffmpeg`.

use std::path::{Path, PathBuf};
use std::process::Command;
use std::sync::OnceLock;

use crate::error::ThumbnailError;

pub const FFMPEG_PATH_ENV: &str = "FFMPEG_PATH";

static FFMPEG_PATH_CACHE: OnceLock<PathBuf> = OnceLock::new();

fn find_in_path() -> Option<PathBuf> {
    #[cfg(target_os = "windows")]
    let lookup = "where";
    #[cfg(not(target_os = "windows"))]
    let lookup = "which";

    let output = Command::new(lookup).arg("ffmpeg").output().ok()?;
    if !output.status.success() {
        return None;
    }
    let stdout = String::from_utf8_lossy(&output.stdout);
    let first = stdout.lines().next()?.trim();
    (!first.is_empty()).then(|| PathBuf::from(first))
}

fn common_paths() -> Vec<PathBuf> {
    #[cfg(target_os = "macos")]
    {
        vec![
            PathBuf::from("/opt/homebrew/bin/ffmpeg"),
            PathBuf::from("/usr/local/bin/ffmpeg"),
            PathBuf::from("/opt/local/bin/ffmpeg"),
        ]
    }

    #[cfg(target_os = "windows")]
    {
        vec![
            PathBuf::from("C:\\ffmpeg\\bin\\ffmpeg.exe"),
            PathBuf::from("C:\\Program Files\\ffmpeg\\bin\\ffmpeg.exe"),
        ]
    }

    #[cfg(all(unix, not(target_os = "macos")))]
    {
        vec![
            PathBuf::from("/usr/bin/ffmpeg"),
            PathBuf::from("/usr/local/bin/ffmpeg"),
        ]
    }

    #[cfg(not(any(target_os = "macos", target_os = "windows", unix)))]
    {
        vec![]
    }
}

fn resolve_ffmpeg_path() -> Result<PathBuf, ThumbnailError> {
    if let Some(env_path) = std::env::var_os(FFMPEG_PATH_ENV).filter(|v| !v.is_empty()) {
        let p = PathBuf::from(env_path);
        if p.exists() {
            log::debug!(
                target: "vidthumb::ffmpeg::discovery",
                "FFmpeg path from {}: {}",
                FFMPEG_PATH_ENV,
                p.display()
            );
            return Ok(p);
        }
        log::warn!(
            target: "vidthumb::ffmpeg::discovery",
            "{} points at missing file {}, searching elsewhere",
            FFMPEG_PATH_ENV,
            p.display()
        );
    }

    if let Some(p) = common_paths().into_iter().find(|p| p.exists()) {
        log::debug!(
            target: "vidthumb::ffmpeg::discovery",
            "FFmpeg found in common path: {}",
            p.display()
        );
        return Ok(p);
    }

    if let Some(p) = find_in_path().filter(|p| p.exists()) {
        log::debug!(
            target: "vidthumb::ffmpeg::discovery",
            "FFmpeg found in PATH: {}",
            p.display()
        );
        return Ok(p);
    }

    log::error!(
        target: "vidthumb::ffmpeg::discovery",
        "FFmpeg not found in {}, common locations or PATH",
        FFMPEG_PATH_ENV
    );
    Err(ThumbnailError::FfmpegNotFound(
        "FFmpeg not found. Install it or set FFMPEG_PATH:\n  - macOS: brew install ffmpeg\n  - Linux: sudo apt install ffmpeg\n  - Windows: Download from https://ffmpeg.org/download.html"
            .to_string(),
    ))
}

/// FFmpeg binary path, resolved once per process.
pub fn get_ffmpeg_path() -> Result<&'static Path, ThumbnailError> {
    if let Some(path) = FFMPEG_PATH_CACHE.get() {
        return Ok(path.as_path());
    }
    let resolved = resolve_ffmpeg_path()?;
    Ok(FFMPEG_PATH_CACHE.get_or_init(|| resolved).as_path())
}

/// Where to look for ffprobe given an ffmpeg path: a same-suffix binary first
/// (`ffmpeg-x86_64` → `ffprobe-x86_64`), then plain `ffprobe`.
pub fn ffprobe_candidates(ffmpeg_path: &Path) -> Vec<PathBuf> {
    let Some(parent) = ffmpeg_path.parent() else {
        return vec![];
    };
    let exe = |name: String| {
        if cfg!(target_os = "windows") {
            parent.join(format!("{name}.exe"))
        } else {
            parent.join(name)
        }
    };
    let mut candidates = Vec::with_capacity(2);
    if let Some(suffix) = ffmpeg_path
        .file_stem()
        .and_then(|s| s.to_str())
        .and_then(|stem| stem.strip_prefix("ffmpeg"))
        .filter(|suffix| !suffix.is_empty())
    {
        candidates.push(exe(format!("ffprobe{suffix}")));
    }
    candidates.push(exe("ffprobe".to_string()));
    candidates
}

pub fn get_ffprobe_path() -> Result<PathBuf, ThumbnailError> {
    let ffmpeg = get_ffmpeg_path()?;
    let candidates = ffprobe_candidates(ffmpeg);
    if let Some(found) = candidates.iter().find(|c| c.exists()) {
        return Ok(found.clone());
    }
    Err(ThumbnailError::FfmpegNotFound(format!(
        "ffprobe not found next to {} (tried {})",
        ffmpeg.display(),
        candidates
            .iter()
            .map(|c| c.display().to_string())
            .collect::<Vec<_>>()
            .join(", ")
    )))
}

/// Names of the encoders this FFmpeg build offers, from `ffmpeg -encoders`.
pub fn get_available_encoders() -> Result<Vec<String>, ThumbnailError> {
    let ffmpeg = get_ffmpeg_path()?;
    let output = Command::new(ffmpeg)
        .args(["-hide_banner", "-encoders"])
        .output()
        .map_err(|e| ThumbnailError::external_tool(-1, format!("Failed to run FFmpeg: {}", e)))?;
    if !output.status.success() {
        return Err(ThumbnailError::external_tool(
            output.status.code().unwrap_or(-1),
            String::from_utf8_lossy(&output.stderr).into_owned(),
        ));
    }
    Ok(parse_encoder_list(&String::from_utf8_lossy(&output.stdout)))
}

/// Parse `ffmpeg -encoders` output. Encoder lines look like ` V....D libx264  ...`
/// and follow a ` ------` separator.
pub fn parse_encoder_list(stdout: &str) -> Vec<String> {
    stdout
        .lines()
        .skip_while(|l| !l.trim_start().starts_with("---"))
        .skip(1)
        .filter_map(|l| {
            let mut parts = l.split_whitespace();
            let flags = parts.next()?;
            let name = parts.next()?;
            (flags.len() == 6).then(|| name.to_string())
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    #[cfg(not(target_os = "windows"))]
    fn ffprobe_candidates_plain_ffmpeg() {
        let candidates = ffprobe_candidates(Path::new("/usr/bin/ffmpeg"));
        assert_eq!(candidates, vec![PathBuf::from("/usr/bin/ffprobe")]);
    }

    #[test]
    #[cfg(not(target_os = "windows"))]
    fn ffprobe_candidates_with_suffix() {
        let candidates = ffprobe_candidates(Path::new("/opt/bin/ffmpeg-x86_64-unknown-linux-gnu"));
        assert_eq!(
            candidates,
            vec![
                PathBuf::from("/opt/bin/ffprobe-x86_64-unknown-linux-gnu"),
                PathBuf::from("/opt/bin/ffprobe"),
            ]
        );
    }

    #[test]
    #[cfg(target_os = "windows")]
    fn ffprobe_candidates_windows() {
        let candidates = ffprobe_candidates(Path::new("C:\\bin\\ffmpeg.exe"));
        assert_eq!(candidates, vec![PathBuf::from("C:\\bin\\ffprobe.exe")]);
    }

    #[test]
    fn encoder_list_parsed_after_separator() {
        let out = "Encoders:\n V..... = Video\n A..... = Audio\n ------\n V....D libx264              libx264 H.264\n A....D aac                  AAC (Advanced Audio Coding)\n V....D gif                  GIF (Graphics Interchange Format)\n";
        assert_eq!(parse_encoder_list(out), vec!["libx264", "aac", "gif"]);
    }
}
