//! Decode-to-null check for produced artifacts. A valid file decodes without
//! errors; a truncated or corrupt one makes FFmpeg exit non-zero or print errors.

use std::path::Path;
use std::process::Command;

#[cfg(windows)]
use std::os::windows::process::CommandExt;

use super::discovery::get_ffmpeg_path;

/// Decode every stream of `path` to the null muxer. Returns FFmpeg's complaint on failure.
pub fn verify_media(path: &Path) -> Result<(), String> {
    let ffmpeg = get_ffmpeg_path().map_err(|e| e.to_string())?;
    let mut cmd = Command::new(ffmpeg);
    cmd.args(["-nostdin", "-v", "error", "-i"])
        .arg(path)
        .args(["-f", "null", "-"]);
    #[cfg(windows)]
    cmd.creation_flags(0x08000000); // CREATE_NO_WINDOW
    let output = cmd.output().map_err(|e| e.to_string())?;
    let stderr = String::from_utf8_lossy(&output.stderr);
    if output.status.success() && !stderr.to_lowercase().contains("error") {
        return Ok(());
    }
    Err(format!(
        "Verification of {} failed (exit {}): {}",
        path.display(),
        output.status.code().unwrap_or(-1),
        stderr.trim()
    ))
}
