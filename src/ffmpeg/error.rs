//! Short summaries for FFmpeg failures. The full stderr is kept as detail.
//!
//! Exit codes from ffmpeg.c: 1 (general), 69 (rate exceeded), 123 (hard exit),
//! 255 (signal). -1 means the process could not be spawned or had no exit code.

use serde::Serialize;

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FfmpegErrorPayload {
    pub summary: String,
    pub detail: String,
}

const SUMMARY_MAX_LEN: usize = 120;
const ELLIPSIS: &str = "…";

pub fn parse_ffmpeg_error(stderr: &str, exit_code: Option<i32>) -> FfmpegErrorPayload {
    let summary = match exit_code {
        Some(-1) => "FFmpeg not found or failed to start.".to_string(),
        Some(69) => "Encoding rate limit exceeded.".to_string(),
        Some(123) | Some(255) => "FFmpeg was stopped.".to_string(),
        Some(code) => match last_meaningful_line(stderr) {
            Some(line) => format!("FFmpeg failed (exit code {}): {}", code, truncate(line)),
            None => format!("FFmpeg failed (exit code {}).", code),
        },
        None => last_meaningful_line(stderr)
            .map(truncate)
            .unwrap_or_else(|| "FFmpeg failed.".to_string()),
    };
    FfmpegErrorPayload {
        summary,
        detail: stderr.trim().to_string(),
    }
}

/// FFmpeg prints the fatal reason last; progress chatter starts with `key=`.
fn last_meaningful_line(stderr: &str) -> Option<&str> {
    stderr
        .lines()
        .rev()
        .map(str::trim)
        .find(|l| !l.is_empty() && !is_progress_line(l))
}

fn is_progress_line(line: &str) -> bool {
    line.split_once('=')
        .is_some_and(|(k, _)| !k.is_empty() && k.chars().all(|c| c.is_ascii_alphanumeric() || c == '_'))
}

fn truncate(line: &str) -> String {
    if line.len() <= SUMMARY_MAX_LEN {
        return line.to_string();
    }
    let mut cut = SUMMARY_MAX_LEN - ELLIPSIS.len();
    while !line.is_char_boundary(cut) {
        cut -= 1;
    }
    format!("{}{}", &line[..cut], ELLIPSIS)
}
