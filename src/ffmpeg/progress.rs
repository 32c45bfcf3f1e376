use regex::Regex;
use std::sync::LazyLock;

static DURATION_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"Duration: (\d+):(\d+):([\d.]+)").expect("invalid duration regex"));
static TIME_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"out_time_(?:ms|us)=(\d+)").expect("invalid time regex"));

/// Parse one line of FFmpeg output. Returns (progress in [0,1], duration in seconds).
/// `out_time_ms` is in microseconds despite its name.
pub fn parse_ffmpeg_progress(
    line: &str,
    current_duration: Option<f64>,
) -> (Option<f64>, Option<f64>) {
    if line.trim() == "progress=end" {
        return (Some(1.0), current_duration);
    }

    if let Some(caps) = DURATION_RE.captures(line) {
        let hours: f64 = caps[1].parse().unwrap_or(0.0);
        let minutes: f64 = caps[2].parse().unwrap_or(0.0);
        let seconds: f64 = caps[3].parse().unwrap_or(0.0);
        return (None, Some(hours * 3600.0 + minutes * 60.0 + seconds));
    }

    if let (Some(caps), Some(dur)) = (TIME_RE.captures(line), current_duration) {
        if dur > 0.0 {
            let micros: i64 = caps[1].parse().unwrap_or(0);
            let progress = (micros as f64 / 1_000_000.0 / dur).clamp(0.0, 1.0);
            return (Some(progress), Some(dur));
        }
    }

    (None, current_duration)
}
