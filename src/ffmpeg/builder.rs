//! FFmpeg argument lists for frame decoding and the two encoders.
//!
//! Encodes run with bitexact flags, stripped metadata and a single thread so
//! identical inputs produce identical bytes.

use std::path::Path;

use super::frames::format_seconds;
use super::path_to_string;
use crate::codec::{AudioWindow, Dimensions};

fn s(v: &str) -> String {
    v.to_string()
}

/// H.264 encoder for the build. LGPL builds ship without libx264.
pub fn h264_encoder() -> &'static str {
    #[cfg(feature = "lgpl")]
    {
        "h264_videotoolbox"
    }
    #[cfg(not(feature = "lgpl"))]
    {
        "libx264"
    }
}

fn reproducible_output_flags() -> Vec<String> {
    vec![
        s("-map_metadata"),
        s("-1"),
        s("-fflags"),
        s("+bitexact"),
        s("-flags:v"),
        s("+bitexact"),
    ]
}

/// Decode the frame at `timestamp` scaled to `size`, written to stdout as raw RGB24.
pub fn build_decode_frame_args(source: &Path, timestamp: f64, size: Dimensions) -> Vec<String> {
    vec![
        s("-nostdin"),
        s("-v"),
        s("error"),
        s("-ss"),
        format_seconds(timestamp),
        s("-i"),
        path_to_string(source),
        s("-map"),
        s("0:v:0"),
        s("-frames:v"),
        s("1"),
        s("-an"),
        s("-sn"),
        s("-vf"),
        format!("scale={}:{}:flags=bicubic", size.width, size.height),
        s("-f"),
        s("rawvideo"),
        s("-pix_fmt"),
        s("rgb24"),
        s("pipe:1"),
    ]
}

/// Smallest palette `palettegen` will produce.
pub const PALETTEGEN_MIN_COLORS: u32 = 4;

/// Derive a palette of at most `max_colors` (min 4) opaque colours from every
/// frame in a concat list and write it as a 16x16 PNG.
pub fn build_palettegen_args(concat_list: &Path, max_colors: u32, output: &Path) -> Vec<String> {
    let colors = max_colors.clamp(PALETTEGEN_MIN_COLORS, 256);
    vec![
        s("-nostdin"),
        s("-v"),
        s("error"),
        s("-threads"),
        s("1"),
        s("-f"),
        s("concat"),
        s("-safe"),
        s("0"),
        s("-i"),
        path_to_string(concat_list),
        s("-vf"),
        format!(
            "palettegen=max_colors={}:reserve_transparent=0:stats_mode=full",
            colors
        ),
        s("-frames:v"),
        s("1"),
        s("-update"),
        s("1"),
        s("-y"),
        path_to_string(output),
    ]
}

/// Map a concat list of frames through a fixed 16x16 palette image into a looping GIF.
pub fn build_gif_args(concat_list: &Path, palette: &Path, output: &Path) -> Vec<String> {
    let mut args = vec![
        s("-nostdin"),
        s("-v"),
        s("error"),
        s("-progress"),
        s("pipe:1"),
        s("-threads"),
        s("1"),
        s("-f"),
        s("concat"),
        s("-safe"),
        s("0"),
        s("-i"),
        path_to_string(concat_list),
        s("-i"),
        path_to_string(palette),
        s("-filter_complex"),
        s("[0:v][1:v]paletteuse=dither=none:diff_mode=none[out]"),
        s("-map"),
        s("[out]"),
        s("-fps_mode"),
        s("vfr"),
        s("-loop"),
        s("0"),
    ];
    args.extend(reproducible_output_flags());
    args.extend([s("-f"), s("gif"), s("-y"), path_to_string(output)]);
    args
}

/// `[1:a]` trimmed to each window in order and concatenated into `[a]`.
pub fn audio_concat_filter(windows: &[AudioWindow]) -> String {
    let mut parts: Vec<String> = windows
        .iter()
        .enumerate()
        .map(|(i, w)| {
            format!(
                "[1:a]atrim=start={}:duration={},asetpts=PTS-STARTPTS[a{}]",
                format_seconds(w.start),
                format_seconds(w.duration),
                i
            )
        })
        .collect();
    let inputs: String = (0..windows.len()).map(|i| format!("[a{}]", i)).collect();
    parts.push(format!("{}concat=n={}:v=0:a=1[a]", inputs, windows.len()));
    parts.join(";")
}

pub struct Mp4Args<'a> {
    pub concat_list: &'a Path,
    pub fps: f64,
    pub crf: u32,
    pub max_bitrate_kbps: u32,
    /// Source path and windows when an audio track is wanted.
    pub audio: Option<(&'a Path, &'a [AudioWindow], u32)>,
    pub output: &'a Path,
}

pub fn build_mp4_args(job: &Mp4Args<'_>) -> Vec<String> {
    let encoder = h264_encoder();
    log::debug!(
        target: "vidthumb::ffmpeg::builder",
        "Building mp4 command: encoder={}, CRF={}, maxrate={}k, fps={}, audio={}",
        encoder,
        job.crf,
        job.max_bitrate_kbps,
        job.fps,
        job.audio.is_some()
    );

    let mut args = vec![
        s("-nostdin"),
        s("-v"),
        s("error"),
        s("-progress"),
        s("pipe:1"),
        s("-threads"),
        s("1"),
        s("-f"),
        s("concat"),
        s("-safe"),
        s("0"),
        s("-i"),
        path_to_string(job.concat_list),
    ];

    let video_filter = format!("[0:v]fps={},format=yuv420p[v]", format_seconds(job.fps));
    match job.audio {
        Some((source, windows, bitrate)) if !windows.is_empty() => {
            args.extend([s("-i"), path_to_string(source)]);
            args.extend([
                s("-filter_complex"),
                format!("{};{}", video_filter, audio_concat_filter(windows)),
                s("-map"),
                s("[v]"),
                s("-map"),
                s("[a]"),
                s("-c:a"),
                s("aac"),
                s("-b:a"),
                format!("{}k", bitrate),
                s("-flags:a"),
                s("+bitexact"),
            ]);
        }
        _ => {
            args.extend([
                s("-filter_complex"),
                video_filter,
                s("-map"),
                s("[v]"),
                s("-an"),
            ]);
        }
    }

    args.extend([s("-c:v"), s(encoder)]);
    if encoder == "libx264" {
        args.extend([s("-preset"), s("medium"), s("-crf"), job.crf.to_string()]);
    } else {
        // VideoToolbox has no CRF; -q:v runs 1..100, higher is better.
        let q = (100 - (job.crf.min(51) * 100 / 51)).max(1);
        args.extend([s("-q:v"), q.to_string()]);
    }
    args.extend([
        s("-maxrate"),
        format!("{}k", job.max_bitrate_kbps),
        s("-bufsize"),
        format!("{}k", job.max_bitrate_kbps * 2),
        s("-pix_fmt"),
        s("yuv420p"),
        s("-movflags"),
        s("+faststart"),
    ]);
    args.extend(reproducible_output_flags());
    args.extend([s("-f"), s("mp4"), s("-y"), path_to_string(job.output)]);
    args
}

/// Render args one per line for logs.
pub fn format_args_for_display_multiline(args: &[String]) -> String {
    let mut lines = Vec::new();
    let mut iter = args.iter().peekable();
    while let Some(arg) = iter.next() {
        match iter.peek() {
            Some(next) if arg.starts_with('-') && !next.starts_with('-') => {
                lines.push(format!("  {} {}", arg, quote(next)));
                iter.next();
            }
            _ => lines.push(format!("  {}", quote(arg))),
        }
    }
    lines.join(" \\\n")
}

fn quote(arg: &str) -> String {
    if arg.contains([' ', ';', '[', ']', '\'']) {
        format!("'{}'", arg.replace('\'', "'\\''"))
    } else {
        arg.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn value_after<'a>(args: &'a [String], flag: &str) -> Option<&'a str> {
        args.iter()
            .position(|a| a == flag)
            .and_then(|i| args.get(i + 1))
            .map(String::as_str)
    }

    #[test]
    fn decode_args_seek_scale_and_pipe_raw_rgb() {
        let args = build_decode_frame_args(Path::new("/v/in.mp4"), 43.5, Dimensions::new(320, 180));
        assert_eq!(value_after(&args, "-ss"), Some("43.5"));
        assert_eq!(value_after(&args, "-i"), Some("/v/in.mp4"));
        assert_eq!(value_after(&args, "-vf"), Some("scale=320:180:flags=bicubic"));
        assert_eq!(value_after(&args, "-pix_fmt"), Some("rgb24"));
        assert_eq!(args.last().map(String::as_str), Some("pipe:1"));
        let ss = args.iter().position(|a| a == "-ss").unwrap();
        let input = args.iter().position(|a| a == "-i").unwrap();
        assert!(ss < input, "seek must be an input option");
    }

    #[test]
    fn palettegen_args_clamp_colors_and_write_one_image() {
        let args = build_palettegen_args(
            Path::new("/w/frames.ffconcat"),
            2,
            Path::new("/w/palette.png"),
        );
        assert_eq!(value_after(&args, "-f"), Some("concat"));
        assert_eq!(
            value_after(&args, "-vf"),
            Some("palettegen=max_colors=4:reserve_transparent=0:stats_mode=full")
        );
        assert_eq!(value_after(&args, "-frames:v"), Some("1"));
        assert_eq!(args.last().map(String::as_str), Some("/w/palette.png"));

        let args = build_palettegen_args(Path::new("/w/l"), 128, Path::new("/w/p.png"));
        assert!(value_after(&args, "-vf").unwrap().contains("max_colors=128"));
    }

    #[test]
    fn gif_args_use_fixed_palette_and_loop_forever() {
        let args = build_gif_args(
            Path::new("/w/frames.ffconcat"),
            Path::new("/w/palette.ppm"),
            Path::new("/w/out.gif"),
        );
        assert_eq!(value_after(&args, "-f"), Some("concat"));
        assert!(args.contains(&"/w/palette.ppm".to_string()));
        assert_eq!(
            value_after(&args, "-filter_complex"),
            Some("[0:v][1:v]paletteuse=dither=none:diff_mode=none[out]")
        );
        assert_eq!(value_after(&args, "-loop"), Some("0"));
        assert_eq!(value_after(&args, "-map_metadata"), Some("-1"));
        assert_eq!(args.last().map(String::as_str), Some("/w/out.gif"));
    }

    #[test]
    fn audio_filter_trims_each_window_in_order() {
        let filter = audio_concat_filter(&[
            AudioWindow {
                start: 0.0,
                duration: 3.0,
            },
            AudioWindow {
                start: 43.5,
                duration: 3.0,
            },
        ]);
        assert_eq!(
            filter,
            "[1:a]atrim=start=0:duration=3,asetpts=PTS-STARTPTS[a0];\
             [1:a]atrim=start=43.5:duration=3,asetpts=PTS-STARTPTS[a1];\
             [a0][a1]concat=n=2:v=0:a=1[a]"
        );
    }

    #[test]
    #[cfg(not(feature = "lgpl"))]
    fn mp4_without_audio() {
        let args = build_mp4_args(&Mp4Args {
            concat_list: Path::new("/w/frames.ffconcat"),
            fps: 10.0 / 3.0,
            crf: 8,
            max_bitrate_kbps: 3875,
            audio: None,
            output: Path::new("/w/out.mp4"),
        });
        assert!(args.contains(&"-an".to_string()));
        assert_eq!(value_after(&args, "-c:v"), Some("libx264"));
        assert_eq!(value_after(&args, "-crf"), Some("8"));
        assert_eq!(value_after(&args, "-maxrate"), Some("3875k"));
        assert_eq!(value_after(&args, "-bufsize"), Some("7750k"));
        assert_eq!(value_after(&args, "-movflags"), Some("+faststart"));
        assert_eq!(
            value_after(&args, "-filter_complex"),
            Some("[0:v]fps=3.333333,format=yuv420p[v]")
        );
    }

    #[test]
    fn mp4_with_audio_maps_second_input() {
        let windows = [AudioWindow {
            start: 10.0,
            duration: 2.0,
        }];
        let args = build_mp4_args(&Mp4Args {
            concat_list: Path::new("/w/frames.ffconcat"),
            fps: 5.0,
            crf: 8,
            max_bitrate_kbps: 3875,
            audio: Some((Path::new("/v/in.mp4"), &windows, 192)),
            output: Path::new("/w/out.mp4"),
        });
        assert!(!args.contains(&"-an".to_string()));
        assert!(args.contains(&"/v/in.mp4".to_string()));
        assert_eq!(value_after(&args, "-c:a"), Some("aac"));
        assert_eq!(value_after(&args, "-b:a"), Some("192k"));
        assert!(
            value_after(&args, "-filter_complex")
                .unwrap()
                .ends_with("[a0]concat=n=1:v=0:a=1[a]")
        );
    }

    #[test]
    fn display_pairs_flags_with_values() {
        let shown = format_args_for_display_multiline(&[
            "-v".into(),
            "error".into(),
            "-filter_complex".into(),
            "[0:v]fps=5[v]".into(),
            "out.gif".into(),
        ]);
        assert_eq!(shown, "  -v error \\\n  -filter_complex '[0:v]fps=5[v]' \\\n  out.gif");
    }
}
