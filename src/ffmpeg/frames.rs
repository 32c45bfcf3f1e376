//! Handing frames back to FFmpeg: an `ffconcat` list carrying each frame's
//! display duration, and the fixed palette image `paletteuse` maps against.

use std::fmt::Write as _;
use std::io;
use std::path::{Path, PathBuf};

use image::{Rgb, RgbImage};

use super::path_to_string;
use super::temp::WorkDir;
use crate::codec::{Frame, TimedFrame};
use crate::error::ThumbnailError;

/// Side length of the square palette image `paletteuse` expects (16x16 = 256 entries).
pub const PALETTE_SIDE: u32 = 16;

/// 16x16 image holding `palette` row by row, padded by repeating the last entry.
pub fn palette_image(palette: &[[u8; 3]]) -> RgbImage {
    let filler = palette.last().copied().unwrap_or([0, 0, 0]);
    RgbImage::from_fn(PALETTE_SIDE, PALETTE_SIDE, |x, y| {
        let index = (y * PALETTE_SIDE + x) as usize;
        Rgb(palette.get(index).copied().unwrap_or(filler))
    })
}

/// Write `palette` as `palette.ppm` into `work`.
pub fn write_palette(work: &WorkDir, palette: &[[u8; 3]]) -> Result<PathBuf, ThumbnailError> {
    let path = work.file("palette.ppm");
    Frame::new(palette_image(palette)).write_ppm(&path)?;
    Ok(path)
}

/// Unique colours of a `palettegen` image in scan order, transparent cells skipped.
pub fn read_palette(path: &Path) -> Result<Vec<[u8; 3]>, ThumbnailError> {
    let image = image::open(path)?.to_rgba8();
    let mut colors: Vec<[u8; 3]> = Vec::with_capacity(256);
    for px in image.pixels().filter(|px| px[3] == u8::MAX) {
        let rgb = [px[0], px[1], px[2]];
        if !colors.contains(&rgb) {
            colors.push(rgb);
        }
    }
    Ok(colors)
}

/// Seconds with microsecond precision and no trailing zeros.
pub fn format_seconds(secs: f64) -> String {
    let s = format!("{:.6}", secs.max(0.0));
    let s = s.trim_end_matches('0').trim_end_matches('.');
    if s.is_empty() { "0".to_string() } else { s.to_string() }
}

/// ffconcat script for `entries` with matching durations. The last entry is
/// repeated so the demuxer honours its duration.
pub fn concat_script(entries: &[(String, f64)]) -> String {
    let mut script = String::from("ffconcat version 1.0\n");
    for (name, duration) in entries {
        let _ = writeln!(script, "file '{}'", name.replace('\'', "'\\''"));
        let _ = writeln!(script, "duration {}", format_seconds(*duration));
    }
    if let Some((name, _)) = entries.last() {
        let _ = writeln!(script, "file '{}'", name.replace('\'', "'\\''"));
    }
    script
}

/// Write `frames.ffconcat` into `work`, naming each frame file by its full path.
pub fn write_concat_list(work: &WorkDir, frames: &[TimedFrame]) -> io::Result<PathBuf> {
    let entries: Vec<(String, f64)> = frames
        .iter()
        .map(|f| (path_to_string(&f.path), f.display_seconds))
        .collect();
    work.write("frames.ffconcat", concat_script(&entries).as_bytes())
}
