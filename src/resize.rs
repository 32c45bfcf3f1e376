//! Output dimension resolution.

use crate::codec::Dimensions;

/// Compute output dimensions from the source size and the requested box.
///
/// With `maintain_aspect` a single requested side scales the other by the
/// source ratio, and two requested sides are treated as a box to fit within.
/// Without it, requested sides are used as-is and unset sides keep the source value.
/// Results are rounded to the nearest integer and never below 1.
pub fn target_dimensions(
    source: Dimensions,
    width: Option<u32>,
    height: Option<u32>,
    maintain_aspect: bool,
) -> Dimensions {
    let sw = source.width.max(1) as f64;
    let sh = source.height.max(1) as f64;

    let (w, h) = match (width, height, maintain_aspect) {
        (None, None, _) => (source.width, source.height),
        (Some(w), None, true) => (w, scaled(sh, w as f64 / sw)),
        (None, Some(h), true) => (scaled(sw, h as f64 / sh), h),
        (Some(w), Some(h), true) => {
            let scale = (w as f64 / sw).min(h as f64 / sh);
            (scaled(sw, scale), scaled(sh, scale))
        }
        (w, h, false) => (w.unwrap_or(source.width), h.unwrap_or(source.height)),
    };
    Dimensions::new(w.max(1), h.max(1))
}

fn scaled(side: f64, scale: f64) -> u32 {
    ((side * scale).round() as u32).max(1)
}

/// Round each side down to an even number, minimum 2. H.264 with yuv420p needs this.
pub fn even_dimensions(dims: Dimensions) -> Dimensions {
    let even = |v: u32| (v - v % 2).max(2);
    Dimensions::new(even(dims.width), even(dims.height))
}
