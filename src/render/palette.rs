//! Shared GIF palette. The codec proposes representative colours for the
//! whole frame sequence; here entries closer than the fuzz tolerance are
//! merged and the result is held to the `gifColors` cap.
//!
//! Every step is ordered deterministically (ties broken by colour, then by
//! index) so the same proposal always gives the same palette.

type Rgb = [u8; 3];

/// Euclidean distance between black and white in RGB space.
const MAX_DISTANCE: f64 = 441.672_955_930_063_7;
/// Fraction of `MAX_DISTANCE` that gifFuzz=100 corresponds to.
const FUZZ_SCALE: f64 = 0.25;

fn distance(a: Rgb, b: Rgb) -> f64 {
    let d: i32 = (0..3)
        .map(|c| {
            let diff = a[c] as i32 - b[c] as i32;
            diff * diff
        })
        .sum();
    (d as f64).sqrt()
}

/// Merge tolerance for a gifFuzz value in [1, 100].
pub fn fuzz_threshold(fuzz: u32) -> f64 {
    fuzz.min(100) as f64 / 100.0 * MAX_DISTANCE * FUZZ_SCALE
}

fn merge_close(mut entries: Vec<(Rgb, u64)>, threshold: f64) -> Vec<(Rgb, u64)> {
    entries.sort_by(|a, b| b.1.cmp(&a.1).then(a.0.cmp(&b.0)));
    let mut kept: Vec<(Rgb, u64)> = Vec::with_capacity(entries.len());
    for (rgb, n) in entries {
        match kept.iter_mut().find(|(k, _)| distance(*k, rgb) <= threshold) {
            Some(existing) => existing.1 += n,
            None => kept.push((rgb, n)),
        }
    }
    kept
}

fn weighted_mean(a: (Rgb, u64), b: (Rgb, u64)) -> (Rgb, u64) {
    let total = (a.1 + b.1).max(1);
    let mix = |c: usize| {
        let sum = a.0[c] as u64 * a.1 + b.0[c] as u64 * b.1;
        ((sum as f64 / total as f64).round() as u64).min(255) as u8
    };
    ([mix(0), mix(1), mix(2)], a.1 + b.1)
}

/// Fold the closest pair together until at most `max_colors` remain.
fn cap_colors(mut entries: Vec<(Rgb, u64)>, max_colors: usize) -> Vec<(Rgb, u64)> {
    while entries.len() > max_colors {
        let mut closest = (0, 1, f64::MAX);
        for i in 0..entries.len() {
            for j in i + 1..entries.len() {
                let d = distance(entries[i].0, entries[j].0);
                if d < closest.2 {
                    closest = (i, j, d);
                }
            }
        }
        let (i, j, _) = closest;
        let merged = weighted_mean(entries[i], entries[j]);
        entries.remove(j);
        entries[i] = merged;
    }
    entries
}

/// Palette of at most `max_colors` entries from the codec's proposed colours.
pub fn reduce_palette(proposed: &[Rgb], max_colors: u32, fuzz: u32) -> Vec<Rgb> {
    let max_colors = max_colors.clamp(1, 256) as usize;
    if proposed.is_empty() {
        return vec![[0, 0, 0]];
    }
    let weighted = proposed.iter().map(|&rgb| (rgb, 1)).collect();
    let merged = merge_close(weighted, fuzz_threshold(fuzz));
    let capped = cap_colors(merged, max_colors);
    log::debug!(
        target: "vidthumb::render::palette",
        "palette: {} of {} proposed colours (cap {}, fuzz {})",
        capped.len(),
        proposed.len(),
        max_colors,
        fuzz
    );
    capped.into_iter().map(|(rgb, _)| rgb).collect()
}
