//! Section planning: which windows of the source to sample and at which timestamps.
//!
//! Sample timestamps are start-inclusive and end-exclusive:
//! `t_k = start + k * duration / n` for `k in 0..n`.

use crate::error::{InputError, ThumbnailError};
use crate::options::{ThumbnailOptions, VideoSection};

/// Allowed float slack when checking a section against the source end.
const BOUNDS_EPSILON: f64 = 1e-6;
/// Smallest sample spacing when the source frame rate is unknown.
const MIN_SPACING_UNKNOWN_FPS: f64 = 0.001;

/// One resolved window with its sample timestamps.
#[derive(Debug, Clone, PartialEq)]
pub struct PlannedSection {
    pub section: VideoSection,
    pub timestamps: Vec<f64>,
}

impl PlannedSection {
    /// Display time per sampled frame so the section keeps its duration.
    pub fn frame_seconds(&self) -> f64 {
        self.section.duration / self.timestamps.len().max(1) as f64
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct SectionPlan {
    pub sections: Vec<PlannedSection>,
    /// Requested frames per section after `autoFrames` was applied.
    pub frames_per_section: u32,
}

impl SectionPlan {
    pub fn total_samples(&self) -> usize {
        self.sections.iter().map(|s| s.timestamps.len()).sum()
    }

    pub fn total_duration(&self) -> f64 {
        self.sections.iter().map(|s| s.section.duration).sum()
    }
}

/// Resolve the request into ordered sections and sample timestamps.
pub fn plan(
    source_duration: f64,
    source_fps: f64,
    options: &ThumbnailOptions,
) -> Result<SectionPlan, ThumbnailError> {
    let sections = resolve_sections(source_duration, options)?;
    let frames_per_section = options.effective_frames_per_section(source_fps);
    let min_spacing = if source_fps.is_finite() && source_fps > 0.0 {
        1.0 / source_fps
    } else {
        MIN_SPACING_UNKNOWN_FPS
    };

    let sections = sections
        .into_iter()
        .enumerate()
        .map(|(index, section)| {
            let count = sample_count(section.duration, frames_per_section, min_spacing);
            if count < frames_per_section {
                log::warn!(
                    target: "vidthumb::planner",
                    "section {} ({}s) too short for {} frames at {:.4}s spacing, sampling {}",
                    index,
                    section.duration,
                    frames_per_section,
                    min_spacing,
                    count
                );
            }
            PlannedSection {
                section,
                timestamps: sample_timestamps(&section, count),
            }
        })
        .collect();

    Ok(SectionPlan {
        sections,
        frames_per_section,
    })
}

/// Manual list, auto-distributed count, or the single default section.
pub fn resolve_sections(
    source_duration: f64,
    options: &ThumbnailOptions,
) -> Result<Vec<VideoSection>, ThumbnailError> {
    if !source_duration.is_finite() || source_duration <= 0.0 {
        return Err(InputError::NonPositiveSourceDuration(source_duration).into());
    }

    let sections = if !options.sections().is_empty() {
        for (index, section) in options.sections().iter().enumerate() {
            if section.end_time() > source_duration + BOUNDS_EPSILON {
                return Err(InputError::SectionOutOfBounds {
                    index,
                    start: section.start_time,
                    duration: section.duration,
                    source_duration,
                }
                .into());
            }
        }
        options.sections().to_vec()
    } else if let Some(count) = options.auto_sections() {
        auto_sections(source_duration, options.section_duration(), count)
    } else {
        vec![VideoSection::new(
            0.0,
            options.section_duration().min(source_duration),
        )]
    };

    for (index, section) in sections.iter().enumerate() {
        if section.duration <= 0.0 {
            return Err(InputError::InvalidSection {
                index,
                reason: format!(
                    "non-positive duration {} after clamping to source",
                    section.duration
                ),
            }
            .into());
        }
    }
    Ok(sections)
}

fn auto_sections(source_duration: f64, section_duration: f64, count: u32) -> Vec<VideoSection> {
    let interval = if count > 1 {
        (source_duration - section_duration) / (count - 1) as f64
    } else {
        0.0
    };
    let max_start = (source_duration - section_duration).max(0.0);
    (0..count)
        .map(|i| {
            let start = (i as f64 * interval).clamp(0.0, max_start);
            let duration = section_duration.min(source_duration - start);
            VideoSection::new(start, duration)
        })
        .collect()
}

fn sample_count(duration: f64, requested: u32, min_spacing: f64) -> u32 {
    let spacing = duration / requested as f64;
    if spacing + 1e-12 >= min_spacing {
        return requested;
    }
    ((duration / min_spacing + 1e-9).floor() as u32).clamp(1, requested)
}

fn sample_timestamps(section: &VideoSection, count: u32) -> Vec<f64> {
    let step = section.duration / count as f64;
    (0..count)
        .map(|k| section.start_time + k as f64 * step)
        .collect()
}
