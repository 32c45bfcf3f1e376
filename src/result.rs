//! Result descriptor returned to callers and the assembler that builds it.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::codec::Dimensions;
use crate::options::{OutputFormat, ThumbnailOptions};

/// Per-section outcome.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SectionInfo {
    pub start_time: f64,
    pub duration: f64,
    /// Frames actually sampled for this section.
    pub frames: u32,
}

/// Everything about a build except where the artifact lives. This is what the
/// cache persists next to the artifact.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ThumbnailMetadata {
    pub width: u32,
    pub height: u32,
    pub format: OutputFormat,
    pub sections: Vec<SectionInfo>,
    pub total_frames: u32,
    pub total_duration: f64,
    /// `None` for gif.
    pub has_audio: Option<bool>,
    /// `None` for gif.
    pub audio_quality: Option<u32>,
    pub original_fps: f64,
    pub output_fps: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ThumbnailResult {
    pub path: PathBuf,
    #[serde(flatten)]
    pub metadata: ThumbnailMetadata,
    pub cached: bool,
}

impl ThumbnailResult {
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}

/// Facts about a finished render that are not per-section.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RenderFacts {
    pub dimensions: Dimensions,
    pub original_fps: f64,
    pub output_fps: f64,
    pub has_audio: bool,
}

/// Build metadata from a fresh render's per-section outcome.
pub fn assemble_metadata(
    sections: Vec<SectionInfo>,
    facts: RenderFacts,
    options: &ThumbnailOptions,
) -> ThumbnailMetadata {
    let total_frames = sections.iter().map(|s| s.frames).sum();
    let total_duration = sections.iter().map(|s| s.duration).sum();

    let (has_audio, audio_quality) = match options.format() {
        OutputFormat::Gif => (None, None),
        OutputFormat::Mp4 => (
            Some(facts.has_audio),
            facts.has_audio.then_some(options.audio_quality()),
        ),
    };

    ThumbnailMetadata {
        width: facts.dimensions.width,
        height: facts.dimensions.height,
        format: options.format(),
        sections,
        total_frames,
        total_duration,
        has_audio,
        audio_quality,
        original_fps: facts.original_fps,
        output_fps: facts.output_fps,
    }
}

/// Attach a location and the cache flag.
pub fn assemble(metadata: ThumbnailMetadata, path: &Path, cached: bool) -> ThumbnailResult {
    ThumbnailResult {
        path: path.to_path_buf(),
        metadata,
        cached,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::options::ThumbnailRequest;

    fn sections_of(sections: &[(f64, f64, u32)]) -> Vec<SectionInfo> {
        sections
            .iter()
            .map(|&(start_time, duration, frames)| SectionInfo {
                start_time,
                duration,
                frames,
            })
            .collect()
    }

    fn facts() -> RenderFacts {
        RenderFacts {
            dimensions: Dimensions::new(320, 180),
            original_fps: 30.0,
            output_fps: 3.333,
            has_audio: true,
        }
    }

    #[test]
    fn totals_are_sums_over_sections() {
        let sections = sections_of(&[(0.0, 3.0, 10), (43.5, 3.0, 10), (87.0, 3.0, 10)]);
        let meta = assemble_metadata(sections, facts(), &ThumbnailOptions::default());
        assert_eq!(meta.total_frames, 30);
        assert_eq!(meta.total_duration, 9.0);
        assert_eq!(meta.sections.len(), 3);
        assert_eq!(meta.sections[1].start_time, 43.5);
    }

    #[test]
    fn reduced_section_counts_flow_into_totals() {
        let sections = sections_of(&[(0.0, 0.5, 5), (10.0, 3.0, 10)]);
        let meta = assemble_metadata(sections, facts(), &ThumbnailOptions::default());
        assert_eq!(meta.total_frames, 15);
        assert_eq!(meta.total_duration, 3.5);
    }

    #[test]
    fn gif_has_no_audio_fields() {
        let meta = assemble_metadata(
            sections_of(&[(0.0, 3.0, 10)]),
            facts(),
            &ThumbnailOptions::default(),
        );
        assert_eq!(meta.has_audio, None);
        assert_eq!(meta.audio_quality, None);
    }

    #[test]
    fn mp4_reports_audio_quality_only_with_audio() {
        let opts = ThumbnailRequest {
            format: Some(OutputFormat::Mp4),
            include_audio: Some(true),
            ..Default::default()
        }
        .validate()
        .unwrap();
        let with = assemble_metadata(sections_of(&[(0.0, 3.0, 10)]), facts(), &opts);
        assert_eq!(with.has_audio, Some(true));
        assert_eq!(with.audio_quality, Some(128));

        let silent = RenderFacts {
            has_audio: false,
            ..facts()
        };
        let without = assemble_metadata(sections_of(&[(0.0, 3.0, 10)]), silent, &opts);
        assert_eq!(without.has_audio, Some(false));
        assert_eq!(without.audio_quality, None);
    }

    #[test]
    fn result_serializes_flat_camel_case() {
        let meta = assemble_metadata(
            sections_of(&[(0.0, 3.0, 10)]),
            facts(),
            &ThumbnailOptions::default(),
        );
        let result = assemble(meta, Path::new("/tmp/x.gif"), true);
        let json: serde_json::Value = serde_json::from_str(&result.to_json().unwrap()).unwrap();
        assert_eq!(json["path"], "/tmp/x.gif");
        assert_eq!(json["totalFrames"], 10);
        assert_eq!(json["format"], "gif");
        assert_eq!(json["cached"], true);
        assert_eq!(json["sections"][0]["startTime"], 0.0);
        assert!(json["hasAudio"].is_null());
    }
}
