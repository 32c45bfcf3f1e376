//! Animated GIF / MP4 preview loops sampled from sections of a video, with a
//! content-addressed on-disk cache.
//!
//! ```no_run
//! use std::path::Path;
//! use vidthumb_core::ThumbnailOptions;
//!
//! let options = ThumbnailOptions::from_json(r#"{"autoSections": 3, "width": 320}"#)?;
//! let result = vidthumb_core::generate(Path::new("clip.mp4"), &options)?;
//! println!("{}", result.path.display());
//! # Ok::<(), vidthumb_core::ThumbnailError>(())
//! ```

pub mod cache;
pub mod codec;
pub mod error;
pub mod ffmpeg;
pub mod fingerprint;
mod generator;
pub mod options;
pub mod planner;
pub mod render;
pub mod resize;
pub mod result;
pub mod sidecar_api;

use std::path::Path;

pub use error::ThumbnailError;
pub use generator::ThumbnailGenerator;
pub use options::{OutputFormat, ThumbnailOptions, ThumbnailRequest, VideoSection};
pub use result::{SectionInfo, ThumbnailResult};

/// Generate (or fetch from cache) a preview loop with the FFmpeg codec and the
/// process default cache directory.
pub fn generate(path: &Path, options: &ThumbnailOptions) -> Result<ThumbnailResult, ThumbnailError> {
    ThumbnailGenerator::default().generate(path, options)
}
