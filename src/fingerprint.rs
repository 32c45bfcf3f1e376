//! Content fingerprint used as the cache key: BLAKE3 over the first
//! [`PREFIX_LEN`] bytes of the source plus the canonical options key.
//!
//! Only the prefix is read, so two sources sharing their first 8 KiB collide.
//! Location fields (`outputPath`, `cacheDir`) never affect the result.

use std::fs::File;
use std::io::{ErrorKind, Read};
use std::path::Path;

use crate::error::{InputError, ThumbnailError};
use crate::options::ThumbnailOptions;

pub const PREFIX_LEN: usize = 8192;

#[derive(Debug, Clone, PartialEq, Eq, Hash, serde::Serialize)]
#[serde(transparent)]
pub struct Fingerprint(String);

impl Fingerprint {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Derive the fingerprint for `source` under `options`.
pub fn derive(source: &Path, options: &ThumbnailOptions) -> Result<Fingerprint, ThumbnailError> {
    let prefix = read_prefix(source)?;
    Ok(from_parts(&prefix, &options.options_cache_key()))
}

fn from_parts(prefix: &[u8], options_key: &str) -> Fingerprint {
    let content = blake3::hash(prefix);
    let mut hasher = blake3::Hasher::new();
    hasher.update(content.as_bytes());
    hasher.update(options_key.as_bytes());
    Fingerprint(hasher.finalize().to_hex().to_string())
}

fn read_prefix(source: &Path) -> Result<Vec<u8>, ThumbnailError> {
    let file = File::open(source).map_err(|e| match e.kind() {
        ErrorKind::NotFound => InputError::SourceNotFound(source.to_path_buf()),
        _ => InputError::SourceUnreadable {
            path: source.to_path_buf(),
            source: e,
        },
    })?;
    let mut prefix = Vec::with_capacity(PREFIX_LEN);
    file.take(PREFIX_LEN as u64)
        .read_to_end(&mut prefix)
        .map_err(|e| InputError::SourceUnreadable {
            path: source.to_path_buf(),
            source: e,
        })?;
    Ok(prefix)
}
