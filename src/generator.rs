//! Request orchestration: fingerprint, cache lookup, build lock, plan, render,
//! publish, assemble.

use std::fs;
use std::path::{Path, PathBuf};

use crate::cache::{CacheStore, default_cache_dir};
use crate::codec::{MediaCodec, ProgressCallback};
use crate::error::{CacheError, ThumbnailError};
use crate::ffmpeg::FfmpegCodec;
use crate::ffmpeg::TempCleanup;
use crate::ffmpeg::temp::sibling_temp_path;
use crate::fingerprint::{self, Fingerprint};
use crate::options::ThumbnailOptions;
use crate::planner;
use crate::render;
use crate::result::{ThumbnailMetadata, ThumbnailResult, assemble, assemble_metadata};

/// Generates preview loops with a given codec and cache root.
#[derive(Debug, Clone)]
pub struct ThumbnailGenerator<C: MediaCodec = FfmpegCodec> {
    codec: C,
    cache_root: Option<PathBuf>,
}

impl Default for ThumbnailGenerator<FfmpegCodec> {
    fn default() -> Self {
        Self::new(FfmpegCodec::new())
    }
}

impl<C: MediaCodec> ThumbnailGenerator<C> {
    pub fn new(codec: C) -> Self {
        Self {
            codec,
            cache_root: None,
        }
    }

    /// Cache root used when a request carries no `cacheDir`.
    pub fn with_cache_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.cache_root = Some(dir.into());
        self
    }

    pub fn codec(&self) -> &C {
        &self.codec
    }

    /// `options.cacheDir`, else this generator's root, else the process default.
    pub fn cache_dir_for(&self, options: &ThumbnailOptions) -> PathBuf {
        options
            .cache_dir()
            .or(self.cache_root.as_deref())
            .unwrap_or_else(|| default_cache_dir())
            .to_path_buf()
    }

    pub fn fingerprint(
        &self,
        source: &Path,
        options: &ThumbnailOptions,
    ) -> Result<Fingerprint, ThumbnailError> {
        fingerprint::derive(source, options)
    }

    pub fn generate(
        &self,
        source: &Path,
        options: &ThumbnailOptions,
    ) -> Result<ThumbnailResult, ThumbnailError> {
        self.generate_with_progress(source, options, None)
    }

    /// Like [`generate`](Self::generate), reporting progress in [0,1].
    pub fn generate_with_progress(
        &self,
        source: &Path,
        options: &ThumbnailOptions,
        progress: Option<ProgressCallback>,
    ) -> Result<ThumbnailResult, ThumbnailError> {
        let fp = self.fingerprint(source, options)?;
        let cache_dir = self.cache_dir_for(options);
        log::debug!(
            target: "vidthumb::generator",
            "request {} fingerprint={} cache={}",
            source.display(),
            fp,
            cache_dir.display()
        );

        let store = match CacheStore::open(&cache_dir) {
            Ok(store) => Some(store),
            Err(e) => {
                log::warn!(target: "vidthumb::generator", "{}; rendering without cache", e);
                None
            }
        };

        let Some(store) = store else {
            let built = self.build(source, options, progress.clone())?;
            return self.finish_uncached(&fp, built, options, progress);
        };

        if let Some(result) = self.cached_result(&store, &fp, options, false)? {
            report(&progress, 1.0);
            return Ok(result);
        }

        let lock = store.build_lock(&fp);
        let _guard = lock.hold();
        // Another request may have finished this fingerprint while we waited.
        if let Some(result) = self.cached_result(&store, &fp, options, true)? {
            report(&progress, 1.0);
            return Ok(result);
        }

        let (artifact, metadata) = self.build(source, options, progress.clone())?;
        let result = match store.commit(&fp, &artifact, &metadata) {
            Ok(entry) => {
                let path = deliver_copy(&entry.artifact_path, options.output_path())?;
                assemble(entry.metadata, &path, false)
            }
            Err(e) => {
                log::warn!(target: "vidthumb::generator", "{}; returning uncached artifact", e);
                return self.finish_uncached(&fp, (artifact, metadata), options, progress);
            }
        };
        report(&progress, 1.0);
        Ok(result)
    }

    /// A cache hit as a result, or `None` on a miss. Corrupt entries read as
    /// misses and are only removed while `lock_held`.
    fn cached_result(
        &self,
        store: &CacheStore,
        fp: &Fingerprint,
        options: &ThumbnailOptions,
        lock_held: bool,
    ) -> Result<Option<ThumbnailResult>, ThumbnailError> {
        let entry = match store.lookup(fp) {
            Ok(entry) => entry,
            Err(e @ CacheError::CorruptMetadata { .. }) if lock_held => {
                log::warn!(target: "vidthumb::generator", "{}; discarding entry and rebuilding", e);
                store.discard(fp);
                None
            }
            Err(e @ CacheError::CorruptMetadata { .. }) => {
                log::debug!(target: "vidthumb::generator", "{}; rechecking under the build lock", e);
                None
            }
            Err(e) => {
                log::warn!(target: "vidthumb::generator", "{}; rebuilding", e);
                None
            }
        };
        let Some(entry) = entry else {
            return Ok(None);
        };
        log::info!(
            target: "vidthumb::generator",
            "cache hit {}",
            entry.artifact_path.display()
        );
        let path = deliver_copy(&entry.artifact_path, options.output_path())?;
        Ok(Some(assemble(entry.metadata, &path, true)))
    }

    fn build(
        &self,
        source: &Path,
        options: &ThumbnailOptions,
        progress: Option<ProgressCallback>,
    ) -> Result<(Vec<u8>, ThumbnailMetadata), ThumbnailError> {
        let media = self.codec.probe(source)?;
        log::debug!(
            target: "vidthumb::generator",
            "probed {}: {:.3}s {}x{} @ {:.3} fps, audio={}",
            source.display(),
            media.duration,
            media.width,
            media.height,
            media.fps,
            media.has_audio
        );
        let plan = planner::plan(media.duration, media.fps, options)?;
        let output = render::render(&self.codec, source, &media, &plan, options, progress)?;
        let metadata = assemble_metadata(output.sections, output.facts, options);
        Ok((output.artifact, metadata))
    }

    /// Publish an artifact without the cache: to `outputPath`, or to a
    /// fingerprint-named file in the system temp dir.
    fn finish_uncached(
        &self,
        fp: &Fingerprint,
        (artifact, metadata): (Vec<u8>, ThumbnailMetadata),
        options: &ThumbnailOptions,
        progress: Option<ProgressCallback>,
    ) -> Result<ThumbnailResult, ThumbnailError> {
        let dest = match options.output_path() {
            Some(path) => path.to_path_buf(),
            None => std::env::temp_dir().join(format!(
                "vidthumb-{}.{}",
                fp,
                metadata.format.extension()
            )),
        };
        publish_bytes(&artifact, &dest)?;
        report(&progress, 1.0);
        Ok(assemble(metadata, &dest, false))
    }
}

fn report(progress: &Option<ProgressCallback>, value: f64) {
    if let Some(cb) = progress {
        cb(value);
    }
}

/// Copy a cached artifact to `output_path` if one was requested. Returns the path the caller should use.
fn deliver_copy(artifact: &Path, output_path: Option<&Path>) -> Result<PathBuf, ThumbnailError> {
    let Some(dest) = output_path else {
        return Ok(artifact.to_path_buf());
    };
    if dest == artifact {
        return Ok(dest.to_path_buf());
    }
    publish_with(dest, |tmp| fs::copy(artifact, tmp).map(|_| ()))?;
    Ok(dest.to_path_buf())
}

fn publish_bytes(bytes: &[u8], dest: &Path) -> Result<(), ThumbnailError> {
    publish_with(dest, |tmp| fs::write(tmp, bytes))
}

/// Write through a sibling temp file and rename, so `dest` is never partially written.
fn publish_with(
    dest: &Path,
    write: impl FnOnce(&Path) -> std::io::Result<()>,
) -> Result<(), ThumbnailError> {
    if let Some(parent) = dest.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent)?;
    }
    let tmp = sibling_temp_path(dest);
    let mut cleanup = TempCleanup::new();
    cleanup.add(tmp.clone());
    write(&tmp)?;
    fs::rename(&tmp, dest)?;
    cleanup.keep();
    log::debug!(target: "vidthumb::generator", "published {}", dest.display());
    Ok(())
}
