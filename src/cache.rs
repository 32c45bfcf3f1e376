//! On-disk cache of finished artifacts, keyed by [`Fingerprint`].
//!
//! Layout per fingerprint: `<fp>.<gif|mp4>` (artifact) and `<fp>.json` (metadata).
//! Both are published by writing a hidden temp file in the cache directory and
//! renaming it into place, artifact first. A metadata file is therefore only
//! visible once its artifact is complete. No eviction.

use std::collections::HashMap;
use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, LazyLock, OnceLock};
use std::time::{Duration, SystemTime};

use parking_lot::{Mutex, MutexGuard};
use serde::{Deserialize, Serialize};

use crate::error::CacheError;
use crate::fingerprint::Fingerprint;
use crate::options::OutputFormat;
use crate::result::ThumbnailMetadata;

/// Bump when the metadata record layout changes. Older records read as misses.
const RECORD_VERSION: u32 = 1;
const DEFAULT_DIR_NAME: &str = "video_thumbnails";
pub const CACHE_DIR_ENV: &str = "VIDTHUMB_CACHE_DIR";

static DEFAULT_CACHE_DIR: OnceLock<PathBuf> = OnceLock::new();
static NEXT_TEMP_ID: AtomicU64 = AtomicU64::new(0);

/// Process-wide default cache root. `VIDTHUMB_CACHE_DIR` if set, else
/// `<temp>/video_thumbnails`. Resolved once.
pub fn default_cache_dir() -> &'static Path {
    DEFAULT_CACHE_DIR.get_or_init(|| {
        let dir = std::env::var_os(CACHE_DIR_ENV)
            .filter(|v| !v.is_empty())
            .map(PathBuf::from)
            .unwrap_or_else(|| std::env::temp_dir().join(DEFAULT_DIR_NAME));
        log::debug!(target: "vidthumb::cache", "default cache dir {}", dir.display());
        dir
    })
}

/// A published cache entry.
#[derive(Debug, Clone, PartialEq)]
pub struct CacheEntry {
    pub fingerprint: Fingerprint,
    pub artifact_path: PathBuf,
    pub metadata: ThumbnailMetadata,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CacheRecord {
    version: u32,
    fingerprint: String,
    artifact: String,
    #[serde(flatten)]
    metadata: ThumbnailMetadata,
}

#[derive(Debug, Clone)]
pub struct CacheStore {
    dir: PathBuf,
}

impl CacheStore {
    /// Open (creating if needed) the cache directory.
    pub fn open(dir: impl Into<PathBuf>) -> Result<Self, CacheError> {
        let dir = dir.into();
        fs::create_dir_all(&dir).map_err(|source| CacheError::Unwritable {
            path: dir.clone(),
            source,
        })?;
        Ok(Self { dir })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn artifact_path(&self, fingerprint: &Fingerprint, format: OutputFormat) -> PathBuf {
        self.dir
            .join(format!("{}.{}", fingerprint, format.extension()))
    }

    pub fn metadata_path(&self, fingerprint: &Fingerprint) -> PathBuf {
        self.dir.join(format!("{}.json", fingerprint))
    }

    /// A hit requires both a readable metadata record and its artifact.
    pub fn lookup(&self, fingerprint: &Fingerprint) -> Result<Option<CacheEntry>, CacheError> {
        let meta_path = self.metadata_path(fingerprint);
        let raw = match fs::read_to_string(&meta_path) {
            Ok(raw) => raw,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(e) => {
                return Err(CacheError::CorruptMetadata {
                    path: meta_path,
                    reason: e.to_string(),
                });
            }
        };
        let record: CacheRecord =
            serde_json::from_str(&raw).map_err(|e| CacheError::CorruptMetadata {
                path: meta_path.clone(),
                reason: e.to_string(),
            })?;

        if record.version != RECORD_VERSION {
            log::info!(
                target: "vidthumb::cache",
                "ignoring cache record {} with version {}",
                meta_path.display(),
                record.version
            );
            return Ok(None);
        }
        let expected_artifact = format!("{}.{}", fingerprint, record.metadata.format.extension());
        if record.fingerprint != fingerprint.as_str() || record.artifact != expected_artifact {
            return Err(CacheError::CorruptMetadata {
                path: meta_path,
                reason: format!(
                    "record names {} / {}, expected {} / {}",
                    record.fingerprint, record.artifact, fingerprint, expected_artifact
                ),
            });
        }

        let artifact_path = self.dir.join(&record.artifact);
        if !artifact_path.is_file() {
            log::debug!(
                target: "vidthumb::cache",
                "metadata without artifact for {}, treating as miss",
                fingerprint
            );
            return Ok(None);
        }

        Ok(Some(CacheEntry {
            fingerprint: fingerprint.clone(),
            artifact_path,
            metadata: record.metadata,
        }))
    }

    /// Publish an artifact and its metadata. Artifact first, metadata last.
    pub fn commit(
        &self,
        fingerprint: &Fingerprint,
        artifact: &[u8],
        metadata: &ThumbnailMetadata,
    ) -> Result<CacheEntry, CacheError> {
        let artifact_path = self.artifact_path(fingerprint, metadata.format);
        let record = CacheRecord {
            version: RECORD_VERSION,
            fingerprint: fingerprint.to_string(),
            artifact: format!("{}.{}", fingerprint, metadata.format.extension()),
            metadata: metadata.clone(),
        };
        let json = serde_json::to_vec_pretty(&record).map_err(|e| CacheError::CorruptMetadata {
            path: self.metadata_path(fingerprint),
            reason: e.to_string(),
        })?;

        self.publish(&artifact_path, artifact)?;
        self.publish(&self.metadata_path(fingerprint), &json)?;
        log::info!(
            target: "vidthumb::cache",
            "committed {} ({} bytes)",
            artifact_path.display(),
            artifact.len()
        );

        Ok(CacheEntry {
            fingerprint: fingerprint.clone(),
            artifact_path,
            metadata: metadata.clone(),
        })
    }

    /// Remove an entry's files. Used when its metadata turned out unreadable.
    pub fn discard(&self, fingerprint: &Fingerprint) {
        let _ = fs::remove_file(self.metadata_path(fingerprint));
        for format in [OutputFormat::Gif, OutputFormat::Mp4] {
            let _ = fs::remove_file(self.artifact_path(fingerprint, format));
        }
    }

    fn publish(&self, dest: &Path, bytes: &[u8]) -> Result<(), CacheError> {
        let unwritable = |source: io::Error| CacheError::Unwritable {
            path: self.dir.clone(),
            source,
        };
        let tmp = self.dir.join(hidden_temp_name(dest));
        let written = fs::File::create(&tmp)
            .and_then(|mut f| f.write_all(bytes).and_then(|()| f.sync_all()))
            .and_then(|()| fs::rename(&tmp, dest));
        if let Err(e) = written {
            let _ = fs::remove_file(&tmp);
            return Err(unwritable(e));
        }
        Ok(())
    }

    /// Per (cache dir, fingerprint) build lock for this process.
    pub fn build_lock(&self, fingerprint: &Fingerprint) -> BuildLock {
        BuildLock::acquire((self.dir.clone(), fingerprint.to_string()))
    }
}

fn is_hidden_temp_name(name: &str) -> bool {
    name.starts_with('.') && name.ends_with(".tmp")
}

/// Remove hidden publish temp files in `dir` older than `max_age`, left behind
/// by a process that died mid-commit. Artifacts and metadata are untouched.
pub fn sweep_stale_temp_files(dir: &Path, max_age: Duration) -> usize {
    let Ok(entries) = fs::read_dir(dir) else {
        return 0;
    };
    let now = SystemTime::now();
    let mut removed = 0;
    for entry in entries.flatten() {
        if !is_hidden_temp_name(&entry.file_name().to_string_lossy()) {
            continue;
        }
        let Ok(meta) = entry.metadata() else {
            continue;
        };
        let age = meta
            .modified()
            .ok()
            .and_then(|modified| now.duration_since(modified).ok());
        if meta.is_file()
            && age.is_some_and(|age| age >= max_age)
            && fs::remove_file(entry.path()).is_ok()
        {
            removed += 1;
        }
    }
    if removed > 0 {
        log::info!(
            target: "vidthumb::cache",
            "removed {} stale temp file(s) from {}",
            removed,
            dir.display()
        );
    }
    removed
}

fn hidden_temp_name(dest: &Path) -> String {
    let name = dest
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    format!(
        ".{}.{}-{}.tmp",
        name,
        std::process::id(),
        NEXT_TEMP_ID.fetch_add(1, Ordering::Relaxed)
    )
}

type LockKey = (PathBuf, String);

static BUILD_LOCKS: LazyLock<Mutex<HashMap<LockKey, Arc<Mutex<()>>>>> =
    LazyLock::new(|| Mutex::new(HashMap::new()));

/// Shared handle on one fingerprint's build mutex. The map entry is dropped
/// with the last handle.
pub struct BuildLock {
    key: LockKey,
    lock: Arc<Mutex<()>>,
}

impl BuildLock {
    fn acquire(key: LockKey) -> Self {
        let lock = BUILD_LOCKS
            .lock()
            .entry(key.clone())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone();
        Self { key, lock }
    }

    /// Block until no other build of this fingerprint is running.
    pub fn hold(&self) -> MutexGuard<'_, ()> {
        self.lock.lock()
    }
}

impl Drop for BuildLock {
    fn drop(&mut self) {
        let mut locks = BUILD_LOCKS.lock();
        // The map holds one reference, this handle the other.
        if Arc::strong_count(&self.lock) == 2 {
            locks.remove(&self.key);
        }
    }
}

#[cfg(test)]
fn build_lock_registered(key: &LockKey) -> bool {
    BUILD_LOCKS.lock().contains_key(key)
}
