//! Scratch space for codec invocations.
//!
//! Each encode gets its own work directory under the system temp dir, removed
//! when the [`WorkDir`] is dropped. Directories left behind by a crashed process
//! are swept by [`cleanup_old_temp_files`].

use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

const WORK_DIR_PREFIX: &str = "vidthumb-work-";
/// Work directories older than this are considered abandoned.
pub const STALE_AFTER: Duration = Duration::from_secs(24 * 60 * 60);

static NEXT_WORK_ID: AtomicU64 = AtomicU64::new(0);

fn unique_token() -> String {
    let millis = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis();
    format!(
        "{}-{}-{}",
        millis,
        std::process::id(),
        NEXT_WORK_ID.fetch_add(1, Ordering::Relaxed)
    )
}

/// A private scratch directory, deleted with everything in it on drop.
#[derive(Debug)]
pub struct WorkDir {
    path: PathBuf,
}

impl WorkDir {
    pub fn new() -> io::Result<Self> {
        Self::new_in(&std::env::temp_dir())
    }

    pub fn new_in(parent: &Path) -> io::Result<Self> {
        let path = parent.join(format!("{}{}", WORK_DIR_PREFIX, unique_token()));
        fs::create_dir_all(&path)?;
        log::trace!(target: "vidthumb::ffmpeg::temp", "work dir {}", path.display());
        Ok(Self { path })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Path for a file inside the work directory. Nothing is created.
    pub fn file(&self, name: &str) -> PathBuf {
        self.path.join(name)
    }

    pub fn write(&self, name: &str, content: &[u8]) -> io::Result<PathBuf> {
        let path = self.file(name);
        fs::write(&path, content)?;
        Ok(path)
    }
}

impl Drop for WorkDir {
    fn drop(&mut self) {
        if let Err(e) = fs::remove_dir_all(&self.path) {
            log::debug!(
                target: "vidthumb::ffmpeg::temp",
                "could not remove work dir {}: {}",
                self.path.display(),
                e
            );
        }
    }
}

/// Removes the registered paths on drop unless [`TempCleanup::keep`] was called.
#[derive(Debug, Default)]
pub struct TempCleanup {
    paths: Vec<PathBuf>,
}

impl TempCleanup {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, path: PathBuf) {
        self.paths.push(path);
    }

    pub fn keep(mut self) {
        self.paths.clear();
    }
}

impl Drop for TempCleanup {
    fn drop(&mut self) {
        for path in &self.paths {
            let _ = fs::remove_file(path);
        }
    }
}

/// Name for a sibling temp file next to `dest`, for write-then-rename.
pub fn sibling_temp_path(dest: &Path) -> PathBuf {
    let name = dest
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    dest.with_file_name(format!(".{}.{}.tmp", name, unique_token()))
}

/// Remove work directories under `parent` older than `max_age`. Returns how many were removed.
pub fn cleanup_old_temp_files_in(parent: &Path, max_age: Duration) -> usize {
    let Ok(entries) = fs::read_dir(parent) else {
        return 0;
    };
    let now = SystemTime::now();
    let mut removed = 0;
    for entry in entries.flatten() {
        if !entry.file_name().to_string_lossy().starts_with(WORK_DIR_PREFIX) {
            continue;
        }
        let age = entry
            .metadata()
            .and_then(|m| m.modified())
            .ok()
            .and_then(|modified| now.duration_since(modified).ok());
        if age.is_some_and(|age| age >= max_age) && fs::remove_dir_all(entry.path()).is_ok() {
            removed += 1;
        }
    }
    if removed > 0 {
        log::info!(
            target: "vidthumb::ffmpeg::temp",
            "removed {} stale work dir(s) from {}",
            removed,
            parent.display()
        );
    }
    removed
}

/// Sweep stale work directories from the system temp dir.
pub fn cleanup_old_temp_files() -> usize {
    cleanup_old_temp_files_in(&std::env::temp_dir(), STALE_AFTER)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn work_dir_removed_on_drop() {
        let parent = tempfile::tempdir().unwrap();
        let path = {
            let work = WorkDir::new_in(parent.path()).unwrap();
            work.write("a.ppm", b"P6").unwrap();
            assert!(work.file("a.ppm").exists());
            work.path().to_path_buf()
        };
        assert!(!path.exists());
    }

    #[test]
    fn work_dirs_are_unique() {
        let parent = tempfile::tempdir().unwrap();
        let a = WorkDir::new_in(parent.path()).unwrap();
        let b = WorkDir::new_in(parent.path()).unwrap();
        assert_ne!(a.path(), b.path());
    }

    #[test]
    fn temp_cleanup_removes_unless_kept() {
        let dir = tempfile::tempdir().unwrap();
        let doomed = dir.path().join("doomed");
        let kept = dir.path().join("kept");
        fs::write(&doomed, b"x").unwrap();
        fs::write(&kept, b"x").unwrap();
        {
            let mut cleanup = TempCleanup::new();
            cleanup.add(doomed.clone());
        }
        let mut cleanup = TempCleanup::new();
        cleanup.add(kept.clone());
        cleanup.keep();
        assert!(!doomed.exists());
        assert!(kept.exists());
    }

    #[test]
    fn stale_sweep_only_touches_work_dirs() {
        let parent = tempfile::tempdir().unwrap();
        let work = WorkDir::new_in(parent.path()).unwrap();
        let work_path = work.path().to_path_buf();
        std::mem::forget(work);
        let other = parent.path().join("unrelated");
        fs::create_dir(&other).unwrap();

        assert_eq!(cleanup_old_temp_files_in(parent.path(), STALE_AFTER), 0);
        assert!(work_path.exists());
        assert_eq!(cleanup_old_temp_files_in(parent.path(), Duration::ZERO), 1);
        assert!(!work_path.exists());
        assert!(other.exists());
    }

    #[test]
    fn sibling_temp_is_hidden_and_beside_dest() {
        let tmp = sibling_temp_path(Path::new("/out/preview.gif"));
        assert_eq!(tmp.parent(), Some(Path::new("/out")));
        let name = tmp.file_name().unwrap().to_string_lossy().into_owned();
        assert!(name.starts_with(".preview.gif."));
    }
}
