//! Discovering artifacts in the watched directory and judging stability.

use std::fs::{self, File, TryLockError};
use std::io;
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};

/// One file in the watched directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Artifact {
    pub path: PathBuf,
    /// Creation time, or last-write time where the filesystem has no birth time.
    pub created: SystemTime,
    pub modified: SystemTime,
}

impl Artifact {
    pub fn file_name(&self) -> String {
        self.path
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_default()
    }

    /// Old enough that the writer is done with it.
    pub fn is_settled(&self, now: SystemTime, minimum_age: Duration) -> bool {
        // A write stamped in the future (clock skew) counts as brand new.
        now.duration_since(self.modified)
            .is_ok_and(|age| age >= minimum_age)
    }
}

/// Files directly in `dir` with the given extension, oldest first.
///
/// Ties on creation time are broken by file name.
pub fn list_artifacts(dir: &Path, extension: &str) -> io::Result<Vec<Artifact>> {
    let mut artifacts = Vec::new();

    for entry in fs::read_dir(dir)? {
        let entry = entry?;
        let path = entry.path();
        let matches_ext = path
            .extension()
            .is_some_and(|e| e.to_string_lossy().eq_ignore_ascii_case(extension));
        if !matches_ext {
            continue;
        }

        // Vanished between listing and stat: the writer renamed it away.
        let Ok(meta) = entry.metadata() else {
            continue;
        };
        if !meta.is_file() {
            continue;
        }
        let modified = meta.modified()?;
        let created = meta.created().unwrap_or(modified);
        artifacts.push(Artifact {
            path,
            created,
            modified,
        });
    }

    artifacts.sort_by(|a, b| a.created.cmp(&b.created).then_with(|| a.path.cmp(&b.path)));
    Ok(artifacts)
}

/// Whether another process still holds the file.
///
/// A file that cannot be opened, or whose shared lock is refused, is locked.
pub fn is_locked(path: &Path) -> bool {
    let file = match File::open(path) {
        Ok(f) => f,
        Err(_) => return true,
    };
    match file.try_lock_shared() {
        Ok(()) => false,
        Err(TryLockError::WouldBlock) => true,
        // Filesystems without lock support: opening was enough.
        Err(TryLockError::Error(_)) => false,
    }
}
