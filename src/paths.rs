//! Collision-free destination paths and no-clobber moves.
//!
//! A destination that already exists gets a ` (n)` suffix before the
//! extension: `name.png`, `name (1).png`, `name (2).png`, ...
//!
//! Two artifacts in the same tick can compute the same name. [`Reservations`]
//! remembers what has been handed out so far, so the second one is suffixed
//! even though the first has not been moved yet.
//!
//! [`move_no_clobber`] never replaces an existing file. When the destination
//! shows up between resolution and move, it resolves again and retries.

use std::collections::HashSet;
use std::fs::{self, OpenOptions};
use std::io::{self, ErrorKind};
use std::path::{Path, PathBuf};

const MAX_MOVE_ATTEMPTS: usize = 8;

/// Paths handed out during one batch.
#[derive(Debug, Default)]
pub struct Reservations {
    taken: HashSet<PathBuf>,
}

impl Reservations {
    pub fn new() -> Self {
        Self::default()
    }

    /// Resolve `candidate` against the filesystem and this batch, and claim it.
    pub fn claim(&mut self, candidate: &Path) -> PathBuf {
        let path = resolve_with(candidate, |p| p.exists() || self.taken.contains(p));
        self.taken.insert(path.clone());
        path
    }

    /// Give a claimed path back, e.g. after the move it was meant for failed.
    pub fn release(&mut self, path: &Path) {
        self.taken.remove(path);
    }
}

/// First path at or after `candidate` that does not exist.
pub fn resolve_available_path(candidate: &Path) -> PathBuf {
    resolve_with(candidate, |p| p.exists())
}

fn resolve_with(candidate: &Path, mut is_taken: impl FnMut(&Path) -> bool) -> PathBuf {
    if !is_taken(candidate) {
        return candidate.to_path_buf();
    }

    let stem = candidate
        .file_stem()
        .map(|s| s.to_string_lossy().to_string())
        .unwrap_or_default();
    let ext = candidate
        .extension()
        .map(|e| format!(".{}", e.to_string_lossy()))
        .unwrap_or_default();

    (1usize..)
        .map(|n| candidate.with_file_name(format!("{stem} ({n}){ext}")))
        .find(|p| !is_taken(p))
        .unwrap_or_else(|| candidate.to_path_buf())
}

/// Move `src` to `dst`, or to the next free variant if `dst` is taken.
///
/// Returns the path the file ended up at. The move is all-or-nothing: on
/// error the source is still in place and nothing was left at the target.
pub fn move_no_clobber(
    src: &Path,
    dst: &Path,
    reservations: &mut Reservations,
) -> io::Result<PathBuf> {
    let base = unsuffixed(dst);
    let mut target = dst.to_path_buf();

    for attempt in 1..=MAX_MOVE_ATTEMPTS {
        tracing::debug!(src = %src.display(), dst = %target.display(), attempt, "moving artifact");
        match place(src, &target) {
            Ok(()) => return Ok(target),
            Err(e) if e.kind() == ErrorKind::AlreadyExists => {
                // The lost path stays reserved; it is taken on disk anyway.
                target = reservations.claim(&base);
            }
            Err(e) => {
                reservations.release(&target);
                return Err(e);
            }
        }
    }

    reservations.release(&target);
    Err(io::Error::new(
        ErrorKind::AlreadyExists,
        format!(
            "no free destination for {} after {MAX_MOVE_ATTEMPTS} attempts",
            dst.display()
        ),
    ))
}

/// `dst` with a trailing ` (n)` removed from its stem.
fn unsuffixed(path: &Path) -> PathBuf {
    let Some(stem) = path.file_stem().map(|s| s.to_string_lossy().to_string()) else {
        return path.to_path_buf();
    };
    let base = stem
        .strip_suffix(')')
        .and_then(|s| s.rsplit_once(" ("))
        .filter(|(_, n)| !n.is_empty() && n.bytes().all(|b| b.is_ascii_digit()))
        .map(|(base, _)| base.to_string());

    match base {
        Some(base) => {
            let ext = path
                .extension()
                .map(|e| format!(".{}", e.to_string_lossy()))
                .unwrap_or_default();
            path.with_file_name(format!("{base}{ext}"))
        }
        None => path.to_path_buf(),
    }
}

/// Link-then-unlink on one filesystem; exclusive-create copy across them.
fn place(src: &Path, dst: &Path) -> io::Result<()> {
    match fs::hard_link(src, dst) {
        Ok(()) => fs::remove_file(src).inspect_err(|_| {
            let _ = fs::remove_file(dst);
        }),
        Err(e) if e.kind() == ErrorKind::AlreadyExists => Err(e),
        Err(_) => copy_exclusive(src, dst),
    }
}

fn copy_exclusive(src: &Path, dst: &Path) -> io::Result<()> {
    let mut reader = fs::File::open(src)?;
    let mut writer = OpenOptions::new().write(true).create_new(true).open(dst)?;
    let copied = io::copy(&mut reader, &mut writer).and_then(|_| writer.sync_all());
    if let Err(e) = copied {
        let _ = fs::remove_file(dst);
        return Err(e);
    }
    drop(writer);
    fs::remove_file(src).inspect_err(|_| {
        let _ = fs::remove_file(dst);
    })
}
