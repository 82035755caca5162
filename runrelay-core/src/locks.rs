//! Stale lock-file cleanup.
//!
//! Trainers leave `.lock` marker files next to vocabularies and caches. They
//! must not end up inside the uploaded artifact.

use std::io;
use std::path::{Path, PathBuf};

/// File name of a lock marker.
pub const LOCK_FILE_NAME: &str = ".lock";

/// Delete every file named `.lock` below `root`.
///
/// Files that vanish between the scan and the delete are skipped. A missing
/// `root` removes nothing. Returns the paths actually removed.
pub fn remove_stale_locks(root: &Path) -> io::Result<Vec<PathBuf>> {
    let mut removed = Vec::new();
    if !root.is_dir() {
        return Ok(removed);
    }

    for entry in walkdir::WalkDir::new(root).into_iter() {
        let entry = match entry {
            Ok(e) => e,
            Err(e) => {
                // Entries deleted mid-walk show up as NotFound.
                if e.io_error().map(|io| io.kind()) == Some(io::ErrorKind::NotFound) {
                    continue;
                }
                return Err(e
                    .into_io_error()
                    .unwrap_or_else(|| io::Error::other("directory walk failed")));
            }
        };
        if !entry.file_type().is_file() || entry.file_name() != LOCK_FILE_NAME {
            continue;
        }
        match std::fs::remove_file(entry.path()) {
            Ok(()) => {
                tracing::debug!(path = %entry.path().display(), "Removed stale lock file");
                removed.push(entry.into_path());
            }
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => return Err(e),
        }
    }

    Ok(removed)
}
