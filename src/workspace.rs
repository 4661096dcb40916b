//! Workspace cleanup between independent runs

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

/// SQLite side files that belong to a store
const STORE_SUFFIXES: &[&str] = &["", "-wal", "-shm", "-journal"];

fn with_suffix(path: &Path, suffix: &str) -> PathBuf {
    let mut name = path.as_os_str().to_os_string();
    name.push(suffix);
    PathBuf::from(name)
}

fn remove_if_present(path: &Path) -> io::Result<bool> {
    match fs::remove_file(path) {
        Ok(()) => Ok(true),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(false),
        Err(e) => Err(e),
    }
}

/// Delete a store and its WAL/SHM/journal files; returns how many were removed
pub fn reset_store(db_path: impl AsRef<Path>) -> io::Result<usize> {
    let db_path = db_path.as_ref();
    let mut removed = 0;

    for suffix in STORE_SUFFIXES {
        if remove_if_present(&with_suffix(db_path, suffix))? {
            removed += 1;
        }
    }

    if removed > 0 {
        log::info!("Removed previous store: {} ({} files)", db_path.display(), removed);
    }
    Ok(removed)
}

/// Delete report files left by an earlier run
pub fn remove_stale_reports<P: AsRef<Path>>(paths: &[P]) -> io::Result<usize> {
    let mut removed = 0;
    for path in paths {
        if remove_if_present(path.as_ref())? {
            log::debug!("Removed stale report: {}", path.as_ref().display());
            removed += 1;
        }
    }
    Ok(removed)
}
