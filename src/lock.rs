//! Per-root advisory locks (fs2) serializing zcm processes on one host.
//!
//! - Exclusive: mutating commands (create/activate/promote/destroy/gc/drop).
//! - Shared: read-only commands (information/list).
//!
//! Lock file path: <lock_dir>/<zfs with '/' replaced by '_'>.lock
//! Lock is released on Drop. Nothing here coordinates across hosts.

use anyhow::{Context, Result};
use fs2::FileExt;
use std::fs::OpenOptions;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LockMode {
    Shared,
    Exclusive,
}

pub struct LockGuard {
    file: std::fs::File,
    path: PathBuf,
    mode: LockMode,
}

impl LockGuard {
    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn mode(&self) -> LockMode {
        self.mode
    }
}

impl Drop for LockGuard {
    fn drop(&mut self) {
        let _ = FileExt::unlock(&self.file);
    }
}

/// Lock file for root dataset `zfs`.
pub fn lock_file_path(lock_dir: &Path, zfs: &str) -> PathBuf {
    lock_dir.join(format!("{}.lock", zfs.replace('/', "_")))
}

fn open_lock_file(path: &Path) -> Result<std::fs::File> {
    if let Some(dir) = path.parent() {
        std::fs::create_dir_all(dir)
            .with_context(|| format!("create lock dir {}", dir.display()))?;
    }
    OpenOptions::new()
        .create(true)
        .read(true)
        .write(true)
        .open(path)
        .with_context(|| format!("open lock file {}", path.display()))
}

/// Lock root `zfs`. With `wait` blocks until acquired, otherwise fails if busy.
pub fn lock_root(lock_dir: &Path, zfs: &str, mode: LockMode, wait: bool) -> Result<LockGuard> {
    let path = lock_file_path(lock_dir, zfs);
    let file = open_lock_file(&path)?;
    match (mode, wait) {
        // called through the trait: std::fs::File has inherent methods of the same names
        (LockMode::Shared, true) => FileExt::lock_shared(&file),
        (LockMode::Shared, false) => FileExt::try_lock_shared(&file),
        (LockMode::Exclusive, true) => FileExt::lock_exclusive(&file),
        (LockMode::Exclusive, false) => FileExt::try_lock_exclusive(&file),
    }
    .with_context(|| format!("{:?} lock on {} (root {} busy?)", mode, path.display(), zfs))?;
    Ok(LockGuard { file, path, mode })
}
