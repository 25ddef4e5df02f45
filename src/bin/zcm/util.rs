use anyhow::{Context, Result};
use log::debug;
use std::path::Path;
use std::sync::Arc;

use zcm::lock::{lock_root, LockGuard, LockMode};
use zcm::{Manager, SnapshotBackend, ZcmConfig, ZfsCli};

/// Shared state of one CLI invocation.
pub struct Ctx {
    pub cfg: ZcmConfig,
    pub backend: Arc<dyn SnapshotBackend>,
}

impl Ctx {
    pub fn new(cfg: ZcmConfig) -> Self {
        debug!("{}", cfg);
        let backend: Arc<dyn SnapshotBackend> = Arc::new(ZfsCli::new(cfg.zfs_bin.clone()));
        Self { cfg, backend }
    }

    pub fn lock(&self, zfs: &str, mode: LockMode) -> Result<LockGuard> {
        lock_root(&self.cfg.lock_dir, zfs, mode, self.cfg.lock_wait)
    }

    /// Open the root at `path` under its lock. The registry is reloaded once the
    /// lock is held, so it reflects whatever the previous holder left behind.
    pub fn open(&self, path: &Path, mode: LockMode) -> Result<(Manager, LockGuard)> {
        let mut manager = Manager::open(self.backend.clone(), path)
            .with_context(|| format!("open {}", path.display()))?;
        let guard = self.lock(manager.zfs(), mode)?;
        manager
            .reload()
            .with_context(|| format!("reload {} under lock", manager.zfs()))?;
        Ok((manager, guard))
    }
}
