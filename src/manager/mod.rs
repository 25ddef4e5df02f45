//! Manager: the single entry point for a managed root.
//!
//! - mod.rs: construction (open/initialize/get_managers), read-only properties, dismantle.
//! - ops.rs: mutating clone operations (create/activate/promote/destroy/gc).
//!
//! A Manager owns one CloneRegistry and provides no internal locking; callers
//! that share a root across processes serialize through `crate::lock`.

use log::{info, warn};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::backend::SnapshotBackend;
use crate::clone::{root_mountpoint, ZcmClone, PROP_PATH};
use crate::error::{Result, ZcmError};
use crate::registry::CloneRegistry;

mod ops;

pub use ops::{ActivateLimits, CloneLimits};

/// Outcome of [`Manager::get_managers`]: healthy roots plus per-root failures.
pub struct ManagerScan {
    pub managers: Vec<Manager>,
    pub errors: Vec<(PathBuf, ZcmError)>,
}

pub struct Manager {
    backend: Arc<dyn SnapshotBackend>,
    registry: CloneRegistry,
}

impl std::fmt::Debug for Manager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Manager")
            .field("zfs", &self.registry.zfs())
            .field("path", &self.registry.path())
            .field("clones", &self.registry.ids())
            .field("active", &self.registry.active_id())
            .finish()
    }
}

/// Managed roots as (zfs, path).
fn managed_roots(backend: &dyn SnapshotBackend) -> Result<Vec<(String, PathBuf)>> {
    Ok(backend
        .list_with_property(PROP_PATH)?
        .into_iter()
        .map(|(zfs, p)| (zfs, PathBuf::from(p)))
        .collect())
}

impl Manager {
    /// Open the root managed at `path`.
    pub fn open(backend: Arc<dyn SnapshotBackend>, path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let zfs = managed_roots(&*backend)?
            .into_iter()
            .find(|(_, p)| p == path)
            .map(|(zfs, _)| zfs)
            .ok_or_else(|| ZcmError::NotAZcmRoot(path.to_path_buf()))?;
        let registry = CloneRegistry::load(&*backend, &zfs, path)?;
        Ok(Self { backend, registry })
    }

    /// Open every managed root. One broken root does not hide the others.
    pub fn get_managers(backend: Arc<dyn SnapshotBackend>) -> Result<ManagerScan> {
        let mut scan = ManagerScan {
            managers: Vec::new(),
            errors: Vec::new(),
        };
        let mut roots = managed_roots(&*backend)?;
        roots.sort_by(|a, b| a.1.cmp(&b.1));
        for (zfs, path) in roots {
            match CloneRegistry::load(&*backend, &zfs, &path) {
                Ok(registry) => scan.managers.push(Self {
                    backend: backend.clone(),
                    registry,
                }),
                Err(e) => {
                    warn!("skipping {} ({}): {}", path.display(), zfs, e);
                    scan.errors.push((path, e));
                }
            }
        }
        Ok(scan)
    }

    /// Turn `zfs` into a managed root for `path`. The new root has no clones.
    pub fn initialize(
        backend: Arc<dyn SnapshotBackend>,
        zfs: &str,
        path: impl AsRef<Path>,
    ) -> Result<Self> {
        let path = path.as_ref();
        if let Some((z, p)) = managed_roots(&*backend)?
            .into_iter()
            .find(|(z, p)| z == zfs || p == path)
        {
            return Err(ZcmError::AlreadyManaged { zfs: z, path: p });
        }

        backend.create_filesystem(zfs, &root_mountpoint(path))?;
        let path_value = path.to_string_lossy();
        if let Err(e) = backend.set_property(zfs, PROP_PATH, &path_value) {
            if let Err(de) = backend.destroy(zfs) {
                warn!("failed to remove half-initialized root {}: {}", zfs, de);
            }
            return Err(e.into());
        }
        info!("initialized {} for {}", zfs, path.display());

        Ok(Self {
            backend,
            registry: CloneRegistry::empty(zfs, path),
        })
    }

    /// Destroy the root and every clone under it.
    pub fn dismantle(self) -> Result<()> {
        let zfs = self.registry.zfs().to_string();
        self.backend.destroy_recursive(&zfs)?;
        info!("destroyed root {} ({})", zfs, self.registry.path().display());
        Ok(())
    }

    /// Rebuild the registry from the backend (drops cached sizes).
    pub fn reload(&mut self) -> Result<()> {
        self.registry = CloneRegistry::load(
            &*self.backend,
            self.registry.zfs(),
            self.registry.path(),
        )?;
        Ok(())
    }

    // ---------- read-only properties ----------

    pub fn path(&self) -> &Path {
        self.registry.path()
    }

    pub fn zfs(&self) -> &str {
        self.registry.zfs()
    }

    pub fn registry(&self) -> &CloneRegistry {
        &self.registry
    }

    pub fn backend(&self) -> &dyn SnapshotBackend {
        &*self.backend
    }

    pub fn clones(&self) -> &[ZcmClone] {
        self.registry.clones()
    }

    pub fn active_clone(&self) -> Option<&ZcmClone> {
        self.registry.active_clone()
    }

    pub fn older_clones(&self) -> &[ZcmClone] {
        self.registry.older_clones()
    }

    pub fn newer_clones(&self) -> &[ZcmClone] {
        self.registry.newer_clones()
    }

    pub fn next_id(&self) -> u64 {
        self.registry.next_id()
    }

    /// Total bytes used by all clones.
    pub fn size(&self) -> Result<u64> {
        self.registry.size_total(&*self.backend)
    }

    pub fn clone_size(&self, id: u64) -> Result<u64> {
        self.registry
            .get(id)
            .ok_or(ZcmError::CloneNotFound(id))?
            .size(&*self.backend)
    }
}
