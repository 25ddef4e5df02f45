//! Clone registry: the in-memory model of one managed root.
//!
//! Rebuilt from the backend on every load, never persisted. Holds:
//! - clones ascending by id (id order == creation order, checked on load);
//! - the active clone id (none until the first activation);
//! - the highest id ever allocated, so destroyed ids are never handed out again.

use log::warn;
use std::path::{Path, PathBuf};

use crate::backend::SnapshotBackend;
use crate::clone::{
    format_id, parked_mountpoint, parse_id, parse_origin, snap_le, ZcmClone, PROP_LAST_ID,
};
use crate::error::{Result, ZcmError};

#[derive(Debug, Clone)]
pub struct CloneRegistry {
    zfs: String,
    path: PathBuf,
    clones: Vec<ZcmClone>,
    active: Option<u64>,
    last_id: u64,
}

impl CloneRegistry {
    /// Empty registry for a fresh root.
    pub fn empty(zfs: &str, path: &Path) -> Self {
        Self {
            zfs: zfs.to_string(),
            path: path.to_path_buf(),
            clones: Vec::new(),
            active: None,
            last_id: 0,
        }
    }

    /// Build the registry of root `zfs` managed at `path` from backend state.
    ///
    /// Children whose names are not ids are skipped with a warning.
    pub fn load(backend: &dyn SnapshotBackend, zfs: &str, path: &Path) -> Result<Self> {
        let mut reg = Self::empty(zfs, path);

        let prefix = format!("{}/", zfs);
        for child in backend.list_children(zfs)? {
            let id = match child.name.strip_prefix(&prefix).and_then(parse_id) {
                Some(id) => id,
                None => {
                    warn!("{}: skipping non-clone child {}", zfs, child.name);
                    continue;
                }
            };
            let origin_id = child
                .origin
                .as_deref()
                .and_then(|o| parse_origin(zfs, o))
                .map(|(owner, _)| owner);
            reg.clones.push(ZcmClone::new(
                id,
                child.name,
                parked_mountpoint(path, id),
                child.origin,
                origin_id,
                child.creation,
            ));
        }
        reg.clones.sort_by_key(|c| c.id);

        for w in reg.clones.windows(2) {
            if w[0].id == w[1].id {
                return Err(ZcmError::corrupt(zfs, format!("duplicate clone id {}", format_id(w[0].id))));
            }
            if w[1].creation < w[0].creation {
                return Err(ZcmError::corrupt(
                    zfs,
                    format!(
                        "clone {} is older than clone {}",
                        format_id(w[1].id),
                        format_id(w[0].id)
                    ),
                ));
            }
        }

        let live = backend.get_active(zfs, path)?;
        if live.len() > 1 {
            return Err(ZcmError::corrupt(
                zfs,
                format!("{} clones claim to be active: {}", live.len(), live.join(", ")),
            ));
        }
        if let Some(name) = live.first() {
            let id = reg
                .clones
                .iter()
                .find(|c| &c.zfs == name)
                .map(|c| c.id)
                .ok_or_else(|| ZcmError::corrupt(zfs, format!("active marker names unknown dataset {}", name)))?;
            reg.set_active(id);
        }

        if let Some(v) = backend.get_property(zfs, PROP_LAST_ID)? {
            reg.last_id = parse_id(&v)
                .ok_or_else(|| ZcmError::corrupt(zfs, format!("unparseable {} '{}'", PROP_LAST_ID, v)))?;
        }

        Ok(reg)
    }

    pub fn zfs(&self) -> &str {
        &self.zfs
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn clones(&self) -> &[ZcmClone] {
        &self.clones
    }

    pub fn ids(&self) -> Vec<u64> {
        self.clones.iter().map(|c| c.id).collect()
    }

    pub fn get(&self, id: u64) -> Option<&ZcmClone> {
        self.clones.iter().find(|c| c.id == id)
    }

    pub fn is_empty(&self) -> bool {
        self.clones.is_empty()
    }

    pub fn active_id(&self) -> Option<u64> {
        self.active
    }

    pub fn active_clone(&self) -> Option<&ZcmClone> {
        self.active.and_then(|id| self.get(id))
    }

    /// Clones older than the active one. Empty when nothing is active.
    pub fn older_clones(&self) -> &[ZcmClone] {
        match self.active {
            Some(a) => &self.clones[..self.clones.partition_point(|c| c.id < a)],
            None => &[],
        }
    }

    /// Clones newer than the active one. Every clone when nothing is active yet.
    pub fn newer_clones(&self) -> &[ZcmClone] {
        match self.active {
            Some(a) => &self.clones[self.clones.partition_point(|c| c.id <= a)..],
            None => &self.clones,
        }
    }

    /// Highest id ever allocated (persisted high-water mark or live max, whichever is larger).
    pub fn last_id(&self) -> u64 {
        let max = self.clones.last().map(|c| c.id).unwrap_or(0);
        max.max(self.last_id)
    }

    pub fn next_id(&self) -> u64 {
        self.last_id() + 1
    }

    /// Sum of clone sizes; each clone asks the backend at most once.
    pub fn size_total(&self, backend: &dyn SnapshotBackend) -> Result<u64> {
        let mut total = 0u64;
        for c in &self.clones {
            total = total.saturating_add(c.size(backend)?);
        }
        Ok(total)
    }

    // ---------- mutators (applied after the backend call succeeded) ----------

    pub(crate) fn push(&mut self, clone: ZcmClone) {
        self.last_id = self.last_id.max(clone.id);
        let pos = self.clones.partition_point(|c| c.id < clone.id);
        self.clones.insert(pos, clone);
    }

    pub(crate) fn remove(&mut self, id: u64) -> Option<ZcmClone> {
        let pos = self.clones.iter().position(|c| c.id == id)?;
        self.last_id = self.last_id.max(id);
        Some(self.clones.remove(pos))
    }

    /// Move the live pointer; mountpoints follow.
    pub(crate) fn set_active(&mut self, id: u64) {
        let path = self.path.clone();
        for c in self.clones.iter_mut() {
            if c.id == id {
                c.mountpoint = path.clone();
            } else if Some(c.id) == self.active {
                c.mountpoint = parked_mountpoint(&path, c.id);
            }
        }
        self.active = Some(id);
    }

    /// Mirror a backend promote of clone `id`:
    /// - snapshots of the parent up to the branch point now belong to `id`,
    ///   so siblings branched there are re-pointed;
    /// - the parent becomes a clone of `id`;
    /// - `id` inherits the parent's origin.
    ///
    /// Returns false (and changes nothing) when the parent is not in the registry.
    pub(crate) fn apply_promote(&mut self, id: u64) -> bool {
        let zfs = self.zfs.clone();
        let (promoted_zfs, parent_id, branch) = match self.get(id).and_then(|c| {
            let (owner, snap) = parse_origin(&zfs, c.origin.as_deref()?)?;
            Some((c.zfs.clone(), owner, snap))
        }) {
            Some(v) => v,
            None => return false,
        };
        let (parent_origin, parent_origin_id) = match self.get(parent_id) {
            Some(p) => (p.origin.clone(), p.origin_id),
            None => return false,
        };

        for c in self.clones.iter_mut() {
            if c.id == id || c.id == parent_id {
                continue;
            }
            let snap = match c.origin.as_deref().and_then(|o| parse_origin(&zfs, o)) {
                Some((owner, snap)) if owner == parent_id && snap_le(&snap, &branch) => snap,
                _ => continue,
            };
            c.origin = Some(format!("{}@{}", promoted_zfs, snap));
            c.origin_id = Some(id);
        }

        for c in self.clones.iter_mut() {
            if c.id == parent_id {
                c.origin = Some(format!("{}@{}", promoted_zfs, branch));
                c.origin_id = Some(id);
            } else if c.id == id {
                c.origin = parent_origin.clone();
                c.origin_id = parent_origin_id;
            }
        }
        true
    }
}
