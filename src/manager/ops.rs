//! Mutating clone operations.
//!
//! Order is always: backend call first, registry mirror second. A failed
//! backend call returns before the registry is touched.

use log::{debug, info, warn};

use super::Manager;
use crate::clone::{clone_dataset, format_id, parked_mountpoint, parse_origin, snap_le, ZcmClone, PROP_LAST_ID};
use crate::error::{Result, ZcmError};
use crate::util::now_secs;

/// Optional caps checked by [`Manager::create_clone`] before anything is created.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CloneLimits {
    /// Max clones newer than the active one after creation.
    pub max_newer: Option<usize>,
    /// Max clones in total after creation.
    pub max_total: Option<usize>,
}

/// Optional caps checked by [`Manager::activate`] against the resulting layout.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ActivateLimits {
    pub max_older: Option<usize>,
    pub max_newer: Option<usize>,
}

fn check_limit(what: &str, value: usize, max: Option<usize>) -> Result<()> {
    match max {
        Some(m) if value > m => Err(ZcmError::LimitExceeded(format!(
            "{} clones would be {} (max {})",
            what, value, m
        ))),
        _ => Ok(()),
    }
}

impl Manager {
    fn require(&self, id: u64) -> Result<&ZcmClone> {
        self.registry.get(id).ok_or(ZcmError::CloneNotFound(id))
    }

    /// Cut a new clone from the active one (or from the empty root when nothing
    /// is active). The new clone is not activated.
    pub fn create_clone(&mut self, limits: CloneLimits) -> Result<ZcmClone> {
        let total = self.registry.clones().len() + 1;
        let newer = self.registry.newer_clones().len() + 1;
        check_limit("total", total, limits.max_total)?;
        check_limit("newer", newer, limits.max_newer)?;

        let id = self.registry.next_id();
        let name = format_id(id);
        let target = clone_dataset(self.zfs(), id);
        // staged under a non-id name so a half-created clone never looks like a clone
        let staging = format!("{}.partial", target);
        let mountpoint = parked_mountpoint(self.path(), id);

        let source = self.registry.active_clone().map(|c| (c.id, c.zfs.clone()));
        self.clear_stale(&staging)?;
        if let Some((_, src)) = &source {
            self.clear_stale(&format!("{}@{}", src, name))?;
        }
        let origin = match &source {
            Some((_, src)) => {
                let snap = self.backend.create_snapshot(src, &name)?;
                if let Err(e) = self.backend.clone_from_snapshot(&snap, &staging, &mountpoint) {
                    self.release(&snap);
                    return Err(e.into());
                }
                Some(snap)
            }
            None => {
                self.backend.create_filesystem(&staging, &mountpoint)?;
                None
            }
        };

        if let Err(e) = self.backend.rename(&staging, &target) {
            self.release(&staging);
            if let Some(snap) = &origin {
                self.release(snap);
            }
            return Err(e.into());
        }

        // An unrecorded id could be handed out again once this clone is destroyed.
        if let Err(e) = self.backend.set_property(self.zfs(), PROP_LAST_ID, &name) {
            self.release(&target);
            if let Some(snap) = &origin {
                self.release(snap);
            }
            return Err(e.into());
        }

        let creation = match self.backend.describe(&target) {
            Ok(d) => d.creation,
            Err(e) => {
                warn!("failed to read creation of {}: {}", target, e);
                now_secs()
            }
        };

        let clone = ZcmClone::new(
            id,
            target,
            mountpoint,
            origin,
            source.map(|(sid, _)| sid),
            creation,
        );
        self.registry.push(clone.clone());
        info!("created clone {} of {}", name, self.zfs());
        Ok(clone)
    }

    /// Make clone `id` the live one. The previous active clone stays live if this fails.
    pub fn activate(&mut self, id: u64, limits: ActivateLimits) -> Result<()> {
        let to = self.require(id)?.zfs.clone();
        if self.registry.active_id() == Some(id) {
            return Err(ZcmError::AlreadyActive(id));
        }

        let older = self.registry.clones().iter().filter(|c| c.id < id).count();
        let newer = self.registry.clones().iter().filter(|c| c.id > id).count();
        check_limit("older", older, limits.max_older)?;
        check_limit("newer", newer, limits.max_newer)?;

        let from = self
            .registry
            .active_clone()
            .map(|c| (c.zfs.clone(), parked_mountpoint(self.path(), c.id)));
        self.backend.set_active(
            self.path(),
            from.as_ref().map(|(z, p)| (z.as_str(), p.as_path())),
            &to,
        )?;

        self.registry.set_active(id);
        info!("activated clone {} of {}", format_id(id), self.zfs());
        Ok(())
    }

    /// Make clone `id` independent of its ancestry and destroy every older clone.
    /// Irreversible. Ids are kept as they are.
    pub fn promote(&mut self, id: u64) -> Result<()> {
        self.require(id)?;
        let active = self.registry.active_id().ok_or_else(|| ZcmError::InvalidPromotion {
            id,
            reason: "no clone is active".to_string(),
        })?;
        if id > active {
            return Err(ZcmError::InvalidPromotion {
                id,
                reason: format!("newer than the active clone {}", format_id(active)),
            });
        }

        // Each promote moves the clone one step up its origin chain.
        while let Some(zfs) = self
            .registry
            .get(id)
            .filter(|c| c.origin_id.is_some())
            .map(|c| c.zfs.clone())
        {
            self.backend.promote(&zfs)?;
            if !self.registry.apply_promote(id) {
                self.reload()?;
            }
            debug!("promoted {}", zfs);
        }

        let older: Vec<u64> = self
            .registry
            .clones()
            .iter()
            .map(|c| c.id)
            .filter(|&c| c < id)
            .collect();
        for old in older {
            self.destroy(old)?;
        }

        self.reload()?;
        info!("promoted clone {} of {}", format_id(id), self.zfs());
        Ok(())
    }

    /// Destroy clone `id`. The active clone cannot be destroyed.
    pub fn destroy(&mut self, id: u64) -> Result<()> {
        let target = self.require(id)?.zfs.clone();
        if self.registry.active_id() == Some(id) {
            return Err(ZcmError::ActiveCloneDestroy(id));
        }

        // Clones branched from the target's snapshots would keep it alive;
        // hand those snapshots to the dependent branched last.
        let zfs = self.zfs().to_string();
        let heir = self
            .registry
            .clones()
            .iter()
            .filter(|c| c.origin_id == Some(id))
            .filter_map(|c| {
                let (_, snap) = parse_origin(&zfs, c.origin.as_deref()?)?;
                Some((c.id, c.zfs.clone(), snap))
            })
            .reduce(|a, b| if snap_le(&a.2, &b.2) { b } else { a });
        if let Some((heir_id, heir_zfs, _)) = heir {
            self.backend.promote(&heir_zfs)?;
            if !self.registry.apply_promote(heir_id) {
                self.reload()?;
            }
            debug!("promoted {} to release {}", heir_zfs, target);
        }

        self.backend.destroy(&target)?;
        let removed = self.registry.remove(id);
        info!("destroyed clone {} of {}", format_id(id), zfs);

        // The origin snapshot was taken for this clone only; drop it once unused.
        if let Some(origin) = removed.and_then(|c| c.origin) {
            let in_use = self
                .registry
                .clones()
                .iter()
                .any(|c| c.origin.as_deref() == Some(origin.as_str()));
            if !in_use {
                self.release(&origin);
            }
        }
        Ok(())
    }

    /// Destroy older clones, keeping the `keep` most recent ones. Returns destroyed ids.
    pub fn destroy_older(&mut self, keep: usize) -> Result<Vec<u64>> {
        let active = self.registry.active_id();
        let older: Vec<u64> = self.registry.older_clones().iter().map(|c| c.id).collect();
        let cut = older.len().saturating_sub(keep);
        let mut destroyed = Vec::new();
        for id in older.into_iter().take(cut) {
            if Some(id) == active {
                continue;
            }
            self.destroy(id)?;
            destroyed.push(id);
        }
        Ok(destroyed)
    }

    /// Destroy every clone newer than the active one. Returns destroyed ids.
    pub fn destroy_newer(&mut self) -> Result<Vec<u64>> {
        self.trim_newer(0)
    }

    /// Destroy newer clones beyond the `keep` oldest ones, newest first.
    fn trim_newer(&mut self, keep: usize) -> Result<Vec<u64>> {
        let active = self.registry.active_id();
        let newer: Vec<u64> = self.registry.newer_clones().iter().map(|c| c.id).collect();
        let mut destroyed = Vec::new();
        // newest first: leaves have no dependents
        for id in newer.into_iter().skip(keep).rev() {
            if Some(id) == active {
                continue;
            }
            self.destroy(id)?;
            destroyed.push(id);
        }
        Ok(destroyed)
    }

    /// Garbage collection: older clones beyond the `keep_older` most recent, and
    /// with `keep_newer` set, newer clones beyond the N oldest. Returns destroyed ids.
    pub fn gc(&mut self, keep_older: usize, keep_newer: Option<usize>) -> Result<Vec<u64>> {
        let mut destroyed = self.destroy_older(keep_older)?;
        if let Some(keep) = keep_newer {
            destroyed.extend(self.trim_newer(keep)?);
        }
        destroyed.sort_unstable();
        info!(
            "gc of {} removed {} clone(s)",
            self.zfs(),
            destroyed.len()
        );
        Ok(destroyed)
    }

    /// Remove `name` if an interrupted creation left it behind. Snapshots still
    /// used as an origin by a registered clone are left alone.
    fn clear_stale(&self, name: &str) -> Result<()> {
        if !self.backend.exists(name)? {
            return Ok(());
        }
        if self.clones().iter().any(|c| c.origin.as_deref() == Some(name)) {
            return Ok(());
        }
        warn!("removing leftover {} from an interrupted creation", name);
        self.backend.destroy(name)?;
        Ok(())
    }

    /// Best-effort removal of leftovers after a failed or finished operation.
    fn release(&self, name: &str) {
        if let Err(e) = self.backend.destroy(name) {
            warn!("failed to release {}: {}", name, e);
        }
    }
}
