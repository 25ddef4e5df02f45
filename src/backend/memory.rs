//! In-process backend: datasets, snapshots and origins kept in a map.
//!
//! Mirrors the ZFS rules the manager depends on:
//! - a snapshot with dependent clones cannot be destroyed;
//! - `promote` moves the origin's snapshots up to the branch point onto the
//!   promoted filesystem and reverses the dependency;
//! - creation times come from a logical clock, so they are strictly increasing.
//!
//! Failures can be injected per operation with [`MemoryBackend::fail_next`].

use std::collections::{BTreeMap, BTreeSet, HashSet};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};

use super::{ChildDataset, SnapshotBackend};
use crate::error::{BackendError, BackendResult};

#[derive(Debug, Clone)]
struct Dataset {
    creation: u64,
    origin: Option<String>,
    mountpoint: PathBuf,
    props: BTreeMap<String, String>,
    size: u64,
}

#[derive(Debug, Default)]
struct State {
    clock: u64,
    datasets: BTreeMap<String, Dataset>,
    // full snapshot name -> creation
    snapshots: BTreeMap<String, u64>,
    fail: HashSet<String>,
    size_calls: u64,
}

impl State {
    fn tick(&mut self) -> u64 {
        self.clock += 1;
        self.clock
    }

    fn check_fail(&mut self, op: &str, target: &str) -> BackendResult<()> {
        if self.fail.remove(op) {
            return Err(BackendError::new(op, target, "injected failure"));
        }
        Ok(())
    }

    fn dataset(&self, op: &str, fs: &str) -> BackendResult<&Dataset> {
        self.datasets
            .get(fs)
            .ok_or_else(|| BackendError::new(op, fs, "dataset does not exist"))
    }

    fn dataset_mut(&mut self, op: &str, fs: &str) -> BackendResult<&mut Dataset> {
        self.datasets
            .get_mut(fs)
            .ok_or_else(|| BackendError::new(op, fs, "dataset does not exist"))
    }

    fn ensure_parent(&self, op: &str, fs: &str) -> BackendResult<()> {
        match fs.rsplit_once('/') {
            // pools themselves are implicit
            Some((parent, _)) if parent.contains('/') => {
                if self.datasets.contains_key(parent) {
                    Ok(())
                } else {
                    Err(BackendError::new(op, fs, "parent does not exist"))
                }
            }
            _ => Ok(()),
        }
    }

    fn ensure_absent(&self, op: &str, fs: &str) -> BackendResult<()> {
        if self.datasets.contains_key(fs) {
            return Err(BackendError::new(op, fs, "dataset already exists"));
        }
        Ok(())
    }

    fn new_dataset(&mut self, origin: Option<String>, mountpoint: PathBuf) -> Dataset {
        Dataset {
            creation: self.tick(),
            origin,
            mountpoint,
            props: BTreeMap::new(),
            size: 0,
        }
    }

    /// `fs` and every dataset below it.
    fn subtree(&self, fs: &str) -> BTreeSet<String> {
        let prefix = format!("{}/", fs);
        self.datasets
            .keys()
            .filter(|k| k.as_str() == fs || k.starts_with(&prefix))
            .cloned()
            .collect()
    }

    fn snapshots_of<'a>(&'a self, set: &'a BTreeSet<String>) -> impl Iterator<Item = &'a String> + 'a {
        self.snapshots.keys().filter(move |s| {
            s.split_once('@')
                .map(|(ds, _)| set.contains(ds))
                .unwrap_or(false)
        })
    }

    fn remove_all(&mut self, set: &BTreeSet<String>) {
        let snaps: Vec<String> = self.snapshots_of(set).cloned().collect();
        for s in snaps {
            self.snapshots.remove(&s);
        }
        for ds in set {
            self.datasets.remove(ds);
        }
    }
}

#[derive(Debug, Default)]
pub struct MemoryBackend {
    state: Mutex<State>,
}

impl MemoryBackend {
    pub fn new() -> Self {
        let state = State {
            clock: 1_700_000_000,
            ..State::default()
        };
        Self {
            state: Mutex::new(state),
        }
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Make the next call of `op` fail (op names: "snapshot", "clone", "create",
    /// "destroy", "rename", "promote", "set_active", "set", "get", "list").
    pub fn fail_next(&self, op: &str) {
        self.lock().fail.insert(op.to_string());
    }

    pub fn exists(&self, name: &str) -> bool {
        let st = self.lock();
        st.datasets.contains_key(name) || st.snapshots.contains_key(name)
    }

    pub fn snapshots(&self) -> Vec<String> {
        self.lock().snapshots.keys().cloned().collect()
    }

    pub fn datasets(&self) -> Vec<String> {
        self.lock().datasets.keys().cloned().collect()
    }

    pub fn set_size(&self, fs: &str, bytes: u64) -> BackendResult<()> {
        self.lock().dataset_mut("set", fs)?.size = bytes;
        Ok(())
    }

    pub fn mountpoint(&self, fs: &str) -> Option<PathBuf> {
        self.lock().datasets.get(fs).map(|d| d.mountpoint.clone())
    }

    pub fn set_mountpoint(&self, fs: &str, mountpoint: &Path) -> BackendResult<()> {
        self.lock().dataset_mut("set", fs)?.mountpoint = mountpoint.to_path_buf();
        Ok(())
    }

    /// Insert a filesystem verbatim (no parent or origin checks), for seeding odd layouts.
    pub fn insert_filesystem(
        &self,
        name: &str,
        creation: u64,
        origin: Option<&str>,
        mountpoint: &Path,
    ) {
        let mut st = self.lock();
        st.datasets.insert(
            name.to_string(),
            Dataset {
                creation,
                origin: origin.map(|s| s.to_string()),
                mountpoint: mountpoint.to_path_buf(),
                props: BTreeMap::new(),
                size: 0,
            },
        );
    }

    /// Number of get_size calls served so far.
    pub fn size_calls(&self) -> u64 {
        self.lock().size_calls
    }
}

impl SnapshotBackend for MemoryBackend {
    fn create_snapshot(&self, fs: &str, name: &str) -> BackendResult<String> {
        let mut st = self.lock();
        let full = format!("{}@{}", fs, name);
        st.check_fail("snapshot", &full)?;
        st.dataset("snapshot", fs)?;
        if st.snapshots.contains_key(&full) {
            return Err(BackendError::new("snapshot", &full, "snapshot already exists"));
        }
        let t = st.tick();
        st.snapshots.insert(full.clone(), t);
        Ok(full)
    }

    fn clone_from_snapshot(
        &self,
        snapshot: &str,
        target: &str,
        mountpoint: &Path,
    ) -> BackendResult<()> {
        let mut st = self.lock();
        st.check_fail("clone", target)?;
        if !st.snapshots.contains_key(snapshot) {
            return Err(BackendError::new("clone", snapshot, "snapshot does not exist"));
        }
        st.ensure_absent("clone", target)?;
        st.ensure_parent("clone", target)?;
        let ds = st.new_dataset(Some(snapshot.to_string()), mountpoint.to_path_buf());
        st.datasets.insert(target.to_string(), ds);
        Ok(())
    }

    fn create_filesystem(&self, target: &str, mountpoint: &Path) -> BackendResult<()> {
        let mut st = self.lock();
        st.check_fail("create", target)?;
        st.ensure_absent("create", target)?;
        // -p: create missing ancestors below the pool
        let parts: Vec<&str> = target.split('/').collect();
        for i in 2..parts.len() {
            let ancestor = parts[..i].join("/");
            if !st.datasets.contains_key(&ancestor) {
                let mp = PathBuf::from(format!("/{}", ancestor));
                let ds = st.new_dataset(None, mp);
                st.datasets.insert(ancestor, ds);
            }
        }
        let ds = st.new_dataset(None, mountpoint.to_path_buf());
        st.datasets.insert(target.to_string(), ds);
        Ok(())
    }

    fn destroy(&self, fs: &str) -> BackendResult<()> {
        let mut st = self.lock();
        st.check_fail("destroy", fs)?;

        if fs.contains('@') {
            if !st.snapshots.contains_key(fs) {
                return Err(BackendError::new("destroy", fs, "snapshot does not exist"));
            }
            let dependents: Vec<&String> = st
                .datasets
                .iter()
                .filter(|(_, d)| d.origin.as_deref() == Some(fs))
                .map(|(n, _)| n)
                .collect();
            if !dependents.is_empty() {
                return Err(BackendError::new(
                    "destroy",
                    fs,
                    format!("snapshot has dependent clones: {:?}", dependents),
                ));
            }
            st.snapshots.remove(fs);
            return Ok(());
        }

        st.dataset("destroy", fs)?;
        let set = st.subtree(fs);
        let snaps: BTreeSet<String> = st.snapshots_of(&set).cloned().collect();
        let dependents: Vec<&String> = st
            .datasets
            .iter()
            .filter(|(n, d)| {
                !set.contains(*n)
                    && d.origin.as_ref().map(|o| snaps.contains(o)).unwrap_or(false)
            })
            .map(|(n, _)| n)
            .collect();
        if !dependents.is_empty() {
            return Err(BackendError::new(
                "destroy",
                fs,
                format!("filesystem has dependent clones: {:?}", dependents),
            ));
        }
        st.remove_all(&set);
        Ok(())
    }

    fn destroy_recursive(&self, fs: &str) -> BackendResult<()> {
        let mut st = self.lock();
        st.check_fail("destroy", fs)?;
        st.dataset("destroy", fs)?;

        let mut set = st.subtree(fs);
        loop {
            let snaps: BTreeSet<String> = st.snapshots_of(&set).cloned().collect();
            let extra: Vec<String> = st
                .datasets
                .iter()
                .filter(|(n, d)| {
                    !set.contains(*n)
                        && d.origin.as_ref().map(|o| snaps.contains(o)).unwrap_or(false)
                })
                .map(|(n, _)| n.clone())
                .collect();
            if extra.is_empty() {
                break;
            }
            for n in extra {
                let sub = st.subtree(&n);
                set.extend(sub);
            }
        }
        st.remove_all(&set);
        Ok(())
    }

    fn rename(&self, fs: &str, new_name: &str) -> BackendResult<()> {
        let mut st = self.lock();
        st.check_fail("rename", fs)?;
        st.dataset("rename", fs)?;
        st.ensure_absent("rename", new_name)?;
        st.ensure_parent("rename", new_name)?;

        if let Some(ds) = st.datasets.remove(fs) {
            st.datasets.insert(new_name.to_string(), ds);
        }

        let prefix = format!("{}@", fs);
        let moved: Vec<(String, u64)> = st
            .snapshots
            .iter()
            .filter(|(s, _)| s.starts_with(&prefix))
            .map(|(s, t)| (s.clone(), *t))
            .collect();
        for (old, t) in moved {
            st.snapshots.remove(&old);
            let renamed = format!("{}@{}", new_name, &old[prefix.len()..]);
            for d in st.datasets.values_mut() {
                if d.origin.as_deref() == Some(old.as_str()) {
                    d.origin = Some(renamed.clone());
                }
            }
            st.snapshots.insert(renamed, t);
        }
        Ok(())
    }

    fn promote(&self, fs: &str) -> BackendResult<()> {
        let mut st = self.lock();
        st.check_fail("promote", fs)?;

        let origin = st
            .dataset("promote", fs)?
            .origin
            .clone()
            .ok_or_else(|| BackendError::new("promote", fs, "not a cloned filesystem"))?;
        let (parent, branch) = origin
            .split_once('@')
            .map(|(p, s)| (p.to_string(), s.to_string()))
            .ok_or_else(|| BackendError::new("promote", fs, "malformed origin"))?;
        let branch_time = *st
            .snapshots
            .get(&origin)
            .ok_or_else(|| BackendError::new("promote", fs, "origin snapshot missing"))?;
        let parent_origin = st.dataset("promote", &parent)?.origin.clone();

        let prefix = format!("{}@", parent);
        let moved: Vec<(String, String, u64)> = st
            .snapshots
            .iter()
            .filter(|(s, t)| s.starts_with(&prefix) && **t <= branch_time)
            .map(|(s, t)| (s.clone(), s[prefix.len()..].to_string(), *t))
            .collect();

        for (_, snap, _) in &moved {
            let target = format!("{}@{}", fs, snap);
            if st.snapshots.contains_key(&target) {
                return Err(BackendError::new(
                    "promote",
                    fs,
                    format!("snapshot name conflict: {}", target),
                ));
            }
        }

        for (old, snap, t) in moved {
            st.snapshots.remove(&old);
            let renamed = format!("{}@{}", fs, snap);
            for (name, d) in st.datasets.iter_mut() {
                if name != fs && d.origin.as_deref() == Some(old.as_str()) {
                    d.origin = Some(renamed.clone());
                }
            }
            st.snapshots.insert(renamed, t);
        }

        st.dataset_mut("promote", &parent)?.origin = Some(format!("{}@{}", fs, branch));
        st.dataset_mut("promote", fs)?.origin = parent_origin;
        Ok(())
    }

    fn get_size(&self, fs: &str) -> BackendResult<u64> {
        let mut st = self.lock();
        st.check_fail("get", fs)?;
        st.size_calls += 1;
        Ok(st.dataset("get", fs)?.size)
    }

    fn list_children(&self, fs: &str) -> BackendResult<Vec<ChildDataset>> {
        let mut st = self.lock();
        st.check_fail("list", fs)?;
        st.dataset("list", fs)?;
        let prefix = format!("{}/", fs);
        Ok(st
            .datasets
            .iter()
            .filter(|(n, _)| {
                n.strip_prefix(&prefix)
                    .map(|rest| !rest.contains('/'))
                    .unwrap_or(false)
            })
            .map(|(n, d)| ChildDataset {
                name: n.clone(),
                creation: d.creation,
                origin: d.origin.clone(),
            })
            .collect())
    }

    fn exists(&self, name: &str) -> BackendResult<bool> {
        let mut st = self.lock();
        st.check_fail("list", name)?;
        Ok(st.datasets.contains_key(name) || st.snapshots.contains_key(name))
    }

    fn describe(&self, fs: &str) -> BackendResult<ChildDataset> {
        let mut st = self.lock();
        st.check_fail("list", fs)?;
        let d = st.dataset("list", fs)?;
        Ok(ChildDataset {
            name: fs.to_string(),
            creation: d.creation,
            origin: d.origin.clone(),
        })
    }

    fn get_active(&self, root: &str, path: &Path) -> BackendResult<Vec<String>> {
        let mut st = self.lock();
        st.check_fail("list", root)?;
        let prefix = format!("{}/", root);
        Ok(st
            .datasets
            .iter()
            .filter(|(n, d)| {
                n.strip_prefix(&prefix)
                    .map(|rest| !rest.contains('/'))
                    .unwrap_or(false)
                    && d.mountpoint == path
            })
            .map(|(n, _)| n.clone())
            .collect())
    }

    fn set_active(
        &self,
        path: &Path,
        from: Option<(&str, &Path)>,
        to: &str,
    ) -> BackendResult<()> {
        let mut st = self.lock();
        st.check_fail("set_active", to)?;
        st.dataset("set_active", to)?;
        if let Some((prev, park)) = from {
            st.dataset_mut("set_active", prev)?.mountpoint = park.to_path_buf();
        }
        st.dataset_mut("set_active", to)?.mountpoint = path.to_path_buf();
        Ok(())
    }

    fn get_property(&self, fs: &str, name: &str) -> BackendResult<Option<String>> {
        let mut st = self.lock();
        st.check_fail("get", fs)?;
        Ok(st.dataset("get", fs)?.props.get(name).cloned())
    }

    fn set_property(&self, fs: &str, name: &str, value: &str) -> BackendResult<()> {
        let mut st = self.lock();
        st.check_fail("set", fs)?;
        st.dataset_mut("set", fs)?
            .props
            .insert(name.to_string(), value.to_string());
        Ok(())
    }

    fn list_with_property(&self, name: &str) -> BackendResult<Vec<(String, String)>> {
        let mut st = self.lock();
        st.check_fail("list", name)?;
        Ok(st
            .datasets
            .iter()
            .filter_map(|(n, d)| d.props.get(name).map(|v| (n.clone(), v.clone())))
            .collect())
    }
}
