//! Snapshot backend: the narrow capability interface the manager drives.
//!
//! - zfs.rs: `ZfsCli`, shells out to the `zfs` tool (blocking).
//! - memory.rs: `MemoryBackend`, in-process dataset/snapshot model with ZFS promote semantics.
//!
//! Backends hold no registry state. All calls are blocking; timeout policy,
//! if any, belongs to the implementation.

use std::path::Path;

use crate::error::BackendResult;

mod memory;
mod zfs;

pub use memory::MemoryBackend;
pub use zfs::ZfsCli;

/// A direct child filesystem of a root, as reported by the backend.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChildDataset {
    /// Full dataset name.
    pub name: String,
    /// Creation time, unix seconds.
    pub creation: u64,
    /// Origin snapshot for clones, None for independent filesystems.
    pub origin: Option<String>,
}

pub trait SnapshotBackend: Send + Sync {
    /// Snapshot `fs` as `fs@name`. Returns the full snapshot name.
    fn create_snapshot(&self, fs: &str, name: &str) -> BackendResult<String>;

    /// Clone `snapshot` into a new filesystem `target` mounted at `mountpoint`.
    fn clone_from_snapshot(&self, snapshot: &str, target: &str, mountpoint: &Path)
        -> BackendResult<()>;

    /// Create an empty filesystem `target` mounted at `mountpoint` (parents created as needed).
    fn create_filesystem(&self, target: &str, mountpoint: &Path) -> BackendResult<()>;

    /// Destroy a filesystem together with its own snapshots, or a single snapshot.
    /// Must fail if a snapshot being removed still has dependent clones.
    fn destroy(&self, fs: &str) -> BackendResult<()>;

    /// Destroy a filesystem, its descendants and every dependent clone.
    fn destroy_recursive(&self, fs: &str) -> BackendResult<()>;

    fn rename(&self, fs: &str, new_name: &str) -> BackendResult<()>;

    /// Reverse the clone/origin dependency of `fs` (ZFS promote).
    fn promote(&self, fs: &str) -> BackendResult<()>;

    /// Bytes used by `fs`.
    fn get_size(&self, fs: &str) -> BackendResult<u64>;

    /// Direct child filesystems of `fs`.
    fn list_children(&self, fs: &str) -> BackendResult<Vec<ChildDataset>>;

    /// Whether a filesystem or snapshot named `name` exists.
    fn exists(&self, name: &str) -> BackendResult<bool>;

    /// Describe a single filesystem.
    fn describe(&self, fs: &str) -> BackendResult<ChildDataset>;

    /// Children of `root` currently marked live (mounted at `path`).
    /// More than one entry means the on-disk state is inconsistent.
    fn get_active(&self, root: &str, path: &Path) -> BackendResult<Vec<String>>;

    /// Make `to` the live filesystem at `path`, parking `from` (if any) at its
    /// given mountpoint. Atomic for the caller: on failure the previous live
    /// filesystem is still live.
    fn set_active(
        &self,
        path: &Path,
        from: Option<(&str, &Path)>,
        to: &str,
    ) -> BackendResult<()>;

    /// Locally set user property, None when unset.
    fn get_property(&self, fs: &str, name: &str) -> BackendResult<Option<String>>;

    fn set_property(&self, fs: &str, name: &str, value: &str) -> BackendResult<()>;

    /// Every filesystem carrying user property `name`, as (dataset, value).
    fn list_with_property(&self, name: &str) -> BackendResult<Vec<(String, String)>>;
}
