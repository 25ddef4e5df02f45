//! Clone entries and the naming conventions of a managed root.
//!
//! Layout of a root `rpool/zcm/app` managed at `/srv/app`:
//! - rpool/zcm/app            mountpoint=/srv/app/.clones, zfs-clone-manager:path=/srv/app
//! - rpool/zcm/app/00000001   mountpoint=/srv/app/.clones/00000001   (inactive)
//! - rpool/zcm/app/00000002   mountpoint=/srv/app                    (active)
//! - rpool/zcm/app/00000001@00000002  origin snapshot of clone 2

use std::cell::OnceCell;
use std::path::{Path, PathBuf};

use crate::backend::SnapshotBackend;
use crate::error::Result;

/// User property on the root dataset holding the managed path (the sentinel).
pub const PROP_PATH: &str = "zfs-clone-manager:path";
/// User property on the root dataset holding the highest id ever allocated.
pub const PROP_LAST_ID: &str = "zfs-clone-manager:last-id";
/// Directory (relative to the managed path) where inactive clones are mounted.
pub const CLONES_DIR: &str = ".clones";

/// Clone id as it appears in dataset and snapshot names.
pub fn format_id(id: u64) -> String {
    format!("{:08}", id)
}

/// Parse a clone id from a dataset name component. Only plain ASCII digits are accepted.
pub fn parse_id(s: &str) -> Option<u64> {
    if s.is_empty() || !s.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    s.parse::<u64>().ok()
}

/// Full dataset name of clone `id` under `root`.
pub fn clone_dataset(root: &str, id: u64) -> String {
    format!("{}/{}", root, format_id(id))
}

/// Mountpoint of an inactive clone.
pub fn parked_mountpoint(path: &Path, id: u64) -> PathBuf {
    path.join(CLONES_DIR).join(format_id(id))
}

/// Mountpoint of the root dataset itself.
pub fn root_mountpoint(path: &Path) -> PathBuf {
    path.join(CLONES_DIR)
}

/// Split an origin snapshot `<root>/<owner>@<snap>` into (owner id, snapshot name).
/// Returns None when the owner is not a clone of `root`.
pub fn parse_origin(root: &str, origin: &str) -> Option<(u64, String)> {
    let (dataset, snap) = origin.split_once('@')?;
    let owner = dataset.strip_prefix(root)?.strip_prefix('/')?;
    Some((parse_id(owner)?, snap.to_string()))
}

/// Snapshot order: numeric when both names are ids, lexical otherwise.
pub(crate) fn snap_le(a: &str, b: &str) -> bool {
    match (parse_id(a), parse_id(b)) {
        (Some(x), Some(y)) => x <= y,
        _ => a <= b,
    }
}

/// One clone of a managed root.
///
/// Value-like: everything except the memoized size is fixed at load time.
/// `mountpoint` and `origin` follow activation and promotion through the
/// owning registry.
#[derive(Debug, Clone)]
pub struct ZcmClone {
    pub id: u64,
    pub zfs: String,
    pub mountpoint: PathBuf,
    pub origin: Option<String>,
    pub origin_id: Option<u64>,
    /// Creation time, unix seconds.
    pub creation: u64,
    size: OnceCell<u64>,
}

impl ZcmClone {
    pub fn new(
        id: u64,
        zfs: String,
        mountpoint: PathBuf,
        origin: Option<String>,
        origin_id: Option<u64>,
        creation: u64,
    ) -> Self {
        Self {
            id,
            zfs,
            mountpoint,
            origin,
            origin_id,
            creation,
            size: OnceCell::new(),
        }
    }

    /// Bytes used by this clone. Fetched once, then served from the cache.
    pub fn size(&self, backend: &dyn SnapshotBackend) -> Result<u64> {
        if let Some(v) = self.size.get() {
            return Ok(*v);
        }
        let v = backend.get_size(&self.zfs)?;
        let _ = self.size.set(v);
        Ok(v)
    }

    /// Cached size, if it was fetched already.
    pub fn cached_size(&self) -> Option<u64> {
        self.size.get().copied()
    }

    pub fn name(&self) -> String {
        format_id(self.id)
    }
}

impl PartialEq for ZcmClone {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
            && self.zfs == other.zfs
            && self.mountpoint == other.mountpoint
            && self.origin == other.origin
            && self.origin_id == other.origin_id
            && self.creation == other.creation
    }
}

impl Eq for ZcmClone {}
