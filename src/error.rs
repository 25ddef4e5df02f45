//! Typed errors for the clone manager.
//!
//! Every variant is recoverable by the caller: the CLI prints it and exits
//! non-zero, library users branch on the variant.

use std::path::PathBuf;
use thiserror::Error;

/// Result alias for manager/registry operations.
pub type Result<T> = std::result::Result<T, ZcmError>;

/// Result alias for snapshot backend calls.
pub type BackendResult<T> = std::result::Result<T, BackendError>;

/// Failure reported by a [`crate::backend::SnapshotBackend`] call.
#[derive(Debug, Clone, Error)]
#[error("{op} {target}: {detail}")]
pub struct BackendError {
    /// Backend operation that failed (e.g. "clone", "destroy").
    pub op: String,
    /// Dataset or snapshot the operation was applied to.
    pub target: String,
    /// Backend-provided message (stderr of the zfs tool, or a synthetic reason).
    pub detail: String,
}

impl BackendError {
    pub fn new(op: impl Into<String>, target: impl Into<String>, detail: impl Into<String>) -> Self {
        Self {
            op: op.into(),
            target: target.into(),
            detail: detail.into(),
        }
    }
}

#[derive(Debug, Error)]
pub enum ZcmError {
    #[error("{0} is not a zcm managed root")]
    NotAZcmRoot(PathBuf),

    #[error("already managed: {zfs} ({path})")]
    AlreadyManaged { zfs: String, path: PathBuf },

    #[error("clone registry of {zfs} is corrupt: {reason}")]
    RegistryCorrupt { zfs: String, reason: String },

    #[error("clone {0:08} not found")]
    CloneNotFound(u64),

    #[error("clone {0:08} is active; activate another clone before destroying it")]
    ActiveCloneDestroy(u64),

    #[error("clone {0:08} is already active")]
    AlreadyActive(u64),

    #[error("cannot promote clone {id:08}: {reason}")]
    InvalidPromotion { id: u64, reason: String },

    #[error("limit exceeded: {0}")]
    LimitExceeded(String),

    #[error("backend error: {0}")]
    Backend(#[from] BackendError),
}

impl ZcmError {
    pub(crate) fn corrupt(zfs: &str, reason: impl Into<String>) -> Self {
        ZcmError::RegistryCorrupt {
            zfs: zfs.to_string(),
            reason: reason.into(),
        }
    }
}
