//! zcm: ordered clone lifecycle manager over ZFS snapshots.
//!
//! A managed root dataset holds clones named by zero-padded ids; exactly one
//! of them is live at the managed path once a clone has been activated.

// Core model
pub mod clone;    // ids, names, mountpoint layout, ZcmClone
pub mod registry; // CloneRegistry (derived from backend state)
pub mod manager;  // src/manager/{mod,ops}.rs

// Storage backends
pub mod backend;  // src/backend/{mod,zfs,memory}.rs

// Ambient
pub mod config;
pub mod error;
pub mod lock;
pub mod report;
pub mod util;     // src/util/mod.rs

pub use backend::{ChildDataset, MemoryBackend, SnapshotBackend, ZfsCli};
pub use clone::ZcmClone;
pub use config::ZcmConfig;
pub use error::{BackendError, Result, ZcmError};
pub use manager::{ActivateLimits, CloneLimits, Manager, ManagerScan};
pub use registry::CloneRegistry;
pub use report::{CloneRow, ManagerInfo};
