//! Centralized configuration for zcm.
//!
//! - ZcmConfig::from_env() reads the ZCM_* variables;
//! - fluent with_* setters let the CLI override individual values.
//!
//! Env:
//! - ZCM_ZFS_BIN   zfs executable (default "zfs")
//! - ZCM_LOCK_DIR  directory for per-root lock files (default "/var/run/zcm")
//! - ZCM_LOCK_WAIT 0|1: block on a busy root instead of failing (default 1)

use std::fmt;
use std::path::PathBuf;

pub const DEFAULT_ZFS_BIN: &str = "zfs";
pub const DEFAULT_LOCK_DIR: &str = "/var/run/zcm";

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ZcmConfig {
    /// zfs executable used by the ZfsCli backend.
    /// Env: ZCM_ZFS_BIN
    pub zfs_bin: String,

    /// Directory holding one lock file per managed root.
    /// Env: ZCM_LOCK_DIR
    pub lock_dir: PathBuf,

    /// Wait for a busy root lock (true) or fail immediately (false).
    /// Env: ZCM_LOCK_WAIT = 0|1|true|false (default true)
    pub lock_wait: bool,
}

impl Default for ZcmConfig {
    fn default() -> Self {
        Self {
            zfs_bin: DEFAULT_ZFS_BIN.to_string(),
            lock_dir: PathBuf::from(DEFAULT_LOCK_DIR),
            lock_wait: true,
        }
    }
}

fn parse_bool(v: &str) -> Option<bool> {
    match v.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}

impl ZcmConfig {
    /// Load configuration from environment variables.
    pub fn from_env() -> Self {
        Self::from_lookup(|k| std::env::var(k).ok())
    }

    /// Same as from_env, reading variables through `get`.
    pub fn from_lookup<F>(get: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut cfg = Self::default();

        if let Some(v) = get("ZCM_ZFS_BIN") {
            let s = v.trim();
            if !s.is_empty() {
                cfg.zfs_bin = s.to_string();
            }
        }

        if let Some(v) = get("ZCM_LOCK_DIR") {
            let s = v.trim();
            if !s.is_empty() {
                cfg.lock_dir = PathBuf::from(s);
            }
        }

        if let Some(b) = get("ZCM_LOCK_WAIT").as_deref().and_then(parse_bool) {
            cfg.lock_wait = b;
        }

        cfg
    }

    pub fn with_zfs_bin<S: Into<String>>(mut self, bin: Option<S>) -> Self {
        if let Some(b) = bin {
            self.zfs_bin = b.into();
        }
        self
    }

    pub fn with_lock_dir<P: Into<PathBuf>>(mut self, dir: Option<P>) -> Self {
        if let Some(d) = dir {
            self.lock_dir = d.into();
        }
        self
    }

    pub fn with_lock_wait(mut self, on: bool) -> Self {
        self.lock_wait = on;
        self
    }
}

impl fmt::Display for ZcmConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "ZcmConfig {{ zfs_bin: {}, lock_dir: {}, lock_wait: {} }}",
            self.zfs_bin,
            self.lock_dir.display(),
            self.lock_wait
        )
    }
}
