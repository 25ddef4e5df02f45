//! `zfs` command wrapper. Every operation shells out to the zfs tool and waits for it.

use log::{debug, warn};
use std::path::{Path, PathBuf};
use std::process::Command;

use super::{ChildDataset, SnapshotBackend};
use crate::error::{BackendError, BackendResult};

/// Low-level ZFS backend.
#[derive(Debug, Clone)]
pub struct ZfsCli {
    /// zfs executable (e.g. "zfs" or "/usr/sbin/zfs")
    bin: String,
}

impl Default for ZfsCli {
    fn default() -> Self {
        Self::new("zfs")
    }
}

impl ZfsCli {
    pub fn new(bin: impl Into<String>) -> Self {
        Self { bin: bin.into() }
    }

    pub fn bin(&self) -> &str {
        &self.bin
    }

    /// Run zfs and return stdout. Non-zero exit maps to BackendError with stderr.
    fn run(&self, op: &str, target: &str, args: &[&str]) -> BackendResult<String> {
        debug!("running {} {}", self.bin, args.join(" "));

        let output = Command::new(&self.bin)
            .args(args)
            .output()
            .map_err(|e| BackendError::new(op, target, format!("failed to execute {}: {}", self.bin, e)))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(BackendError::new(op, target, stderr.trim()));
        }

        Ok(String::from_utf8_lossy(&output.stdout).to_string())
    }

    fn mountpoint_of(&self, fs: &str) -> BackendResult<String> {
        let out = self.run("get", fs, &["get", "-H", "-o", "value", "mountpoint", fs])?;
        Ok(out.trim().to_string())
    }
}

/// Refuse to touch pool roots (names without a '/').
fn guard_not_pool(op: &str, fs: &str) -> BackendResult<()> {
    let dataset = fs.split('@').next().unwrap_or(fs);
    if !dataset.contains('/') {
        return Err(BackendError::new(
            op,
            fs,
            "refusing to operate on a pool root dataset",
        ));
    }
    Ok(())
}

impl SnapshotBackend for ZfsCli {
    fn create_snapshot(&self, fs: &str, name: &str) -> BackendResult<String> {
        let full = format!("{}@{}", fs, name);
        self.run("snapshot", &full, &["snapshot", &full])?;
        Ok(full)
    }

    fn clone_from_snapshot(
        &self,
        snapshot: &str,
        target: &str,
        mountpoint: &Path,
    ) -> BackendResult<()> {
        let mp = format!("mountpoint={}", mountpoint.display());
        self.run("clone", target, &["clone", "-o", &mp, snapshot, target])?;
        Ok(())
    }

    fn create_filesystem(&self, target: &str, mountpoint: &Path) -> BackendResult<()> {
        let mp = format!("mountpoint={}", mountpoint.display());
        self.run("create", target, &["create", "-p", "-o", &mp, target])?;
        Ok(())
    }

    fn destroy(&self, fs: &str) -> BackendResult<()> {
        guard_not_pool("destroy", fs)?;
        if fs.contains('@') {
            self.run("destroy", fs, &["destroy", fs])?;
        } else {
            self.run("destroy", fs, &["destroy", "-r", fs])?;
        }
        Ok(())
    }

    fn destroy_recursive(&self, fs: &str) -> BackendResult<()> {
        guard_not_pool("destroy", fs)?;
        self.run("destroy", fs, &["destroy", "-R", fs])?;
        Ok(())
    }

    fn rename(&self, fs: &str, new_name: &str) -> BackendResult<()> {
        self.run("rename", fs, &["rename", fs, new_name])?;
        Ok(())
    }

    fn promote(&self, fs: &str) -> BackendResult<()> {
        self.run("promote", fs, &["promote", fs])?;
        Ok(())
    }

    fn exists(&self, name: &str) -> BackendResult<bool> {
        match self.run("list", name, &["list", "-H", "-o", "name", "-t", "all", name]) {
            Ok(_) => Ok(true),
            Err(e) if e.detail.contains("does not exist") => Ok(false),
            Err(e) => Err(e),
        }
    }

    fn get_size(&self, fs: &str) -> BackendResult<u64> {
        let out = self.run("get", fs, &["get", "-Hp", "-o", "value", "used", fs])?;
        out.trim()
            .parse::<u64>()
            .map_err(|_| BackendError::new("get", fs, format!("unexpected used value '{}'", out.trim())))
    }

    fn list_children(&self, fs: &str) -> BackendResult<Vec<ChildDataset>> {
        let out = self.run(
            "list",
            fs,
            &[
                "list", "-H", "-p",
                "-o", "name,creation,origin",
                "-t", "filesystem",
                "-d", "1", fs,
            ],
        )?;
        Ok(parse_dataset_lines(&out)
            .into_iter()
            .filter(|d| d.name != fs)
            .collect())
    }

    fn describe(&self, fs: &str) -> BackendResult<ChildDataset> {
        let out = self.run(
            "list",
            fs,
            &["list", "-H", "-p", "-o", "name,creation,origin", "-t", "filesystem", fs],
        )?;
        parse_dataset_lines(&out)
            .into_iter()
            .next()
            .ok_or_else(|| BackendError::new("list", fs, "dataset not listed"))
    }

    fn get_active(&self, root: &str, path: &Path) -> BackendResult<Vec<String>> {
        let out = self.run(
            "list",
            root,
            &["list", "-H", "-o", "name,mountpoint", "-t", "filesystem", "-d", "1", root],
        )?;
        Ok(parse_mounted_at(&out, root, path))
    }

    fn set_active(
        &self,
        path: &Path,
        from: Option<(&str, &Path)>,
        to: &str,
    ) -> BackendResult<()> {
        let live = format!("mountpoint={}", path.display());
        let to_previous = self.mountpoint_of(to)?;

        if let Some((prev, park)) = from {
            let parked = format!("mountpoint={}", park.display());
            self.run("set", prev, &["set", &parked, prev])?;
        }

        if let Err(e) = self.run("set", to, &["set", &live, to]) {
            // Put everything back where it was; the previous live clone must stay live.
            let restore_to = format!("mountpoint={}", to_previous);
            if let Err(re) = self.run("set", to, &["set", &restore_to, to]) {
                warn!("failed to restore mountpoint of {}: {}", to, re);
            }
            if let Some((prev, _)) = from {
                if let Err(re) = self.run("set", prev, &["set", &live, prev]) {
                    warn!("failed to restore live mountpoint of {}: {}", prev, re);
                }
            }
            return Err(e);
        }
        Ok(())
    }

    fn get_property(&self, fs: &str, name: &str) -> BackendResult<Option<String>> {
        let out = self.run("get", fs, &["get", "-H", "-s", "local", "-o", "value", name, fs])?;
        let v = out.trim();
        if v.is_empty() || v == "-" {
            Ok(None)
        } else {
            Ok(Some(v.to_string()))
        }
    }

    fn set_property(&self, fs: &str, name: &str, value: &str) -> BackendResult<()> {
        let kv = format!("{}={}", name, value);
        self.run("set", fs, &["set", &kv, fs])?;
        Ok(())
    }

    fn list_with_property(&self, name: &str) -> BackendResult<Vec<(String, String)>> {
        let out = self.run(
            "get",
            name,
            &["get", "-H", "-s", "local", "-o", "name,value", "-t", "filesystem", name],
        )?;
        Ok(parse_property_lines(&out))
    }
}

/// Parse `zfs list -H -p -o name,creation,origin` output.
pub(crate) fn parse_dataset_lines(output: &str) -> Vec<ChildDataset> {
    let mut out = Vec::new();
    for line in output.lines() {
        let parts: Vec<&str> = line.split('\t').collect();
        if parts.len() < 3 {
            if !line.trim().is_empty() {
                warn!("skipping malformed zfs list line: {}", line);
            }
            continue;
        }
        let creation = match parts[1].trim().parse::<u64>() {
            Ok(c) => c,
            Err(_) => {
                warn!("skipping zfs list line with bad creation time: {}", line);
                continue;
            }
        };
        let origin = parts[2].trim();
        out.push(ChildDataset {
            name: parts[0].trim().to_string(),
            creation,
            origin: if origin.is_empty() || origin == "-" {
                None
            } else {
                Some(origin.to_string())
            },
        });
    }
    out
}

/// Names of children of `root` whose mountpoint is `path`.
pub(crate) fn parse_mounted_at(output: &str, root: &str, path: &Path) -> Vec<String> {
    output
        .lines()
        .filter_map(|line| line.split_once('\t'))
        .filter(|(name, _)| name.trim() != root)
        .filter(|(_, mp)| PathBuf::from(mp.trim()) == path)
        .map(|(name, _)| name.trim().to_string())
        .collect()
}

/// Parse `zfs get -H -o name,value` output; unset values ("-") are dropped.
pub(crate) fn parse_property_lines(output: &str) -> Vec<(String, String)> {
    output
        .lines()
        .filter_map(|line| line.split_once('\t'))
        .map(|(n, v)| (n.trim().to_string(), v.trim().to_string()))
        .filter(|(_, v)| !v.is_empty() && v != "-")
        .collect()
}
