//! Read-only summaries of managed roots, rendered for the CLI.
//!
//! - ManagerInfo: one row per root (table, key/value block or JSON).
//! - CloneRow: one row per clone of a root (`zcm list`).

use serde::Serialize;
use std::path::PathBuf;

use crate::clone::format_id;
use crate::error::Result;
use crate::manager::Manager;
use crate::util::format_size;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ManagerInfo {
    pub path: PathBuf,
    pub zfs: String,
    /// Total bytes used by all clones.
    pub size: u64,
    pub total: usize,
    pub older: usize,
    pub newer: usize,
    pub oldest: Option<u64>,
    pub active: Option<u64>,
    pub newest: Option<u64>,
    pub next_id: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CloneRow {
    pub id: u64,
    pub zfs: String,
    pub mountpoint: PathBuf,
    pub origin: Option<String>,
    pub origin_id: Option<u64>,
    pub creation: u64,
    pub size: u64,
    pub active: bool,
}

impl Manager {
    /// Summary of this root. Fetches every clone size (once).
    pub fn info(&self) -> Result<ManagerInfo> {
        let reg = self.registry();
        Ok(ManagerInfo {
            path: self.path().to_path_buf(),
            zfs: self.zfs().to_string(),
            size: self.size()?,
            total: reg.clones().len(),
            older: reg.older_clones().len(),
            newer: reg.newer_clones().len(),
            oldest: reg.clones().first().map(|c| c.id),
            active: reg.active_id(),
            newest: reg.clones().last().map(|c| c.id),
            next_id: reg.next_id(),
        })
    }

    /// One row per clone, ascending by id.
    pub fn clone_rows(&self) -> Result<Vec<CloneRow>> {
        let active = self.registry().active_id();
        self.clones()
            .iter()
            .map(|c| -> Result<CloneRow> {
                Ok(CloneRow {
                    id: c.id,
                    zfs: c.zfs.clone(),
                    mountpoint: c.mountpoint.clone(),
                    origin: c.origin.clone(),
                    origin_id: c.origin_id,
                    creation: c.creation,
                    size: c.size(self.backend())?,
                    active: Some(c.id) == active,
                })
            })
            .collect()
    }
}

fn opt_id(id: Option<u64>) -> String {
    id.map(format_id).unwrap_or_else(|| "-".to_string())
}

// ---------- table ----------

const INFO_HEADER: [&str; 10] = [
    "PATH", "ZFS", "SIZE", "TOTAL", "OLDER", "NEWER", "OLDEST", "ACTIVE", "NEWEST", "NEXT",
];

const CLONE_HEADER: [&str; 6] = ["ID", "ACTIVE", "MOUNTPOINT", "ORIGIN", "CREATION", "SIZE"];

/// Left-aligned columns separated by two spaces, widths fitted to content.
fn render_table(header: &[&str], rows: &[Vec<String>]) -> String {
    let mut widths: Vec<usize> = header.iter().map(|h| h.len()).collect();
    for row in rows {
        for (w, cell) in widths.iter_mut().zip(row) {
            *w = (*w).max(cell.chars().count());
        }
    }

    let mut out = String::new();
    let mut push_row = |cells: Vec<&str>| {
        let line: Vec<String> = cells
            .iter()
            .zip(&widths)
            .map(|(c, w)| format!("{:<width$}", c, width = *w))
            .collect();
        out.push_str(line.join("  ").trim_end());
        out.push('\n');
    };
    push_row(header.to_vec());
    for row in rows {
        push_row(row.iter().map(|s| s.as_str()).collect());
    }
    out
}

pub fn info_table(infos: &[ManagerInfo]) -> String {
    let rows: Vec<Vec<String>> = infos
        .iter()
        .map(|i| {
            vec![
                i.path.display().to_string(),
                i.zfs.clone(),
                format_size(i.size),
                i.total.to_string(),
                i.older.to_string(),
                i.newer.to_string(),
                opt_id(i.oldest),
                opt_id(i.active),
                opt_id(i.newest),
                format_id(i.next_id),
            ]
        })
        .collect();
    render_table(&INFO_HEADER, &rows)
}

pub fn clone_table(rows: &[CloneRow]) -> String {
    let rows: Vec<Vec<String>> = rows
        .iter()
        .map(|r| {
            vec![
                format_id(r.id),
                if r.active { "*".to_string() } else { String::new() },
                r.mountpoint.display().to_string(),
                r.origin.clone().unwrap_or_else(|| "-".to_string()),
                r.creation.to_string(),
                format_size(r.size),
            ]
        })
        .collect();
    render_table(&CLONE_HEADER, &rows)
}

// ---------- key/value ----------

pub fn info_kv(info: &ManagerInfo) -> String {
    let mut out = String::new();
    out.push_str(&format!("{}\n", info.path.display()));
    out.push_str(&format!("  zfs     = {}\n", info.zfs));
    out.push_str(&format!("  size    = {} ({} bytes)\n", format_size(info.size), info.size));
    out.push_str(&format!("  total   = {}\n", info.total));
    out.push_str(&format!("  older   = {}\n", info.older));
    out.push_str(&format!("  newer   = {}\n", info.newer));
    out.push_str(&format!("  oldest  = {}\n", opt_id(info.oldest)));
    out.push_str(&format!("  active  = {}\n", opt_id(info.active)));
    out.push_str(&format!("  newest  = {}\n", opt_id(info.newest)));
    out.push_str(&format!("  next_id = {}\n", format_id(info.next_id)));
    out
}

// ---------- json ----------

pub fn to_json<T: Serialize + ?Sized>(value: &T) -> anyhow::Result<String> {
    Ok(serde_json::to_string_pretty(value)?)
}
