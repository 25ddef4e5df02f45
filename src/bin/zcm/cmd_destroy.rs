use anyhow::{bail, Context, Result};
use std::path::PathBuf;

use zcm::clone::format_id;
use zcm::lock::LockMode;

use crate::util::Ctx;

pub fn exec_destroy(ctx: &Ctx, path: PathBuf, ids: Vec<u64>) -> Result<()> {
    let (mut manager, _guard) = ctx.open(&path, LockMode::Exclusive)?;
    for id in ids {
        manager
            .destroy(id)
            .with_context(|| format!("destroy {} in {}", format_id(id), path.display()))?;
        println!("Destroyed clone {}", format_id(id));
    }
    Ok(())
}

pub fn exec_gc(ctx: &Ctx, path: PathBuf, keep: usize, keep_newer: Option<usize>) -> Result<()> {
    let (mut manager, _guard) = ctx.open(&path, LockMode::Exclusive)?;
    let destroyed = manager
        .gc(keep, keep_newer)
        .with_context(|| format!("gc {}", path.display()))?;
    if destroyed.is_empty() {
        println!("Nothing to collect in {}", path.display());
    }
    for id in destroyed {
        println!("Destroyed clone {}", format_id(id));
    }
    Ok(())
}

pub fn exec_drop(ctx: &Ctx, path: PathBuf, yes: bool) -> Result<()> {
    if !yes {
        bail!("refusing to drop {} without --yes", path.display());
    }
    let (manager, _guard) = ctx.open(&path, LockMode::Exclusive)?;
    let zfs = manager.zfs().to_string();
    manager
        .dismantle()
        .with_context(|| format!("drop {}", path.display()))?;
    println!("Dropped zcm root {} ({})", zfs, path.display());
    Ok(())
}
