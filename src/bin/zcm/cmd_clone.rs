use anyhow::{Context, Result};
use std::path::PathBuf;

use zcm::clone::format_id;
use zcm::lock::LockMode;
use zcm::{ActivateLimits, CloneLimits};

use crate::util::Ctx;

pub fn exec_create(
    ctx: &Ctx,
    path: PathBuf,
    limits: CloneLimits,
    activate: bool,
) -> Result<()> {
    let (mut manager, _guard) = ctx.open(&path, LockMode::Exclusive)?;
    let clone = manager
        .create_clone(limits)
        .with_context(|| format!("create clone in {}", path.display()))?;
    println!("Created clone {} ({})", clone.name(), clone.zfs);
    if activate {
        manager
            .activate(clone.id, ActivateLimits::default())
            .with_context(|| format!("activate {}", clone.name()))?;
        println!("Activated clone {} at {}", clone.name(), path.display());
    }
    Ok(())
}

pub fn exec_activate(ctx: &Ctx, path: PathBuf, id: u64, limits: ActivateLimits) -> Result<()> {
    let (mut manager, _guard) = ctx.open(&path, LockMode::Exclusive)?;
    manager
        .activate(id, limits)
        .with_context(|| format!("activate {} in {}", format_id(id), path.display()))?;
    println!("Activated clone {} at {}", format_id(id), path.display());
    Ok(())
}

pub fn exec_promote(ctx: &Ctx, path: PathBuf, id: u64) -> Result<()> {
    let (mut manager, _guard) = ctx.open(&path, LockMode::Exclusive)?;
    manager
        .promote(id)
        .with_context(|| format!("promote {} in {}", format_id(id), path.display()))?;
    println!(
        "Promoted clone {}; {} clone(s) remain",
        format_id(id),
        manager.clones().len()
    );
    Ok(())
}
