use anyhow::{Context, Result};
use std::path::PathBuf;

use zcm::lock::LockMode;
use zcm::Manager;

use crate::util::Ctx;

pub fn exec(ctx: &Ctx, zfs: String, path: PathBuf) -> Result<()> {
    let _guard = ctx.lock(&zfs, LockMode::Exclusive)?;
    let manager = Manager::initialize(ctx.backend.clone(), &zfs, &path)
        .with_context(|| format!("initialize {} at {}", zfs, path.display()))?;
    println!(
        "Initialized zcm root {} at {}",
        manager.zfs(),
        manager.path().display()
    );
    Ok(())
}
