use anyhow::{bail, Context, Result};
use log::error;
use std::path::PathBuf;

use zcm::lock::LockMode;
use zcm::report::{clone_table, info_kv, info_table, to_json};
use zcm::{Manager, ManagerInfo};

use crate::util::Ctx;

/// Re-read a scanned root under its shared lock and summarize it.
fn locked_info(ctx: &Ctx, m: &mut Manager) -> Result<ManagerInfo> {
    let _guard = ctx.lock(m.zfs(), LockMode::Shared)?;
    m.reload()
        .with_context(|| format!("reload {} under lock", m.zfs()))?;
    m.info()
        .with_context(|| format!("read {}", m.path().display()))
}

/// Summaries of every readable root plus the number of roots that failed.
/// A failing root is logged and skipped.
fn collect(ctx: &Ctx, paths: &[PathBuf]) -> Result<(Vec<ManagerInfo>, usize)> {
    let mut infos = Vec::new();
    let mut failed = 0usize;

    let mut report = |r: Result<ManagerInfo>| match r {
        Ok(info) => infos.push(info),
        Err(e) => {
            error!("{:#}", e);
            failed += 1;
        }
    };

    if paths.is_empty() {
        let mut scan = Manager::get_managers(ctx.backend.clone())?;
        for m in scan.managers.iter_mut() {
            report(locked_info(ctx, m));
        }
        // get_managers already logged each skipped root
        failed += scan.errors.len();
    } else {
        for path in paths {
            report(ctx.open(path, LockMode::Shared).and_then(|(m, _guard)| {
                m.info()
                    .with_context(|| format!("read {}", path.display()))
            }));
        }
    }
    Ok((infos, failed))
}

pub fn exec(ctx: &Ctx, paths: Vec<PathBuf>, table: bool, json: bool) -> Result<()> {
    let (infos, failed) = collect(ctx, &paths)?;

    if json {
        println!("{}", to_json(&infos)?);
    } else if table {
        print!("{}", info_table(&infos));
    } else {
        for info in &infos {
            print!("{}", info_kv(info));
        }
    }

    if failed > 0 {
        bail!("{} root(s) could not be read", failed);
    }
    Ok(())
}

pub fn exec_list(ctx: &Ctx, path: PathBuf, json: bool) -> Result<()> {
    let (manager, _guard) = ctx.open(&path, LockMode::Shared)?;
    let rows = manager.clone_rows()?;
    if json {
        println!("{}", to_json(&rows)?);
    } else {
        print!("{}", clone_table(&rows));
    }
    Ok(())
}
