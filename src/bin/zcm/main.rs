use anyhow::Result;
use clap::Parser;
use env_logger::{Builder, Env};
use log::error;

use zcm::{ActivateLimits, CloneLimits, ZcmConfig};

mod cli;
mod cmd_clone;
mod cmd_destroy;
mod cmd_info;
mod cmd_init;
mod util;

fn init_logger() {
    // RUST_LOG wins, default is info. Example: RUST_LOG=debug zcm create /srv/app
    Builder::from_env(Env::default().default_filter_or("info"))
        .format_timestamp_millis()
        .init();
}

fn main() {
    init_logger();

    if let Err(e) = run() {
        error!("{:#}", e);
        std::process::exit(1);
    }
}

fn run() -> Result<()> {
    let cli = cli::Cli::parse();
    let cfg = ZcmConfig::from_env()
        .with_zfs_bin(cli.zfs_bin)
        .with_lock_dir(cli.lock_dir);
    let cfg = if cli.no_wait { cfg.with_lock_wait(false) } else { cfg };
    let ctx = util::Ctx::new(cfg);

    match cli.cmd {
        cli::Cmd::Init { zfs, path } => cmd_init::exec(&ctx, zfs, path),

        cli::Cmd::Information { paths, table, json } => cmd_info::exec(&ctx, paths, table, json),

        cli::Cmd::List { path, json } => cmd_info::exec_list(&ctx, path, json),

        cli::Cmd::Create { path, max_newer, max_total, activate } => cmd_clone::exec_create(
            &ctx,
            path,
            CloneLimits { max_newer, max_total },
            activate,
        ),

        cli::Cmd::Activate { path, id, max_older, max_newer } => cmd_clone::exec_activate(
            &ctx,
            path,
            id,
            ActivateLimits { max_older, max_newer },
        ),

        cli::Cmd::Promote { path, id } => cmd_clone::exec_promote(&ctx, path, id),

        cli::Cmd::Destroy { path, ids } => cmd_destroy::exec_destroy(&ctx, path, ids),

        cli::Cmd::Gc { path, keep, keep_newer } => cmd_destroy::exec_gc(&ctx, path, keep, keep_newer),

        cli::Cmd::Drop { path, yes } => cmd_destroy::exec_drop(&ctx, path, yes),
    }
}
