use clap::{ArgGroup, Parser, Subcommand};
use std::path::PathBuf;

/// ZFS clone manager CLI
#[derive(Parser, Debug)]
#[command(name = "zcm", version, about = "ZFS clone manager")]
pub struct Cli {
    /// zfs executable (overrides ZCM_ZFS_BIN)
    #[arg(long, global = true)]
    pub zfs_bin: Option<String>,

    /// Directory for per-root lock files (overrides ZCM_LOCK_DIR)
    #[arg(long, global = true)]
    pub lock_dir: Option<PathBuf>,

    /// Fail immediately when another zcm holds the root lock
    #[arg(long, global = true, default_value_t = false)]
    pub no_wait: bool,

    #[command(subcommand)]
    pub cmd: Cmd,
}

#[derive(Subcommand, Debug)]
pub enum Cmd {
    /// Create a managed root dataset for a path
    ///
    /// Example:
    ///   zcm init --zfs rpool/zcm/app /srv/app
    Init {
        /// Root dataset to create
        #[arg(long)]
        zfs: String,
        path: PathBuf,
    },
    /// Summaries of managed roots (all roots when no path is given)
    #[command(alias = "info", group(ArgGroup::new("format").args(["table", "json"])))]
    Information {
        paths: Vec<PathBuf>,
        #[arg(long, default_value_t = false)]
        table: bool,
        #[arg(long, default_value_t = false)]
        json: bool,
    },
    /// List the clones of a root
    #[command(alias = "ls")]
    List {
        path: PathBuf,
        #[arg(long, default_value_t = false)]
        json: bool,
    },
    /// Create a new clone from the active one
    #[command(alias = "clone")]
    Create {
        path: PathBuf,
        /// Refuse if there would be more than N clones newer than the active one
        #[arg(long)]
        max_newer: Option<usize>,
        /// Refuse if there would be more than N clones in total
        #[arg(long)]
        max_total: Option<usize>,
        /// Activate the new clone right away
        #[arg(long, default_value_t = false)]
        activate: bool,
    },
    /// Make a clone the live one at the managed path
    Activate {
        path: PathBuf,
        id: u64,
        /// Refuse if more than N clones would be older than the new active one
        #[arg(long)]
        max_older: Option<usize>,
        /// Refuse if more than N clones would be newer than the new active one
        #[arg(long)]
        max_newer: Option<usize>,
    },
    /// Make a clone independent and destroy every older clone (irreversible)
    Promote { path: PathBuf, id: u64 },
    /// Destroy inactive clones
    #[command(alias = "rm")]
    Destroy {
        path: PathBuf,
        #[arg(required = true)]
        ids: Vec<u64>,
    },
    /// Destroy older clones beyond a retention window
    ///
    /// Example (keep the 2 most recent older clones, drop every newer clone):
    ///   zcm gc /srv/app --keep 2 --keep-newer 0
    Gc {
        path: PathBuf,
        /// Older clones to keep (most recent first)
        #[arg(long, default_value_t = 0)]
        keep: usize,
        /// Also trim newer clones, keeping the N oldest of them
        #[arg(long)]
        keep_newer: Option<usize>,
    },
    /// Destroy the managed root and all its clones
    Drop {
        path: PathBuf,
        /// Required confirmation
        #[arg(long, default_value_t = false)]
        yes: bool,
    },
}
