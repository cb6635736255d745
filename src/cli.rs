use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Debug, Parser)]
#[command(
    name = "corral",
    version,
    about = "Terminal front end for container-use environments: list, merge, and attach from one place"
)]
pub(crate) struct Cli {
    /// Directory the environment tool runs in. Defaults to the configured
    /// workspace root, falling back to the current directory.
    #[arg(long, global = true)]
    pub(crate) workspace: Option<PathBuf>,
    #[command(subcommand)]
    pub(crate) command: Commands,
}

#[derive(Debug, Subcommand)]
pub(crate) enum Commands {
    /// Run sanity checks and print remediation hints.
    Doctor,
    /// List environments reported by the tool.
    #[command(alias = "ls")]
    List {
        #[arg(long)]
        json: bool,
    },
    /// Delete an environment.
    #[command(alias = "rm")]
    Delete {
        /// Environment id as shown by `corral list`.
        id: String,
    },
    /// Merge an environment's work into the current branch.
    Merge { id: String },
    /// Check out an environment's branch locally.
    Checkout { id: String },
    /// Open a shell inside an environment via the shared session.
    Terminal { id: String },
    /// Tail an environment's activity log via the shared session.
    Log { id: String },
    /// Watch environment activity across the repository via the shared session.
    Watch,
    /// Interactive picker: list environments and act on them by index.
    Console,
}
