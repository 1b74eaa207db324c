use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// archfinal - finalize a freshly installed Arch Linux target
#[derive(Parser)]
#[command(name = "archfinal")]
#[command(about = "Post-install finalization: keyring, microcode, orphans and snapshots")]
#[command(version)]
pub struct Cli {
    /// Dry-run mode: log mutating commands instead of running them.
    ///
    /// Read-only queries (installed packages, orphans) still run against the
    /// target so the preview is realistic.
    #[arg(long, global = true)]
    pub dry_run: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Run the finalization sequence against the target root
    Run {
        /// Path to a JSON configuration file
        #[arg(short, long)]
        config: Option<PathBuf>,

        /// Target root mount point (overrides the config file)
        #[arg(short, long)]
        root: Option<PathBuf>,

        /// Keyring to populate; repeat for several (overrides the config file)
        #[arg(short, long = "keyring")]
        keyrings: Vec<String>,
    },
    /// Validate a configuration file
    Validate {
        /// Path to configuration file to validate
        config: PathBuf,
    },
    /// List the finalization steps in execution order
    Steps,
}

impl Cli {
    pub fn parse_args() -> Self {
        Self::parse()
    }
}
