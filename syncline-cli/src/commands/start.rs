//! `syncline start` — run the daemon in the foreground.

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Args;

use syncline_daemon::paths::default_config_path;

#[derive(Args, Debug)]
pub struct StartArgs {
    /// Configuration file; defaults to ~/.syncline/config.yaml.
    #[arg(long)]
    pub config: Option<PathBuf>,
}

impl StartArgs {
    pub fn run(self) -> Result<()> {
        let home = dirs::home_dir().context("could not determine home directory")?;
        let config = self
            .config
            .unwrap_or_else(|| default_config_path(&home));
        syncline_daemon::start_blocking(&home, &config).context("daemon exited with error")
    }
}
