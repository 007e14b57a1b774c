//! `syncline check` — validate a configuration file.

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Args;

use syncline_core::config;
use syncline_daemon::paths::default_config_path;

#[derive(Args, Debug)]
pub struct CheckArgs {
    /// Configuration file; defaults to ~/.syncline/config.yaml.
    #[arg(long)]
    pub config: Option<PathBuf>,
}

impl CheckArgs {
    pub fn run(self) -> Result<()> {
        let home = dirs::home_dir().context("could not determine home directory")?;
        let path = self
            .config
            .unwrap_or_else(|| default_config_path(&home));

        let config = config::load(&path)
            .with_context(|| format!("configuration check failed for {}", path.display()))?;

        println!("config OK: {} syncs", config.syncs.len());
        for decl in &config.syncs {
            println!(
                "  {} -> {} (delay {}s, max {} processes)",
                decl.source.display(),
                decl.target,
                decl.delay,
                decl.max_processes,
            );
        }
        Ok(())
    }
}
