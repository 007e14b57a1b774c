//! `syncline status` — print the daemon's watch status report.

use anyhow::{Context, Result};
use clap::Args;

use syncline_daemon::{request_status, DaemonError};

#[derive(Args, Debug)]
pub struct StatusArgs {}

impl StatusArgs {
    pub fn run(self) -> Result<()> {
        let home = dirs::home_dir().context("could not determine home directory")?;
        match request_status(&home) {
            Ok(report) => print!("{report}"),
            Err(DaemonError::DaemonNotRunning { .. }) => {
                println!("daemon is not running");
            }
            Err(err) => return Err(err).context("failed to query daemon status"),
        }
        Ok(())
    }
}
