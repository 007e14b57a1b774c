//! `syncline stop` — graceful shutdown over the control socket.

use anyhow::{Context, Result};
use clap::Args;

use syncline_daemon::{request_stop, DaemonError};

#[derive(Args, Debug)]
pub struct StopArgs {}

impl StopArgs {
    pub fn run(self) -> Result<()> {
        let home = dirs::home_dir().context("could not determine home directory")?;
        match request_stop(&home) {
            Ok(()) => println!("daemon stop requested"),
            Err(DaemonError::DaemonNotRunning { .. }) => {
                println!("daemon is not running");
            }
            Err(err) => return Err(err).context("failed to stop daemon"),
        }
        Ok(())
    }
}
