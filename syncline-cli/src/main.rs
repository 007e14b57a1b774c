//! Syncline — live directory mirroring daemon.
//!
//! # Usage
//!
//! ```text
//! syncline start [--config <file>]
//! syncline stop
//! syncline status
//! syncline check [--config <file>]
//! ```

mod commands;

use anyhow::Result;
use clap::{Parser, Subcommand};

use commands::{check::CheckArgs, start::StartArgs, status::StatusArgs, stop::StopArgs};

#[derive(Parser, Debug)]
#[command(
    name = "syncline",
    version,
    about = "Mirror directory trees by running transfer commands on filesystem changes",
    long_about = None,
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Run the mirroring daemon in the foreground.
    Start(StartArgs),

    /// Request graceful daemon shutdown over the control socket.
    Stop(StopArgs),

    /// Print the daemon's watch status report.
    Status(StatusArgs),

    /// Validate a configuration file and print the resulting policy.
    Check(CheckArgs),
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    match cli.command {
        Commands::Start(args) => args.run(),
        Commands::Stop(args) => args.run(),
        Commands::Status(args) => args.run(),
        Commands::Check(args) => args.run(),
    }
}
