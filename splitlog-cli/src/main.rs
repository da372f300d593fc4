//! splitlog: collect framed container log streams into per-channel files.
//!
//! # Usage
//!
//! ```text
//! splitlog daemon
//! splitlog start <file> --owner <id> --stdout <path> --stderr <path> [--opt key=value]
//! splitlog stop <file>
//! splitlog status [--json]
//! splitlog capabilities
//! splitlog shutdown
//! ```
//!
//! `--config` and `--socket` apply to every command.

mod commands;

use std::path::PathBuf;

use anyhow::Result;
use clap::{Parser, Subcommand};

use commands::{
    control::ControlCommand, daemon::DaemonArgs, status::StatusArgs, stream::StartArgs,
    stream::StopArgs, Target,
};

// ---------------------------------------------------------------------------
// CLI entry point
// ---------------------------------------------------------------------------

#[derive(Parser, Debug)]
#[command(
    name = "splitlog",
    version,
    about = "Split framed log streams into stdout and stderr files",
    long_about = None,
)]
struct Cli {
    /// Daemon config file (defaults to <config dir>/splitlog/config.yaml).
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Control socket, overriding the configured one.
    #[arg(long, global = true)]
    socket: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Run the collection daemon in the foreground.
    Daemon(DaemonArgs),

    /// Start collecting a stream.
    Start(StartArgs),

    /// Stop collecting a stream.
    Stop(StopArgs),

    /// Show the daemon and its streams.
    Status(StatusArgs),

    /// Show what the daemon supports.
    Capabilities,

    /// Stop every stream and exit the daemon.
    Shutdown,
}

// ---------------------------------------------------------------------------
// Main
// ---------------------------------------------------------------------------

fn main() -> Result<()> {
    let cli = Cli::parse();
    let target = Target {
        config: cli.config,
        socket: cli.socket,
    };
    match cli.command {
        Commands::Daemon(args) => args.run(&target),
        Commands::Start(args) => args.run(&target),
        Commands::Stop(args) => args.run(&target),
        Commands::Status(args) => args.run(&target),
        Commands::Capabilities => commands::control::run(ControlCommand::Capabilities, &target),
        Commands::Shutdown => commands::control::run(ControlCommand::Shutdown, &target),
    }
}
