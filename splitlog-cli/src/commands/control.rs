//! `splitlog capabilities` and `splitlog shutdown`.

use anyhow::{Context, Result};

use splitlog_daemon::{request_capabilities, request_shutdown, DaemonError};

use super::Target;

#[derive(Debug, Clone, Copy)]
pub enum ControlCommand {
    Capabilities,
    Shutdown,
}

pub fn run(command: ControlCommand, target: &Target) -> Result<()> {
    let socket = target.socket()?;
    match command {
        ControlCommand::Capabilities => {
            let caps = request_capabilities(&socket).context("failed to query capabilities")?;
            println!(
                "{}",
                serde_json::to_string_pretty(&caps).context("failed to render capabilities")?
            );
        }
        ControlCommand::Shutdown => match request_shutdown(&socket) {
            Ok(()) => println!("daemon shutdown requested"),
            Err(DaemonError::DaemonNotRunning { .. }) => println!("daemon is not running"),
            Err(err) => return Err(err).context("failed to stop daemon"),
        },
    }
    Ok(())
}
