//! `splitlog daemon`: run the collector in the foreground.

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Args;

use splitlog_daemon::{start_blocking, LogFormat};

use super::Target;

#[derive(Args, Debug)]
pub struct DaemonArgs {
    /// Directory sink paths are resolved under, overriding the config.
    #[arg(long)]
    pub base_dir: Option<PathBuf>,

    /// Also serve the Docker log driver plugin API on this socket.
    #[arg(long)]
    pub plugin_socket: Option<PathBuf>,

    /// Emit the daemon's own logs as JSON lines.
    #[arg(long)]
    pub json_logs: bool,
}

impl DaemonArgs {
    pub fn run(self, target: &Target) -> Result<()> {
        let mut config = target.load_config()?;
        if let Some(base_dir) = self.base_dir {
            anyhow::ensure!(
                base_dir.is_absolute(),
                "--base-dir must be absolute, got {}",
                base_dir.display()
            );
            config.base_dir = base_dir;
        }
        if let Some(plugin_socket) = self.plugin_socket {
            config.plugin_socket = Some(plugin_socket);
        }
        if self.json_logs {
            config.log_format = LogFormat::Json;
        }
        start_blocking(config).context("daemon exited with error")
    }
}
