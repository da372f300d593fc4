pub mod control;
pub mod daemon;
pub mod status;
pub mod stream;

use std::path::PathBuf;

use anyhow::{Context, Result};
use splitlog_daemon::DaemonConfig;

/// Global `--config` / `--socket` options shared by every command.
#[derive(Debug, Clone)]
pub struct Target {
    pub config: Option<PathBuf>,
    pub socket: Option<PathBuf>,
}

impl Target {
    /// Load the daemon config, with `--socket` applied.
    pub fn load_config(&self) -> Result<DaemonConfig> {
        let mut config = DaemonConfig::load(self.config.as_deref())
            .context("failed to load daemon configuration")?;
        if let Some(socket) = &self.socket {
            config.socket = socket.clone();
        }
        Ok(config)
    }

    /// Socket to talk to; an explicit `--socket` skips loading the config.
    pub fn socket(&self) -> Result<PathBuf> {
        match &self.socket {
            Some(socket) => Ok(socket.clone()),
            None => Ok(self.load_config()?.socket),
        }
    }
}
