//! Daemon configuration.
//!
//! Loaded from YAML; every field is optional:
//!
//! ```yaml
//! base_dir: /var/log/splitlog
//! socket: /run/splitlog/splitlog.sock
//! plugin_socket: /run/docker/plugins/splitlog.sock
//! uid: 1000
//! gid: 1000
//! max_frame_bytes: 1000000
//! log_format: json
//! ```
//!
//! The `uid` and `gid` environment variables take precedence over the file.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use splitlog_core::{RegistryOptions, MAX_FRAME_BYTES};

use crate::error::{io_err, DaemonError};
use crate::paths::{default_config_path, DEFAULT_BASE_DIR, DEFAULT_SOCKET};

/// Output format of the daemon's own diagnostics.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Text,
    Json,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct DaemonConfig {
    /// Directory every sink path is resolved under.
    pub base_dir: PathBuf,
    /// Control socket path.
    pub socket: PathBuf,
    /// Docker log driver plugin socket; the plugin API is off when unset.
    pub plugin_socket: Option<PathBuf>,
    /// Owner applied to created sink directories and files.
    pub uid: Option<u32>,
    pub gid: Option<u32>,
    pub max_frame_bytes: usize,
    pub log_format: LogFormat,
}

impl Default for DaemonConfig {
    fn default() -> Self {
        Self {
            base_dir: PathBuf::from(DEFAULT_BASE_DIR),
            socket: PathBuf::from(DEFAULT_SOCKET),
            plugin_socket: None,
            uid: None,
            gid: None,
            max_frame_bytes: MAX_FRAME_BYTES,
            log_format: LogFormat::default(),
        }
    }
}

impl DaemonConfig {
    /// Load the config at `path`, or the default location when `None`.
    ///
    /// An explicit path must exist; a missing default file yields defaults.
    /// Environment overrides are applied in both cases.
    pub fn load(path: Option<&Path>) -> Result<Self, DaemonError> {
        let config = match path {
            Some(path) => Self::from_file(path)?,
            None => match default_config_path() {
                Some(path) if path.exists() => Self::from_file(&path)?,
                _ => Self::default(),
            },
        };
        config.with_env_overrides(|key| std::env::var(key).ok())
    }

    pub fn from_file(path: &Path) -> Result<Self, DaemonError> {
        let raw = std::fs::read_to_string(path).map_err(|e| io_err(path, e))?;
        let config: Self = serde_yaml::from_str(&raw).map_err(|source| DaemonError::Config {
            path: path.to_path_buf(),
            source,
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Apply `uid` / `gid` from `lookup` (normally the process environment).
    pub fn with_env_overrides(
        mut self,
        lookup: impl Fn(&str) -> Option<String>,
    ) -> Result<Self, DaemonError> {
        if let Some(raw) = lookup("uid") {
            self.uid = Some(parse_id("uid", &raw)?);
        }
        if let Some(raw) = lookup("gid") {
            self.gid = Some(parse_id("gid", &raw)?);
        }
        Ok(self)
    }

    pub fn registry_options(&self) -> RegistryOptions {
        RegistryOptions {
            max_frame_bytes: self.max_frame_bytes,
        }
    }

    /// Whether created sink paths need to be chowned.
    pub fn has_ownership(&self) -> bool {
        self.uid.is_some() || self.gid.is_some()
    }

    fn validate(&self) -> Result<(), DaemonError> {
        if self.max_frame_bytes == 0 {
            return Err(DaemonError::InvalidConfig(
                "max_frame_bytes must be greater than zero".to_string(),
            ));
        }
        if u32::try_from(self.max_frame_bytes).is_err() {
            return Err(DaemonError::InvalidConfig(format!(
                "max_frame_bytes {} exceeds the 4-byte length prefix",
                self.max_frame_bytes
            )));
        }
        if !self.base_dir.is_absolute() {
            return Err(DaemonError::InvalidConfig(format!(
                "base_dir must be absolute, got {}",
                self.base_dir.display()
            )));
        }
        Ok(())
    }
}

fn parse_id(key: &str, raw: &str) -> Result<u32, DaemonError> {
    raw.trim().parse().map_err(|err| {
        DaemonError::InvalidConfig(format!("failed to convert the {key} env var '{raw}' to an int: {err}"))
    })
}
