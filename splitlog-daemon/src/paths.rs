//! Filesystem layout: default locations and sink path preparation.

use std::fs::DirBuilder;
use std::os::unix::fs::{chown, DirBuilderExt};
use std::path::{Component, Path, PathBuf};

use splitlog_core::{Channel, SinkLocations, StreamMetadata};

use crate::config::DaemonConfig;
use crate::error::{io_err, DaemonError};

pub const DEFAULT_BASE_DIR: &str = "/var/log/splitlog";
pub const DEFAULT_SOCKET: &str = "/run/splitlog/splitlog.sock";
pub const CONFIG_FILE: &str = "config.yaml";

/// `<config_dir>/splitlog/config.yaml`, if the platform has a config dir.
pub fn default_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|dir| dir.join("splitlog").join(CONFIG_FILE))
}

/// Join a relative sink location under `base`.
///
/// Absolute paths and `..` components are rejected so that every sink stays
/// inside `base`.
pub fn resolve_sink_path(base: &Path, relative: &str) -> Result<PathBuf, DaemonError> {
    let invalid = |reason| DaemonError::InvalidSinkPath {
        path: relative.to_string(),
        reason,
    };

    let rel = Path::new(relative);
    if relative.trim().is_empty() {
        return Err(invalid("path is empty"));
    }
    let mut has_file_name = false;
    for component in rel.components() {
        match component {
            Component::Normal(_) => has_file_name = true,
            Component::CurDir => {}
            Component::ParentDir => return Err(invalid("'..' is not allowed")),
            Component::RootDir | Component::Prefix(_) => {
                return Err(invalid("path must be relative to the base directory"))
            }
        }
    }
    if !has_file_name || relative.ends_with('/') {
        return Err(invalid("path does not name a file"));
    }
    Ok(base.join(rel))
}

/// Resolve the sink locations named in `metadata`.
///
/// When both are present their parent directories are created under
/// `config.base_dir` (and chowned if an owner is configured). When either is
/// missing nothing is touched; the registry reports the missing side.
pub fn prepare_sinks(
    config: &DaemonConfig,
    metadata: &StreamMetadata,
) -> Result<SinkLocations, DaemonError> {
    let primary = metadata
        .sink_option(Channel::Primary)
        .map(|rel| resolve_sink_path(&config.base_dir, rel))
        .transpose()?;
    let secondary = metadata
        .sink_option(Channel::Secondary)
        .map(|rel| resolve_sink_path(&config.base_dir, rel))
        .transpose()?;

    if let (Some(primary), Some(secondary)) = (&primary, &secondary) {
        for path in [primary, secondary] {
            create_parent_dirs(config, path)?;
        }
    }

    Ok(SinkLocations { primary, secondary })
}

/// Chown both sink files to the configured owner.
pub fn chown_sinks(config: &DaemonConfig, sinks: &SinkLocations) -> Result<(), DaemonError> {
    if !config.has_ownership() {
        return Ok(());
    }
    for path in [&sinks.primary, &sinks.secondary].into_iter().flatten() {
        chown(path, config.uid, config.gid).map_err(|e| io_err(path, e))?;
    }
    Ok(())
}

/// Create every directory between `config.base_dir` and `path`'s parent,
/// chowning each component below the base when an owner is configured.
fn create_parent_dirs(config: &DaemonConfig, path: &Path) -> Result<(), DaemonError> {
    let Some(parent) = path.parent() else {
        return Ok(());
    };
    let relative = parent
        .strip_prefix(&config.base_dir)
        .map_err(|_| DaemonError::InvalidSinkPath {
            path: path.display().to_string(),
            reason: "path escapes the base directory",
        })?;

    let mut builder = DirBuilder::new();
    builder.mode(0o755);

    let mut current = config.base_dir.clone();
    for component in relative.components() {
        let Component::Normal(name) = component else {
            continue;
        };
        current.push(name);
        match std::fs::metadata(&current) {
            Ok(meta) if meta.is_dir() => {}
            Ok(_) => {
                return Err(DaemonError::InvalidSinkPath {
                    path: path.display().to_string(),
                    reason: "a parent component is not a directory",
                })
            }
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                builder.create(&current).map_err(|e| io_err(&current, e))?;
                tracing::debug!(path = %current.display(), "created sink directory");
            }
            Err(err) => return Err(io_err(&current, err)),
        }
        if config.has_ownership() {
            chown(&current, config.uid, config.gid).map_err(|e| io_err(&current, e))?;
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn config(base: &Path) -> DaemonConfig {
        DaemonConfig {
            base_dir: base.to_path_buf(),
            ..DaemonConfig::default()
        }
    }

    #[test]
    fn resolves_relative_paths_under_base() {
        let base = Path::new("/var/log/splitlog");
        assert_eq!(
            resolve_sink_path(base, "svc/./out.log").expect("resolve"),
            PathBuf::from("/var/log/splitlog/svc/out.log")
        );
    }

    #[test]
    fn rejects_paths_that_leave_base() {
        let base = Path::new("/var/log/splitlog");
        for bad in ["../etc/passwd", "svc/../../x", "/etc/passwd", "", "svc/", "."] {
            let err = resolve_sink_path(base, bad).unwrap_err();
            assert!(
                matches!(err, DaemonError::InvalidSinkPath { .. }),
                "{bad:?} should be rejected, got: {err}"
            );
        }
    }

    #[test]
    fn prepare_creates_nested_parent_directories() {
        let base = TempDir::new().expect("base");
        let meta = StreamMetadata::new("c1")
            .with_option("stdout", "app/web/out.log")
            .with_option("stderr", "app/err.log");

        let sinks = prepare_sinks(&config(base.path()), &meta).expect("prepare");
        assert_eq!(sinks.primary, Some(base.path().join("app/web/out.log")));
        assert!(base.path().join("app/web").is_dir());
        assert!(!base.path().join("app/web/out.log").exists(), "files are left to the registry");
    }

    #[test]
    fn prepare_touches_nothing_when_a_location_is_missing() {
        let base = TempDir::new().expect("base");
        let meta = StreamMetadata::new("c1").with_option("stdout", "lonely/out.log");

        let sinks = prepare_sinks(&config(base.path()), &meta).expect("prepare");
        assert!(sinks.secondary.is_none());
        assert!(!base.path().join("lonely").exists());
    }

    #[test]
    fn file_in_place_of_directory_is_rejected() {
        let base = TempDir::new().expect("base");
        std::fs::write(base.path().join("app"), b"not a dir").expect("write");
        let meta = StreamMetadata::new("c1")
            .with_option("stdout", "app/out.log")
            .with_option("stderr", "err.log");

        let err = prepare_sinks(&config(base.path()), &meta).unwrap_err();
        assert!(matches!(err, DaemonError::InvalidSinkPath { .. }), "got: {err}");
    }

    #[test]
    fn chown_is_skipped_without_configured_owner() {
        let base = TempDir::new().expect("base");
        let sinks = SinkLocations::new(base.path().join("absent-a"), base.path().join("absent-b"));
        chown_sinks(&config(base.path()), &sinks).expect("no-op");
    }
}
