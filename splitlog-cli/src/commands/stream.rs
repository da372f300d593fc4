//! `splitlog start` / `splitlog stop`: per-stream control.

use std::collections::HashMap;

use anyhow::{Context, Result};
use clap::Args;

use splitlog_daemon::{request_start, request_stop, StreamInfo};

use super::Target;

#[derive(Args, Debug)]
pub struct StartArgs {
    /// Stream handle: path of the FIFO (or captured stream file) to read.
    pub file: String,

    /// Identifier of the producer, e.g. a container id.
    #[arg(long)]
    pub owner: String,

    /// Primary sink, relative to the daemon's base directory.
    #[arg(long)]
    pub stdout: Option<String>,

    /// Secondary sink, relative to the daemon's base directory.
    #[arg(long)]
    pub stderr: Option<String>,

    /// Extra stream option, repeatable.
    #[arg(long = "opt", value_name = "KEY=VALUE", value_parser = parse_key_value)]
    pub options: Vec<(String, String)>,
}

impl StartArgs {
    pub fn run(self, target: &Target) -> Result<()> {
        let socket = target.socket()?;
        let file = self.file.clone();
        request_start(&socket, self.file.clone(), self.into_info())
            .with_context(|| format!("failed to start logging for {file}"))?;
        println!("logging started for {file}");
        Ok(())
    }

    fn into_info(self) -> StreamInfo {
        let mut config: HashMap<String, String> = self.options.into_iter().collect();
        if let Some(stdout) = self.stdout {
            config.insert("stdout".to_string(), stdout);
        }
        if let Some(stderr) = self.stderr {
            config.insert("stderr".to_string(), stderr);
        }
        StreamInfo {
            container_id: self.owner,
            config,
        }
    }
}

#[derive(Args, Debug)]
pub struct StopArgs {
    /// Stream handle given to `splitlog start`.
    pub file: String,
}

impl StopArgs {
    pub fn run(self, target: &Target) -> Result<()> {
        let socket = target.socket()?;
        request_stop(&socket, self.file.clone())
            .with_context(|| format!("failed to stop logging for {}", self.file))?;
        println!("logging stopped for {}", self.file);
        Ok(())
    }
}

fn parse_key_value(raw: &str) -> std::result::Result<(String, String), String> {
    match raw.split_once('=') {
        Some((key, value)) if !key.is_empty() => Ok((key.to_string(), value.to_string())),
        _ => Err(format!("expected KEY=VALUE, got '{raw}'")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn key_value_splits_on_first_equals() {
        assert_eq!(
            parse_key_value("tag=a=b"),
            Ok(("tag".to_string(), "a=b".to_string()))
        );
        assert!(parse_key_value("novalue").is_err());
        assert!(parse_key_value("=x").is_err());
    }

    #[test]
    fn explicit_sinks_win_over_options() {
        let args = StartArgs {
            file: "/run/fifo".to_string(),
            owner: "c1".to_string(),
            stdout: Some("c1/out.log".to_string()),
            stderr: None,
            options: vec![
                ("stdout".to_string(), "other.log".to_string()),
                ("tag".to_string(), "web".to_string()),
            ],
        };
        let info = args.into_info();
        assert_eq!(info.container_id, "c1");
        assert_eq!(info.config["stdout"], "c1/out.log");
        assert_eq!(info.config["tag"], "web");
        assert!(!info.config.contains_key("stderr"));
    }
}
