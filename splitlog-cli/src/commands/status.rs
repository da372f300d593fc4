//! `splitlog status`: daemon and per-stream visibility.

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use clap::Args;
use colored::Colorize;
use serde::Deserialize;
use tabled::{settings::Style, Table, Tabled};

use splitlog_core::StreamStatus;
use splitlog_daemon::{request_status, DaemonError};

use super::Target;

/// Arguments for `splitlog status`.
#[derive(Args, Debug)]
pub struct StatusArgs {
    /// Emit machine-readable JSON.
    #[arg(long)]
    pub json: bool,
}

impl StatusArgs {
    pub fn run(self, target: &Target) -> Result<()> {
        let socket = target.socket()?;
        let payload = match request_status(&socket) {
            Ok(payload) => payload,
            Err(DaemonError::DaemonNotRunning { .. }) => serde_json::json!({
                "running": false,
                "socket": socket.display().to_string(),
            }),
            Err(err) => return Err(err).context("failed to query daemon status"),
        };

        if self.json {
            println!(
                "{}",
                serde_json::to_string_pretty(&payload)
                    .context("failed to render daemon status JSON")?
            );
            return Ok(());
        }

        let report: StatusReport =
            serde_json::from_value(payload).context("unexpected daemon status payload")?;
        print_table(report, Utc::now());
        Ok(())
    }
}

#[derive(Debug, Deserialize)]
struct StatusReport {
    running: bool,
    socket: String,
    #[serde(default)]
    base_dir: Option<String>,
    #[serde(default)]
    streams: Vec<StreamStatus>,
}

#[derive(Tabled)]
struct StreamTableRow {
    #[tabled(rename = "stream")]
    handle: String,
    #[tabled(rename = "owner")]
    owner: String,
    #[tabled(rename = "state")]
    state: String,
    #[tabled(rename = "stdout")]
    primary: u64,
    #[tabled(rename = "stderr")]
    secondary: u64,
    #[tabled(rename = "anomalies")]
    anomalies: String,
    #[tabled(rename = "started")]
    started: String,
}

fn print_table(report: StatusReport, now: DateTime<Utc>) {
    if !report.running {
        println!(
            "{} daemon is not running (socket: {})",
            "■".bright_black().bold(),
            report.socket
        );
        return;
    }

    println!(
        "{} splitlog v{} | {} streams | base dir {}",
        "■".green().bold(),
        env!("CARGO_PKG_VERSION"),
        report.streams.len(),
        report.base_dir.as_deref().unwrap_or("-"),
    );

    if report.streams.is_empty() {
        println!("No streams are being collected.");
        return;
    }

    let rows: Vec<StreamTableRow> = report
        .streams
        .into_iter()
        .map(|stream| StreamTableRow {
            state: state_label(stream.running),
            anomalies: anomaly_summary(&stream),
            started: format_age(stream.started_at, now),
            primary: stream.counters.primary_records,
            secondary: stream.counters.secondary_records,
            handle: stream.handle.0,
            owner: stream.owner_id,
        })
        .collect();
    let mut table = Table::new(rows);
    table.with(Style::rounded());
    println!("{table}");
}

fn state_label(running: bool) -> String {
    if running {
        "RUNNING".green().bold().to_string()
    } else {
        "FINISHED".yellow().bold().to_string()
    }
}

fn anomaly_summary(stream: &StreamStatus) -> String {
    let c = &stream.counters;
    let mut parts = Vec::new();
    if c.decode_errors > 0 {
        parts.push(format!("{} decode", c.decode_errors));
    }
    let write_errors = c.primary_write_errors + c.secondary_write_errors;
    if write_errors > 0 {
        parts.push(format!("{write_errors} write"));
    }
    if c.unrouted > 0 {
        parts.push(format!("{} unrouted", c.unrouted));
    }
    if parts.is_empty() {
        "-".to_string()
    } else {
        parts.join(", ")
    }
}

fn format_age(started_at: DateTime<Utc>, now: DateTime<Utc>) -> String {
    let secs = (now - started_at).num_seconds().max(0);
    match secs {
        0..=59 => format!("{secs}s ago"),
        60..=3599 => format!("{}m ago", secs / 60),
        3600..=86_399 => format!("{}h ago", secs / 3600),
        _ => format!("{}d ago", secs / 86_400),
    }
}
