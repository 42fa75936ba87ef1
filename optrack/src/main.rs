//! optrack - replay operation feeds through the progress tracker
//!
//! Reads a JSON-lines feed of operation events (as a live transport would
//! deliver them), drives an in-memory tracker, and prints the gated
//! notifications, final statistics and history.

mod replay;

use std::fs::File;
use std::io::BufReader;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use serde::Serialize;

use optrack_core::format::{format_duration, format_progress};
use optrack_core::{
    Config, HistoryEntry, NotificationGate, Operation, OperationKind, OperationStats,
    OperationTracker,
};

use replay::{parse_feed, Notice, Replayer};

#[derive(Parser)]
#[command(name = "optrack")]
#[command(about = "Track long-running backend operations from an event feed")]
#[command(version)]
struct Args {
    /// Config file (defaults to $XDG_CONFIG_HOME/optrack/config.toml)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Replay a JSON-lines operation feed
    Replay {
        /// Path to the feed file
        file: PathBuf,

        /// Output format
        #[arg(short, long, value_enum, default_value_t = OutputFormat::Text)]
        format: OutputFormat,

        /// Only show history entries for this resource
        #[arg(short, long)]
        resource: Option<String>,

        /// Maximum history entries to print
        #[arg(long, default_value_t = 20)]
        limit: usize,
    },
    /// Show the effective configuration
    Config,
}

#[derive(Clone, Copy, PartialEq, Eq, ValueEnum)]
enum OutputFormat {
    Text,
    Json,
}

#[derive(Serialize)]
struct ReplayReport<'a> {
    applied: usize,
    ignored: usize,
    notifications: &'a [Notice],
    stats: OperationStats,
    operations: Vec<&'a Operation>,
    history: Vec<HistoryEntry>,
}

fn main() -> Result<()> {
    let args = Args::parse();

    let config = match &args.config {
        Some(path) => Config::load_from(path)
            .with_context(|| format!("failed to load config from {}", path.display()))?,
        None => Config::load().context("failed to load configuration")?,
    };
    config.validate().context("invalid configuration")?;

    let _log_guard =
        optrack_core::logging::init(&config.logging).context("failed to initialize logging")?;

    match args.command {
        Command::Replay {
            file,
            format,
            resource,
            limit,
        } => run_replay(&config, &file, format, resource.as_deref(), limit),
        Command::Config => show_config(&config),
    }
}

fn run_replay(
    config: &Config,
    file: &Path,
    format: OutputFormat,
    resource: Option<&str>,
    limit: usize,
) -> Result<()> {
    let reader = BufReader::new(
        File::open(file).with_context(|| format!("failed to open feed {}", file.display()))?,
    );
    let events = parse_feed(reader).context("failed to parse feed")?;
    tracing::info!(file = %file.display(), events = events.len(), "Replaying feed");

    let tracker = Arc::new(OperationTracker::from_config(&config.history));
    let mut replayer = Replayer::new(
        Arc::clone(&tracker),
        NotificationGate::new(config.notifications.clone()),
    );
    replayer.apply_all(events);

    let history: Vec<HistoryEntry> = match resource {
        Some(key) => tracker.history_for_resource(key),
        None => tracker.get_history(),
    }
    .into_iter()
    .take(limit)
    .collect();
    let mut operations = tracker.get_all();
    operations.sort_by(|a, b| a.start_time.cmp(&b.start_time).then(a.id.cmp(&b.id)));
    let stats = tracker.get_stats();

    match format {
        OutputFormat::Json => {
            let report = ReplayReport {
                applied: replayer.applied(),
                ignored: replayer.ignored(),
                notifications: replayer.notices(),
                stats,
                operations: operations.iter().map(|op| op.as_ref()).collect(),
                history,
            };
            println!("{}", serde_json::to_string_pretty(&report)?);
        }
        OutputFormat::Text => {
            if !replayer.notices().is_empty() {
                println!("Notifications:");
                for notice in replayer.notices() {
                    let channel = match (notice.desktop, notice.sound) {
                        (true, true) => "desktop+sound",
                        (true, false) => "desktop",
                        _ => "sound",
                    };
                    println!("  [{}] {}", channel, notice.summary);
                }
                println!();
            }

            println!(
                "Applied {} event(s), ignored {}",
                replayer.applied(),
                replayer.ignored()
            );
            print_stats(&stats);

            if !operations.is_empty() {
                println!("\nLive operations:");
                for op in &operations {
                    println!(
                        "  {:<48} {:<10} {:<10} {:>5}  {}",
                        op.id,
                        op.kind(),
                        op.status,
                        format_progress(op.progress),
                        op.owning_resource().unwrap_or("-")
                    );
                }
            }

            if history.is_empty() {
                println!("\nNo finished operations.");
            } else {
                println!("\nHistory (newest first):");
                for entry in &history {
                    println!(
                        "  {:<48} {:<10} {:<10} {:>8}  {}{}",
                        entry.id,
                        entry.kind,
                        entry.status,
                        format_duration(entry.duration()),
                        entry.owning_resource.as_deref().unwrap_or("-"),
                        entry
                            .error
                            .as_deref()
                            .map(|e| format!("  ({})", e))
                            .unwrap_or_default()
                    );
                }
            }
        }
    }

    Ok(())
}

fn print_stats(stats: &OperationStats) {
    println!(
        "Operations: {} total, {} running, {} completed, {} failed, {} cancelled",
        stats.total, stats.running, stats.completed, stats.failed, stats.cancelled
    );
    let by_type: Vec<String> = OperationKind::ALL
        .iter()
        .map(|kind| format!("{}={}", kind, stats.count_for(*kind)))
        .collect();
    println!("By type: {}", by_type.join(" "));
    if !stats.by_owning_resource.is_empty() {
        let by_resource: Vec<String> = stats
            .by_owning_resource
            .iter()
            .map(|(key, count)| format!("{}={}", key, count))
            .collect();
        println!("By resource: {}", by_resource.join(" "));
    }
}

fn show_config(config: &Config) -> Result<()> {
    println!("Config file: {}", Config::config_path().display());
    println!("Log file:    {}", Config::log_path().display());
    println!();
    print!(
        "{}",
        toml::to_string(config).context("failed to render configuration")?
    );
    Ok(())
}
