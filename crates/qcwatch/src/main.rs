//! qcw: thin CLI wrapper over qcwatch-core.
//!
//! Every subcommand is presentation plumbing: load the engine from the
//! configured store, call one core entry point, render the result. No
//! business logic lives here.

use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use tokio::sync::mpsc;

use qcwatch_core::config::QcwatchConfig;
use qcwatch_core::entry::{DashboardEntry, EntryKind};
use qcwatch_core::event::RawCapture;
use qcwatch_core::link_map::{HostPageData, LinkMap, build_lookup_url};
use qcwatch_core::logging::init_logging;
use qcwatch_core::persist::LoadOutcome;
use qcwatch_core::query::EntryFilterInput;
use qcwatch_core::runtime::{Engine, EngineMessage, now_ms, run_engine};
use qcwatch_core::store::SqliteStore;

#[derive(Parser)]
#[command(name = "qcw", version, about = "Passive work-session tracking for QC audit work")]
struct Cli {
    /// Path to qcwatch.toml (defaults to $QCWATCH_CONFIG or ./qcwatch.toml)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Override the database path from the config
    #[arg(long, global = true)]
    db: Option<PathBuf>,

    /// Override the log level (trace, debug, info, warn, error)
    #[arg(long, global = true)]
    log_level: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// List timeline entries
    Entries {
        /// Start date, inclusive (YYYY-MM-DD)
        #[arg(long)]
        start_date: Option<String>,
        /// End date, inclusive (YYYY-MM-DD)
        #[arg(long)]
        end_date: Option<String>,
        /// Filter by project id
        #[arg(long)]
        project: Option<String>,
        /// Filter by entry source
        #[arg(long, value_enum)]
        kind: Option<KindArg>,
        /// Filter by off-platform activity type
        #[arg(long)]
        activity: Option<String>,
        /// Only audits that ran past their allotted time
        #[arg(long)]
        over_time: bool,
        /// Emit JSON instead of a table
        #[arg(long)]
        json: bool,
    },

    /// Record an off-platform activity entry
    Log {
        /// Duration in minutes
        #[arg(long)]
        minutes: u64,
        /// Activity type (e.g. meeting, break, training)
        #[arg(long)]
        activity: String,
        /// Free-form description
        #[arg(long)]
        description: Option<String>,
        /// Start time, RFC 3339 (defaults to now)
        #[arg(long)]
        start: Option<String>,
    },

    /// Resolve a scraped table cell to a batch deep link
    Resolve {
        /// Cell text as scraped (full, prefix, or suffix fragment)
        cell: String,
        /// Host-page scrape file (JSON with a `nodes` array)
        #[arg(long)]
        page: PathBuf,
    },

    /// Replay captured calls from a JSON-lines file through the engine
    Ingest {
        /// File of newline-delimited RawCapture JSON objects
        file: PathBuf,
        /// Run a tick at the current time after the replay
        #[arg(long)]
        finalize: bool,
    },

    /// Watch mode: consume RawCapture JSON lines from stdin until EOF
    Watch {
        /// Tick interval in seconds
        #[arg(long, default_value_t = 30)]
        tick_secs: u64,
    },

    /// Run the retention sweep now
    Prune,

    /// Show engine status
    Status,
}

/// Entry source filter argument.
#[derive(Debug, Clone, Copy, ValueEnum)]
enum KindArg {
    Audit,
    OffPlatform,
}

impl From<KindArg> for EntryKind {
    fn from(kind: KindArg) -> Self {
        match kind {
            KindArg::Audit => Self::Audit,
            KindArg::OffPlatform => Self::OffPlatform,
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let config = load_config(&cli)?;
    let mut log_config = config.log.clone();
    if let Some(level) = &cli.log_level {
        log_config.level.clone_from(level);
    }
    // A second init (e.g. in tests) is harmless.
    let _ = init_logging(&log_config);

    let db_override = cli.db.clone();

    match cli.command {
        Command::Entries {
            start_date,
            end_date,
            project,
            kind,
            activity,
            over_time,
            json,
        } => {
            let (engine, outcome) = open_engine(db_override.as_ref(), &config)?;
            report_load_outcome(&outcome);
            let filter = EntryFilterInput {
                start_date,
                end_date,
                project_id: project,
                kind: kind.map(EntryKind::from),
                activity_type: activity,
                show_only_over_time: over_time,
            }
            .validate()
            .context("invalid filter")?;
            let entries = engine.query(&filter);
            if json {
                println!("{}", serde_json::to_string_pretty(&entries)?);
            } else {
                print_entries_table(&entries);
            }
        }

        Command::Log {
            minutes,
            activity,
            description,
            start,
        } => {
            let started_at = match start {
                Some(raw) => chrono::DateTime::parse_from_rfc3339(&raw)
                    .with_context(|| format!("invalid start time: {raw}"))?
                    .timestamp_millis(),
                None => now_ms(),
            };
            let entry = DashboardEntry::off_platform(
                started_at,
                (minutes as i64).saturating_mul(60_000),
                activity,
                description,
            );
            let (mut engine, outcome) = open_engine(db_override.as_ref(), &config)?;
            report_load_outcome(&outcome);
            println!("Logged off-platform entry {}", entry.id);
            engine.add_off_platform(entry);
        }

        Command::Resolve { cell, page } => {
            let raw = std::fs::read_to_string(&page)
                .with_context(|| format!("failed to read {}", page.display()))?;
            let data: HostPageData =
                serde_json::from_str(&raw).context("page scrape is not valid JSON")?;
            let map = LinkMap::build(&data);
            match map.resolve_cell(&cell).and_then(|entry| {
                build_lookup_url(&entry.batch_id).map(|url| (entry.qa_id.clone(), url))
            }) {
                Some((qa_id, url)) => {
                    println!("qa operation: {qa_id}");
                    println!("{url}");
                }
                None => println!("no link available for '{}'", cell.trim()),
            }
        }

        Command::Ingest { file, finalize } => {
            let raw = std::fs::read_to_string(&file)
                .with_context(|| format!("failed to read {}", file.display()))?;
            let (mut engine, outcome) = open_engine(db_override.as_ref(), &config)?;
            report_load_outcome(&outcome);

            let mut applied = 0usize;
            let mut skipped = 0usize;
            for line in raw.lines().filter(|l| !l.trim().is_empty()) {
                match serde_json::from_str::<RawCapture>(line) {
                    Ok(capture) => {
                        engine.handle_capture(&capture);
                        applied += 1;
                    }
                    Err(err) => {
                        tracing::debug!(error = %err, "Skipping unparseable capture line");
                        skipped += 1;
                    }
                }
            }
            if finalize {
                engine.handle_tick(now_ms());
            }
            println!(
                "Ingested {applied} captures ({skipped} skipped); {} in flight, {} entries",
                engine.in_flight_count(),
                engine.entries().len()
            );
        }

        Command::Watch { tick_secs } => {
            let (engine, outcome) = open_engine(db_override.as_ref(), &config)?;
            report_load_outcome(&outcome);

            let (tx, rx) = mpsc::channel::<EngineMessage>(256);
            std::thread::spawn(move || {
                let stdin = std::io::stdin();
                let mut line = String::new();
                loop {
                    line.clear();
                    match stdin.read_line(&mut line) {
                        Ok(0) | Err(_) => break,
                        Ok(_) => {
                            if let Ok(capture) = serde_json::from_str::<RawCapture>(line.trim()) {
                                if tx.blocking_send(EngineMessage::Capture(capture)).is_err() {
                                    break;
                                }
                            }
                        }
                    }
                }
            });

            let engine = run_engine(engine, rx, Duration::from_secs(tick_secs)).await;
            println!(
                "Watch stopped; {} in flight, {} entries",
                engine.in_flight_count(),
                engine.entries().len()
            );
        }

        Command::Prune => {
            let (mut engine, outcome) = open_engine(db_override.as_ref(), &config)?;
            report_load_outcome(&outcome);
            let result = engine.prune(now_ms());
            println!(
                "Pruned {} entries ({} by age, {} by count)",
                result.total_deleted(),
                result.deleted_by_age,
                result.deleted_by_count
            );
        }

        Command::Status => {
            let (engine, outcome) = open_engine(db_override.as_ref(), &config)?;
            report_load_outcome(&outcome);
            println!("qcwatch {}", qcwatch_core::VERSION);
            println!("database: {}", db_path(db_override.as_ref(), &config).display());
            println!("entries: {}", engine.entries().len());
            println!("in-flight sessions: {}", engine.in_flight_count());
            if engine.is_dirty() {
                println!("warning: a snapshot write is pending retry");
            }
        }
    }

    Ok(())
}

fn load_config(cli: &Cli) -> Result<QcwatchConfig> {
    QcwatchConfig::load_or_default(cli.config.as_deref()).context("failed to load configuration")
}

fn db_path(db_override: Option<&PathBuf>, config: &QcwatchConfig) -> PathBuf {
    db_override
        .cloned()
        .unwrap_or_else(|| config.storage.db_path.clone())
}

fn open_engine(db_override: Option<&PathBuf>, config: &QcwatchConfig) -> Result<(Engine, LoadOutcome)> {
    let path = db_path(db_override, config);
    let store = SqliteStore::open(&path)
        .with_context(|| format!("failed to open database at {}", path.display()))?;
    let (engine, outcome) =
        Engine::load(Box::new(store), config.clone()).context("failed to load engine state")?;
    Ok((engine, outcome))
}

/// Surface non-fatal load degradations to the user.
fn report_load_outcome(outcome: &LoadOutcome) {
    match outcome {
        LoadOutcome::VersionMismatch { found, supported } => eprintln!(
            "warning: stored data uses schema version {found} (supported: {supported}); starting empty"
        ),
        LoadOutcome::Corrupt { detail } => {
            eprintln!("warning: stored data is unreadable ({detail}); starting empty");
        }
        LoadOutcome::Loaded(_) | LoadOutcome::Empty => {}
    }
}

fn print_entries_table(entries: &[DashboardEntry]) {
    if entries.is_empty() {
        println!("No entries.");
        return;
    }
    println!(
        "{:<17} {:<12} {:<19} {:>10}  {}",
        "START", "KIND", "STATUS", "DURATION", "DETAIL"
    );
    for entry in entries {
        let kind = match entry.kind {
            EntryKind::Audit => "audit",
            EntryKind::OffPlatform => "off-platform",
        };
        let status = serde_json::to_value(entry.status)
            .ok()
            .and_then(|v| v.as_str().map(String::from))
            .unwrap_or_default();
        let detail = entry
            .qa_operation_id
            .clone()
            .or_else(|| entry.activity_type.clone())
            .unwrap_or_default();
        let flags = if entry.reconstructed { " (estimated)" } else { "" };
        println!(
            "{:<17} {:<12} {:<19} {:>10}  {}{}",
            format_timestamp(entry.started_at),
            kind,
            status,
            format_duration(entry.duration_ms),
            detail,
            flags
        );
    }
}

fn format_timestamp(epoch_ms: i64) -> String {
    chrono::DateTime::from_timestamp_millis(epoch_ms)
        .map(|dt| dt.format("%Y-%m-%d %H:%M").to_string())
        .unwrap_or_else(|| epoch_ms.to_string())
}

fn format_duration(ms: i64) -> String {
    let total_secs = ms.max(0) / 1_000;
    let hours = total_secs / 3_600;
    let minutes = (total_secs % 3_600) / 60;
    let seconds = total_secs % 60;
    if hours > 0 {
        format!("{hours}h {minutes:02}m")
    } else if minutes > 0 {
        format!("{minutes}m {seconds:02}s")
    } else {
        format!("{seconds}s")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn duration_formatting() {
        assert_eq!(format_duration(0), "0s");
        assert_eq!(format_duration(5_000), "5s");
        assert_eq!(format_duration(65_000), "1m 05s");
        assert_eq!(format_duration(3_725_000), "1h 02m");
        assert_eq!(format_duration(-100), "0s");
    }

    #[test]
    fn kind_arg_maps_to_entry_kind() {
        assert_eq!(EntryKind::from(KindArg::Audit), EntryKind::Audit);
        assert_eq!(
            EntryKind::from(KindArg::OffPlatform),
            EntryKind::OffPlatform
        );
    }

    #[test]
    fn cli_parses_entries_filters() {
        let cli = Cli::parse_from([
            "qcw",
            "entries",
            "--start-date",
            "2024-01-01",
            "--kind",
            "audit",
            "--over-time",
            "--json",
        ]);
        match cli.command {
            Command::Entries {
                start_date,
                kind,
                over_time,
                json,
                ..
            } => {
                assert_eq!(start_date.as_deref(), Some("2024-01-01"));
                assert!(matches!(kind, Some(KindArg::Audit)));
                assert!(over_time);
                assert!(json);
            }
            _ => panic!("expected entries command"),
        }
    }
}
