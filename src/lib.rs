pub mod db;
pub mod export;
pub mod sensing;
pub mod settings;
mod utils;

use std::{path::PathBuf, process::ExitCode, time::Duration};

use anyhow::{bail, Context, Result};
use chrono::{DateTime, Local, Utc};
use clap::{Args, Parser, Subcommand};
use db::{Database, Event, Run, Timestamp};
use export::{export_run, ExportError, ExportOptions, Window, DEFAULT_START_LABEL};
use log::{error, info, warn};
use sensing::IngestController;
use settings::IngestSettings;

pub use utils::logging::init_logging;

#[derive(Parser)]
#[command(name = "airlog")]
#[command(about = "Log environmental sensor telemetry to SQLite and export runs as CSV", long_about = None)]
struct Cli {
    /// Debug-level logging (RUST_LOG still takes precedence)
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Subscribe to a device and record every message into the store
    Ingest(IngestArgs),
    /// Write one run as measurements / events / metadata CSV files
    Export(ExportArgs),
    /// Append a labelled event (e.g. start_cook) to a run
    Mark(MarkArgs),
    /// Set a metadata key on a run, replacing any earlier value
    Tag(TagArgs),
}

#[derive(Args)]
struct IngestArgs {
    /// JSON settings file
    #[arg(long)]
    config: Option<PathBuf>,
    #[arg(long)]
    db: Option<PathBuf>,
    #[arg(long)]
    device_id: Option<String>,
    /// Broker host
    #[arg(long)]
    broker: Option<String>,
    #[arg(long)]
    port: Option<u16>,
    #[arg(long)]
    location: Option<String>,
    #[arg(long)]
    notes: Option<String>,
    /// Resume or name the run (default: exp-<local time>)
    #[arg(long)]
    run_id: Option<String>,
}

impl IngestArgs {
    fn apply(&self, settings: &mut IngestSettings) {
        if let Some(db) = &self.db {
            settings.db_path = db.clone();
        }
        if let Some(device_id) = &self.device_id {
            settings.device_id = device_id.clone();
        }
        if let Some(broker) = &self.broker {
            settings.broker_host = broker.clone();
        }
        if let Some(port) = self.port {
            settings.broker_port = port;
        }
        if let Some(location) = &self.location {
            settings.location = location.clone();
        }
        if let Some(notes) = &self.notes {
            settings.notes = notes.clone();
        }
    }
}

#[derive(Args)]
struct ExportArgs {
    #[arg(long, default_value = "project.db")]
    db: PathBuf,
    /// Output folder
    #[arg(long, default_value = "exports")]
    out: PathBuf,
    /// Explicit run id (else latest by start time)
    #[arg(long)]
    run_id: Option<String>,
    /// Ignore the start/stop window
    #[arg(long)]
    full_run: bool,
    /// Window start label
    #[arg(long, default_value = DEFAULT_START_LABEL)]
    start_label: String,
    /// Window end label (else end_run, then stop_heat)
    #[arg(long)]
    end_label: Option<String>,
    /// Explicit window start (RFC 3339), replaces label resolution
    #[arg(long)]
    from: Option<String>,
    /// Explicit window end (RFC 3339), replaces label resolution
    #[arg(long)]
    to: Option<String>,
    /// How long to wait on a locked store before reading a snapshot
    #[arg(long, default_value_t = 1000)]
    open_timeout_ms: u64,
}

impl ExportArgs {
    fn into_options(self) -> Result<ExportOptions> {
        let window = if self.from.is_some() || self.to.is_some() {
            Some(Window::new(
                parse_bound(self.from.as_deref(), "--from")?,
                parse_bound(self.to.as_deref(), "--to")?,
            ))
        } else {
            None
        };

        Ok(ExportOptions {
            db_path: self.db,
            out_dir: self.out,
            run_id: self.run_id,
            start_label: self.start_label,
            end_label: self.end_label,
            window,
            full_run: self.full_run,
            open_timeout: Duration::from_millis(self.open_timeout_ms),
        })
    }
}

#[derive(Args)]
struct MarkArgs {
    label: String,
    #[arg(long)]
    value: Option<String>,
    /// Target run (else latest)
    #[arg(long)]
    run_id: Option<String>,
    #[arg(long, default_value = "project.db")]
    db: PathBuf,
}

#[derive(Args)]
struct TagArgs {
    key: String,
    value: String,
    /// Target run (else latest)
    #[arg(long)]
    run_id: Option<String>,
    #[arg(long, default_value = "project.db")]
    db: PathBuf,
}

fn parse_bound(raw: Option<&str>, flag: &str) -> Result<Option<DateTime<Utc>>> {
    raw.map(|value| {
        Timestamp::parse(value)
            .map(|ts| ts.instant())
            .with_context(|| format!("invalid {flag} value"))
    })
    .transpose()
}

pub fn run() -> ExitCode {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    let result = match cli.command {
        Command::Ingest(args) => block_on(run_ingest(args)),
        Command::Export(args) => run_export(args),
        Command::Mark(args) => block_on(run_mark(args)),
        Command::Tag(args) => block_on(run_tag(args)),
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            if let Some(export_err) = err.downcast_ref::<ExportError>() {
                error!("export aborted: {export_err}");
            } else {
                error!("{err:#}");
            }
            ExitCode::FAILURE
        }
    }
}

fn block_on<F>(future: F) -> Result<()>
where
    F: std::future::Future<Output = Result<()>>,
{
    tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("failed to start async runtime")?
        .block_on(future)
}

async fn run_ingest(args: IngestArgs) -> Result<()> {
    let mut settings = IngestSettings::load(args.config.as_deref())?;
    args.apply(&mut settings);

    let db = Database::open(settings.db_path.clone(), settings.busy_timeout())?;
    let run = Run {
        run_id: args
            .run_id
            .clone()
            .unwrap_or_else(|| Run::generate_id(Local::now())),
        date_start: Utc::now(),
        location: Some(settings.location.clone()),
        device_id: Some(settings.device_id.clone()),
        notes: Some(settings.notes.clone()),
    };

    let mut controller = IngestController::new();
    controller.start(settings, run, db).await?;

    if let Some(token) = controller.cancel_token() {
        tokio::spawn(async move {
            shutdown_signal().await;
            info!("Shutdown requested");
            token.cancel();
        });
    }

    let stats = controller.wait().await?;
    info!(
        "Ingestion stopped: {} measurements, {} events, {} discarded, {} ignored",
        stats.measurements, stats.events, stats.discarded, stats.ignored
    );
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(err) = tokio::signal::ctrl_c().await {
            warn!("Failed to listen for Ctrl+C: {err}");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{signal, SignalKind};
        match signal(SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(err) => {
                warn!("Failed to install SIGTERM handler: {err}");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
}

fn run_export(args: ExportArgs) -> Result<()> {
    let summary = export_run(&args.into_options()?)?;
    info!(
        "{}: {} measurement rows (window {:?}), {} events, {} metadata keys{}",
        summary.run_id,
        summary.measurement_rows,
        summary.window,
        summary.event_rows,
        summary.condition_rows,
        if summary.used_snapshot {
            ", read from snapshot"
        } else {
            ""
        }
    );
    Ok(())
}

async fn target_run(db: &Database, requested: Option<String>) -> Result<String> {
    let run_id = match requested {
        Some(run_id) => run_id,
        None => db.latest_run_id().await?.ok_or(ExportError::NoRun)?,
    };
    if db.get_run(&run_id).await?.is_none() {
        bail!("unknown run {run_id}");
    }
    Ok(run_id)
}

/// Opens a store for a manual write without creating one at a mistyped path.
fn open_existing(path: PathBuf) -> Result<Database> {
    if !path.is_file() {
        bail!("store {} does not exist", path.display());
    }
    Database::new(path)
}

async fn run_mark(args: MarkArgs) -> Result<()> {
    let db = open_existing(args.db)?;
    let run_id = target_run(&db, args.run_id).await?;
    let event = Event::new(run_id.clone(), Timestamp::now(), args.label, args.value);
    db.append_event(&event).await?;
    info!("Marked '{}' on {run_id} at {}", event.label, event.timestamp);
    Ok(())
}

async fn run_tag(args: TagArgs) -> Result<()> {
    let db = open_existing(args.db)?;
    let run_id = target_run(&db, args.run_id).await?;
    db.upsert_condition(&run_id, &args.key, &args.value).await?;
    info!("Set {}={} on {run_id}", args.key, args.value);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn mark_args(db: PathBuf) -> MarkArgs {
        MarkArgs {
            label: "start_cook".into(),
            value: None,
            run_id: None,
            db,
        }
    }

    #[tokio::test]
    async fn mark_and_tag_refuse_missing_store() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("typo.db");

        assert!(run_mark(mark_args(path.clone())).await.is_err());
        let tag = TagArgs {
            key: "pot_size".into(),
            value: "large".into(),
            run_id: None,
            db: path.clone(),
        };
        assert!(run_tag(tag).await.is_err());
        assert!(!path.exists());
    }

    #[tokio::test]
    async fn mark_appends_to_latest_run() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("project.db");
        {
            let db = Database::new(path.clone()).unwrap();
            db.ensure_run(&Run {
                run_id: "exp-1".into(),
                date_start: Utc::now(),
                location: None,
                device_id: None,
                notes: None,
            })
            .await
            .unwrap();
        }

        run_mark(mark_args(path.clone())).await.unwrap();

        let handle = db::open_readonly(&path, db::DEFAULT_OPEN_TIMEOUT).unwrap();
        let events = handle.events_for_run("exp-1").unwrap();
        handle.close();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].label, "start_cook");
    }
}
