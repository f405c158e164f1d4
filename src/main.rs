//! # pulse
//!
//! Command-line driver for the SDK: record a scripted RUM session into the
//! local store, upload what is stored, or list stored batches.

#![deny(unsafe_code)]

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use pulse::core::raw::{ActionType, ErrorSource, ResourceKind};
use pulse::core::time::SyncedTimeProvider;
use pulse::core::{Attributes, Feature};
use pulse::rum::ErrorReport;
use pulse::settings::{load_settings, load_settings_from_path, pulse_home, PulseSettings};
use pulse::{http_uploader, open_storages, SdkBuilder};
use pulse_store::PersistenceExecutor;
use pulse_telemetry::{init_telemetry, parse_level, TelemetryConfig, TelemetryGuard};
use pulse_upload::{UploadTarget, UploadWorker};
use serde_json::json;

#[derive(Parser, Debug)]
#[command(name = "pulse", about = "Pulse RUM SDK driver")]
struct Cli {
    /// Settings file (defaults to `~/.pulse/settings.json`).
    #[arg(long, global = true)]
    settings: Option<PathBuf>,

    /// Override the batch storage root.
    #[arg(long, global = true)]
    storage_dir: Option<PathBuf>,

    /// Override the log level.
    #[arg(long, global = true)]
    log_level: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Drive a scripted RUM session into the local store.
    Simulate {
        #[arg(long, default_value = "3")]
        views: usize,

        #[arg(long, default_value = "2")]
        actions_per_view: usize,

        /// Upload what was recorded before exiting.
        #[arg(long)]
        upload: bool,
    },
    /// Run one upload pass over every enabled feature.
    Upload,
    /// List stored batches.
    Inspect {
        /// Only this feature (`rum`, `logs`, `traces`, `crash`, `web-rum`, `web-logs`).
        #[arg(long)]
        feature: Option<String>,
    },
}

fn load(cli: &Cli) -> Result<PulseSettings> {
    let mut settings = match &cli.settings {
        Some(path) => load_settings_from_path(path)
            .with_context(|| format!("Failed to load settings from {}", path.display()))?,
        None => load_settings().context("Failed to load settings")?,
    };
    if let Some(dir) = &cli.storage_dir {
        settings.persistence.storage_dir = Some(dir.display().to_string());
    }
    if let Some(level) = &cli.log_level {
        settings.logging.level = level.clone();
    }
    Ok(settings)
}

fn telemetry(settings: &PulseSettings) -> TelemetryGuard {
    let logging = &settings.logging;
    let home = pulse_home();
    init_telemetry(TelemetryConfig {
        log_level: parse_level(&logging.level),
        module_levels: logging
            .module_levels
            .iter()
            .map(|(module, level)| (module.clone(), parse_level(level)))
            .collect(),
        diagnostics_db_path: logging
            .persist_diagnostics
            .then(|| home.join("diagnostics.db")),
        metrics_db_path: logging.metrics_enabled.then(|| home.join("metrics.db")),
    })
}

async fn simulate(
    settings: PulseSettings,
    guard: &TelemetryGuard,
    views: usize,
    actions_per_view: usize,
    upload: bool,
) -> Result<()> {
    let inactivity = Duration::from_millis(settings.rum.action_inactivity_ms);
    let mut builder = SdkBuilder::new(settings).metrics(guard.metrics());
    if !upload {
        builder = builder.without_upload();
    }
    let sdk = builder.build().context("Failed to start the SDK")?;
    let Some(rum) = sdk.rum() else {
        bail!("RUM is disabled in settings");
    };

    for v in 0..views {
        let key = format!("screen-{v}");
        rum.start_view(key.as_str(), format!("Screen {v}"), Attributes::new());
        for a in 0..actions_per_view {
            rum.add_action(ActionType::Tap, format!("button-{a}"), Attributes::new());
            let resource = format!("{key}/request-{a}");
            rum.start_resource(
                resource.as_str(),
                "GET",
                format!("https://api.example.com/{resource}"),
                Attributes::new(),
            );
            rum.stop_resource(resource.as_str(), Some(200), Some(1_024), ResourceKind::Fetch, Attributes::new());
            // Let the tap close before the next one starts.
            tokio::time::sleep(inactivity * 2).await;
        }
        if v % 2 == 1 {
            rum.add_error(
                ErrorReport::new(format!("simulated failure on {key}"), ErrorSource::Source)
                    .with_type("SimulatedError"),
            );
        }
        rum.add_long_task(Duration::from_millis(150), "render");
        rum.stop_view(key.as_str(), Attributes::new());
    }
    rum.flush().await.context("RUM monitor stopped early")?;

    let report = sdk.drain_and_shutdown().await;
    let batches = match sdk.storage(Feature::Rum) {
        Some(storage) => storage.list_batches()?,
        None => Vec::new(),
    };
    let summary = json!({
        "views": views,
        "actions": views * actions_per_view,
        "inlineJobs": report.inline_jobs,
        "uploaded": report.final_upload.as_ref().map(|r| r.uploaded()),
        "failed": report.final_upload.as_ref().map(|r| r.failed()),
        "storedBatches": batches.len(),
    });
    println!("{}", serde_json::to_string_pretty(&summary)?);
    Ok(())
}

async fn upload(settings: PulseSettings, guard: &TelemetryGuard) -> Result<()> {
    let time = Arc::new(SyncedTimeProvider::new());
    let uploader = Arc::new(http_uploader(&settings, time).context("Failed to create uploader")?);
    let executor = Arc::new(PersistenceExecutor::new("pulse-cli").context("Failed to start persistence executor")?);
    let storages = open_storages(&settings, &executor);
    // Pending consent migrations finish before anything is read.
    let drain_executor = executor.clone();
    let drain_timeout = settings.upload.drain_timeout();
    tokio::task::spawn_blocking(move || drain_executor.drain_and_shutdown(drain_timeout)).await?;
    for storage in storages.values() {
        storage.seal();
    }

    let targets = storages
        .iter()
        .map(|(feature, storage)| UploadTarget::new(*feature, storage.reader()))
        .collect();
    let worker = UploadWorker::new(targets, uploader).with_metrics(guard.metrics());
    let report = worker.run_once().await;

    for feature in &report.features {
        println!(
            "{:<10} uploaded={:<4} items={:<6} failed={:<4} empty={}",
            feature.feature.map_or("-", |f| f.as_str()),
            feature.uploaded,
            feature.uploaded_items,
            feature.failed,
            feature.empty,
        );
    }
    if report.failed() > 0 {
        bail!("{} batch(es) failed to upload and were kept for retry", report.failed());
    }
    Ok(())
}

fn inspect(settings: &PulseSettings, feature: Option<&str>) -> Result<()> {
    let filter = match feature {
        Some(name) => Some(Feature::parse(name).with_context(|| format!("Unknown feature: {name}"))?),
        None => None,
    };
    let executor = Arc::new(PersistenceExecutor::new("pulse-cli").context("Failed to start persistence executor")?);
    let storages = open_storages(settings, &executor);
    executor.drain_and_shutdown(settings.upload.drain_timeout());

    let mut total = 0;
    for (feature, storage) in &storages {
        if filter.is_some_and(|f| f != *feature) {
            continue;
        }
        for batch in storage.list_batches()? {
            total += 1;
            println!("{}", serde_json::to_string(&batch)?);
        }
    }
    eprintln!("{total} batch(es)");
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let settings = load(&cli)?;
    let guard = telemetry(&settings);

    let result = match cli.command {
        Command::Simulate {
            views,
            actions_per_view,
            upload: also_upload,
        } => simulate(settings, &guard, views, actions_per_view, also_upload).await,
        Command::Upload => upload(settings, &guard).await,
        Command::Inspect { ref feature } => inspect(&settings, feature.as_deref()),
    };

    if let Err(e) = guard.metrics().snapshot() {
        tracing::warn!(error = %e, "failed to persist metrics snapshot");
    }
    result
}
