//! Subcommand handlers.

use crate::config::Settings;
use anyhow::Context;
use buildspan_buildkite::BuildkiteClient;
use buildspan_core::ports::TraceExporter;
use buildspan_ingest::{CycleState, Daemon, DedupStore, IngestionCycle};
use buildspan_trace::{JsonExporter, OtelExporter, init_tracer, shutdown_tracer};
use opentelemetry::trace::TracerProvider as _;
use opentelemetry_sdk::trace::TracerProvider;
use std::sync::Arc;
use tokio::sync::watch;
use tracing::{info, warn};

/// Tracer name for exported build spans.
const INSTRUMENTATION_NAME: &str = "buildspan";

/// Poll until interrupted.
pub async fn run_daemon(settings: Settings) -> anyhow::Result<()> {
    let (cycle, provider) = build_cycle(&settings)?;
    let daemon = Daemon::new(cycle, settings.poll_interval);

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    tokio::spawn(async move {
        shutdown_signal().await;
        info!("Shutdown requested, finishing the current cycle");
        let _ = shutdown_tx.send(true);
    });

    let initial = CycleState::starting_at(chrono::Utc::now(), settings.cycle.retention);
    let result = daemon.run(initial, shutdown_rx).await;

    if let Some(provider) = provider {
        shutdown_tracer(&provider);
    }
    result.context("ingestion stopped")?;
    Ok(())
}

/// Run one cycle and print its report.
pub async fn run_once(settings: Settings) -> anyhow::Result<()> {
    let (cycle, provider) = build_cycle(&settings)?;

    let initial = CycleState::starting_at(chrono::Utc::now(), settings.cycle.retention);
    let result = cycle.run(&initial).await;

    if let Some(provider) = provider {
        shutdown_tracer(&provider);
    }

    let outcome = result.context("ingestion cycle failed")?;
    println!("{}", serde_json::to_string_pretty(&outcome.report)?);
    Ok(())
}

fn build_cycle(settings: &Settings) -> anyhow::Result<(IngestionCycle, Option<TracerProvider>)> {
    let client = BuildkiteClient::new(&settings.buildkite)
        .map_err(|e| buildspan_core::Error::Config(format!("Buildkite client: {}", e)))?;

    let (exporter, provider): (Arc<dyn TraceExporter>, Option<TracerProvider>) = if settings.dry_run {
        info!("Dry run: span trees are written to stdout");
        (Arc::new(JsonExporter::stdout()), None)
    } else {
        let provider = init_tracer(&settings.tracing)?;
        info!(
            endpoint = %settings.tracing.otlp.endpoint,
            protocol = ?settings.tracing.otlp.protocol,
            "OTLP exporter initialized"
        );
        let tracer = provider.tracer(INSTRUMENTATION_NAME);
        let exporter = OtelExporter::new(tracer).with_provider(provider.clone());
        (Arc::new(exporter), Some(provider))
    };

    let cycle = IngestionCycle::new(
        Arc::new(client),
        exporter,
        DedupStore::new(&settings.dedup_path),
        settings.cycle.clone(),
    );
    Ok((cycle, provider))
}

#[cfg(unix)]
async fn shutdown_signal() {
    use tokio::signal::unix::{SignalKind, signal};

    match signal(SignalKind::terminate()) {
        Ok(mut terminate) => {
            tokio::select! {
                _ = tokio::signal::ctrl_c() => {}
                _ = terminate.recv() => {}
            }
        }
        Err(e) => {
            warn!(error = %e, "Could not install SIGTERM handler");
            if let Err(e) = tokio::signal::ctrl_c().await {
                warn!(error = %e, "Could not listen for Ctrl-C");
            }
        }
    }
}

#[cfg(not(unix))]
async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!(error = %e, "Could not listen for Ctrl-C");
    }
}
