//! Test context wiring a cycle to a mock Buildkite API.

use crate::helpers::{ORG, RecordingExporter};
use buildspan_buildkite::{BuildkiteClient, BuildkiteConfig};
use buildspan_core::ports::TraceExporter;
use buildspan_ingest::{CycleSettings, CycleState, DedupStore, IngestionCycle, RetryPolicy};
use chrono::{Duration, Utc};
use std::path::PathBuf;
use std::sync::Arc;
use tempfile::TempDir;
use wiremock::MockServer;

/// Everything a cycle needs, backed by test doubles.
pub struct TestContext {
    pub server: MockServer,
    pub exporter: Arc<RecordingExporter>,
    pub settings: CycleSettings,
    dir: TempDir,
}

impl TestContext {
    pub async fn new(pipelines: &[&str]) -> anyhow::Result<Self> {
        crate::init_test_logging();

        Ok(Self {
            server: MockServer::start().await,
            exporter: Arc::new(RecordingExporter::default()),
            settings: CycleSettings {
                pipelines: pipelines.iter().map(|p| p.to_string()).collect(),
                retry: RetryPolicy::immediate(3),
                ..Default::default()
            },
            dir: tempfile::tempdir()?,
        })
    }

    pub fn dedup_path(&self) -> PathBuf {
        self.dir.path().join("buildkite-id-cache.txt")
    }

    pub fn store(&self) -> DedupStore {
        DedupStore::new(self.dedup_path())
    }

    pub fn client(&self) -> anyhow::Result<BuildkiteClient> {
        let config = BuildkiteConfig::new("test-token", ORG).with_api_url(self.server.uri());
        Ok(BuildkiteClient::new(&config)?)
    }

    /// A cycle exporting into the recording exporter.
    pub fn cycle(&self) -> anyhow::Result<IngestionCycle> {
        self.cycle_with(self.exporter.clone())
    }

    pub fn cycle_with(&self, exporter: Arc<dyn TraceExporter>) -> anyhow::Result<IngestionCycle> {
        Ok(IngestionCycle::new(
            Arc::new(self.client()?),
            exporter,
            self.store(),
            self.settings.clone(),
        ))
    }

    pub fn initial_state(&self) -> CycleState {
        CycleState::starting_at(Utc::now(), Duration::days(60))
    }
}
