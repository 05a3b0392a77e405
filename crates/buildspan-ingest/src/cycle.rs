//! One ingestion pass over every configured pipeline.

use crate::dedup::{DedupSet, DedupStore};
use crate::retry::RetryPolicy;
use crate::watermark::{CycleState, Watermark};
use buildspan_core::ports::{BuildPage, BuildQuery, BuildSource, TraceExporter};
use buildspan_core::{BuildRecord, Error, Result};
use buildspan_trace::build_span;
use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};

#[derive(Debug, Clone)]
pub struct CycleSettings {
    pub pipelines: Vec<String>,
    pub page_size: u32,
    /// How far back builds are worth querying and remembering.
    pub retention: Duration,
    pub max_concurrent_exports: usize,
    pub retry: RetryPolicy,
}

impl Default for CycleSettings {
    fn default() -> Self {
        Self {
            pipelines: Vec::new(),
            page_size: 100,
            retention: Duration::days(60),
            max_concurrent_exports: 16,
            retry: RetryPolicy::default(),
        }
    }
}

/// Counters for a single cycle.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct CycleReport {
    pub pages_fetched: u32,
    pub builds_seen: usize,
    pub skipped_duplicate: usize,
    pub skipped_incomplete: usize,
    /// Builds that finished before the retention cutoff.
    pub skipped_expired: usize,
    pub dispatched: usize,
    pub exported: usize,
    pub spans_exported: usize,
    pub export_failures: usize,
    pub evicted: usize,
    /// Pipelines whose listing gave up after exhausting retries.
    pub aborted_pipelines: Vec<String>,
}

impl CycleReport {
    pub fn log(&self, elapsed: std::time::Duration) {
        info!(
            pages = self.pages_fetched,
            seen = self.builds_seen,
            duplicate = self.skipped_duplicate,
            incomplete = self.skipped_incomplete,
            expired = self.skipped_expired,
            dispatched = self.dispatched,
            exported = self.exported,
            spans = self.spans_exported,
            failures = self.export_failures,
            evicted = self.evicted,
            aborted = ?self.aborted_pipelines,
            elapsed_ms = elapsed.as_millis() as u64,
            "Ingestion cycle complete"
        );
    }
}

#[derive(Debug, Clone)]
pub struct CycleOutcome {
    pub state: CycleState,
    pub report: CycleReport,
}

type WorkerResult = (String, Result<usize>);

pub struct IngestionCycle {
    source: Arc<dyn BuildSource>,
    exporter: Arc<dyn TraceExporter>,
    store: DedupStore,
    settings: CycleSettings,
    export_permits: Arc<Semaphore>,
}

impl IngestionCycle {
    pub fn new(
        source: Arc<dyn BuildSource>,
        exporter: Arc<dyn TraceExporter>,
        store: DedupStore,
        settings: CycleSettings,
    ) -> Self {
        let export_permits = Arc::new(Semaphore::new(settings.max_concurrent_exports.max(1)));
        Self {
            source,
            exporter,
            store,
            settings,
            export_permits,
        }
    }

    pub fn settings(&self) -> &CycleSettings {
        &self.settings
    }

    /// Run one pass and return the advanced state.
    ///
    /// Returns only after every dispatched export has finished and the dedup
    /// store has been rewritten. A fatal listing error still waits for the
    /// in-flight exports and persists the store before it is returned.
    ///
    /// Queries and eviction share one retention cutoff: no pipeline is
    /// queried from before it, and builds that finished before it are
    /// neither exported nor remembered.
    pub async fn run(&self, state: &CycleState) -> Result<CycleOutcome> {
        let started = Instant::now();
        let cutoff = Utc::now() - self.settings.retention;
        let mut seen = self.store.load().await?;
        let mut next = state.clone();
        next.raise_floor(cutoff);
        let mut report = CycleReport::default();
        let mut workers: JoinSet<WorkerResult> = JoinSet::new();
        let mut fatal = None;

        for pipeline in &self.settings.pipelines {
            let watermark = next.watermark(pipeline);
            match self
                .drain_pipeline(pipeline, watermark, cutoff, &mut seen, &mut workers, &mut report)
                .await
            {
                Ok(Some(latest)) => {
                    if next.advance(pipeline, latest) {
                        debug!(pipeline = %pipeline, watermark = %latest, "Advanced watermark");
                    }
                }
                Ok(None) => {}
                Err(e) if e.is_fatal() => {
                    error!(pipeline = %pipeline, error = %e, "Build listing failed fatally");
                    fatal = Some(e);
                    break;
                }
                Err(e) => {
                    warn!(
                        pipeline = %pipeline,
                        error = %e,
                        "Giving up on pipeline for this cycle"
                    );
                    report.aborted_pipelines.push(pipeline.clone());
                }
            }
        }

        self.join_workers(&mut workers, &mut report).await;

        self.flush_exporter().await;

        report.evicted = seen.evict_before(cutoff);
        self.store.persist(&seen).await?;

        if let Some(e) = fatal {
            return Err(e);
        }

        report.log(started.elapsed());
        Ok(CycleOutcome {
            state: next,
            report,
        })
    }

    /// Page through one pipeline, dispatching unseen builds. Returns the
    /// latest finish time among dispatched builds.
    async fn drain_pipeline(
        &self,
        pipeline: &str,
        watermark: Watermark,
        cutoff: DateTime<Utc>,
        seen: &mut DedupSet,
        workers: &mut JoinSet<WorkerResult>,
        report: &mut CycleReport,
    ) -> Result<Option<DateTime<Utc>>> {
        let mut query = BuildQuery::terminal(pipeline, watermark.get(), self.settings.page_size);
        let mut latest: Option<DateTime<Utc>> = None;

        debug!(pipeline, since = %watermark.get(), "Listing builds");

        loop {
            let page = self.fetch_page(&query).await?;
            report.pages_fetched += 1;

            for build in page.builds {
                report.builds_seen += 1;

                if seen.contains(&build.id) {
                    report.skipped_duplicate += 1;
                    continue;
                }

                let Some((_, finished_at)) = build.window() else {
                    debug!(build_id = %build.id, "Build not complete yet, leaving for a later cycle");
                    report.skipped_incomplete += 1;
                    continue;
                };

                if finished_at < cutoff {
                    debug!(build_id = %build.id, finished_at = %finished_at, "Build is past retention, skipping");
                    report.skipped_expired += 1;
                    continue;
                }

                seen.claim(build.id.clone(), finished_at);
                latest = latest.max(Some(finished_at));
                self.dispatch(build, workers);
                report.dispatched += 1;
            }

            match page.next_page {
                Some(next) if next > query.page => query = query.with_page(next),
                Some(next) => {
                    warn!(pipeline, page = query.page, next, "Listing returned a non-advancing next page");
                    break;
                }
                None => break,
            }
        }

        Ok(latest)
    }

    async fn fetch_page(&self, query: &BuildQuery) -> Result<BuildPage> {
        let retry = &self.settings.retry;
        let mut attempt = 1;

        loop {
            match self.source.list_builds(query).await {
                Ok(page) => return Ok(page),
                Err(e) if e.is_fatal() => return Err(e),
                Err(e) if retry.should_retry(attempt) => {
                    let delay = retry.delay_for(attempt);
                    warn!(
                        pipeline = %query.pipeline,
                        page = query.page,
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        error = %e,
                        "Build listing failed, retrying"
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(e) => {
                    error!(
                        pipeline = %query.pipeline,
                        page = query.page,
                        attempts = attempt,
                        error = %e,
                        "Build listing failed, retries exhausted"
                    );
                    return Err(e);
                }
            }
        }
    }

    fn dispatch(&self, build: BuildRecord, workers: &mut JoinSet<WorkerResult>) {
        let exporter = Arc::clone(&self.exporter);
        let permits = Arc::clone(&self.export_permits);

        workers.spawn(async move {
            let result = export_build(&build, exporter.as_ref(), &permits).await;
            (build.id, result)
        });
    }

    /// The exporter may block while its processors drain, so it runs off the
    /// async workers.
    async fn flush_exporter(&self) {
        let exporter = Arc::clone(&self.exporter);
        match tokio::task::spawn_blocking(move || exporter.flush()).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => warn!(error = %e, "Exporter flush failed"),
            Err(e) => error!(error = %e, "Exporter flush task panicked"),
        }
    }

    async fn join_workers(&self, workers: &mut JoinSet<WorkerResult>, report: &mut CycleReport) {
        while let Some(joined) = workers.join_next().await {
            match joined {
                Ok((_, Ok(spans))) => {
                    report.exported += 1;
                    report.spans_exported += spans;
                }
                Ok((build_id, Err(e))) => {
                    warn!(build_id = %build_id, error = %e, "Failed to export build");
                    report.export_failures += 1;
                }
                Err(e) => {
                    error!(error = %e, "Export worker panicked");
                    report.export_failures += 1;
                }
            }
        }
    }
}

/// Export one build once a permit is available. Returns the number of spans.
async fn export_build(
    build: &BuildRecord,
    exporter: &dyn TraceExporter,
    permits: &Semaphore,
) -> Result<usize> {
    let _permit = permits
        .acquire()
        .await
        .map_err(|e| Error::Internal(format!("Export permits closed: {}", e)))?;

    match build_span(build) {
        Some(root) => {
            exporter.export(&root)?;
            Ok(root.span_count())
        }
        None => Ok(0),
    }
}
