//! Long-running poll loop.

use crate::cycle::IngestionCycle;
use crate::watermark::CycleState;
use buildspan_core::Result;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{error, info, warn};

/// Runs ingestion cycles back to back, sleeping `poll_interval` between them.
/// Cycles never overlap.
pub struct Daemon {
    cycle: IngestionCycle,
    poll_interval: Duration,
}

impl Daemon {
    pub fn new(cycle: IngestionCycle, poll_interval: Duration) -> Self {
        Self {
            cycle,
            poll_interval,
        }
    }

    /// Run until `shutdown` flips to `true` (or its sender is dropped), or a
    /// cycle fails fatally. Shutdown is only observed between cycles.
    pub async fn run(
        &self,
        initial: CycleState,
        mut shutdown: watch::Receiver<bool>,
    ) -> Result<CycleState> {
        let mut state = initial;

        info!(
            pipelines = ?self.cycle.settings().pipelines,
            interval_secs = self.poll_interval.as_secs(),
            "Starting ingestion daemon"
        );

        loop {
            if *shutdown.borrow() {
                break;
            }

            match self.cycle.run(&state).await {
                Ok(outcome) => state = outcome.state,
                Err(e) if e.is_fatal() => {
                    error!(error = %e, "Ingestion cycle failed fatally");
                    return Err(e);
                }
                Err(e) => {
                    warn!(error = %e, "Ingestion cycle failed, retrying next interval");
                }
            }

            tokio::select! {
                _ = tokio::time::sleep(self.poll_interval) => {}
                _ = shutdown.wait_for(|stop| *stop) => {
                    break;
                }
            }
        }

        info!("Ingestion daemon shutting down");
        Ok(state)
    }
}
