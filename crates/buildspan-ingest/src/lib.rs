//! Incremental build ingestion.
//!
//! Each cycle pages through builds finished since the pipeline's watermark,
//! skips builds already recorded in the dedup store, exports the rest as span
//! trees and then advances the watermarks and rewrites the store.

pub mod cycle;
pub mod daemon;
pub mod dedup;
pub mod retry;
pub mod watermark;

pub use cycle::{CycleOutcome, CycleReport, CycleSettings, IngestionCycle};
pub use daemon::Daemon;
pub use dedup::{DedupSet, DedupStore};
pub use retry::RetryPolicy;
pub use watermark::{CycleState, Watermark};
