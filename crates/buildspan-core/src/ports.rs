//! Port traits (hexagonal architecture).
//!
//! These traits define the interfaces between the ingestion engine and the
//! external adapters: the CI provider's build listing and the tracing backend.

use crate::Result;
use crate::build::{BuildRecord, BuildState};
use crate::span::SpanRecord;
use async_trait::async_trait;
use chrono::{DateTime, Utc};

/// One page request against a pipeline's build history.
#[derive(Debug, Clone, PartialEq)]
pub struct BuildQuery {
    pub pipeline: String,
    /// Only builds finished at or after this instant are returned.
    pub finished_after: DateTime<Utc>,
    pub states: Vec<BuildState>,
    /// 1-based page number.
    pub page: u32,
    pub page_size: u32,
}

impl BuildQuery {
    /// First page of terminal builds finished after `finished_after`.
    pub fn terminal(pipeline: impl Into<String>, finished_after: DateTime<Utc>, page_size: u32) -> Self {
        Self {
            pipeline: pipeline.into(),
            finished_after,
            states: BuildState::terminal(),
            page: 1,
            page_size,
        }
    }

    pub fn with_page(mut self, page: u32) -> Self {
        self.page = page;
        self
    }
}

/// One page of builds. `next_page == None` means the listing is exhausted.
#[derive(Debug, Clone, Default)]
pub struct BuildPage {
    pub builds: Vec<BuildRecord>,
    pub next_page: Option<u32>,
}

/// Paginated access to a CI provider's build history.
#[async_trait]
pub trait BuildSource: Send + Sync {
    /// Fetch one page of builds.
    async fn list_builds(&self, query: &BuildQuery) -> Result<BuildPage>;
}

/// Sink for finished span trees.
///
/// Calls are synchronous from the caller's point of view; batching and
/// network delivery belong to the implementation.
pub trait TraceExporter: Send + Sync {
    /// Replay a span tree, starting each parent before its children.
    fn export(&self, root: &SpanRecord) -> Result<()>;

    /// Flush anything buffered.
    fn flush(&self) -> Result<()> {
        Ok(())
    }
}
