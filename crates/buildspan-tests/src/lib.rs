//! Integration test infrastructure for buildspan.
//!
//! Runs ingestion cycles against a mock Buildkite API served by `wiremock`,
//! with a temporary dedup store and an in-memory exporter.
//!
//! # Usage
//!
//! ```ignore
//! use buildspan_tests::TestContext;
//!
//! #[tokio::test]
//! async fn test_something() {
//!     let ctx = TestContext::new(&["app"]).await.unwrap();
//!     // mount pages on ctx.server, then ctx.cycle().run(...)
//! }
//! ```

pub mod context;
pub mod fixtures;
pub mod helpers;

pub use context::TestContext;
pub use fixtures::*;
pub use helpers::*;

/// Initialize test logging (call once per test binary).
pub fn init_test_logging() {
    use tracing_subscriber::{EnvFilter, fmt};

    let _ = fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("warn,buildspan_ingest=debug")),
        )
        .with_test_writer()
        .try_init();
}
