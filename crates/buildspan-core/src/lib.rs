//! buildspan core
//!
//! Domain records for CI builds and jobs, the span tree they are mapped into,
//! and the port traits that connect the ingestion engine to the CI provider
//! and the tracing backend. This crate has minimal dependencies and defines
//! the shared vocabulary used across all other crates.

pub mod build;
pub mod error;
pub mod ports;
pub mod span;

pub use build::{AgentRecord, BuildRecord, BuildState, JobRecord, MetadataValue};
pub use error::{Error, Result};
pub use span::{AttributeValue, SpanAttribute, SpanEvent, SpanRecord, SpanStatus, StatusCode};
