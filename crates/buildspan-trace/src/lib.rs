//! Span construction and OpenTelemetry export for buildspan.
//!
//! Maps finished builds into span trees with their historical timestamps and
//! replays them through an OTLP-backed tracer provider.

pub mod exporter;
pub mod spans;
pub mod tracer;

pub use exporter::{JsonExporter, OtelExporter};
pub use spans::{build_span, job_span, status_for};
pub use tracer::{
    LogFormat, OtlpConfig, Protocol, TracerError, TracingConfig, init_logging, init_tracer,
    shutdown_tracer,
};
