//! Tracer provider and process logging initialization.

use opentelemetry::KeyValue;
use opentelemetry_otlp::{WithExportConfig, WithHttpConfig, WithTonicConfig};
use opentelemetry_sdk::{
    Resource,
    runtime,
    trace::{RandomIdGenerator, Sampler, TracerProvider},
};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Duration;
use thiserror::Error;
use tonic::metadata::{AsciiMetadataKey, AsciiMetadataValue, MetadataMap};
use tonic::transport::ClientTlsConfig;
use tracing::Subscriber;
use tracing_subscriber::fmt::MakeWriter;
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Debug, Error)]
pub enum TracerError {
    #[error("Failed to initialize tracer: {0}")]
    Init(String),
    #[error("Invalid OTLP header {0}")]
    Header(String),
    #[error("Failed to initialize logging: {0}")]
    Logging(String),
}

impl From<TracerError> for buildspan_core::Error {
    fn from(err: TracerError) -> Self {
        buildspan_core::Error::ExporterInit(err.to_string())
    }
}

/// OTLP exporter configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OtlpConfig {
    pub endpoint: String,
    pub protocol: Protocol,
    pub headers: HashMap<String, String>,
    pub timeout_seconds: u64,
}

impl Default for OtlpConfig {
    fn default() -> Self {
        Self {
            endpoint: "https://api.honeycomb.io:443".to_string(),
            protocol: Protocol::Grpc,
            headers: HashMap::new(),
            timeout_seconds: 10,
        }
    }
}

impl OtlpConfig {
    /// Add the Honeycomb team/dataset headers.
    pub fn with_honeycomb(mut self, api_key: Option<&str>, dataset: Option<&str>) -> Self {
        if let Some(key) = api_key {
            self.headers
                .insert("x-honeycomb-team".to_string(), key.to_string());
        }
        if let Some(dataset) = dataset {
            self.headers
                .insert("x-honeycomb-dataset".to_string(), dataset.to_string());
        }
        self
    }
}

/// OTLP protocol.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Protocol {
    Grpc,
    HttpProtobuf,
}

/// Tracing configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TracingConfig {
    pub service_name: String,
    pub service_version: String,
    pub otlp: OtlpConfig,
    pub resource_attributes: HashMap<String, String>,
}

impl Default for TracingConfig {
    fn default() -> Self {
        Self {
            service_name: "buildspan".to_string(),
            service_version: env!("CARGO_PKG_VERSION").to_string(),
            otlp: OtlpConfig::default(),
            resource_attributes: HashMap::new(),
        }
    }
}

/// Build a tracer provider that batches spans to the configured OTLP
/// endpoint. Must be called from within a Tokio runtime.
pub fn init_tracer(config: &TracingConfig) -> Result<TracerProvider, TracerError> {
    let otlp = &config.otlp;
    let timeout = Duration::from_secs(otlp.timeout_seconds);

    let exporter = match otlp.protocol {
        Protocol::Grpc => {
            let mut builder = opentelemetry_otlp::SpanExporter::builder()
                .with_tonic()
                .with_endpoint(&otlp.endpoint)
                .with_timeout(timeout)
                .with_metadata(metadata_map(&otlp.headers)?);
            if otlp.endpoint.starts_with("https://") {
                builder = builder.with_tls_config(ClientTlsConfig::new().with_native_roots());
            }
            builder.build()
        }
        Protocol::HttpProtobuf => opentelemetry_otlp::SpanExporter::builder()
            .with_http()
            .with_endpoint(&otlp.endpoint)
            .with_timeout(timeout)
            .with_headers(otlp.headers.clone())
            .build(),
    }
    .map_err(|e| TracerError::Init(e.to_string()))?;

    let provider = TracerProvider::builder()
        .with_batch_exporter(exporter, runtime::Tokio)
        .with_sampler(Sampler::AlwaysOn)
        .with_id_generator(RandomIdGenerator::default())
        .with_resource(build_resource(config))
        .build();

    Ok(provider)
}

fn build_resource(config: &TracingConfig) -> Resource {
    let mut attrs = vec![
        KeyValue::new("service.name", config.service_name.clone()),
        KeyValue::new("service.version", config.service_version.clone()),
    ];

    for (key, value) in &config.resource_attributes {
        attrs.push(KeyValue::new(key.clone(), value.clone()));
    }

    Resource::new(attrs)
}

fn metadata_map(headers: &HashMap<String, String>) -> Result<MetadataMap, TracerError> {
    let mut map = MetadataMap::with_capacity(headers.len());
    for (key, value) in headers {
        let name = AsciiMetadataKey::from_bytes(key.as_bytes())
            .map_err(|_| TracerError::Header(key.clone()))?;
        let value = value
            .parse::<AsciiMetadataValue>()
            .map_err(|_| TracerError::Header(key.clone()))?;
        map.insert(name, value);
    }
    Ok(map)
}

/// Flush buffered spans and stop the batch processor.
pub fn shutdown_tracer(provider: &TracerProvider) {
    if let Err(e) = provider.shutdown() {
        tracing::warn!(error = %e, "Tracer provider shutdown failed");
    }
}

/// Process log output format.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Text,
    Json,
}

/// Install the global `tracing` subscriber for process logs.
///
/// Filtering follows `RUST_LOG`, defaulting to `info`. Logs go to stderr and
/// never reach the OTLP exporter, so stdout carries only `--dry-run` span
/// trees and command output.
pub fn init_logging(format: LogFormat) -> Result<(), TracerError> {
    log_subscriber(format, std::io::stderr)
        .try_init()
        .map_err(|e| TracerError::Logging(e.to_string()))
}

fn log_subscriber<W>(format: LogFormat, writer: W) -> Box<dyn Subscriber + Send + Sync>
where
    W: for<'a> MakeWriter<'a> + Send + Sync + 'static,
{
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let registry = tracing_subscriber::registry().with(env_filter);

    match format {
        LogFormat::Text => Box::new(
            registry.with(
                tracing_subscriber::fmt::layer()
                    .with_target(true)
                    .with_writer(writer),
            ),
        ),
        LogFormat::Json => Box::new(
            registry.with(
                tracing_subscriber::fmt::layer()
                    .json()
                    .with_current_span(false)
                    .with_writer(writer),
            ),
        ),
    }
}
