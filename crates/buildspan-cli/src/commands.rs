//! CLI command definitions.

use clap::{Args, Parser, Subcommand, ValueEnum};
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(name = "buildspan")]
#[command(author, version, about = "Export Buildkite build history as OpenTelemetry traces", long_about = None)]
pub struct Cli {
    #[command(flatten)]
    pub settings: SettingsArgs,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug, Clone, Copy, PartialEq, Eq)]
pub enum Commands {
    /// Poll forever, one ingestion cycle per interval
    Run,

    /// Run a single ingestion cycle and print its summary
    Once,
}

#[derive(Args, Debug, Clone)]
pub struct SettingsArgs {
    /// Buildkite API token
    #[arg(long, env = "BUILDKITE_TOKEN", hide_env_values = true, global = true)]
    pub token: Option<String>,

    /// Buildkite organization slug
    #[arg(long, env = "BUILDKITE_ORG", global = true)]
    pub org: Option<String>,

    /// Pipeline slugs, comma-separated
    #[arg(long, env = "BUILDKITE_PIPELINE", value_delimiter = ',', global = true)]
    pub pipelines: Vec<String>,

    /// Buildkite API root
    #[arg(long, env = "BUILDKITE_API_URL", default_value = "https://api.buildkite.com", global = true)]
    pub api_url: String,

    /// OTLP collector endpoint
    #[arg(
        long,
        env = "OTEL_EXPORTER_OTLP_ENDPOINT",
        default_value = "https://api.honeycomb.io:443",
        global = true
    )]
    pub otlp_endpoint: String,

    /// OTLP transport
    #[arg(long, env = "OTEL_EXPORTER_OTLP_PROTOCOL", value_enum, default_value_t = OtlpProtocol::Grpc, global = true)]
    pub otlp_protocol: OtlpProtocol,

    /// Extra OTLP headers as key=value
    #[arg(
        long = "otlp-header",
        env = "OTEL_EXPORTER_OTLP_HEADERS",
        value_delimiter = ',',
        hide_env_values = true,
        global = true
    )]
    pub otlp_headers: Vec<String>,

    /// Honeycomb API key, sent as x-honeycomb-team
    #[arg(long, env = "HONEYCOMB_API_KEY", hide_env_values = true, global = true)]
    pub honeycomb_api_key: Option<String>,

    /// Honeycomb dataset, sent as x-honeycomb-dataset
    #[arg(long, env = "HONEYCOMB_DATASET", global = true)]
    pub honeycomb_dataset: Option<String>,

    /// service.name resource attribute
    #[arg(long, env = "OTEL_SERVICE_NAME", default_value = "buildspan", global = true)]
    pub service_name: String,

    /// File recording already exported build ids
    #[arg(long, env = "BUILDSPAN_DEDUP_PATH", default_value = "/tmp/buildkite-id-cache.txt", global = true)]
    pub dedup_path: PathBuf,

    #[arg(long, env = "BUILDSPAN_POLL_INTERVAL_SECS", default_value_t = 900, global = true)]
    pub poll_interval_secs: u64,

    /// How far back to query, and how long to remember exported builds
    #[arg(long, env = "BUILDSPAN_RETENTION_DAYS", default_value_t = 60, global = true)]
    pub retention_days: i64,

    #[arg(long, env = "BUILDSPAN_PAGE_SIZE", default_value_t = 100, global = true)]
    pub page_size: u32,

    #[arg(long, env = "BUILDSPAN_MAX_CONCURRENT_EXPORTS", default_value_t = 16, global = true)]
    pub max_concurrent_exports: usize,

    /// Attempts per page before a pipeline is skipped for the cycle
    #[arg(long, env = "BUILDSPAN_MAX_FETCH_ATTEMPTS", default_value_t = 8, global = true)]
    pub max_fetch_attempts: u32,

    /// Print span trees as JSON instead of exporting them
    #[arg(long, env = "BUILDSPAN_DRY_RUN", global = true)]
    pub dry_run: bool,

    #[arg(long, env = "BUILDSPAN_LOG_FORMAT", value_enum, default_value_t = LogFormatArg::Text, global = true)]
    pub log_format: LogFormatArg,
}

#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
pub enum OtlpProtocol {
    Grpc,
    HttpProtobuf,
}

#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormatArg {
    Text,
    Json,
}
