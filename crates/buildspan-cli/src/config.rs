//! Validated runtime configuration.

use crate::commands::{LogFormatArg, OtlpProtocol, SettingsArgs};
use buildspan_buildkite::BuildkiteConfig;
use buildspan_buildkite::client::MAX_PAGE_SIZE;
use buildspan_core::{Error, Result};
use buildspan_ingest::{CycleSettings, RetryPolicy};
use buildspan_trace::{LogFormat, OtlpConfig, Protocol, TracingConfig};
use std::collections::HashMap;
use std::path::PathBuf;
use std::time::Duration;

#[derive(Debug, Clone)]
pub struct Settings {
    pub buildkite: BuildkiteConfig,
    pub tracing: TracingConfig,
    pub cycle: CycleSettings,
    pub dedup_path: PathBuf,
    pub poll_interval: Duration,
    pub dry_run: bool,
}

impl TryFrom<SettingsArgs> for Settings {
    type Error = Error;

    fn try_from(args: SettingsArgs) -> Result<Self> {
        let token = required(args.token, "--token / BUILDKITE_TOKEN")?;
        let org = required(args.org, "--org / BUILDKITE_ORG")?;

        let pipelines: Vec<String> = args
            .pipelines
            .iter()
            .map(|p| p.trim().to_string())
            .filter(|p| !p.is_empty())
            .collect();
        if pipelines.is_empty() {
            return Err(Error::Config(
                "at least one pipeline is required (--pipelines / BUILDKITE_PIPELINE)".to_string(),
            ));
        }

        if args.page_size == 0 || args.page_size > MAX_PAGE_SIZE {
            return Err(Error::Config(format!(
                "page size must be between 1 and {}, got {}",
                MAX_PAGE_SIZE, args.page_size
            )));
        }
        positive("poll interval", args.poll_interval_secs as i64)?;
        positive("retention days", args.retention_days)?;
        positive("max concurrent exports", args.max_concurrent_exports as i64)?;
        positive("max fetch attempts", args.max_fetch_attempts as i64)?;

        let retention = chrono::Duration::try_days(args.retention_days)
            .ok_or_else(|| Error::Config(format!("retention of {} days is out of range", args.retention_days)))?;

        let headers = parse_headers(&args.otlp_headers)?;
        let otlp = OtlpConfig {
            endpoint: args.otlp_endpoint,
            protocol: match args.otlp_protocol {
                OtlpProtocol::Grpc => Protocol::Grpc,
                OtlpProtocol::HttpProtobuf => Protocol::HttpProtobuf,
            },
            headers,
            ..Default::default()
        }
        .with_honeycomb(
            args.honeycomb_api_key.as_deref(),
            args.honeycomb_dataset.as_deref(),
        );

        Ok(Self {
            buildkite: BuildkiteConfig::new(token, org).with_api_url(args.api_url),
            tracing: TracingConfig {
                service_name: args.service_name,
                otlp,
                ..Default::default()
            },
            cycle: CycleSettings {
                pipelines,
                page_size: args.page_size,
                retention,
                max_concurrent_exports: args.max_concurrent_exports,
                retry: RetryPolicy::default().with_max_attempts(args.max_fetch_attempts),
            },
            dedup_path: args.dedup_path,
            poll_interval: Duration::from_secs(args.poll_interval_secs),
            dry_run: args.dry_run,
        })
    }
}

pub fn log_format(arg: LogFormatArg) -> LogFormat {
    match arg {
        LogFormatArg::Text => LogFormat::Text,
        LogFormatArg::Json => LogFormat::Json,
    }
}

fn required(value: Option<String>, name: &str) -> Result<String> {
    match value {
        Some(v) if !v.trim().is_empty() => Ok(v.trim().to_string()),
        _ => Err(Error::Config(format!("{} is required", name))),
    }
}

fn positive(name: &str, value: i64) -> Result<()> {
    if value <= 0 {
        return Err(Error::Config(format!("{} must be greater than zero", name)));
    }
    Ok(())
}

/// Parse `key=value` header pairs. Empty entries are ignored.
fn parse_headers(raw: &[String]) -> Result<HashMap<String, String>> {
    let mut headers = HashMap::new();
    for entry in raw.iter().map(|e| e.trim()).filter(|e| !e.is_empty()) {
        let (key, value) = entry
            .split_once('=')
            .filter(|(k, _)| !k.trim().is_empty())
            .ok_or_else(|| Error::Config(format!("OTLP header must be key=value, got {:?}", entry)))?;
        headers.insert(key.trim().to_string(), value.trim().to_string());
    }
    Ok(headers)
}
