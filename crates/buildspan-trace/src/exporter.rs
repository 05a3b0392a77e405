//! Trace exporters: OpenTelemetry replay and a JSON debug writer.

use buildspan_core::ports::TraceExporter;
use buildspan_core::{AttributeValue, Error, Result, SpanRecord, SpanStatus, StatusCode};
use opentelemetry::trace::{Span, SpanKind, Status, TraceContextExt, Tracer};
use opentelemetry::{Context, KeyValue};
use opentelemetry_sdk::trace::TracerProvider;
use std::io::Write;
use std::sync::Mutex;
use std::time::SystemTime;

/// Replays span trees through an OpenTelemetry tracer with their recorded
/// start and end times.
///
/// Span statuses map onto OpenTelemetry's. Only `Error` keeps its
/// description: OpenTelemetry drops the message on `Ok` and `Unset`, so a
/// passed build arrives as a bare `Ok` and its state lives in the `state`
/// attribute instead.
///
/// Without a provider handle, [`TraceExporter::flush`] does nothing and spans
/// leave whenever the provider's batch processor decides to send them.
pub struct OtelExporter<T> {
    tracer: T,
    provider: Option<TracerProvider>,
}

impl<T> OtelExporter<T>
where
    T: Tracer + Send + Sync,
    T::Span: Send + Sync + 'static,
{
    pub fn new(tracer: T) -> Self {
        Self {
            tracer,
            provider: None,
        }
    }

    /// Flush through `provider` when the cycle asks for it.
    pub fn with_provider(mut self, provider: TracerProvider) -> Self {
        self.provider = Some(provider);
        self
    }

    fn replay(&self, record: &SpanRecord, parent: &Context) {
        let attributes: Vec<KeyValue> = record
            .attributes
            .iter()
            .map(|attr| to_key_value(&attr.key, &attr.value))
            .collect();

        let mut span = self
            .tracer
            .span_builder(record.name.clone())
            .with_kind(SpanKind::Internal)
            .with_start_time(SystemTime::from(record.start_time))
            .with_attributes(attributes)
            .start_with_context(&self.tracer, parent);

        for event in &record.events {
            span.add_event_with_timestamp(
                event.name.clone(),
                SystemTime::from(event.timestamp),
                Vec::new(),
            );
        }
        span.set_status(to_status(&record.status));

        // children must be started after the parent so they pick up its context
        let cx = parent.with_span(span);
        for child in &record.children {
            self.replay(child, &cx);
        }

        cx.span().end_with_timestamp(SystemTime::from(record.end_time));
    }
}

impl<T> TraceExporter for OtelExporter<T>
where
    T: Tracer + Send + Sync,
    T::Span: Send + Sync + 'static,
{
    fn export(&self, root: &SpanRecord) -> Result<()> {
        self.replay(root, &Context::new());
        Ok(())
    }

    /// Blocks until the provider's processors have handed off every ended
    /// span.
    fn flush(&self) -> Result<()> {
        let Some(provider) = &self.provider else {
            return Ok(());
        };
        match provider.force_flush().into_iter().find_map(|r| r.err()) {
            Some(e) => Err(Error::Export(e.to_string())),
            None => Ok(()),
        }
    }
}

fn to_key_value(key: &str, value: &AttributeValue) -> KeyValue {
    match value {
        AttributeValue::String(s) => KeyValue::new(key.to_string(), s.clone()),
        AttributeValue::Int(i) => KeyValue::new(key.to_string(), *i),
        AttributeValue::Bool(b) => KeyValue::new(key.to_string(), *b),
    }
}

// OpenTelemetry only carries a description on error statuses.
fn to_status(status: &SpanStatus) -> Status {
    match status.code {
        StatusCode::Error => Status::error(status.message.clone()),
        StatusCode::Ok => Status::Ok,
        StatusCode::Unset => Status::Unset,
    }
}

/// Writes each span tree as pretty JSON. Used for `--dry-run`.
pub struct JsonExporter<W: Write + Send> {
    writer: Mutex<W>,
}

impl<W: Write + Send> JsonExporter<W> {
    pub fn new(writer: W) -> Self {
        Self {
            writer: Mutex::new(writer),
        }
    }

    pub fn into_inner(self) -> W {
        match self.writer.into_inner() {
            Ok(w) => w,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}

impl JsonExporter<std::io::Stdout> {
    pub fn stdout() -> Self {
        Self::new(std::io::stdout())
    }
}

impl<W: Write + Send> TraceExporter for JsonExporter<W> {
    fn export(&self, root: &SpanRecord) -> Result<()> {
        let json = serde_json::to_string_pretty(root)?;
        let mut writer = self
            .writer
            .lock()
            .map_err(|_| Error::Internal("JSON exporter lock poisoned".to_string()))?;
        writeln!(writer, "{json}").map_err(|e| Error::Export(e.to_string()))
    }

    fn flush(&self) -> Result<()> {
        let mut writer = self
            .writer
            .lock()
            .map_err(|_| Error::Internal("JSON exporter lock poisoned".to_string()))?;
        writer.flush().map_err(|e| Error::Export(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{DateTime, Duration, TimeZone, Utc};
    use opentelemetry::trace::TracerProvider as _;
    use opentelemetry_sdk::runtime;
    use opentelemetry_sdk::testing::trace::InMemorySpanExporter;
    use std::sync::Arc;

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, 1, 12, 0, 0).unwrap()
    }

    fn sample_tree() -> SpanRecord {
        let mut root = SpanRecord::new("1234", t0(), t0() + Duration::minutes(10));
        root.add_event("created", t0());
        root.set_attribute("state", "passed");
        root.set_status(StatusCode::Ok, "passed");

        let mut job = SpanRecord::new(
            "rspec",
            t0() + Duration::minutes(1),
            t0() + Duration::minutes(9),
        );
        job.set_attribute("retry_count", 2u32);
        job.set_status(StatusCode::Error, "failed");
        root.children.push(job);
        root
    }

    #[test]
    fn test_otel_replay_preserves_tree_and_timestamps() {
        let memory = InMemorySpanExporter::default();
        let provider = TracerProvider::builder()
            .with_simple_exporter(memory.clone())
            .build();
        let exporter = OtelExporter::new(provider.tracer("buildspan-test"));

        exporter.export(&sample_tree()).unwrap();

        let spans = memory.get_finished_spans().unwrap();
        assert_eq!(spans.len(), 2);

        let root = spans.iter().find(|s| s.name == "1234").unwrap();
        let job = spans.iter().find(|s| s.name == "rspec").unwrap();

        assert_eq!(root.start_time, SystemTime::from(t0()));
        assert_eq!(root.end_time, SystemTime::from(t0() + Duration::minutes(10)));
        assert_eq!(root.status, Status::Ok);
        assert_eq!(root.events.events.len(), 1);

        assert_eq!(job.parent_span_id, root.span_context.span_id());
        assert_eq!(job.span_context.trace_id(), root.span_context.trace_id());
        assert_eq!(job.start_time, SystemTime::from(t0() + Duration::minutes(1)));
        assert_eq!(job.status, Status::error("failed"));
        let retry_count = job
            .attributes
            .iter()
            .find(|kv| kv.key.as_str() == "retry_count")
            .map(|kv| kv.value.clone());
        assert_eq!(retry_count, Some(opentelemetry::Value::I64(2)));
    }

    #[test]
    fn test_separate_builds_get_separate_traces() {
        let memory = InMemorySpanExporter::default();
        let provider = TracerProvider::builder()
            .with_simple_exporter(memory.clone())
            .build();
        let exporter = OtelExporter::new(provider.tracer("buildspan-test"));

        exporter.export(&SpanRecord::new("1", t0(), t0())).unwrap();
        exporter.export(&SpanRecord::new("2", t0(), t0())).unwrap();

        let spans = memory.get_finished_spans().unwrap();
        assert_eq!(spans.len(), 2);
        assert_ne!(
            spans[0].span_context.trace_id(),
            spans[1].span_context.trace_id()
        );
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_flush_drains_batched_spans() {
        let memory = InMemorySpanExporter::default();
        let provider = TracerProvider::builder()
            .with_batch_exporter(memory.clone(), runtime::Tokio)
            .build();
        let exporter = Arc::new(
            OtelExporter::new(provider.tracer("buildspan-test")).with_provider(provider.clone()),
        );

        exporter.export(&sample_tree()).unwrap();

        let flushing = exporter.clone();
        tokio::task::spawn_blocking(move || flushing.flush())
            .await
            .unwrap()
            .unwrap();

        let names: Vec<_> = memory
            .get_finished_spans()
            .unwrap()
            .into_iter()
            .map(|s| s.name.to_string())
            .collect();
        assert_eq!(names.len(), 2);
        assert!(names.contains(&"1234".to_string()));
        assert!(names.contains(&"rspec".to_string()));
    }

    #[test]
    fn test_flush_without_provider_is_noop() {
        let memory = InMemorySpanExporter::default();
        let provider = TracerProvider::builder()
            .with_simple_exporter(memory.clone())
            .build();
        let exporter = OtelExporter::new(provider.tracer("buildspan-test"));

        assert!(exporter.flush().is_ok());
    }

    #[test]
    fn test_json_exporter_writes_tree() {
        let exporter = JsonExporter::new(Vec::new());
        exporter.export(&sample_tree()).unwrap();
        exporter.flush().unwrap();

        let output = String::from_utf8(exporter.into_inner()).unwrap();
        let value: serde_json::Value = serde_json::from_str(output.trim()).unwrap();
        assert_eq!(value["name"], "1234");
        assert_eq!(value["children"][0]["name"], "rspec");
        assert_eq!(value["children"][0]["status"]["code"], "error");
    }
}
