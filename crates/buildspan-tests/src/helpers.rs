//! Test helper functions and utilities.

use buildspan_core::ports::TraceExporter;
use buildspan_core::{Result, SpanRecord};
use serde_json::Value;
use std::sync::Mutex;
use wiremock::matchers::{method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

pub const ORG: &str = "acme";

/// Path of the builds listing for `pipeline`.
pub fn builds_path(pipeline: &str) -> String {
    format!("/v2/organizations/{}/pipelines/{}/builds", ORG, pipeline)
}

/// Serve `builds` as `page` of `pipeline`, linking to `next` when given.
pub async fn mount_page(
    server: &MockServer,
    pipeline: &str,
    page: u32,
    builds: Vec<Value>,
    next: Option<u32>,
) {
    let mut response = ResponseTemplate::new(200).set_body_json(Value::Array(builds));
    if let Some(next) = next {
        let link = format!(
            "<{}{}?page={}&per_page=100>; rel=\"next\"",
            server.uri(),
            builds_path(pipeline),
            next
        );
        response = response.insert_header("link", link.as_str());
    }

    Mock::given(method("GET"))
        .and(path(builds_path(pipeline)))
        .and(query_param("page", page.to_string()))
        .respond_with(response)
        .mount(server)
        .await;
}

/// Fail `page` of `pipeline` with `status` for the first `times` requests.
/// Must be mounted before the page itself.
pub async fn mount_failure(server: &MockServer, pipeline: &str, page: u32, status: u16, times: u64) {
    Mock::given(method("GET"))
        .and(path(builds_path(pipeline)))
        .and(query_param("page", page.to_string()))
        .respond_with(ResponseTemplate::new(status))
        .up_to_n_times(times)
        .mount(server)
        .await;
}

/// Page numbers requested for `pipeline`, in order.
pub async fn requested_pages(server: &MockServer, pipeline: &str) -> Vec<u32> {
    let path = builds_path(pipeline);
    server
        .received_requests()
        .await
        .unwrap_or_default()
        .iter()
        .filter(|req| req.url.path() == path)
        .filter_map(|req| {
            req.url
                .query_pairs()
                .find(|(k, _)| k == "page")
                .and_then(|(_, v)| v.parse().ok())
        })
        .collect()
}

/// Keeps every exported span tree in memory.
#[derive(Default)]
pub struct RecordingExporter {
    roots: Mutex<Vec<SpanRecord>>,
}

impl RecordingExporter {
    pub fn roots(&self) -> Vec<SpanRecord> {
        self.roots.lock().map(|r| r.clone()).unwrap_or_default()
    }

    /// Root span names, sorted.
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<_> = self.roots().into_iter().map(|r| r.name).collect();
        names.sort();
        names
    }
}

impl TraceExporter for RecordingExporter {
    fn export(&self, root: &SpanRecord) -> Result<()> {
        self.roots
            .lock()
            .map_err(|e| buildspan_core::Error::Export(e.to_string()))?
            .push(root.clone());
        Ok(())
    }
}
