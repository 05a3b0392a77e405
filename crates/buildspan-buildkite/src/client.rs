use crate::types::BuildkiteBuild;
use async_trait::async_trait;
use buildspan_core::ports::{BuildPage, BuildQuery, BuildSource};
use buildspan_core::{BuildRecord, Error};
use chrono::SecondsFormat;
use reqwest::{Client, StatusCode, header};
use std::fmt;
use std::time::Duration;
use tracing::debug;

/// Buildkite pages are capped at 100 builds.
pub const MAX_PAGE_SIZE: u32 = 100;

#[derive(Debug)]
pub enum ApiError {
    Request(reqwest::Error),
    Server(String),
    NotFound(String),
    Unauthorized,
}

impl fmt::Display for ApiError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ApiError::Request(e) => write!(f, "Request failed: {}", e),
            ApiError::Server(msg) => write!(f, "Server error: {}", msg),
            ApiError::NotFound(msg) => write!(f, "{}", msg),
            ApiError::Unauthorized => write!(f, "Unauthorized: check the Buildkite API token"),
        }
    }
}

impl std::error::Error for ApiError {}

#[derive(Debug, Clone)]
pub struct BuildkiteConfig {
    /// API root, without the `/v2` suffix.
    pub api_url: String,
    pub token: String,
    pub organization: String,
    pub timeout: Duration,
}

impl BuildkiteConfig {
    pub fn new(token: impl Into<String>, organization: impl Into<String>) -> Self {
        Self {
            api_url: "https://api.buildkite.com".to_string(),
            token: token.into(),
            organization: organization.into(),
            timeout: Duration::from_secs(30),
        }
    }

    pub fn with_api_url(mut self, url: impl Into<String>) -> Self {
        self.api_url = url.into();
        self
    }
}

pub struct BuildkiteClient {
    client: Client,
    base_url: String,
    token: String,
    organization: String,
}

impl BuildkiteClient {
    pub fn new(config: &BuildkiteConfig) -> Result<Self, ApiError> {
        let client = Client::builder()
            .timeout(config.timeout)
            .user_agent(concat!("buildspan/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(ApiError::Request)?;

        Ok(Self {
            client,
            base_url: config.api_url.trim_end_matches('/').to_string(),
            token: config.token.clone(),
            organization: config.organization.clone(),
        })
    }

    fn request(&self, method: reqwest::Method, path: &str) -> reqwest::RequestBuilder {
        let url = format!("{}/v2{}", self.base_url, path);
        self.client
            .request(method, &url)
            .header(header::AUTHORIZATION, format!("Bearer {}", self.token))
    }

    /// List one page of builds for a pipeline.
    pub async fn list_pipeline_builds(
        &self,
        query: &BuildQuery,
    ) -> Result<(Vec<BuildkiteBuild>, Option<u32>), ApiError> {
        let path = format!(
            "/organizations/{}/pipelines/{}/builds",
            self.organization, query.pipeline
        );

        let mut params: Vec<(&str, String)> = vec![
            (
                "finished_from",
                query
                    .finished_after
                    .to_rfc3339_opts(SecondsFormat::Secs, true),
            ),
            ("page", query.page.to_string()),
            ("per_page", query.page_size.min(MAX_PAGE_SIZE).to_string()),
        ];
        for state in &query.states {
            params.push(("state[]", state.as_str().to_string()));
        }

        let res = self
            .request(reqwest::Method::GET, &path)
            .query(&params)
            .send()
            .await
            .map_err(ApiError::Request)?;

        match res.status() {
            StatusCode::OK => {
                let next_page = res
                    .headers()
                    .get(header::LINK)
                    .and_then(|v| v.to_str().ok())
                    .and_then(next_page_from_link);
                let builds = res.json().await.map_err(ApiError::Request)?;
                Ok((builds, next_page))
            }
            StatusCode::NOT_FOUND => Err(ApiError::NotFound(format!(
                "Pipeline {}/{} not found",
                self.organization, query.pipeline
            ))),
            StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => Err(ApiError::Unauthorized),
            status => Err(ApiError::Server(status.to_string())),
        }
    }
}

#[async_trait]
impl BuildSource for BuildkiteClient {
    async fn list_builds(&self, query: &BuildQuery) -> buildspan_core::Result<BuildPage> {
        match self.list_pipeline_builds(query).await {
            Ok((builds, next_page)) => {
                debug!(
                    pipeline = %query.pipeline,
                    page = query.page,
                    count = builds.len(),
                    ?next_page,
                    "Fetched builds page"
                );
                Ok(BuildPage {
                    builds: builds.into_iter().map(BuildRecord::from).collect(),
                    next_page,
                })
            }
            Err(ApiError::Unauthorized) => Err(Error::Unauthorized(format!(
                "organization {}",
                self.organization
            ))),
            Err(ApiError::NotFound(msg)) => Err(Error::PipelineNotFound(msg)),
            Err(e) => Err(Error::Listing {
                pipeline: query.pipeline.clone(),
                page: query.page,
                message: e.to_string(),
            }),
        }
    }
}

/// Extract the `page` of the `rel="next"` entry of an RFC 8288 `Link` header.
pub fn next_page_from_link(link: &str) -> Option<u32> {
    link.split(',').find_map(|entry| {
        let mut parts = entry.split(';');
        let target = parts.next()?.trim();
        let is_next = parts.any(|param| {
            let param = param.trim();
            param == "rel=\"next\"" || param == "rel=next"
        });
        if !is_next {
            return None;
        }

        let target = target.strip_prefix('<')?.strip_suffix('>')?;
        let url = url::Url::parse(target).ok()?;
        url.query_pairs()
            .find(|(key, _)| key == "page")
            .and_then(|(_, value)| value.parse().ok())
            .filter(|page| *page > 0)
    })
}
