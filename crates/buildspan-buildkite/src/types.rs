//! Buildkite API payloads and their mapping onto core records.

use buildspan_core::{AgentRecord, BuildRecord, BuildState, JobRecord, MetadataValue};
use chrono::{DateTime, Utc};
use serde::Deserialize;
use std::collections::BTreeMap;

#[derive(Debug, Clone, Deserialize)]
pub struct BuildkiteBuild {
    pub id: String,
    pub number: u64,
    pub state: Option<String>,
    pub commit: Option<String>,
    pub branch: Option<String>,
    pub web_url: Option<String>,
    pub author: Option<BuildkiteAuthor>,
    pub scheduled_at: Option<DateTime<Utc>>,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
    /// Usually an object of strings, but the API does not guarantee it.
    pub meta_data: Option<serde_json::Value>,
    #[serde(default)]
    pub jobs: Vec<BuildkiteJob>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct BuildkiteAuthor {
    pub name: Option<String>,
    pub email: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct BuildkiteJob {
    pub id: Option<String>,
    #[serde(rename = "type")]
    pub kind: Option<String>,
    pub name: Option<String>,
    pub state: Option<String>,
    pub step_key: Option<String>,
    pub logs_url: Option<String>,
    pub created_at: Option<DateTime<Utc>>,
    pub scheduled_at: Option<DateTime<Utc>>,
    pub runnable_at: Option<DateTime<Utc>>,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
    pub retries_count: Option<u32>,
    pub retried: Option<bool>,
    pub soft_failed: Option<bool>,
    pub exit_status: Option<i64>,
    pub agent: Option<BuildkiteAgent>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct BuildkiteAgent {
    pub name: Option<String>,
    pub hostname: Option<String>,
    pub ip_address: Option<String>,
    pub version: Option<String>,
    pub meta_data: Option<Vec<String>>,
}

impl From<BuildkiteBuild> for BuildRecord {
    fn from(build: BuildkiteBuild) -> Self {
        let metadata = match build.meta_data {
            Some(serde_json::Value::Object(map)) => map
                .into_iter()
                .map(|(key, value)| (key, MetadataValue::from(value)))
                .collect(),
            _ => BTreeMap::new(),
        };

        BuildRecord {
            id: build.id,
            number: build.number,
            state: build.state.map(BuildState::from),
            started_at: build.started_at,
            finished_at: build.finished_at,
            scheduled_at: build.scheduled_at,
            commit: build.commit,
            branch: build.branch,
            author_email: build.author.and_then(|a| a.email),
            web_url: build.web_url,
            metadata,
            jobs: build.jobs.into_iter().map(JobRecord::from).collect(),
        }
    }
}

impl From<BuildkiteJob> for JobRecord {
    fn from(job: BuildkiteJob) -> Self {
        JobRecord {
            name: job.name,
            state: job.state.map(BuildState::from),
            step_key: job.step_key,
            logs_url: job.logs_url,
            created_at: job.created_at,
            scheduled_at: job.scheduled_at,
            runnable_at: job.runnable_at,
            started_at: job.started_at,
            finished_at: job.finished_at,
            retry_count: job.retries_count.unwrap_or(0),
            retried: job.retried.unwrap_or(false),
            soft_failed: job.soft_failed.unwrap_or(false),
            exit_status: job.exit_status,
            agent: job.agent.map(AgentRecord::from).unwrap_or_default(),
        }
    }
}

impl From<BuildkiteAgent> for AgentRecord {
    fn from(agent: BuildkiteAgent) -> Self {
        AgentRecord {
            name: agent.name,
            hostname: agent.hostname,
            ip_address: agent.ip_address,
            version: agent.version,
            metadata: agent.meta_data.unwrap_or_default(),
        }
    }
}
