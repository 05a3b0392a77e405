//! Build and job records as reported by the CI provider.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Lifecycle state of a build or job.
///
/// Providers report states as free-form strings; anything not modelled here
/// is preserved verbatim in `Other` so the raw value can still be reported.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum BuildState {
    Running,
    Scheduled,
    Passed,
    Failed,
    Canceled,
    Skipped,
    NotRun,
    Finished,
    Other(String),
}

impl BuildState {
    pub fn as_str(&self) -> &str {
        match self {
            BuildState::Running => "running",
            BuildState::Scheduled => "scheduled",
            BuildState::Passed => "passed",
            BuildState::Failed => "failed",
            BuildState::Canceled => "canceled",
            BuildState::Skipped => "skipped",
            BuildState::NotRun => "not_run",
            BuildState::Finished => "finished",
            BuildState::Other(raw) => raw,
        }
    }

    /// States that will not change any further. Only builds in one of these
    /// are requested from the provider.
    pub fn terminal() -> Vec<BuildState> {
        vec![
            BuildState::Passed,
            BuildState::Failed,
            BuildState::Canceled,
            BuildState::Skipped,
        ]
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            BuildState::Passed | BuildState::Failed | BuildState::Canceled | BuildState::Skipped
        )
    }
}

impl From<String> for BuildState {
    fn from(raw: String) -> Self {
        match raw.as_str() {
            "running" => BuildState::Running,
            "scheduled" => BuildState::Scheduled,
            "passed" => BuildState::Passed,
            "failed" => BuildState::Failed,
            "canceled" => BuildState::Canceled,
            "skipped" => BuildState::Skipped,
            "not_run" => BuildState::NotRun,
            "finished" => BuildState::Finished,
            _ => BuildState::Other(raw),
        }
    }
}

impl From<&str> for BuildState {
    fn from(raw: &str) -> Self {
        BuildState::from(raw.to_string())
    }
}

impl From<BuildState> for String {
    fn from(state: BuildState) -> Self {
        state.as_str().to_string()
    }
}

impl fmt::Display for BuildState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A build metadata value. Only text values are meaningful to the span
/// builder; anything else is carried but never projected.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum MetadataValue {
    Text(String),
    Other(serde_json::Value),
}

impl MetadataValue {
    pub fn as_text(&self) -> Option<&str> {
        match self {
            MetadataValue::Text(s) => Some(s),
            MetadataValue::Other(_) => None,
        }
    }
}

impl From<serde_json::Value> for MetadataValue {
    fn from(value: serde_json::Value) -> Self {
        match value {
            serde_json::Value::String(s) => MetadataValue::Text(s),
            other => MetadataValue::Other(other),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BuildRecord {
    /// Provider-assigned identifier, stable across polls.
    pub id: String,
    pub number: u64,
    pub state: Option<BuildState>,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
    pub scheduled_at: Option<DateTime<Utc>>,
    pub commit: Option<String>,
    pub branch: Option<String>,
    pub author_email: Option<String>,
    pub web_url: Option<String>,
    #[serde(default)]
    pub metadata: BTreeMap<String, MetadataValue>,
    #[serde(default)]
    pub jobs: Vec<JobRecord>,
}

impl BuildRecord {
    /// The `(started_at, finished_at)` window, when both ends are known.
    pub fn window(&self) -> Option<(DateTime<Utc>, DateTime<Utc>)> {
        Some((self.started_at?, self.finished_at?))
    }

    /// A build is only turned into spans once it has both started and
    /// finished; otherwise it is left for a later poll.
    pub fn is_ingestible(&self) -> bool {
        self.window().is_some()
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct JobRecord {
    pub name: Option<String>,
    pub state: Option<BuildState>,
    pub step_key: Option<String>,
    pub logs_url: Option<String>,
    pub created_at: Option<DateTime<Utc>>,
    pub scheduled_at: Option<DateTime<Utc>>,
    pub runnable_at: Option<DateTime<Utc>>,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub retry_count: u32,
    #[serde(default)]
    pub retried: bool,
    #[serde(default)]
    pub soft_failed: bool,
    pub exit_status: Option<i64>,
    #[serde(default)]
    pub agent: AgentRecord,
}

impl JobRecord {
    pub fn window(&self) -> Option<(DateTime<Utc>, DateTime<Utc>)> {
        Some((self.started_at?, self.finished_at?))
    }

    pub fn is_ingestible(&self) -> bool {
        self.window().is_some()
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AgentRecord {
    pub name: Option<String>,
    pub hostname: Option<String>,
    pub ip_address: Option<String>,
    pub version: Option<String>,
    /// Raw `key=value` strings as the agent was started with.
    #[serde(default)]
    pub metadata: Vec<String>,
}

impl AgentRecord {
    /// Agent metadata as `(key, value)` pairs. Entries that do not contain
    /// exactly one `=` are skipped.
    pub fn metadata_pairs(&self) -> impl Iterator<Item = (&str, &str)> {
        self.metadata.iter().filter_map(|entry| {
            let (key, value) = entry.split_once('=')?;
            if value.contains('=') {
                return None;
            }
            Some((key, value))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_state_parse_known_and_unknown() {
        assert_eq!(BuildState::from("failed"), BuildState::Failed);
        assert_eq!(BuildState::from("not_run"), BuildState::NotRun);
        assert_eq!(
            BuildState::from("canceling"),
            BuildState::Other("canceling".to_string())
        );
        assert_eq!(BuildState::from("canceling").as_str(), "canceling");
    }

    #[test]
    fn test_state_serde_uses_raw_string() {
        let json = serde_json::to_string(&BuildState::NotRun).unwrap();
        assert_eq!(json, "\"not_run\"");

        let parsed: BuildState = serde_json::from_str("\"blocked\"").unwrap();
        assert_eq!(parsed, BuildState::Other("blocked".to_string()));
    }

    #[test]
    fn test_terminal_states() {
        let terminal = BuildState::terminal();
        assert_eq!(terminal.len(), 4);
        assert!(terminal.iter().all(BuildState::is_terminal));
        assert!(!BuildState::Running.is_terminal());
        assert!(!BuildState::NotRun.is_terminal());
    }

    #[test]
    fn test_metadata_value_projection() {
        let text = MetadataValue::from(serde_json::json!("main"));
        let number = MetadataValue::from(serde_json::json!(42));

        assert_eq!(text.as_text(), Some("main"));
        assert_eq!(number.as_text(), None);
    }

    #[test]
    fn test_metadata_map_deserializes_mixed_values() {
        let map: BTreeMap<String, MetadataValue> =
            serde_json::from_str(r#"{"release": "v1", "attempt": 3, "flags": {"a": true}}"#)
                .unwrap();

        assert_eq!(map["release"].as_text(), Some("v1"));
        assert_eq!(map["attempt"], MetadataValue::Other(serde_json::json!(3)));
        assert!(map["flags"].as_text().is_none());
    }

    #[test]
    fn test_agent_metadata_requires_exactly_one_equals() {
        let agent = AgentRecord {
            metadata: vec![
                "foo=bar".to_string(),
                "malformed".to_string(),
                "a=b=c".to_string(),
            ],
            ..Default::default()
        };

        let pairs: Vec<_> = agent.metadata_pairs().collect();
        assert_eq!(pairs, vec![("foo", "bar")]);
    }

    #[test]
    fn test_build_ingestible_requires_both_timestamps() {
        let t0 = Utc.with_ymd_and_hms(2024, 3, 1, 12, 0, 0).unwrap();

        let mut build = BuildRecord {
            id: "b1".to_string(),
            started_at: Some(t0),
            ..Default::default()
        };
        assert!(!build.is_ingestible());

        build.finished_at = Some(t0 + chrono::Duration::minutes(10));
        assert!(build.is_ingestible());
        assert_eq!(build.window().map(|(start, _)| start), Some(t0));

        build.started_at = None;
        assert!(!build.is_ingestible());
    }

    #[test]
    fn test_job_ingestible() {
        let t0 = Utc.with_ymd_and_hms(2024, 3, 1, 12, 0, 0).unwrap();
        let job = JobRecord {
            finished_at: Some(t0),
            ..Default::default()
        };
        assert!(!job.is_ingestible());
    }
}
