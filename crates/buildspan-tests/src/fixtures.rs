//! Buildkite API payloads for tests.

use chrono::{DateTime, Duration, SecondsFormat, Utc};
use serde_json::{Value, json};

fn ts(at: DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Millis, true)
}

/// Factory for Buildkite build payloads.
pub struct BuildFixture;

impl BuildFixture {
    /// A passed build that finished `finished_ago` before now, with one
    /// failed job inside its window.
    pub fn passed(id: &str, number: u64, finished_ago: Duration) -> Value {
        let finished = Utc::now() - finished_ago;
        let started = finished - Duration::minutes(10);

        json!({
            "id": id,
            "number": number,
            "state": "passed",
            "commit": "abc123",
            "branch": "main",
            "web_url": format!("https://buildkite.com/acme/app/builds/{}", number),
            "author": { "name": "Dev", "email": "dev@example.com" },
            "scheduled_at": ts(started - Duration::seconds(30)),
            "started_at": ts(started),
            "finished_at": ts(finished),
            "meta_data": { "release": "v1", "attempts": 3 },
            "jobs": [JobFixture::failed("rspec", started + Duration::minutes(1), finished - Duration::minutes(1))]
        })
    }

    /// A build with no start time, as reported for builds canceled before
    /// an agent picked them up.
    pub fn canceled_before_start(id: &str, number: u64, finished_ago: Duration) -> Value {
        json!({
            "id": id,
            "number": number,
            "state": "canceled",
            "started_at": null,
            "finished_at": ts(Utc::now() - finished_ago),
            "jobs": []
        })
    }
}

/// Factory for Buildkite job payloads.
pub struct JobFixture;

impl JobFixture {
    pub fn failed(name: &str, started: DateTime<Utc>, finished: DateTime<Utc>) -> Value {
        json!({
            "id": format!("job-{}", name),
            "type": "script",
            "name": name,
            "state": "failed",
            "step_key": name,
            "logs_url": format!("https://api.buildkite.com/v2/jobs/{}/log", name),
            "created_at": ts(started - Duration::seconds(40)),
            "scheduled_at": ts(started - Duration::seconds(30)),
            "runnable_at": ts(started - Duration::seconds(20)),
            "started_at": ts(started),
            "finished_at": ts(finished),
            "retries_count": 2,
            "retried": false,
            "soft_failed": false,
            "exit_status": 1,
            "agent": {
                "name": "agent-1",
                "hostname": "ci-host-1",
                "ip_address": "10.0.0.7",
                "version": "3.60.0",
                "meta_data": ["queue=default", "malformed", "a=b=c"]
            }
        })
    }
}
