//! Span construction for builds and jobs.
//!
//! Pure mapping from provider records to [`SpanRecord`] trees. Spans carry
//! the historical timestamps of the build, never wall-clock time.

use buildspan_core::{BuildRecord, BuildState, JobRecord, SpanRecord, SpanStatus, StatusCode};
use tracing::debug;

/// Map a raw state onto a span status. The message is always the raw state.
pub fn status_for(state: Option<&BuildState>) -> SpanStatus {
    let code = match state {
        Some(BuildState::Failed) => StatusCode::Error,
        Some(BuildState::Passed | BuildState::Finished) => StatusCode::Ok,
        _ => StatusCode::Unset,
    };

    SpanStatus {
        code,
        message: state.map(|s| s.as_str().to_string()).unwrap_or_default(),
    }
}

/// Create the span tree for a build: one root span plus one child per job.
///
/// Returns `None` when the build has not both started and finished.
pub fn build_span(build: &BuildRecord) -> Option<SpanRecord> {
    let (started_at, finished_at) = build.window()?;

    let mut span = SpanRecord::new(build.number.to_string(), started_at, finished_at);

    // build timing
    span.add_event("created", started_at);
    if let Some(scheduled_at) = build.scheduled_at {
        span.add_event("scheduled", scheduled_at);
    }

    span.status = status_for(build.state.as_ref());
    if let Some(state) = &build.state {
        span.set_attribute("state", state.as_str());
    }

    if let Some(commit) = &build.commit {
        span.set_attribute("commit", commit.as_str());
    }
    if let Some(branch) = &build.branch {
        span.set_attribute("branch", branch.as_str());
    }
    if let Some(author) = &build.author_email {
        span.set_attribute("author", author.as_str());
    }
    if let Some(url) = &build.web_url {
        span.set_attribute("url", url.as_str());
    }

    for (key, value) in &build.metadata {
        if let Some(text) = value.as_text() {
            span.set_attribute(format!("build_{key}"), text);
        }
    }

    for job in &build.jobs {
        let Some(child) = job_span(job) else {
            continue;
        };
        if child.start_time < started_at || child.end_time > finished_at {
            debug!(
                build_id = %build.id,
                job = %child.name,
                "Job span falls outside its build window"
            );
        }
        span.children.push(child);
    }

    Some(span)
}

/// Create the span for a single job.
///
/// Returns `None` when the job has not both started and finished.
pub fn job_span(job: &JobRecord) -> Option<SpanRecord> {
    let (started_at, finished_at) = job.window()?;

    let name = job
        .name
        .as_deref()
        .or(job.step_key.as_deref())
        .unwrap_or("job");
    let mut span = SpanRecord::new(name, started_at, finished_at);

    // job timing: scheduled -> created -> runnable -> started -> finished
    if let Some(created_at) = job.created_at {
        span.add_event("created", created_at);
    }
    if let Some(scheduled_at) = job.scheduled_at {
        span.add_event("scheduled", scheduled_at);
    }
    if let Some(runnable_at) = job.runnable_at {
        span.add_event("runnable", runnable_at);
    }

    span.status = status_for(job.state.as_ref());
    if let Some(state) = &job.state {
        span.set_attribute("state", state.as_str());
    }

    span.set_attribute("retry_count", job.retry_count);
    span.set_attribute("retried", job.retried);
    span.set_attribute("soft_failed", job.soft_failed);
    if let Some(url) = &job.logs_url {
        span.set_attribute("url", url.as_str());
    }
    if let Some(step_key) = &job.step_key {
        span.set_attribute("step_key", step_key.as_str());
    }
    if let Some(exit_status) = job.exit_status {
        span.set_attribute("exit_status", exit_status);
    }

    let agent = &job.agent;
    if let Some(name) = &agent.name {
        span.set_attribute("agent_name", name.as_str());
    }
    if let Some(hostname) = &agent.hostname {
        span.set_attribute("agent_hostname", hostname.as_str());
    }
    if let Some(ip) = &agent.ip_address {
        span.set_attribute("agent_ip", ip.as_str());
    }
    if let Some(version) = &agent.version {
        span.set_attribute("agent_version", version.as_str());
    }
    for (key, value) in agent.metadata_pairs() {
        span.set_attribute(format!("agent_{key}"), value);
    }

    Some(span)
}
