//! End-to-end ingestion tests against a mock Buildkite API.
//!
//! Run with: `cargo test -p buildspan-tests --test ingest_tests`

use buildspan_core::{AttributeValue, Error, StatusCode};
use buildspan_tests::{
    BuildFixture, TestContext, builds_path, mount_failure, mount_page, requested_pages,
};
use buildspan_trace::OtelExporter;
use chrono::Duration;
use opentelemetry::trace::TracerProvider as _;
use opentelemetry_sdk::testing::trace::InMemorySpanExporter;
use opentelemetry_sdk::trace::TracerProvider;
use pretty_assertions::assert_eq;
use std::sync::Arc;
use wiremock::matchers::{method, path};
use wiremock::{Mock, ResponseTemplate};

fn minutes(n: i64) -> Duration {
    Duration::minutes(n)
}

#[tokio::test]
async fn test_second_cycle_is_idempotent() {
    let ctx = TestContext::new(&["app"]).await.expect("Failed to create context");
    mount_page(
        &ctx.server,
        "app",
        1,
        vec![
            BuildFixture::passed("b1", 1, minutes(90)),
            BuildFixture::passed("b2", 2, minutes(30)),
        ],
        None,
    )
    .await;

    let cycle = ctx.cycle().unwrap();
    let first = cycle.run(&ctx.initial_state()).await.expect("first cycle");
    assert_eq!(first.report.dispatched, 2);

    // a fresh cycle object reloads the store from disk
    let second = ctx
        .cycle()
        .unwrap()
        .run(&first.state)
        .await
        .expect("second cycle");

    assert_eq!(second.report.dispatched, 0);
    assert_eq!(second.report.skipped_duplicate, 2);
    assert_eq!(ctx.exporter.names(), vec!["1", "2"]);
}

#[tokio::test]
async fn test_exported_tree_matches_build() {
    let ctx = TestContext::new(&["app"]).await.unwrap();
    mount_page(
        &ctx.server,
        "app",
        1,
        vec![BuildFixture::passed("b1", 42, minutes(15))],
        None,
    )
    .await;

    ctx.cycle().unwrap().run(&ctx.initial_state()).await.unwrap();

    let roots = ctx.exporter.roots();
    assert_eq!(roots.len(), 1);
    let root = &roots[0];
    assert_eq!(root.name, "42");
    assert_eq!(root.end_time - root.start_time, minutes(10));
    assert_eq!(root.status.code, StatusCode::Ok);
    assert_eq!(root.status.message, "passed");
    assert_eq!(
        root.attribute("build_release"),
        Some(&AttributeValue::String("v1".to_string()))
    );
    assert_eq!(root.attribute("build_attempts"), None);

    assert_eq!(root.children.len(), 1);
    let job = &root.children[0];
    assert_eq!(job.name, "rspec");
    assert_eq!(job.start_time - root.start_time, minutes(1));
    assert_eq!(root.end_time - job.end_time, minutes(1));
    assert_eq!(job.status.code, StatusCode::Error);
    assert_eq!(job.attribute("retry_count"), Some(&AttributeValue::Int(2)));
    assert_eq!(
        job.attribute("agent_queue"),
        Some(&AttributeValue::String("default".to_string()))
    );
    assert_eq!(job.attribute("agent_a"), None);
    assert!(job.event("created").is_some());
    assert!(job.event("runnable").is_some());
}

#[tokio::test]
async fn test_three_pages_are_drained_before_persist() {
    let ctx = TestContext::new(&["app"]).await.unwrap();
    mount_page(&ctx.server, "app", 1, vec![BuildFixture::passed("b1", 1, minutes(90))], Some(2)).await;
    mount_page(&ctx.server, "app", 2, vec![BuildFixture::passed("b2", 2, minutes(60))], Some(3)).await;
    mount_page(&ctx.server, "app", 3, vec![BuildFixture::passed("b3", 3, minutes(30))], None).await;

    let outcome = ctx.cycle().unwrap().run(&ctx.initial_state()).await.unwrap();

    assert_eq!(outcome.report.pages_fetched, 3);
    assert_eq!(requested_pages(&ctx.server, "app").await, vec![1, 2, 3]);

    let persisted = ctx.store().load().await.unwrap();
    assert_eq!(persisted.len(), 3);
    for id in ["b1", "b2", "b3"] {
        assert!(persisted.contains(id), "{} missing from dedup store", id);
    }
}

#[tokio::test]
async fn test_failed_page_is_retried_in_place() {
    let ctx = TestContext::new(&["app"]).await.unwrap();
    mount_page(&ctx.server, "app", 1, vec![BuildFixture::passed("b1", 1, minutes(90))], Some(2)).await;
    mount_failure(&ctx.server, "app", 2, 502, 1).await;
    mount_page(&ctx.server, "app", 2, vec![BuildFixture::passed("b2", 2, minutes(60))], Some(3)).await;
    mount_page(&ctx.server, "app", 3, vec![BuildFixture::passed("b3", 3, minutes(30))], None).await;

    let outcome = ctx.cycle().unwrap().run(&ctx.initial_state()).await.unwrap();

    assert_eq!(requested_pages(&ctx.server, "app").await, vec![1, 2, 2, 3]);
    assert_eq!(outcome.report.exported, 3);
    assert!(outcome.report.aborted_pipelines.is_empty());
}

#[tokio::test]
async fn test_persistent_failure_leaves_watermark() {
    let ctx = TestContext::new(&["app"]).await.unwrap();
    mount_page(&ctx.server, "app", 1, vec![BuildFixture::passed("b1", 1, minutes(90))], Some(2)).await;
    mount_failure(&ctx.server, "app", 2, 503, 100).await;

    let initial = ctx.initial_state();
    let outcome = ctx.cycle().unwrap().run(&initial).await.unwrap();

    assert_eq!(outcome.report.aborted_pipelines, vec!["app".to_string()]);
    // lifted to the retention floor but not past the unfinished listing
    assert_eq!(outcome.state.watermark("app").get(), outcome.state.floor());
    assert!(outcome.state.watermark("app") >= initial.watermark("app"));
    assert_eq!(requested_pages(&ctx.server, "app").await, vec![1, 2, 2, 2]);
    // the build from page 1 was exported and is remembered
    assert!(ctx.store().load().await.unwrap().contains("b1"));
}

#[tokio::test]
async fn test_incomplete_build_is_left_for_later() {
    let ctx = TestContext::new(&["app"]).await.unwrap();
    mount_page(
        &ctx.server,
        "app",
        1,
        vec![
            BuildFixture::canceled_before_start("b-early", 5, minutes(20)),
            BuildFixture::passed("b6", 6, minutes(10)),
        ],
        None,
    )
    .await;

    let outcome = ctx.cycle().unwrap().run(&ctx.initial_state()).await.unwrap();

    assert_eq!(outcome.report.skipped_incomplete, 1);
    assert_eq!(ctx.exporter.names(), vec!["6"]);
    let persisted = ctx.store().load().await.unwrap();
    assert!(!persisted.contains("b-early"));
    assert!(persisted.contains("b6"));
}

#[tokio::test]
async fn test_watermark_is_monotonic_across_cycles() {
    let ctx = TestContext::new(&["app"]).await.unwrap();
    mount_page(
        &ctx.server,
        "app",
        1,
        vec![
            BuildFixture::passed("b1", 1, minutes(45)),
            BuildFixture::passed("b2", 2, minutes(5)),
        ],
        None,
    )
    .await;

    let mut state = ctx.initial_state();
    let mut previous = state.watermark("app");
    for _ in 0..3 {
        state = ctx.cycle().unwrap().run(&state).await.unwrap().state;
        assert!(state.watermark("app") >= previous);
        previous = state.watermark("app");
    }
    assert!(previous > ctx.initial_state().watermark("app"));
}

#[tokio::test]
async fn test_bad_token_is_fatal() {
    let ctx = TestContext::new(&["app"]).await.unwrap();
    Mock::given(method("GET"))
        .and(path(builds_path("app")))
        .respond_with(ResponseTemplate::new(401))
        .mount(&ctx.server)
        .await;

    let err = ctx.cycle().unwrap().run(&ctx.initial_state()).await.unwrap_err();

    assert!(matches!(err, Error::Unauthorized(_)));
    assert!(err.is_fatal());
    // not retried
    assert_eq!(requested_pages(&ctx.server, "app").await, vec![1]);
}

#[tokio::test]
async fn test_pipelines_are_ingested_independently() {
    let ctx = TestContext::new(&["app", "docs"]).await.unwrap();
    mount_page(&ctx.server, "app", 1, vec![BuildFixture::passed("a1", 1, minutes(50))], None).await;
    mount_page(&ctx.server, "docs", 1, vec![BuildFixture::passed("d1", 7, minutes(20))], None).await;

    let initial = ctx.initial_state();
    let outcome = ctx.cycle().unwrap().run(&initial).await.unwrap();

    assert_eq!(ctx.exporter.names(), vec!["1", "7"]);
    assert!(outcome.state.watermark("app") < outcome.state.watermark("docs"));
}

#[tokio::test]
async fn test_otlp_replay_nests_jobs_under_build() {
    let ctx = TestContext::new(&["app"]).await.unwrap();
    mount_page(
        &ctx.server,
        "app",
        1,
        vec![BuildFixture::passed("b1", 9, minutes(30))],
        None,
    )
    .await;

    let memory = InMemorySpanExporter::default();
    let provider = TracerProvider::builder()
        .with_simple_exporter(memory.clone())
        .build();
    let exporter = Arc::new(OtelExporter::new(provider.tracer("buildspan-tests")));

    ctx.cycle_with(exporter)
        .unwrap()
        .run(&ctx.initial_state())
        .await
        .unwrap();

    let spans = memory.get_finished_spans().unwrap();
    assert_eq!(spans.len(), 2);
    let root = spans.iter().find(|s| s.name == "9").expect("build span");
    let job = spans.iter().find(|s| s.name == "rspec").expect("job span");

    assert_eq!(job.parent_span_id, root.span_context.span_id());
    assert_eq!(job.span_context.trace_id(), root.span_context.trace_id());
    assert!(job.start_time > root.start_time);
    assert!(job.end_time < root.end_time);
}
