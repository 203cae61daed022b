mod support;

use std::sync::Arc;
use std::time::Duration;

use cold_start_bench_runner::adapters::object_store::LocalObjectStore;
use cold_start_bench_runner::handlers::distributed::{run_finalize, run_measure};
use cold_start_bench_runner::handlers::{HandlerError, ReportSink};
use cold_start_bench_runner::persistence::ResultStore;
use support::{context, test_config, FakePlatform, InteractionStub};

const RUN_DATE: &str = "2026-10-18";

fn shared_platform(url: &str) -> Arc<FakePlatform> {
    Arc::new(
        FakePlatform::serving(url)
            .with_workload("discord-go-gin")
            .with_workload("discord-rust-actix"),
    )
}

#[tokio::test]
async fn five_readings_finalize_into_five_samples_per_service() {
    let stub = InteractionStub::start(200, Duration::ZERO).await;
    let fake = shared_platform(&stub.url);
    let platform = fake.platform();
    let services = ["go-gin", "rust-actix"];
    let bucket_dir = tempfile::tempdir().expect("bucket");
    let output = tempfile::tempdir().expect("output");
    let bucket = Arc::new(LocalObjectStore::new(bucket_dir.path()));
    let store = ResultStore::new(bucket.clone());

    for iteration in 0..5 {
        let ctx = context(test_config(&services, 5), RUN_DATE, &platform);
        let reading = run_measure(&ctx, &store, RUN_DATE, iteration, false)
            .await
            .expect("measure");
        assert_eq!(reading.iteration, iteration);
        assert_eq!(reading.services.len(), 2);
    }
    assert_eq!(store.load_all_readings(RUN_DATE).await.expect("readings").len(), 5);

    let ctx = context(test_config(&services, 5), RUN_DATE, &platform);
    let sink = ReportSink::new(output.path(), Some(bucket));
    let result = run_finalize(&ctx, &sink, RUN_DATE, false)
        .await
        .expect("finalize");

    assert_eq!(result.run_id, RUN_DATE);
    for service in services {
        let entry = &result.services[service];
        let cold = entry.cold_start.as_ref().expect("cold-start stats");
        assert_eq!(cold.total(), 5, "{service}");
        assert_eq!(cold.success_count, 5, "{service}");
        assert_eq!(entry.service_url.as_deref(), Some(stub.url.as_str()));
        assert_eq!(entry.warm_request.as_ref().expect("warm").successful, 20);
    }
    assert!(output.path().join(RUN_DATE).join("results.json").exists());
    assert!(store.load_all_readings(RUN_DATE).await.expect("readings").is_empty());
    assert!(fake.deleted().is_empty(), "finalize leaves shared workloads running");
}

#[tokio::test]
async fn unresolvable_service_still_gets_a_failed_entry() {
    let stub = InteractionStub::start(200, Duration::ZERO).await;
    let fake = Arc::new(FakePlatform::serving(&stub.url).with_workload("discord-go-gin"));
    let bucket_dir = tempfile::tempdir().expect("bucket");
    let store = ResultStore::new(Arc::new(LocalObjectStore::new(bucket_dir.path())));
    let ctx = context(test_config(&["go-gin", "rust-actix"], 1), RUN_DATE, &fake.platform());

    let reading = run_measure(&ctx, &store, RUN_DATE, 0, false)
        .await
        .expect("measure");

    assert!(reading.services["go-gin"].measurement.is_success());
    let missing = &reading.services["rust-actix"].measurement;
    assert!(!missing.is_success());
    assert!(missing.error.as_deref().is_some_and(|error| error.contains("discord-rust-actix")));
}

#[tokio::test]
async fn measure_without_any_workload_is_a_setup_error() {
    let fake = Arc::new(FakePlatform::serving("http://unused"));
    let bucket_dir = tempfile::tempdir().expect("bucket");
    let store = ResultStore::new(Arc::new(LocalObjectStore::new(bucket_dir.path())));
    let ctx = context(test_config(&["go-gin"], 1), RUN_DATE, &fake.platform());

    let error = run_measure(&ctx, &store, RUN_DATE, 0, false)
        .await
        .expect_err("nothing to measure");

    assert!(matches!(error, HandlerError::Setup(_)));
    assert!(store.load_all_readings(RUN_DATE).await.expect("readings").is_empty());
}

#[tokio::test]
async fn finalize_without_readings_fails() {
    let fake = shared_platform("http://unused");
    let bucket_dir = tempfile::tempdir().expect("bucket");
    let output = tempfile::tempdir().expect("output");
    let sink = ReportSink::new(
        output.path(),
        Some(Arc::new(LocalObjectStore::new(bucket_dir.path()))),
    );
    let ctx = context(test_config(&["go-gin"], 1), RUN_DATE, &fake.platform());

    let error = run_finalize(&ctx, &sink, RUN_DATE, false)
        .await
        .expect_err("no readings");

    assert!(matches!(error, HandlerError::NoReadings(date) if date == RUN_DATE));
}

#[tokio::test]
async fn finalize_needs_a_bucket() {
    let fake = shared_platform("http://unused");
    let output = tempfile::tempdir().expect("output");
    let sink = ReportSink::new(output.path(), None);
    let ctx = context(test_config(&["go-gin"], 1), RUN_DATE, &fake.platform());

    let error = run_finalize(&ctx, &sink, RUN_DATE, false)
        .await
        .expect_err("no bucket");

    assert!(matches!(error, HandlerError::Setup(_)));
}
