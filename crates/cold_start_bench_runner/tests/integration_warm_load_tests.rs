mod support;

use std::time::Duration;

use cold_start_bench_core::config::RequestType;
use cold_start_bench_runner::benchmark::{WarmLoadGenerator, WarmLoadSettings};
use cold_start_bench_runner::signer::{request_body, Signer};
use support::InteractionStub;
use tokio_util::sync::CancellationToken;

fn settings(requests: usize, concurrency: usize) -> WarmLoadSettings {
    WarmLoadSettings {
        requests,
        concurrency,
        request_type: RequestType::Ping,
        request_timeout: Duration::from_secs(5),
    }
}

#[tokio::test]
async fn hundred_requests_at_concurrency_ten_all_succeed() {
    let stub = InteractionStub::start(200, Duration::from_millis(5)).await;
    let generator = WarmLoadGenerator::new(Signer::new(), settings(100, 10));

    let stats = generator
        .run(&CancellationToken::new(), &stub.url, None)
        .await
        .expect("warm run");

    assert_eq!(stats.total_requests, 100);
    assert_eq!(stats.successful, 100);
    assert_eq!(stats.failed, 0);
    assert!(stats.requests_per_second > 0.0);
    assert!(stats.latency.p50 <= stats.latency.p95);
    assert!(stats.latency.p95 <= stats.latency.p99);
    assert!(stats.latency.min >= Duration::from_millis(5));
    assert_eq!(stub.hits(), 100);
    assert_eq!(stub.verified(), 100, "every request carries a valid signature");
}

#[tokio::test]
async fn error_statuses_count_as_failures() {
    let stub = InteractionStub::start(503, Duration::ZERO).await;
    let generator = WarmLoadGenerator::new(Signer::new(), settings(12, 3));

    let stats = generator
        .run(&CancellationToken::new(), &stub.url, None)
        .await
        .expect("warm run");

    assert_eq!(stats.total_requests, 12);
    assert_eq!(stats.successful, 0);
    assert_eq!(stats.failed, 12);
    assert_eq!(stats.success_rate(), 0.0);
}

#[tokio::test]
async fn bearer_token_is_forwarded() {
    let stub = InteractionStub::start(200, Duration::ZERO).await;
    let generator = WarmLoadGenerator::new(Signer::new(), settings(2, 1));

    generator
        .run(&CancellationToken::new(), &stub.url, Some("warm-token"))
        .await
        .expect("warm run");

    assert_eq!(stub.last_bearer().as_deref(), Some("warm-token"));
}

#[tokio::test]
async fn unreachable_target_fails_every_request() {
    let url = support::closed_url().await;
    let generator = WarmLoadGenerator::new(Signer::new(), settings(5, 2));

    let stats = generator
        .run(&CancellationToken::new(), &url, None)
        .await
        .expect("warm run");

    assert_eq!(stats.failed, 5);
    assert_eq!(stats.successful, 0);
}

#[tokio::test]
async fn every_request_is_signed_when_it_is_sent() {
    // Six rounds of 400ms: a timestamp taken once up front would be stale
    // well before the batch ends.
    let stub = InteractionStub::start(200, Duration::from_millis(400)).await;
    let generator = WarmLoadGenerator::new(Signer::new(), settings(12, 2));

    let started = std::time::Instant::now();
    let stats = generator
        .run(&CancellationToken::new(), &stub.url, None)
        .await
        .expect("warm run");

    assert!(started.elapsed() > Duration::from_secs(2));
    assert_eq!(stats.successful, 12);
    assert_eq!(stub.verified(), 12);
    assert_eq!(stub.stale(), 0);
}

#[tokio::test]
async fn stub_rejects_old_timestamps() {
    let stub = InteractionStub::start(200, Duration::ZERO).await;
    let body = request_body(RequestType::Ping);
    let headers = Signer::new()
        .sign_request_with_timestamp(body, chrono::Utc::now().timestamp() - 10);

    let response = headers
        .apply(reqwest::Client::new().post(&stub.url))
        .body(body)
        .send()
        .await
        .expect("request");

    assert_eq!(response.status(), reqwest::StatusCode::UNAUTHORIZED);
    assert_eq!(stub.stale(), 1);
    assert_eq!(stub.verified(), 0);
}
