#![allow(dead_code)]

use std::collections::{BTreeMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use axum::body::Bytes;
use axum::extract::State;
use axum::http::{HeaderMap, StatusCode};
use axum::routing::{get, post};
use axum::Router;
use chrono::{DateTime, Utc};
use cold_start_bench_core::config::Config;
use cold_start_bench_runner::adapters::{
    IdTokenSource, LogSearch, MetricSource, OperationHandle, OperationState, Platform,
    PlatformError, Readiness, StartupLogEntry, TopicApi, WorkloadApi, WorkloadSpec, WorkloadStatus,
};
use cold_start_bench_runner::handlers::BenchContext;
use cold_start_bench_runner::signer::{Signer, SIGNATURE_HEADER, TIMESTAMP_HEADER};
use ed25519_dalek::{Signature, Verifier, VerifyingKey};
use tokio_util::sync::CancellationToken;

/// Benchmark config with short waits so flows finish in test time.
pub fn test_config(services: &[&str], iterations: u32) -> Config {
    let yaml = format!(
        "platform:
  project_id: bench-test
benchmark:
  cold_start_iterations: {iterations}
  scale_to_zero_timeout: 2s
  scale_to_zero_poll_interval: 100ms
  warm_requests: 20
  warm_concurrency: 4
  probe_timeout: 5s
  startup_log_wait: 0s
  health_check: false
  id_token_auth: false
services:
  enabled: [{}]
",
        services.join(", ")
    );
    Config::from_yaml_str(&yaml).expect("test config")
}

pub fn context(config: Config, run_id: &str, platform: &Platform) -> BenchContext {
    BenchContext::new(
        config,
        run_id,
        platform,
        reqwest::Client::new(),
        CancellationToken::new(),
    )
}

#[derive(Default)]
struct FakeState {
    workloads: BTreeMap<String, String>,
    failing_services: Vec<String>,
    instance_counts: BTreeMap<String, VecDeque<u64>>,
    metric_queries: usize,
    deleted: Vec<String>,
    startup_latency: Option<Duration>,
    topics: Vec<String>,
    deleted_topics: Vec<String>,
    fail_topics: bool,
}

/// In-memory platform: every created workload serves at `url` and deploys
/// succeed on the first poll.
pub struct FakePlatform {
    url: String,
    state: Mutex<FakeState>,
}

impl FakePlatform {
    pub fn serving(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            state: Mutex::new(FakeState::default()),
        }
    }

    /// Creating any workload for `service` fails with HTTP 500.
    pub fn fail_create_for(self, service: &str) -> Self {
        self.state().failing_services.push(service.to_string());
        self
    }

    pub fn with_workload(self, name: &str) -> Self {
        let url = self.url.clone();
        self.state().workloads.insert(name.to_string(), url);
        self
    }

    /// Successive instance-count readings; the last one repeats.
    pub fn with_instance_counts(self, workload: &str, counts: &[u64]) -> Self {
        self.state()
            .instance_counts
            .insert(workload.to_string(), counts.iter().copied().collect());
        self
    }

    pub fn with_startup_latency(self, latency: Duration) -> Self {
        self.state().startup_latency = Some(latency);
        self
    }

    /// Topic creation and deletion fail with HTTP 403.
    pub fn fail_topics(self) -> Self {
        self.state().fail_topics = true;
        self
    }

    pub fn platform(self: &Arc<Self>) -> Platform {
        Platform {
            workloads: self.clone(),
            metrics: self.clone(),
            logs: self.clone(),
            tokens: self.clone(),
            topics: self.clone(),
        }
    }

    pub fn workload_names(&self) -> Vec<String> {
        self.state().workloads.keys().cloned().collect()
    }

    pub fn deleted(&self) -> Vec<String> {
        self.state().deleted.clone()
    }

    pub fn topics(&self) -> Vec<String> {
        self.state().topics.clone()
    }

    pub fn deleted_topics(&self) -> Vec<String> {
        self.state().deleted_topics.clone()
    }

    pub fn metric_queries(&self) -> usize {
        self.state().metric_queries
    }

    fn state(&self) -> std::sync::MutexGuard<'_, FakeState> {
        self.state.lock().expect("fake platform state")
    }
}

#[async_trait]
impl WorkloadApi for FakePlatform {
    async fn get_workload(&self, name: &str) -> Result<Option<WorkloadStatus>, PlatformError> {
        Ok(self.state().workloads.get(name).map(|url| WorkloadStatus {
            name: name.to_string(),
            url: Some(url.clone()),
            readiness: Readiness::Ready,
        }))
    }

    async fn create_workload(&self, spec: &WorkloadSpec) -> Result<OperationHandle, PlatformError> {
        let mut state = self.state();
        let failing = state
            .failing_services
            .iter()
            .any(|service| spec.name.contains(&format!("-{service}-")));
        if failing {
            return Err(PlatformError::Api {
                operation: "create service".to_string(),
                status: 500,
                body: "quota exceeded".to_string(),
            });
        }
        state.workloads.insert(spec.name.clone(), self.url.clone());
        Ok(OperationHandle {
            name: format!("operations/{}", spec.name),
        })
    }

    async fn update_workload(&self, spec: &WorkloadSpec) -> Result<OperationHandle, PlatformError> {
        Ok(OperationHandle {
            name: format!("operations/{}", spec.name),
        })
    }

    async fn get_operation(&self, _handle: &OperationHandle) -> Result<OperationState, PlatformError> {
        Ok(OperationState::Succeeded)
    }

    async fn set_public_invoker(&self, _name: &str) -> Result<(), PlatformError> {
        Ok(())
    }

    async fn list_workloads(&self, prefix: &str) -> Result<Vec<String>, PlatformError> {
        Ok(self
            .state()
            .workloads
            .keys()
            .filter(|name| name.starts_with(prefix))
            .cloned()
            .collect())
    }

    async fn delete_workload(&self, name: &str) -> Result<(), PlatformError> {
        let mut state = self.state();
        state.workloads.remove(name);
        state.deleted.push(name.to_string());
        Ok(())
    }
}

#[async_trait]
impl MetricSource for FakePlatform {
    async fn instance_count(&self, workload: &str) -> Result<u64, PlatformError> {
        let mut state = self.state();
        state.metric_queries += 1;
        let Some(counts) = state.instance_counts.get_mut(workload) else {
            return Ok(0);
        };
        Ok(if counts.len() > 1 {
            counts.pop_front().unwrap_or(0)
        } else {
            counts.front().copied().unwrap_or(0)
        })
    }
}

#[async_trait]
impl LogSearch for FakePlatform {
    async fn find_container_started(
        &self,
        _workload: &str,
        after: DateTime<Utc>,
    ) -> Result<Option<StartupLogEntry>, PlatformError> {
        Ok(self.state().startup_latency.map(|latency| StartupLogEntry {
            timestamp: after,
            startup_latency: Some(latency),
        }))
    }
}

fn topic_denied(operation: &str) -> PlatformError {
    PlatformError::Api {
        operation: operation.to_string(),
        status: 403,
        body: "permission denied".to_string(),
    }
}

#[async_trait]
impl TopicApi for FakePlatform {
    async fn ensure_topic(&self, topic: &str) -> Result<(), PlatformError> {
        let mut state = self.state();
        if state.fail_topics {
            return Err(topic_denied("create topic"));
        }
        if !state.topics.iter().any(|existing| existing == topic) {
            state.topics.push(topic.to_string());
        }
        Ok(())
    }

    async fn delete_topic(&self, topic: &str) -> Result<(), PlatformError> {
        let mut state = self.state();
        if state.fail_topics {
            return Err(topic_denied("delete topic"));
        }
        state.topics.retain(|existing| existing != topic);
        state.deleted_topics.push(topic.to_string());
        Ok(())
    }
}

#[async_trait]
impl IdTokenSource for FakePlatform {
    async fn id_token(&self, audience: &str) -> Result<String, PlatformError> {
        Ok(format!("id-token-for-{audience}"))
    }
}

/// Counters observed by an [`InteractionStub`].
#[derive(Default)]
pub struct StubCounters {
    pub hits: AtomicUsize,
    pub verified: AtomicUsize,
    pub stale: AtomicUsize,
    pub bearer: Mutex<Option<String>>,
}

struct StubState {
    status: StatusCode,
    delay: Duration,
    key: VerifyingKey,
    counters: Arc<StubCounters>,
}

/// Oldest signature timestamp the stub accepts, in whole seconds behind its
/// clock. Timestamps have one-second resolution, so 1 admits anything signed
/// during the previous second.
pub const MAX_SIGNATURE_AGE_SECS: i64 = 1;

/// A local interaction endpoint that checks request signatures and rejects
/// stale timestamps.
pub struct InteractionStub {
    pub url: String,
    pub counters: Arc<StubCounters>,
}

impl InteractionStub {
    pub async fn start(status: u16, delay: Duration) -> Self {
        let public: [u8; 32] = from_hex(&Signer::new().public_key_hex())
            .try_into()
            .expect("32-byte public key");
        let counters = Arc::new(StubCounters::default());
        let state = Arc::new(StubState {
            status: StatusCode::from_u16(status).expect("status code"),
            delay,
            key: VerifyingKey::from_bytes(&public).expect("public key"),
            counters: counters.clone(),
        });
        let app = Router::new()
            .route("/", post(interaction))
            .route("/health", get(|| async { "ok" }))
            .with_state(state);
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
            .await
            .expect("bind stub");
        let url = format!("http://{}", listener.local_addr().expect("stub addr"));
        tokio::spawn(async move {
            axum::serve(listener, app).await.expect("stub server");
        });
        Self { url, counters }
    }

    pub fn hits(&self) -> usize {
        self.counters.hits.load(Ordering::SeqCst)
    }

    pub fn verified(&self) -> usize {
        self.counters.verified.load(Ordering::SeqCst)
    }

    pub fn stale(&self) -> usize {
        self.counters.stale.load(Ordering::SeqCst)
    }

    pub fn last_bearer(&self) -> Option<String> {
        self.counters.bearer.lock().expect("bearer").clone()
    }
}

async fn interaction(
    State(stub): State<Arc<StubState>>,
    headers: HeaderMap,
    body: Bytes,
) -> (StatusCode, &'static str) {
    stub.counters.hits.fetch_add(1, Ordering::SeqCst);
    if let Some(auth) = headers.get("authorization").and_then(|v| v.to_str().ok()) {
        *stub.counters.bearer.lock().expect("bearer") = auth.strip_prefix("Bearer ").map(str::to_string);
    }

    let signature = headers.get(SIGNATURE_HEADER).and_then(|v| v.to_str().ok());
    let timestamp = headers.get(TIMESTAMP_HEADER).and_then(|v| v.to_str().ok());
    let (Some(signature), Some(timestamp)) = (signature, timestamp) else {
        return (StatusCode::UNAUTHORIZED, "missing signature");
    };
    let Ok(signature_bytes) = <[u8; 64]>::try_from(from_hex(signature)) else {
        return (StatusCode::UNAUTHORIZED, "malformed signature");
    };
    let Ok(signed_at) = timestamp.parse::<i64>() else {
        return (StatusCode::UNAUTHORIZED, "malformed timestamp");
    };
    if Utc::now().timestamp() - signed_at > MAX_SIGNATURE_AGE_SECS {
        stub.counters.stale.fetch_add(1, Ordering::SeqCst);
        return (StatusCode::UNAUTHORIZED, "stale timestamp");
    }
    let mut message = timestamp.as_bytes().to_vec();
    message.extend_from_slice(&body);
    if stub
        .key
        .verify(&message, &Signature::from_bytes(&signature_bytes))
        .is_err()
    {
        return (StatusCode::UNAUTHORIZED, "invalid request signature");
    }
    stub.counters.verified.fetch_add(1, Ordering::SeqCst);

    tokio::time::sleep(stub.delay).await;
    (stub.status, r#"{"type":1}"#)
}

fn from_hex(text: &str) -> Vec<u8> {
    (0..text.len() / 2)
        .filter_map(|i| u8::from_str_radix(text.get(i * 2..i * 2 + 2)?, 16).ok())
        .collect()
}

/// A URL nothing listens on.
pub async fn closed_url() -> String {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
        .await
        .expect("bind");
    let addr = listener.local_addr().expect("addr");
    drop(listener);
    format!("http://{addr}")
}
