use std::sync::Arc;
use std::time::Duration;

use cold_start_bench_core::config::{Config, RequestType};
use cold_start_bench_core::contract::WarmRequestResult;
use cold_start_bench_core::stats::WarmRequestStats;
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinSet;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::signer::{request_body, Signer};

const IDLE_CONNECTION_TIMEOUT: Duration = Duration::from_secs(90);

#[derive(Debug, thiserror::Error)]
pub enum WarmLoadError {
    #[error("building HTTP client: {0}")]
    Client(#[source] reqwest::Error),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WarmLoadSettings {
    pub requests: usize,
    pub concurrency: usize,
    pub request_type: RequestType,
    pub request_timeout: Duration,
}

impl WarmLoadSettings {
    pub fn from_config(config: &Config) -> Self {
        Self {
            requests: config.benchmark.warm_requests as usize,
            concurrency: config.benchmark.warm_concurrency as usize,
            request_type: config.benchmark.request_type,
            request_timeout: config.benchmark.probe_timeout,
        }
    }
}

/// Fixed-size worker pool hammering one warm workload.
pub struct WarmLoadGenerator {
    signer: Signer,
    settings: WarmLoadSettings,
}

impl WarmLoadGenerator {
    pub fn new(signer: Signer, settings: WarmLoadSettings) -> Self {
        Self { signer, settings }
    }

    /// Issue `requests` signed requests from `concurrency` workers sharing one
    /// pooled client. Each request is signed right before it is sent.
    pub async fn run(
        &self,
        cancel: &CancellationToken,
        url: &str,
        auth_token: Option<&str>,
    ) -> Result<WarmRequestStats, WarmLoadError> {
        let requests = self.settings.requests;
        let concurrency = self.settings.concurrency.max(1);
        let client = reqwest::Client::builder()
            .timeout(self.settings.request_timeout)
            .pool_max_idle_per_host(concurrency * 2)
            .pool_idle_timeout(IDLE_CONNECTION_TIMEOUT)
            .build()
            .map_err(WarmLoadError::Client)?;

        let (work_tx, work_rx) = mpsc::channel::<usize>(requests.max(1));
        for index in 0..requests {
            // Capacity equals the request count, so this never waits.
            if work_tx.send(index).await.is_err() {
                break;
            }
        }
        drop(work_tx);
        let work_rx = Arc::new(Mutex::new(work_rx));
        let (result_tx, mut result_rx) = mpsc::channel::<WarmRequestResult>(requests.max(1));

        info!(url, requests, concurrency, "starting warm load test");
        let started = Instant::now();
        let mut workers = JoinSet::new();
        for _ in 0..concurrency {
            let worker = Worker {
                client: client.clone(),
                signer: self.signer.clone(),
                url: url.to_string(),
                body: request_body(self.settings.request_type),
                auth_token: auth_token.map(str::to_string),
                work: work_rx.clone(),
                results: result_tx.clone(),
                cancel: cancel.clone(),
            };
            workers.spawn(worker.run());
        }
        drop(result_tx);

        let mut results = Vec::with_capacity(requests);
        while let Some(result) = result_rx.recv().await {
            results.push(result);
        }
        let duration = started.elapsed();
        while let Some(joined) = workers.join_next().await {
            if let Err(error) = joined {
                warn!(error = %error, "warm load worker ended abnormally");
            }
        }

        let stats = WarmRequestStats::from_results(&results, duration);
        info!(
            url,
            successful = stats.successful,
            failed = stats.failed,
            rps = stats.requests_per_second,
            "warm load test finished"
        );
        Ok(stats)
    }
}

struct Worker {
    client: reqwest::Client,
    signer: Signer,
    url: String,
    body: &'static [u8],
    auth_token: Option<String>,
    work: Arc<Mutex<mpsc::Receiver<usize>>>,
    results: mpsc::Sender<WarmRequestResult>,
    cancel: CancellationToken,
}

impl Worker {
    async fn run(self) {
        loop {
            let next = self.work.lock().await.recv().await;
            if next.is_none() {
                return;
            }
            if self.cancel.is_cancelled() {
                let _ = self.results.send(cancelled(Duration::ZERO)).await;
                return;
            }
            let result = self.send_one().await;
            if self.results.send(result).await.is_err() {
                return;
            }
        }
    }

    async fn send_one(&self) -> WarmRequestResult {
        let headers = self.signer.sign_request(self.body);
        let mut request = headers.apply(self.client.post(&self.url).body(self.body.to_vec()));
        if let Some(token) = &self.auth_token {
            request = request.bearer_auth(token);
        }

        let started = Instant::now();
        let outcome = tokio::select! {
            _ = self.cancel.cancelled() => return cancelled(started.elapsed()),
            outcome = async {
                let response = request.send().await?;
                let status = response.status().as_u16();
                response.bytes().await?;
                Ok::<_, reqwest::Error>(status)
            } => outcome,
        };
        let latency = started.elapsed();

        match outcome {
            Ok(status_code) => WarmRequestResult {
                latency,
                status_code,
                error: (status_code != 200).then(|| format!("unexpected status code {status_code}")),
            },
            Err(error) => WarmRequestResult {
                latency,
                status_code: 0,
                error: Some(format!("request failed: {error}")),
            },
        }
    }
}

fn cancelled(latency: Duration) -> WarmRequestResult {
    WarmRequestResult {
        latency,
        status_code: 0,
        error: Some("cancelled".to_string()),
    }
}
