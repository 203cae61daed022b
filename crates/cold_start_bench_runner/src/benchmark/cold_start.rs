use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use cold_start_bench_core::config::{Config, RequestType};
use cold_start_bench_core::contract::ColdStartMeasurement;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::poll::{poll_until, PollOutcome};
use crate::adapters::{IdTokenSource, LogSearch};
use crate::signer::{request_body, Signer};

const LOG_POLL_INTERVAL: Duration = Duration::from_secs(2);

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProbeSettings {
    pub request_type: RequestType,
    pub probe_timeout: Duration,
    pub startup_log_wait: Duration,
    pub log_poll_interval: Duration,
    pub id_token_auth: bool,
}

impl ProbeSettings {
    pub fn from_config(config: &Config) -> Self {
        Self {
            request_type: config.benchmark.request_type,
            probe_timeout: config.benchmark.probe_timeout,
            startup_log_wait: config.benchmark.startup_log_wait,
            log_poll_interval: LOG_POLL_INTERVAL,
            id_token_auth: config.benchmark.id_token_auth,
        }
    }
}

/// Sends one signed request to a cold workload and times it.
pub struct ColdStartProber {
    signer: Signer,
    logs: Option<Arc<dyn LogSearch>>,
    tokens: Option<Arc<dyn IdTokenSource>>,
    settings: ProbeSettings,
}

impl ColdStartProber {
    pub fn new(signer: Signer, settings: ProbeSettings) -> Self {
        Self {
            signer,
            logs: None,
            tokens: None,
            settings,
        }
    }

    /// Correlate successful probes with the platform's "container started" log.
    pub fn with_log_search(mut self, logs: Arc<dyn LogSearch>) -> Self {
        self.logs = Some(logs);
        self
    }

    pub fn with_id_tokens(mut self, tokens: Arc<dyn IdTokenSource>) -> Self {
        self.tokens = Some(tokens);
        self
    }

    /// Identity token for `url`, fetched outside any timed window. `None` when
    /// auth is disabled or the token source is unavailable.
    pub async fn auth_token(&self, url: &str) -> Option<String> {
        if !self.settings.id_token_auth {
            return None;
        }
        let tokens = self.tokens.as_ref()?;
        match tokens.id_token(url).await {
            Ok(token) => Some(token),
            Err(error) => {
                warn!(url, error = %error, "no identity token, probing unauthenticated");
                None
            }
        }
    }

    /// Never returns an error: transport failures and non-200 responses come
    /// back as failed measurements.
    pub async fn measure_cold_start(
        &self,
        cancel: &CancellationToken,
        workload: &str,
        url: &str,
    ) -> ColdStartMeasurement {
        let token = self.auth_token(url).await;

        // A fresh client per probe so no pooled connection survives from an
        // earlier request.
        let client = match reqwest::Client::builder()
            .timeout(self.settings.probe_timeout)
            .pool_max_idle_per_host(0)
            .build()
        {
            Ok(client) => client,
            Err(error) => {
                return ColdStartMeasurement::failed(Utc::now(), format!("building HTTP client: {error}"))
            }
        };

        let body = request_body(self.settings.request_type);
        let headers = self.signer.sign_request(body);
        let mut request = headers.apply(client.post(url).body(body.to_vec()));
        if let Some(token) = &token {
            request = request.bearer_auth(token);
        }

        let sent_at = Utc::now();
        let started = Instant::now();
        let outcome = tokio::select! {
            _ = cancel.cancelled() => {
                return ColdStartMeasurement::failed(sent_at, "cancelled");
            }
            outcome = async {
                let response = request.send().await?;
                let status = response.status().as_u16();
                let text = response.text().await?;
                Ok::<_, reqwest::Error>((status, text))
            } => outcome,
        };
        let ttfb = started.elapsed();

        let mut measurement = match outcome {
            Ok((status_code, text)) => ColdStartMeasurement {
                timestamp: sent_at,
                ttfb,
                container_startup: None,
                status_code,
                error: (status_code != 200).then(|| {
                    format!("unexpected status code {status_code}: {}", snippet(&text))
                }),
            },
            Err(error) => ColdStartMeasurement {
                ttfb,
                ..ColdStartMeasurement::failed(sent_at, format!("request failed: {error}"))
            },
        };

        if measurement.is_success() {
            info!(workload, ttfb_ms = ttfb.as_secs_f64() * 1_000.0, "cold start measured");
            measurement.container_startup = self.find_startup_latency(cancel, workload, sent_at).await;
        } else {
            warn!(
                workload,
                status = measurement.status_code,
                error = measurement.error.as_deref().unwrap_or_default(),
                "cold start probe failed"
            );
        }
        measurement
    }

    async fn find_startup_latency(
        &self,
        cancel: &CancellationToken,
        workload: &str,
        after: chrono::DateTime<Utc>,
    ) -> Option<Duration> {
        let logs = self.logs.as_ref()?;
        if self.settings.startup_log_wait.is_zero() {
            return None;
        }
        let found = poll_until(
            cancel,
            self.settings.startup_log_wait,
            self.settings.log_poll_interval,
            move || async move {
                match logs.find_container_started(workload, after).await {
                    Ok(Some(entry)) => PollOutcome::Ready(entry),
                    Ok(None) => PollOutcome::Pending("no startup entry yet".to_string()),
                    Err(error) => PollOutcome::Pending(error.to_string()),
                }
            },
        )
        .await;
        match found {
            Ok(entry) => {
                debug!(workload, logged_at = %entry.timestamp, "startup log entry found");
                entry.startup_latency
            }
            Err(error) => {
                debug!(workload, error = %error, "no startup log entry");
                None
            }
        }
    }
}

fn snippet(text: &str) -> &str {
    let end = text
        .char_indices()
        .nth(200)
        .map(|(index, _)| index)
        .unwrap_or(text.len());
    text[..end].trim()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn snippet_truncates_on_char_boundaries() {
        let long = "é".repeat(500);
        assert_eq!(snippet(&long).chars().count(), 200);
        assert_eq!(snippet("  short body \n"), "short body");
    }

    #[test]
    fn settings_follow_benchmark_config() {
        let config = Config::from_yaml_str(
            "platform:\n  project_id: demo\nbenchmark:\n  request_type: slash_command\n  startup_log_wait: 0s\nservices:\n  enabled: [go-gin]\n",
        )
        .expect("config");
        let settings = ProbeSettings::from_config(&config);
        assert_eq!(settings.request_type, RequestType::SlashCommand);
        assert!(settings.startup_log_wait.is_zero());
        assert_eq!(settings.log_poll_interval, LOG_POLL_INTERVAL);
    }
}
