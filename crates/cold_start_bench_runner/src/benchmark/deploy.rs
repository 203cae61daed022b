use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use cold_start_bench_core::config::Config;
use cold_start_bench_core::contract::DeploymentInfo;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::poll::{poll_until, PollError, PollOutcome};
use crate::adapters::{
    OperationState, PlatformError, Readiness, WorkloadApi, WorkloadSpec,
};

const OPERATION_POLL_INTERVAL: Duration = Duration::from_secs(3);
const READINESS_POLL_INTERVAL: Duration = Duration::from_secs(5);
const HEALTH_POLL_INTERVAL: Duration = Duration::from_secs(2);

#[derive(Debug, thiserror::Error)]
pub enum DeployError {
    #[error("{step}: {source}")]
    Platform {
        step: &'static str,
        #[source]
        source: PlatformError,
    },
    #[error("{step}: {source}")]
    Wait {
        step: &'static str,
        #[source]
        source: PollError,
    },
    #[error("workload {0} not found")]
    NotFound(String),
    #[error("workload {0} has no URL")]
    MissingUrl(String),
}

impl DeployError {
    fn platform(step: &'static str) -> impl FnOnce(PlatformError) -> Self {
        move |source| Self::Platform { step, source }
    }

    fn wait(step: &'static str) -> impl FnOnce(PollError) -> Self {
        move |source| Self::Wait { step, source }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeploySettings {
    pub operation_timeout: Duration,
    pub operation_poll_interval: Duration,
    pub readiness_timeout: Duration,
    pub readiness_poll_interval: Duration,
    pub health_check: bool,
    pub health_poll_interval: Duration,
}

impl DeploySettings {
    pub fn from_config(config: &Config) -> Self {
        Self {
            operation_timeout: config.benchmark.deploy_operation_timeout,
            operation_poll_interval: OPERATION_POLL_INTERVAL,
            readiness_timeout: config.benchmark.readiness_timeout,
            readiness_poll_interval: READINESS_POLL_INTERVAL,
            health_check: config.benchmark.health_check,
            health_poll_interval: HEALTH_POLL_INTERVAL,
        }
    }
}

/// Best-effort bulk deletion outcome.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CleanupReport {
    pub deleted: Vec<String>,
    pub failed: Vec<(String, String)>,
}

/// Desired workload for `service` within `run_id`, with the probe key and
/// messaging settings injected as environment.
pub fn workload_spec(config: &Config, service: &str, run_id: &str, public_key: &str) -> WorkloadSpec {
    let profile = config.profile();
    let env = BTreeMap::from([
        ("DISCORD_PUBLIC_KEY".to_string(), public_key.to_string()),
        (
            "GOOGLE_CLOUD_PROJECT".to_string(),
            config.platform.project_id.clone(),
        ),
        ("PUBSUB_TOPIC".to_string(), config.topic_name(run_id)),
    ]);
    WorkloadSpec {
        name: config.workload_name(service, run_id),
        image: config.image_uri(service),
        cpu: profile.cpu,
        memory: profile.memory,
        max_instances: profile.max_instances,
        concurrency: profile.concurrency,
        execution_env: profile.execution_env,
        startup_cpu_boost: profile.startup_cpu_boost,
        env,
    }
}

pub struct DeployController {
    workloads: Arc<dyn WorkloadApi>,
    http: reqwest::Client,
    settings: DeploySettings,
}

impl DeployController {
    pub fn new(workloads: Arc<dyn WorkloadApi>, http: reqwest::Client, settings: DeploySettings) -> Self {
        Self {
            workloads,
            http,
            settings,
        }
    }

    /// Create or update the workload, wait for it to serve, and open it to
    /// unauthenticated invocation.
    pub async fn deploy(
        &self,
        cancel: &CancellationToken,
        service: &str,
        spec: &WorkloadSpec,
    ) -> Result<DeploymentInfo, DeployError> {
        let started = Instant::now();
        let existing = self
            .workloads
            .get_workload(&spec.name)
            .await
            .map_err(DeployError::platform("look up workload"))?;

        let handle = if existing.is_some() {
            info!(service, workload = %spec.name, "updating existing workload");
            self.workloads
                .update_workload(spec)
                .await
                .map_err(DeployError::platform("update workload"))?
        } else {
            info!(service, workload = %spec.name, image = %spec.image, "creating workload");
            self.workloads
                .create_workload(spec)
                .await
                .map_err(DeployError::platform("create workload"))?
        };

        let workloads = &self.workloads;
        let operation = &handle;
        poll_until(
            cancel,
            self.settings.operation_timeout,
            self.settings.operation_poll_interval,
            move || async move {
                match workloads.get_operation(operation).await {
                    Ok(OperationState::Succeeded) => PollOutcome::Ready(()),
                    Ok(OperationState::Running) => PollOutcome::Pending("operation running".to_string()),
                    Ok(OperationState::Failed(message)) => PollOutcome::Failed(message),
                    Err(error) => PollOutcome::Failed(error.to_string()),
                }
            },
        )
        .await
        .map_err(DeployError::wait("deployment operation"))?;
        debug!(service, operation = %handle.name, "operation complete");

        let url = poll_until(
            cancel,
            self.settings.readiness_timeout,
            self.settings.readiness_poll_interval,
            move || async move {
                match workloads.get_workload(&spec.name).await {
                    Ok(Some(status)) => match status.readiness {
                        Readiness::Ready => PollOutcome::Ready(status.url),
                        Readiness::Pending(reason) => PollOutcome::Pending(reason),
                        Readiness::Failed(message) => PollOutcome::Failed(message),
                    },
                    Ok(None) => PollOutcome::Pending("workload not visible yet".to_string()),
                    Err(error) => PollOutcome::Failed(error.to_string()),
                }
            },
        )
        .await
        .map_err(DeployError::wait("readiness"))?
        .ok_or_else(|| DeployError::MissingUrl(spec.name.clone()))?;

        self.workloads
            .set_public_invoker(&spec.name)
            .await
            .map_err(DeployError::platform("grant public invoker"))?;

        if self.settings.health_check {
            self.wait_healthy(cancel, &url).await?;
        }

        let deployment_duration = started.elapsed();
        info!(
            service,
            url = %url,
            duration_s = deployment_duration.as_secs_f64(),
            "deployed"
        );
        Ok(DeploymentInfo {
            service_name: service.to_string(),
            workload_name: spec.name.clone(),
            image: spec.image.clone(),
            url,
            deployment_duration,
        })
    }

    async fn wait_healthy(&self, cancel: &CancellationToken, url: &str) -> Result<(), DeployError> {
        let health_url = format!("{}/health", url.trim_end_matches('/'));
        let health_url = health_url.as_str();
        let http = &self.http;
        poll_until(
            cancel,
            self.settings.readiness_timeout,
            self.settings.health_poll_interval,
            move || async move {
                match http.get(health_url).send().await {
                    Ok(response) if response.status() == reqwest::StatusCode::OK => {
                        PollOutcome::Ready(())
                    }
                    Ok(response) => PollOutcome::Pending(format!("HTTP {}", response.status().as_u16())),
                    Err(error) => PollOutcome::Pending(error.to_string()),
                }
            },
        )
        .await
        .map_err(DeployError::wait("health check"))
    }

    /// URL of a workload that is already deployed and serving.
    pub async fn resolve(&self, workload_name: &str) -> Result<String, DeployError> {
        let status = self
            .workloads
            .get_workload(workload_name)
            .await
            .map_err(DeployError::platform("look up workload"))?
            .ok_or_else(|| DeployError::NotFound(workload_name.to_string()))?;
        status
            .url
            .ok_or_else(|| DeployError::MissingUrl(workload_name.to_string()))
    }

    pub async fn delete(&self, workload_name: &str) -> Result<(), DeployError> {
        self.workloads
            .delete_workload(workload_name)
            .await
            .map_err(DeployError::platform("delete workload"))
    }

    pub async fn list_by_prefix(&self, prefix: &str) -> Result<Vec<String>, DeployError> {
        self.workloads
            .list_workloads(prefix)
            .await
            .map_err(DeployError::platform("list workloads"))
    }

    /// Delete every workload under `prefix` whose name ends in `-<run_id>`.
    /// Individual failures are collected, not returned.
    pub async fn delete_by_run_id(&self, prefix: &str, run_id: &str) -> Result<CleanupReport, DeployError> {
        let suffix = format!("-{run_id}");
        let mut report = CleanupReport::default();
        for name in self.list_by_prefix(prefix).await? {
            if !name.ends_with(&suffix) {
                continue;
            }
            match self.delete(&name).await {
                Ok(()) => {
                    info!(workload = %name, "deleted workload");
                    report.deleted.push(name);
                }
                Err(error) => {
                    warn!(workload = %name, error = %error, "failed to delete workload");
                    report.failed.push((name, error.to_string()));
                }
            }
        }
        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use async_trait::async_trait;

    use super::*;
    use crate::adapters::{OperationHandle, WorkloadStatus};

    #[derive(Default)]
    struct FakeWorkloads {
        existing: Mutex<Vec<String>>,
        calls: Mutex<Vec<String>>,
        operation_polls_until_done: Mutex<u32>,
        fail_operation: Option<String>,
        fail_invoker: bool,
        undeletable: Vec<String>,
    }

    impl FakeWorkloads {
        fn record(&self, call: String) {
            self.calls.lock().expect("calls lock").push(call);
        }

        fn calls(&self) -> Vec<String> {
            self.calls.lock().expect("calls lock").clone()
        }
    }

    #[async_trait]
    impl WorkloadApi for FakeWorkloads {
        async fn get_workload(&self, name: &str) -> Result<Option<WorkloadStatus>, PlatformError> {
            let exists = self.existing.lock().expect("existing lock").iter().any(|n| n == name);
            Ok(exists.then(|| WorkloadStatus {
                name: name.to_string(),
                url: Some(format!("https://{name}.run.app")),
                readiness: Readiness::Ready,
            }))
        }

        async fn create_workload(&self, spec: &WorkloadSpec) -> Result<OperationHandle, PlatformError> {
            self.record(format!("create {}", spec.name));
            self.existing.lock().expect("existing lock").push(spec.name.clone());
            Ok(OperationHandle {
                name: format!("operations/{}", spec.name),
            })
        }

        async fn update_workload(&self, spec: &WorkloadSpec) -> Result<OperationHandle, PlatformError> {
            self.record(format!("update {}", spec.name));
            Ok(OperationHandle {
                name: format!("operations/{}", spec.name),
            })
        }

        async fn get_operation(&self, _handle: &OperationHandle) -> Result<OperationState, PlatformError> {
            if let Some(message) = &self.fail_operation {
                return Ok(OperationState::Failed(message.clone()));
            }
            let mut remaining = self.operation_polls_until_done.lock().expect("polls lock");
            if *remaining == 0 {
                return Ok(OperationState::Succeeded);
            }
            *remaining -= 1;
            Ok(OperationState::Running)
        }

        async fn set_public_invoker(&self, name: &str) -> Result<(), PlatformError> {
            self.record(format!("invoker {name}"));
            if self.fail_invoker {
                return Err(PlatformError::Api {
                    operation: "set IAM policy".to_string(),
                    status: 403,
                    body: "denied".to_string(),
                });
            }
            Ok(())
        }

        async fn list_workloads(&self, prefix: &str) -> Result<Vec<String>, PlatformError> {
            Ok(self
                .existing
                .lock()
                .expect("existing lock")
                .iter()
                .filter(|name| name.starts_with(prefix))
                .cloned()
                .collect())
        }

        async fn delete_workload(&self, name: &str) -> Result<(), PlatformError> {
            self.record(format!("delete {name}"));
            if self.undeletable.iter().any(|n| n == name) {
                return Err(PlatformError::Other("in use".to_string()));
            }
            Ok(())
        }
    }

    fn config() -> Config {
        Config::from_yaml_str(
            "platform:\n  project_id: demo\nservices:\n  enabled: [go-gin]\n",
        )
        .expect("config")
    }

    fn settings() -> DeploySettings {
        DeploySettings {
            health_check: false,
            ..DeploySettings::from_config(&config())
        }
    }

    fn controller(fake: Arc<FakeWorkloads>) -> DeployController {
        DeployController::new(fake, reqwest::Client::new(), settings())
    }

    #[test]
    fn spec_carries_profile_and_probe_key() {
        let spec = workload_spec(&config(), "go-gin", "ab12cd34", "deadbeef");
        assert_eq!(spec.name, "discord-go-gin-ab12cd34");
        assert_eq!(
            spec.image,
            "us-central1-docker.pkg.dev/demo/discord-services/go-gin:latest"
        );
        assert_eq!(spec.env["DISCORD_PUBLIC_KEY"], "deadbeef");
        assert_eq!(spec.env["PUBSUB_TOPIC"], "discord-benchmark-ab12cd34");
        assert_eq!(spec.max_instances, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn creates_missing_workload_and_waits_for_operation() {
        let fake = Arc::new(FakeWorkloads {
            operation_polls_until_done: Mutex::new(2),
            ..FakeWorkloads::default()
        });
        let spec = workload_spec(&config(), "go-gin", "ab12cd34", "key");

        let info = controller(fake.clone())
            .deploy(&CancellationToken::new(), "go-gin", &spec)
            .await
            .expect("deploy");

        assert_eq!(info.url, "https://discord-go-gin-ab12cd34.run.app");
        assert_eq!(info.deployment_duration, Duration::from_secs(6));
        assert_eq!(
            fake.calls(),
            vec![
                "create discord-go-gin-ab12cd34".to_string(),
                "invoker discord-go-gin-ab12cd34".to_string(),
            ]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn existing_workload_is_updated_in_place() {
        let fake = Arc::new(FakeWorkloads {
            existing: Mutex::new(vec!["discord-go-gin-ab12cd34".to_string()]),
            ..FakeWorkloads::default()
        });
        let spec = workload_spec(&config(), "go-gin", "ab12cd34", "key");
        controller(fake.clone())
            .deploy(&CancellationToken::new(), "go-gin", &spec)
            .await
            .expect("deploy");
        assert_eq!(fake.calls()[0], "update discord-go-gin-ab12cd34");
    }

    #[tokio::test(start_paused = true)]
    async fn failed_operation_and_invoker_errors_fail_the_deploy() {
        let spec = workload_spec(&config(), "go-gin", "ab12cd34", "key");

        let failing_op = Arc::new(FakeWorkloads {
            fail_operation: Some("image not found".to_string()),
            ..FakeWorkloads::default()
        });
        let error = controller(failing_op)
            .deploy(&CancellationToken::new(), "go-gin", &spec)
            .await
            .expect_err("operation failed");
        assert!(error.to_string().contains("image not found"));

        let failing_iam = Arc::new(FakeWorkloads {
            fail_invoker: true,
            ..FakeWorkloads::default()
        });
        let error = controller(failing_iam)
            .deploy(&CancellationToken::new(), "go-gin", &spec)
            .await
            .expect_err("invoker failed");
        assert!(matches!(error, DeployError::Platform { step: "grant public invoker", .. }));
    }

    #[tokio::test]
    async fn delete_by_run_id_only_touches_that_run() {
        let fake = Arc::new(FakeWorkloads {
            existing: Mutex::new(vec![
                "discord-go-gin-ab12cd34".to_string(),
                "discord-rust-actix-ab12cd34".to_string(),
                "discord-go-gin-ffff0000".to_string(),
                "discord-go-gin".to_string(),
            ]),
            undeletable: vec!["discord-rust-actix-ab12cd34".to_string()],
            ..FakeWorkloads::default()
        });

        let report = controller(fake.clone())
            .delete_by_run_id("discord-", "ab12cd34")
            .await
            .expect("cleanup");

        assert_eq!(report.deleted, vec!["discord-go-gin-ab12cd34".to_string()]);
        assert_eq!(report.failed.len(), 1);
        assert_eq!(report.failed[0].0, "discord-rust-actix-ab12cd34");
        assert!(!fake.calls().iter().any(|call| call.contains("ffff0000")));
    }

    #[tokio::test]
    async fn resolve_reports_missing_workloads() {
        let fake = Arc::new(FakeWorkloads::default());
        let error = controller(fake)
            .resolve("discord-go-gin")
            .await
            .expect_err("missing");
        assert!(matches!(error, DeployError::NotFound(_)));
    }
}
