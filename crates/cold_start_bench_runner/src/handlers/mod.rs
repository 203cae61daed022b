//! Command handlers and the phase building blocks they share.
//!
//! Every handler receives a [`BenchContext`] holding the injected platform
//! adapters, so the same code runs against Cloud Run in production and
//! against recording fakes in tests. Per-service failures are folded into the
//! returned [`BenchmarkResult`]; only setup problems surface as
//! [`HandlerError`].

pub mod adhoc;
pub mod batch;
pub mod commands;
pub mod distributed;
pub mod sequential;

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;

use chrono::Utc;
use cold_start_bench_core::config::Config;
use cold_start_bench_core::contract::{BenchmarkResult, BenchmarkRun, ColdStartMeasurement, ServiceResult};
use cold_start_bench_core::report::{render_reports, RenderedReports, ReportError};
use cold_start_bench_core::stats::WarmRequestStats;
use cold_start_bench_core::storage_keys::{RESULTS_JSON, RESULTS_MARKDOWN};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::adapters::object_store::{LocalObjectStore, ObjectStore};
use crate::adapters::{Platform, TopicApi};
use crate::benchmark::{
    workload_spec, ColdStartProber, DeployController, DeployError, DeploySettings, ProbeSettings,
    ScaleToZeroDetector, ScaleToZeroError, WarmLoadGenerator, WarmLoadSettings,
};
use crate::persistence::{PersistError, ResultStore};
use crate::signer::Signer;

#[derive(Debug, thiserror::Error)]
pub enum HandlerError {
    #[error("{0}")]
    Setup(String),
    #[error("no readings found under runs/{0}/")]
    NoReadings(String),
    #[error(transparent)]
    Deploy(#[from] DeployError),
    #[error(transparent)]
    Persist(#[from] PersistError),
    #[error(transparent)]
    Report(#[from] ReportError),
    #[error("writing {path}: {source}")]
    Output {
        path: PathBuf,
        #[source]
        source: crate::adapters::object_store::StoreError,
    },
}

/// Everything a handler needs for one invocation.
pub struct BenchContext {
    pub config: Config,
    pub run: BenchmarkRun,
    pub signer: Signer,
    pub deployer: DeployController,
    pub detector: ScaleToZeroDetector,
    pub prober: ColdStartProber,
    pub warm: WarmLoadGenerator,
    pub topics: Arc<dyn TopicApi>,
    pub cancel: CancellationToken,
}

impl BenchContext {
    pub fn new(
        config: Config,
        run_id: impl Into<String>,
        platform: &Platform,
        http: reqwest::Client,
        cancel: CancellationToken,
    ) -> Self {
        let signer = Signer::new();
        let run = BenchmarkRun {
            run_id: run_id.into(),
            started_at: Utc::now(),
            config: config.summary(),
        };
        let deployer = DeployController::new(
            platform.workloads.clone(),
            http,
            DeploySettings::from_config(&config),
        );
        let prober = ColdStartProber::new(signer.clone(), ProbeSettings::from_config(&config))
            .with_log_search(platform.logs.clone())
            .with_id_tokens(platform.tokens.clone());
        let warm = WarmLoadGenerator::new(signer.clone(), WarmLoadSettings::from_config(&config));
        Self {
            detector: ScaleToZeroDetector::new(platform.metrics.clone()),
            config,
            run,
            signer,
            deployer,
            prober,
            warm,
            topics: platform.topics.clone(),
            cancel,
        }
    }

    pub fn run_id(&self) -> &str {
        &self.run.run_id
    }

    pub fn topic_name(&self) -> String {
        self.config.topic_name(self.run_id())
    }
}

/// A deployed workload a phase can act on.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Target {
    pub service: String,
    pub workload_name: String,
    pub url: String,
}

/// Phase 1: create the run's topic, then deploy every enabled service in
/// turn. Failures are recorded on the service's result and the remaining
/// services still deploy. Once cancelled, no further workload is created.
pub async fn deploy_all(ctx: &BenchContext) -> (BTreeMap<String, ServiceResult>, Vec<Target>) {
    let mut services = BTreeMap::new();
    let mut targets = Vec::new();
    let public_key = ctx.signer.public_key_hex();
    if !ctx.cancel.is_cancelled() {
        ensure_topic(ctx).await;
    }
    for service in &ctx.config.services.enabled {
        if ctx.cancel.is_cancelled() {
            let mut result = ServiceResult::pending(service, ctx.run.config.profile.clone());
            result.workload_name = ctx.config.workload_name(service, ctx.run_id());
            result.image = ctx.config.image_uri(service);
            result.deploy_error = Some("cancelled".to_string());
            services.insert(service.clone(), result);
            continue;
        }
        let outcome = deploy_one(ctx, service, &public_key).await;
        match outcome {
            Ok((result, target)) => {
                services.insert(service.clone(), result);
                targets.push(target);
            }
            Err(result) => {
                services.insert(service.clone(), result);
            }
        }
    }
    (services, targets)
}

async fn deploy_one(
    ctx: &BenchContext,
    service: &str,
    public_key: &str,
) -> Result<(ServiceResult, Target), ServiceResult> {
    let spec = workload_spec(&ctx.config, service, ctx.run_id(), public_key);
    info!(service, workload = %spec.name, "deploying");
    match ctx.deployer.deploy(&ctx.cancel, service, &spec).await {
        Ok(info) => {
            let target = Target {
                service: service.to_string(),
                workload_name: info.workload_name.clone(),
                url: info.url.clone(),
            };
            Ok((
                ServiceResult::from_deployment(&info, ctx.run.config.profile.clone()),
                target,
            ))
        }
        Err(error) => {
            warn!(service, error = %error, "deploy failed");
            let mut result = ServiceResult::pending(service, ctx.run.config.profile.clone());
            result.workload_name = spec.name;
            result.image = spec.image;
            result.deploy_error = Some(error.to_string());
            Err(result)
        }
    }
}

async fn ensure_topic(ctx: &BenchContext) {
    let topic = ctx.topic_name();
    match ctx.topics.ensure_topic(&topic).await {
        Ok(()) => info!(topic = %topic, "topic ready"),
        Err(error) => warn!(topic = %topic, error = %error, "creating topic failed"),
    }
}

/// Look up workloads that were deployed earlier, by run ID when one was
/// given and by the shared name otherwise.
pub async fn resolve_targets(
    ctx: &BenchContext,
    by_run_id: bool,
) -> (BTreeMap<String, ServiceResult>, Vec<Target>) {
    let mut services = BTreeMap::new();
    let mut targets = Vec::new();
    for service in &ctx.config.services.enabled {
        let workload_name = if by_run_id {
            ctx.config.workload_name(service, ctx.run_id())
        } else {
            ctx.config.shared_workload_name(service)
        };
        let mut result = ServiceResult::pending(service, ctx.run.config.profile.clone());
        result.workload_name = workload_name.clone();
        result.image = ctx.config.image_uri(service);
        match ctx.deployer.resolve(&workload_name).await {
            Ok(url) => {
                info!(service, workload = %workload_name, url = %url, "resolved");
                result.service_url = Some(url.clone());
                targets.push(Target {
                    service: service.clone(),
                    workload_name,
                    url,
                });
            }
            Err(error) => {
                warn!(service, error = %error, "could not resolve workload");
                result.deploy_error = Some(error.to_string());
            }
        }
        services.insert(service.clone(), result);
    }
    (services, targets)
}

/// Concurrent scale-to-zero wait, one task per target, all joined before
/// returning. One target timing out does not cancel the others.
pub async fn wait_all_scale_to_zero(
    ctx: &BenchContext,
    targets: &[Target],
) -> Vec<(String, Result<(), ScaleToZeroError>)> {
    let mut tasks = JoinSet::new();
    for target in targets {
        let detector = ctx.detector.clone();
        let cancel = ctx.cancel.clone();
        let service = target.service.clone();
        let workload = target.workload_name.clone();
        let timeout = ctx.config.benchmark.scale_to_zero_timeout;
        let interval = ctx.config.benchmark.scale_to_zero_poll_interval;
        tasks.spawn(async move {
            let outcome = detector
                .wait_for_scale_to_zero(&cancel, &workload, timeout, interval)
                .await;
            (service, outcome)
        });
    }

    let mut outcomes = Vec::with_capacity(targets.len());
    while let Some(joined) = tasks.join_next().await {
        match joined {
            Ok(outcome) => outcomes.push(outcome),
            Err(error) => warn!(error = %error, "scale-to-zero task ended abnormally"),
        }
    }
    outcomes.sort_by(|a, b| a.0.cmp(&b.0));
    outcomes
}

/// Probe each target in order. Targets listed in `not_cold` get a failed
/// sample carrying that reason instead of a probe.
pub async fn probe_all(
    ctx: &BenchContext,
    targets: &[Target],
    not_cold: &BTreeMap<String, String>,
    iteration: u32,
) -> BTreeMap<String, ColdStartMeasurement> {
    let mut measurements = BTreeMap::new();
    for target in targets {
        let measurement = match not_cold.get(&target.service) {
            Some(reason) => ColdStartMeasurement::failed(Utc::now(), reason.clone()),
            None => {
                info!(service = %target.service, iteration, "probing");
                ctx.prober
                    .measure_cold_start(&ctx.cancel, &target.workload_name, &target.url)
                    .await
            }
        };
        measurements.insert(target.service.clone(), measurement);
    }
    measurements
}

/// Waits for every target, then probes. Iteration 0 skips the wait.
pub async fn cold_start_iteration(
    ctx: &BenchContext,
    targets: &[Target],
    iteration: u32,
) -> BTreeMap<String, ColdStartMeasurement> {
    let mut not_cold = BTreeMap::new();
    if iteration > 0 {
        for (service, outcome) in wait_all_scale_to_zero(ctx, targets).await {
            if let Err(error) = outcome {
                warn!(service = %service, iteration, error = %error, "not cold, sample recorded as failed");
                not_cold.insert(service, format!("scale-to-zero: {error}"));
            }
        }
    }
    probe_all(ctx, targets, &not_cold, iteration).await
}

/// Warm load test against each target in turn.
pub async fn warm_all(ctx: &BenchContext, targets: &[Target]) -> BTreeMap<String, Result<WarmRequestStats, String>> {
    let mut outcomes = BTreeMap::new();
    for target in targets {
        if ctx.cancel.is_cancelled() {
            outcomes.insert(target.service.clone(), Err("cancelled".to_string()));
            continue;
        }
        let token = ctx.prober.auth_token(&target.url).await;
        let outcome = ctx
            .warm
            .run(&ctx.cancel, &target.url, token.as_deref())
            .await
            .map_err(|error| error.to_string());
        outcomes.insert(target.service.clone(), outcome);
    }
    outcomes
}

/// Fold warm outcomes into the per-service results.
pub fn apply_warm_results(
    services: &mut BTreeMap<String, ServiceResult>,
    warm: BTreeMap<String, Result<WarmRequestStats, String>>,
) {
    for (service, outcome) in warm {
        let Some(result) = services.get_mut(&service) else {
            continue;
        };
        match outcome {
            Ok(stats) => result.warm_request = Some(stats),
            Err(error) => {
                result.benchmark_error.get_or_insert(format!("warm test: {error}"));
            }
        }
    }
}

pub fn finish(ctx: &BenchContext, services: BTreeMap<String, ServiceResult>) -> BenchmarkResult {
    let mut result = BenchmarkResult::new(&ctx.run);
    result.services = services;
    result.end_time = Utc::now();
    info!(
        run_id = %result.run_id,
        services = result.services.len(),
        errors = result.error_count(),
        elapsed_s = result.elapsed().as_secs(),
        "benchmark complete"
    );
    result
}

/// Best-effort removal of the run's workloads.
pub async fn cleanup_workloads(ctx: &BenchContext) {
    match ctx
        .deployer
        .delete_by_run_id(&ctx.config.workload_prefix(), ctx.run_id())
        .await
    {
        Ok(report) if report.failed.is_empty() => {
            info!(deleted = report.deleted.len(), "cleanup complete");
        }
        Ok(report) => warn!(
            deleted = report.deleted.len(),
            failed = report.failed.len(),
            "cleanup left workloads behind"
        ),
        Err(error) => warn!(error = %error, "cleanup failed"),
    }
    let topic = ctx.topic_name();
    match ctx.topics.delete_topic(&topic).await {
        Ok(()) => info!(topic = %topic, "topic deleted"),
        Err(error) => warn!(topic = %topic, error = %error, "deleting topic failed"),
    }
}

/// Where reports go: always a local directory, plus a bucket when configured.
#[derive(Clone)]
pub struct ReportSink {
    output: LocalObjectStore,
    bucket: Option<ResultStore>,
}

impl ReportSink {
    pub fn new(output_dir: impl Into<PathBuf>, bucket: Option<Arc<dyn ObjectStore>>) -> Self {
        Self {
            output: LocalObjectStore::new(output_dir),
            bucket: bucket.map(ResultStore::new),
        }
    }

    pub fn bucket(&self) -> Option<&ResultStore> {
        self.bucket.as_ref()
    }

    /// Write `results.{json,md}` under `<output>/<subdir>/`, then upload.
    /// Upload failures are logged; the local copy is the fallback.
    pub async fn publish(
        &self,
        result: &BenchmarkResult,
        subdir: &str,
    ) -> Result<RenderedReports, HandlerError> {
        let reports = render_reports(result)?;
        self.write_local(subdir, RESULTS_JSON, &reports.json).await?;
        self.write_local(subdir, RESULTS_MARKDOWN, &reports.markdown).await?;
        if let Some(bucket) = &self.bucket {
            if let Err(error) = bucket.save_results(result, &reports).await {
                warn!(error = %error, "uploading results failed, local copy kept");
            }
        }
        Ok(reports)
    }

    pub async fn write_local(&self, subdir: &str, file_name: &str, body: &str) -> Result<(), HandlerError> {
        let key = format!("{subdir}/{file_name}");
        self.output
            .put_object(&key, body.as_bytes().to_vec(), "")
            .await
            .map_err(|source| HandlerError::Output {
                path: self.output.root().join(&key),
                source,
            })?;
        info!(path = %self.output.describe(&key), "report written");
        Ok(())
    }
}
