//! Cold-start runs split across scheduled invocations: each `measure` takes
//! one reading and persists it, `finalize` folds the day's readings into a
//! report.

use std::collections::BTreeMap;

use chrono::Utc;
use cold_start_bench_core::consolidate::{consolidate_readings, distinct_fingerprints};
use cold_start_bench_core::contract::{
    BenchmarkResult, ColdStartMeasurement, Reading, ReadingEntry, ServiceResult,
};
use tracing::{info, warn};

use super::{
    apply_warm_results, probe_all, resolve_targets, warm_all, BenchContext, HandlerError,
    ReportSink, Target,
};
use crate::persistence::ResultStore;

/// Take one cold-start reading across all services and persist it under
/// `runs/<run_date>/reading-<iteration>.json`.
pub async fn run_measure(
    ctx: &BenchContext,
    store: &ResultStore,
    run_date: &str,
    iteration: u32,
    by_run_id: bool,
) -> Result<Reading, HandlerError> {
    info!(run_date, iteration, "taking cold-start reading");
    let (services, targets) = resolve_targets(ctx, by_run_id).await;
    if targets.is_empty() {
        return Err(HandlerError::Setup(
            "no deployed services found; deploy them first".to_string(),
        ));
    }

    for target in &targets {
        match ctx.detector.is_scaled_to_zero(&target.workload_name).await {
            Ok(true) => {}
            Ok(false) => warn!(service = %target.service, "not at zero instances, measuring anyway"),
            Err(error) => warn!(service = %target.service, error = %error, "could not verify instance count"),
        }
    }

    let measured = probe_all(ctx, &targets, &BTreeMap::new(), iteration).await;
    let mut reading = Reading::new(run_date, iteration, Utc::now(), ctx.run.config.clone());
    for (service, result) in services {
        let measurement = match measured.get(&service) {
            Some(measurement) => measurement.clone(),
            None => ColdStartMeasurement::failed(
                Utc::now(),
                result.deploy_error.clone().unwrap_or_else(|| "not deployed".to_string()),
            ),
        };
        reading.services.insert(
            service.clone(),
            ReadingEntry {
                service_name: service,
                workload_name: result.workload_name,
                service_url: result.service_url.unwrap_or_default(),
                measurement,
            },
        );
    }

    let key = store.save_reading(run_date, &reading).await?;
    info!(key = %key, services = reading.services.len(), "reading saved");
    Ok(reading)
}

/// Consolidate every reading for `run_date`, warm-test the services, publish
/// the report and delete the intermediate readings.
pub async fn run_finalize(
    ctx: &BenchContext,
    sink: &ReportSink,
    run_date: &str,
    by_run_id: bool,
) -> Result<BenchmarkResult, HandlerError> {
    let store = sink
        .bucket()
        .ok_or_else(|| HandlerError::Setup("finalize needs a results bucket".to_string()))?;
    let readings = store.load_all_readings(run_date).await?;
    if readings.is_empty() {
        return Err(HandlerError::NoReadings(run_date.to_string()));
    }
    for reading in &readings {
        info!(iteration = reading.iteration, services = reading.services.len(), "reading");
    }
    let fingerprints = distinct_fingerprints(&readings);
    if fingerprints.len() > 1 {
        warn!(
            configurations = fingerprints.len(),
            "readings were taken under different configurations"
        );
    }

    let consolidated = consolidate_readings(&readings, &ctx.config.services.enabled);
    let mut services = BTreeMap::new();
    let mut targets = Vec::new();
    let mut unresolved = Vec::new();
    for (name, stats) in consolidated.cold_start {
        let mut result = ServiceResult::pending(&name, ctx.run.config.profile.clone());
        result.image = ctx.config.image_uri(&name);
        result.cold_start = Some(stats);
        match consolidated.observed.get(&name) {
            Some(seen) if !seen.service_url.is_empty() => {
                result.workload_name = seen.workload_name.clone();
                result.service_url = Some(seen.service_url.clone());
                targets.push(Target {
                    service: name.clone(),
                    workload_name: seen.workload_name.clone(),
                    url: seen.service_url.clone(),
                });
            }
            _ => unresolved.push(name.clone()),
        }
        services.insert(name, result);
    }

    if !unresolved.is_empty() {
        let (resolved, extra) = resolve_targets(ctx, by_run_id).await;
        for target in extra.into_iter().filter(|t| unresolved.contains(&t.service)) {
            if let Some(result) = services.get_mut(&target.service) {
                result.workload_name = target.workload_name.clone();
                result.service_url = Some(target.url.clone());
            }
            targets.push(target);
        }
        for name in &unresolved {
            let (Some(result), Some(lookup)) = (services.get_mut(name), resolved.get(name)) else {
                continue;
            };
            if result.service_url.is_none() {
                result.benchmark_error = lookup.deploy_error.clone();
            }
        }
    }

    info!(services = targets.len(), "warm request tests");
    let warm = warm_all(ctx, &targets).await;
    apply_warm_results(&mut services, warm);

    let mut result = BenchmarkResult::new(&ctx.run);
    result.run_id = run_date.to_string();
    result.start_time = readings
        .iter()
        .map(|reading| reading.timestamp)
        .min()
        .unwrap_or(ctx.run.started_at);
    result.services = services;
    result.end_time = Utc::now();

    sink.publish(&result, run_date).await?;
    if let Err(error) = store.cleanup_run(run_date).await {
        warn!(error = %error, "cleaning up readings failed");
    }
    info!(run_date, readings = readings.len(), "finalize complete");
    Ok(result)
}
