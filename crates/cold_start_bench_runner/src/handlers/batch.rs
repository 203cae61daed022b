use std::collections::BTreeMap;

use cold_start_bench_core::contract::{BenchmarkResult, ColdStartMeasurement, ServiceResult};
use cold_start_bench_core::stats::ColdStartStats;
use tracing::info;

use super::{apply_warm_results, cold_start_iteration, deploy_all, finish, warm_all, BenchContext};

/// Phased run over every enabled service: deploy all, then `I` rounds of
/// (concurrent scale-to-zero wait, sequential probes), then warm tests.
pub async fn run_batch(ctx: &BenchContext) -> BenchmarkResult {
    let iterations = ctx.config.benchmark.cold_start_iterations;
    info!(
        run_id = ctx.run_id(),
        services = ?ctx.config.services.enabled,
        iterations,
        "starting batch benchmark"
    );

    info!("phase 1: deploy all services");
    let (mut services, targets) = deploy_all(ctx).await;

    info!(healthy = targets.len(), "phase 2: cold-start iterations");
    let mut samples: BTreeMap<String, Vec<ColdStartMeasurement>> = BTreeMap::new();
    for iteration in 0..iterations {
        if ctx.cancel.is_cancelled() {
            break;
        }
        info!(iteration = iteration + 1, of = iterations, "cold-start iteration");
        for (service, measurement) in cold_start_iteration(ctx, &targets, iteration).await {
            samples.entry(service).or_default().push(measurement);
        }
    }
    apply_cold_samples(&mut services, samples);

    info!("phase 3: warm request tests");
    let warm = warm_all(ctx, &targets).await;
    apply_warm_results(&mut services, warm);

    finish(ctx, services)
}

/// Attach collected samples to their services as aggregated stats.
pub fn apply_cold_samples(
    services: &mut BTreeMap<String, ServiceResult>,
    samples: BTreeMap<String, Vec<ColdStartMeasurement>>,
) {
    for (service, measurements) in samples {
        if let Some(result) = services.get_mut(&service) {
            result.cold_start = Some(ColdStartStats::from_samples(measurements));
        }
    }
}
