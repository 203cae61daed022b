use std::collections::BTreeMap;

use chrono::Utc;
use cold_start_bench_core::contract::{BenchmarkResult, ColdStartMeasurement};
use cold_start_bench_core::stats::ColdStartStats;
use tracing::{info, warn};

use super::{apply_warm_results, deploy_one, finish, warm_all, BenchContext};

/// Legacy mode: one service at a time, each paying its own scale-to-zero
/// waits.
pub async fn run_sequential(ctx: &BenchContext) -> BenchmarkResult {
    let iterations = ctx.config.benchmark.cold_start_iterations;
    let public_key = ctx.signer.public_key_hex();
    let mut services = BTreeMap::new();
    info!(run_id = ctx.run_id(), iterations, "starting sequential benchmark");

    for service in &ctx.config.services.enabled {
        if ctx.cancel.is_cancelled() {
            break;
        }
        let (mut result, target) = match deploy_one(ctx, service, &public_key).await {
            Ok(deployed) => deployed,
            Err(failed) => {
                services.insert(service.clone(), failed);
                continue;
            }
        };

        let mut samples = Vec::with_capacity(iterations as usize);
        for iteration in 0..iterations {
            info!(service = %service, iteration = iteration + 1, of = iterations, "cold-start iteration");
            if iteration > 0 {
                let waited = ctx
                    .detector
                    .wait_for_scale_to_zero(
                        &ctx.cancel,
                        &target.workload_name,
                        ctx.config.benchmark.scale_to_zero_timeout,
                        ctx.config.benchmark.scale_to_zero_poll_interval,
                    )
                    .await;
                if let Err(error) = waited {
                    warn!(service = %service, iteration, error = %error, "not cold, sample recorded as failed");
                    samples.push(ColdStartMeasurement::failed(
                        Utc::now(),
                        format!("scale-to-zero: {error}"),
                    ));
                    continue;
                }
            }
            samples.push(
                ctx.prober
                    .measure_cold_start(&ctx.cancel, &target.workload_name, &target.url)
                    .await,
            );
        }
        result.cold_start = Some(ColdStartStats::from_samples(samples));

        let mut one = BTreeMap::from([(service.clone(), result)]);
        apply_warm_results(&mut one, warm_all(ctx, std::slice::from_ref(&target)).await);
        services.extend(one);
    }

    finish(ctx, services)
}
