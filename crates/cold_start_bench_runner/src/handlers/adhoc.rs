use std::collections::BTreeMap;

use cold_start_bench_core::contract::BenchmarkResult;
use tracing::{info, warn};

use super::batch::apply_cold_samples;
use super::{
    apply_warm_results, cleanup_workloads, deploy_all, finish, probe_all, resolve_targets,
    wait_all_scale_to_zero, warm_all, BenchContext, HandlerError, ReportSink,
};

/// Which workloads a single-pass run measures.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AdhocTargets {
    /// Deploy fresh workloads for this run and delete them afterwards.
    Deploy,
    /// Use workloads deployed earlier, named by run ID.
    ExistingForRun,
    /// Use long-lived workloads deployed outside this tool.
    ExistingShared,
}

/// Single pass for quick validation: one scale-to-zero wait, one cold probe
/// per service, a warm test, and a report.
pub async fn run_adhoc(
    ctx: &BenchContext,
    sink: &ReportSink,
    targets_from: AdhocTargets,
) -> Result<BenchmarkResult, HandlerError> {
    info!(run_id = ctx.run_id(), mode = ?targets_from, "starting adhoc benchmark");
    let (mut services, targets) = match targets_from {
        AdhocTargets::Deploy => deploy_all(ctx).await,
        AdhocTargets::ExistingForRun => resolve_targets(ctx, true).await,
        AdhocTargets::ExistingShared => resolve_targets(ctx, false).await,
    };
    if targets.is_empty() && targets_from != AdhocTargets::Deploy {
        return Err(HandlerError::Setup(
            "no deployed services found; deploy them first".to_string(),
        ));
    }

    let mut not_cold = BTreeMap::new();
    for (service, outcome) in wait_all_scale_to_zero(ctx, &targets).await {
        if let Err(error) = outcome {
            warn!(service = %service, error = %error, "not cold, sample recorded as failed");
            not_cold.insert(service, format!("scale-to-zero: {error}"));
        }
    }
    let samples = probe_all(ctx, &targets, &not_cold, 0)
        .await
        .into_iter()
        .map(|(service, measurement)| (service, vec![measurement]))
        .collect();
    apply_cold_samples(&mut services, samples);

    let warm = warm_all(ctx, &targets).await;
    apply_warm_results(&mut services, warm);

    let result = finish(ctx, services);
    let subdir = format!("adhoc-{}", result.start_time.format("%Y-%m-%dT%H-%M-%SZ"));
    let published = sink.publish(&result, &subdir).await;
    if let (Ok(reports), Some(bucket)) = (&published, sink.bucket()) {
        if let Err(error) = bucket.save_adhoc(result.start_time, reports).await {
            warn!(error = %error, "uploading adhoc results failed");
        }
    }

    if targets_from == AdhocTargets::Deploy {
        cleanup_workloads(ctx).await;
    }
    published?;
    Ok(result)
}
