use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use cold_start_bench_core::contract::{BenchmarkResult, ServiceResult};
use cold_start_bench_core::report::{
    analyze, compare, parse_json_report, render_comparison_markdown, render_markdown,
};
use cold_start_bench_core::storage_keys::{COMPARISON_MARKDOWN, RESULTS_MARKDOWN};
use tracing::{info, warn};

use super::{deploy_all, BenchContext, HandlerError, ReportSink};
use crate::benchmark::{CleanupReport, DeployError};

/// Deploy every enabled service for the run and leave it running.
pub async fn run_deploy(ctx: &BenchContext) -> BTreeMap<String, ServiceResult> {
    info!(run_id = ctx.run_id(), "deploying services");
    let (services, targets) = deploy_all(ctx).await;
    info!(
        run_id = ctx.run_id(),
        deployed = targets.len(),
        failed = services.len() - targets.len(),
        "deploy finished; pass --run-id to measure or finalize against these workloads"
    );
    services
}

/// Delete every workload belonging to the run, then its topic. A topic that
/// cannot be deleted is only logged.
pub async fn run_cleanup(ctx: &BenchContext) -> Result<CleanupReport, DeployError> {
    info!(run_id = ctx.run_id(), "cleaning up workloads");
    let report = ctx
        .deployer
        .delete_by_run_id(&ctx.config.workload_prefix(), ctx.run_id())
        .await?;
    let topic = ctx.topic_name();
    if let Err(error) = ctx.topics.delete_topic(&topic).await {
        warn!(topic = %topic, error = %error, "deleting topic failed");
    }
    Ok(report)
}

async fn load_result(path: &Path) -> Result<BenchmarkResult, HandlerError> {
    let text = tokio::fs::read_to_string(path)
        .await
        .map_err(|error| HandlerError::Setup(format!("reading {}: {error}", path.display())))?;
    Ok(parse_json_report(&text)?)
}

/// Regenerate `results.md` from a saved `results.json`, and `comparison.md`
/// against a baseline when one is given. Files land next to the input.
pub async fn run_report(results: &Path, baseline: Option<&Path>) -> Result<Vec<PathBuf>, HandlerError> {
    let candidate = load_result(results).await?;
    let dir = results
        .parent()
        .filter(|parent| !parent.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."));
    let sink = ReportSink::new(dir, None);
    let mut written = Vec::new();

    sink.write_local(".", RESULTS_MARKDOWN, &render_markdown(&candidate))
        .await?;
    written.push(dir.join(RESULTS_MARKDOWN));

    if let Some(baseline) = baseline {
        let baseline = load_result(baseline).await?;
        let comparison = compare(&baseline, &candidate);
        for finding in analyze(&comparison) {
            info!(finding = %finding, "comparison");
        }
        sink.write_local(".", COMPARISON_MARKDOWN, &render_comparison_markdown(&comparison))
            .await?;
        written.push(dir.join(COMPARISON_MARKDOWN));
    }
    Ok(written)
}

#[cfg(test)]
mod tests {
    use cold_start_bench_core::config::Config;
    use cold_start_bench_core::contract::BenchmarkRun;
    use cold_start_bench_core::report::render_json_report;

    use super::*;

    #[tokio::test]
    async fn report_regenerates_markdown_and_comparison() {
        let dir = tempfile::tempdir().expect("tempdir");
        let config = Config::from_yaml_str(
            "platform:\n  project_id: demo\nservices:\n  enabled: [go-gin]\n",
        )
        .expect("config");
        let result = BenchmarkResult::new(&BenchmarkRun {
            run_id: "ab12cd34".to_string(),
            started_at: chrono::Utc::now(),
            config: config.summary(),
        });
        let json = render_json_report(&result).expect("json");
        let results_path = dir.path().join("results.json");
        let baseline_path = dir.path().join("baseline.json");
        std::fs::write(&results_path, &json).expect("write results");
        std::fs::write(&baseline_path, &json).expect("write baseline");

        let written = run_report(&results_path, Some(&baseline_path))
            .await
            .expect("report");

        assert_eq!(written.len(), 2);
        let markdown = std::fs::read_to_string(dir.path().join("results.md")).expect("markdown");
        assert!(markdown.contains("ab12cd34"));
        assert!(dir.path().join("comparison.md").exists());
    }

    #[tokio::test]
    async fn missing_results_file_is_a_setup_error() {
        let error = run_report(Path::new("/nonexistent/results.json"), None)
            .await
            .expect_err("missing file");
        assert!(matches!(error, HandlerError::Setup(_)));
    }
}
