use std::time::Duration;

use super::{cold_p50, sorted_by, warm_p50};
use crate::contract::BenchmarkResult;
use crate::duration::{format_compact, format_duration};

/// Scale-to-zero timeouts below this are flagged as quick validation runs.
const QUICK_TEST_THRESHOLD: Duration = Duration::from_secs(5 * 60);

pub fn render_markdown(result: &BenchmarkResult) -> String {
    let mut out = String::new();
    let config = &result.config;

    out.push_str("# Cloud Run Cold Start Benchmark Results\n\n");
    out.push_str(&format!("**Run ID:** `{}`\n\n", result.run_id));
    out.push_str(&format!(
        "**Date:** {}\n\n",
        result.start_time.format("%Y-%m-%d %H:%M:%S UTC")
    ));
    out.push_str(&format!(
        "**Duration:** {}\n\n",
        format_compact(Duration::from_secs(result.elapsed().as_secs()))
    ));
    out.push_str(&format!("**Project:** {}\n\n", config.project_id));
    out.push_str(&format!("**Region:** {}\n\n", config.region));

    out.push_str("## Configuration\n\n");
    out.push_str("| Setting | Value |\n");
    out.push_str("|---------|-------|\n");
    out.push_str(&format!("| Profile | {} |\n", config.profile));
    out.push_str(&format!("| CPU | {} |\n", config.cpu));
    out.push_str(&format!("| Memory | {} |\n", config.memory));
    out.push_str(&format!("| Execution Environment | {} |\n", config.execution_env.as_str()));
    out.push_str(&format!("| Startup CPU Boost | {} |\n", config.startup_cpu_boost));
    out.push_str(&format!("| Cold Start Iterations | {} |\n", config.cold_start_iterations));
    out.push_str(&format!(
        "| Scale-to-Zero Timeout | {} |\n",
        format_compact(config.scale_to_zero_timeout)
    ));
    out.push_str(&format!("| Warm Requests | {} |\n", config.warm_requests));
    out.push_str(&format!("| Warm Concurrency | {} |\n", config.warm_concurrency));
    out.push_str(&format!("| Request Type | {} |\n", config.request_type.as_str()));
    out.push_str(&format!("| Services Tested | {} |\n", result.services.len()));
    out.push('\n');

    if config.scale_to_zero_timeout < QUICK_TEST_THRESHOLD {
        out.push_str(
            "> **Note:** This is a quick validation test with a short scale-to-zero timeout. \
             Results may not reflect true cold start performance. \
             For accurate measurements, use the scheduled full benchmark with a 15-20 minute timeout.\n\n",
        );
    }

    out.push_str("## Cold Start Results\n\n");
    out.push_str("| Service | P50 | P95 | P99 | Min | Max | Container Startup (avg) | Success |\n");
    out.push_str("|---------|-----|-----|-----|-----|-----|-------------------------|---------|\n");
    for (name, service) in sorted_by(result, cold_p50) {
        match &service.cold_start {
            Some(cold) if cold.total() > 0 => {
                out.push_str(&format!(
                    "| {name} | {} | {} | {} | {} | {} | {} | {}/{} |\n",
                    format_duration(cold.ttfb.p50),
                    format_duration(cold.ttfb.p95),
                    format_duration(cold.ttfb.p99),
                    format_duration(cold.ttfb.min),
                    format_duration(cold.ttfb.max),
                    format_duration(cold.container_startup_avg),
                    cold.success_count,
                    cold.total(),
                ));
            }
            _ if service.deploy_error.is_some() => {
                out.push_str(&format!("| {name} | - | - | - | - | - | - | Deploy failed |\n"));
            }
            _ => {
                out.push_str(&format!("| {name} | - | - | - | - | - | - | No data |\n"));
            }
        }
    }
    out.push('\n');

    out.push_str("## Warm Request Results\n\n");
    out.push_str("| Service | P50 | P95 | P99 | Req/s | Success Rate |\n");
    out.push_str("|---------|-----|-----|-----|-------|--------------|\n");
    for (name, service) in sorted_by(result, warm_p50) {
        match &service.warm_request {
            Some(warm) if warm.total_requests > 0 => {
                out.push_str(&format!(
                    "| {name} | {} | {} | {} | {:.1} | {:.1}% |\n",
                    format_duration(warm.latency.p50),
                    format_duration(warm.latency.p95),
                    format_duration(warm.latency.p99),
                    warm.requests_per_second,
                    warm.success_rate(),
                ));
            }
            _ => {
                out.push_str(&format!("| {name} | - | - | - | - | - |\n"));
            }
        }
    }
    out.push('\n');

    out.push_str("## Key Findings\n\n");
    let findings = generate_findings(result);
    if findings.is_empty() {
        out.push_str("- No successful measurements\n");
    }
    for finding in findings {
        out.push_str(&format!("- {finding}\n"));
    }
    out.push('\n');

    let errors: Vec<String> = result
        .services
        .iter()
        .filter_map(|(name, service)| {
            if let Some(error) = &service.deploy_error {
                Some(format!("**{name}**: Deploy error - {error}"))
            } else {
                service
                    .benchmark_error
                    .as_ref()
                    .map(|error| format!("**{name}**: Benchmark error - {error}"))
            }
        })
        .collect();
    if !errors.is_empty() {
        out.push_str("## Errors\n\n");
        for error in errors {
            out.push_str(&format!("- {error}\n"));
        }
        out.push('\n');
    }

    out
}

/// Qualitative observations shown under "Key Findings".
pub fn generate_findings(result: &BenchmarkResult) -> Vec<String> {
    let mut findings = Vec::new();

    let cold = sorted_by(result, cold_p50);
    let measured: Vec<(&str, Duration)> = cold
        .iter()
        .filter_map(|(name, service)| cold_p50(service).map(|p50| (*name, p50)))
        .collect();

    if let (Some((fastest, fastest_p50)), Some((slowest, slowest_p50))) =
        (measured.first(), measured.last())
    {
        findings.push(format!(
            "**Fastest cold start:** {fastest} with P50 of {}",
            format_duration(*fastest_p50)
        ));
        if slowest != fastest {
            findings.push(format!(
                "**Slowest cold start:** {slowest} with P50 of {}",
                format_duration(*slowest_p50)
            ));
        }
        if !fastest_p50.is_zero() {
            let ratio = slowest_p50.as_secs_f64() / fastest_p50.as_secs_f64();
            findings.push(format!(
                "Cold start variance: {ratio:.1}x difference between fastest and slowest"
            ));
        }
    }

    let throughput = result
        .services
        .iter()
        .filter_map(|(name, service)| {
            service
                .warm_request
                .as_ref()
                .filter(|warm| warm.requests_per_second > 0.0)
                .map(|warm| (name, warm.requests_per_second))
        })
        .max_by(|a, b| a.1.total_cmp(&b.1));
    if let Some((name, rps)) = throughput {
        findings.push(format!("**Highest throughput:** {name} at {rps:.1} req/s"));
    }

    let under_500ms = measured
        .iter()
        .filter(|(_, p50)| *p50 < Duration::from_millis(500))
        .count();
    let over_2s = measured
        .iter()
        .filter(|(_, p50)| *p50 >= Duration::from_secs(2))
        .count();
    if under_500ms > 0 {
        findings.push(format!("{under_500ms} services with cold start under 500ms"));
    }
    if over_2s > 0 {
        findings.push(format!("{over_2s} services with cold start over 2s"));
    }

    findings
}
