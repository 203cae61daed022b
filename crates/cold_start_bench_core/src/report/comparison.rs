//! Run-to-run comparison of cold-start and warm P50 latencies.

use std::collections::BTreeMap;
use std::time::Duration;

use super::{cold_p50, warm_p50};
use crate::contract::BenchmarkResult;
use crate::duration::{format_delta, format_duration};

#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct LatencyDelta {
    pub baseline: Option<Duration>,
    pub candidate: Option<Duration>,
}

impl LatencyDelta {
    /// `candidate - baseline` in nanoseconds, when both sides were measured.
    pub fn delta_nanos(&self) -> Option<i128> {
        match (self.baseline, self.candidate) {
            (Some(base), Some(cand)) => Some(cand.as_nanos() as i128 - base.as_nanos() as i128),
            _ => None,
        }
    }

    /// `candidate / baseline`; above 1 means the candidate is slower.
    pub fn ratio(&self) -> Option<f64> {
        match (self.baseline, self.candidate) {
            (Some(base), Some(cand)) if !base.is_zero() => {
                Some(cand.as_nanos() as f64 / base.as_nanos() as f64)
            }
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ServiceComparison {
    pub service_name: String,
    pub cold_start: LatencyDelta,
    pub warm: LatencyDelta,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ComparisonReport {
    pub baseline_run_id: String,
    pub candidate_run_id: String,
    pub candidate_start: chrono::DateTime<chrono::Utc>,
    pub services: BTreeMap<String, ServiceComparison>,
}

/// Compare every service present in both runs; one-sided services are skipped.
pub fn compare(baseline: &BenchmarkResult, candidate: &BenchmarkResult) -> ComparisonReport {
    let services = candidate
        .services
        .iter()
        .filter_map(|(name, cand)| {
            let base = baseline.services.get(name)?;
            Some((
                name.clone(),
                ServiceComparison {
                    service_name: name.clone(),
                    cold_start: LatencyDelta {
                        baseline: cold_p50(base),
                        candidate: cold_p50(cand),
                    },
                    warm: LatencyDelta {
                        baseline: warm_p50(base),
                        candidate: warm_p50(cand),
                    },
                },
            ))
        })
        .collect();

    ComparisonReport {
        baseline_run_id: baseline.run_id.clone(),
        candidate_run_id: candidate.run_id.clone(),
        candidate_start: candidate.start_time,
        services,
    }
}

fn display(value: Option<Duration>) -> String {
    value.map_or_else(|| "-".to_string(), format_duration)
}

fn write_table(out: &mut String, report: &ComparisonReport, pick: fn(&ServiceComparison) -> LatencyDelta) {
    out.push_str("| Service | Baseline P50 | Candidate P50 | Delta | Ratio |\n");
    out.push_str("|---------|--------------|---------------|-------|-------|\n");
    for (name, comparison) in &report.services {
        let delta = pick(comparison);
        out.push_str(&format!(
            "| {name} | {} | {} | {} | {} |\n",
            display(delta.baseline),
            display(delta.candidate),
            delta
                .delta_nanos()
                .map_or_else(|| "-".to_string(), format_delta),
            delta
                .ratio()
                .map_or_else(|| "-".to_string(), |ratio| format!("{ratio:.1}x")),
        ));
    }
    out.push('\n');
}

pub fn render_comparison_markdown(report: &ComparisonReport) -> String {
    let mut out = String::new();
    out.push_str("# Benchmark Comparison\n\n");
    out.push_str(&format!("**Baseline Run ID:** `{}`\n\n", report.baseline_run_id));
    out.push_str(&format!("**Candidate Run ID:** `{}`\n\n", report.candidate_run_id));
    out.push_str(&format!(
        "**Date:** {}\n\n",
        report.candidate_start.format("%Y-%m-%d %H:%M:%S UTC")
    ));

    out.push_str("## Cold Start Comparison\n\n");
    write_table(&mut out, report, |c| c.cold_start);
    out.push_str("## Warm Latency Comparison\n\n");
    write_table(&mut out, report, |c| c.warm);

    out.push_str("## Analysis\n\n");
    let findings = analyze(report);
    if findings.is_empty() {
        out.push_str("- No services were measured in both runs\n");
    }
    for finding in findings {
        out.push_str(&format!("- {finding}\n"));
    }
    out.push('\n');

    out.push_str("## Notes\n\n");
    out.push_str("- **Delta**: Candidate - Baseline (positive = candidate is slower)\n");
    out.push_str("- **Ratio**: Candidate / Baseline (>1 = candidate is slower)\n");
    out
}

pub fn analyze(report: &ComparisonReport) -> Vec<String> {
    let mut findings = Vec::new();

    let cold_ratios: Vec<(&str, f64)> = report
        .services
        .iter()
        .filter_map(|(name, c)| c.cold_start.ratio().map(|r| (name.as_str(), r)))
        .collect();
    if !cold_ratios.is_empty() {
        let avg = cold_ratios.iter().map(|(_, r)| r).sum::<f64>() / cold_ratios.len() as f64;
        findings.push(format!("Average cold start overhead: {avg:.1}x compared to baseline"));
    }
    if let Some((name, ratio)) = cold_ratios.iter().max_by(|a, b| a.1.total_cmp(&b.1)) {
        findings.push(format!("Highest cold start overhead: {name} ({ratio:.1}x)"));
    }
    if let Some((name, ratio)) = cold_ratios.iter().min_by(|a, b| a.1.total_cmp(&b.1)) {
        findings.push(format!("Lowest cold start overhead: {name} ({ratio:.1}x)"));
    }

    let warm_ratios: Vec<f64> = report
        .services
        .values()
        .filter_map(|c| c.warm.ratio())
        .collect();
    if !warm_ratios.is_empty() {
        let avg = warm_ratios.iter().sum::<f64>() / warm_ratios.len() as f64;
        findings.push(format!("Average warm latency overhead: {avg:.1}x compared to baseline"));
    }

    let candidates: Vec<(&str, Duration)> = report
        .services
        .iter()
        .filter_map(|(name, c)| c.cold_start.candidate.map(|p50| (name.as_str(), p50)))
        .collect();
    let fastest = candidates.iter().min_by_key(|(_, p50)| *p50);
    let slowest = candidates.iter().max_by_key(|(_, p50)| *p50);
    if let Some((name, p50)) = fastest {
        findings.push(format!(
            "Fastest candidate cold start: {name} ({})",
            format_duration(*p50)
        ));
    }
    if let (Some((slow, p50)), Some((fast, _))) = (slowest, fastest) {
        if slow != fast {
            findings.push(format!(
                "Slowest candidate cold start: {slow} ({})",
                format_duration(*p50)
            ));
        }
    }

    findings
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::report::fixtures;

    fn candidate() -> BenchmarkResult {
        let mut result = fixtures::result();
        result.run_id = "ff00ff00".to_string();
        if let Some(go) = result.services.get_mut("go-gin") {
            go.cold_start = Some(fixtures::cold(&[600, 560, 900, 600, 590]));
        }
        result.services.remove("rust-actix");
        result
    }

    #[test]
    fn services_on_one_side_only_are_skipped() {
        let report = compare(&fixtures::result(), &candidate());
        assert!(report.services.contains_key("go-gin"));
        assert!(!report.services.contains_key("rust-actix"));
        assert!(report.services.contains_key("java-spring"));
    }

    #[test]
    fn delta_and_ratio_use_p50() {
        let report = compare(&fixtures::result(), &candidate());
        let go = &report.services["go-gin"];
        assert_eq!(go.cold_start.baseline, Some(Duration::from_millis(300)));
        assert_eq!(go.cold_start.candidate, Some(Duration::from_millis(600)));
        assert_eq!(go.cold_start.delta_nanos(), Some(300_000_000));
        assert_eq!(go.cold_start.ratio(), Some(2.0));
        assert_eq!(go.warm.ratio(), Some(1.0));

        let java = &report.services["java-spring"];
        assert_eq!(java.cold_start.ratio(), None);
    }

    #[test]
    fn markdown_shows_signed_delta_and_findings() {
        let markdown = render_comparison_markdown(&compare(&fixtures::result(), &candidate()));
        assert!(markdown.contains("| go-gin | 300.0ms | 600.0ms | +300.0ms | 2.0x |"));
        assert!(markdown.contains("| java-spring | - | - | - | - |"));
        assert!(markdown.contains("Average cold start overhead: 2.0x compared to baseline"));
        assert!(markdown.contains("Highest cold start overhead: go-gin (2.0x)"));
        assert!(markdown.contains("Average warm latency overhead: 1.0x compared to baseline"));
    }
}
