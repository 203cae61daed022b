//! Report rendering. Both formats are derived from one [`BenchmarkResult`]
//! and share [`crate::duration::format_duration`] for display.

pub mod comparison;
pub mod json;
pub mod markdown;

use std::time::Duration;

use crate::contract::{BenchmarkResult, ServiceResult};

pub use comparison::{
    analyze, compare, render_comparison_markdown, ComparisonReport, ServiceComparison,
};
pub use json::{parse_json_report, render_json_report, JsonReport};
pub use markdown::{generate_findings, render_markdown};

#[derive(Debug, thiserror::Error)]
pub enum ReportError {
    #[error("encoding JSON report: {0}")]
    Encode(#[source] serde_json::Error),
    #[error("parsing JSON report: {0}")]
    Decode(#[source] serde_json::Error),
}

/// Rendered `results.json` and `results.md` bodies.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RenderedReports {
    pub json: String,
    pub markdown: String,
}

pub fn render_reports(result: &BenchmarkResult) -> Result<RenderedReports, ReportError> {
    Ok(RenderedReports {
        json: render_json_report(result)?,
        markdown: render_markdown(result),
    })
}

/// Cold-start P50 of a service, `None` when it has no successful sample.
pub(crate) fn cold_p50(service: &ServiceResult) -> Option<Duration> {
    service
        .cold_start
        .as_ref()
        .filter(|stats| stats.has_successes())
        .map(|stats| stats.ttfb.p50)
}

pub(crate) fn warm_p50(service: &ServiceResult) -> Option<Duration> {
    service
        .warm_request
        .as_ref()
        .filter(|stats| stats.successful > 0)
        .map(|stats| stats.latency.p50)
}

/// Services ordered by `key` ascending; services without a value sort last,
/// ties broken by name.
pub(crate) fn sorted_by<'a>(
    result: &'a BenchmarkResult,
    key: impl Fn(&ServiceResult) -> Option<Duration>,
) -> Vec<(&'a str, &'a ServiceResult)> {
    let mut services: Vec<(&str, &ServiceResult)> = result
        .services
        .iter()
        .map(|(name, service)| (name.as_str(), service))
        .collect();
    services.sort_by(|(a_name, a), (b_name, b)| match (key(a), key(b)) {
        (Some(x), Some(y)) => x.cmp(&y).then(a_name.cmp(b_name)),
        (Some(_), None) => std::cmp::Ordering::Less,
        (None, Some(_)) => std::cmp::Ordering::Greater,
        (None, None) => a_name.cmp(b_name),
    });
    services
}
