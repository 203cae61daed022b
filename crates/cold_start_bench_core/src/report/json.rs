use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::{cold_p50, ReportError};
use crate::config::ConfigSummary;
use crate::contract::{BenchmarkResult, ColdStartMeasurement, ServiceResult, REPORT_SCHEMA_VERSION};
use crate::duration::{from_millis, to_millis};
use crate::stats::{ColdStartStats, LatencySummary, WarmRequestStats};

/// Structured report. Durations are milliseconds as floating point.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct JsonReport {
    pub schema_version: String,
    pub run_id: String,
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
    pub duration_ms: f64,
    pub config: ConfigSummary,
    pub services: BTreeMap<String, JsonServiceReport>,
    pub summary: JsonSummary,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct JsonServiceReport {
    pub service_name: String,
    #[serde(default)]
    pub workload_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub service_url: Option<String>,
    #[serde(default)]
    pub image: String,
    #[serde(default)]
    pub profile: String,
    #[serde(default)]
    pub deployment_duration_ms: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cold_start: Option<JsonColdStartStats>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub warm_request: Option<JsonWarmStats>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub deploy_error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub benchmark_error: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct JsonColdStartStats {
    pub iterations: usize,
    pub success_count: usize,
    pub failure_count: usize,
    pub ttfb_min_ms: f64,
    pub ttfb_max_ms: f64,
    pub ttfb_avg_ms: f64,
    pub ttfb_p50_ms: f64,
    pub ttfb_p95_ms: f64,
    pub ttfb_p99_ms: f64,
    pub container_startup_min_ms: f64,
    pub container_startup_max_ms: f64,
    pub container_startup_avg_ms: f64,
    #[serde(default)]
    pub samples: Vec<JsonColdStartSample>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct JsonColdStartSample {
    pub timestamp: DateTime<Utc>,
    pub ttfb_ms: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub container_startup_ms: Option<f64>,
    pub status_code: u16,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct JsonWarmStats {
    pub total_requests: usize,
    pub successful: usize,
    pub failed: usize,
    pub duration_ms: f64,
    pub requests_per_second: f64,
    pub min_ms: f64,
    pub max_ms: f64,
    pub avg_ms: f64,
    pub p50_ms: f64,
    pub p95_ms: f64,
    pub p99_ms: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct JsonSummary {
    pub total_services: usize,
    pub successful_tests: usize,
    pub failed_tests: usize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fastest_service: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fastest_cold_start_ms: Option<f64>,
}

impl JsonReport {
    pub fn from_result(result: &BenchmarkResult) -> Self {
        let services: BTreeMap<String, JsonServiceReport> = result
            .services
            .iter()
            .map(|(name, service)| (name.clone(), service_report(service)))
            .collect();

        let failed_tests = result.error_count();
        let fastest = result
            .services
            .iter()
            .filter_map(|(name, service)| cold_p50(service).map(|p50| (p50, name)))
            .min();

        Self {
            schema_version: REPORT_SCHEMA_VERSION.to_string(),
            run_id: result.run_id.clone(),
            start_time: result.start_time,
            end_time: result.end_time,
            duration_ms: to_millis(result.elapsed()),
            config: result.config.clone(),
            summary: JsonSummary {
                total_services: result.services.len(),
                successful_tests: result.services.len() - failed_tests,
                failed_tests,
                fastest_service: fastest.map(|(_, name)| name.clone()),
                fastest_cold_start_ms: fastest.map(|(p50, _)| to_millis(p50)),
            },
            services,
        }
    }

    /// Rebuild the in-memory result so reports can be regenerated offline.
    pub fn into_result(self) -> BenchmarkResult {
        let services = self
            .services
            .into_iter()
            .map(|(name, report)| (name, report.into_service_result()))
            .collect();
        BenchmarkResult {
            run_id: self.run_id,
            start_time: self.start_time,
            end_time: self.end_time,
            config: self.config,
            services,
        }
    }
}

fn service_report(service: &ServiceResult) -> JsonServiceReport {
    JsonServiceReport {
        service_name: service.service_name.clone(),
        workload_name: service.workload_name.clone(),
        service_url: service.service_url.clone(),
        image: service.image.clone(),
        profile: service.profile.clone(),
        deployment_duration_ms: to_millis(service.deployment_duration),
        cold_start: service.cold_start.as_ref().map(cold_start_report),
        warm_request: service.warm_request.as_ref().map(warm_report),
        deploy_error: service.deploy_error.clone(),
        benchmark_error: service.benchmark_error.clone(),
    }
}

fn cold_start_report(stats: &ColdStartStats) -> JsonColdStartStats {
    JsonColdStartStats {
        iterations: stats.total(),
        success_count: stats.success_count,
        failure_count: stats.failure_count,
        ttfb_min_ms: to_millis(stats.ttfb.min),
        ttfb_max_ms: to_millis(stats.ttfb.max),
        ttfb_avg_ms: to_millis(stats.ttfb.avg),
        ttfb_p50_ms: to_millis(stats.ttfb.p50),
        ttfb_p95_ms: to_millis(stats.ttfb.p95),
        ttfb_p99_ms: to_millis(stats.ttfb.p99),
        container_startup_min_ms: to_millis(stats.container_startup_min),
        container_startup_max_ms: to_millis(stats.container_startup_max),
        container_startup_avg_ms: to_millis(stats.container_startup_avg),
        samples: stats
            .samples
            .iter()
            .map(|sample| JsonColdStartSample {
                timestamp: sample.timestamp,
                ttfb_ms: to_millis(sample.ttfb),
                container_startup_ms: sample.container_startup.map(to_millis),
                status_code: sample.status_code,
                error: sample.error.clone(),
            })
            .collect(),
    }
}

fn warm_report(stats: &WarmRequestStats) -> JsonWarmStats {
    JsonWarmStats {
        total_requests: stats.total_requests,
        successful: stats.successful,
        failed: stats.failed,
        duration_ms: to_millis(stats.duration),
        requests_per_second: stats.requests_per_second,
        min_ms: to_millis(stats.latency.min),
        max_ms: to_millis(stats.latency.max),
        avg_ms: to_millis(stats.latency.avg),
        p50_ms: to_millis(stats.latency.p50),
        p95_ms: to_millis(stats.latency.p95),
        p99_ms: to_millis(stats.latency.p99),
    }
}

impl JsonServiceReport {
    fn into_service_result(self) -> ServiceResult {
        ServiceResult {
            service_name: self.service_name,
            workload_name: self.workload_name,
            service_url: self.service_url,
            image: self.image,
            profile: self.profile,
            deployment_duration: from_millis(self.deployment_duration_ms),
            deploy_error: self.deploy_error,
            benchmark_error: self.benchmark_error,
            cold_start: self.cold_start.map(JsonColdStartStats::into_stats),
            warm_request: self.warm_request.map(JsonWarmStats::into_stats),
        }
    }
}

impl JsonColdStartStats {
    fn into_stats(self) -> ColdStartStats {
        ColdStartStats {
            samples: self
                .samples
                .into_iter()
                .map(|sample| ColdStartMeasurement {
                    timestamp: sample.timestamp,
                    ttfb: from_millis(sample.ttfb_ms),
                    container_startup: sample.container_startup_ms.map(from_millis),
                    status_code: sample.status_code,
                    error: sample.error,
                })
                .collect(),
            ttfb: LatencySummary {
                min: from_millis(self.ttfb_min_ms),
                max: from_millis(self.ttfb_max_ms),
                avg: from_millis(self.ttfb_avg_ms),
                p50: from_millis(self.ttfb_p50_ms),
                p95: from_millis(self.ttfb_p95_ms),
                p99: from_millis(self.ttfb_p99_ms),
            },
            container_startup_min: from_millis(self.container_startup_min_ms),
            container_startup_max: from_millis(self.container_startup_max_ms),
            container_startup_avg: from_millis(self.container_startup_avg_ms),
            success_count: self.success_count,
            failure_count: self.failure_count,
        }
    }
}

impl JsonWarmStats {
    fn into_stats(self) -> WarmRequestStats {
        WarmRequestStats {
            total_requests: self.total_requests,
            successful: self.successful,
            failed: self.failed,
            latency: LatencySummary {
                min: from_millis(self.min_ms),
                max: from_millis(self.max_ms),
                avg: from_millis(self.avg_ms),
                p50: from_millis(self.p50_ms),
                p95: from_millis(self.p95_ms),
                p99: from_millis(self.p99_ms),
            },
            duration: from_millis(self.duration_ms),
            requests_per_second: self.requests_per_second,
        }
    }
}

pub fn render_json_report(result: &BenchmarkResult) -> Result<String, ReportError> {
    serde_json::to_string_pretty(&JsonReport::from_result(result)).map_err(ReportError::Encode)
}

pub fn parse_json_report(text: &str) -> Result<BenchmarkResult, ReportError> {
    let report: JsonReport = serde_json::from_str(text).map_err(ReportError::Decode)?;
    Ok(report.into_result())
}
