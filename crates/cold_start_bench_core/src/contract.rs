use std::collections::BTreeMap;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::config::ConfigSummary;
use crate::duration;
use crate::stats::{ColdStartStats, WarmRequestStats};

pub const READING_SCHEMA_VERSION: &str = "v1";
pub const REPORT_SCHEMA_VERSION: &str = "v1";

/// One cold-start probe against a workload believed to have zero instances.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ColdStartMeasurement {
    pub timestamp: DateTime<Utc>,
    /// Full request latency including the body read. Reported as TTFB.
    #[serde(rename = "ttfb_ns", with = "duration::nanos")]
    pub ttfb: Duration,
    #[serde(
        rename = "container_startup_ns",
        default,
        skip_serializing_if = "Option::is_none",
        with = "duration::option_nanos"
    )]
    pub container_startup: Option<Duration>,
    #[serde(default)]
    pub status_code: u16,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ColdStartMeasurement {
    pub fn failed(timestamp: DateTime<Utc>, error: impl Into<String>) -> Self {
        Self {
            timestamp,
            ttfb: Duration::ZERO,
            container_startup: None,
            status_code: 0,
            error: Some(error.into()),
        }
    }

    /// A probe counts as successful when it completed without transport or
    /// signing errors and the workload answered 200.
    pub fn is_success(&self) -> bool {
        self.error.is_none() && self.status_code == 200
    }
}

/// Outcome of one warm request. Only aggregated, never persisted.
#[derive(Debug, Clone, PartialEq)]
pub struct WarmRequestResult {
    pub latency: Duration,
    pub status_code: u16,
    pub error: Option<String>,
}

impl WarmRequestResult {
    pub fn is_success(&self) -> bool {
        self.error.is_none() && self.status_code == 200
    }
}

/// Deployment outcome for one logical service within a run.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DeploymentInfo {
    pub service_name: String,
    pub workload_name: String,
    pub image: String,
    pub url: String,
    #[serde(with = "duration::nanos")]
    pub deployment_duration: Duration,
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct ServiceResult {
    pub service_name: String,
    pub workload_name: String,
    pub service_url: Option<String>,
    pub image: String,
    pub profile: String,
    pub deployment_duration: Duration,
    pub deploy_error: Option<String>,
    pub benchmark_error: Option<String>,
    pub cold_start: Option<ColdStartStats>,
    pub warm_request: Option<WarmRequestStats>,
}

impl ServiceResult {
    pub fn pending(service_name: impl Into<String>, profile: impl Into<String>) -> Self {
        Self {
            service_name: service_name.into(),
            profile: profile.into(),
            ..Self::default()
        }
    }

    pub fn from_deployment(info: &DeploymentInfo, profile: impl Into<String>) -> Self {
        Self {
            service_name: info.service_name.clone(),
            workload_name: info.workload_name.clone(),
            service_url: Some(info.url.clone()),
            image: info.image.clone(),
            profile: profile.into(),
            deployment_duration: info.deployment_duration,
            ..Self::default()
        }
    }

    /// First recorded error, deployment failures taking precedence.
    pub fn error(&self) -> Option<&str> {
        self.deploy_error
            .as_deref()
            .or(self.benchmark_error.as_deref())
    }
}

/// Identity of one benchmark invocation. Fixed once the command starts.
#[derive(Debug, Clone, PartialEq)]
pub struct BenchmarkRun {
    pub run_id: String,
    pub started_at: DateTime<Utc>,
    pub config: ConfigSummary,
}

#[derive(Debug, Clone, PartialEq)]
pub struct BenchmarkResult {
    pub run_id: String,
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
    pub config: ConfigSummary,
    pub services: BTreeMap<String, ServiceResult>,
}

impl BenchmarkResult {
    pub fn new(run: &BenchmarkRun) -> Self {
        Self {
            run_id: run.run_id.clone(),
            start_time: run.started_at,
            end_time: run.started_at,
            config: run.config.clone(),
            services: BTreeMap::new(),
        }
    }

    pub fn elapsed(&self) -> Duration {
        (self.end_time - self.start_time)
            .to_std()
            .unwrap_or(Duration::ZERO)
    }

    pub fn error_count(&self) -> usize {
        self.services
            .values()
            .filter(|service| service.error().is_some())
            .count()
    }
}

/// Per-service entry of a [`Reading`].
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ReadingEntry {
    pub service_name: String,
    pub workload_name: String,
    pub service_url: String,
    pub measurement: ColdStartMeasurement,
}

/// One distributed-mode iteration: a single cold-start probe per service.
///
/// `run_id` is the run date (`YYYY-MM-DD`) that groups a day's readings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Reading {
    pub schema_version: String,
    pub run_id: String,
    pub iteration: u32,
    pub timestamp: DateTime<Utc>,
    pub config_fingerprint: String,
    pub config: ConfigSummary,
    pub services: BTreeMap<String, ReadingEntry>,
}

impl Reading {
    pub fn new(
        run_date: impl Into<String>,
        iteration: u32,
        timestamp: DateTime<Utc>,
        config: ConfigSummary,
    ) -> Self {
        Self {
            schema_version: READING_SCHEMA_VERSION.to_string(),
            run_id: run_date.into(),
            iteration,
            timestamp,
            config_fingerprint: config_fingerprint(&config),
            config,
            services: BTreeMap::new(),
        }
    }
}

pub fn config_fingerprint(summary: &ConfigSummary) -> String {
    let mut hasher = Sha256::new();
    hasher.update(stable_contract_json(summary));
    format!("{:x}", hasher.finalize())
}

pub fn stable_contract_json(value: impl Serialize) -> String {
    serde_json::to_string(&value).unwrap_or_default()
}
