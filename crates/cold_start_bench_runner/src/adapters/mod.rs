//! Boundary traits for the deployment platform and object storage, plus their
//! production implementations.
//!
//! Handlers and benchmark components only see `Arc<dyn ...>` trait objects, so
//! tests substitute recording fakes without any network access.

pub mod auth;
pub mod cloud_run;
pub mod object_store;
pub mod s3_store;

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use cold_start_bench_core::config::ExecutionEnvironment;

#[derive(Debug, thiserror::Error)]
pub enum PlatformError {
    #[error("{operation}: HTTP {status}: {body}")]
    Api {
        operation: String,
        status: u16,
        body: String,
    },
    #[error("{operation}: {source}")]
    Transport {
        operation: String,
        #[source]
        source: reqwest::Error,
    },
    #[error("{operation}: unexpected response: {message}")]
    Decode { operation: String, message: String },
    #[error("fetching credentials: {0}")]
    Auth(String),
    #[error("{0}")]
    Other(String),
}

impl PlatformError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::Api { status: 404, .. })
    }

    pub fn is_conflict(&self) -> bool {
        matches!(self, Self::Api { status: 409, .. })
    }
}

/// Desired state of one workload. Minimum instances is always zero.
#[derive(Debug, Clone, PartialEq)]
pub struct WorkloadSpec {
    pub name: String,
    pub image: String,
    pub cpu: String,
    pub memory: String,
    pub max_instances: u32,
    pub concurrency: u32,
    pub execution_env: ExecutionEnvironment,
    pub startup_cpu_boost: bool,
    pub env: BTreeMap<String, String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Readiness {
    Ready,
    Pending(String),
    Failed(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkloadStatus {
    pub name: String,
    pub url: Option<String>,
    pub readiness: Readiness,
}

/// Handle to a long-running platform operation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OperationHandle {
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OperationState {
    Running,
    Succeeded,
    Failed(String),
}

/// A "container started" log entry found after a probe was sent.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StartupLogEntry {
    pub timestamp: DateTime<Utc>,
    pub startup_latency: Option<Duration>,
}

#[async_trait]
pub trait WorkloadApi: Send + Sync {
    async fn get_workload(&self, name: &str) -> Result<Option<WorkloadStatus>, PlatformError>;
    async fn create_workload(&self, spec: &WorkloadSpec) -> Result<OperationHandle, PlatformError>;
    async fn update_workload(&self, spec: &WorkloadSpec) -> Result<OperationHandle, PlatformError>;
    async fn get_operation(&self, handle: &OperationHandle) -> Result<OperationState, PlatformError>;
    async fn set_public_invoker(&self, name: &str) -> Result<(), PlatformError>;
    async fn list_workloads(&self, prefix: &str) -> Result<Vec<String>, PlatformError>;
    async fn delete_workload(&self, name: &str) -> Result<(), PlatformError>;
}

#[async_trait]
pub trait MetricSource: Send + Sync {
    /// Running instances summed across every revision of the workload.
    async fn instance_count(&self, workload: &str) -> Result<u64, PlatformError>;
}

#[async_trait]
pub trait LogSearch: Send + Sync {
    async fn find_container_started(
        &self,
        workload: &str,
        after: DateTime<Utc>,
    ) -> Result<Option<StartupLogEntry>, PlatformError>;
}

/// Per-run message topic the deployed services publish to.
#[async_trait]
pub trait TopicApi: Send + Sync {
    /// Create the topic and its pull subscription. Existing ones are kept.
    async fn ensure_topic(&self, topic: &str) -> Result<(), PlatformError>;
    /// Delete the subscription, then the topic. Missing ones are ignored.
    async fn delete_topic(&self, topic: &str) -> Result<(), PlatformError>;
}

#[async_trait]
pub trait IdTokenSource: Send + Sync {
    async fn id_token(&self, audience: &str) -> Result<String, PlatformError>;
}

/// Every platform capability a benchmark run needs, injected as one bundle.
#[derive(Clone)]
pub struct Platform {
    pub workloads: Arc<dyn WorkloadApi>,
    pub metrics: Arc<dyn MetricSource>,
    pub logs: Arc<dyn LogSearch>,
    pub tokens: Arc<dyn IdTokenSource>,
    pub topics: Arc<dyn TopicApi>,
}

impl Platform {
    pub fn from_cloud_run(platform: Arc<cloud_run::CloudRunPlatform>) -> Self {
        Self {
            workloads: platform.clone(),
            metrics: platform.clone(),
            logs: platform.clone(),
            tokens: platform.clone(),
            topics: platform,
        }
    }
}
