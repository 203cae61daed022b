//! Cloud Run, Cloud Monitoring, Cloud Logging and Pub/Sub over their JSON
//! REST APIs.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::{json, Value};
use std::time::Duration;
use tracing::debug;

use super::auth::TokenProvider;
use super::{
    IdTokenSource, LogSearch, MetricSource, OperationHandle, OperationState, PlatformError,
    Readiness, StartupLogEntry, TopicApi, WorkloadApi, WorkloadSpec, WorkloadStatus,
};

const INSTANCE_COUNT_METRIC: &str = "run.googleapis.com/container/instance_count";
const METRIC_WINDOW_MINUTES: i64 = 5;
const CONTAINER_PORT: u16 = 8080;
const SUBSCRIPTION_ACK_DEADLINE_SECONDS: u32 = 10;

#[derive(Debug, Clone)]
pub struct ApiEndpoints {
    pub run: String,
    pub monitoring: String,
    pub logging: String,
    pub pubsub: String,
}

impl Default for ApiEndpoints {
    fn default() -> Self {
        Self {
            run: "https://run.googleapis.com".to_string(),
            monitoring: "https://monitoring.googleapis.com".to_string(),
            logging: "https://logging.googleapis.com".to_string(),
            pubsub: "https://pubsub.googleapis.com".to_string(),
        }
    }
}

impl ApiEndpoints {
    /// Point every API at one base URL, as a local emulator or test stub would.
    pub fn single(base: &str) -> Self {
        let base = base.trim_end_matches('/').to_string();
        Self {
            run: base.clone(),
            monitoring: base.clone(),
            logging: base.clone(),
            pubsub: base,
        }
    }
}

pub struct CloudRunPlatform {
    http: reqwest::Client,
    tokens: TokenProvider,
    project_id: String,
    region: String,
    endpoints: ApiEndpoints,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ServiceResource {
    name: String,
    #[serde(default)]
    uri: Option<String>,
    #[serde(default)]
    terminal_condition: Option<Condition>,
    #[serde(default)]
    reconciling: bool,
}

#[derive(Debug, Deserialize)]
struct Condition {
    #[serde(default)]
    state: String,
    #[serde(default)]
    message: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ServiceList {
    #[serde(default)]
    services: Vec<ServiceResource>,
    #[serde(default)]
    next_page_token: Option<String>,
}

#[derive(Debug, Deserialize)]
struct Operation {
    name: String,
    #[serde(default)]
    done: bool,
    #[serde(default)]
    error: Option<OperationError>,
}

#[derive(Debug, Deserialize)]
struct OperationError {
    #[serde(default)]
    code: i32,
    #[serde(default)]
    message: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct TimeSeriesList {
    #[serde(default)]
    time_series: Vec<TimeSeries>,
}

#[derive(Debug, Deserialize)]
struct TimeSeries {
    #[serde(default)]
    points: Vec<Point>,
}

#[derive(Debug, Deserialize)]
struct Point {
    value: Value,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct LogEntryList {
    #[serde(default)]
    entries: Vec<LogEntry>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct LogEntry {
    timestamp: DateTime<Utc>,
    #[serde(default)]
    text_payload: Option<String>,
}

impl CloudRunPlatform {
    pub fn new(
        http: reqwest::Client,
        tokens: TokenProvider,
        project_id: impl Into<String>,
        region: impl Into<String>,
    ) -> Self {
        Self {
            http,
            tokens,
            project_id: project_id.into(),
            region: region.into(),
            endpoints: ApiEndpoints::default(),
        }
    }

    pub fn with_endpoints(mut self, endpoints: ApiEndpoints) -> Self {
        self.endpoints = endpoints;
        self
    }

    fn location(&self) -> String {
        format!("projects/{}/locations/{}", self.project_id, self.region)
    }

    fn service_url(&self, name: &str) -> String {
        format!("{}/v2/{}/services/{name}", self.endpoints.run, self.location())
    }

    fn topic_path(&self, topic: &str) -> String {
        format!("projects/{}/topics/{topic}", self.project_id)
    }

    fn subscription_url(&self, topic: &str) -> String {
        format!(
            "{}/v1/projects/{}/subscriptions/{}",
            self.endpoints.pubsub,
            self.project_id,
            subscription_name(topic)
        )
    }

    async fn send(
        &self,
        operation: &str,
        request: reqwest::RequestBuilder,
    ) -> Result<reqwest::Response, PlatformError> {
        let token = self.tokens.access_token().await?;
        let response = request
            .bearer_auth(token)
            .send()
            .await
            .map_err(|source| PlatformError::Transport {
                operation: operation.to_string(),
                source,
            })?;
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let body = response.text().await.unwrap_or_default();
        Err(PlatformError::Api {
            operation: operation.to_string(),
            status: status.as_u16(),
            body,
        })
    }

    async fn send_json<T: DeserializeOwned>(
        &self,
        operation: &str,
        request: reqwest::RequestBuilder,
    ) -> Result<T, PlatformError> {
        let response = self.send(operation, request).await?;
        response
            .json::<T>()
            .await
            .map_err(|error| PlatformError::Decode {
                operation: operation.to_string(),
                message: error.to_string(),
            })
    }

    fn service_body(spec: &WorkloadSpec) -> Value {
        let env: Vec<Value> = spec
            .env
            .iter()
            .map(|(name, value)| json!({ "name": name, "value": value }))
            .collect();
        json!({
            "launchStage": "GA",
            "template": {
                "containers": [{
                    "image": spec.image,
                    "resources": {
                        "limits": { "cpu": spec.cpu, "memory": spec.memory },
                        "cpuIdle": true,
                        "startupCpuBoost": spec.startup_cpu_boost,
                    },
                    "env": env,
                    "ports": [{ "containerPort": CONTAINER_PORT }],
                }],
                "executionEnvironment": spec.execution_env.api_name(),
                "maxInstanceRequestConcurrency": spec.concurrency,
                "scaling": {
                    "minInstanceCount": 0,
                    "maxInstanceCount": spec.max_instances,
                },
            },
        })
    }
}

/// Pull subscription created alongside each run's topic.
pub fn subscription_name(topic: &str) -> String {
    format!("{topic}-sub")
}

fn short_name(resource_name: &str) -> &str {
    resource_name.rsplit('/').next().unwrap_or(resource_name)
}

fn readiness(service: &ServiceResource) -> Readiness {
    if service.reconciling {
        return Readiness::Pending("reconciling".to_string());
    }
    match service.terminal_condition.as_ref() {
        Some(condition) if condition.state == "CONDITION_SUCCEEDED" => Readiness::Ready,
        Some(condition) if condition.state == "CONDITION_FAILED" => {
            Readiness::Failed(condition.message.clone())
        }
        Some(condition) => Readiness::Pending(condition.state.clone()),
        None => Readiness::Pending("no terminal condition yet".to_string()),
    }
}

/// Latest point of each series, summed. `ALIGN_MEAN` yields doubles, and any
/// positive mean counts as a live instance.
fn sum_instance_counts(series: &[TimeSeries]) -> u64 {
    let total: f64 = series
        .iter()
        .filter_map(|s| s.points.first())
        .map(|point| point_value(&point.value))
        .sum();
    total.max(0.0).ceil() as u64
}

fn point_value(value: &Value) -> f64 {
    if let Some(int) = value.get("int64Value") {
        // int64 values are JSON strings in the v3 API.
        return int
            .as_str()
            .and_then(|text| text.parse::<f64>().ok())
            .or_else(|| int.as_f64())
            .unwrap_or(0.0);
    }
    value
        .get("doubleValue")
        .and_then(Value::as_f64)
        .unwrap_or(0.0)
}

/// Parse `Container started in 1.23s` into a duration.
pub fn parse_startup_latency(text: &str) -> Option<Duration> {
    let (_, rest) = text.split_once("Container started in ")?;
    let seconds: f64 = rest.trim().strip_suffix('s')?.trim().parse().ok()?;
    (seconds.is_finite() && seconds >= 0.0).then(|| Duration::from_secs_f64(seconds))
}

#[async_trait]
impl WorkloadApi for CloudRunPlatform {
    async fn get_workload(&self, name: &str) -> Result<Option<WorkloadStatus>, PlatformError> {
        let request = self.http.get(self.service_url(name));
        match self
            .send_json::<ServiceResource>("get service", request)
            .await
        {
            Ok(service) => Ok(Some(WorkloadStatus {
                name: short_name(&service.name).to_string(),
                url: service.uri.clone().filter(|uri| !uri.is_empty()),
                readiness: readiness(&service),
            })),
            Err(error) if error.is_not_found() => Ok(None),
            Err(error) => Err(error),
        }
    }

    async fn create_workload(&self, spec: &WorkloadSpec) -> Result<OperationHandle, PlatformError> {
        let url = format!("{}/v2/{}/services", self.endpoints.run, self.location());
        let request = self
            .http
            .post(url)
            .query(&[("serviceId", spec.name.as_str())])
            .json(&Self::service_body(spec));
        let operation: Operation = self.send_json("create service", request).await?;
        Ok(OperationHandle {
            name: operation.name,
        })
    }

    async fn update_workload(&self, spec: &WorkloadSpec) -> Result<OperationHandle, PlatformError> {
        let request = self
            .http
            .patch(self.service_url(&spec.name))
            .json(&Self::service_body(spec));
        let operation: Operation = self.send_json("update service", request).await?;
        Ok(OperationHandle {
            name: operation.name,
        })
    }

    async fn get_operation(&self, handle: &OperationHandle) -> Result<OperationState, PlatformError> {
        let url = format!("{}/v2/{}", self.endpoints.run, handle.name);
        let operation: Operation = self.send_json("get operation", self.http.get(url)).await?;
        if !operation.done {
            return Ok(OperationState::Running);
        }
        Ok(match operation.error {
            Some(error) => OperationState::Failed(format!("{} (code {})", error.message, error.code)),
            None => OperationState::Succeeded,
        })
    }

    async fn set_public_invoker(&self, name: &str) -> Result<(), PlatformError> {
        let url = format!("{}:setIamPolicy", self.service_url(name));
        let body = json!({
            "policy": {
                "bindings": [{ "role": "roles/run.invoker", "members": ["allUsers"] }],
            },
        });
        self.send("set IAM policy", self.http.post(url).json(&body))
            .await
            .map(|_| ())
    }

    async fn list_workloads(&self, prefix: &str) -> Result<Vec<String>, PlatformError> {
        let url = format!("{}/v2/{}/services", self.endpoints.run, self.location());
        let mut names = Vec::new();
        let mut page_token: Option<String> = None;
        loop {
            let mut request = self.http.get(&url);
            if let Some(token) = &page_token {
                request = request.query(&[("pageToken", token.as_str())]);
            }
            let page: ServiceList = self.send_json("list services", request).await?;
            names.extend(
                page.services
                    .iter()
                    .map(|service| short_name(&service.name))
                    .filter(|name| name.starts_with(prefix))
                    .map(str::to_string),
            );
            match page.next_page_token.filter(|token| !token.is_empty()) {
                Some(token) => page_token = Some(token),
                None => break,
            }
        }
        Ok(names)
    }

    async fn delete_workload(&self, name: &str) -> Result<(), PlatformError> {
        match self
            .send("delete service", self.http.delete(self.service_url(name)))
            .await
        {
            Ok(_) => Ok(()),
            Err(error) if error.is_not_found() => Ok(()),
            Err(error) => Err(error),
        }
    }
}

#[async_trait]
impl TopicApi for CloudRunPlatform {
    async fn ensure_topic(&self, topic: &str) -> Result<(), PlatformError> {
        let topic_url = format!("{}/v1/{}", self.endpoints.pubsub, self.topic_path(topic));
        match self
            .send("create topic", self.http.put(topic_url).json(&json!({})))
            .await
        {
            Ok(_) => {}
            Err(error) if error.is_conflict() => debug!(topic, "topic already exists"),
            Err(error) => return Err(error),
        }

        let body = json!({
            "topic": self.topic_path(topic),
            "ackDeadlineSeconds": SUBSCRIPTION_ACK_DEADLINE_SECONDS,
        });
        match self
            .send(
                "create subscription",
                self.http.put(self.subscription_url(topic)).json(&body),
            )
            .await
        {
            Ok(_) => Ok(()),
            Err(error) if error.is_conflict() => Ok(()),
            Err(error) => Err(error),
        }
    }

    async fn delete_topic(&self, topic: &str) -> Result<(), PlatformError> {
        // The subscription goes first; it references the topic.
        match self
            .send("delete subscription", self.http.delete(self.subscription_url(topic)))
            .await
        {
            Ok(_) => {}
            Err(error) if error.is_not_found() => {}
            Err(error) => return Err(error),
        }
        let topic_url = format!("{}/v1/{}", self.endpoints.pubsub, self.topic_path(topic));
        match self.send("delete topic", self.http.delete(topic_url)).await {
            Ok(_) => Ok(()),
            Err(error) if error.is_not_found() => Ok(()),
            Err(error) => Err(error),
        }
    }
}

#[async_trait]
impl MetricSource for CloudRunPlatform {
    async fn instance_count(&self, workload: &str) -> Result<u64, PlatformError> {
        let now = Utc::now();
        let filter = format!(
            "resource.type=\"cloud_run_revision\" AND resource.labels.service_name=\"{workload}\" AND resource.labels.location=\"{}\" AND metric.type=\"{INSTANCE_COUNT_METRIC}\"",
            self.region
        );
        let url = format!(
            "{}/v3/projects/{}/timeSeries",
            self.endpoints.monitoring, self.project_id
        );
        let start = (now - chrono::Duration::minutes(METRIC_WINDOW_MINUTES)).to_rfc3339_opts(chrono::SecondsFormat::Secs, true);
        let end = now.to_rfc3339_opts(chrono::SecondsFormat::Secs, true);
        let request = self.http.get(url).query(&[
            ("filter", filter.as_str()),
            ("interval.startTime", start.as_str()),
            ("interval.endTime", end.as_str()),
            ("aggregation.alignmentPeriod", "60s"),
            ("aggregation.perSeriesAligner", "ALIGN_MEAN"),
        ]);
        let list: TimeSeriesList = self.send_json("query instance count", request).await?;
        let count = sum_instance_counts(&list.time_series);
        debug!(workload, series = list.time_series.len(), count, "instance count");
        Ok(count)
    }
}

#[async_trait]
impl LogSearch for CloudRunPlatform {
    async fn find_container_started(
        &self,
        workload: &str,
        after: DateTime<Utc>,
    ) -> Result<Option<StartupLogEntry>, PlatformError> {
        let filter = format!(
            "resource.type=\"cloud_run_revision\" AND resource.labels.service_name=\"{workload}\" AND resource.labels.location=\"{}\" AND timestamp>=\"{}\" AND textPayload:\"Container started\"",
            self.region,
            after.to_rfc3339_opts(chrono::SecondsFormat::Millis, true)
        );
        let body = json!({
            "resourceNames": [format!("projects/{}", self.project_id)],
            "filter": filter,
            "orderBy": "timestamp desc",
            "pageSize": 1,
        });
        let url = format!("{}/v2/entries:list", self.endpoints.logging);
        let list: LogEntryList = self
            .send_json("search logs", self.http.post(url).json(&body))
            .await?;
        Ok(list.entries.into_iter().next().map(|entry| StartupLogEntry {
            timestamp: entry.timestamp,
            startup_latency: entry
                .text_payload
                .as_deref()
                .and_then(parse_startup_latency),
        }))
    }
}

#[async_trait]
impl IdTokenSource for CloudRunPlatform {
    async fn id_token(&self, audience: &str) -> Result<String, PlatformError> {
        self.tokens.id_token(audience).await
    }
}
