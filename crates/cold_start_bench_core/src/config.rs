//! YAML benchmark configuration: loading, defaults, env overrides and validation.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::duration;

pub const DEFAULT_REGION: &str = "us-central1";
pub const DEFAULT_PROFILE: &str = "default";
pub const DEFAULT_NAME_PREFIX: &str = "discord";
pub const DEFAULT_IMAGE_REPOSITORY: &str = "discord-services";
pub const DEFAULT_IMAGE_TAG: &str = "latest";

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("reading config file {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("parsing config file: {0}")]
    Parse(#[from] serde_yaml::Error),
    #[error("validating config: {0}")]
    Invalid(#[from] ValidationError),
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{message}")]
pub struct ValidationError {
    message: String,
}

impl ValidationError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }

    pub fn message(&self) -> &str {
        &self.message
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Config {
    #[serde(default, alias = "gcp")]
    pub platform: PlatformConfig,
    #[serde(default)]
    pub profiles: BTreeMap<String, ProfileConfig>,
    #[serde(default)]
    pub benchmark: BenchmarkConfig,
    #[serde(default)]
    pub services: ServicesConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct PlatformConfig {
    pub project_id: String,
    pub region: String,
    pub name_prefix: String,
    pub image_repository: String,
    pub image_tag: String,
}

impl Default for PlatformConfig {
    fn default() -> Self {
        Self {
            project_id: String::new(),
            region: String::new(),
            name_prefix: DEFAULT_NAME_PREFIX.to_string(),
            image_repository: DEFAULT_IMAGE_REPOSITORY.to_string(),
            image_tag: DEFAULT_IMAGE_TAG.to_string(),
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum ExecutionEnvironment {
    Gen1,
    #[default]
    Gen2,
}

impl ExecutionEnvironment {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Gen1 => "gen1",
            Self::Gen2 => "gen2",
        }
    }

    /// Name used by the Cloud Run Admin API.
    pub fn api_name(self) -> &'static str {
        match self {
            Self::Gen1 => "EXECUTION_ENVIRONMENT_GEN1",
            Self::Gen2 => "EXECUTION_ENVIRONMENT_GEN2",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ProfileConfig {
    pub cpu: String,
    pub memory: String,
    pub max_instances: u32,
    pub concurrency: u32,
    #[serde(default)]
    pub execution_env: ExecutionEnvironment,
    #[serde(default)]
    pub startup_cpu_boost: bool,
}

impl Default for ProfileConfig {
    fn default() -> Self {
        Self {
            cpu: "1".to_string(),
            memory: "512Mi".to_string(),
            max_instances: 1,
            concurrency: 80,
            execution_env: ExecutionEnvironment::Gen2,
            startup_cpu_boost: true,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum RequestType {
    #[default]
    Ping,
    SlashCommand,
}

impl RequestType {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Ping => "ping",
            Self::SlashCommand => "slash_command",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct BenchmarkConfig {
    pub profile: String,
    pub cold_start_iterations: u32,
    #[serde(with = "duration::compact")]
    pub scale_to_zero_timeout: Duration,
    #[serde(with = "duration::compact")]
    pub scale_to_zero_poll_interval: Duration,
    pub warm_requests: u32,
    pub warm_concurrency: u32,
    pub request_type: RequestType,
    #[serde(with = "duration::compact")]
    pub probe_timeout: Duration,
    #[serde(with = "duration::compact")]
    pub api_timeout: Duration,
    #[serde(with = "duration::compact")]
    pub startup_log_wait: Duration,
    #[serde(with = "duration::compact")]
    pub deploy_operation_timeout: Duration,
    #[serde(with = "duration::compact")]
    pub readiness_timeout: Duration,
    pub health_check: bool,
    pub id_token_auth: bool,
}

impl Default for BenchmarkConfig {
    fn default() -> Self {
        Self {
            profile: DEFAULT_PROFILE.to_string(),
            cold_start_iterations: 5,
            scale_to_zero_timeout: Duration::from_secs(15 * 60),
            scale_to_zero_poll_interval: Duration::from_secs(30),
            warm_requests: 100,
            warm_concurrency: 10,
            request_type: RequestType::Ping,
            probe_timeout: Duration::from_secs(30),
            api_timeout: Duration::from_secs(30),
            startup_log_wait: Duration::from_secs(30),
            deploy_operation_timeout: Duration::from_secs(5 * 60),
            readiness_timeout: Duration::from_secs(2 * 60),
            health_check: true,
            id_token_auth: true,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct ServicesConfig {
    #[serde(default)]
    pub enabled: Vec<String>,
}

/// Snapshot of the settings that influence measurements. Stored in readings
/// and reports, and hashed into the configuration fingerprint.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ConfigSummary {
    pub project_id: String,
    pub region: String,
    pub profile: String,
    pub cpu: String,
    pub memory: String,
    pub max_instances: u32,
    pub concurrency: u32,
    pub execution_env: ExecutionEnvironment,
    pub startup_cpu_boost: bool,
    pub cold_start_iterations: u32,
    #[serde(with = "duration::compact")]
    pub scale_to_zero_timeout: Duration,
    pub warm_requests: u32,
    pub warm_concurrency: u32,
    pub request_type: RequestType,
    pub services: Vec<String>,
}

impl Config {
    /// Load from disk, apply `PROJECT_ID` / `REGION` overrides and defaults, validate.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        Self::load_with_env(path, |key| std::env::var(key).ok())
    }

    pub fn load_with_env(
        path: &Path,
        env: impl Fn(&str) -> Option<String>,
    ) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::parse(&text, env)
    }

    /// Parse without consulting the process environment.
    pub fn from_yaml_str(text: &str) -> Result<Self, ConfigError> {
        Self::parse(text, |_| None)
    }

    fn parse(text: &str, env: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let mut config: Config = serde_yaml::from_str(text)?;
        config.apply_env_overrides(env);
        config.apply_defaults();
        config.validate()?;
        Ok(config)
    }

    pub fn apply_env_overrides(&mut self, env: impl Fn(&str) -> Option<String>) {
        if let Some(project) = env("PROJECT_ID").filter(|value| !value.trim().is_empty()) {
            self.platform.project_id = project.trim().to_string();
        }
        if let Some(region) = env("REGION").filter(|value| !value.trim().is_empty()) {
            self.platform.region = region.trim().to_string();
        }
    }

    fn apply_defaults(&mut self) {
        if self.platform.region.trim().is_empty() {
            self.platform.region = DEFAULT_REGION.to_string();
        }
        if self.platform.name_prefix.trim().is_empty() {
            self.platform.name_prefix = DEFAULT_NAME_PREFIX.to_string();
        }
        if self.platform.image_repository.trim().is_empty() {
            self.platform.image_repository = DEFAULT_IMAGE_REPOSITORY.to_string();
        }
        if self.platform.image_tag.trim().is_empty() {
            self.platform.image_tag = DEFAULT_IMAGE_TAG.to_string();
        }
        if self.benchmark.profile.trim().is_empty() {
            self.benchmark.profile = DEFAULT_PROFILE.to_string();
        }
        self.profiles
            .entry(DEFAULT_PROFILE.to_string())
            .or_default();
    }

    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.platform.project_id.trim().is_empty() {
            return Err(ValidationError::new(
                "platform.project_id is required (or set PROJECT_ID)",
            ));
        }
        if self.services.enabled.is_empty() {
            return Err(ValidationError::new(
                "services.enabled must contain at least one service",
            ));
        }
        if let Some(blank) = self.services.enabled.iter().find(|s| s.trim().is_empty()) {
            return Err(ValidationError::new(format!(
                "services.enabled contains a blank entry: {blank:?}"
            )));
        }
        if !self.profiles.contains_key(&self.benchmark.profile) {
            return Err(ValidationError::new(format!(
                "benchmark.profile '{}' is not defined under profiles",
                self.benchmark.profile
            )));
        }
        for (name, profile) in &self.profiles {
            if profile.max_instances == 0 {
                return Err(ValidationError::new(format!(
                    "profile '{name}': max_instances must be a positive integer"
                )));
            }
            if profile.concurrency == 0 {
                return Err(ValidationError::new(format!(
                    "profile '{name}': concurrency must be a positive integer"
                )));
            }
        }
        let bench = &self.benchmark;
        if bench.cold_start_iterations == 0 {
            return Err(ValidationError::new(
                "benchmark.cold_start_iterations must be a positive integer",
            ));
        }
        if bench.warm_requests == 0 {
            return Err(ValidationError::new(
                "benchmark.warm_requests must be a positive integer",
            ));
        }
        if bench.warm_concurrency == 0 {
            return Err(ValidationError::new(
                "benchmark.warm_concurrency must be a positive integer",
            ));
        }
        for (field, value) in [
            ("scale_to_zero_timeout", bench.scale_to_zero_timeout),
            ("scale_to_zero_poll_interval", bench.scale_to_zero_poll_interval),
            ("probe_timeout", bench.probe_timeout),
            ("api_timeout", bench.api_timeout),
            ("deploy_operation_timeout", bench.deploy_operation_timeout),
            ("readiness_timeout", bench.readiness_timeout),
        ] {
            if value.is_zero() {
                return Err(ValidationError::new(format!(
                    "benchmark.{field} must be greater than zero"
                )));
            }
        }
        Ok(())
    }

    /// Active deployment profile. Validation guarantees it exists; the
    /// built-in default covers configs that bypassed validation.
    pub fn profile(&self) -> ProfileConfig {
        self.profiles
            .get(&self.benchmark.profile)
            .or_else(|| self.profiles.get(DEFAULT_PROFILE))
            .cloned()
            .unwrap_or_default()
    }

    /// Restrict the enabled services to a comma-separated selection.
    pub fn restrict_services(&mut self, selection: &str) -> Result<(), ValidationError> {
        let wanted: Vec<String> = selection
            .split(',')
            .map(str::trim)
            .filter(|name| !name.is_empty())
            .map(str::to_string)
            .collect();
        if wanted.is_empty() {
            return Err(ValidationError::new("--services selected no services"));
        }
        self.services.enabled = wanted;
        Ok(())
    }

    /// Platform resource name: `<prefix>-<service>-<run_id>`.
    pub fn workload_name(&self, service: &str, run_id: &str) -> String {
        format!("{}-{service}-{run_id}", self.platform.name_prefix)
    }

    /// Name of a long-lived workload deployed outside a run (e.g. by CI).
    pub fn shared_workload_name(&self, service: &str) -> String {
        format!("{}-{service}", self.platform.name_prefix)
    }

    /// Prefix shared by every workload this tool deploys.
    pub fn workload_prefix(&self) -> String {
        format!("{}-", self.platform.name_prefix)
    }

    pub fn image_uri(&self, service: &str) -> String {
        format!(
            "{}-docker.pkg.dev/{}/{}/{service}:{}",
            self.platform.region,
            self.platform.project_id,
            self.platform.image_repository,
            self.platform.image_tag
        )
    }

    pub fn topic_name(&self, run_id: &str) -> String {
        format!("discord-benchmark-{run_id}")
    }

    pub fn summary(&self) -> ConfigSummary {
        let profile = self.profile();
        ConfigSummary {
            project_id: self.platform.project_id.clone(),
            region: self.platform.region.clone(),
            profile: self.benchmark.profile.clone(),
            cpu: profile.cpu,
            memory: profile.memory,
            max_instances: profile.max_instances,
            concurrency: profile.concurrency,
            execution_env: profile.execution_env,
            startup_cpu_boost: profile.startup_cpu_boost,
            cold_start_iterations: self.benchmark.cold_start_iterations,
            scale_to_zero_timeout: self.benchmark.scale_to_zero_timeout,
            warm_requests: self.benchmark.warm_requests,
            warm_concurrency: self.benchmark.warm_concurrency,
            request_type: self.benchmark.request_type,
            services: self.services.enabled.clone(),
        }
    }
}

/// Eight random lowercase hex characters.
pub fn generate_run_id() -> String {
    format!("{:08x}", rand::random::<u32>())
}
