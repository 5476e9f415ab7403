//! Orchestrator configuration structures.

use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::core::StoreFailurePolicy;

/// Rate limiter settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RateLimitConfig {
    /// Requests admitted per window.
    pub limit: u32,
    /// Window length in seconds.
    pub per_secs: u64,
    /// Behaviour when the counter store is unreachable.
    pub on_store_failure: StoreFailurePolicy,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            limit: 100,
            per_secs: 60,
            on_store_failure: StoreFailurePolicy::FailClosed,
        }
    }
}

/// Broker settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BrokerConfig {
    /// Delivery attempts before a message is dead-lettered.
    pub max_deliveries: u32,
}

impl Default for BrokerConfig {
    fn default() -> Self {
        Self { max_deliveries: 5 }
    }
}

/// Worker settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkerConfig {
    /// Bound on one capability processor call, in seconds.
    pub processor_timeout_secs: u64,
    /// Competing consumers per capability queue.
    pub instances_per_service: usize,
    /// Published results remembered per worker for redelivery.
    pub dedup_capacity: usize,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            processor_timeout_secs: 30,
            instances_per_service: num_cpus::get().clamp(1, 4),
            dedup_capacity: 1024,
        }
    }
}

/// Job store selection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStoreBackend {
    /// Volatile table, lost on restart.
    InMemory,
    /// JSON-lines file under `job_store_path`.
    File,
}

impl FromStr for JobStoreBackend {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "in_memory" => Ok(Self::InMemory),
            "file" => Ok(Self::File),
            other => Err(format!("unknown job store `{other}`")),
        }
    }
}

/// Scheduler settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulerConfig {
    /// Trigger loop polling interval in milliseconds.
    pub poll_interval_ms: u64,
    /// Job store backend.
    pub job_store: JobStoreBackend,
    /// Directory for the file job store.
    pub job_store_path: Option<PathBuf>,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: 1000,
            job_store: JobStoreBackend::InMemory,
            job_store_path: None,
        }
    }
}

/// Ingress gateway settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct GatewayConfig {
    /// Maximum task content length in characters.
    pub max_content_len: usize,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            max_content_len: 10_000,
        }
    }
}

/// Credential verification settings.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AuthConfig {
    /// HS256 secret for bearer tokens.
    pub jwt_secret: String,
}

/// Root orchestrator configuration.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct OrchestratorConfig {
    /// Rate limiter section.
    pub rate_limit: RateLimitConfig,
    /// Broker section.
    pub broker: BrokerConfig,
    /// Worker section.
    pub worker: WorkerConfig,
    /// Scheduler section.
    pub scheduler: SchedulerConfig,
    /// Gateway section.
    pub gateway: GatewayConfig,
    /// Auth section.
    pub auth: AuthConfig,
}

const ENV_RATE_LIMIT: &str = "FANOUT_RATE_LIMIT";
const ENV_RATE_PER_SECS: &str = "FANOUT_RATE_PER_SECS";
const ENV_ON_STORE_FAILURE: &str = "FANOUT_ON_STORE_FAILURE";
const ENV_MAX_DELIVERIES: &str = "FANOUT_MAX_DELIVERIES";
const ENV_PROCESSOR_TIMEOUT_SECS: &str = "FANOUT_PROCESSOR_TIMEOUT_SECS";
const ENV_WORKERS_PER_SERVICE: &str = "FANOUT_WORKERS_PER_SERVICE";
const ENV_DEDUP_CAPACITY: &str = "FANOUT_DEDUP_CAPACITY";
const ENV_POLL_INTERVAL_MS: &str = "FANOUT_POLL_INTERVAL_MS";
const ENV_JOB_STORE: &str = "FANOUT_JOB_STORE";
const ENV_JOB_STORE_PATH: &str = "FANOUT_JOB_STORE_PATH";
const ENV_MAX_CONTENT_LEN: &str = "FANOUT_MAX_CONTENT_LEN";
const ENV_JWT_SECRET: &str = "FANOUT_JWT_SECRET";

fn parse_env<F, T>(get_env: &F, key: &str, current: T) -> Result<T, String>
where
    F: Fn(&str) -> Option<String>,
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match get_env(key) {
        Some(raw) => raw
            .trim()
            .parse()
            .map_err(|e| format!("{key}={raw}: {e}")),
        None => Ok(current),
    }
}

impl OrchestratorConfig {
    /// Window length as a duration.
    #[must_use]
    pub const fn rate_window(&self) -> Duration {
        Duration::from_secs(self.rate_limit.per_secs)
    }

    /// Processor timeout as a duration.
    #[must_use]
    pub const fn processor_timeout(&self) -> Duration {
        Duration::from_secs(self.worker.processor_timeout_secs)
    }

    /// Scheduler polling interval as a duration.
    #[must_use]
    pub const fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.scheduler.poll_interval_ms)
    }

    /// Validate configuration values.
    pub fn validate(&self) -> Result<(), String> {
        if self.rate_limit.limit == 0 {
            return Err("rate_limit.limit must be greater than 0".into());
        }
        if self.rate_limit.per_secs == 0 {
            return Err("rate_limit.per_secs must be greater than 0".into());
        }
        if self.broker.max_deliveries == 0 {
            return Err("broker.max_deliveries must be greater than 0".into());
        }
        if self.worker.processor_timeout_secs == 0 {
            return Err("worker.processor_timeout_secs must be greater than 0".into());
        }
        if self.worker.instances_per_service == 0 {
            return Err("worker.instances_per_service must be greater than 0".into());
        }
        if self.worker.dedup_capacity == 0 {
            return Err("worker.dedup_capacity must be greater than 0".into());
        }
        if self.scheduler.poll_interval_ms == 0 {
            return Err("scheduler.poll_interval_ms must be greater than 0".into());
        }
        if self.scheduler.job_store == JobStoreBackend::File
            && self.scheduler.job_store_path.is_none()
        {
            return Err("scheduler.job_store_path is required for the file job store".into());
        }
        if self.gateway.max_content_len == 0 {
            return Err("gateway.max_content_len must be greater than 0".into());
        }
        if self.auth.jwt_secret.trim().is_empty() {
            return Err("auth.jwt_secret must not be empty".into());
        }
        Ok(())
    }

    /// Parse configuration from a JSON string and validate.
    pub fn from_json_str(input: &str) -> Result<Self, String> {
        let cfg: Self = serde_json::from_str(input).map_err(|e| format!("parse error: {e}"))?;
        cfg.validate()?;
        Ok(cfg)
    }

    /// Load a `.env` file if present, then read `FANOUT_*` variables over
    /// the defaults and validate.
    pub fn from_env() -> Result<Self, String> {
        if let Err(e) = dotenvy::dotenv() {
            if !e.not_found() {
                return Err(format!(".env: {e}"));
            }
        }
        Self::from_env_with(|key| std::env::var(key).ok())
    }

    /// Build configuration from a custom variable lookup.
    pub fn from_env_with<F>(get_env: F) -> Result<Self, String>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut cfg = Self::default();
        cfg.rate_limit.limit = parse_env(&get_env, ENV_RATE_LIMIT, cfg.rate_limit.limit)?;
        cfg.rate_limit.per_secs = parse_env(&get_env, ENV_RATE_PER_SECS, cfg.rate_limit.per_secs)?;
        if let Some(raw) = get_env(ENV_ON_STORE_FAILURE) {
            cfg.rate_limit.on_store_failure = match raw.trim() {
                "fail_closed" => StoreFailurePolicy::FailClosed,
                "fail_open" => StoreFailurePolicy::FailOpen,
                other => return Err(format!("{ENV_ON_STORE_FAILURE}={other}: unknown policy")),
            };
        }
        cfg.broker.max_deliveries =
            parse_env(&get_env, ENV_MAX_DELIVERIES, cfg.broker.max_deliveries)?;
        cfg.worker.processor_timeout_secs = parse_env(
            &get_env,
            ENV_PROCESSOR_TIMEOUT_SECS,
            cfg.worker.processor_timeout_secs,
        )?;
        cfg.worker.instances_per_service = parse_env(
            &get_env,
            ENV_WORKERS_PER_SERVICE,
            cfg.worker.instances_per_service,
        )?;
        cfg.worker.dedup_capacity =
            parse_env(&get_env, ENV_DEDUP_CAPACITY, cfg.worker.dedup_capacity)?;
        cfg.scheduler.poll_interval_ms =
            parse_env(&get_env, ENV_POLL_INTERVAL_MS, cfg.scheduler.poll_interval_ms)?;
        cfg.scheduler.job_store = parse_env(&get_env, ENV_JOB_STORE, cfg.scheduler.job_store)?;
        if let Some(path) = get_env(ENV_JOB_STORE_PATH) {
            cfg.scheduler.job_store_path = Some(PathBuf::from(path));
        }
        cfg.gateway.max_content_len =
            parse_env(&get_env, ENV_MAX_CONTENT_LEN, cfg.gateway.max_content_len)?;
        if let Some(secret) = get_env(ENV_JWT_SECRET) {
            cfg.auth.jwt_secret = secret;
        }
        cfg.validate()?;
        Ok(cfg)
    }
}
