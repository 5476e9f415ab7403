//! Configuration models for limits, backends and timeouts.

pub mod orchestrator;

pub use orchestrator::{
    AuthConfig, BrokerConfig, GatewayConfig, JobStoreBackend, OrchestratorConfig,
    RateLimitConfig, SchedulerConfig, WorkerConfig,
};
