//! Fan-out/fan-in domain logic: broker topology, workers, aggregation,
//! scheduling and admission control.

pub mod aggregator;
pub mod audit;
pub mod broker;
pub mod datastore;
pub mod error;
pub mod gateway;
pub mod identity;
pub mod model;
pub mod notification;
pub mod processor;
pub mod rate_limiter;
pub mod scheduler;
pub mod spawn;
pub mod worker;

pub use aggregator::{Aggregator, MergeOutcome};
pub use audit::{
    build_audit_event, shared_sink, AuditEvent, AuditSink, InMemoryAuditSink, SharedAuditSink,
    SharedMemoryAuditSink,
};
pub use broker::{publish_json, Broker, Delivery, FanOut, QueueName};
pub use datastore::Datastore;
pub use error::{AppResult, OrchestratorError};
pub use gateway::IngressGateway;
pub use identity::IdentityProvider;
pub use model::{
    AggregatedResult, AggregationStatus, CapabilityResult, CapabilityService, JobState,
    ScheduledJob, ServiceContent, Task,
};
pub use notification::{NotificationService, Notifier};
pub use processor::CapabilityProcessor;
pub use rate_limiter::{CounterStore, RateLimiter, StoreFailurePolicy, WindowDecision};
pub use scheduler::{FiredJob, JobStore, Scheduler};
pub use spawn::Spawn;
pub use worker::{DeliveryOutcome, Worker, WorkerState};
