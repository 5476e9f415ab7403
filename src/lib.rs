//! # Prometheus Fan-out
//!
//! Fan-out/fan-in orchestration of independent capability analyses over a
//! message broker.
//!
//! A submitted task is copied onto one queue per capability. Each worker
//! consumes its queue, calls its capability processor and publishes the
//! result on the shared response queue. The aggregator merges results per
//! task into one record that turns COMPLETE once every expected capability
//! has reported. A scheduler re-runs a task's fan-out at a chosen instant.
//!
//! ## Delivery Guarantees
//!
//! - **At-least-once**: workers acknowledge only after the result is
//!   published; a failed or timed-out processor call leaves the message for
//!   redelivery, up to a bounded number of attempts before it is
//!   dead-lettered.
//! - **Idempotent merge**: re-delivered results are merged by service key,
//!   so the aggregate is the same whatever the arrival order or duplication.
//! - **Fail-closed admission**: the per-user rate limiter refuses requests
//!   when its counter store is unreachable unless configured otherwise.
//!
//! ## Usage
//!
//! ```rust,ignore
//! use std::sync::Arc;
//!
//! use prometheus_fanout::builders::{build_gateway, build_workers, Pipeline};
//! use prometheus_fanout::config::OrchestratorConfig;
//! use prometheus_fanout::core::{Aggregator, Broker, FanOut};
//! use prometheus_fanout::infra::{InMemoryBroker, InMemoryCounterStore, InMemoryDatastore, JwtIdentityProvider};
//! use prometheus_fanout::runtime::TokioSpawner;
//!
//! let cfg = OrchestratorConfig::from_env()?;
//! let broker: Arc<dyn Broker> = Arc::new(InMemoryBroker::new(cfg.broker.max_deliveries));
//! let datastore = Arc::new(InMemoryDatastore::new());
//! let fanout = Arc::new(FanOut::new(Arc::clone(&broker)));
//!
//! let workers = build_workers(&cfg, &broker, |service, _| Ok(my_processor(service)))?;
//! let aggregator = Arc::new(Aggregator::new(Arc::clone(&broker), datastore.clone()));
//! let handle = Pipeline::new(workers, aggregator).start(&TokioSpawner::current()?);
//!
//! let gateway = build_gateway(
//!     &cfg,
//!     Arc::new(JwtIdentityProvider::new(&cfg.auth.jwt_secret)?),
//!     Arc::new(InMemoryCounterStore::new()),
//!     datastore,
//!     fanout,
//! )?;
//! let task_id = gateway.submit(&bearer, "Write report", now_ms()).await?;
//! ```
//!
//! For complete scenarios, see `tests/pipeline_test.rs`.

#![deny(missing_docs)]
#![deny(unsafe_code)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]

/// Fan-out/fan-in domain logic.
pub mod core;
/// Configuration models for limits, backends, and timeouts.
pub mod config;
/// Builders to construct pipeline components from configuration.
pub mod builders;
/// Infrastructure adapters for brokers, stores, identity and notification.
pub mod infra;
/// Runtime adapters and API surface.
pub mod runtime;
/// Shared utilities.
pub mod util;
