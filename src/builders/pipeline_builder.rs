//! Builders that assemble the fan-out pipeline from configuration.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;

use crate::config::{JobStoreBackend, OrchestratorConfig};
use crate::core::{
    Aggregator, Broker, CapabilityProcessor, CapabilityService, CounterStore, Datastore, FanOut,
    IdentityProvider, IngressGateway, JobStore, OrchestratorError, RateLimiter, Scheduler, Spawn,
    Worker,
};
use crate::infra::{FileJobStore, InMemoryJobStore};

fn config_error(e: String) -> OrchestratorError {
    OrchestratorError::InvalidRequest(format!("config invalid: {e}"))
}

/// Build `instances_per_service` workers for every capability.
///
/// `processor_factory` is called once per instance with the capability and
/// the instance number; the returned processor must implement that
/// capability.
///
/// # Errors
///
/// `InvalidRequest` for an invalid configuration or a processor bound to
/// the wrong capability; any error the factory returns.
pub fn build_workers<F>(
    cfg: &OrchestratorConfig,
    broker: &Arc<dyn Broker>,
    mut processor_factory: F,
) -> Result<Vec<Worker>, OrchestratorError>
where
    F: FnMut(CapabilityService, usize) -> Result<Arc<dyn CapabilityProcessor>, OrchestratorError>,
{
    cfg.validate().map_err(config_error)?;

    let mut workers = Vec::with_capacity(CapabilityService::ALL.len() * cfg.worker.instances_per_service);
    for service in CapabilityService::ALL {
        for instance in 0..cfg.worker.instances_per_service {
            let processor = processor_factory(service, instance)?;
            if processor.service() != service {
                return Err(OrchestratorError::InvalidRequest(format!(
                    "processor for {service} reports {}",
                    processor.service()
                )));
            }
            let worker = Worker::new(instance, Arc::clone(broker), processor)
                .with_timeout(cfg.processor_timeout())
                .with_dedup_capacity(cfg.worker.dedup_capacity);
            workers.push(worker);
        }
    }
    tracing::debug!(workers = workers.len(), "workers built");
    Ok(workers)
}

/// Open the job store selected by the configuration.
///
/// # Errors
///
/// `InvalidRequest` for a file store without a path, `UpstreamFailure` if
/// the file store cannot be opened.
pub fn build_job_store(cfg: &OrchestratorConfig) -> Result<Box<dyn JobStore>, OrchestratorError> {
    match cfg.scheduler.job_store {
        JobStoreBackend::InMemory => Ok(Box::new(InMemoryJobStore::new())),
        JobStoreBackend::File => {
            let path = cfg.scheduler.job_store_path.as_ref().ok_or_else(|| {
                config_error("scheduler.job_store_path is required for the file job store".into())
            })?;
            Ok(Box::new(FileJobStore::open(path)?))
        }
    }
}

/// Build the rate limiter and gateway from configuration.
///
/// # Errors
///
/// `InvalidRequest` for an invalid configuration.
pub fn build_gateway(
    cfg: &OrchestratorConfig,
    identity: Arc<dyn IdentityProvider>,
    counters: Arc<dyn CounterStore>,
    datastore: Arc<dyn Datastore>,
    fanout: Arc<FanOut>,
) -> Result<IngressGateway, OrchestratorError> {
    cfg.validate().map_err(config_error)?;
    let limiter = RateLimiter::new(counters, cfg.rate_limit.limit, cfg.rate_window())
        .with_failure_policy(cfg.rate_limit.on_store_failure);
    Ok(IngressGateway::new(identity, limiter, datastore, fanout)
        .with_max_content_len(cfg.gateway.max_content_len))
}

/// Workers, aggregator and optional scheduler, ready to be spawned.
pub struct Pipeline {
    workers: Vec<Arc<Worker>>,
    aggregator: Arc<Aggregator>,
    scheduler: Option<(Arc<Scheduler>, Duration)>,
}

impl Pipeline {
    /// Assemble a pipeline from built workers and an aggregator.
    #[must_use]
    pub fn new(workers: Vec<Worker>, aggregator: Arc<Aggregator>) -> Self {
        Self {
            workers: workers.into_iter().map(Arc::new).collect(),
            aggregator,
            scheduler: None,
        }
    }

    /// Also run a scheduler trigger loop.
    #[must_use]
    pub fn with_scheduler(mut self, scheduler: Arc<Scheduler>, poll_interval: Duration) -> Self {
        self.scheduler = Some((scheduler, poll_interval));
        self
    }

    /// Number of worker loops.
    #[must_use]
    pub fn worker_count(&self) -> usize {
        self.workers.len()
    }

    /// Spawn every loop and hand back the shutdown switch.
    pub fn start<S: Spawn>(self, spawner: &S) -> PipelineHandle {
        let (tx, rx) = watch::channel(false);

        for worker in self.workers {
            let shutdown = rx.clone();
            spawner.spawn(async move {
                if let Err(e) = worker.run(shutdown).await {
                    tracing::error!(
                        worker = worker.id(),
                        service = %worker.service(),
                        error = %e,
                        "worker loop exited"
                    );
                }
            });
        }

        let aggregator = self.aggregator;
        let shutdown = rx.clone();
        spawner.spawn(async move {
            if let Err(e) = aggregator.run(shutdown).await {
                tracing::error!(error = %e, "aggregator loop exited");
            }
        });

        if let Some((scheduler, poll_interval)) = self.scheduler {
            let shutdown = rx.clone();
            spawner.spawn(async move {
                scheduler.run(poll_interval, shutdown).await;
            });
        }

        tracing::info!("pipeline started");
        PipelineHandle { shutdown: tx }
    }
}

/// Stops every loop started by [`Pipeline::start`].
pub struct PipelineHandle {
    shutdown: watch::Sender<bool>,
}

impl PipelineHandle {
    /// Ask every loop to stop after its current message.
    pub fn shutdown(&self) {
        self.shutdown.send_replace(true);
        tracing::info!("pipeline shutdown requested");
    }

    /// Whether shutdown has been requested.
    #[must_use]
    pub fn is_shutdown(&self) -> bool {
        *self.shutdown.borrow()
    }
}
