//! Capability worker: the consume loop bound to one capability queue.
//!
//! Every worker runs the same state machine, parameterised only by its
//! processor (which fixes the queue it binds to):
//!
//! `Idle -> Received -> Processing -> Published -> Acknowledged -> Idle`
//!
//! The source message is acknowledged only after the result has been
//! published to the response queue, so a crash in between causes redelivery
//! rather than loss. Processor failures leave the message unacknowledged
//! (nack); the broker redelivers it until its delivery budget is spent and
//! then dead-letters it. Bodies that do not decode are acknowledged and
//! dropped since redelivery cannot fix them.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::watch;

use crate::core::broker::publish_json;
use crate::core::{
    Broker, CapabilityProcessor, CapabilityResult, CapabilityService, Delivery,
    OrchestratorError, QueueName, Task,
};
use crate::util::clock::now_ms;

/// Position of a worker in its per-message state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerState {
    /// Waiting for a message.
    Idle,
    /// Message dequeued.
    Received,
    /// Processor invoked.
    Processing,
    /// Result sent to the response queue.
    Published,
    /// Source message removed from its queue.
    Acknowledged,
}

/// What happened to one delivery.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeliveryOutcome {
    /// Result published and source message acknowledged.
    Acknowledged,
    /// Body was malformed; acknowledged and dropped.
    Discarded,
    /// Processing or publishing failed; message handed back for redelivery.
    Requeued,
}

/// Results already published, so a redelivered task is answered with the
/// same content instead of a second processor call.
struct PublishedCache {
    capacity: usize,
    order: VecDeque<String>,
    results: HashMap<String, CapabilityResult>,
}

impl PublishedCache {
    fn new(capacity: usize) -> Self {
        Self {
            capacity,
            order: VecDeque::with_capacity(capacity.min(1024)),
            results: HashMap::new(),
        }
    }

    fn get(&self, task_id: &str) -> Option<CapabilityResult> {
        self.results.get(task_id).cloned()
    }

    fn insert(&mut self, result: CapabilityResult) {
        if self.capacity == 0 || self.results.contains_key(&result.task_id) {
            return;
        }
        if self.order.len() >= self.capacity {
            if let Some(oldest) = self.order.pop_front() {
                self.results.remove(&oldest);
            }
        }
        self.order.push_back(result.task_id.clone());
        self.results.insert(result.task_id.clone(), result);
    }
}

/// One consumer instance for one capability queue.
pub struct Worker {
    id: usize,
    broker: Arc<dyn Broker>,
    processor: Arc<dyn CapabilityProcessor>,
    timeout: Duration,
    state: Mutex<WorkerState>,
    published: Mutex<PublishedCache>,
}

impl Worker {
    /// Default processor call bound.
    pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);
    /// Default number of published results remembered for deduplication.
    pub const DEFAULT_DEDUP_CAPACITY: usize = 1024;

    /// Create a worker bound to the processor's capability queue.
    #[must_use]
    pub fn new(id: usize, broker: Arc<dyn Broker>, processor: Arc<dyn CapabilityProcessor>) -> Self {
        Self {
            id,
            broker,
            processor,
            timeout: Self::DEFAULT_TIMEOUT,
            state: Mutex::new(WorkerState::Idle),
            published: Mutex::new(PublishedCache::new(Self::DEFAULT_DEDUP_CAPACITY)),
        }
    }

    /// Bound each processor call.
    #[must_use]
    pub const fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Remember up to `capacity` published results.
    #[must_use]
    pub fn with_dedup_capacity(self, capacity: usize) -> Self {
        *self.published.lock() = PublishedCache::new(capacity);
        self
    }

    /// Instance number within its capability.
    #[must_use]
    pub const fn id(&self) -> usize {
        self.id
    }

    /// Capability handled.
    #[must_use]
    pub fn service(&self) -> CapabilityService {
        self.processor.service()
    }

    /// Source queue.
    #[must_use]
    pub fn queue(&self) -> QueueName {
        QueueName::Capability(self.service())
    }

    /// Current state.
    #[must_use]
    pub fn state(&self) -> WorkerState {
        *self.state.lock()
    }

    fn transition(&self, next: WorkerState) {
        let mut state = self.state.lock();
        let from = *state;
        tracing::trace!(worker = self.id, from = ?from, to = ?next, "worker transition");
        *state = next;
    }

    /// Declare the source and response queues.
    ///
    /// # Errors
    ///
    /// `BrokerUnavailable` if the broker cannot be reached; the instance
    /// cannot run without its queue.
    pub async fn start(&self) -> Result<(), OrchestratorError> {
        self.broker.declare(self.queue()).await?;
        self.broker.declare(QueueName::Response).await?;
        tracing::info!(worker = self.id, queue = %self.queue(), "worker bound");
        Ok(())
    }

    /// Process one delivery from the source queue.
    ///
    /// # Errors
    ///
    /// Only broker failures (ack/nack impossible) are returned; processing
    /// failures are reported through [`DeliveryOutcome::Requeued`].
    pub async fn handle(&self, delivery: Delivery) -> Result<DeliveryOutcome, OrchestratorError> {
        self.transition(WorkerState::Received);
        let outcome = self.handle_received(&delivery).await;
        self.transition(WorkerState::Idle);
        outcome
    }

    async fn handle_received(&self, delivery: &Delivery) -> Result<DeliveryOutcome, OrchestratorError> {
        let task: Task = match serde_json::from_slice(&delivery.body) {
            Ok(task) => task,
            Err(e) => {
                tracing::warn!(worker = self.id, queue = %delivery.queue, error = %e, "malformed task envelope discarded");
                self.broker.ack(delivery).await?;
                return Ok(DeliveryOutcome::Discarded);
            }
        };

        let cached = self.published.lock().get(&task.task_id);
        let result = if let Some(result) = cached {
            tracing::debug!(worker = self.id, task_id = %task.task_id, attempt = delivery.attempt, "republishing cached result");
            result
        } else {
            self.transition(WorkerState::Processing);
            match self.invoke(&task).await {
                Ok(result) => {
                    self.published.lock().insert(result.clone());
                    result
                }
                Err(e) => {
                    tracing::warn!(
                        worker = self.id,
                        task_id = %task.task_id,
                        service = %self.service(),
                        attempt = delivery.attempt,
                        error = %e,
                        "processing failed, leaving message for redelivery"
                    );
                    self.broker.nack(delivery).await?;
                    return Ok(DeliveryOutcome::Requeued);
                }
            }
        };

        if let Err(e) = publish_json(self.broker.as_ref(), QueueName::Response, &result).await {
            tracing::warn!(worker = self.id, task_id = %task.task_id, error = %e, "result publish failed");
            self.broker.nack(delivery).await?;
            return Ok(DeliveryOutcome::Requeued);
        }
        self.transition(WorkerState::Published);

        self.broker.ack(delivery).await?;
        self.transition(WorkerState::Acknowledged);
        tracing::info!(worker = self.id, task_id = %task.task_id, service = %self.service(), "capability result published");
        Ok(DeliveryOutcome::Acknowledged)
    }

    async fn invoke(&self, task: &Task) -> Result<CapabilityResult, OrchestratorError> {
        let content = tokio::time::timeout(self.timeout, self.processor.process(task))
            .await
            .map_err(|_| {
                OrchestratorError::UpstreamFailure(format!(
                    "processor timed out after {:?}",
                    self.timeout
                ))
            })??;
        if content.is_empty() {
            return Err(OrchestratorError::UpstreamFailure(
                "processor returned empty content".into(),
            ));
        }
        Ok(CapabilityResult {
            task_id: task.task_id.clone(),
            user_id: task.user_id.clone(),
            service: self.service(),
            content,
            produced_at: now_ms(),
        })
    }

    /// Consume the source queue until `shutdown` flips to `true`.
    ///
    /// # Errors
    ///
    /// `BrokerUnavailable` at startup or when the broker goes away mid-run.
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) -> Result<(), OrchestratorError> {
        self.start().await?;
        let queue = self.queue();
        loop {
            if *shutdown.borrow() {
                break;
            }
            let delivery = tokio::select! {
                changed = shutdown.changed() => {
                    if changed.is_err() {
                        break;
                    }
                    continue;
                }
                delivery = self.broker.receive(queue) => delivery?,
            };
            self.handle(delivery).await?;
        }
        tracing::info!(worker = self.id, %queue, "worker stopped");
        Ok(())
    }
}
