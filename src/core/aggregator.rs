//! Fan-in: merges capability results into one aggregated record per task.
//!
//! Partial state is written to the datastore on every merge, so a restarted
//! aggregator resumes from the last durable record and redelivered results
//! simply overwrite identical entries. Within one instance, merges for the
//! same task are serialized by a per-task async lock; across instances the
//! datastore's upsert is the last writer.

use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::watch;

use crate::core::audit::{self, build_audit_event, SharedAuditSink};
use crate::core::{
    AggregatedResult, Broker, CapabilityResult, CapabilityService, Datastore, Delivery,
    DeliveryOutcome, NotificationService, OrchestratorError, QueueName,
};

const COMPONENT: &str = "aggregator";

/// Result of merging one capability result.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MergeOutcome {
    /// Content stored; `complete` is true once every expected service reported.
    Merged {
        /// Aggregation status after the merge.
        complete: bool,
    },
    /// Identical content was already stored.
    Duplicate,
    /// Service outside the expected set; nothing stored.
    Rejected,
}

/// Consumer of the response queue.
pub struct Aggregator {
    broker: Arc<dyn Broker>,
    datastore: Arc<dyn Datastore>,
    expected: BTreeSet<CapabilityService>,
    locks: Mutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>,
    notifications: Option<NotificationService>,
    audit: Option<SharedAuditSink>,
}

impl Aggregator {
    /// Create an aggregator expecting every capability.
    #[must_use]
    pub fn new(broker: Arc<dyn Broker>, datastore: Arc<dyn Datastore>) -> Self {
        Self {
            broker,
            datastore,
            expected: CapabilityService::all_set(),
            locks: Mutex::new(HashMap::new()),
            notifications: None,
            audit: None,
        }
    }

    /// Override the expected set for new aggregations.
    #[must_use]
    pub fn with_expected_services(
        mut self,
        services: impl IntoIterator<Item = CapabilityService>,
    ) -> Self {
        self.expected = services.into_iter().collect();
        self
    }

    /// Send a "results ready" notification on completion.
    #[must_use]
    pub fn with_notifications(mut self, notifications: NotificationService) -> Self {
        self.notifications = Some(notifications);
        self
    }

    /// Attach an audit sink.
    #[must_use]
    pub fn with_audit(mut self, audit: SharedAuditSink) -> Self {
        self.audit = Some(audit);
        self
    }

    fn task_lock(&self, task_id: &str) -> Arc<tokio::sync::Mutex<()>> {
        Arc::clone(self.locks.lock().entry(task_id.to_string()).or_default())
    }

    fn release_task_lock(&self, task_id: &str, lock: Arc<tokio::sync::Mutex<()>>) {
        let mut locks = self.locks.lock();
        // Only the map and this caller hold it: nobody is waiting.
        if Arc::strong_count(&lock) == 2 {
            locks.remove(task_id);
        }
    }

    async fn load_or_create(
        &self,
        result: &CapabilityResult,
    ) -> Result<AggregatedResult, OrchestratorError> {
        if let Some(existing) = self.datastore.load_result(&result.task_id).await? {
            return Ok(existing);
        }
        let content = match self.datastore.get_task(&result.task_id).await? {
            Some(task) => task.content,
            None => {
                tracing::warn!(task_id = %result.task_id, "result for unknown task, aggregating without task text");
                String::new()
            }
        };
        Ok(AggregatedResult::new(
            result.task_id.clone(),
            result.user_id.clone(),
            content,
            self.expected.clone(),
        ))
    }

    /// Merge one capability result into its task's aggregation.
    ///
    /// # Errors
    ///
    /// `UpstreamFailure` if the datastore read or write fails; the caller
    /// should leave the message for redelivery.
    pub async fn on_capability_result(
        &self,
        result: CapabilityResult,
    ) -> Result<MergeOutcome, OrchestratorError> {
        let lock = self.task_lock(&result.task_id);
        let outcome = {
            let _guard = lock.lock().await;
            self.merge_locked(&result).await
        };
        self.release_task_lock(&result.task_id, lock);
        outcome
    }

    async fn merge_locked(&self, result: &CapabilityResult) -> Result<MergeOutcome, OrchestratorError> {
        let mut aggregate = self.load_or_create(result).await?;

        if !aggregate.expects(result.service) {
            tracing::warn!(
                task_id = %result.task_id,
                service = %result.service,
                "result for unexpected service rejected"
            );
            audit::record(self.audit.as_ref(), || {
                build_audit_event(
                    &result.task_id,
                    COMPONENT,
                    Some(result.user_id.clone()),
                    "reject",
                    Some(result.service.to_string()),
                )
            });
            return Ok(MergeOutcome::Rejected);
        }

        if !aggregate.merge(result.service, result.content.clone()) {
            tracing::debug!(task_id = %result.task_id, service = %result.service, "duplicate result ignored");
            // A crash after the final save but before the hooks ran leaves
            // them pending; the redelivered result finishes the job.
            self.finish_if_complete(&mut aggregate).await?;
            return Ok(MergeOutcome::Duplicate);
        }

        self.datastore.save_result(&aggregate).await?;
        tracing::info!(
            task_id = %aggregate.task_id,
            service = %result.service,
            merged = aggregate.results.len(),
            expected = aggregate.expected_services.len(),
            "capability result merged"
        );
        audit::record(self.audit.as_ref(), || {
            build_audit_event(
                &aggregate.task_id,
                COMPONENT,
                Some(aggregate.user_id.clone()),
                "merge",
                Some(result.service.to_string()),
            )
        });

        self.finish_if_complete(&mut aggregate).await?;
        Ok(MergeOutcome::Merged {
            complete: aggregate.is_complete(),
        })
    }

    /// Run the completion hooks once per record and persist the marker.
    async fn finish_if_complete(
        &self,
        aggregate: &mut AggregatedResult,
    ) -> Result<(), OrchestratorError> {
        if !aggregate.is_complete() || aggregate.completion_notified {
            return Ok(());
        }
        self.on_complete(aggregate).await;
        aggregate.completion_notified = true;
        self.datastore.save_result(aggregate).await
    }

    async fn on_complete(&self, aggregate: &AggregatedResult) {
        tracing::info!(task_id = %aggregate.task_id, user_id = %aggregate.user_id, "aggregation complete");
        audit::record(self.audit.as_ref(), || {
            build_audit_event(
                &aggregate.task_id,
                COMPONENT,
                Some(aggregate.user_id.clone()),
                "complete",
                None,
            )
        });
        if let Some(notifications) = &self.notifications {
            let body = format!("Results for your task are ready: {}", aggregate.content);
            if let Err(e) = notifications
                .notify(&aggregate.user_id, "Task Results Ready", &body)
                .await
            {
                tracing::warn!(task_id = %aggregate.task_id, error = %e, "completion notification failed");
            }
        }
    }

    /// Aggregated status for a task.
    ///
    /// A known task with no results yet yields a PENDING placeholder.
    ///
    /// # Errors
    ///
    /// `NotFound` for an unknown task, `UpstreamFailure` on datastore failure.
    pub async fn lookup(&self, task_id: &str) -> Result<AggregatedResult, OrchestratorError> {
        if let Some(stored) = self.datastore.load_result(task_id).await? {
            return Ok(stored);
        }
        let task = self
            .datastore
            .get_task(task_id)
            .await?
            .ok_or_else(|| OrchestratorError::NotFound(format!("task {task_id}")))?;
        Ok(AggregatedResult::new(
            task.task_id,
            task.user_id,
            task.content,
            self.expected.clone(),
        ))
    }

    /// Handle one delivery from the response queue.
    ///
    /// # Errors
    ///
    /// Only broker failures are returned.
    pub async fn handle(&self, delivery: Delivery) -> Result<DeliveryOutcome, OrchestratorError> {
        let result: CapabilityResult = match serde_json::from_slice(&delivery.body) {
            Ok(result) => result,
            Err(e) => {
                tracing::warn!(error = %e, "malformed capability result discarded");
                self.broker.ack(&delivery).await?;
                return Ok(DeliveryOutcome::Discarded);
            }
        };
        match self.on_capability_result(result).await {
            Ok(MergeOutcome::Rejected) => {
                self.broker.ack(&delivery).await?;
                Ok(DeliveryOutcome::Discarded)
            }
            Ok(_) => {
                self.broker.ack(&delivery).await?;
                Ok(DeliveryOutcome::Acknowledged)
            }
            Err(e) if e.is_retryable() => {
                tracing::warn!(attempt = delivery.attempt, error = %e, "merge failed, leaving result for redelivery");
                self.broker.nack(&delivery).await?;
                Ok(DeliveryOutcome::Requeued)
            }
            Err(e) => {
                tracing::warn!(error = %e, "unprocessable capability result discarded");
                self.broker.ack(&delivery).await?;
                Ok(DeliveryOutcome::Discarded)
            }
        }
    }

    /// Consume the response queue until `shutdown` flips to `true`.
    ///
    /// # Errors
    ///
    /// `BrokerUnavailable` at startup or when the broker goes away mid-run.
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) -> Result<(), OrchestratorError> {
        self.broker.declare(QueueName::Response).await?;
        tracing::info!("aggregator bound to response queue");
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
                delivery = self.broker.receive(QueueName::Response) => delivery?,
            };
            self.handle(delivery).await?;
        }
        tracing::info!("aggregator stopped");
        Ok(())
    }
}
