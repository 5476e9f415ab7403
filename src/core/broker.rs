//! Broker topology: named queues, deliveries and the fan-out publisher.
//!
//! One queue exists per [`CapabilityService`], plus a shared response queue
//! and a dead-letter queue for messages that exhausted their delivery budget.
//! Delivery is at-least-once: a consumer acknowledges only after it has
//! finished with a message, and anything left unacknowledged is delivered
//! again. FIFO holds within one queue for one producer and one consumer only.

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use serde::Serialize;

use crate::core::{CapabilityService, OrchestratorError, Task};

/// Closed set of queue names.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum QueueName {
    /// Inbound queue of one capability.
    Capability(CapabilityService),
    /// Shared queue of capability results.
    Response,
    /// Terminal queue for messages past their delivery budget.
    DeadLetter,
}

impl QueueName {
    /// Every queue of the topology.
    #[must_use]
    pub fn topology() -> Vec<Self> {
        CapabilityService::ALL
            .into_iter()
            .map(Self::Capability)
            .chain([Self::Response, Self::DeadLetter])
            .collect()
    }

    /// Wire name of the queue.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Capability(CapabilityService::TaskBreakdown) => "task_breakdown_queue",
            Self::Capability(CapabilityService::TimeManagement) => "time_management_queue",
            Self::Capability(CapabilityService::FocusTechniques) => "focus_techniques_queue",
            Self::Capability(CapabilityService::LearningStrategies) => "learning_strategies_queue",
            Self::Capability(CapabilityService::EmotionalRegulation) => {
                "emotional_regulation_queue"
            }
            Self::Response => "response_queue",
            Self::DeadLetter => "dead_letter_queue",
        }
    }
}

impl fmt::Display for QueueName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A message handed to a consumer. Must be acked or nacked exactly once.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Delivery {
    /// Broker-assigned tag identifying this delivery.
    pub tag: u64,
    /// Source queue.
    pub queue: QueueName,
    /// Raw JSON body.
    pub body: Vec<u8>,
    /// 1-based delivery attempt.
    pub attempt: u32,
}

impl Delivery {
    /// Whether this message has been delivered before.
    #[must_use]
    pub const fn is_redelivery(&self) -> bool {
        self.attempt > 1
    }
}

/// Message broker abstraction.
#[async_trait]
pub trait Broker: Send + Sync + 'static {
    /// Ensure a queue exists.
    async fn declare(&self, queue: QueueName) -> Result<(), OrchestratorError>;

    /// Publish a raw body to a queue.
    async fn publish(&self, queue: QueueName, body: Vec<u8>) -> Result<(), OrchestratorError>;

    /// Wait for the next message on a queue.
    async fn receive(&self, queue: QueueName) -> Result<Delivery, OrchestratorError>;

    /// Acknowledge a delivery, removing the message for good.
    async fn ack(&self, delivery: &Delivery) -> Result<(), OrchestratorError>;

    /// Reject a delivery so the broker redelivers it (or dead-letters it once
    /// its delivery budget is spent).
    async fn nack(&self, delivery: &Delivery) -> Result<(), OrchestratorError>;
}

/// Serialize `value` and publish it.
pub async fn publish_json<B, T>(
    broker: &B,
    queue: QueueName,
    value: &T,
) -> Result<(), OrchestratorError>
where
    B: Broker + ?Sized,
    T: Serialize + Sync,
{
    let body = serde_json::to_vec(value)
        .map_err(|e| OrchestratorError::InvalidRequest(format!("encode failed: {e}")))?;
    broker.publish(queue, body).await
}

/// Publishes one copy of a task envelope to every capability queue.
///
/// Shared by the ingress gateway and the scheduler trigger.
pub struct FanOut {
    broker: Arc<dyn Broker>,
    services: Vec<CapabilityService>,
}

impl FanOut {
    /// Fan out to every capability.
    #[must_use]
    pub fn new(broker: Arc<dyn Broker>) -> Self {
        Self {
            broker,
            services: CapabilityService::ALL.to_vec(),
        }
    }

    /// Capabilities this fan-out targets.
    #[must_use]
    pub fn services(&self) -> &[CapabilityService] {
        &self.services
    }

    /// Publish `task` to each capability queue, one send per queue.
    ///
    /// Stops at the first failed publish; queues already written keep their
    /// copy, which downstream workers will still process.
    pub async fn dispatch(&self, task: &Task) -> Result<(), OrchestratorError> {
        let body = serde_json::to_vec(task)
            .map_err(|e| OrchestratorError::InvalidRequest(format!("encode failed: {e}")))?;
        for service in &self.services {
            let queue = QueueName::Capability(*service);
            self.broker.publish(queue, body.clone()).await.map_err(|e| {
                tracing::error!(task_id = %task.task_id, %queue, error = %e, "fan-out publish failed");
                e
            })?;
        }
        tracing::info!(
            task_id = %task.task_id,
            user_id = %task.user_id,
            queues = self.services.len(),
            "task fanned out"
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn topology_has_one_queue_per_capability_plus_response_and_dead_letter() {
        let topology = QueueName::topology();
        assert_eq!(topology.len(), CapabilityService::ALL.len() + 2);
        assert!(topology.contains(&QueueName::Response));
        assert_eq!(
            QueueName::Capability(CapabilityService::FocusTechniques).as_str(),
            "focus_techniques_queue"
        );
    }
}
