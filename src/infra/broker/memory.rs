//! In-memory broker with at-least-once delivery and dead-lettering.

use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::Notify;

use crate::core::{Broker, Delivery, OrchestratorError, QueueName};

/// Stored message with its delivery count.
#[derive(Debug, Clone)]
struct Message {
    body: Vec<u8>,
    deliveries: u32,
}

#[derive(Debug, Clone)]
struct InFlight {
    queue: QueueName,
    message: Message,
}

#[derive(Default)]
struct BrokerState {
    queues: HashMap<QueueName, VecDeque<Message>>,
    /// Keyed by delivery tag; ordered so `recover` preserves delivery order.
    unacked: BTreeMap<u64, InFlight>,
    notifiers: HashMap<QueueName, Arc<Notify>>,
    next_tag: u64,
    closed: bool,
}

impl BrokerState {
    fn notifier(&mut self, queue: QueueName) -> Arc<Notify> {
        Arc::clone(
            self.notifiers
                .entry(queue)
                .or_insert_with(|| Arc::new(Notify::new())),
        )
    }

    fn ensure_open(&self) -> Result<(), OrchestratorError> {
        if self.closed {
            Err(OrchestratorError::BrokerUnavailable("broker closed".into()))
        } else {
            Ok(())
        }
    }
}

/// Single-process broker for development, tests and embedded deployments.
///
/// Each queue is a FIFO. A message stays in the unacked table from
/// `receive` until `ack`/`nack`; `nack` and `recover` put it back at the
/// head of its queue until it has been delivered `max_deliveries` times,
/// after which it moves to [`QueueName::DeadLetter`].
#[derive(Clone)]
pub struct InMemoryBroker {
    state: Arc<Mutex<BrokerState>>,
    max_deliveries: u32,
}

impl InMemoryBroker {
    /// Create a broker that dead-letters after `max_deliveries` attempts.
    #[must_use]
    pub fn new(max_deliveries: u32) -> Self {
        Self {
            state: Arc::new(Mutex::new(BrokerState::default())),
            max_deliveries: max_deliveries.max(1),
        }
    }

    /// Delivery budget per message.
    #[must_use]
    pub const fn max_deliveries(&self) -> u32 {
        self.max_deliveries
    }

    /// Messages waiting in `queue` (not counting unacked deliveries).
    #[must_use]
    pub fn depth(&self, queue: QueueName) -> usize {
        self.state.lock().queues.get(&queue).map_or(0, VecDeque::len)
    }

    /// Deliveries handed out but not yet acked or nacked.
    #[must_use]
    pub fn unacked(&self) -> usize {
        self.state.lock().unacked.len()
    }

    /// Copies of the bodies waiting in `queue`, head first.
    #[must_use]
    pub fn snapshot(&self, queue: QueueName) -> Vec<Vec<u8>> {
        self.state
            .lock()
            .queues
            .get(&queue)
            .map(|q| q.iter().map(|m| m.body.clone()).collect())
            .unwrap_or_default()
    }

    /// Put every unacked delivery back at the head of its queue, as a broker
    /// does when a consumer connection drops. Deliveries that already used
    /// their budget are dead-lettered instead.
    pub fn recover(&self) -> usize {
        let mut state = self.state.lock();
        let in_flight = std::mem::take(&mut state.unacked);
        let count = in_flight.len();
        let (exhausted, requeued): (Vec<_>, Vec<_>) = in_flight
            .into_values()
            .partition(|entry| self.is_exhausted(entry));
        for entry in exhausted {
            Self::dead_letter_locked(&mut state, entry);
        }
        // Reverse so the oldest delivery ends up first after push_front.
        for entry in requeued.into_iter().rev() {
            Self::enqueue_locked(&mut state, entry.queue, entry.message, true);
        }
        if count > 0 {
            tracing::warn!(count, "recovered unacked deliveries");
        }
        count
    }

    /// Close the broker; every pending and future call fails with
    /// `BrokerUnavailable`.
    pub fn close(&self) {
        let mut state = self.state.lock();
        state.closed = true;
        for notify in state.notifiers.values() {
            notify.notify_waiters();
        }
    }

    fn enqueue_locked(state: &mut BrokerState, queue: QueueName, message: Message, front: bool) {
        let q = state.queues.entry(queue).or_default();
        if front {
            q.push_front(message);
        } else {
            q.push_back(message);
        }
        state.notifier(queue).notify_one();
    }

    fn is_exhausted(&self, entry: &InFlight) -> bool {
        entry.queue != QueueName::DeadLetter && entry.message.deliveries >= self.max_deliveries
    }

    fn dead_letter_locked(state: &mut BrokerState, entry: InFlight) {
        tracing::error!(
            queue = %entry.queue,
            deliveries = entry.message.deliveries,
            "delivery budget exhausted, dead-lettering message"
        );
        let message = Message {
            body: entry.message.body,
            deliveries: 0,
        };
        Self::enqueue_locked(state, QueueName::DeadLetter, message, false);
    }
}

impl Default for InMemoryBroker {
    fn default() -> Self {
        Self::new(5)
    }
}

#[async_trait]
impl Broker for InMemoryBroker {
    async fn declare(&self, queue: QueueName) -> Result<(), OrchestratorError> {
        let mut state = self.state.lock();
        state.ensure_open()?;
        state.queues.entry(queue).or_default();
        state.notifier(queue);
        tracing::debug!(%queue, "queue declared");
        Ok(())
    }

    async fn publish(&self, queue: QueueName, body: Vec<u8>) -> Result<(), OrchestratorError> {
        let mut state = self.state.lock();
        state.ensure_open()?;
        Self::enqueue_locked(
            &mut state,
            queue,
            Message {
                body,
                deliveries: 0,
            },
            false,
        );
        Ok(())
    }

    async fn receive(&self, queue: QueueName) -> Result<Delivery, OrchestratorError> {
        loop {
            let notify = self.state.lock().notifier(queue);
            let notified = notify.notified();
            tokio::pin!(notified);
            // Register before checking so a publish or close in between is not missed.
            notified.as_mut().enable();
            {
                let mut state = self.state.lock();
                state.ensure_open()?;
                let next = state.queues.get_mut(&queue).and_then(VecDeque::pop_front);
                if let Some(mut message) = next {
                    message.deliveries += 1;
                    state.next_tag += 1;
                    let tag = state.next_tag;
                    let delivery = Delivery {
                        tag,
                        queue,
                        body: message.body.clone(),
                        attempt: message.deliveries,
                    };
                    state.unacked.insert(tag, InFlight { queue, message });
                    return Ok(delivery);
                }
            }
            notified.await;
        }
    }

    async fn ack(&self, delivery: &Delivery) -> Result<(), OrchestratorError> {
        let mut state = self.state.lock();
        state.ensure_open()?;
        state.unacked.remove(&delivery.tag).map(|_| ()).ok_or_else(|| {
            OrchestratorError::InvalidRequest(format!("unknown delivery tag {}", delivery.tag))
        })
    }

    async fn nack(&self, delivery: &Delivery) -> Result<(), OrchestratorError> {
        let mut state = self.state.lock();
        state.ensure_open()?;
        let entry = state.unacked.remove(&delivery.tag).ok_or_else(|| {
            OrchestratorError::InvalidRequest(format!("unknown delivery tag {}", delivery.tag))
        })?;
        if self.is_exhausted(&entry) {
            Self::dead_letter_locked(&mut state, entry);
        } else {
            tracing::debug!(queue = %entry.queue, deliveries = entry.message.deliveries, "message requeued");
            Self::enqueue_locked(&mut state, entry.queue, entry.message, true);
        }
        Ok(())
    }
}
