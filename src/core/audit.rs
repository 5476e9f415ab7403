//! Audit trail for task lifecycle transitions.
//!
//! Components record one event per externally meaningful transition
//! (submit, fan-out, merge, completion, schedule changes). Sinks are
//! synchronous and must not block; persistence is left to the embedding
//! application.

use std::collections::VecDeque;
use std::sync::Arc;

use parking_lot::Mutex;

use crate::util::clock::now_ms;

/// Audit event structure.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuditEvent {
    /// Event identifier.
    pub event_id: String,
    /// Related task (or job) identifier.
    pub task_id: String,
    /// Recording component (gateway, aggregator, scheduler).
    pub component: String,
    /// Task owner, when known.
    pub user_id: Option<String>,
    /// Action taken.
    pub action: String,
    /// Timestamp milliseconds.
    pub created_at_ms: u128,
    /// Additional context.
    pub detail: Option<String>,
}

/// Audit sink abstraction.
pub trait AuditSink: Send {
    /// Record an audit event.
    fn record(&mut self, event: AuditEvent);
}

/// Shared handle components hold onto.
pub type SharedAuditSink = Arc<Mutex<Box<dyn AuditSink>>>;

/// Wrap a sink for sharing between components.
#[must_use]
pub fn shared_sink(sink: impl AuditSink + 'static) -> SharedAuditSink {
    Arc::new(Mutex::new(Box::new(sink)))
}

/// In-memory audit sink for testing and dev.
pub struct InMemoryAuditSink {
    events: VecDeque<AuditEvent>,
    max_events: usize,
}

impl InMemoryAuditSink {
    /// Create a new in-memory sink with a bounded buffer.
    #[must_use]
    pub fn new(max_events: usize) -> Self {
        Self {
            events: VecDeque::with_capacity(max_events),
            max_events,
        }
    }

    /// Retrieve a snapshot of stored events.
    #[must_use]
    pub fn events(&self) -> Vec<AuditEvent> {
        self.events.iter().cloned().collect()
    }
}

impl AuditSink for InMemoryAuditSink {
    fn record(&mut self, event: AuditEvent) {
        if self.max_events == 0 {
            return;
        }
        if self.events.len() >= self.max_events {
            self.events.pop_front();
        }
        self.events.push_back(event);
    }
}

/// Shared sink that can be inspected after handing a clone to components.
#[derive(Clone)]
pub struct SharedMemoryAuditSink {
    inner: Arc<Mutex<InMemoryAuditSink>>,
}

impl SharedMemoryAuditSink {
    /// Create a bounded shared sink.
    #[must_use]
    pub fn new(max_events: usize) -> Self {
        Self {
            inner: Arc::new(Mutex::new(InMemoryAuditSink::new(max_events))),
        }
    }

    /// Snapshot of recorded events.
    #[must_use]
    pub fn events(&self) -> Vec<AuditEvent> {
        self.inner.lock().events()
    }

    /// Actions recorded for one task, in order.
    #[must_use]
    pub fn actions_for(&self, task_id: &str) -> Vec<String> {
        self.events()
            .into_iter()
            .filter(|e| e.task_id == task_id)
            .map(|e| e.action)
            .collect()
    }
}

impl AuditSink for SharedMemoryAuditSink {
    fn record(&mut self, event: AuditEvent) {
        self.inner.lock().record(event);
    }
}

/// Helper to build an audit event from context.
pub fn build_audit_event(
    task_id: impl Into<String>,
    component: impl Into<String>,
    user_id: Option<String>,
    action: impl Into<String>,
    detail: Option<String>,
) -> AuditEvent {
    let task_id = task_id.into();
    let action = action.into();
    let created_at_ms = now_ms();
    AuditEvent {
        event_id: format!("{task_id}-{action}-{}", uuid::Uuid::new_v4().simple()),
        task_id,
        component: component.into(),
        user_id,
        action,
        created_at_ms,
        detail,
    }
}

/// Record into an optional sink.
pub(crate) fn record(sink: Option<&SharedAuditSink>, event: impl FnOnce() -> AuditEvent) {
    if let Some(sink) = sink {
        sink.lock().record(event());
    }
}
