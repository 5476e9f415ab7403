//! In-memory notifier that keeps an outbox instead of sending mail.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;

use crate::core::{Notifier, OrchestratorError};
use crate::util::clock::now_ms;

/// One recorded notification.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SentNotification {
    /// Destination address.
    pub recipient: String,
    /// Subject line.
    pub subject: String,
    /// Message body.
    pub body: String,
    /// Send time, ms since epoch.
    pub sent_at_ms: u128,
}

/// Outbox notifier for development and tests. Clones share the outbox.
#[derive(Clone, Default)]
pub struct InMemoryNotifier {
    outbox: Arc<Mutex<Vec<SentNotification>>>,
    failing: Arc<AtomicBool>,
}

impl InMemoryNotifier {
    /// Create an empty outbox.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every send fail until switched back.
    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::Release);
    }

    /// Everything sent so far.
    #[must_use]
    pub fn sent(&self) -> Vec<SentNotification> {
        self.outbox.lock().clone()
    }
}

#[async_trait]
impl Notifier for InMemoryNotifier {
    async fn send(
        &self,
        recipient: &str,
        subject: &str,
        body: &str,
    ) -> Result<(), OrchestratorError> {
        if self.failing.load(Ordering::Acquire) {
            return Err(OrchestratorError::UpstreamFailure("notifier unavailable".into()));
        }
        self.outbox.lock().push(SentNotification {
            recipient: recipient.to_string(),
            subject: subject.to_string(),
            body: body.to_string(),
            sent_at_ms: now_ms(),
        });
        Ok(())
    }
}
