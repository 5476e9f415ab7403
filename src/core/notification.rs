//! User notifications: recipient lookup plus delivery through a [`Notifier`].

use std::sync::Arc;

use async_trait::async_trait;

use crate::core::{Datastore, OrchestratorError};

/// Delivery channel (email, chat, ...).
#[async_trait]
pub trait Notifier: Send + Sync + 'static {
    /// Send one message to `recipient`.
    async fn send(&self, recipient: &str, subject: &str, body: &str)
        -> Result<(), OrchestratorError>;
}

/// Resolves a user's address through the datastore and sends the message.
#[derive(Clone)]
pub struct NotificationService {
    datastore: Arc<dyn Datastore>,
    notifier: Arc<dyn Notifier>,
}

impl NotificationService {
    /// Create a service over a datastore and a notifier.
    #[must_use]
    pub fn new(datastore: Arc<dyn Datastore>, notifier: Arc<dyn Notifier>) -> Self {
        Self { datastore, notifier }
    }

    /// Notify `user_id`.
    ///
    /// # Errors
    ///
    /// `InvalidRequest` for a blank subject or body, `NotFound` for an unknown
    /// user, `UpstreamFailure` when the lookup or the send fails.
    pub async fn notify(
        &self,
        user_id: &str,
        subject: &str,
        body: &str,
    ) -> Result<(), OrchestratorError> {
        if user_id.trim().is_empty() || subject.trim().is_empty() || body.trim().is_empty() {
            return Err(OrchestratorError::InvalidRequest(
                "user_id, subject and body are required".into(),
            ));
        }
        let recipient = self
            .datastore
            .user_email(user_id)
            .await?
            .ok_or_else(|| OrchestratorError::NotFound(format!("user {user_id}")))?;
        self.notifier
            .send(&recipient, subject, body)
            .await
            .map_err(|e| match e {
                OrchestratorError::UpstreamFailure(_) => e,
                other => OrchestratorError::UpstreamFailure(other.to_string()),
            })?;
        tracing::info!(user_id, subject, "notification sent");
        Ok(())
    }
}
