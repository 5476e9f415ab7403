//! Ingress gateway: identity, admission, task construction, fan-out.
//!
//! Submission is fire-and-forget. The task id comes back as soon as every
//! capability queue holds its copy; completion is observed through the
//! aggregator's lookup.

use std::sync::Arc;

use crate::core::audit::{self, build_audit_event, SharedAuditSink};
use crate::core::{Datastore, FanOut, IdentityProvider, OrchestratorError, RateLimiter, Task};
use crate::util::serde::{new_task_id, TaskId, UserId};

const COMPONENT: &str = "gateway";

/// Entry point for task submission.
pub struct IngressGateway {
    identity: Arc<dyn IdentityProvider>,
    limiter: RateLimiter,
    datastore: Arc<dyn Datastore>,
    fanout: Arc<FanOut>,
    max_content_len: usize,
    audit: Option<SharedAuditSink>,
}

impl IngressGateway {
    /// Default cap on task content length, in characters.
    pub const DEFAULT_MAX_CONTENT_LEN: usize = 10_000;

    /// Create a gateway.
    #[must_use]
    pub fn new(
        identity: Arc<dyn IdentityProvider>,
        limiter: RateLimiter,
        datastore: Arc<dyn Datastore>,
        fanout: Arc<FanOut>,
    ) -> Self {
        Self {
            identity,
            limiter,
            datastore,
            fanout,
            max_content_len: Self::DEFAULT_MAX_CONTENT_LEN,
            audit: None,
        }
    }

    /// Override the content length cap.
    #[must_use]
    pub fn with_max_content_len(mut self, max_content_len: usize) -> Self {
        self.max_content_len = max_content_len;
        self
    }

    /// Attach an audit sink.
    #[must_use]
    pub fn with_audit(mut self, audit: SharedAuditSink) -> Self {
        self.audit = Some(audit);
        self
    }

    /// Resolve a bearer credential to its user.
    ///
    /// # Errors
    ///
    /// `Unauthorized` for a missing or invalid credential.
    pub fn authenticate(&self, token: &str) -> Result<UserId, OrchestratorError> {
        if token.trim().is_empty() {
            return Err(OrchestratorError::Unauthorized);
        }
        self.identity.validate(token)
    }

    fn validate_content(&self, content: &str) -> Result<(), OrchestratorError> {
        if content.trim().is_empty() {
            return Err(OrchestratorError::InvalidRequest("content is required".into()));
        }
        let len = content.chars().count();
        if len > self.max_content_len {
            return Err(OrchestratorError::InvalidRequest(format!(
                "content is {len} characters, limit is {}",
                self.max_content_len
            )));
        }
        Ok(())
    }

    /// Submit `content` on behalf of the holder of `token`.
    ///
    /// # Errors
    ///
    /// `Unauthorized`, `Throttled`, `InvalidRequest`, or `UpstreamFailure`
    /// when the datastore or the broker fails for this request.
    pub async fn submit(
        &self,
        token: &str,
        content: &str,
        now_ms: u128,
    ) -> Result<TaskId, OrchestratorError> {
        let user_id = self.authenticate(token)?;
        self.limiter.check(&user_id, now_ms).await?;
        self.validate_content(content)?;

        let task = Task {
            task_id: new_task_id(),
            user_id,
            content: content.to_string(),
            created_at: now_ms,
        };
        self.datastore.insert_task(&task).await?;
        audit::record(self.audit.as_ref(), || {
            build_audit_event(&task.task_id, COMPONENT, Some(task.user_id.clone()), "submit", None)
        });

        self.fanout
            .dispatch(&task)
            .await
            .map_err(OrchestratorError::into_request_error)?;
        audit::record(self.audit.as_ref(), || {
            build_audit_event(
                &task.task_id,
                COMPONENT,
                Some(task.user_id.clone()),
                "fan_out",
                Some(format!("queues={}", self.fanout.services().len())),
            )
        });
        tracing::info!(task_id = %task.task_id, user_id = %task.user_id, "task submitted");
        Ok(task.task_id)
    }
}
