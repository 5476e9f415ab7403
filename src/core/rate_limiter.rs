//! Per-user admission control in front of task submission.
//!
//! Fixed window per user: the first request opens a window of `per` and
//! sets the counter to 1; each allowed request increments it; once the
//! counter has reached `limit` further requests are refused until the window
//! expires. The counter store performs the check and the increment as one
//! atomic step so concurrent gateways cannot both slip under the limit.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::core::OrchestratorError;

/// Outcome of one atomic check-and-increment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WindowDecision {
    /// Whether the request is admitted.
    pub allowed: bool,
    /// Counter value after this call.
    pub count: u32,
    /// When the current window expires, ms since epoch.
    pub resets_at_ms: u128,
}

/// Shared counter storage.
#[async_trait]
pub trait CounterStore: Send + Sync + 'static {
    /// Atomically admit-and-count a request against `key`.
    ///
    /// Opens a new window of `window_ms` when none is live at `now_ms`.
    async fn hit(
        &self,
        key: &str,
        limit: u32,
        window_ms: u128,
        now_ms: u128,
    ) -> Result<WindowDecision, OrchestratorError>;
}

/// Behaviour when the counter store cannot be reached.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StoreFailurePolicy {
    /// Refuse the request.
    #[default]
    FailClosed,
    /// Admit the request unmetered.
    FailOpen,
}

/// Rate limiter keyed by user id.
#[derive(Clone)]
pub struct RateLimiter {
    store: Arc<dyn CounterStore>,
    limit: u32,
    per: Duration,
    on_store_failure: StoreFailurePolicy,
}

impl RateLimiter {
    /// Default requests per window.
    pub const DEFAULT_LIMIT: u32 = 100;
    /// Default window length.
    pub const DEFAULT_PER: Duration = Duration::from_secs(60);

    /// Create a limiter admitting `limit` requests per `per` window.
    #[must_use]
    pub fn new(store: Arc<dyn CounterStore>, limit: u32, per: Duration) -> Self {
        Self {
            store,
            limit,
            per,
            on_store_failure: StoreFailurePolicy::default(),
        }
    }

    /// Set the counter-store failure policy.
    #[must_use]
    pub const fn with_failure_policy(mut self, policy: StoreFailurePolicy) -> Self {
        self.on_store_failure = policy;
        self
    }

    /// Requests admitted per window.
    #[must_use]
    pub const fn limit(&self) -> u32 {
        self.limit
    }

    /// Window length.
    #[must_use]
    pub const fn per(&self) -> Duration {
        self.per
    }

    fn key(user_id: &str) -> String {
        format!("rate_limit:{user_id}")
    }

    /// Admit or refuse one request, surfacing store failures per policy.
    ///
    /// Returns `Throttled` when over the limit, and `UpstreamFailure` when the
    /// store is down under [`StoreFailurePolicy::FailClosed`].
    pub async fn check(&self, user_id: &str, now_ms: u128) -> Result<(), OrchestratorError> {
        let key = Self::key(user_id);
        match self
            .store
            .hit(&key, self.limit, self.per.as_millis(), now_ms)
            .await
        {
            Ok(decision) if decision.allowed => {
                tracing::debug!(user_id, count = decision.count, "request admitted");
                Ok(())
            }
            Ok(decision) => {
                tracing::warn!(
                    user_id,
                    limit = self.limit,
                    resets_at_ms = %decision.resets_at_ms,
                    "rate limit exceeded"
                );
                Err(OrchestratorError::Throttled)
            }
            Err(e) => match self.on_store_failure {
                StoreFailurePolicy::FailOpen => {
                    tracing::warn!(user_id, error = %e, "counter store unavailable, failing open");
                    Ok(())
                }
                StoreFailurePolicy::FailClosed => {
                    tracing::error!(user_id, error = %e, "counter store unavailable, failing closed");
                    Err(OrchestratorError::UpstreamFailure(format!("rate limiter: {e}")))
                }
            },
        }
    }

    /// `true` if the request is admitted.
    pub async fn allow(&self, user_id: &str, now_ms: u128) -> bool {
        self.check(user_id, now_ms).await.is_ok()
    }
}
