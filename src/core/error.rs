//! Error types for orchestration operations.

use thiserror::Error;

/// Errors produced by the gateway, workers, aggregator and scheduler.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum OrchestratorError {
    /// Missing, malformed or expired credential.
    #[error("unauthorized")]
    Unauthorized,
    /// Per-user rate limit exceeded.
    #[error("rate limit exceeded")]
    Throttled,
    /// Malformed input.
    #[error("invalid request: {0}")]
    InvalidRequest(String),
    /// Unknown task, job or user.
    #[error("not found: {0}")]
    NotFound(String),
    /// A capability processor, datastore or notifier call failed.
    #[error("upstream failure: {0}")]
    UpstreamFailure(String),
    /// The message broker cannot be reached or has been closed.
    #[error("broker unavailable: {0}")]
    BrokerUnavailable(String),
}

impl OrchestratorError {
    /// Status signal surfaced to API callers.
    #[must_use]
    pub const fn status_code(&self) -> u16 {
        match self {
            Self::Unauthorized => 401,
            Self::Throttled => 429,
            Self::InvalidRequest(_) => 400,
            Self::NotFound(_) => 404,
            Self::UpstreamFailure(_) => 502,
            Self::BrokerUnavailable(_) => 503,
        }
    }

    /// Whether a consumer should leave the message unacknowledged for redelivery.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        matches!(self, Self::UpstreamFailure(_) | Self::BrokerUnavailable(_))
    }

    /// Collapse broker failures into an upstream failure for the synchronous
    /// request path.
    #[must_use]
    pub fn into_request_error(self) -> Self {
        match self {
            Self::BrokerUnavailable(msg) => Self::UpstreamFailure(format!("broker: {msg}")),
            other => other,
        }
    }
}

/// Application-facing result using anyhow for higher-level contexts.
pub type AppResult<T> = Result<T, anyhow::Error>;
