//! Identity validation seam.

use crate::core::OrchestratorError;
use crate::util::serde::UserId;

/// Validates an opaque bearer credential.
pub trait IdentityProvider: Send + Sync + 'static {
    /// Resolve `token` to the user it was issued for.
    ///
    /// # Errors
    ///
    /// [`OrchestratorError::Unauthorized`] for missing, malformed or expired
    /// credentials.
    fn validate(&self, token: &str) -> Result<UserId, OrchestratorError>;
}
