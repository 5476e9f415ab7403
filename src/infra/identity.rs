//! HS256 JWT identity provider.
//!
//! Tokens carry a `user_id` claim and an `exp` expiry (Unix seconds). A
//! leading `Bearer ` scheme is accepted and stripped.

use jsonwebtoken::{decode, DecodingKey, Validation};
use serde::{Deserialize, Serialize};

use crate::core::{IdentityProvider, OrchestratorError};
use crate::util::serde::UserId;

/// Claims carried by a bearer token.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Claims {
    /// Authenticated user.
    pub user_id: String,
    /// Expiration time (Unix timestamp, seconds).
    pub exp: u64,
}

/// Validates HS256-signed bearer tokens against a shared secret.
#[derive(Clone)]
pub struct JwtIdentityProvider {
    key: DecodingKey,
}

impl JwtIdentityProvider {
    /// Create a provider for `secret`.
    ///
    /// # Errors
    ///
    /// `InvalidRequest` if the secret is empty.
    pub fn new(secret: &str) -> Result<Self, OrchestratorError> {
        if secret.is_empty() {
            return Err(OrchestratorError::InvalidRequest(
                "jwt secret must not be empty".into(),
            ));
        }
        Ok(Self {
            key: DecodingKey::from_secret(secret.as_bytes()),
        })
    }
}

impl IdentityProvider for JwtIdentityProvider {
    fn validate(&self, token: &str) -> Result<UserId, OrchestratorError> {
        let token = token.trim();
        let token = token.strip_prefix("Bearer ").unwrap_or(token).trim();
        if token.is_empty() {
            return Err(OrchestratorError::Unauthorized);
        }
        match decode::<Claims>(token, &self.key, &Validation::default()) {
            Ok(data) if !data.claims.user_id.is_empty() => Ok(data.claims.user_id),
            Ok(_) => {
                tracing::warn!("token without user_id rejected");
                Err(OrchestratorError::Unauthorized)
            }
            Err(err) => {
                use jsonwebtoken::errors::ErrorKind;
                let reason = match err.kind() {
                    ErrorKind::ExpiredSignature => "token expired",
                    ErrorKind::InvalidSignature => "invalid signature",
                    ErrorKind::InvalidToken => "invalid token",
                    _ => "token validation failed",
                };
                tracing::warn!(reason, "credential rejected");
                Err(OrchestratorError::Unauthorized)
            }
        }
    }
}
