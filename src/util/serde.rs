//! Identifier aliases shared across the wire format.

/// Opaque task identifier (UUID v4 text).
pub type TaskId = String;

/// Opaque user identifier issued by the identity provider.
pub type UserId = String;

/// Generate a fresh task identifier.
#[must_use]
pub fn new_task_id() -> TaskId {
    uuid::Uuid::new_v4().to_string()
}
