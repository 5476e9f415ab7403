//! Datastore abstraction for tasks, aggregated results and user lookups.

use async_trait::async_trait;

use crate::core::{AggregatedResult, OrchestratorError, Task};

/// Query/mutation interface of the persistent store.
///
/// Implementations report transport failures as
/// [`OrchestratorError::UpstreamFailure`]; absent rows are `Ok(None)`.
#[async_trait]
pub trait Datastore: Send + Sync + 'static {
    /// Insert a newly submitted task.
    async fn insert_task(&self, task: &Task) -> Result<(), OrchestratorError>;

    /// Fetch a task by id.
    async fn get_task(&self, task_id: &str) -> Result<Option<Task>, OrchestratorError>;

    /// Fetch the aggregated result for a task.
    async fn load_result(&self, task_id: &str)
        -> Result<Option<AggregatedResult>, OrchestratorError>;

    /// Upsert the aggregated result for a task.
    async fn save_result(&self, result: &AggregatedResult) -> Result<(), OrchestratorError>;

    /// Resolve a user's notification address.
    async fn user_email(&self, user_id: &str) -> Result<Option<String>, OrchestratorError>;
}
