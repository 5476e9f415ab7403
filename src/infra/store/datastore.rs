//! In-memory datastore backend.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::RwLock;

use crate::core::{AggregatedResult, Datastore, OrchestratorError, Task};

#[derive(Default)]
struct Tables {
    tasks: HashMap<String, Task>,
    results: HashMap<String, AggregatedResult>,
    users: HashMap<String, String>,
}

/// Datastore kept in process memory. Clones share the same tables.
#[derive(Clone, Default)]
pub struct InMemoryDatastore {
    tables: Arc<RwLock<Tables>>,
    unavailable: Arc<AtomicBool>,
}

impl InMemoryDatastore {
    /// Create an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a user and their notification address.
    pub fn register_user(&self, user_id: impl Into<String>, email: impl Into<String>) {
        self.tables.write().users.insert(user_id.into(), email.into());
    }

    /// Make every call fail with `UpstreamFailure` until switched back.
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::Release);
    }

    /// Number of stored aggregated results.
    #[must_use]
    pub fn result_count(&self) -> usize {
        self.tables.read().results.len()
    }

    fn check(&self) -> Result<(), OrchestratorError> {
        if self.unavailable.load(Ordering::Acquire) {
            Err(OrchestratorError::UpstreamFailure("datastore unavailable".into()))
        } else {
            Ok(())
        }
    }
}

#[async_trait]
impl Datastore for InMemoryDatastore {
    async fn insert_task(&self, task: &Task) -> Result<(), OrchestratorError> {
        self.check()?;
        self.tables
            .write()
            .tasks
            .insert(task.task_id.clone(), task.clone());
        Ok(())
    }

    async fn get_task(&self, task_id: &str) -> Result<Option<Task>, OrchestratorError> {
        self.check()?;
        Ok(self.tables.read().tasks.get(task_id).cloned())
    }

    async fn load_result(
        &self,
        task_id: &str,
    ) -> Result<Option<AggregatedResult>, OrchestratorError> {
        self.check()?;
        Ok(self.tables.read().results.get(task_id).cloned())
    }

    async fn save_result(&self, result: &AggregatedResult) -> Result<(), OrchestratorError> {
        self.check()?;
        self.tables
            .write()
            .results
            .insert(result.task_id.clone(), result.clone());
        Ok(())
    }

    async fn user_email(&self, user_id: &str) -> Result<Option<String>, OrchestratorError> {
        self.check()?;
        Ok(self.tables.read().users.get(user_id).cloned())
    }
}
