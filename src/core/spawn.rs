//! Executor seam for the long-lived consumer loops.

use std::future::Future;

/// Spawns detached futures onto some runtime.
pub trait Spawn {
    /// Spawn an async task that returns a future.
    fn spawn<F>(&self, fut: F)
    where
        F: Future<Output = ()> + Send + 'static;
}
