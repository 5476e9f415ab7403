//! Storage backends: datastore, rate-limit counters and scheduled jobs.

pub mod counter;
pub mod datastore;
pub mod jobs;

pub use counter::InMemoryCounterStore;
pub use datastore::InMemoryDatastore;
pub use jobs::{FileJobStore, InMemoryJobStore};
