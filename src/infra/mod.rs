//! Infrastructure adapters behind the core traits.

pub mod broker;
pub mod identity;
pub mod notifier;
pub mod store;

pub use broker::InMemoryBroker;
pub use identity::{Claims, JwtIdentityProvider};
pub use notifier::{InMemoryNotifier, SentNotification};
pub use store::{FileJobStore, InMemoryCounterStore, InMemoryDatastore, InMemoryJobStore};
