//! In-memory rate-limit counter store.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;

use crate::core::{CounterStore, OrchestratorError, WindowDecision};

#[derive(Debug, Clone, Copy)]
struct Window {
    count: u32,
    expires_at_ms: u128,
}

#[derive(Default)]
struct CounterState {
    windows: HashMap<String, Window>,
    hits_since_prune: u64,
}

/// Counter store backed by a mutex-guarded map; the mutex makes each
/// check-and-increment atomic. Clones share state.
///
/// Expired windows are swept every `prune_every` hits, so the map only
/// holds keys seen within roughly one window.
#[derive(Clone)]
pub struct InMemoryCounterStore {
    state: Arc<Mutex<CounterState>>,
    unavailable: Arc<AtomicBool>,
    prune_every: u64,
}

impl Default for InMemoryCounterStore {
    fn default() -> Self {
        Self {
            state: Arc::default(),
            unavailable: Arc::default(),
            prune_every: Self::DEFAULT_PRUNE_EVERY,
        }
    }
}

impl InMemoryCounterStore {
    /// Hits between sweeps of expired windows.
    pub const DEFAULT_PRUNE_EVERY: u64 = 1024;

    /// Create an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sweep expired windows every `hits` calls to `hit`.
    #[must_use]
    pub fn with_prune_every(mut self, hits: u64) -> Self {
        self.prune_every = hits.max(1);
        self
    }

    /// Keys currently holding a window.
    #[must_use]
    pub fn tracked_keys(&self) -> usize {
        self.state.lock().windows.len()
    }

    /// Make every call fail until switched back.
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::Release);
    }

    /// Drop windows that expired before `now_ms`; returns how many.
    pub fn prune_expired(&self, now_ms: u128) -> usize {
        Self::prune_locked(&mut self.state.lock(), now_ms)
    }

    fn prune_locked(state: &mut CounterState, now_ms: u128) -> usize {
        state.hits_since_prune = 0;
        let before = state.windows.len();
        state.windows.retain(|_, w| w.expires_at_ms > now_ms);
        before - state.windows.len()
    }
}

#[async_trait]
impl CounterStore for InMemoryCounterStore {
    async fn hit(
        &self,
        key: &str,
        limit: u32,
        window_ms: u128,
        now_ms: u128,
    ) -> Result<WindowDecision, OrchestratorError> {
        if self.unavailable.load(Ordering::Acquire) {
            return Err(OrchestratorError::UpstreamFailure(
                "counter store unavailable".into(),
            ));
        }
        let mut state = self.state.lock();
        state.hits_since_prune += 1;
        if state.hits_since_prune >= self.prune_every {
            let pruned = Self::prune_locked(&mut state, now_ms);
            if pruned > 0 {
                tracing::debug!(pruned, "expired rate-limit windows dropped");
            }
        }
        let window = state
            .windows
            .entry(key.to_string())
            .and_modify(|w| {
                if w.expires_at_ms <= now_ms {
                    *w = Window {
                        count: 0,
                        expires_at_ms: now_ms + window_ms,
                    };
                }
            })
            .or_insert(Window {
                count: 0,
                expires_at_ms: now_ms + window_ms,
            });
        let allowed = window.count < limit;
        if allowed {
            window.count += 1;
        }
        Ok(WindowDecision {
            allowed,
            count: window.count,
            resets_at_ms: window.expires_at_ms,
        })
    }
}
