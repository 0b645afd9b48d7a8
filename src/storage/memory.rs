//! In-process storage backend.

use async_trait::async_trait;
use parking_lot::{Mutex, RwLock};
use std::collections::HashMap;
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::Instant;

use super::{Storage, StorageResult};

/// How often the background sweep drops expired entries.
pub const DEFAULT_SWEEP_INTERVAL: Duration = Duration::from_secs(60);

/// Deadlines past this horizon are clamped to it.
const MAX_HORIZON: Duration = Duration::from_secs(100 * 365 * 24 * 60 * 60);

fn deadline(now: Instant, after: Duration) -> Instant {
    now.checked_add(after).unwrap_or_else(|| now + MAX_HORIZON.min(after))
}

#[derive(Debug, Clone, Copy)]
struct Counter {
    value: i64,
    expires_at: Option<Instant>,
}

impl Counter {
    fn is_expired(&self, now: Instant) -> bool {
        self.expires_at.is_some_and(|at| now >= at)
    }
}

#[derive(Debug, Default)]
struct State {
    counters: HashMap<String, Counter>,
    /// Key -> instant the block ends
    blocks: HashMap<String, Instant>,
}

impl State {
    fn purge_expired(&mut self, now: Instant) -> usize {
        let before = self.counters.len() + self.blocks.len();

        self.counters.retain(|_, counter| !counter.is_expired(now));
        self.blocks.retain(|_, until| now < *until);

        before - (self.counters.len() + self.blocks.len())
    }
}

/// Counters and blocks kept in a lock-guarded map.
///
/// Reads treat expired entries as absent, so the background sweep only
/// bounds memory. It runs while a tokio runtime is available at
/// construction and stops on [`Storage::close`] or drop.
pub struct MemoryStorage {
    state: Arc<RwLock<State>>,
    sweeper: Mutex<Option<JoinHandle<()>>>,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::with_sweep_interval(DEFAULT_SWEEP_INTERVAL)
    }

    pub fn with_sweep_interval(interval: Duration) -> Self {
        let state = Arc::new(RwLock::new(State::default()));

        let sweeper = match tokio::runtime::Handle::try_current() {
            Ok(handle) => Some(handle.spawn(sweep(Arc::downgrade(&state), interval))),
            Err(_) => {
                tracing::debug!("No tokio runtime available, expired entries are dropped lazily");
                None
            }
        };

        Self {
            state,
            sweeper: Mutex::new(sweeper),
        }
    }

    /// Drop expired counters and blocks, returning how many were removed
    pub fn purge_expired(&self) -> usize {
        self.state.write().purge_expired(Instant::now())
    }

    /// Number of counter and block entries currently held, expired or not
    pub fn len(&self) -> usize {
        let state = self.state.read();
        state.counters.len() + state.blocks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn stop_sweeper(&self) {
        if let Some(handle) = self.sweeper.lock().take() {
            handle.abort();
        }
    }
}

impl Default for MemoryStorage {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for MemoryStorage {
    fn drop(&mut self) {
        self.stop_sweeper();
    }
}

async fn sweep(state: Weak<RwLock<State>>, period: Duration) {
    let mut ticker = tokio::time::interval_at(Instant::now() + period, period);

    loop {
        ticker.tick().await;

        let Some(state) = state.upgrade() else {
            break;
        };
        let removed = state.write().purge_expired(Instant::now());
        if removed > 0 {
            tracing::debug!(removed, "Swept expired rate limit entries");
        }
    }
}

#[async_trait]
impl Storage for MemoryStorage {
    async fn get(&self, key: &str) -> StorageResult<i64> {
        let state = self.state.read();

        Ok(match state.counters.get(key) {
            Some(counter) if !counter.is_expired(Instant::now()) => counter.value,
            _ => 0,
        })
    }

    async fn set(&self, key: &str, value: i64, ttl: Duration) -> StorageResult<()> {
        let expires_at = (!ttl.is_zero()).then(|| deadline(Instant::now(), ttl));

        self.state
            .write()
            .counters
            .insert(key.to_string(), Counter { value, expires_at });

        Ok(())
    }

    async fn increment(&self, key: &str, ttl: Duration) -> StorageResult<i64> {
        let now = Instant::now();
        let mut state = self.state.write();

        let counter = state.counters.entry(key.to_string()).or_insert(Counter {
            value: 0,
            expires_at: None,
        });

        if counter.is_expired(now) {
            *counter = Counter {
                value: 0,
                expires_at: None,
            };
        }

        counter.value += 1;
        if !ttl.is_zero() {
            counter.expires_at = Some(deadline(now, ttl));
        }

        Ok(counter.value)
    }

    async fn is_blocked(&self, key: &str) -> StorageResult<bool> {
        let state = self.state.read();

        Ok(state
            .blocks
            .get(key)
            .is_some_and(|until| Instant::now() < *until))
    }

    async fn block(&self, key: &str, duration: Duration) -> StorageResult<()> {
        let until = deadline(Instant::now(), duration);
        self.state.write().blocks.insert(key.to_string(), until);
        Ok(())
    }

    async fn close(&self) -> StorageResult<()> {
        self.stop_sweeper();
        Ok(())
    }

    fn name(&self) -> &'static str {
        "memory"
    }
}
