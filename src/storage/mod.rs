//! Counter and block storage used by the rate limiter.
//!
//! Callers depend only on the [`Storage`] trait. The backend is chosen once
//! at startup by [`connect`].

use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;

use crate::config::{Config, StorageBackend};
use crate::error::{Error, StorageError};

pub mod memory;
pub mod redis;

pub use memory::MemoryStorage;
pub use self::redis::{RedisSettings, RedisStorage};

pub type StorageResult<T> = Result<T, StorageError>;

/// Key/value counters with per-key expiry, plus a separate per-key block flag.
#[async_trait]
pub trait Storage: Send + Sync {
    /// Current counter value. Missing or expired keys read as 0.
    async fn get(&self, key: &str) -> StorageResult<i64>;

    /// Overwrite a counter. A zero `ttl` means the value never expires.
    async fn set(&self, key: &str, value: i64, ttl: Duration) -> StorageResult<()>;

    /// Atomically add 1 and (re)apply `ttl`, returning the new value.
    ///
    /// An expired counter restarts from 0 before the increment.
    async fn increment(&self, key: &str, ttl: Duration) -> StorageResult<i64>;

    /// True while a block recorded for `key` has not yet expired.
    async fn is_blocked(&self, key: &str) -> StorageResult<bool>;

    /// Block `key` until now + `duration`, replacing any earlier block.
    async fn block(&self, key: &str, duration: Duration) -> StorageResult<()>;

    /// Release backend resources. Safe to call more than once.
    async fn close(&self) -> StorageResult<()>;

    /// Short backend name for logs and health output.
    fn name(&self) -> &'static str;
}

/// Build the storage selected by `backend`.
///
/// `Auto` prefers Redis and falls back to in-process storage when the
/// connection check fails.
pub async fn connect(config: &Config, backend: StorageBackend) -> Result<Arc<dyn Storage>, Error> {
    match backend {
        StorageBackend::Memory => {
            tracing::info!("Using in-memory storage");
            Ok(Arc::new(MemoryStorage::new()))
        }
        StorageBackend::Redis => {
            let storage = RedisStorage::connect(&RedisSettings::from_config(config))
                .await
                .map_err(Error::storage("connect to redis"))?;
            tracing::info!(addr = %config.redis_addr(), "Connected to Redis");
            Ok(Arc::new(storage))
        }
        StorageBackend::Auto => {
            match RedisStorage::connect(&RedisSettings::from_config(config)).await {
                Ok(storage) => {
                    tracing::info!(addr = %config.redis_addr(), "Connected to Redis");
                    Ok(Arc::new(storage))
                }
                Err(e) => {
                    tracing::warn!(
                        addr = %config.redis_addr(),
                        error = %e,
                        "Failed to connect to Redis, using in-memory storage"
                    );
                    Ok(Arc::new(MemoryStorage::new()))
                }
            }
        }
    }
}
