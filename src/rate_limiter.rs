use std::sync::Arc;
use std::time::Duration;

use crate::error::{Error, Result};
use crate::rate_limit_config::LimitInfo;
use crate::storage::Storage;

/// Counting window. Fixed regardless of policy.
pub const WINDOW: Duration = Duration::from_secs(1);

/// Fixed-window limiter that blocks a key once it exceeds its limit.
///
/// Holds no state of its own; everything lives in the storage backend.
#[derive(Clone)]
pub struct RateLimiter {
    storage: Arc<dyn Storage>,
}

impl RateLimiter {
    pub fn new(storage: Arc<dyn Storage>) -> Self {
        Self { storage }
    }

    /// Decide whether the request identified by `info` may proceed.
    ///
    /// A blocked key is denied without touching its counter. Otherwise the
    /// counter is incremented and, if it now exceeds the limit, the key is
    /// blocked for the policy's block duration.
    pub async fn allow(&self, info: &LimitInfo) -> Result<bool> {
        let blocked = self
            .storage
            .is_blocked(&info.key)
            .await
            .map_err(Error::storage("check if key is blocked"))?;

        if blocked {
            tracing::debug!(key = %info.key, "Key is blocked");
            return Ok(false);
        }

        let count = self
            .storage
            .increment(&info.key, WINDOW)
            .await
            .map_err(Error::storage("increment counter"))?;

        if count > i64::from(info.policy.rate_limit) {
            self.storage
                .block(&info.key, info.policy.block_duration)
                .await
                .map_err(Error::storage("block key"))?;

            tracing::info!(
                key = %info.key,
                count,
                limit = info.policy.rate_limit,
                block_secs = info.policy.block_duration.as_secs(),
                "Rate limit exceeded, blocking key"
            );
            return Ok(false);
        }

        Ok(true)
    }

    pub fn storage_name(&self) -> &'static str {
        self.storage.name()
    }

    /// Close the underlying storage
    pub async fn close(&self) -> Result<()> {
        self.storage.close().await.map_err(Error::storage("close storage"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::StorageError;
    use crate::rate_limit_config::LimitPolicy;
    use crate::storage::{MemoryStorage, StorageResult};
    use async_trait::async_trait;

    fn limiter() -> (RateLimiter, Arc<MemoryStorage>) {
        let storage = Arc::new(MemoryStorage::new());
        (RateLimiter::new(storage.clone()), storage)
    }

    #[tokio::test]
    async fn test_limiter_logic() {
        let (limiter, _) = limiter();
        let info = LimitInfo::new("ip:192.168.1.1", LimitPolicy::from_secs(2, 5));

        assert!(limiter.allow(&info).await.unwrap());
        assert!(limiter.allow(&info).await.unwrap());
        assert!(!limiter.allow(&info).await.unwrap());
        assert!(!limiter.allow(&info).await.unwrap());
    }

    #[tokio::test]
    async fn test_exactly_limit_requests_allowed() {
        let (limiter, _) = limiter();
        let info = LimitInfo::new("token:test-token", LimitPolicy::from_secs(3, 5));

        for _ in 0..3 {
            assert!(limiter.allow(&info).await.unwrap());
        }
        assert!(!limiter.allow(&info).await.unwrap());
    }

    #[tokio::test]
    async fn test_blocked_key_does_not_consume_counter() {
        let (limiter, storage) = limiter();
        let info = LimitInfo::new("k", LimitPolicy::from_secs(1, 5));

        assert!(limiter.allow(&info).await.unwrap());
        assert!(!limiter.allow(&info).await.unwrap());
        assert_eq!(storage.get("k").await.unwrap(), 2);

        for _ in 0..5 {
            assert!(!limiter.allow(&info).await.unwrap());
        }
        assert_eq!(storage.get("k").await.unwrap(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_block_lifts_after_duration() {
        let (limiter, _) = limiter();
        let info = LimitInfo::new("k", LimitPolicy::from_secs(1, 5));

        assert!(limiter.allow(&info).await.unwrap());
        assert!(!limiter.allow(&info).await.unwrap());

        tokio::time::advance(Duration::from_secs(4)).await;
        assert!(!limiter.allow(&info).await.unwrap());

        tokio::time::advance(Duration::from_secs(1)).await;
        assert!(limiter.allow(&info).await.unwrap());
    }

    #[tokio::test(start_paused = true)]
    async fn test_window_resets_without_block() {
        let (limiter, _) = limiter();
        let info = LimitInfo::new("k", LimitPolicy::from_secs(2, 60));

        assert!(limiter.allow(&info).await.unwrap());
        assert!(limiter.allow(&info).await.unwrap());

        tokio::time::advance(Duration::from_millis(1100)).await;

        assert!(limiter.allow(&info).await.unwrap());
        assert!(limiter.allow(&info).await.unwrap());
    }

    #[tokio::test]
    async fn test_zero_block_duration_denies_only_the_excess_request() {
        let (limiter, _) = limiter();
        let info = LimitInfo::new("k", LimitPolicy::from_secs(1, 0));

        assert!(limiter.allow(&info).await.unwrap());
        assert!(!limiter.allow(&info).await.unwrap());
        // Not blocked, but still over the limit within the same window.
        assert!(!limiter.allow(&info).await.unwrap());
    }

    #[tokio::test]
    async fn test_huge_block_duration_keeps_key_blocked() {
        let (limiter, storage) = limiter();
        let info = LimitInfo::new("ip:10.9.9.9", LimitPolicy::from_secs(1, u64::MAX));

        assert!(limiter.allow(&info).await.unwrap());
        assert!(!limiter.allow(&info).await.unwrap());
        assert!(!limiter.allow(&info).await.unwrap());
        assert!(storage.is_blocked("ip:10.9.9.9").await.unwrap());
    }

    #[tokio::test]
    async fn test_keys_are_independent() {
        let (limiter, _) = limiter();
        let policy = LimitPolicy::from_secs(1, 5);
        let ip = LimitInfo::new("ip:192.168.1.2", policy);
        let token = LimitInfo::new("token:abc", policy);

        assert!(limiter.allow(&ip).await.unwrap());
        assert!(!limiter.allow(&ip).await.unwrap());
        assert!(limiter.allow(&token).await.unwrap());
    }

    struct FailingStorage {
        fail_on: &'static str,
    }

    impl FailingStorage {
        fn check(&self, op: &'static str) -> StorageResult<()> {
            if self.fail_on == op {
                Err(StorageError::Closed)
            } else {
                Ok(())
            }
        }
    }

    #[async_trait]
    impl Storage for FailingStorage {
        async fn get(&self, _key: &str) -> StorageResult<i64> {
            self.check("get").map(|_| 0)
        }

        async fn set(&self, _key: &str, _value: i64, _ttl: Duration) -> StorageResult<()> {
            self.check("set")
        }

        async fn increment(&self, _key: &str, _ttl: Duration) -> StorageResult<i64> {
            self.check("increment").map(|_| 10)
        }

        async fn is_blocked(&self, _key: &str) -> StorageResult<bool> {
            self.check("is_blocked").map(|_| false)
        }

        async fn block(&self, _key: &str, _duration: Duration) -> StorageResult<()> {
            self.check("block")
        }

        async fn close(&self) -> StorageResult<()> {
            Ok(())
        }

        fn name(&self) -> &'static str {
            "failing"
        }
    }

    #[tokio::test]
    async fn test_storage_errors_propagate_with_context() {
        let info = LimitInfo::new("k", LimitPolicy::from_secs(1, 5));

        for (fail_on, op) in [
            ("is_blocked", "check if key is blocked"),
            ("increment", "increment counter"),
            ("block", "block key"),
        ] {
            let limiter = RateLimiter::new(Arc::new(FailingStorage { fail_on }));
            match limiter.allow(&info).await {
                Err(Error::Storage { op: got, .. }) => assert_eq!(got, op),
                other => panic!("expected storage error for {}, got {:?}", fail_on, other),
            }
        }
    }
}
