//! Redis storage backend.
//!
//! Counters live under the identity key itself; blocks live under
//! `block:<key>` so the two never collide.

use ::redis::aio::ConnectionManager;
use ::redis::{Client, IntoConnectionInfo};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::time::Duration;

use super::{Storage, StorageResult};
use crate::config::Config;
use crate::error::StorageError;

const BLOCK_PREFIX: &str = "block:";

/// Redis rejects a PX whose deadline overflows a signed 64-bit millisecond clock.
const MAX_TTL_MILLIS: u64 = (i64::MAX / 2) as u64;

/// Budget for the initial connection and PING check.
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug, Clone)]
pub struct RedisSettings {
    pub host: String,
    pub port: u16,
    pub password: Option<String>,
    pub db: i64,
    pub connect_timeout: Duration,
}

impl RedisSettings {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
            password: None,
            db: 0,
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
        }
    }

    pub fn from_config(config: &Config) -> Self {
        Self {
            host: config.env.redis_host.clone(),
            port: config.env.redis_port,
            password: config.redis_password().map(str::to_string),
            db: config.env.redis_db,
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
        }
    }

    fn client(&self) -> StorageResult<Client> {
        let mut info = (self.host.clone(), self.port).into_connection_info()?;
        info.redis.db = self.db;
        info.redis.password = self.password.clone();

        Ok(Client::open(info)?)
    }
}

/// Storage shared through a Redis server.
pub struct RedisStorage {
    connection: Mutex<Option<ConnectionManager>>,
}

impl RedisStorage {
    /// Open a connection and verify it with PING within `connect_timeout`
    pub async fn connect(settings: &RedisSettings) -> StorageResult<Self> {
        let client = settings.client()?;

        // A single plain connection first: the manager retries with backoff,
        // which would hold an unreachable server for the whole timeout.
        let check = async {
            let mut plain = client.get_multiplexed_tokio_connection().await?;
            let _: String = ::redis::cmd("PING").query_async(&mut plain).await?;
            Ok::<_, StorageError>(ConnectionManager::new(client).await?)
        };

        let conn = tokio::time::timeout(settings.connect_timeout, check)
            .await
            .map_err(|_| StorageError::Timeout(settings.connect_timeout))??;

        Ok(Self {
            connection: Mutex::new(Some(conn)),
        })
    }

    /// Connection handles are cheap clones sharing one multiplexed connection.
    fn connection(&self) -> StorageResult<ConnectionManager> {
        self.connection.lock().clone().ok_or(StorageError::Closed)
    }
}

fn block_key(key: &str) -> String {
    format!("{}{}", BLOCK_PREFIX, key)
}

/// Redis rejects a zero PX, so round sub-millisecond durations up and clamp
/// oversized ones.
fn ttl_millis(ttl: Duration) -> u64 {
    u64::try_from(ttl.as_millis())
        .unwrap_or(u64::MAX)
        .clamp(1, MAX_TTL_MILLIS)
}

fn parse_counter(key: &str, raw: Option<String>) -> StorageResult<i64> {
    match raw {
        None => Ok(0),
        Some(value) => value.trim().parse().map_err(|_| StorageError::Malformed {
            key: key.to_string(),
            value,
        }),
    }
}

#[async_trait]
impl Storage for RedisStorage {
    async fn get(&self, key: &str) -> StorageResult<i64> {
        let mut conn = self.connection()?;

        let raw: Option<String> = ::redis::cmd("GET").arg(key).query_async(&mut conn).await?;
        parse_counter(key, raw)
    }

    async fn set(&self, key: &str, value: i64, ttl: Duration) -> StorageResult<()> {
        let mut conn = self.connection()?;

        let mut cmd = ::redis::cmd("SET");
        cmd.arg(key).arg(value);
        if !ttl.is_zero() {
            cmd.arg("PX").arg(ttl_millis(ttl));
        }

        cmd.query_async::<_, ()>(&mut conn).await?;
        Ok(())
    }

    async fn increment(&self, key: &str, ttl: Duration) -> StorageResult<i64> {
        let mut conn = self.connection()?;

        // MULTI/EXEC so no concurrent increment is lost and the TTL always
        // belongs to the latest increment.
        let mut pipe = ::redis::pipe();
        pipe.atomic().cmd("INCR").arg(key);
        if !ttl.is_zero() {
            pipe.cmd("PEXPIRE").arg(key).arg(ttl_millis(ttl)).ignore();
        }

        let (count,): (i64,) = pipe.query_async(&mut conn).await?;
        Ok(count)
    }

    async fn is_blocked(&self, key: &str) -> StorageResult<bool> {
        let mut conn = self.connection()?;

        let exists: i64 = ::redis::cmd("EXISTS")
            .arg(block_key(key))
            .query_async(&mut conn)
            .await?;
        Ok(exists > 0)
    }

    async fn block(&self, key: &str, duration: Duration) -> StorageResult<()> {
        if duration.is_zero() {
            return Ok(());
        }

        let mut conn = self.connection()?;
        ::redis::cmd("SET")
            .arg(block_key(key))
            .arg("blocked")
            .arg("PX")
            .arg(ttl_millis(duration))
            .query_async::<_, ()>(&mut conn)
            .await?;
        Ok(())
    }

    async fn close(&self) -> StorageResult<()> {
        if self.connection.lock().take().is_some() {
            tracing::debug!("Closed Redis connection");
        }
        Ok(())
    }

    fn name(&self) -> &'static str {
        "redis"
    }
}
