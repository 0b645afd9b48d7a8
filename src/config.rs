use envconfig::Envconfig;
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;
use validator::Validate;

use crate::error::Result;
use crate::rate_limit_config::{LimitPolicy, LimiterConfig};

/// Prefix for per-token override variables (`TOKEN_<name>=<limit>:<block secs>`).
const TOKEN_OVERRIDE_PREFIX: &str = "TOKEN_";

/// Upper bound for any block time, in seconds (ten years).
pub const MAX_BLOCK_TIME_SECS: u64 = 315_360_000;

/// Global token settings share the override prefix and must not be read as overrides.
const RESERVED_TOKEN_VARS: [&str; 2] = ["TOKEN_RATE_LIMIT", "TOKEN_BLOCK_TIME"];

/// Which storage backend to run against.
#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum StorageBackend {
    /// Try Redis, fall back to in-process storage when unreachable
    Auto,
    /// Redis only; startup fails when it cannot be reached
    Redis,
    /// In-process storage only
    Memory,
}

impl FromStr for StorageBackend {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "auto" => Ok(StorageBackend::Auto),
            "redis" => Ok(StorageBackend::Redis),
            "memory" => Ok(StorageBackend::Memory),
            other => Err(format!("unknown storage backend '{}'", other)),
        }
    }
}

impl fmt::Display for StorageBackend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StorageBackend::Auto => write!(f, "auto"),
            StorageBackend::Redis => write!(f, "redis"),
            StorageBackend::Memory => write!(f, "memory"),
        }
    }
}

/// Settings read directly from environment variables.
#[derive(Debug, Envconfig, Validate, Clone)]
pub struct EnvConfig {
    /// HTTP listen port
    #[envconfig(from = "SERVER_PORT", default = "8080")]
    pub server_port: u16,

    #[envconfig(from = "REDIS_HOST", default = "localhost")]
    pub redis_host: String,

    #[envconfig(from = "REDIS_PORT", default = "6379")]
    pub redis_port: u16,

    /// Empty means no AUTH
    #[envconfig(from = "REDIS_PASSWORD", default = "")]
    pub redis_password: String,

    #[envconfig(from = "REDIS_DB", default = "0")]
    pub redis_db: i64,

    /// Requests per second allowed for an IP-derived identity
    #[envconfig(from = "IP_RATE_LIMIT", default = "10")]
    #[validate(range(min = 1))]
    pub ip_rate_limit: u32,

    /// Seconds an IP-derived identity stays blocked
    #[envconfig(from = "IP_BLOCK_TIME", default = "300")]
    #[validate(range(max = 315_360_000))]
    pub ip_block_time_secs: u64,

    /// Requests per second allowed for a token-derived identity
    #[envconfig(from = "TOKEN_RATE_LIMIT", default = "100")]
    #[validate(range(min = 1))]
    pub token_rate_limit: u32,

    /// Seconds a token-derived identity stays blocked
    #[envconfig(from = "TOKEN_BLOCK_TIME", default = "300")]
    #[validate(range(max = 315_360_000))]
    pub token_block_time_secs: u64,

    #[envconfig(from = "STORAGE_BACKEND", default = "auto")]
    pub storage_backend: StorageBackend,

    /// Honor X-Forwarded-For / X-Real-IP when resolving the client address
    #[envconfig(from = "TRUST_PROXY_HEADERS", default = "true")]
    pub trust_proxy_headers: bool,

    #[envconfig(from = "LOG_LEVEL", default = "info")]
    pub log_level: String,
}

/// Full service configuration: typed settings plus per-token overrides.
#[derive(Debug, Clone)]
pub struct Config {
    pub env: EnvConfig,
    pub token_overrides: HashMap<String, LimitPolicy>,
}

impl Config {
    /// Load configuration from the process environment
    pub fn from_env() -> Result<Self> {
        Self::from_vars(std::env::vars())
    }

    /// Load configuration from an explicit set of variables
    pub fn from_vars<I>(vars: I) -> Result<Self>
    where
        I: IntoIterator<Item = (String, String)>,
    {
        let vars: HashMap<String, String> = vars.into_iter().collect();

        let env = EnvConfig::init_from_hashmap(&vars)?;
        env.validate()?;

        Ok(Config {
            env,
            token_overrides: parse_token_overrides(&vars),
        })
    }

    /// Redis `host:port` address
    pub fn redis_addr(&self) -> String {
        format!("{}:{}", self.env.redis_host, self.env.redis_port)
    }

    pub fn redis_password(&self) -> Option<&str> {
        if self.env.redis_password.is_empty() {
            None
        } else {
            Some(&self.env.redis_password)
        }
    }

    /// Policies consumed by the admission middleware
    pub fn limiter_config(&self) -> LimiterConfig {
        LimiterConfig {
            ip: LimitPolicy::from_secs(self.env.ip_rate_limit, self.env.ip_block_time_secs),
            token: LimitPolicy::from_secs(self.env.token_rate_limit, self.env.token_block_time_secs),
            token_overrides: self.token_overrides.clone(),
        }
    }
}

/// Collect `TOKEN_<name>=<limit>:<block secs>` overrides. Malformed entries are skipped.
pub fn parse_token_overrides<'a, I>(vars: I) -> HashMap<String, LimitPolicy>
where
    I: IntoIterator<Item = (&'a String, &'a String)>,
{
    let mut overrides = HashMap::new();

    for (name, value) in vars {
        let Some(token) = name.strip_prefix(TOKEN_OVERRIDE_PREFIX) else {
            continue;
        };
        if token.is_empty() || RESERVED_TOKEN_VARS.contains(&name.as_str()) {
            continue;
        }

        match parse_override_value(value) {
            Some(policy) => {
                overrides.insert(token.to_string(), policy);
            }
            None => {
                tracing::debug!(variable = %name, "Skipping malformed token override");
            }
        }
    }

    overrides
}

fn parse_override_value(value: &str) -> Option<LimitPolicy> {
    let mut parts = value.split(':');
    let rate_limit: u32 = parts.next()?.trim().parse().ok()?;
    let block_secs: u64 = parts.next()?.trim().parse().ok()?;

    if rate_limit == 0 || block_secs > MAX_BLOCK_TIME_SECS {
        return None;
    }

    Some(LimitPolicy::from_secs(rate_limit, block_secs))
}
