use std::collections::HashMap;
use std::time::Duration;

/// Maximum requests per one-second window, and how long a key stays
/// blocked once that maximum is exceeded.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LimitPolicy {
    pub rate_limit: u32,
    pub block_duration: Duration,
}

impl LimitPolicy {
    pub fn new(rate_limit: u32, block_duration: Duration) -> Self {
        Self {
            rate_limit,
            block_duration,
        }
    }

    /// Build a policy from a limit and a block time expressed in seconds.
    pub fn from_secs(rate_limit: u32, block_secs: u64) -> Self {
        Self::new(rate_limit, Duration::from_secs(block_secs))
    }
}

/// An identity key paired with the policy that governs it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LimitInfo {
    pub key: String,
    pub policy: LimitPolicy,
}

impl LimitInfo {
    pub fn new(key: impl Into<String>, policy: LimitPolicy) -> Self {
        Self {
            key: key.into(),
            policy,
        }
    }
}

/// Policies looked up per request. Built once at startup.
#[derive(Debug, Clone)]
pub struct LimiterConfig {
    pub ip: LimitPolicy,
    pub token: LimitPolicy,
    pub token_overrides: HashMap<String, LimitPolicy>,
}

impl LimiterConfig {
    pub fn new(ip: LimitPolicy, token: LimitPolicy) -> Self {
        Self {
            ip,
            token,
            token_overrides: HashMap::new(),
        }
    }

    /// Add or replace the override for a specific token.
    pub fn with_token_override(mut self, token: impl Into<String>, policy: LimitPolicy) -> Self {
        self.token_overrides.insert(token.into(), policy);
        self
    }

    /// Get the policy for a token, falling back to the global token policy
    pub fn policy_for_token(&self, token: &str) -> LimitPolicy {
        self.token_overrides.get(token).copied().unwrap_or(self.token)
    }
}

impl Default for LimiterConfig {
    fn default() -> Self {
        Self::new(LimitPolicy::from_secs(10, 300), LimitPolicy::from_secs(100, 300))
    }
}
