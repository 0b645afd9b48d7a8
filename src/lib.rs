pub mod config;
pub mod error;
pub mod handlers;
pub mod health;
pub mod key_generator;
pub mod middleware;
pub mod rate_limit_config;
pub mod rate_limiter;
pub mod server;
pub mod storage;

pub use config::Config;
pub use error::{Error, Result};
pub use rate_limit_config::{LimitInfo, LimitPolicy, LimiterConfig};
pub use rate_limiter::RateLimiter;
pub use server::create_app;
pub use storage::{MemoryStorage, RedisStorage, Storage};
