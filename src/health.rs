use serde::{Deserialize, Serialize};
use std::time::{Instant, SystemTime};

#[derive(Debug, Serialize, Deserialize)]
pub struct HealthStatus {
    pub status: String,
    pub timestamp: u64,
    pub version: String,
    pub uptime_seconds: u64,
    pub storage: String,
}

/// Reports liveness along with the active storage backend
#[derive(Debug, Clone)]
pub struct HealthChecker {
    started: Instant,
    storage: &'static str,
}

impl HealthChecker {
    pub fn new(storage: &'static str) -> Self {
        Self {
            started: Instant::now(),
            storage,
        }
    }

    pub fn check_health(&self) -> HealthStatus {
        HealthStatus {
            status: "healthy".to_string(),
            timestamp: SystemTime::now()
                .duration_since(SystemTime::UNIX_EPOCH)
                .unwrap_or_default()
                .as_secs(),
            version: env!("CARGO_PKG_VERSION").to_string(),
            uptime_seconds: self.started.elapsed().as_secs(),
            storage: self.storage.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_health_status_serialization() {
        let status = HealthChecker::new("memory").check_health();

        let json = serde_json::to_value(&status).unwrap();
        assert_eq!(json["status"], "healthy");
        assert_eq!(json["storage"], "memory");
        assert_eq!(json["version"], env!("CARGO_PKG_VERSION"));
    }
}
