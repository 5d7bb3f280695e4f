//! Pool configuration.

use std::time::Duration;

/// Configuration for one catalog's connection pool.
#[derive(Debug, Clone)]
pub struct PoolConfig {
    /// Maximum connections (idle + in use).
    pub max_connections: usize,
    /// Idle floor maintained by eviction.
    pub min_idle: usize,
    /// Idle connections older than this are evicted; zero disables.
    pub idle_ttl: Duration,
    /// How long `acquire` waits at capacity; zero fails immediately.
    pub acquire_timeout: Duration,
    /// When false the pool recycles nothing: every release destroys.
    pub recycle: bool,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            max_connections: 10,
            min_idle: 0,
            idle_ttl: Duration::ZERO,
            acquire_timeout: Duration::from_secs(10),
            recycle: true,
        }
    }
}

impl PoolConfig {
    /// Validate the configuration.
    pub fn validate(&self) -> Result<(), String> {
        if self.max_connections == 0 {
            return Err("max_connections must be at least 1".to_string());
        }
        if self.min_idle > self.max_connections {
            return Err(format!(
                "min_idle {} exceeds max_connections {}",
                self.min_idle, self.max_connections
            ));
        }
        Ok(())
    }
}
