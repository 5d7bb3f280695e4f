//! Global and per-catalog settings.

use std::time::Duration;

use mssql_pool::PoolConfig;

use crate::error::BridgeError;

/// Integration settings, global unless overridden at attach time.
#[derive(Debug, Clone)]
pub struct BridgeSettings {
    /// Pool capacity per catalog (`connection_limit`).
    pub connection_limit: usize,
    /// Whether connections are recycled at all (`connection_cache`).
    pub connection_cache: bool,
    /// TCP/TLS/login deadline in seconds (`connection_timeout`).
    pub connection_timeout: Duration,
    /// Idle eviction TTL; zero disables (`idle_timeout`).
    pub idle_timeout: Duration,
    /// Pool idle floor (`min_connections`).
    pub min_connections: usize,
    /// Acquire wait; zero fails immediately (`acquire_timeout`).
    pub acquire_timeout: Duration,
    /// Metadata cache TTL; zero means manual refresh only
    /// (`catalog_cache_ttl`).
    pub catalog_cache_ttl: Duration,
    /// Force TABLOCK on every bulk load (`copy_tablock`).
    pub copy_tablock: bool,
    /// Enable ORDER BY / TOP N pushdown (`order_pushdown`).
    pub order_pushdown: bool,
    /// Schema visibility pattern (`schema_filter`).
    pub schema_filter: Option<String>,
    /// Table visibility pattern (`table_filter`).
    pub table_filter: Option<String>,
    /// Textual tracing verbosity 0-3 (`debug_verbosity`).
    pub debug_verbosity: u8,
}

impl Default for BridgeSettings {
    fn default() -> Self {
        Self {
            connection_limit: 10,
            connection_cache: true,
            connection_timeout: Duration::from_secs(30),
            idle_timeout: Duration::ZERO,
            min_connections: 0,
            acquire_timeout: Duration::from_secs(10),
            catalog_cache_ttl: Duration::ZERO,
            copy_tablock: false,
            order_pushdown: false,
            schema_filter: None,
            table_filter: None,
            debug_verbosity: 0,
        }
    }
}

impl BridgeSettings {
    /// Validate value ranges.
    pub fn validate(&self) -> Result<(), BridgeError> {
        if self.connection_limit < 1 {
            return Err(BridgeError::Setting {
                name: "connection_limit",
                detail: "must be at least 1".to_string(),
            });
        }
        if self.min_connections > self.connection_limit {
            return Err(BridgeError::Setting {
                name: "min_connections",
                detail: format!("exceeds connection_limit {}", self.connection_limit),
            });
        }
        if self.debug_verbosity > 3 {
            return Err(BridgeError::Setting {
                name: "debug_verbosity",
                detail: "must be 0-3".to_string(),
            });
        }
        Ok(())
    }

    /// Derive the pool configuration.
    #[must_use]
    pub fn pool_config(&self) -> PoolConfig {
        PoolConfig {
            max_connections: self.connection_limit,
            min_idle: self.min_connections,
            idle_ttl: self.idle_timeout,
            acquire_timeout: self.acquire_timeout,
            recycle: self.connection_cache,
        }
    }

    /// Metadata cache TTL as an option (zero means none).
    #[must_use]
    pub fn cache_ttl(&self) -> Option<Duration> {
        (!self.catalog_cache_ttl.is_zero()).then_some(self.catalog_cache_ttl)
    }

    /// Tracing level for the verbosity knob.
    #[must_use]
    pub fn tracing_level(&self) -> tracing::Level {
        match self.debug_verbosity {
            0 => tracing::Level::WARN,
            1 => tracing::Level::INFO,
            2 => tracing::Level::DEBUG,
            _ => tracing::Level::TRACE,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_documented_values() {
        let settings = BridgeSettings::default();
        assert_eq!(settings.connection_limit, 10);
        assert!(settings.connection_cache);
        assert_eq!(settings.connection_timeout, Duration::from_secs(30));
        assert_eq!(settings.acquire_timeout, Duration::from_secs(10));
        assert!(!settings.copy_tablock);
        assert!(!settings.order_pushdown);
        assert_eq!(settings.debug_verbosity, 0);
        assert!(settings.validate().is_ok());
    }

    #[test]
    fn invalid_ranges_are_rejected() {
        let mut settings = BridgeSettings {
            connection_limit: 0,
            ..Default::default()
        };
        assert!(settings.validate().is_err());

        settings.connection_limit = 2;
        settings.min_connections = 5;
        assert!(settings.validate().is_err());

        settings.min_connections = 0;
        settings.debug_verbosity = 9;
        assert!(settings.validate().is_err());
    }

    #[test]
    fn pool_config_mirrors_settings() {
        let settings = BridgeSettings {
            connection_limit: 4,
            idle_timeout: Duration::from_secs(60),
            connection_cache: false,
            ..Default::default()
        };
        let pool = settings.pool_config();
        assert_eq!(pool.max_connections, 4);
        assert_eq!(pool.idle_ttl, Duration::from_secs(60));
        assert!(!pool.recycle);
    }
}
