//! PostgreSQL pool sizing and health.
//!
//! A recurrence scan keeps one connection checked out for its whole
//! transaction, so the pool needs headroom beyond the scheduler for repository
//! calls made at the same time.

use std::time::{Duration, Instant};

use sqlx::postgres::{PgPool, PgPoolOptions};
use tracing::{debug, info, warn};

use stratum_core::{Error, Result};

const DEFAULT_MAX_CONNECTIONS: u32 = 10;
const DEFAULT_MIN_CONNECTIONS: u32 = 1;
const DEFAULT_ACQUIRE_TIMEOUT_SECS: u64 = 30;
const DEFAULT_IDLE_TIMEOUT_SECS: u64 = 600;
const DEFAULT_MAX_LIFETIME_SECS: u64 = 1800;

/// Connection pool settings.
#[derive(Debug, Clone, PartialEq)]
pub struct PoolConfig {
    pub max_connections: u32,
    pub min_connections: u32,
    /// How long a caller waits for a free connection.
    pub acquire_timeout: Duration,
    pub idle_timeout: Duration,
    /// `None` keeps connections open indefinitely.
    pub max_lifetime: Option<Duration>,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            max_connections: DEFAULT_MAX_CONNECTIONS,
            min_connections: DEFAULT_MIN_CONNECTIONS,
            acquire_timeout: Duration::from_secs(DEFAULT_ACQUIRE_TIMEOUT_SECS),
            idle_timeout: Duration::from_secs(DEFAULT_IDLE_TIMEOUT_SECS),
            max_lifetime: Some(Duration::from_secs(DEFAULT_MAX_LIFETIME_SECS)),
        }
    }
}

impl PoolConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create config from environment variables (with defaults).
    ///
    /// | Variable | Default | Description |
    /// |----------|---------|-------------|
    /// | `DB_MAX_CONNECTIONS` | `10` | Pool ceiling |
    /// | `DB_MIN_CONNECTIONS` | `1` | Connections kept warm |
    /// | `DB_ACQUIRE_TIMEOUT_SECS` | `30` | Wait for a free connection |
    /// | `DB_IDLE_TIMEOUT_SECS` | `600` | Close idle connections after |
    /// | `DB_MAX_LIFETIME_SECS` | `1800` | Recycle connections after; `0` disables |
    ///
    /// Unparseable values fall back to the default.
    pub fn from_env() -> Self {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        fn parse<T: std::str::FromStr>(
            lookup: &impl Fn(&str) -> Option<String>,
            name: &str,
        ) -> Option<T> {
            lookup(name).and_then(|v| v.trim().parse().ok())
        }

        let defaults = Self::default();
        let max_lifetime = match parse::<u64>(&lookup, "DB_MAX_LIFETIME_SECS") {
            Some(0) => None,
            Some(secs) => Some(Duration::from_secs(secs)),
            None => defaults.max_lifetime,
        };

        Self {
            max_connections: parse(&lookup, "DB_MAX_CONNECTIONS")
                .filter(|n: &u32| *n > 0)
                .unwrap_or(defaults.max_connections),
            min_connections: parse(&lookup, "DB_MIN_CONNECTIONS")
                .unwrap_or(defaults.min_connections),
            acquire_timeout: parse(&lookup, "DB_ACQUIRE_TIMEOUT_SECS")
                .map(Duration::from_secs)
                .unwrap_or(defaults.acquire_timeout),
            idle_timeout: parse(&lookup, "DB_IDLE_TIMEOUT_SECS")
                .map(Duration::from_secs)
                .unwrap_or(defaults.idle_timeout),
            max_lifetime,
        }
    }

    pub fn with_max_connections(mut self, n: u32) -> Self {
        self.max_connections = n;
        self
    }

    pub fn with_min_connections(mut self, n: u32) -> Self {
        self.min_connections = n;
        self
    }

    pub fn with_acquire_timeout(mut self, timeout: Duration) -> Self {
        self.acquire_timeout = timeout;
        self
    }

    pub fn with_max_lifetime(mut self, lifetime: Option<Duration>) -> Self {
        self.max_lifetime = lifetime;
        self
    }

    /// Reject sizes sqlx would accept but that cannot serve a scan and a caller.
    pub fn validate(&self) -> Result<()> {
        if self.max_connections < 2 {
            return Err(Error::Config(format!(
                "DB_MAX_CONNECTIONS must be at least 2, got {}",
                self.max_connections
            )));
        }
        if self.min_connections > self.max_connections {
            return Err(Error::Config(format!(
                "DB_MIN_CONNECTIONS ({}) exceeds DB_MAX_CONNECTIONS ({})",
                self.min_connections, self.max_connections
            )));
        }
        Ok(())
    }
}

/// Create a pool with default settings.
pub async fn create_pool(database_url: &str) -> Result<PgPool> {
    create_pool_with_config(database_url, PoolConfig::default()).await
}

pub async fn create_pool_with_config(database_url: &str, config: PoolConfig) -> Result<PgPool> {
    config.validate()?;
    let start = Instant::now();

    let mut options = PgPoolOptions::new()
        .max_connections(config.max_connections)
        .min_connections(config.min_connections)
        .acquire_timeout(config.acquire_timeout)
        .idle_timeout(config.idle_timeout);
    if let Some(lifetime) = config.max_lifetime {
        options = options.max_lifetime(lifetime);
    }

    let pool = options
        .connect(database_url)
        .await
        .map_err(Error::Database)?;

    info!(
        subsystem = "db",
        component = "pool",
        op = "connect",
        max_connections = config.max_connections,
        min_connections = config.min_connections,
        duration_ms = start.elapsed().as_millis() as u64,
        "Database pool connected"
    );
    Ok(pool)
}

/// Point-in-time pool occupancy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PoolStatus {
    pub size: u32,
    pub idle: u32,
}

impl PoolStatus {
    pub fn of(pool: &PgPool) -> Self {
        Self {
            size: pool.size(),
            idle: pool.num_idle() as u32,
        }
    }

    pub fn in_use(&self) -> u32 {
        self.size.saturating_sub(self.idle)
    }

    /// Every open connection is checked out.
    pub fn is_saturated(&self) -> bool {
        self.size > 0 && self.idle == 0
    }
}

/// Log pool occupancy, warning when no connection is idle.
pub fn log_pool_metrics(pool: &PgPool) {
    let status = PoolStatus::of(pool);
    if status.is_saturated() {
        warn!(
            subsystem = "db",
            component = "pool",
            pool_size = status.size,
            "Connection pool has no idle connections"
        );
    } else {
        debug!(
            subsystem = "db",
            component = "pool",
            pool_size = status.size,
            pool_idle = status.idle,
            pool_in_use = status.in_use(),
            "Pool status"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |name| vars.get(name).cloned()
    }

    #[test]
    fn test_from_lookup_defaults_when_unset() {
        assert_eq!(PoolConfig::from_lookup(lookup(&[])), PoolConfig::default());
    }

    #[test]
    fn test_from_lookup_reads_every_setting() {
        let config = PoolConfig::from_lookup(lookup(&[
            ("DB_MAX_CONNECTIONS", "25"),
            ("DB_MIN_CONNECTIONS", " 3 "),
            ("DB_ACQUIRE_TIMEOUT_SECS", "5"),
            ("DB_IDLE_TIMEOUT_SECS", "60"),
            ("DB_MAX_LIFETIME_SECS", "0"),
        ]));
        assert_eq!(config.max_connections, 25);
        assert_eq!(config.min_connections, 3);
        assert_eq!(config.acquire_timeout, Duration::from_secs(5));
        assert_eq!(config.idle_timeout, Duration::from_secs(60));
        assert!(config.max_lifetime.is_none());
    }

    #[test]
    fn test_from_lookup_ignores_garbage() {
        let config = PoolConfig::from_lookup(lookup(&[
            ("DB_MAX_CONNECTIONS", "0"),
            ("DB_ACQUIRE_TIMEOUT_SECS", "soon"),
        ]));
        assert_eq!(config.max_connections, DEFAULT_MAX_CONNECTIONS);
        assert_eq!(
            config.acquire_timeout,
            Duration::from_secs(DEFAULT_ACQUIRE_TIMEOUT_SECS)
        );
    }

    #[test]
    fn test_validate_pool_sizes() {
        assert!(PoolConfig::default().validate().is_ok());
        assert!(matches!(
            PoolConfig::new().with_max_connections(1).validate(),
            Err(Error::Config(_))
        ));
        assert!(matches!(
            PoolConfig::new()
                .with_max_connections(4)
                .with_min_connections(5)
                .validate(),
            Err(Error::Config(_))
        ));
    }

    #[test]
    fn test_pool_status() {
        let busy = PoolStatus { size: 4, idle: 0 };
        assert!(busy.is_saturated());
        assert_eq!(busy.in_use(), 4);

        let empty = PoolStatus { size: 0, idle: 0 };
        assert!(!empty.is_saturated());

        let relaxed = PoolStatus { size: 4, idle: 3 };
        assert_eq!(relaxed.in_use(), 1);
        assert!(!relaxed.is_saturated());
    }
}
