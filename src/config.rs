use serde::Deserialize;

use crate::models::{MAX_RETENTION_DAYS, MetricClass, RetentionPolicies};
use crate::query::cache::MAX_TTL;

#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    pub server: ServerConfig,
    pub database: DatabaseConfig,
    #[serde(default)]
    pub rollup: RollupConfig,
    #[serde(default)]
    pub sweeper: SweeperConfig,
    #[serde(default)]
    pub cache: CacheConfig,
    #[serde(default)]
    pub retention: RetentionPolicies,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    pub port: u16,
    pub host: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    pub path: String,
    pub max_pool_size: u32,
    /// Samples buffered by the ingest writer before a batch insert.
    pub flush_rate: u64,
    #[serde(default = "default_flush_interval_secs")]
    pub flush_interval_secs: u64,
}

fn default_flush_interval_secs() -> u64 {
    5
}

#[derive(Debug, Clone, Deserialize)]
pub struct RollupConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_rollup_interval_secs")]
    pub interval_secs: u64,
    /// Optional wall-clock cap on one pass; partial progress is kept.
    #[serde(default)]
    pub timeout_secs: Option<u64>,
}

impl Default for RollupConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            interval_secs: default_rollup_interval_secs(),
            timeout_secs: None,
        }
    }
}

fn default_true() -> bool {
    true
}

fn default_rollup_interval_secs() -> u64 {
    3600
}

#[derive(Debug, Clone, Deserialize)]
pub struct SweeperConfig {
    /// Run the sweep every N seconds when `schedule` is not set.
    #[serde(default = "default_sweep_interval_secs")]
    pub interval_secs: u64,
    /// Optional cron expression (seconds field first, UTC), e.g. "0 30 3 * * *".
    #[serde(default)]
    pub schedule: Option<String>,
    /// VACUUM after a sweep that deleted rows.
    #[serde(default = "default_true")]
    pub vacuum: bool,
}

impl Default for SweeperConfig {
    fn default() -> Self {
        Self {
            interval_secs: default_sweep_interval_secs(),
            schedule: None,
            vacuum: true,
        }
    }
}

fn default_sweep_interval_secs() -> u64 {
    86_400
}

#[derive(Debug, Clone, Deserialize)]
pub struct CacheConfig {
    #[serde(default = "default_cache_ttl_secs")]
    pub ttl_secs: u64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            ttl_secs: default_cache_ttl_secs(),
        }
    }
}

fn default_cache_ttl_secs() -> u64 {
    300
}

impl AppConfig {
    pub fn load() -> anyhow::Result<Self> {
        let path = std::env::var("CONFIG_FILE").unwrap_or_else(|_| "config.toml".into());
        let s = std::fs::read_to_string(&path)?;
        Self::load_from_str(&s)
    }

    /// Parse and validate config from a string (e.g. for tests).
    pub fn load_from_str(s: &str) -> anyhow::Result<Self> {
        let config: AppConfig = toml::from_str(s)?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> anyhow::Result<()> {
        anyhow::ensure!(
            self.server.port > 0,
            "server.port must be between 1 and 65535, got {}",
            self.server.port
        );
        anyhow::ensure!(
            !self.database.path.is_empty(),
            "database.path must be non-empty"
        );
        anyhow::ensure!(
            self.database.max_pool_size > 0,
            "database.max_pool_size must be > 0, got {}",
            self.database.max_pool_size
        );
        anyhow::ensure!(
            self.database.flush_rate > 0,
            "database.flush_rate must be > 0, got {}",
            self.database.flush_rate
        );
        anyhow::ensure!(
            self.database.flush_interval_secs > 0,
            "database.flush_interval_secs must be > 0, got {}",
            self.database.flush_interval_secs
        );
        if self.rollup.enabled {
            anyhow::ensure!(
                self.rollup.interval_secs > 0,
                "rollup.interval_secs must be > 0 when rollup is enabled, got {}",
                self.rollup.interval_secs
            );
        }
        if let Some(timeout) = self.rollup.timeout_secs {
            anyhow::ensure!(
                timeout > 0,
                "rollup.timeout_secs must be > 0 when set, got {}",
                timeout
            );
        }
        anyhow::ensure!(
            self.sweeper.interval_secs > 0,
            "sweeper.interval_secs must be > 0, got {}",
            self.sweeper.interval_secs
        );
        if let Some(ref schedule) = self.sweeper.schedule {
            anyhow::ensure!(
                schedule.parse::<cron::Schedule>().is_ok(),
                "sweeper.schedule is not a valid cron expression: {:?}",
                schedule
            );
        }
        anyhow::ensure!(
            self.cache.ttl_secs > 0 && self.cache.ttl_secs <= MAX_TTL.as_secs(),
            "cache.ttl_secs must be between 1 and {}, got {}",
            MAX_TTL.as_secs(),
            self.cache.ttl_secs
        );
        for class in MetricClass::ALL {
            let policy = self.retention.for_class(class);
            anyhow::ensure!(
                policy.raw_days > 0,
                "retention.{}.raw_days must be > 0, got {}",
                class,
                policy.raw_days
            );
            anyhow::ensure!(
                policy.hourly_days <= MAX_RETENTION_DAYS,
                "retention.{}.hourly_days must be <= {}, got {}",
                class,
                MAX_RETENTION_DAYS,
                policy.hourly_days
            );
            anyhow::ensure!(
                policy.hourly_days >= policy.raw_days,
                "retention.{}.hourly_days must be >= raw_days ({}), got {}",
                class,
                policy.raw_days,
                policy.hourly_days
            );
            if let Some(daily_days) = policy.daily_days.days() {
                anyhow::ensure!(
                    daily_days > policy.hourly_days,
                    "retention.{}.daily_days must be > hourly_days ({}), got {}",
                    class,
                    policy.hourly_days,
                    daily_days
                );
                anyhow::ensure!(
                    daily_days <= MAX_RETENTION_DAYS,
                    "retention.{}.daily_days must be <= {}, got {}",
                    class,
                    MAX_RETENTION_DAYS,
                    daily_days
                );
            }
        }
        Ok(())
    }
}
