//! Cache and storage configuration.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Per-family cache lifetimes, in seconds.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheTtlConfig {
    pub user_perms_secs: u64,
    pub user_roles_secs: u64,
    pub role_rules_secs: u64,
    pub user_level_secs: u64,
    pub field_levels_secs: u64,
    pub doctype_secs: u64,
}

impl Default for CacheTtlConfig {
    fn default() -> Self {
        Self {
            user_perms_secs: 15 * 60,
            user_roles_secs: 30 * 60,
            role_rules_secs: 60 * 60,
            user_level_secs: 10 * 60,
            field_levels_secs: 2 * 60 * 60,
            doctype_secs: 4 * 60 * 60,
        }
    }
}

impl CacheTtlConfig {
    pub fn user_perms(&self) -> Duration {
        Duration::from_secs(self.user_perms_secs)
    }

    pub fn user_roles(&self) -> Duration {
        Duration::from_secs(self.user_roles_secs)
    }

    pub fn role_rules(&self) -> Duration {
        Duration::from_secs(self.role_rules_secs)
    }

    pub fn user_level(&self) -> Duration {
        Duration::from_secs(self.user_level_secs)
    }

    pub fn field_levels(&self) -> Duration {
        Duration::from_secs(self.field_levels_secs)
    }

    pub fn doctype(&self) -> Duration {
        Duration::from_secs(self.doctype_secs)
    }
}

/// Shared tier connection settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RedisConfig {
    pub url: String,
    pub pool_size: usize,
    pub min_idle_conns: usize,
    pub acquire_timeout_ms: u64,
}

impl Default for RedisConfig {
    fn default() -> Self {
        Self {
            url: "redis://127.0.0.1:6379".to_string(),
            pool_size: 10,
            min_idle_conns: 2,
            acquire_timeout_ms: 500,
        }
    }
}

impl RedisConfig {
    pub fn acquire_timeout(&self) -> Duration {
        Duration::from_millis(self.acquire_timeout_ms)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// Namespace prepended to every key in both tiers.
    pub prefix: String,
    pub ttl: CacheTtlConfig,
    /// Local tier only when absent.
    pub redis: Option<RedisConfig>,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            prefix: "perm:".to_string(),
            ttl: CacheTtlConfig::default(),
            redis: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
    pub acquire_timeout_ms: u64,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: "postgres://localhost/erpguard".to_string(),
            max_connections: 10,
            acquire_timeout_ms: 3_000,
        }
    }
}

impl DatabaseConfig {
    pub fn acquire_timeout(&self) -> Duration {
        Duration::from_millis(self.acquire_timeout_ms)
    }
}
