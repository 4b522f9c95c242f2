//! Redis-backed shared tier over a bounded `deadpool-redis` pool.

use std::time::Duration;

use async_trait::async_trait;
use deadpool_redis::{Config, Connection, Pool, PoolConfig, PoolError, Runtime, Timeouts};
use tracing::{debug, info, instrument};

use crate::config::RedisConfig;

use super::{CacheBackend, CacheError, CachedEntry, SCAN_BATCH};

#[derive(Clone)]
pub struct RedisCache {
    pool: Pool,
}

impl std::fmt::Debug for RedisCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RedisCache")
            .field("status", &self.pool.status())
            .finish()
    }
}

impl RedisCache {
    /// Build the pool. No connection is opened until [`Self::warm_up`] or the
    /// first command.
    pub fn new(config: &RedisConfig) -> Result<Self, CacheError> {
        let acquire = config.acquire_timeout();

        let mut pool_config = PoolConfig::new(config.pool_size.max(1));
        pool_config.timeouts = Timeouts {
            wait: Some(acquire),
            create: Some(acquire),
            recycle: Some(acquire),
        };

        let mut cfg = Config::from_url(config.url.as_str());
        cfg.pool = Some(pool_config);

        let pool = cfg
            .create_pool(Some(Runtime::Tokio1))
            .map_err(|e| CacheError::Backend(format!("redis pool creation failed: {e}")))?;

        Ok(Self { pool })
    }

    /// Open `min_idle` connections up front so the first requests do not pay
    /// the connect cost.
    #[instrument(skip(self))]
    pub async fn warm_up(&self, min_idle: usize) -> Result<(), CacheError> {
        let target = min_idle.min(self.pool.status().max_size);
        let mut held = Vec::with_capacity(target);
        for _ in 0..target {
            let mut conn = self.conn().await?;
            let _: String = redis::cmd("PING")
                .query_async(&mut conn)
                .await
                .map_err(backend)?;
            held.push(conn);
        }
        drop(held);

        info!(idle = self.pool.status().available, "redis cache pool warmed up");
        Ok(())
    }

    async fn conn(&self) -> Result<Connection, CacheError> {
        self.pool.get().await.map_err(|e| match e {
            PoolError::Timeout(_) => CacheError::Timeout,
            other => CacheError::Backend(other.to_string()),
        })
    }
}

fn backend(e: redis::RedisError) -> CacheError {
    CacheError::Backend(e.to_string())
}

#[async_trait]
impl CacheBackend for RedisCache {
    async fn get(&self, key: &str) -> Result<Option<CachedEntry>, CacheError> {
        let mut conn = self.conn().await?;
        let (value, pttl): (Option<String>, i64) = redis::pipe()
            .cmd("GET")
            .arg(key)
            .cmd("PTTL")
            .arg(key)
            .query_async(&mut conn)
            .await
            .map_err(backend)?;

        Ok(value.map(|value| CachedEntry {
            value,
            ttl_remaining: u64::try_from(pttl)
                .ok()
                .filter(|ms| *ms > 0)
                .map(Duration::from_millis),
        }))
    }

    async fn set(&self, key: &str, value: String, ttl: Duration) -> Result<(), CacheError> {
        let mut conn = self.conn().await?;
        let millis = u64::try_from(ttl.as_millis()).unwrap_or(u64::MAX).max(1);
        let _: () = redis::cmd("SET")
            .arg(key)
            .arg(value)
            .arg("PX")
            .arg(millis)
            .query_async(&mut conn)
            .await
            .map_err(backend)?;
        Ok(())
    }

    async fn del(&self, key: &str) -> Result<(), CacheError> {
        let mut conn = self.conn().await?;
        let _: u64 = redis::cmd("DEL")
            .arg(key)
            .query_async(&mut conn)
            .await
            .map_err(backend)?;
        Ok(())
    }

    #[instrument(skip(self))]
    async fn scan_del(&self, pattern: &str) -> Result<u64, CacheError> {
        let mut conn = self.conn().await?;
        let mut cursor: u64 = 0;
        let mut removed: u64 = 0;

        loop {
            let (next, keys): (u64, Vec<String>) = redis::cmd("SCAN")
                .arg(cursor)
                .arg("MATCH")
                .arg(pattern)
                .arg("COUNT")
                .arg(SCAN_BATCH)
                .query_async(&mut conn)
                .await
                .map_err(backend)?;

            for chunk in keys.chunks(SCAN_BATCH) {
                let n: u64 = redis::cmd("DEL")
                    .arg(chunk)
                    .query_async(&mut conn)
                    .await
                    .map_err(backend)?;
                removed += n;
            }

            if next == 0 {
                break;
            }
            cursor = next;
        }

        debug!(removed, "pattern invalidation on shared tier");
        Ok(removed)
    }
}
