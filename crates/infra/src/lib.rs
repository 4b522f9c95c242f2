//! Infrastructure layer: cache tiers, storage adapters, the cache-aware
//! repository and the permission evaluator.

pub mod cache;
pub mod config;
pub mod evaluator;
pub mod repository;
pub mod store;

pub use cache::{CacheBackend, CacheError, PermissionCache, RedisCache};
pub use config::{CacheConfig, CacheTtlConfig, DatabaseConfig, RedisConfig};
pub use evaluator::PermissionEvaluator;
pub use repository::CachedPermissionRepository;
pub use store::{InMemoryPermissionStore, PermissionStore, PostgresPermissionStore, StoreError};
