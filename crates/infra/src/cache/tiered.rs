use std::collections::BTreeMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use dashmap::DashMap;
use serde::Serialize;
use serde::de::DeserializeOwned;
use tracing::{debug, warn};

use erpguard_auth::{DocType, PermissionLevel, PermissionRule, RequestContext, RoleRef};
use erpguard_core::{RoleId, UserId};

use crate::config::{CacheConfig, CacheTtlConfig};

use super::{CacheBackend, LocalCache, keys};

/// Sentinel stored under `user_level` keys meaning "nothing cached".
pub const USER_LEVEL_MISS: i64 = -1;

/// Invalidation counter snapshot for one key.
///
/// Taken before a storage read and handed back to [`PermissionCache::set`];
/// a value loaded before an invalidation of its key is never cached.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Generation {
    key: u64,
    pattern: u64,
}

/// The permission cache: a local tier in front of an optional shared tier.
///
/// Values are JSON. Failures are logged and read as misses; nothing here
/// returns an error to the caller.
pub struct PermissionCache {
    prefix: String,
    ttl: CacheTtlConfig,
    local: LocalCache,
    shared: Option<Arc<dyn CacheBackend>>,
    generations: DashMap<String, u64>,
    pattern_epoch: AtomicU64,
}

impl PermissionCache {
    /// Local tier only.
    pub fn new(config: &CacheConfig) -> Self {
        Self {
            prefix: config.prefix.clone(),
            ttl: config.ttl.clone(),
            local: LocalCache::new(),
            shared: None,
            generations: DashMap::new(),
            pattern_epoch: AtomicU64::new(0),
        }
    }

    #[must_use]
    pub fn with_shared(mut self, shared: Arc<dyn CacheBackend>) -> Self {
        self.shared = Some(shared);
        self
    }

    pub fn ttl(&self) -> &CacheTtlConfig {
        &self.ttl
    }

    pub fn local(&self) -> &LocalCache {
        &self.local
    }

    fn qualify(&self, key: &str) -> String {
        format!("{}{}", self.prefix, key)
    }

    /// Current invalidation counters for `key` (unprefixed).
    pub fn generation(&self, key: &str) -> Generation {
        Generation {
            key: self.generations.get(key).map_or(0, |g| *g),
            pattern: self.pattern_epoch.load(Ordering::SeqCst),
        }
    }

    fn bump(&self, key: &str) {
        *self.generations.entry(key.to_string()).or_insert(0) += 1;
    }

    fn is_stale(&self, key: &str, seen: Generation) -> bool {
        self.generation(key) != seen
    }

    pub async fn get<T: DeserializeOwned>(&self, ctx: &RequestContext, key: &str) -> Option<T> {
        let full = self.qualify(key);
        let seen = self.generation(key);

        if let Some(entry) = self.local.get_entry(&full) {
            match serde_json::from_str(&entry.value) {
                Ok(value) => {
                    debug!(key, tier = "local", "cache hit");
                    return Some(value);
                }
                Err(e) => {
                    warn!(key, error = %e, "dropping undecodable local cache entry");
                    self.local.remove(&full);
                }
            }
        }

        let Some(shared) = &self.shared else {
            debug!(key, "cache miss");
            return None;
        };

        let entry = match ctx.guard(shared.get(&full)).await {
            Ok(Ok(Some(entry))) => entry,
            Ok(Ok(None)) => {
                debug!(key, "cache miss");
                return None;
            }
            Ok(Err(e)) => {
                warn!(key, error = %e, "shared cache read failed; falling back to storage");
                return None;
            }
            Err(_) => return None,
        };

        let value = match serde_json::from_str(&entry.value) {
            Ok(value) => value,
            Err(e) => {
                warn!(key, error = %e, "undecodable shared cache entry");
                return None;
            }
        };
        debug!(key, tier = "shared", "cache hit");

        // Keep the shared tier's deadline so the copy never outlives it.
        if let Some(remaining) = entry.ttl_remaining {
            if !ctx.is_cancelled() {
                self.local.insert(&full, entry.value, remaining);
                if self.is_stale(key, seen) {
                    self.local.remove(&full);
                }
            }
        }
        Some(value)
    }

    /// Populate both tiers unless `key` was invalidated after `seen` was taken.
    ///
    /// The counters are checked again after each tier write and the entry is
    /// dropped from that tier when an invalidation raced it.
    pub async fn set<T: Serialize + ?Sized>(
        &self,
        ctx: &RequestContext,
        key: &str,
        value: &T,
        ttl: Duration,
        seen: Generation,
    ) {
        if ctx.is_cancelled() {
            debug!(key, "request canceled; skipping cache population");
            return;
        }
        if self.is_stale(key, seen) {
            debug!(key, "invalidated during load; skipping cache population");
            return;
        }

        let raw = match serde_json::to_string(value) {
            Ok(raw) => raw,
            Err(e) => {
                warn!(key, error = %e, "cache value could not be serialized");
                return;
            }
        };

        let full = self.qualify(key);
        self.local.insert(&full, raw.clone(), ttl);
        if self.is_stale(key, seen) {
            self.local.remove(&full);
            debug!(key, "invalidated during load; dropped local entry");
            return;
        }

        let Some(shared) = &self.shared else {
            return;
        };
        match ctx.guard(shared.set(&full, raw, ttl)).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => warn!(key, error = %e, "shared cache write failed"),
            Err(_) => debug!(key, "request canceled during shared cache write"),
        }
        if self.is_stale(key, seen) {
            debug!(key, "invalidated during load; dropping shared entry");
            if let Err(e) = shared.del(&full).await {
                warn!(key, error = %e, "stale shared cache entry could not be dropped");
            }
        }
    }

    /// Delete one key from both tiers. The local tier is always cleared.
    pub async fn invalidate(&self, ctx: &RequestContext, key: &str) {
        self.bump(key);
        let full = self.qualify(key);
        self.local.remove(&full);

        if let Some(shared) = &self.shared {
            match ctx.guard(shared.del(&full)).await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => warn!(key, error = %e, "shared cache invalidation failed"),
                Err(e) => warn!(key, error = %e, "shared cache invalidation abandoned"),
            }
        }
    }

    /// Delete every key matching `pattern` (unprefixed glob) from both tiers.
    pub async fn invalidate_pattern(&self, ctx: &RequestContext, pattern: &str) -> u64 {
        self.pattern_epoch.fetch_add(1, Ordering::SeqCst);
        let full = format!("{}{}", keys::escape_glob(&self.prefix), pattern);
        let mut removed = self.local.remove_matching(&full);

        if let Some(shared) = &self.shared {
            match ctx.guard(shared.scan_del(&full)).await {
                Ok(Ok(n)) => removed = removed.max(n),
                Ok(Err(e)) => warn!(pattern, error = %e, "shared cache pattern invalidation failed"),
                Err(e) => warn!(pattern, error = %e, "shared cache pattern invalidation abandoned"),
            }
        }

        debug!(pattern, removed, "pattern invalidated");
        removed
    }

    pub async fn user_roles(&self, ctx: &RequestContext, user_id: UserId) -> Option<Vec<RoleRef>> {
        self.get(ctx, &keys::user_roles(user_id)).await
    }

    pub async fn set_user_roles(
        &self,
        ctx: &RequestContext,
        user_id: UserId,
        roles: &[RoleRef],
        seen: Generation,
    ) {
        self.set(ctx, &keys::user_roles(user_id), roles, self.ttl.user_roles(), seen)
            .await;
    }

    pub async fn role_rules(
        &self,
        ctx: &RequestContext,
        role_id: RoleId,
        doc_type: &str,
    ) -> Option<Vec<PermissionRule>> {
        self.get(ctx, &keys::role_rules(role_id, doc_type)).await
    }

    pub async fn set_role_rules(
        &self,
        ctx: &RequestContext,
        role_id: RoleId,
        doc_type: &str,
        rules: &[PermissionRule],
        seen: Generation,
    ) {
        let key = keys::role_rules(role_id, doc_type);
        self.set(ctx, &key, rules, self.ttl.role_rules(), seen).await;
    }

    /// `None` for a miss or the `-1` sentinel; `Some(0)` is a real level.
    pub async fn user_level(
        &self,
        ctx: &RequestContext,
        user_id: UserId,
        doc_type: &str,
    ) -> Option<PermissionLevel> {
        let raw: i64 = self.get(ctx, &keys::user_level(user_id, doc_type)).await?;
        if raw <= USER_LEVEL_MISS {
            return None;
        }
        PermissionLevel::new(raw).ok()
    }

    pub async fn set_user_level(
        &self,
        ctx: &RequestContext,
        user_id: UserId,
        doc_type: &str,
        level: PermissionLevel,
        seen: Generation,
    ) {
        let raw = i64::from(level);
        let key = keys::user_level(user_id, doc_type);
        self.set(ctx, &key, &raw, self.ttl.user_level(), seen).await;
    }

    pub async fn field_levels(
        &self,
        ctx: &RequestContext,
        doc_type: &str,
    ) -> Option<BTreeMap<String, PermissionLevel>> {
        self.get(ctx, &keys::field_levels(doc_type)).await
    }

    pub async fn set_field_levels(
        &self,
        ctx: &RequestContext,
        doc_type: &str,
        levels: &BTreeMap<String, PermissionLevel>,
        seen: Generation,
    ) {
        let key = keys::field_levels(doc_type);
        self.set(ctx, &key, levels, self.ttl.field_levels(), seen).await;
    }

    pub async fn doctype(&self, ctx: &RequestContext, name: &str) -> Option<DocType> {
        self.get(ctx, &keys::doctype(name)).await
    }

    pub async fn set_doctype(&self, ctx: &RequestContext, doc_type: &DocType, seen: Generation) {
        self.set(ctx, &keys::doctype(&doc_type.name), doc_type, self.ttl.doctype(), seen)
            .await;
    }

    pub async fn user_perms(&self, ctx: &RequestContext, user_id: UserId) -> Option<Vec<String>> {
        self.get(ctx, &keys::user_perms(user_id)).await
    }

    pub async fn set_user_perms(
        &self,
        ctx: &RequestContext,
        user_id: UserId,
        codes: &[String],
        seen: Generation,
    ) {
        self.set(ctx, &keys::user_perms(user_id), codes, self.ttl.user_perms(), seen)
            .await;
    }

    pub async fn is_revoked(&self, ctx: &RequestContext, session_id: &str) -> bool {
        self.get::<bool>(ctx, &keys::revoked(session_id))
            .await
            .unwrap_or(false)
    }

    pub async fn revoke(&self, ctx: &RequestContext, session_id: &str, ttl: Duration) {
        let key = keys::revoked(session_id);
        self.set(ctx, &key, &true, ttl, self.generation(&key)).await;
    }
}
