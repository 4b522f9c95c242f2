//! Two-tier permission cache.
//!
//! ```text
//! lookup → local (DashMap) → shared (Redis) → storage
//! ```
//!
//! Both tiers share one key namespace under the configured prefix. The local
//! tier is always present; the shared tier is optional and every failure on it
//! degrades to a miss.

pub mod keys;
pub mod local;
pub mod redis;
pub mod tiered;

use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;

pub use self::local::LocalCache;
pub use self::redis::RedisCache;
pub use self::tiered::{Generation, PermissionCache};

/// Keys deleted per round trip during pattern invalidation.
pub const SCAN_BATCH: usize = 100;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CacheError {
    #[error("cache backend error: {0}")]
    Backend(String),

    #[error("timed out acquiring a cache connection")]
    Timeout,

    #[error("cache value could not be (de)serialized: {0}")]
    Serialization(String),
}

/// A raw cached value with the lifetime it has left, when the tier knows it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CachedEntry {
    pub value: String,
    pub ttl_remaining: Option<Duration>,
}

/// One cache tier. Keys are fully qualified (prefix included).
#[async_trait]
pub trait CacheBackend: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<CachedEntry>, CacheError>;

    async fn set(&self, key: &str, value: String, ttl: Duration) -> Result<(), CacheError>;

    async fn del(&self, key: &str) -> Result<(), CacheError>;

    /// Delete every key matching a `*` glob. Returns how many were removed.
    async fn scan_del(&self, pattern: &str) -> Result<u64, CacheError>;
}

#[derive(Clone, Copy, PartialEq)]
enum GlobToken {
    Any,
    One,
    Literal(char),
}

fn glob_tokens(pattern: &str) -> Vec<GlobToken> {
    let mut tokens = Vec::new();
    let mut chars = pattern.chars();
    while let Some(c) = chars.next() {
        tokens.push(match c {
            '*' => GlobToken::Any,
            '?' => GlobToken::One,
            '\\' => GlobToken::Literal(chars.next().unwrap_or('\\')),
            other => GlobToken::Literal(other),
        });
    }
    tokens
}

/// Glob match supporting `*` (any run, including empty), `?` (one char) and
/// `\` escapes, the subset of Redis `MATCH` syntax the key layout emits.
pub(crate) fn glob_match(pattern: &str, key: &str) -> bool {
    let p = glob_tokens(pattern);
    let k: Vec<char> = key.chars().collect();

    let (mut pi, mut ki) = (0usize, 0usize);
    let mut star: Option<usize> = None;
    let mut mark = 0usize;

    while ki < k.len() {
        let step = match p.get(pi) {
            Some(GlobToken::One) => true,
            Some(GlobToken::Literal(c)) => *c == k[ki],
            _ => false,
        };
        if step {
            pi += 1;
            ki += 1;
        } else if p.get(pi) == Some(&GlobToken::Any) {
            star = Some(pi);
            mark = ki;
            pi += 1;
        } else if let Some(s) = star {
            pi = s + 1;
            mark += 1;
            ki = mark;
        } else {
            return false;
        }
    }

    while p.get(pi) == Some(&GlobToken::Any) {
        pi += 1;
    }
    pi == p.len()
}

#[cfg(test)]
mod tests {
    use super::glob_match;

    #[test]
    fn glob_star_and_literal() {
        assert!(glob_match("perm:user_level:*:Invoice", "perm:user_level:7:Invoice"));
        assert!(!glob_match("perm:user_level:*:Invoice", "perm:user_level:7:InvoiceItem"));
        assert!(glob_match("perm:user_perms:*", "perm:user_perms:12"));
        assert!(glob_match("*", ""));
        assert!(!glob_match("abc", "abcd"));
    }

    #[test]
    fn user_family_patterns_do_not_bleed_into_other_ids() {
        assert!(glob_match("perm:user_*:1", "perm:user_roles:1"));
        assert!(glob_match("perm:user_*:1:*", "perm:user_level:1:Invoice"));
        assert!(!glob_match("perm:user_*:1", "perm:user_roles:21"));
        assert!(!glob_match("perm:user_*:1:*", "perm:user_level:11:Invoice"));
    }

    #[test]
    fn escaped_metacharacters_match_literally() {
        assert!(glob_match(r"a\*b", "a*b"));
        assert!(!glob_match(r"a\*b", "axxb"));
        assert!(glob_match(r"a\?", "a?"));
        assert!(!glob_match(r"a\?", "ab"));
        assert!(glob_match(r"x\\y", r"x\y"));
    }
}
