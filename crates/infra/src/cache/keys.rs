//! Key layout (unprefixed). [`super::PermissionCache`] adds the namespace.

use erpguard_core::{RoleId, UserId};

pub fn user_perms(user_id: UserId) -> String {
    format!("user_perms:{user_id}")
}

pub fn user_roles(user_id: UserId) -> String {
    format!("user_roles:{user_id}")
}

pub fn role_rules(role_id: RoleId, doc_type: &str) -> String {
    format!("role_rules:{role_id}:{doc_type}")
}

pub fn user_level(user_id: UserId, doc_type: &str) -> String {
    format!("user_level:{user_id}:{doc_type}")
}

pub fn field_levels(doc_type: &str) -> String {
    format!("field_levels:{doc_type}")
}

pub fn doctype(name: &str) -> String {
    format!("doctype:{name}")
}

pub fn revoked(session_id: &str) -> String {
    format!("revoked:{session_id}")
}

/// Every user's level for one doc type.
pub fn user_levels_for_doc_type(doc_type: &str) -> String {
    format!("user_level:*:{}", escape_glob(doc_type))
}

/// Backslash-escape glob metacharacters so `raw` matches only itself.
pub fn escape_glob(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    for c in raw.chars() {
        if matches!(c, '*' | '?' | '[' | ']' | '\\') {
            out.push('\\');
        }
        out.push(c);
    }
    out
}

pub fn all_user_perms() -> String {
    "user_perms:*".to_string()
}

/// The `user_*` families keyed by one user: `user_x:{uid}` and `user_x:{uid}:*`.
pub fn user_families(user_id: UserId) -> [String; 2] {
    [format!("user_*:{user_id}"), format!("user_*:{user_id}:*")]
}
