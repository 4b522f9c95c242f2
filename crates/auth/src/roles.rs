use std::borrow::Cow;

use serde::{Deserialize, Serialize};

use erpguard_core::RoleId;

/// Role code as carried in tokens and cached per user (e.g. `"sales_manager"`).
///
/// Codes are opaque strings at this layer.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RoleCode(Cow<'static, str>);

impl RoleCode {
    pub fn new(code: impl Into<Cow<'static, str>>) -> Self {
        Self(code.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl core::fmt::Display for RoleCode {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(&self.0)
    }
}

/// A named capability bundle.
///
/// System roles are immutable; user roles may be disabled, and a disabled role
/// contributes no rules.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Role {
    pub id: RoleId,
    pub code: RoleCode,
    pub name: String,
    pub is_system: bool,
    pub enabled: bool,
    pub sort_order: i32,
}

impl Role {
    pub fn to_ref(&self) -> RoleRef {
        RoleRef {
            id: self.id,
            code: self.code.clone(),
        }
    }
}

/// A user's role assignment: the id keys rule lookups, the code goes into tokens.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RoleRef {
    pub id: RoleId,
    pub code: RoleCode,
}
