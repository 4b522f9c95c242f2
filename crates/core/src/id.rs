//! Strongly-typed identifiers used across the permission model.
//!
//! Every entity is keyed by a 64-bit integer assigned by the persistence
//! layer. The newtypes keep a role id from being passed where a rule id is
//! expected.

use core::str::FromStr;
use serde::{Deserialize, Serialize};

use crate::error::DomainError;

/// Identifier of a user (actor identity, `user_id` in tokens).
#[derive(Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct UserId(i64);

/// Identifier of a role.
#[derive(Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RoleId(i64);

/// Identifier of a permission rule.
#[derive(Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RuleId(i64);

/// Identifier of a per-user row restriction.
#[derive(Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct UserPermissionId(i64);

/// Identifier of a field classification row.
#[derive(Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct FieldLevelId(i64);

/// Identifier of a workflow log row.
#[derive(Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct WorkflowStateId(i64);

macro_rules! impl_int_newtype {
    ($t:ty, $name:literal) => {
        impl $t {
            pub const fn new(value: i64) -> Self {
                Self(value)
            }

            pub const fn get(&self) -> i64 {
                self.0
            }
        }

        impl core::fmt::Display for $t {
            fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
                core::fmt::Display::fmt(&self.0, f)
            }
        }

        impl From<i64> for $t {
            fn from(value: i64) -> Self {
                Self(value)
            }
        }

        impl From<$t> for i64 {
            fn from(value: $t) -> Self {
                value.0
            }
        }

        impl FromStr for $t {
            type Err = DomainError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                let value = s
                    .trim()
                    .parse::<i64>()
                    .map_err(|e| DomainError::validation(format!("{}: {}", $name, e)))?;
                Ok(Self(value))
            }
        }
    };
}

impl_int_newtype!(UserId, "UserId");
impl_int_newtype!(RoleId, "RoleId");
impl_int_newtype!(RuleId, "RuleId");
impl_int_newtype!(UserPermissionId, "UserPermissionId");
impl_int_newtype!(FieldLevelId, "FieldLevelId");
impl_int_newtype!(WorkflowStateId, "WorkflowStateId");

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_and_displays() {
        let id: UserId = " 42 ".parse().unwrap();
        assert_eq!(id, UserId::new(42));
        assert_eq!(id.to_string(), "42");
    }

    #[test]
    fn rejects_garbage() {
        let err = "abc".parse::<RoleId>().unwrap_err();
        assert!(err.to_string().contains("RoleId"));
    }

    #[test]
    fn serializes_transparently() {
        let json = serde_json::to_string(&RuleId::new(7)).unwrap();
        assert_eq!(json, "7");
        let back: RuleId = serde_json::from_str(&json).unwrap();
        assert_eq!(back.get(), 7);
    }
}
