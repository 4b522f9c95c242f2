//! Permission rules: one role's entitlement at one (doc type, level).

use serde::{Deserialize, Serialize};

use erpguard_core::{DomainError, RoleId, RuleId};

use crate::{Action, ActionFlags, PermissionLevel};

/// A persisted entitlement grant.
///
/// # Invariants
/// - level 0: at least one of read/write is granted.
/// - level >= 1: only read and write may be granted.
/// - (role_id, doc_type, permission_level) is unique (enforced by storage).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PermissionRule {
    pub id: RuleId,
    pub role_id: RoleId,
    pub doc_type: String,
    pub permission_level: PermissionLevel,
    pub permissions: ActionFlags,
    pub only_if_creator: bool,
    pub condition: Option<String>,
}

/// A rule before the store has assigned it an id.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewPermissionRule {
    pub role_id: RoleId,
    pub doc_type: String,
    pub permission_level: PermissionLevel,
    #[serde(default)]
    pub permissions: ActionFlags,
    #[serde(default)]
    pub only_if_creator: bool,
    #[serde(default)]
    pub condition: Option<String>,
}

impl NewPermissionRule {
    pub fn validate(&self) -> Result<(), DomainError> {
        validate_grant(&self.doc_type, self.permission_level, &self.permissions)
    }

    pub fn into_rule(self, id: RuleId) -> PermissionRule {
        PermissionRule {
            id,
            role_id: self.role_id,
            doc_type: self.doc_type,
            permission_level: self.permission_level,
            permissions: self.permissions,
            only_if_creator: self.only_if_creator,
            condition: self.condition,
        }
    }
}

impl PermissionRule {
    pub fn validate(&self) -> Result<(), DomainError> {
        validate_grant(&self.doc_type, self.permission_level, &self.permissions)
    }

    /// True when this rule grants `action` at exactly `level`.
    pub fn grants(&self, action: Action, level: PermissionLevel) -> bool {
        self.permission_level == level && self.permissions.allows(action)
    }

    /// True when this rule gives any read or write access.
    pub fn grants_read_or_write(&self) -> bool {
        self.permissions.read || self.permissions.write
    }
}

fn validate_grant(
    doc_type: &str,
    level: PermissionLevel,
    flags: &ActionFlags,
) -> Result<(), DomainError> {
    if doc_type.trim().is_empty() {
        return Err(DomainError::validation("doc_type cannot be empty"));
    }

    if level.is_document_level() {
        if !flags.read && !flags.write {
            return Err(DomainError::validation(
                "document-level rule must grant read or write",
            ));
        }
    } else if flags.has_non_field_grants() {
        return Err(DomainError::validation(format!(
            "field-level rule (level {level}) may only grant read or write"
        )));
    }

    Ok(())
}
