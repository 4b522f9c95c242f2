//! Per-user row restrictions.

use serde::{Deserialize, Serialize};

use erpguard_core::{DomainError, UserId, UserPermissionId};

/// Restricts which instances of `doc_type` a user may see.
///
/// `allowed_value` names the doc type whose instances are visible and
/// `for_value` the instance identifier. `applicable_for`, when set, narrows the
/// restriction to queries against that target doc type only.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserPermission {
    pub id: UserPermissionId,
    pub user_id: UserId,
    pub doc_type: String,
    pub allowed_value: String,
    pub for_value: String,
    pub is_default: bool,
    pub applicable_for: Option<String>,
    pub hide_descendants: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewUserPermission {
    pub user_id: UserId,
    pub doc_type: String,
    pub allowed_value: String,
    pub for_value: String,
    #[serde(default)]
    pub is_default: bool,
    #[serde(default)]
    pub applicable_for: Option<String>,
    #[serde(default)]
    pub hide_descendants: bool,
}

impl NewUserPermission {
    pub fn validate(&self) -> Result<(), DomainError> {
        if self.doc_type.trim().is_empty() {
            return Err(DomainError::validation("doc_type cannot be empty"));
        }
        if self.allowed_value.trim().is_empty() {
            return Err(DomainError::validation("allowed_value cannot be empty"));
        }
        if self.for_value.trim().is_empty() {
            return Err(DomainError::validation("for_value cannot be empty"));
        }
        Ok(())
    }

    pub fn into_permission(self, id: UserPermissionId) -> UserPermission {
        UserPermission {
            id,
            user_id: self.user_id,
            doc_type: self.doc_type,
            allowed_value: self.allowed_value,
            for_value: self.for_value,
            is_default: self.is_default,
            applicable_for: self.applicable_for,
            hide_descendants: self.hide_descendants,
        }
    }
}

impl UserPermission {
    /// Whether this restriction applies to a listing of `target_doc_type`.
    pub fn applies_to(&self, target_doc_type: &str) -> bool {
        match &self.applicable_for {
            Some(target) => target == target_doc_type,
            None => true,
        }
    }
}

/// One page of a paginated listing (1-based).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Page {
    pub page: u32,
    pub size: u32,
}

impl Page {
    pub const MAX_SIZE: u32 = 500;

    pub fn new(page: u32, size: u32) -> Self {
        Self {
            page: page.max(1),
            size: size.clamp(1, Self::MAX_SIZE),
        }
    }

    pub fn offset(&self) -> u64 {
        u64::from(self.page - 1) * u64::from(self.size)
    }
}

impl Default for Page {
    fn default() -> Self {
        Self::new(1, 100)
    }
}
