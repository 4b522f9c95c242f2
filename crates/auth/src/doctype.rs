//! Document types and per-field sensitivity classification.

use serde::{Deserialize, Serialize};

use erpguard_core::{DomainError, FieldLevelId};

use crate::PermissionLevel;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SortOrder {
    Asc,
    #[default]
    Desc,
}

/// Characters reserved by cache key patterns.
const GLOB_METACHARACTERS: [char; 5] = ['*', '?', '[', ']', '\\'];

/// A kind of document the system protects. `name` is the primary key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DocType {
    pub name: String,
    pub label: String,
    pub module: String,
    #[serde(default)]
    pub is_submittable: bool,
    #[serde(default)]
    pub is_child_table: bool,
    #[serde(default)]
    pub naming_rule: Option<String>,
    #[serde(default)]
    pub search_fields: Vec<String>,
    #[serde(default)]
    pub title_field: Option<String>,
    #[serde(default)]
    pub sort_field: Option<String>,
    #[serde(default)]
    pub sort_order: SortOrder,
    #[serde(default)]
    pub version: i64,
}

impl DocType {
    pub fn new(name: impl Into<String>, module: impl Into<String>) -> Self {
        let name = name.into();
        Self {
            label: name.clone(),
            name,
            module: module.into(),
            is_submittable: false,
            is_child_table: false,
            naming_rule: None,
            search_fields: Vec::new(),
            title_field: None,
            sort_field: None,
            sort_order: SortOrder::default(),
            version: 0,
        }
    }

    pub fn validate(&self) -> Result<(), DomainError> {
        if self.name.trim().is_empty() {
            return Err(DomainError::validation("doc type name cannot be empty"));
        }
        if self.name.contains(&GLOB_METACHARACTERS[..]) {
            return Err(DomainError::validation(
                "doc type name cannot contain '*', '?', '[', ']' or '\\'",
            ));
        }
        if self.module.trim().is_empty() {
            return Err(DomainError::validation("doc type module cannot be empty"));
        }
        Ok(())
    }
}

/// Sensitivity classification of one field of a doc type.
///
/// Unique per (doc_type, field_name). Level 0 fields are visible to anyone
/// with document access.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldPermissionLevel {
    pub id: FieldLevelId,
    pub doc_type: String,
    pub field_name: String,
    pub permission_level: PermissionLevel,
    pub field_type: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewFieldPermissionLevel {
    pub doc_type: String,
    pub field_name: String,
    pub permission_level: PermissionLevel,
    #[serde(default = "default_field_type")]
    pub field_type: String,
}

fn default_field_type() -> String {
    "Data".to_string()
}

impl NewFieldPermissionLevel {
    pub fn validate(&self) -> Result<(), DomainError> {
        if self.doc_type.trim().is_empty() {
            return Err(DomainError::validation("doc_type cannot be empty"));
        }
        if self.field_name.trim().is_empty() {
            return Err(DomainError::validation("field_name cannot be empty"));
        }
        Ok(())
    }

    pub fn into_level(self, id: FieldLevelId) -> FieldPermissionLevel {
        FieldPermissionLevel {
            id,
            doc_type: self.doc_type,
            field_name: self.field_name,
            permission_level: self.permission_level,
            field_type: self.field_type,
        }
    }
}

/// Result row of an accessible-fields query.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldAccess {
    pub field_name: String,
    pub can_access: bool,
    pub permission_level: PermissionLevel,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn plain_names_validate() {
        assert!(DocType::new("Sales Invoice", "selling").validate().is_ok());
        assert!(DocType::new("Item-Price_2", "stock").validate().is_ok());
    }

    #[test]
    fn pattern_characters_are_rejected_in_names() {
        for name in ["Sales*", "Invoice?", "Lead[1]", r"Back\slash"] {
            let err = DocType::new(name, "crm").validate().unwrap_err();
            assert!(matches!(err, DomainError::Validation(_)), "{name}: {err:?}");
        }
    }

    #[test]
    fn blank_name_or_module_is_rejected() {
        assert!(DocType::new("  ", "crm").validate().is_err());
        assert!(DocType::new("Lead", "").validate().is_err());
    }
}
