//! `erpguard-core`: identifiers and the error taxonomy shared by every layer.
//!
//! This crate contains **pure** primitives (no infrastructure concerns).

pub mod error;
pub mod id;

pub use error::DomainError;
pub use id::{FieldLevelId, RoleId, RuleId, UserId, UserPermissionId, WorkflowStateId};
