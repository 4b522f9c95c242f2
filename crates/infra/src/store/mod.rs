//! Persistence adapter contract.
//!
//! The evaluator consumes [`PermissionStore`] and nothing else. Two adapters
//! ship with the crate: an in-memory one for tests and single-process
//! deployments, and a PostgreSQL one.

pub mod in_memory;
pub mod postgres;

use async_trait::async_trait;
use thiserror::Error;

use erpguard_auth::{
    DocType, DocumentWorkflowState, FieldPermissionLevel, NewFieldPermissionLevel,
    NewPermissionRule, NewUserPermission, NewWorkflowState, Page, PermissionLevel,
    PermissionRule, RoleRef, UserPermission,
};
use erpguard_core::{DomainError, FieldLevelId, RoleId, RuleId, UserId, UserPermissionId};

pub use in_memory::InMemoryPermissionStore;
pub use postgres::PostgresPermissionStore;

pub const DOCTYPE_EXISTS: &str = "DOCTYPE_EXISTS";
pub const DOCTYPE_IN_USE: &str = "DOCTYPE_IN_USE";
pub const PERMISSION_RULE_EXISTS: &str = "PERMISSION_RULE_EXISTS";
pub const USER_PERMISSION_EXISTS: &str = "USER_PERMISSION_EXISTS";
pub const FIELD_LEVEL_EXISTS: &str = "FIELD_LEVEL_EXISTS";
pub const ROLE_ASSIGNMENT_EXISTS: &str = "ROLE_ASSIGNMENT_EXISTS";

/// Storage failure, with unique violations kept apart from generic faults.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum StoreError {
    #[error("not found: {0}")]
    NotFound(String),

    #[error("conflict ({code}): {message}")]
    Conflict { code: &'static str, message: String },

    #[error("invalid reference or value: {0}")]
    Validation(String),

    #[error("storage backend error: {0}")]
    Backend(String),
}

impl StoreError {
    pub fn conflict(code: &'static str, message: impl Into<String>) -> Self {
        Self::Conflict {
            code,
            message: message.into(),
        }
    }
}

impl From<StoreError> for DomainError {
    fn from(e: StoreError) -> Self {
        match e {
            StoreError::NotFound(what) => DomainError::not_found(what),
            StoreError::Conflict { code, message } => DomainError::conflict(code, message),
            StoreError::Validation(msg) => DomainError::validation(msg),
            StoreError::Backend(msg) => DomainError::storage(msg),
        }
    }
}

/// Durable storage for the permission model.
///
/// Updates return `(previous, current)` and deletes return the removed row so
/// callers can invalidate every cache key the mutation touched.
#[async_trait]
pub trait PermissionStore: Send + Sync {
    // Doc types
    async fn get_doc_type(&self, name: &str) -> Result<DocType, StoreError>;
    async fn list_doc_types(&self) -> Result<Vec<DocType>, StoreError>;
    async fn create_doc_type(&self, doc_type: DocType) -> Result<DocType, StoreError>;
    /// Bumps `version`.
    async fn update_doc_type(&self, doc_type: DocType) -> Result<DocType, StoreError>;
    /// Fails with `DOCTYPE_IN_USE` while any rule references the doc type.
    async fn delete_doc_type(&self, name: &str) -> Result<DocType, StoreError>;
    async fn count_rules_for_doc_type(&self, doc_type: &str) -> Result<u64, StoreError>;

    // Role assignments
    /// Enabled roles only, ordered by sort order.
    async fn get_user_roles(&self, user_id: UserId) -> Result<Vec<RoleRef>, StoreError>;
    async fn assign_user_role(&self, user_id: UserId, role_id: RoleId) -> Result<(), StoreError>;
    async fn revoke_user_role(&self, user_id: UserId, role_id: RoleId) -> Result<(), StoreError>;

    // Rules
    async fn get_rule(&self, id: RuleId) -> Result<PermissionRule, StoreError>;
    async fn list_rules_by_role_and_doc_type(
        &self,
        role_id: RoleId,
        doc_type: &str,
    ) -> Result<Vec<PermissionRule>, StoreError>;
    async fn list_rules_by_role(&self, role_id: RoleId) -> Result<Vec<PermissionRule>, StoreError>;
    async fn list_rules_by_doc_type(&self, doc_type: &str) -> Result<Vec<PermissionRule>, StoreError>;
    async fn create_rule(&self, rule: NewPermissionRule) -> Result<PermissionRule, StoreError>;
    /// All or nothing.
    async fn create_rules_batch(
        &self,
        rules: Vec<NewPermissionRule>,
    ) -> Result<Vec<PermissionRule>, StoreError>;
    async fn update_rule(
        &self,
        id: RuleId,
        rule: NewPermissionRule,
    ) -> Result<(PermissionRule, PermissionRule), StoreError>;
    async fn delete_rule(&self, id: RuleId) -> Result<PermissionRule, StoreError>;
    /// Least level among read/write rules held through the user's roles; 0 if none.
    async fn get_min_permission_level(
        &self,
        user_id: UserId,
        doc_type: &str,
    ) -> Result<PermissionLevel, StoreError>;

    // Field levels
    async fn list_field_levels(&self, doc_type: &str) -> Result<Vec<FieldPermissionLevel>, StoreError>;
    async fn create_field_level(
        &self,
        level: NewFieldPermissionLevel,
    ) -> Result<FieldPermissionLevel, StoreError>;
    async fn update_field_level(
        &self,
        id: FieldLevelId,
        level: NewFieldPermissionLevel,
    ) -> Result<(FieldPermissionLevel, FieldPermissionLevel), StoreError>;
    async fn delete_field_level(&self, id: FieldLevelId) -> Result<FieldPermissionLevel, StoreError>;

    // User permissions
    async fn get_user_permission(&self, id: UserPermissionId) -> Result<UserPermission, StoreError>;
    async fn list_user_permissions(
        &self,
        user_id: UserId,
        doc_type: &str,
        page: Page,
    ) -> Result<Vec<UserPermission>, StoreError>;
    async fn count_user_permissions(&self, user_id: UserId, doc_type: &str) -> Result<u64, StoreError>;
    async fn create_user_permission(
        &self,
        permission: NewUserPermission,
    ) -> Result<UserPermission, StoreError>;
    /// All or nothing.
    async fn create_user_permissions_batch(
        &self,
        permissions: Vec<NewUserPermission>,
    ) -> Result<Vec<UserPermission>, StoreError>;
    async fn update_user_permission(
        &self,
        id: UserPermissionId,
        permission: NewUserPermission,
    ) -> Result<(UserPermission, UserPermission), StoreError>;
    async fn delete_user_permission(&self, id: UserPermissionId) -> Result<UserPermission, StoreError>;

    // Workflow log
    async fn append_workflow_state(
        &self,
        state: NewWorkflowState,
    ) -> Result<DocumentWorkflowState, StoreError>;
    /// Newest first.
    async fn workflow_history(
        &self,
        doc_type: &str,
        doc_name: &str,
    ) -> Result<Vec<DocumentWorkflowState>, StoreError>;
    async fn current_workflow_state(
        &self,
        doc_type: &str,
        doc_name: &str,
    ) -> Result<Option<DocumentWorkflowState>, StoreError>;
}
