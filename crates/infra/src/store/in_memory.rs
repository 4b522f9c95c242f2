use std::collections::{BTreeMap, BTreeSet, HashSet};
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use async_trait::async_trait;
use chrono::Utc;

use erpguard_auth::{
    DocType, DocumentWorkflowState, FieldPermissionLevel, NewFieldPermissionLevel,
    NewPermissionRule, NewUserPermission, NewWorkflowState, Page, PermissionLevel,
    PermissionRule, Role, RoleRef, UserPermission,
};
use erpguard_core::{FieldLevelId, RoleId, RuleId, UserId, UserPermissionId, WorkflowStateId};

use super::{
    DOCTYPE_EXISTS, DOCTYPE_IN_USE, FIELD_LEVEL_EXISTS, PERMISSION_RULE_EXISTS, PermissionStore,
    ROLE_ASSIGNMENT_EXISTS, StoreError, USER_PERMISSION_EXISTS,
};

#[derive(Debug, Default)]
struct State {
    next_id: i64,
    doc_types: BTreeMap<String, DocType>,
    roles: BTreeMap<RoleId, Role>,
    users: HashSet<UserId>,
    assignments: BTreeSet<(UserId, RoleId)>,
    rules: BTreeMap<RuleId, PermissionRule>,
    field_levels: BTreeMap<FieldLevelId, FieldPermissionLevel>,
    user_permissions: BTreeMap<UserPermissionId, UserPermission>,
    workflow: Vec<DocumentWorkflowState>,
}

impl State {
    fn next_id(&mut self) -> i64 {
        self.next_id += 1;
        self.next_id
    }

    fn check_rule(&self, rule: &NewPermissionRule, skip: Option<RuleId>) -> Result<(), StoreError> {
        if !self.roles.contains_key(&rule.role_id) {
            return Err(StoreError::Validation(format!("role {} does not exist", rule.role_id)));
        }
        if !self.doc_types.contains_key(&rule.doc_type) {
            return Err(StoreError::Validation(format!(
                "doc type '{}' does not exist",
                rule.doc_type
            )));
        }
        let duplicate = self.rules.values().any(|r| {
            Some(r.id) != skip
                && r.role_id == rule.role_id
                && r.doc_type == rule.doc_type
                && r.permission_level == rule.permission_level
        });
        if duplicate {
            return Err(StoreError::conflict(
                PERMISSION_RULE_EXISTS,
                format!(
                    "role {} already has a rule for '{}' at level {}",
                    rule.role_id, rule.doc_type, rule.permission_level
                ),
            ));
        }
        Ok(())
    }

    fn check_user_permission(
        &self,
        p: &NewUserPermission,
        skip: Option<UserPermissionId>,
    ) -> Result<(), StoreError> {
        if !self.users.contains(&p.user_id) {
            return Err(StoreError::Validation(format!("user {} does not exist", p.user_id)));
        }
        let duplicate = self.user_permissions.values().any(|u| {
            Some(u.id) != skip
                && u.user_id == p.user_id
                && u.doc_type == p.doc_type
                && u.allowed_value == p.allowed_value
                && u.for_value == p.for_value
        });
        if duplicate {
            return Err(StoreError::conflict(
                USER_PERMISSION_EXISTS,
                "identical user permission already exists",
            ));
        }
        Ok(())
    }

    fn check_field_level(
        &self,
        f: &NewFieldPermissionLevel,
        skip: Option<FieldLevelId>,
    ) -> Result<(), StoreError> {
        if !self.doc_types.contains_key(&f.doc_type) {
            return Err(StoreError::Validation(format!(
                "doc type '{}' does not exist",
                f.doc_type
            )));
        }
        let duplicate = self.field_levels.values().any(|existing| {
            Some(existing.id) != skip
                && existing.doc_type == f.doc_type
                && existing.field_name == f.field_name
        });
        if duplicate {
            return Err(StoreError::conflict(
                FIELD_LEVEL_EXISTS,
                format!("field '{}.{}' is already classified", f.doc_type, f.field_name),
            ));
        }
        Ok(())
    }

    fn enabled_roles(&self, user_id: UserId) -> Vec<&Role> {
        let mut roles: Vec<&Role> = self
            .assignments
            .iter()
            .filter(|(u, _)| *u == user_id)
            .filter_map(|(_, r)| self.roles.get(r))
            .filter(|r| r.enabled)
            .collect();
        roles.sort_by_key(|r| (r.sort_order, r.id));
        roles
    }
}

/// In-memory permission store.
///
/// Intended for tests/dev and single-process deployments. Enforces the same
/// uniqueness and reference rules as the relational schema.
#[derive(Debug, Default)]
pub struct InMemoryPermissionStore {
    state: RwLock<State>,
}

impl InMemoryPermissionStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn read(&self) -> Result<RwLockReadGuard<'_, State>, StoreError> {
        self.state
            .read()
            .map_err(|_| StoreError::Backend("lock poisoned".to_string()))
    }

    fn write(&self) -> Result<RwLockWriteGuard<'_, State>, StoreError> {
        self.state
            .write()
            .map_err(|_| StoreError::Backend("lock poisoned".to_string()))
    }

    /// Seed or replace a role (roles are managed outside this crate).
    pub fn insert_role(&self, role: Role) -> Result<(), StoreError> {
        self.write()?.roles.insert(role.id, role);
        Ok(())
    }

    /// Make a user id known (users are managed outside this crate).
    pub fn register_user(&self, user_id: UserId) -> Result<(), StoreError> {
        self.write()?.users.insert(user_id);
        Ok(())
    }
}

#[async_trait]
impl PermissionStore for InMemoryPermissionStore {
    async fn get_doc_type(&self, name: &str) -> Result<DocType, StoreError> {
        self.read()?
            .doc_types
            .get(name)
            .cloned()
            .ok_or_else(|| StoreError::NotFound(format!("doc type '{name}'")))
    }

    async fn list_doc_types(&self) -> Result<Vec<DocType>, StoreError> {
        Ok(self.read()?.doc_types.values().cloned().collect())
    }

    async fn create_doc_type(&self, mut doc_type: DocType) -> Result<DocType, StoreError> {
        let mut state = self.write()?;
        if state.doc_types.contains_key(&doc_type.name) {
            return Err(StoreError::conflict(
                DOCTYPE_EXISTS,
                format!("doc type '{}' already exists", doc_type.name),
            ));
        }
        doc_type.version = 1;
        state.doc_types.insert(doc_type.name.clone(), doc_type.clone());
        Ok(doc_type)
    }

    async fn update_doc_type(&self, mut doc_type: DocType) -> Result<DocType, StoreError> {
        let mut state = self.write()?;
        let current = state
            .doc_types
            .get_mut(&doc_type.name)
            .ok_or_else(|| StoreError::NotFound(format!("doc type '{}'", doc_type.name)))?;
        doc_type.version = current.version + 1;
        *current = doc_type.clone();
        Ok(doc_type)
    }

    async fn delete_doc_type(&self, name: &str) -> Result<DocType, StoreError> {
        let mut state = self.write()?;
        if state.rules.values().any(|r| r.doc_type == name) {
            return Err(StoreError::conflict(
                DOCTYPE_IN_USE,
                format!("doc type '{name}' is referenced by permission rules"),
            ));
        }
        let removed = state
            .doc_types
            .remove(name)
            .ok_or_else(|| StoreError::NotFound(format!("doc type '{name}'")))?;
        state.field_levels.retain(|_, f| f.doc_type != name);
        Ok(removed)
    }

    async fn count_rules_for_doc_type(&self, doc_type: &str) -> Result<u64, StoreError> {
        Ok(self
            .read()?
            .rules
            .values()
            .filter(|r| r.doc_type == doc_type)
            .count() as u64)
    }

    async fn get_user_roles(&self, user_id: UserId) -> Result<Vec<RoleRef>, StoreError> {
        Ok(self
            .read()?
            .enabled_roles(user_id)
            .into_iter()
            .map(Role::to_ref)
            .collect())
    }

    async fn assign_user_role(&self, user_id: UserId, role_id: RoleId) -> Result<(), StoreError> {
        let mut state = self.write()?;
        if !state.users.contains(&user_id) {
            return Err(StoreError::Validation(format!("user {user_id} does not exist")));
        }
        if !state.roles.contains_key(&role_id) {
            return Err(StoreError::Validation(format!("role {role_id} does not exist")));
        }
        if !state.assignments.insert((user_id, role_id)) {
            return Err(StoreError::conflict(
                ROLE_ASSIGNMENT_EXISTS,
                format!("user {user_id} already has role {role_id}"),
            ));
        }
        Ok(())
    }

    async fn revoke_user_role(&self, user_id: UserId, role_id: RoleId) -> Result<(), StoreError> {
        if self.write()?.assignments.remove(&(user_id, role_id)) {
            Ok(())
        } else {
            Err(StoreError::NotFound(format!(
                "role {role_id} assignment for user {user_id}"
            )))
        }
    }

    async fn get_rule(&self, id: RuleId) -> Result<PermissionRule, StoreError> {
        self.read()?
            .rules
            .get(&id)
            .cloned()
            .ok_or_else(|| StoreError::NotFound(format!("permission rule {id}")))
    }

    async fn list_rules_by_role_and_doc_type(
        &self,
        role_id: RoleId,
        doc_type: &str,
    ) -> Result<Vec<PermissionRule>, StoreError> {
        let mut rules: Vec<PermissionRule> = self
            .read()?
            .rules
            .values()
            .filter(|r| r.role_id == role_id && r.doc_type == doc_type)
            .cloned()
            .collect();
        rules.sort_by_key(|r| (r.permission_level, r.id));
        Ok(rules)
    }

    async fn list_rules_by_role(&self, role_id: RoleId) -> Result<Vec<PermissionRule>, StoreError> {
        Ok(self
            .read()?
            .rules
            .values()
            .filter(|r| r.role_id == role_id)
            .cloned()
            .collect())
    }

    async fn list_rules_by_doc_type(&self, doc_type: &str) -> Result<Vec<PermissionRule>, StoreError> {
        Ok(self
            .read()?
            .rules
            .values()
            .filter(|r| r.doc_type == doc_type)
            .cloned()
            .collect())
    }

    async fn create_rule(&self, rule: NewPermissionRule) -> Result<PermissionRule, StoreError> {
        let mut state = self.write()?;
        state.check_rule(&rule, None)?;
        let id = RuleId::new(state.next_id());
        let stored = rule.into_rule(id);
        state.rules.insert(id, stored.clone());
        Ok(stored)
    }

    async fn create_rules_batch(
        &self,
        rules: Vec<NewPermissionRule>,
    ) -> Result<Vec<PermissionRule>, StoreError> {
        let mut state = self.write()?;
        let snapshot = (state.rules.clone(), state.next_id);
        let mut created = Vec::with_capacity(rules.len());

        for rule in rules {
            if let Err(e) = state.check_rule(&rule, None) {
                (state.rules, state.next_id) = snapshot;
                return Err(e);
            }
            let id = RuleId::new(state.next_id());
            let stored = rule.into_rule(id);
            state.rules.insert(id, stored.clone());
            created.push(stored);
        }
        Ok(created)
    }

    async fn update_rule(
        &self,
        id: RuleId,
        rule: NewPermissionRule,
    ) -> Result<(PermissionRule, PermissionRule), StoreError> {
        let mut state = self.write()?;
        let previous = state
            .rules
            .get(&id)
            .cloned()
            .ok_or_else(|| StoreError::NotFound(format!("permission rule {id}")))?;
        state.check_rule(&rule, Some(id))?;
        let updated = rule.into_rule(id);
        state.rules.insert(id, updated.clone());
        Ok((previous, updated))
    }

    async fn delete_rule(&self, id: RuleId) -> Result<PermissionRule, StoreError> {
        self.write()?
            .rules
            .remove(&id)
            .ok_or_else(|| StoreError::NotFound(format!("permission rule {id}")))
    }

    async fn get_min_permission_level(
        &self,
        user_id: UserId,
        doc_type: &str,
    ) -> Result<PermissionLevel, StoreError> {
        let state = self.read()?;
        let role_ids: HashSet<RoleId> = state.enabled_roles(user_id).iter().map(|r| r.id).collect();
        let level = erpguard_auth::authorize::min_level(
            state
                .rules
                .values()
                .filter(|r| r.doc_type == doc_type && role_ids.contains(&r.role_id)),
        );
        Ok(level.unwrap_or(PermissionLevel::DOCUMENT))
    }

    async fn list_field_levels(&self, doc_type: &str) -> Result<Vec<FieldPermissionLevel>, StoreError> {
        let mut levels: Vec<FieldPermissionLevel> = self
            .read()?
            .field_levels
            .values()
            .filter(|f| f.doc_type == doc_type)
            .cloned()
            .collect();
        levels.sort_by(|a, b| a.field_name.cmp(&b.field_name));
        Ok(levels)
    }

    async fn create_field_level(
        &self,
        level: NewFieldPermissionLevel,
    ) -> Result<FieldPermissionLevel, StoreError> {
        let mut state = self.write()?;
        state.check_field_level(&level, None)?;
        let id = FieldLevelId::new(state.next_id());
        let stored = level.into_level(id);
        state.field_levels.insert(id, stored.clone());
        Ok(stored)
    }

    async fn update_field_level(
        &self,
        id: FieldLevelId,
        level: NewFieldPermissionLevel,
    ) -> Result<(FieldPermissionLevel, FieldPermissionLevel), StoreError> {
        let mut state = self.write()?;
        let previous = state
            .field_levels
            .get(&id)
            .cloned()
            .ok_or_else(|| StoreError::NotFound(format!("field permission level {id}")))?;
        state.check_field_level(&level, Some(id))?;
        let updated = level.into_level(id);
        state.field_levels.insert(id, updated.clone());
        Ok((previous, updated))
    }

    async fn delete_field_level(&self, id: FieldLevelId) -> Result<FieldPermissionLevel, StoreError> {
        self.write()?
            .field_levels
            .remove(&id)
            .ok_or_else(|| StoreError::NotFound(format!("field permission level {id}")))
    }

    async fn get_user_permission(&self, id: UserPermissionId) -> Result<UserPermission, StoreError> {
        self.read()?
            .user_permissions
            .get(&id)
            .cloned()
            .ok_or_else(|| StoreError::NotFound(format!("user permission {id}")))
    }

    async fn list_user_permissions(
        &self,
        user_id: UserId,
        doc_type: &str,
        page: Page,
    ) -> Result<Vec<UserPermission>, StoreError> {
        Ok(self
            .read()?
            .user_permissions
            .values()
            .filter(|p| p.user_id == user_id && p.doc_type == doc_type)
            .skip(page.offset() as usize)
            .take(page.size as usize)
            .cloned()
            .collect())
    }

    async fn count_user_permissions(&self, user_id: UserId, doc_type: &str) -> Result<u64, StoreError> {
        Ok(self
            .read()?
            .user_permissions
            .values()
            .filter(|p| p.user_id == user_id && p.doc_type == doc_type)
            .count() as u64)
    }

    async fn create_user_permission(
        &self,
        permission: NewUserPermission,
    ) -> Result<UserPermission, StoreError> {
        let mut state = self.write()?;
        state.check_user_permission(&permission, None)?;
        let id = UserPermissionId::new(state.next_id());
        let stored = permission.into_permission(id);
        state.user_permissions.insert(id, stored.clone());
        Ok(stored)
    }

    async fn create_user_permissions_batch(
        &self,
        permissions: Vec<NewUserPermission>,
    ) -> Result<Vec<UserPermission>, StoreError> {
        let mut state = self.write()?;
        let snapshot = (state.user_permissions.clone(), state.next_id);
        let mut created = Vec::with_capacity(permissions.len());

        for permission in permissions {
            if let Err(e) = state.check_user_permission(&permission, None) {
                (state.user_permissions, state.next_id) = snapshot;
                return Err(e);
            }
            let id = UserPermissionId::new(state.next_id());
            let stored = permission.into_permission(id);
            state.user_permissions.insert(id, stored.clone());
            created.push(stored);
        }
        Ok(created)
    }

    async fn update_user_permission(
        &self,
        id: UserPermissionId,
        permission: NewUserPermission,
    ) -> Result<(UserPermission, UserPermission), StoreError> {
        let mut state = self.write()?;
        let previous = state
            .user_permissions
            .get(&id)
            .cloned()
            .ok_or_else(|| StoreError::NotFound(format!("user permission {id}")))?;
        state.check_user_permission(&permission, Some(id))?;
        let updated = permission.into_permission(id);
        state.user_permissions.insert(id, updated.clone());
        Ok((previous, updated))
    }

    async fn delete_user_permission(&self, id: UserPermissionId) -> Result<UserPermission, StoreError> {
        self.write()?
            .user_permissions
            .remove(&id)
            .ok_or_else(|| StoreError::NotFound(format!("user permission {id}")))
    }

    async fn append_workflow_state(
        &self,
        state: NewWorkflowState,
    ) -> Result<DocumentWorkflowState, StoreError> {
        let mut inner = self.write()?;
        let id = WorkflowStateId::new(inner.next_id());
        let row = state.into_row(id, Utc::now());
        inner.workflow.push(row.clone());
        Ok(row)
    }

    async fn workflow_history(
        &self,
        doc_type: &str,
        doc_name: &str,
    ) -> Result<Vec<DocumentWorkflowState>, StoreError> {
        let mut rows: Vec<DocumentWorkflowState> = self
            .read()?
            .workflow
            .iter()
            .filter(|r| r.doc_type == doc_type && r.doc_name == doc_name)
            .cloned()
            .collect();
        rows.sort_by(|a, b| (b.created_at, b.id).cmp(&(a.created_at, a.id)));
        Ok(rows)
    }

    async fn current_workflow_state(
        &self,
        doc_type: &str,
        doc_name: &str,
    ) -> Result<Option<DocumentWorkflowState>, StoreError> {
        let state = self.read()?;
        let rows: Vec<DocumentWorkflowState> = state
            .workflow
            .iter()
            .filter(|r| r.doc_type == doc_type && r.doc_name == doc_name)
            .cloned()
            .collect();
        Ok(erpguard_auth::current_state(&rows).cloned())
    }
}
