//! Cache-aware repository over a [`PermissionStore`].
//!
//! Reads go local tier, shared tier, storage, and populate both tiers on a
//! miss. Writes go to storage first, then clear the narrow keys of the mutated
//! entity, then the pattern families that derive from it, then return.
//! Invalidation failures are logged by the cache and never fail the write.

use std::collections::{BTreeMap, BTreeSet};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, info, instrument};

use erpguard_auth::{
    DocType, DocumentWorkflowState, FieldPermissionLevel, NewFieldPermissionLevel,
    NewPermissionRule, NewUserPermission, NewWorkflowState, Page, PermissionLevel,
    PermissionRule, RequestContext, RoleRef, UserPermission, authorize,
};
use erpguard_core::{DomainError, FieldLevelId, RoleId, RuleId, UserId, UserPermissionId};

use crate::cache::{PermissionCache, keys};
use crate::store::{DOCTYPE_IN_USE, PermissionStore, StoreError};

pub struct CachedPermissionRepository {
    store: Arc<dyn PermissionStore>,
    cache: Arc<PermissionCache>,
}

impl CachedPermissionRepository {
    pub fn new(store: Arc<dyn PermissionStore>, cache: Arc<PermissionCache>) -> Self {
        Self { store, cache }
    }

    pub fn cache(&self) -> &PermissionCache {
        &self.cache
    }

    /// Run a storage call under the request's cancellation and deadline.
    async fn storage<T, F>(&self, ctx: &RequestContext, fut: F) -> Result<T, DomainError>
    where
        F: Future<Output = Result<T, StoreError>>,
    {
        ctx.guard(fut).await?.map_err(DomainError::from)
    }

    // ---------------------------------------------------------------------
    // Read-through
    // ---------------------------------------------------------------------

    /// Unknown doc types are `NotFound` and are not cached.
    pub async fn get_doc_type(&self, ctx: &RequestContext, name: &str) -> Result<DocType, DomainError> {
        if let Some(doc_type) = self.cache.doctype(ctx, name).await {
            return Ok(doc_type);
        }
        let seen = self.cache.generation(&keys::doctype(name));
        let doc_type = self.storage(ctx, self.store.get_doc_type(name)).await?;
        self.cache.set_doctype(ctx, &doc_type, seen).await;
        Ok(doc_type)
    }

    pub async fn list_doc_types(&self, ctx: &RequestContext) -> Result<Vec<DocType>, DomainError> {
        self.storage(ctx, self.store.list_doc_types()).await
    }

    pub async fn get_user_roles(
        &self,
        ctx: &RequestContext,
        user_id: UserId,
    ) -> Result<Vec<RoleRef>, DomainError> {
        if let Some(roles) = self.cache.user_roles(ctx, user_id).await {
            return Ok(roles);
        }
        let seen = self.cache.generation(&keys::user_roles(user_id));
        let roles = self.storage(ctx, self.store.get_user_roles(user_id)).await?;
        self.cache.set_user_roles(ctx, user_id, &roles, seen).await;
        Ok(roles)
    }

    pub async fn list_rules(
        &self,
        ctx: &RequestContext,
        role_id: RoleId,
        doc_type: &str,
    ) -> Result<Vec<PermissionRule>, DomainError> {
        if let Some(rules) = self.cache.role_rules(ctx, role_id, doc_type).await {
            return Ok(rules);
        }
        let seen = self.cache.generation(&keys::role_rules(role_id, doc_type));
        let rules = self
            .storage(ctx, self.store.list_rules_by_role_and_doc_type(role_id, doc_type))
            .await?;
        self.cache.set_role_rules(ctx, role_id, doc_type, &rules, seen).await;
        Ok(rules)
    }

    pub async fn get_rule(&self, ctx: &RequestContext, id: RuleId) -> Result<PermissionRule, DomainError> {
        self.storage(ctx, self.store.get_rule(id)).await
    }

    pub async fn list_rules_by_role(
        &self,
        ctx: &RequestContext,
        role_id: RoleId,
    ) -> Result<Vec<PermissionRule>, DomainError> {
        self.storage(ctx, self.store.list_rules_by_role(role_id)).await
    }

    pub async fn list_rules_by_doc_type(
        &self,
        ctx: &RequestContext,
        doc_type: &str,
    ) -> Result<Vec<PermissionRule>, DomainError> {
        self.storage(ctx, self.store.list_rules_by_doc_type(doc_type)).await
    }

    pub async fn get_min_permission_level(
        &self,
        ctx: &RequestContext,
        user_id: UserId,
        doc_type: &str,
    ) -> Result<PermissionLevel, DomainError> {
        if let Some(level) = self.cache.user_level(ctx, user_id, doc_type).await {
            return Ok(level);
        }
        let seen = self.cache.generation(&keys::user_level(user_id, doc_type));
        let level = self
            .storage(ctx, self.store.get_min_permission_level(user_id, doc_type))
            .await?;
        self.cache.set_user_level(ctx, user_id, doc_type, level, seen).await;
        Ok(level)
    }

    /// Field name to level for one doc type.
    pub async fn field_levels(
        &self,
        ctx: &RequestContext,
        doc_type: &str,
    ) -> Result<BTreeMap<String, PermissionLevel>, DomainError> {
        if let Some(levels) = self.cache.field_levels(ctx, doc_type).await {
            return Ok(levels);
        }
        let seen = self.cache.generation(&keys::field_levels(doc_type));
        let rows = self.storage(ctx, self.store.list_field_levels(doc_type)).await?;
        let levels = authorize::field_level_map(&rows);
        self.cache.set_field_levels(ctx, doc_type, &levels, seen).await;
        Ok(levels)
    }

    pub async fn list_field_levels(
        &self,
        ctx: &RequestContext,
        doc_type: &str,
    ) -> Result<Vec<FieldPermissionLevel>, DomainError> {
        self.storage(ctx, self.store.list_field_levels(doc_type)).await
    }

    /// `docType.action` codes the user's roles grant at document level.
    pub async fn user_permission_codes(
        &self,
        ctx: &RequestContext,
        user_id: UserId,
    ) -> Result<Vec<String>, DomainError> {
        if let Some(codes) = self.cache.user_perms(ctx, user_id).await {
            return Ok(codes);
        }

        let seen = self.cache.generation(&keys::user_perms(user_id));
        let roles = self.get_user_roles(ctx, user_id).await?;
        let mut rules = Vec::new();
        for role in &roles {
            rules.extend(self.storage(ctx, self.store.list_rules_by_role(role.id)).await?);
        }
        let codes = authorize::permission_codes(&rules);
        self.cache.set_user_perms(ctx, user_id, &codes, seen).await;
        Ok(codes)
    }

    pub async fn get_user_permission(
        &self,
        ctx: &RequestContext,
        id: UserPermissionId,
    ) -> Result<UserPermission, DomainError> {
        self.storage(ctx, self.store.get_user_permission(id)).await
    }

    /// One page plus the total count.
    pub async fn list_user_permissions(
        &self,
        ctx: &RequestContext,
        user_id: UserId,
        doc_type: &str,
        page: Page,
    ) -> Result<(Vec<UserPermission>, u64), DomainError> {
        let rows = self
            .storage(ctx, self.store.list_user_permissions(user_id, doc_type, page))
            .await?;
        let total = self
            .storage(ctx, self.store.count_user_permissions(user_id, doc_type))
            .await?;
        Ok((rows, total))
    }

    /// Every restriction for (user, doc type), read straight from storage.
    pub async fn user_restrictions(
        &self,
        ctx: &RequestContext,
        user_id: UserId,
        doc_type: &str,
    ) -> Result<Vec<UserPermission>, DomainError> {
        let mut all = Vec::new();
        let mut page = Page::new(1, Page::MAX_SIZE);
        loop {
            let batch = self
                .storage(ctx, self.store.list_user_permissions(user_id, doc_type, page))
                .await?;
            let short = batch.len() < page.size as usize;
            all.extend(batch);
            if short {
                return Ok(all);
            }
            page = Page::new(page.page + 1, page.size);
        }
    }

    pub async fn is_session_revoked(&self, ctx: &RequestContext, session_id: &str) -> bool {
        self.cache.is_revoked(ctx, session_id).await
    }

    pub async fn revoke_session(&self, ctx: &RequestContext, session_id: &str, ttl: Duration) {
        info!(session_id, "session revoked");
        self.cache.revoke(ctx, session_id, ttl).await;
    }

    pub async fn workflow_history(
        &self,
        ctx: &RequestContext,
        doc_type: &str,
        doc_name: &str,
    ) -> Result<Vec<DocumentWorkflowState>, DomainError> {
        self.storage(ctx, self.store.workflow_history(doc_type, doc_name)).await
    }

    pub async fn current_workflow_state(
        &self,
        ctx: &RequestContext,
        doc_type: &str,
        doc_name: &str,
    ) -> Result<Option<DocumentWorkflowState>, DomainError> {
        self.storage(ctx, self.store.current_workflow_state(doc_type, doc_name))
            .await
    }

    // ---------------------------------------------------------------------
    // Writers
    // ---------------------------------------------------------------------

    #[instrument(skip(self, ctx, doc_type), fields(doc_type = %doc_type.name), err)]
    pub async fn create_doc_type(
        &self,
        ctx: &RequestContext,
        doc_type: DocType,
    ) -> Result<DocType, DomainError> {
        doc_type.validate()?;
        let created = self.storage(ctx, self.store.create_doc_type(doc_type)).await?;
        self.cache.invalidate(ctx, &keys::doctype(&created.name)).await;
        info!(doc_type = %created.name, "doc type created");
        Ok(created)
    }

    #[instrument(skip(self, ctx, doc_type), fields(doc_type = %doc_type.name), err)]
    pub async fn update_doc_type(
        &self,
        ctx: &RequestContext,
        doc_type: DocType,
    ) -> Result<DocType, DomainError> {
        doc_type.validate()?;
        let updated = self.storage(ctx, self.store.update_doc_type(doc_type)).await?;
        self.cache.invalidate(ctx, &keys::doctype(&updated.name)).await;
        info!(doc_type = %updated.name, version = updated.version, "doc type updated");
        Ok(updated)
    }

    #[instrument(skip(self, ctx), err)]
    pub async fn delete_doc_type(&self, ctx: &RequestContext, name: &str) -> Result<DocType, DomainError> {
        let referenced = self
            .storage(ctx, self.store.count_rules_for_doc_type(name))
            .await?;
        if referenced > 0 {
            return Err(DomainError::conflict(
                DOCTYPE_IN_USE,
                format!("doc type '{name}' is referenced by {referenced} permission rules"),
            ));
        }

        let removed = self.storage(ctx, self.store.delete_doc_type(name)).await?;
        self.cache.invalidate(ctx, &keys::doctype(&removed.name)).await;
        self.cache.invalidate(ctx, &keys::field_levels(&removed.name)).await;
        info!(doc_type = %removed.name, "doc type deleted");
        Ok(removed)
    }

    #[instrument(skip(self, ctx), fields(user_id = %user_id, role_id = %role_id), err)]
    pub async fn assign_user_role(
        &self,
        ctx: &RequestContext,
        user_id: UserId,
        role_id: RoleId,
    ) -> Result<(), DomainError> {
        self.storage(ctx, self.store.assign_user_role(user_id, role_id))
            .await?;
        self.invalidate_user(ctx, user_id).await;
        info!("role assigned");
        Ok(())
    }

    #[instrument(skip(self, ctx), fields(user_id = %user_id, role_id = %role_id), err)]
    pub async fn revoke_user_role(
        &self,
        ctx: &RequestContext,
        user_id: UserId,
        role_id: RoleId,
    ) -> Result<(), DomainError> {
        self.storage(ctx, self.store.revoke_user_role(user_id, role_id))
            .await?;
        self.invalidate_user(ctx, user_id).await;
        info!("role revoked");
        Ok(())
    }

    #[instrument(skip(self, ctx, rule), fields(role_id = %rule.role_id, doc_type = %rule.doc_type), err)]
    pub async fn create_rule(
        &self,
        ctx: &RequestContext,
        rule: NewPermissionRule,
    ) -> Result<PermissionRule, DomainError> {
        rule.validate()?;
        let created = self.storage(ctx, self.store.create_rule(rule)).await?;
        self.invalidate_rule_scopes(ctx, [(created.role_id, created.doc_type.clone())].into())
            .await;
        info!(rule_id = %created.id, "permission rule created");
        Ok(created)
    }

    /// Atomic. Invalidates once per distinct (role, doc type) after commit.
    #[instrument(skip(self, ctx, rules), fields(count = rules.len()), err)]
    pub async fn create_rules_batch(
        &self,
        ctx: &RequestContext,
        rules: Vec<NewPermissionRule>,
    ) -> Result<Vec<PermissionRule>, DomainError> {
        for rule in &rules {
            rule.validate()?;
        }
        let created = self.storage(ctx, self.store.create_rules_batch(rules)).await?;
        let scopes = created
            .iter()
            .map(|r| (r.role_id, r.doc_type.clone()))
            .collect();
        self.invalidate_rule_scopes(ctx, scopes).await;
        info!(created = created.len(), "permission rules created");
        Ok(created)
    }

    #[instrument(skip(self, ctx, rule), fields(rule_id = %id), err)]
    pub async fn update_rule(
        &self,
        ctx: &RequestContext,
        id: RuleId,
        rule: NewPermissionRule,
    ) -> Result<PermissionRule, DomainError> {
        rule.validate()?;
        let (previous, updated) = self.storage(ctx, self.store.update_rule(id, rule)).await?;
        let scopes = [
            (previous.role_id, previous.doc_type),
            (updated.role_id, updated.doc_type.clone()),
        ]
        .into();
        self.invalidate_rule_scopes(ctx, scopes).await;
        info!("permission rule updated");
        Ok(updated)
    }

    #[instrument(skip(self, ctx), fields(rule_id = %id), err)]
    pub async fn delete_rule(&self, ctx: &RequestContext, id: RuleId) -> Result<PermissionRule, DomainError> {
        let removed = self.storage(ctx, self.store.delete_rule(id)).await?;
        self.invalidate_rule_scopes(ctx, [(removed.role_id, removed.doc_type.clone())].into())
            .await;
        info!("permission rule deleted");
        Ok(removed)
    }

    #[instrument(skip(self, ctx, level), fields(doc_type = %level.doc_type, field = %level.field_name), err)]
    pub async fn create_field_level(
        &self,
        ctx: &RequestContext,
        level: NewFieldPermissionLevel,
    ) -> Result<FieldPermissionLevel, DomainError> {
        level.validate()?;
        let created = self.storage(ctx, self.store.create_field_level(level)).await?;
        self.cache.invalidate(ctx, &keys::field_levels(&created.doc_type)).await;
        info!(field_level_id = %created.id, "field level created");
        Ok(created)
    }

    #[instrument(skip(self, ctx, level), fields(field_level_id = %id), err)]
    pub async fn update_field_level(
        &self,
        ctx: &RequestContext,
        id: FieldLevelId,
        level: NewFieldPermissionLevel,
    ) -> Result<FieldPermissionLevel, DomainError> {
        level.validate()?;
        let (previous, updated) = self
            .storage(ctx, self.store.update_field_level(id, level))
            .await?;
        self.cache.invalidate(ctx, &keys::field_levels(&previous.doc_type)).await;
        if updated.doc_type != previous.doc_type {
            self.cache.invalidate(ctx, &keys::field_levels(&updated.doc_type)).await;
        }
        info!("field level updated");
        Ok(updated)
    }

    #[instrument(skip(self, ctx), fields(field_level_id = %id), err)]
    pub async fn delete_field_level(
        &self,
        ctx: &RequestContext,
        id: FieldLevelId,
    ) -> Result<FieldPermissionLevel, DomainError> {
        let removed = self.storage(ctx, self.store.delete_field_level(id)).await?;
        self.cache.invalidate(ctx, &keys::field_levels(&removed.doc_type)).await;
        info!("field level deleted");
        Ok(removed)
    }

    // Restrictions are never cached, so their writers have nothing to clear.

    #[instrument(skip(self, ctx, permission), fields(user_id = %permission.user_id), err)]
    pub async fn create_user_permission(
        &self,
        ctx: &RequestContext,
        permission: NewUserPermission,
    ) -> Result<UserPermission, DomainError> {
        permission.validate()?;
        let created = self
            .storage(ctx, self.store.create_user_permission(permission))
            .await?;
        info!(user_permission_id = %created.id, "user permission created");
        Ok(created)
    }

    #[instrument(skip(self, ctx, permissions), fields(count = permissions.len()), err)]
    pub async fn create_user_permissions_batch(
        &self,
        ctx: &RequestContext,
        permissions: Vec<NewUserPermission>,
    ) -> Result<Vec<UserPermission>, DomainError> {
        for permission in &permissions {
            permission.validate()?;
        }
        let created = self
            .storage(ctx, self.store.create_user_permissions_batch(permissions))
            .await?;
        info!(created = created.len(), "user permissions created");
        Ok(created)
    }

    #[instrument(skip(self, ctx, permission), fields(user_permission_id = %id), err)]
    pub async fn update_user_permission(
        &self,
        ctx: &RequestContext,
        id: UserPermissionId,
        permission: NewUserPermission,
    ) -> Result<UserPermission, DomainError> {
        permission.validate()?;
        let (_, updated) = self
            .storage(ctx, self.store.update_user_permission(id, permission))
            .await?;
        info!("user permission updated");
        Ok(updated)
    }

    #[instrument(skip(self, ctx), fields(user_permission_id = %id), err)]
    pub async fn delete_user_permission(
        &self,
        ctx: &RequestContext,
        id: UserPermissionId,
    ) -> Result<UserPermission, DomainError> {
        let removed = self.storage(ctx, self.store.delete_user_permission(id)).await?;
        info!("user permission deleted");
        Ok(removed)
    }

    #[instrument(skip(self, ctx, state), fields(doc_type = %state.doc_type, doc_name = %state.doc_name), err)]
    pub async fn append_workflow_state(
        &self,
        ctx: &RequestContext,
        state: NewWorkflowState,
    ) -> Result<DocumentWorkflowState, DomainError> {
        state.validate()?;
        let row = self.storage(ctx, self.store.append_workflow_state(state)).await?;
        info!(state = %row.state, "workflow state recorded");
        Ok(row)
    }

    // ---------------------------------------------------------------------
    // Invalidation
    // ---------------------------------------------------------------------

    /// Narrow `user_roles` key, then every `user_*` key of that user.
    async fn invalidate_user(&self, ctx: &RequestContext, user_id: UserId) {
        self.cache.invalidate(ctx, &keys::user_roles(user_id)).await;
        for pattern in keys::user_families(user_id) {
            self.cache.invalidate_pattern(ctx, &pattern).await;
        }
    }

    /// Narrow `role_rules` keys first, then the derived `user_level` family of
    /// each doc type, then every `user_perms` entry.
    async fn invalidate_rule_scopes(&self, ctx: &RequestContext, scopes: BTreeSet<(RoleId, String)>) {
        for (role_id, doc_type) in &scopes {
            self.cache
                .invalidate(ctx, &keys::role_rules(*role_id, doc_type))
                .await;
        }

        let doc_types: BTreeSet<&str> = scopes.iter().map(|(_, dt)| dt.as_str()).collect();
        for doc_type in doc_types {
            self.cache
                .invalidate_pattern(ctx, &keys::user_levels_for_doc_type(doc_type))
                .await;
        }
        self.cache.invalidate_pattern(ctx, &keys::all_user_perms()).await;
        debug!(scopes = scopes.len(), "rule caches invalidated");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::CacheConfig;
    use crate::store::InMemoryPermissionStore;
    use erpguard_auth::{Action, ActionFlags, Role, RoleCode};

    fn rule(role_id: i64, doc_type: &str, actions: &[Action]) -> NewPermissionRule {
        NewPermissionRule {
            role_id: RoleId::new(role_id),
            doc_type: doc_type.into(),
            permission_level: PermissionLevel::DOCUMENT,
            permissions: ActionFlags::default().with(actions),
            only_if_creator: false,
            condition: None,
        }
    }

    async fn fixture() -> CachedPermissionRepository {
        let store = InMemoryPermissionStore::new();
        for (id, code) in [(1, "manager"), (2, "clerk")] {
            store
                .insert_role(Role {
                    id: RoleId::new(id),
                    code: RoleCode::new(code),
                    name: code.to_string(),
                    is_system: false,
                    enabled: true,
                    sort_order: id as i32,
                })
                .unwrap();
        }
        store.register_user(UserId::new(1)).unwrap();
        store.assign_user_role(UserId::new(1), RoleId::new(1)).await.unwrap();
        store
            .create_doc_type(DocType::new("Invoice", "accounting"))
            .await
            .unwrap();

        let cache = Arc::new(PermissionCache::new(&CacheConfig::default()));
        CachedPermissionRepository::new(Arc::new(store), cache)
    }

    #[tokio::test]
    async fn read_through_populates_local_tier() {
        let repo = fixture().await;
        let ctx = RequestContext::background();

        assert!(repo.cache().local().is_empty());
        let roles = repo.get_user_roles(&ctx, UserId::new(1)).await.unwrap();
        assert_eq!(roles.len(), 1);
        assert!(repo.cache().user_roles(&ctx, UserId::new(1)).await.is_some());
    }

    #[tokio::test]
    async fn rule_writes_clear_cached_rules_and_levels() {
        let repo = fixture().await;
        let ctx = RequestContext::background();
        let user = UserId::new(1);

        assert!(repo.list_rules(&ctx, RoleId::new(1), "Invoice").await.unwrap().is_empty());
        repo.get_min_permission_level(&ctx, user, "Invoice").await.unwrap();
        repo.user_permission_codes(&ctx, user).await.unwrap();

        repo.create_rule(&ctx, rule(1, "Invoice", &[Action::Read]))
            .await
            .unwrap();

        assert!(repo.cache().role_rules(&ctx, RoleId::new(1), "Invoice").await.is_none());
        assert!(repo.cache().user_level(&ctx, user, "Invoice").await.is_none());
        assert!(repo.cache().user_perms(&ctx, user).await.is_none());
        assert_eq!(repo.list_rules(&ctx, RoleId::new(1), "Invoice").await.unwrap().len(), 1);
        assert_eq!(
            repo.user_permission_codes(&ctx, user).await.unwrap(),
            vec!["Invoice.read".to_string()]
        );
    }

    #[tokio::test]
    async fn role_assignment_clears_user_families_only_for_that_user() {
        let repo = fixture().await;
        let ctx = RequestContext::background();

        repo.get_user_roles(&ctx, UserId::new(1)).await.unwrap();
        repo.get_min_permission_level(&ctx, UserId::new(1), "Invoice").await.unwrap();
        repo.get_min_permission_level(&ctx, UserId::new(11), "Invoice").await.unwrap();

        repo.assign_user_role(&ctx, UserId::new(1), RoleId::new(2))
            .await
            .unwrap();

        assert!(repo.cache().user_roles(&ctx, UserId::new(1)).await.is_none());
        assert!(repo.cache().user_level(&ctx, UserId::new(1), "Invoice").await.is_none());
        assert!(repo.cache().user_level(&ctx, UserId::new(11), "Invoice").await.is_some());
        assert_eq!(repo.get_user_roles(&ctx, UserId::new(1)).await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn unknown_doc_type_is_not_found_and_not_cached() {
        let repo = fixture().await;
        let ctx = RequestContext::background();

        let err = repo.get_doc_type(&ctx, "Ghost").await.unwrap_err();
        assert!(matches!(err, DomainError::NotFound(_)));
        assert!(repo.cache().doctype(&ctx, "Ghost").await.is_none());
    }

    #[tokio::test]
    async fn doc_type_in_use_cannot_be_deleted() {
        let repo = fixture().await;
        let ctx = RequestContext::background();
        repo.create_rule(&ctx, rule(1, "Invoice", &[Action::Read]))
            .await
            .unwrap();

        let err = repo.delete_doc_type(&ctx, "Invoice").await.unwrap_err();
        assert_eq!(err.code(), DOCTYPE_IN_USE);
    }

    #[tokio::test]
    async fn invalid_rule_never_reaches_storage() {
        let repo = fixture().await;
        let ctx = RequestContext::background();
        let err = repo
            .create_rule(&ctx, rule(1, "Invoice", &[Action::Submit]))
            .await
            .unwrap_err();
        assert!(matches!(err, DomainError::Validation(_)));
        assert!(repo.list_rules_by_doc_type(&ctx, "Invoice").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn cancelled_request_surfaces_canceled() {
        let repo = fixture().await;
        let ctx = RequestContext::background();
        ctx.cancel();
        let err = repo.get_user_roles(&ctx, UserId::new(1)).await.unwrap_err();
        assert_eq!(err, DomainError::Canceled);
    }

    #[tokio::test]
    async fn revoked_sessions_are_remembered() {
        let repo = fixture().await;
        let ctx = RequestContext::background();
        assert!(!repo.is_session_revoked(&ctx, "s-1").await);
        repo.revoke_session(&ctx, "s-1", Duration::from_secs(60)).await;
        assert!(repo.is_session_revoked(&ctx, "s-1").await);
    }
}
