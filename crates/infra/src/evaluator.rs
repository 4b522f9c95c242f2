//! Permission evaluation over the cache-aware repository.
//!
//! - `check_permission`: roles, then rules per role, exact level match, deny by default
//! - `get_user_permission_level`: least read/write level held (0 when none)
//! - `get_accessible_fields`: field classifications against the user's level
//! - `filter_documents_by_permission`: row restrictions first, then field redaction
//!
//! Every operation resolves the doc type first so an unknown one is
//! `NotFound` rather than a silent deny.

use std::sync::Arc;

use tracing::{debug, instrument};

use erpguard_auth::{
    Action, Document, FieldAccess, PermissionLevel, RequestContext, authorize,
};
use erpguard_core::{DomainError, UserId};

use crate::repository::CachedPermissionRepository;

#[derive(Clone)]
pub struct PermissionEvaluator {
    repo: Arc<CachedPermissionRepository>,
}

impl PermissionEvaluator {
    pub fn new(repo: Arc<CachedPermissionRepository>) -> Self {
        Self { repo }
    }

    pub fn repository(&self) -> &CachedPermissionRepository {
        &self.repo
    }

    #[instrument(skip(self, ctx), fields(user_id = %user_id), err)]
    pub async fn check_permission(
        &self,
        ctx: &RequestContext,
        user_id: UserId,
        doc_type: &str,
        action: Action,
        level: PermissionLevel,
    ) -> Result<bool, DomainError> {
        self.repo.get_doc_type(ctx, doc_type).await?;

        let roles = self.repo.get_user_roles(ctx, user_id).await?;
        if roles.is_empty() {
            debug!("user has no roles; denying");
            return Ok(false);
        }

        for role in &roles {
            let rules = self.repo.list_rules(ctx, role.id, doc_type).await?;
            if authorize::rules_grant(&rules, action, level) {
                debug!(role = %role.code, "permission granted");
                return Ok(true);
            }
        }

        debug!("no rule grants the action; denying");
        Ok(false)
    }

    /// Like [`check_permission`](Self::check_permission) but a denial is
    /// `Forbidden` naming the action and doc type.
    pub async fn ensure_permission(
        &self,
        ctx: &RequestContext,
        user_id: UserId,
        doc_type: &str,
        action: Action,
        level: PermissionLevel,
    ) -> Result<(), DomainError> {
        if self
            .check_permission(ctx, user_id, doc_type, action, level)
            .await?
        {
            Ok(())
        } else {
            Err(DomainError::forbidden(action.as_str(), doc_type))
        }
    }

    #[instrument(skip(self, ctx), fields(user_id = %user_id), err)]
    pub async fn get_user_permission_level(
        &self,
        ctx: &RequestContext,
        user_id: UserId,
        doc_type: &str,
    ) -> Result<PermissionLevel, DomainError> {
        self.repo.get_doc_type(ctx, doc_type).await?;
        self.repo
            .get_min_permission_level(ctx, user_id, doc_type)
            .await
    }

    #[instrument(skip(self, ctx), fields(user_id = %user_id), err)]
    pub async fn get_accessible_fields(
        &self,
        ctx: &RequestContext,
        user_id: UserId,
        doc_type: &str,
    ) -> Result<Vec<FieldAccess>, DomainError> {
        let user_level = self.get_user_permission_level(ctx, user_id, doc_type).await?;
        let levels = self.repo.field_levels(ctx, doc_type).await?;
        Ok(authorize::accessible_fields(&levels, user_level))
    }

    /// Row restrictions are read from storage on every call; only the field
    /// map and the user's level come from the cache.
    #[instrument(skip(self, ctx, documents), fields(user_id = %user_id, count = documents.len()), err)]
    pub async fn filter_documents_by_permission(
        &self,
        ctx: &RequestContext,
        user_id: UserId,
        doc_type: &str,
        documents: Vec<Document>,
    ) -> Result<Vec<Document>, DomainError> {
        let user_level = self.get_user_permission_level(ctx, user_id, doc_type).await?;

        let restrictions = self.repo.user_restrictions(ctx, user_id, doc_type).await?;
        let mut visible = authorize::filter_rows(documents, &restrictions, doc_type);

        let levels = self.repo.field_levels(ctx, doc_type).await?;
        for doc in &mut visible {
            authorize::redact_document(doc, &levels, user_level);
        }

        debug!(visible = visible.len(), %user_level, "documents filtered");
        Ok(visible)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::time::Duration;

    use async_trait::async_trait;
    use serde_json::json;

    use super::*;
    use crate::cache::{CacheBackend, CacheError, CachedEntry, LocalCache, PermissionCache};
    use crate::config::CacheConfig;
    use crate::store::{InMemoryPermissionStore, PermissionStore};
    use erpguard_auth::{
        ActionFlags, DocType, NewFieldPermissionLevel, NewPermissionRule, NewUserPermission, Role,
        RoleCode,
    };
    use erpguard_core::RoleId;

    fn level(n: i64) -> PermissionLevel {
        PermissionLevel::new(n).unwrap()
    }

    fn rule(role_id: i64, doc_type: &str, lvl: i64, actions: &[Action]) -> NewPermissionRule {
        NewPermissionRule {
            role_id: RoleId::new(role_id),
            doc_type: doc_type.into(),
            permission_level: level(lvl),
            permissions: ActionFlags::default().with(actions),
            only_if_creator: false,
            condition: None,
        }
    }

    fn doc(value: serde_json::Value) -> Document {
        match value {
            serde_json::Value::Object(map) => map,
            other => panic!("not an object: {other}"),
        }
    }

    async fn seeded_store() -> Arc<InMemoryPermissionStore> {
        let store = InMemoryPermissionStore::new();
        store
            .insert_role(Role {
                id: RoleId::new(1),
                code: RoleCode::new("manager"),
                name: "Manager".into(),
                is_system: false,
                enabled: true,
                sort_order: 0,
            })
            .unwrap();
        for uid in [1, 2] {
            store.register_user(UserId::new(uid)).unwrap();
        }
        store
            .assign_user_role(UserId::new(1), RoleId::new(1))
            .await
            .unwrap();
        for name in ["TestDocument", "Invoice", "User"] {
            store.create_doc_type(DocType::new(name, "core")).await.unwrap();
        }
        Arc::new(store)
    }

    fn evaluator_over(store: Arc<InMemoryPermissionStore>, cache: PermissionCache) -> PermissionEvaluator {
        let repo = CachedPermissionRepository::new(store, Arc::new(cache));
        PermissionEvaluator::new(Arc::new(repo))
    }

    async fn evaluator() -> PermissionEvaluator {
        evaluator_over(
            seeded_store().await,
            PermissionCache::new(&CacheConfig::default()),
        )
    }

    #[tokio::test]
    async fn created_rule_is_visible_immediately() {
        let ev = evaluator().await;
        let ctx = RequestContext::background();
        let user = UserId::new(1);

        // Warm the cache with the empty rule set first.
        assert!(
            !ev.check_permission(&ctx, user, "TestDocument", Action::Read, level(0))
                .await
                .unwrap()
        );

        ev.repository()
            .create_rule(
                &ctx,
                rule(1, "TestDocument", 0, &[Action::Read, Action::Write, Action::Create]),
            )
            .await
            .unwrap();

        assert!(
            ev.check_permission(&ctx, user, "TestDocument", Action::Read, level(0))
                .await
                .unwrap()
        );
        assert!(
            !ev.check_permission(&ctx, user, "TestDocument", Action::Delete, level(0))
                .await
                .unwrap()
        );
    }

    #[tokio::test]
    async fn updated_rule_takes_effect_without_waiting_for_ttl() {
        let ev = evaluator().await;
        let ctx = RequestContext::background();
        let user = UserId::new(1);

        let created = ev
            .repository()
            .create_rule(
                &ctx,
                rule(1, "TestDocument", 0, &[Action::Read, Action::Write, Action::Create]),
            )
            .await
            .unwrap();
        assert!(
            !ev.check_permission(&ctx, user, "TestDocument", Action::Delete, level(0))
                .await
                .unwrap()
        );

        ev.repository()
            .update_rule(
                &ctx,
                created.id,
                rule(
                    1,
                    "TestDocument",
                    0,
                    &[Action::Read, Action::Write, Action::Create, Action::Delete],
                ),
            )
            .await
            .unwrap();

        assert!(
            ev.check_permission(&ctx, user, "TestDocument", Action::Delete, level(0))
                .await
                .unwrap()
        );
    }

    #[tokio::test]
    async fn deleted_rule_stops_granting() {
        let ev = evaluator().await;
        let ctx = RequestContext::background();
        let created = ev
            .repository()
            .create_rule(&ctx, rule(1, "Invoice", 0, &[Action::Read]))
            .await
            .unwrap();
        assert!(
            ev.check_permission(&ctx, UserId::new(1), "Invoice", Action::Read, level(0))
                .await
                .unwrap()
        );

        ev.repository().delete_rule(&ctx, created.id).await.unwrap();
        assert!(
            !ev.check_permission(&ctx, UserId::new(1), "Invoice", Action::Read, level(0))
                .await
                .unwrap()
        );
    }

    #[tokio::test]
    async fn user_without_rules_is_denied() {
        let ev = evaluator().await;
        let ctx = RequestContext::background();
        assert!(
            !ev.check_permission(&ctx, UserId::new(2), "Invoice", Action::Read, level(0))
                .await
                .unwrap()
        );
    }

    #[tokio::test]
    async fn grants_are_per_level() {
        let ev = evaluator().await;
        let ctx = RequestContext::background();
        ev.repository()
            .create_rule(&ctx, rule(1, "Invoice", 2, &[Action::Read]))
            .await
            .unwrap();

        let user = UserId::new(1);
        assert!(!ev.check_permission(&ctx, user, "Invoice", Action::Read, level(0)).await.unwrap());
        assert!(ev.check_permission(&ctx, user, "Invoice", Action::Read, level(2)).await.unwrap());
        assert!(!ev.check_permission(&ctx, user, "Invoice", Action::Write, level(2)).await.unwrap());
    }

    #[tokio::test]
    async fn unknown_doc_type_is_not_found() {
        let ev = evaluator().await;
        let ctx = RequestContext::background();
        let err = ev
            .check_permission(&ctx, UserId::new(1), "Nope", Action::Read, level(0))
            .await
            .unwrap_err();
        assert!(matches!(err, DomainError::NotFound(_)));
    }

    #[tokio::test]
    async fn ensure_permission_names_action_and_doc_type() {
        let ev = evaluator().await;
        let ctx = RequestContext::background();
        let err = ev
            .ensure_permission(&ctx, UserId::new(2), "Invoice", Action::Delete, level(0))
            .await
            .unwrap_err();
        assert_eq!(err, DomainError::forbidden("delete", "Invoice"));
    }

    #[tokio::test]
    async fn level_is_the_least_read_write_level() {
        let ev = evaluator().await;
        let ctx = RequestContext::background();
        let user = UserId::new(1);

        assert_eq!(
            ev.get_user_permission_level(&ctx, user, "User").await.unwrap(),
            level(0)
        );

        ev.repository()
            .create_rules_batch(
                &ctx,
                vec![rule(1, "User", 3, &[Action::Read]), rule(1, "User", 1, &[Action::Write])],
            )
            .await
            .unwrap();
        assert_eq!(
            ev.get_user_permission_level(&ctx, user, "User").await.unwrap(),
            level(1)
        );
    }

    async fn classify_user_fields(ev: &PermissionEvaluator, ctx: &RequestContext) {
        for (field, lvl) in [("name", 0), ("email", 0), ("password", 9), ("salary", 8)] {
            ev.repository()
                .create_field_level(
                    ctx,
                    NewFieldPermissionLevel {
                        doc_type: "User".into(),
                        field_name: field.into(),
                        permission_level: level(lvl),
                        field_type: "Data".into(),
                    },
                )
                .await
                .unwrap();
        }
    }

    #[tokio::test]
    async fn redacts_fields_above_user_level() {
        let ev = evaluator().await;
        let ctx = RequestContext::background();
        classify_user_fields(&ev, &ctx).await;
        ev.repository()
            .create_rule(&ctx, rule(1, "User", 1, &[Action::Read]))
            .await
            .unwrap();

        let out = ev
            .filter_documents_by_permission(
                &ctx,
                UserId::new(1),
                "User",
                vec![doc(json!({"name": "a", "email": "x", "password": "h", "salary": 100}))],
            )
            .await
            .unwrap();

        assert_eq!(out, vec![doc(json!({"name": "a", "email": "x"}))]);
    }

    #[tokio::test]
    async fn accessible_fields_follow_user_level() {
        let ev = evaluator().await;
        let ctx = RequestContext::background();
        classify_user_fields(&ev, &ctx).await;
        ev.repository()
            .create_rule(&ctx, rule(1, "User", 8, &[Action::Read]))
            .await
            .unwrap();

        let fields = ev
            .get_accessible_fields(&ctx, UserId::new(1), "User")
            .await
            .unwrap();
        let visible: Vec<_> = fields
            .iter()
            .filter(|f| f.can_access)
            .map(|f| f.field_name.as_str())
            .collect();
        assert_eq!(visible, vec!["email", "name", "salary"]);
    }

    #[tokio::test]
    async fn row_restrictions_apply_before_redaction() {
        let store = seeded_store().await;
        store.create_doc_type(DocType::new("Company", "core")).await.unwrap();
        store
            .create_user_permission(NewUserPermission {
                user_id: UserId::new(1),
                doc_type: "Invoice".into(),
                allowed_value: "Company".into(),
                for_value: "ACME".into(),
                is_default: false,
                applicable_for: None,
                hide_descendants: false,
            })
            .await
            .unwrap();
        let ev = evaluator_over(store, PermissionCache::new(&CacheConfig::default()));
        let ctx = RequestContext::background();

        let out = ev
            .filter_documents_by_permission(
                &ctx,
                UserId::new(1),
                "Invoice",
                vec![
                    doc(json!({"name": "INV-1", "company": "ACME"})),
                    doc(json!({"name": "INV-2", "company": "Globex"})),
                    doc(json!({"name": "INV-3"})),
                ],
            )
            .await
            .unwrap();

        assert_eq!(out, vec![doc(json!({"name": "INV-1", "company": "ACME"}))]);
    }

    struct UnreachableTier;

    #[async_trait]
    impl CacheBackend for UnreachableTier {
        async fn get(&self, _key: &str) -> Result<Option<CachedEntry>, CacheError> {
            Err(CacheError::Timeout)
        }

        async fn set(&self, _key: &str, _value: String, _ttl: Duration) -> Result<(), CacheError> {
            Err(CacheError::Timeout)
        }

        async fn del(&self, _key: &str) -> Result<(), CacheError> {
            Err(CacheError::Backend("connection reset".into()))
        }

        async fn scan_del(&self, _pattern: &str) -> Result<u64, CacheError> {
            Err(CacheError::Backend("connection reset".into()))
        }
    }

    #[tokio::test]
    async fn shared_tier_outage_degrades_to_storage() {
        let cache = PermissionCache::new(&CacheConfig::default()).with_shared(Arc::new(UnreachableTier));
        let ev = evaluator_over(seeded_store().await, cache);
        let ctx = RequestContext::background();

        let created = ev
            .repository()
            .create_rule(&ctx, rule(1, "Invoice", 0, &[Action::Read]))
            .await
            .unwrap();
        assert!(
            ev.check_permission(&ctx, UserId::new(1), "Invoice", Action::Read, level(0))
                .await
                .unwrap()
        );

        ev.repository().delete_rule(&ctx, created.id).await.unwrap();
        assert!(
            !ev.check_permission(&ctx, UserId::new(1), "Invoice", Action::Read, level(0))
                .await
                .unwrap()
        );
    }

    /// Shared tier whose first rule-set write stalls, holding a reader
    /// mid-population while a writer commits.
    struct StallingTier {
        inner: LocalCache,
        stalled: AtomicBool,
    }

    #[async_trait]
    impl CacheBackend for StallingTier {
        async fn get(&self, key: &str) -> Result<Option<CachedEntry>, CacheError> {
            CacheBackend::get(&self.inner, key).await
        }

        async fn set(&self, key: &str, value: String, ttl: Duration) -> Result<(), CacheError> {
            if key.contains("role_rules:") && !self.stalled.swap(true, Ordering::SeqCst) {
                tokio::time::sleep(Duration::from_millis(300)).await;
            }
            CacheBackend::set(&self.inner, key, value, ttl).await
        }

        async fn del(&self, key: &str) -> Result<(), CacheError> {
            CacheBackend::del(&self.inner, key).await
        }

        async fn scan_del(&self, pattern: &str) -> Result<u64, CacheError> {
            CacheBackend::scan_del(&self.inner, pattern).await
        }
    }

    #[tokio::test]
    async fn rule_created_during_a_slow_load_is_not_masked() {
        let shared = Arc::new(StallingTier {
            inner: LocalCache::new(),
            stalled: AtomicBool::new(false),
        });
        let cache = PermissionCache::new(&CacheConfig::default()).with_shared(shared.clone());
        let ev = evaluator_over(seeded_store().await, cache);

        let reader = {
            let ev = ev.clone();
            tokio::spawn(async move {
                let ctx = RequestContext::background();
                ev.check_permission(&ctx, UserId::new(1), "Invoice", Action::Read, level(0))
                    .await
            })
        };
        tokio::time::sleep(Duration::from_millis(50)).await;

        let ctx = RequestContext::background();
        ev.repository()
            .create_rule(&ctx, rule(1, "Invoice", 0, &[Action::Read]))
            .await
            .unwrap();
        assert!(!reader.await.unwrap().unwrap());

        assert!(shared.inner.get_entry("perm:role_rules:1:Invoice").is_none());
        assert!(
            ev.check_permission(&ctx, UserId::new(1), "Invoice", Action::Read, level(0))
                .await
                .unwrap()
        );
    }

    #[tokio::test]
    async fn cancelled_context_is_reported_and_populates_nothing() {
        let ev = evaluator().await;
        let ctx = RequestContext::background();
        ctx.cancel();

        let err = ev
            .check_permission(&ctx, UserId::new(1), "Invoice", Action::Read, level(0))
            .await
            .unwrap_err();
        assert_eq!(err, DomainError::Canceled);
        assert!(ev.repository().cache().local().is_empty());
    }
}
