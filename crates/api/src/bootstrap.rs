//! Seed data for the in-memory store.
//!
//! Without a database nothing exists yet, so every admin route would be
//! denied. The bootstrap section names one admin user; that user gets a role
//! holding full document-level grants on the administrative doc types and can
//! build the rest of the model through the API.

use serde::{Deserialize, Serialize};
use tracing::info;

use erpguard_auth::{Action, ActionFlags, DocType, NewPermissionRule, PermissionLevel, Role, RoleCode};
use erpguard_core::{RoleId, UserId};
use erpguard_infra::{InMemoryPermissionStore, PermissionStore, StoreError};

/// Doc types the admin routes are gated on.
pub const ADMIN_DOC_TYPES: [&str; 5] = [
    "DocType",
    "PermissionRule",
    "FieldPermissionLevel",
    "UserPermission",
    "UserRole",
];

const ADMIN_ACTIONS: [Action; 4] = [Action::Read, Action::Write, Action::Create, Action::Delete];

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BootstrapConfig {
    pub admin_user_id: i64,
    #[serde(default = "default_role_id")]
    pub role_id: i64,
    #[serde(default = "default_role_code")]
    pub role_code: String,
}

fn default_role_id() -> i64 {
    1
}

fn default_role_code() -> String {
    "admin".to_string()
}

/// An in-memory store holding the bootstrap admin and its grants.
pub async fn seed_in_memory(config: &BootstrapConfig) -> Result<InMemoryPermissionStore, StoreError> {
    let store = InMemoryPermissionStore::new();
    let role_id = RoleId::new(config.role_id);
    let admin = UserId::new(config.admin_user_id);

    store.insert_role(Role {
        id: role_id,
        code: RoleCode::new(config.role_code.clone()),
        name: "Administrator".to_string(),
        is_system: true,
        enabled: true,
        sort_order: 0,
    })?;
    store.register_user(admin)?;
    store.assign_user_role(admin, role_id).await?;

    for name in ADMIN_DOC_TYPES {
        store.create_doc_type(DocType::new(name, "core")).await?;
        store
            .create_rule(NewPermissionRule {
                role_id,
                doc_type: name.to_string(),
                permission_level: PermissionLevel::DOCUMENT,
                permissions: ActionFlags::default().with(&ADMIN_ACTIONS),
                only_if_creator: false,
                condition: None,
            })
            .await?;
    }

    info!(user_id = %admin, role = %config.role_code, "in-memory store seeded with bootstrap admin");
    Ok(store)
}
