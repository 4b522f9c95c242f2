use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use erpguard_auth::{Document, FieldAccess, IssuedToken, Page};
use erpguard_core::{RoleId, UserId};

// -------------------------
// Permission queries
// -------------------------

/// `user_id` defaults to the caller.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CheckPermissionRequest {
    #[serde(default, alias = "user_id")]
    pub user_id: Option<UserId>,
    #[serde(alias = "doc_type")]
    pub doc_type: String,
    pub permission: String,
    #[serde(default)]
    pub level: Option<i64>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CheckPermissionResponse {
    pub has_permission: bool,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DocTypeQuery {
    #[serde(default, alias = "user_id")]
    pub user_id: Option<UserId>,
    #[serde(alias = "doc_type")]
    pub doc_type: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PermissionLevelResponse {
    pub permission_level: u8,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FieldAccessDto {
    pub field_name: String,
    pub can_access: bool,
    pub permission_level: u8,
}

impl From<FieldAccess> for FieldAccessDto {
    fn from(f: FieldAccess) -> Self {
        Self {
            field_name: f.field_name,
            can_access: f.can_access,
            permission_level: f.permission_level.get(),
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FilterDocumentsRequest {
    #[serde(default, alias = "user_id")]
    pub user_id: Option<UserId>,
    #[serde(alias = "doc_type")]
    pub doc_type: String,
    pub documents: Vec<Document>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MyPermissionsResponse {
    pub user_id: UserId,
    pub username: String,
    pub roles: Vec<String>,
    pub permissions: Vec<String>,
}

// -------------------------
// Sessions
// -------------------------

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RefreshRequest {
    #[serde(alias = "refresh_token")]
    pub refresh_token: String,
    #[serde(default, alias = "remember_me")]
    pub remember_me: bool,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TokenResponse {
    pub access_token: String,
    pub token_type: &'static str,
    pub session_id: String,
    pub expires_at: DateTime<Utc>,
}

impl From<IssuedToken> for TokenResponse {
    fn from(t: IssuedToken) -> Self {
        Self {
            access_token: t.token,
            token_type: "Bearer",
            session_id: t.session_id,
            expires_at: t.expires_at,
        }
    }
}

// -------------------------
// Admin
// -------------------------

#[derive(Debug, Deserialize)]
pub struct RuleListQuery {
    pub role_id: Option<RoleId>,
    pub doc_type: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct FieldLevelQuery {
    pub doc_type: String,
}

#[derive(Debug, Deserialize)]
pub struct UserPermissionQuery {
    pub user_id: UserId,
    pub doc_type: String,
    #[serde(default)]
    pub page: Option<u32>,
    #[serde(default)]
    pub size: Option<u32>,
}

impl UserPermissionQuery {
    pub fn page(&self) -> Page {
        let default = Page::default();
        Page::new(
            self.page.unwrap_or(default.page),
            self.size.unwrap_or(default.size),
        )
    }
}

#[derive(Debug, Serialize)]
pub struct Paged<T: Serialize> {
    pub items: Vec<T>,
    pub total: u64,
    pub page: u32,
    pub size: u32,
}

#[derive(Debug, Deserialize)]
pub struct AssignRoleRequest {
    pub role_id: RoleId,
}

#[derive(Debug, Deserialize)]
pub struct AppendWorkflowStateRequest {
    pub state: String,
}
