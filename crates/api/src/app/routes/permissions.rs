//! Permission queries for the calling user, or for another user when the
//! caller may read permission rules.

use axum::{
    extract::{
        rejection::{JsonRejection, QueryRejection},
        Query, State,
    },
    response::Response,
    routing::{get, post},
    Json, Router,
};

use erpguard_auth::{Action, PermissionLevel};

use crate::app::dto::{
    CheckPermissionRequest, CheckPermissionResponse, DocTypeQuery, FieldAccessDto,
    FilterDocumentsRequest, MyPermissionsResponse, PermissionLevelResponse,
};
use crate::app::errors::{self, ApiError};
use crate::app::routes::target_user;
use crate::app::AppState;
use crate::context::Caller;

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/me", get(me))
        .route("/check", post(check))
        .route("/level", get(level))
        .route("/fields", get(fields))
        .route("/filter", post(filter))
}

/// GET /permissions/me
pub async fn me(State(state): State<AppState>, caller: Caller) -> Result<Response, ApiError> {
    let principal = caller.principal();
    let repo = state.repo();
    let roles = repo.get_user_roles(caller.ctx(), principal.user_id).await?;
    let permissions = repo
        .user_permission_codes(caller.ctx(), principal.user_id)
        .await?;

    Ok(errors::ok(MyPermissionsResponse {
        user_id: principal.user_id,
        username: principal.username.clone(),
        roles: roles.into_iter().map(|r| r.code.as_str().to_string()).collect(),
        permissions,
    }))
}

/// POST /permissions/check
pub async fn check(
    State(state): State<AppState>,
    caller: Caller,
    payload: Result<Json<CheckPermissionRequest>, JsonRejection>,
) -> Result<Response, ApiError> {
    let Json(req) = payload?;
    let action: Action = req.permission.parse()?;
    let level = PermissionLevel::new(req.level.unwrap_or(0))?;
    let user_id = target_user(&state, &caller, req.user_id).await?;

    let has_permission = state
        .evaluator
        .check_permission(caller.ctx(), user_id, &req.doc_type, action, level)
        .await?;
    Ok(errors::ok(CheckPermissionResponse { has_permission }))
}

/// GET /permissions/level?docType=...
pub async fn level(
    State(state): State<AppState>,
    caller: Caller,
    query: Result<Query<DocTypeQuery>, QueryRejection>,
) -> Result<Response, ApiError> {
    let Query(q) = query?;
    let user_id = target_user(&state, &caller, q.user_id).await?;

    let level = state
        .evaluator
        .get_user_permission_level(caller.ctx(), user_id, &q.doc_type)
        .await?;
    Ok(errors::ok(PermissionLevelResponse {
        permission_level: level.get(),
    }))
}

/// GET /permissions/fields?docType=...
pub async fn fields(
    State(state): State<AppState>,
    caller: Caller,
    query: Result<Query<DocTypeQuery>, QueryRejection>,
) -> Result<Response, ApiError> {
    let Query(q) = query?;
    let user_id = target_user(&state, &caller, q.user_id).await?;

    let fields: Vec<FieldAccessDto> = state
        .evaluator
        .get_accessible_fields(caller.ctx(), user_id, &q.doc_type)
        .await?
        .into_iter()
        .map(FieldAccessDto::from)
        .collect();
    Ok(errors::ok(fields))
}

/// POST /permissions/filter
pub async fn filter(
    State(state): State<AppState>,
    caller: Caller,
    payload: Result<Json<FilterDocumentsRequest>, JsonRejection>,
) -> Result<Response, ApiError> {
    let Json(req) = payload?;
    let user_id = target_user(&state, &caller, req.user_id).await?;

    let documents = state
        .evaluator
        .filter_documents_by_permission(caller.ctx(), user_id, &req.doc_type, req.documents)
        .await?;
    Ok(errors::ok(documents))
}
