//! Admin writers and listings for the permission model.
//!
//! The gate has already checked the caller's permission on the matching
//! doc type (`DocType`, `PermissionRule`, ...). Every write goes through the
//! repository so the affected cache families are invalidated.

use axum::{
    extract::{
        rejection::{JsonRejection, PathRejection, QueryRejection},
        Path, Query, State,
    },
    http::StatusCode,
    response::Response,
    routing::{get, post, put},
    Json, Router,
};

use erpguard_auth::{
    DocType, NewFieldPermissionLevel, NewPermissionRule, NewUserPermission,
};
use erpguard_core::{DomainError, FieldLevelId, RoleId, RuleId, UserId, UserPermissionId};

use crate::app::dto::{AssignRoleRequest, FieldLevelQuery, Paged, RuleListQuery, UserPermissionQuery};
use crate::app::errors::{self, ApiError};
use crate::app::AppState;
use crate::context::Caller;

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/doctypes", get(list_doc_types).post(create_doc_type))
        .route(
            "/doctypes/:name",
            get(get_doc_type).put(update_doc_type).delete(delete_doc_type),
        )
        .route("/permission-rules", get(list_rules).post(create_rule))
        .route("/permission-rules/batch", post(create_rules_batch))
        .route(
            "/permission-rules/:id",
            get(get_rule).put(update_rule).delete(delete_rule),
        )
        .route("/field-levels", get(list_field_levels).post(create_field_level))
        .route(
            "/field-levels/:id",
            put(update_field_level).delete(delete_field_level),
        )
        .route(
            "/user-permissions",
            get(list_user_permissions).post(create_user_permission),
        )
        .route("/user-permissions/batch", post(create_user_permissions_batch))
        .route(
            "/user-permissions/:id",
            get(get_user_permission)
                .put(update_user_permission)
                .delete(delete_user_permission),
        )
        .route("/users/:user_id/roles", get(list_user_roles).post(assign_user_role))
        .route("/users/:user_id/roles/:role_id", axum::routing::delete(revoke_user_role))
}

type JsonBody<T> = Result<Json<T>, JsonRejection>;
type PathParam<T> = Result<Path<T>, PathRejection>;

// ─────────────────────────────────────────────────────────────────────────────
// Doc types
// ─────────────────────────────────────────────────────────────────────────────

pub async fn list_doc_types(State(state): State<AppState>, caller: Caller) -> Result<Response, ApiError> {
    Ok(errors::ok(state.repo().list_doc_types(caller.ctx()).await?))
}

pub async fn get_doc_type(
    State(state): State<AppState>,
    caller: Caller,
    name: PathParam<String>,
) -> Result<Response, ApiError> {
    let Path(name) = name?;
    Ok(errors::ok(state.repo().get_doc_type(caller.ctx(), &name).await?))
}

pub async fn create_doc_type(
    State(state): State<AppState>,
    caller: Caller,
    body: JsonBody<DocType>,
) -> Result<Response, ApiError> {
    let Json(doc_type) = body?;
    let created = state.repo().create_doc_type(caller.ctx(), doc_type).await?;
    Ok(errors::ok_with(StatusCode::CREATED, "doc type created", created))
}

/// PUT /doctypes/:name - the path names the doc type; a differing body name
/// is rejected.
pub async fn update_doc_type(
    State(state): State<AppState>,
    caller: Caller,
    name: PathParam<String>,
    body: JsonBody<DocType>,
) -> Result<Response, ApiError> {
    let Path(name) = name?;
    let Json(doc_type) = body?;
    if doc_type.name != name {
        return Err(DomainError::validation("doc type name cannot be changed").into());
    }
    let updated = state.repo().update_doc_type(caller.ctx(), doc_type).await?;
    Ok(errors::ok_with(StatusCode::OK, "doc type updated", updated))
}

pub async fn delete_doc_type(
    State(state): State<AppState>,
    caller: Caller,
    name: PathParam<String>,
) -> Result<Response, ApiError> {
    let Path(name) = name?;
    let removed = state.repo().delete_doc_type(caller.ctx(), &name).await?;
    Ok(errors::ok_with(StatusCode::OK, "doc type deleted", removed))
}

// ─────────────────────────────────────────────────────────────────────────────
// Permission rules
// ─────────────────────────────────────────────────────────────────────────────

/// GET /permission-rules?role_id=..&doc_type=.. (at least one filter).
pub async fn list_rules(
    State(state): State<AppState>,
    caller: Caller,
    query: Result<Query<RuleListQuery>, QueryRejection>,
) -> Result<Response, ApiError> {
    let Query(q) = query?;
    let repo = state.repo();
    let ctx = caller.ctx();
    let rules = match (q.role_id, q.doc_type.as_deref()) {
        (Some(role_id), Some(doc_type)) => repo.list_rules(ctx, role_id, doc_type).await?,
        (Some(role_id), None) => repo.list_rules_by_role(ctx, role_id).await?,
        (None, Some(doc_type)) => repo.list_rules_by_doc_type(ctx, doc_type).await?,
        (None, None) => {
            return Err(DomainError::validation("role_id or doc_type is required").into());
        }
    };
    Ok(errors::ok(rules))
}

pub async fn get_rule(
    State(state): State<AppState>,
    caller: Caller,
    id: PathParam<RuleId>,
) -> Result<Response, ApiError> {
    let Path(id) = id?;
    Ok(errors::ok(state.repo().get_rule(caller.ctx(), id).await?))
}

pub async fn create_rule(
    State(state): State<AppState>,
    caller: Caller,
    body: JsonBody<NewPermissionRule>,
) -> Result<Response, ApiError> {
    let Json(rule) = body?;
    let created = state.repo().create_rule(caller.ctx(), rule).await?;
    Ok(errors::ok_with(StatusCode::CREATED, "permission rule created", created))
}

/// POST /permission-rules/batch - all rules are stored or none are.
pub async fn create_rules_batch(
    State(state): State<AppState>,
    caller: Caller,
    body: JsonBody<Vec<NewPermissionRule>>,
) -> Result<Response, ApiError> {
    let Json(rules) = body?;
    if rules.is_empty() {
        return Err(DomainError::validation("batch cannot be empty").into());
    }
    let created = state.repo().create_rules_batch(caller.ctx(), rules).await?;
    Ok(errors::ok_with(StatusCode::CREATED, "permission rules created", created))
}

pub async fn update_rule(
    State(state): State<AppState>,
    caller: Caller,
    id: PathParam<RuleId>,
    body: JsonBody<NewPermissionRule>,
) -> Result<Response, ApiError> {
    let Path(id) = id?;
    let Json(rule) = body?;
    let updated = state.repo().update_rule(caller.ctx(), id, rule).await?;
    Ok(errors::ok_with(StatusCode::OK, "permission rule updated", updated))
}

pub async fn delete_rule(
    State(state): State<AppState>,
    caller: Caller,
    id: PathParam<RuleId>,
) -> Result<Response, ApiError> {
    let Path(id) = id?;
    let removed = state.repo().delete_rule(caller.ctx(), id).await?;
    Ok(errors::ok_with(StatusCode::OK, "permission rule deleted", removed))
}

// ─────────────────────────────────────────────────────────────────────────────
// Field levels
// ─────────────────────────────────────────────────────────────────────────────

pub async fn list_field_levels(
    State(state): State<AppState>,
    caller: Caller,
    query: Result<Query<FieldLevelQuery>, QueryRejection>,
) -> Result<Response, ApiError> {
    let Query(q) = query?;
    Ok(errors::ok(
        state.repo().list_field_levels(caller.ctx(), &q.doc_type).await?,
    ))
}

pub async fn create_field_level(
    State(state): State<AppState>,
    caller: Caller,
    body: JsonBody<NewFieldPermissionLevel>,
) -> Result<Response, ApiError> {
    let Json(level) = body?;
    let created = state.repo().create_field_level(caller.ctx(), level).await?;
    Ok(errors::ok_with(StatusCode::CREATED, "field level created", created))
}

pub async fn update_field_level(
    State(state): State<AppState>,
    caller: Caller,
    id: PathParam<FieldLevelId>,
    body: JsonBody<NewFieldPermissionLevel>,
) -> Result<Response, ApiError> {
    let Path(id) = id?;
    let Json(level) = body?;
    let updated = state.repo().update_field_level(caller.ctx(), id, level).await?;
    Ok(errors::ok_with(StatusCode::OK, "field level updated", updated))
}

pub async fn delete_field_level(
    State(state): State<AppState>,
    caller: Caller,
    id: PathParam<FieldLevelId>,
) -> Result<Response, ApiError> {
    let Path(id) = id?;
    let removed = state.repo().delete_field_level(caller.ctx(), id).await?;
    Ok(errors::ok_with(StatusCode::OK, "field level deleted", removed))
}

// ─────────────────────────────────────────────────────────────────────────────
// User permissions
// ─────────────────────────────────────────────────────────────────────────────

/// GET /user-permissions?user_id=..&doc_type=..&page=..&size=..
pub async fn list_user_permissions(
    State(state): State<AppState>,
    caller: Caller,
    query: Result<Query<UserPermissionQuery>, QueryRejection>,
) -> Result<Response, ApiError> {
    let Query(q) = query?;
    let page = q.page();
    let (items, total) = state
        .repo()
        .list_user_permissions(caller.ctx(), q.user_id, &q.doc_type, page)
        .await?;
    Ok(errors::ok(Paged {
        items,
        total,
        page: page.page,
        size: page.size,
    }))
}

pub async fn get_user_permission(
    State(state): State<AppState>,
    caller: Caller,
    id: PathParam<UserPermissionId>,
) -> Result<Response, ApiError> {
    let Path(id) = id?;
    Ok(errors::ok(
        state.repo().get_user_permission(caller.ctx(), id).await?,
    ))
}

pub async fn create_user_permission(
    State(state): State<AppState>,
    caller: Caller,
    body: JsonBody<NewUserPermission>,
) -> Result<Response, ApiError> {
    let Json(permission) = body?;
    let created = state
        .repo()
        .create_user_permission(caller.ctx(), permission)
        .await?;
    Ok(errors::ok_with(StatusCode::CREATED, "user permission created", created))
}

pub async fn create_user_permissions_batch(
    State(state): State<AppState>,
    caller: Caller,
    body: JsonBody<Vec<NewUserPermission>>,
) -> Result<Response, ApiError> {
    let Json(permissions) = body?;
    if permissions.is_empty() {
        return Err(DomainError::validation("batch cannot be empty").into());
    }
    let created = state
        .repo()
        .create_user_permissions_batch(caller.ctx(), permissions)
        .await?;
    Ok(errors::ok_with(StatusCode::CREATED, "user permissions created", created))
}

pub async fn update_user_permission(
    State(state): State<AppState>,
    caller: Caller,
    id: PathParam<UserPermissionId>,
    body: JsonBody<NewUserPermission>,
) -> Result<Response, ApiError> {
    let Path(id) = id?;
    let Json(permission) = body?;
    let updated = state
        .repo()
        .update_user_permission(caller.ctx(), id, permission)
        .await?;
    Ok(errors::ok_with(StatusCode::OK, "user permission updated", updated))
}

pub async fn delete_user_permission(
    State(state): State<AppState>,
    caller: Caller,
    id: PathParam<UserPermissionId>,
) -> Result<Response, ApiError> {
    let Path(id) = id?;
    let removed = state
        .repo()
        .delete_user_permission(caller.ctx(), id)
        .await?;
    Ok(errors::ok_with(StatusCode::OK, "user permission deleted", removed))
}

// ─────────────────────────────────────────────────────────────────────────────
// Role assignments
// ─────────────────────────────────────────────────────────────────────────────

pub async fn list_user_roles(
    State(state): State<AppState>,
    caller: Caller,
    user_id: PathParam<UserId>,
) -> Result<Response, ApiError> {
    let Path(user_id) = user_id?;
    Ok(errors::ok(
        state.repo().get_user_roles(caller.ctx(), user_id).await?,
    ))
}

pub async fn assign_user_role(
    State(state): State<AppState>,
    caller: Caller,
    user_id: PathParam<UserId>,
    body: JsonBody<AssignRoleRequest>,
) -> Result<Response, ApiError> {
    let Path(user_id) = user_id?;
    let Json(req) = body?;
    state
        .repo()
        .assign_user_role(caller.ctx(), user_id, req.role_id)
        .await?;
    Ok(errors::ok_with(
        StatusCode::CREATED,
        "role assigned",
        serde_json::json!({ "user_id": user_id, "role_id": req.role_id }),
    ))
}

pub async fn revoke_user_role(
    State(state): State<AppState>,
    caller: Caller,
    ids: PathParam<(UserId, RoleId)>,
) -> Result<Response, ApiError> {
    let Path((user_id, role_id)) = ids?;
    state
        .repo()
        .revoke_user_role(caller.ctx(), user_id, role_id)
        .await?;
    Ok(errors::ok_with(
        StatusCode::OK,
        "role revoked",
        serde_json::json!({ "user_id": user_id, "role_id": role_id }),
    ))
}
