use axum::{routing::get, Router};

use erpguard_auth::{Action, PermissionLevel};
use erpguard_core::{DomainError, UserId};

use crate::app::AppState;
use crate::context::Caller;

pub mod admin;
pub mod auth;
pub mod permissions;
pub mod system;
pub mod workflow;

/// Router for everything under the API prefix.
pub fn router() -> Router<AppState> {
    Router::new()
        .route("/health", get(system::health))
        .nest("/auth", auth::router())
        .nest("/permissions", permissions::router())
        .nest("/workflow", workflow::router())
        .merge(admin::router())
}

/// Handler-level check for routes the gate only authenticates.
///
/// An unknown doc type is reported as a denial, the same as at the gate.
pub(crate) async fn require(
    state: &AppState,
    caller: &Caller,
    doc_type: &str,
    action: Action,
) -> Result<(), DomainError> {
    let user_id = caller.principal().user_id;
    match state
        .evaluator
        .ensure_permission(caller.ctx(), user_id, doc_type, action, PermissionLevel::DOCUMENT)
        .await
    {
        Err(DomainError::NotFound(_)) => Err(DomainError::forbidden(action.as_str(), doc_type)),
        other => other,
    }
}

/// The user a permission query is about. Asking about someone else needs
/// `read` on `PermissionRule`.
pub(crate) async fn target_user(
    state: &AppState,
    caller: &Caller,
    requested: Option<UserId>,
) -> Result<UserId, DomainError> {
    let own = caller.principal().user_id;
    match requested {
        Some(other) if other != own => {
            require(state, caller, "PermissionRule", Action::Read).await?;
            Ok(other)
        }
        _ => Ok(own),
    }
}
