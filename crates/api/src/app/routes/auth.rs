//! Session endpoints. Login and registration belong to the identity issuer;
//! only refresh and logout are served here.

use axum::{
    extract::{rejection::JsonRejection, State},
    response::Response,
    routing::post,
    Json, Router,
};
use chrono::Utc;
use tracing::{debug, info};

use erpguard_auth::TokenSubject;
use erpguard_core::DomainError;

use crate::app::dto::{RefreshRequest, TokenResponse};
use crate::app::errors::{self, ApiError};
use crate::app::AppState;
use crate::context::{Caller, Ctx};

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/refresh", post(refresh))
        .route("/logout", post(logout))
}

/// POST /auth/refresh - trade a refresh token for a new access token.
///
/// Roles are re-read so a role change shows up in the next access token.
pub async fn refresh(
    State(state): State<AppState>,
    Ctx(ctx): Ctx,
    payload: Result<Json<RefreshRequest>, JsonRejection>,
) -> Result<Response, ApiError> {
    let Json(req) = payload?;
    let now = Utc::now();

    let claims = state
        .verifier
        .verify_refresh(&req.refresh_token, now)
        .map_err(|e| {
            debug!(reason = %e, "refresh token rejected");
            DomainError::Unauthenticated
        })?;

    let repo = state.repo();
    if repo.is_session_revoked(&ctx, &claims.session_id).await {
        debug!(session_id = %claims.session_id, "refresh on revoked session");
        return Err(DomainError::Unauthenticated.into());
    }

    let roles = repo.get_user_roles(&ctx, claims.user_id).await?;
    let subject = TokenSubject {
        user_id: claims.user_id,
        username: claims.username,
        email: claims.email,
        roles: roles.into_iter().map(|r| r.code).collect(),
    };
    let issued = state
        .issuer
        .issue_access(&subject, &claims.session_id, req.remember_me, now)
        .map_err(|e| DomainError::storage(format!("token signing failed: {e}")))?;

    info!(user_id = %subject.user_id, "access token refreshed");
    Ok(errors::ok(TokenResponse::from(issued)))
}

/// POST /auth/logout - revoke the caller's session until its refresh
/// token would have expired.
pub async fn logout(State(state): State<AppState>, caller: Caller) -> Result<Response, ApiError> {
    let session_id = caller.principal().session_id.clone();
    let ttl = state.issuer.refresh_ttl().to_std().unwrap_or_default();
    state
        .repo()
        .revoke_session(caller.ctx(), &session_id, ttl)
        .await;

    Ok(errors::ok(serde_json::json!({ "sessionId": session_id })))
}
