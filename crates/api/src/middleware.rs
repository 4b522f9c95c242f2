//! Request auth gate.
//!
//! For every request: allowlisted routes pass; otherwise the bearer token is
//! verified, the session must not be revoked, the route is mapped to a
//! permission and the evaluator decides. Unknown routes are denied.

use std::sync::Arc;
use std::time::Duration;

use axum::{
    extract::{Request, State},
    middleware::Next,
    response::Response,
};
use chrono::Utc;
use tracing::{debug, warn};

use erpguard_auth::{Principal, RequestContext, TokenVerifier};
use erpguard_core::DomainError;
use erpguard_infra::PermissionEvaluator;

use crate::app::errors::domain_error_to_response;
use crate::routing::{RouteRequirement, RouteTable, rpc_permission_code};
use crate::transport::{HttpRequestMeta, RequestMeta, bearer_token};

#[derive(Clone)]
pub struct AuthGate {
    verifier: Arc<TokenVerifier>,
    routes: Arc<RouteTable>,
    evaluator: PermissionEvaluator,
    request_timeout: Duration,
}

impl AuthGate {
    pub fn new(
        verifier: Arc<TokenVerifier>,
        routes: Arc<RouteTable>,
        evaluator: PermissionEvaluator,
        request_timeout: Duration,
    ) -> Self {
        Self {
            verifier,
            routes,
            evaluator,
            request_timeout,
        }
    }

    /// A fresh context bounded by the configured request timeout.
    pub fn new_context(&self) -> RequestContext {
        RequestContext::with_timeout(self.request_timeout)
    }

    /// Decide one request. On success the returned context carries the
    /// caller's identity (none for public routes).
    pub async fn authorize(
        &self,
        meta: &impl RequestMeta,
        ctx: RequestContext,
    ) -> Result<RequestContext, DomainError> {
        let requirement = self.routes.resolve(meta.method(), meta.request_uri());
        if requirement == RouteRequirement::Public {
            return Ok(ctx);
        }

        let token = bearer_token(meta).ok_or(DomainError::Unauthenticated)?;
        let claims = self.verifier.verify_access(token, Utc::now()).map_err(|e| {
            debug!(reason = %e, "token rejected");
            DomainError::Unauthenticated
        })?;

        let repo = self.evaluator.repository();
        if repo.is_session_revoked(&ctx, &claims.session_id).await {
            debug!(session_id = %claims.session_id, "revoked session");
            return Err(DomainError::Unauthenticated);
        }

        let principal = Principal::from(claims);
        let user_id = principal.user_id;
        let ctx = ctx.with_principal(principal);

        match requirement {
            RouteRequirement::Public | RouteRequirement::Authenticated => Ok(ctx),
            RouteRequirement::Permission(p) => {
                let decision = match self
                    .evaluator
                    .ensure_permission(&ctx, user_id, &p.doc_type, p.action, p.level)
                    .await
                {
                    Ok(()) => Ok(ctx),
                    // A doc type the store does not know cannot be granted.
                    Err(DomainError::NotFound(_)) => {
                        Err(DomainError::forbidden(p.action.as_str(), &p.doc_type))
                    }
                    Err(e) => Err(e),
                };
                if let (Err(e), Some(code)) = (&decision, rpc_permission_code(meta.request_uri())) {
                    debug!(%user_id, permission = %code, error = %e, "rpc call denied");
                }
                decision
            }
            RouteRequirement::Unknown => {
                warn!(
                    method = meta.method(),
                    uri = meta.request_uri(),
                    "route not in permission table; denying"
                );
                Err(DomainError::forbidden("access", meta.request_uri()))
            }
        }
    }
}

pub async fn auth_middleware(
    State(gate): State<AuthGate>,
    mut req: Request,
    next: Next,
) -> Response {
    let ctx = gate.new_context();
    // Cancels in-flight cache and storage calls if the client goes away.
    let _cancel_on_drop = ctx.cancellation_token().clone().drop_guard();

    let outcome = {
        let meta = HttpRequestMeta::new(req.method(), req.uri(), req.headers());
        gate.authorize(&meta, ctx).await
    };

    match outcome {
        Ok(ctx) => {
            req.extensions_mut().insert(ctx);
            next.run(req).await
        }
        Err(e) => domain_error_to_response(e),
    }
}
