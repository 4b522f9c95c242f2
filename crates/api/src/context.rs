use axum::extract::FromRequestParts;
use axum::http::request::Parts;

use erpguard_auth::{Principal, RequestContext};
use erpguard_core::DomainError;

use crate::app::errors::ApiError;

/// The authenticated caller of a request: its identity plus the request's
/// cancellation and deadline.
///
/// Inserted by the auth gate; extracting it on a route the gate did not
/// authenticate yields 401.
#[derive(Debug, Clone)]
pub struct Caller {
    ctx: RequestContext,
    principal: Principal,
}

impl Caller {
    pub fn ctx(&self) -> &RequestContext {
        &self.ctx
    }

    pub fn principal(&self) -> &Principal {
        &self.principal
    }
}

#[axum::async_trait]
impl<S: Send + Sync> FromRequestParts<S> for Caller {
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let ctx = parts
            .extensions
            .get::<RequestContext>()
            .cloned()
            .ok_or(ApiError(DomainError::Unauthenticated))?;
        let principal = ctx
            .principal()
            .cloned()
            .ok_or(ApiError(DomainError::Unauthenticated))?;
        Ok(Self { ctx, principal })
    }
}

/// The request context of any route, public ones included.
#[derive(Debug, Clone)]
pub struct Ctx(pub RequestContext);

#[axum::async_trait]
impl<S: Send + Sync> FromRequestParts<S> for Ctx {
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        Ok(Self(
            parts
                .extensions
                .get::<RequestContext>()
                .cloned()
                .unwrap_or_default(),
        ))
    }
}
