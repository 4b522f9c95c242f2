//! HTTP API application wiring (Axum router + state).
//!
//! - `routes/`: HTTP handlers, one file per area
//! - `dto.rs`: request/response DTOs
//! - `errors.rs`: the response envelope and error mapping

use std::sync::Arc;
use std::time::Duration;

use axum::Router;
use axum::http::Method;
use tower::ServiceBuilder;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use erpguard_auth::{JwtSettings, TokenIssuer, TokenVerifier};
use erpguard_infra::{
    CachedPermissionRepository, PermissionCache, PermissionEvaluator, PermissionStore,
};

use crate::middleware::{self, AuthGate};
use crate::routing::{API_PREFIX, RouteTable};

pub mod dto;
pub mod errors;
pub mod routes;

/// Shared handler state.
#[derive(Clone)]
pub struct AppState {
    pub evaluator: PermissionEvaluator,
    pub issuer: Arc<TokenIssuer>,
    pub verifier: Arc<TokenVerifier>,
}

impl AppState {
    pub fn new(jwt: &JwtSettings, store: Arc<dyn PermissionStore>, cache: Arc<PermissionCache>) -> Self {
        let repo = Arc::new(CachedPermissionRepository::new(store, cache));
        Self {
            evaluator: PermissionEvaluator::new(repo),
            issuer: Arc::new(TokenIssuer::new(jwt)),
            verifier: Arc::new(TokenVerifier::new(jwt)),
        }
    }

    pub fn repo(&self) -> &CachedPermissionRepository {
        self.evaluator.repository()
    }
}

/// Build the full HTTP router (public entrypoint used by `main.rs`).
pub fn build_app(state: AppState, routes: RouteTable, request_timeout: Duration) -> Router {
    let gate = AuthGate::new(
        state.verifier.clone(),
        Arc::new(routes),
        state.evaluator.clone(),
        request_timeout,
    );

    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([
            Method::GET,
            Method::POST,
            Method::PUT,
            Method::DELETE,
            Method::OPTIONS,
        ])
        .allow_headers(Any);

    Router::new()
        .nest(API_PREFIX, routes::router())
        .fallback(routes::system::not_found)
        .with_state(state)
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(cors)
                .layer(axum::middleware::from_fn_with_state(
                    gate,
                    middleware::auth_middleware,
                )),
        )
}
