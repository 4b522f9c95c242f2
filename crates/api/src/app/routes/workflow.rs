//! Workflow state log per document instance.
//!
//! Reading needs `read` on the document's doc type, appending needs `write`.

use axum::{
    extract::{
        rejection::{JsonRejection, PathRejection},
        Path, State,
    },
    http::StatusCode,
    response::Response,
    routing::{get, post},
    Json, Router,
};

use erpguard_auth::{Action, NewWorkflowState};
use erpguard_core::DomainError;

use crate::app::dto::AppendWorkflowStateRequest;
use crate::app::errors::{self, ApiError};
use crate::app::routes::require;
use crate::app::AppState;
use crate::context::Caller;

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/:doc_type/:name", get(current))
        .route("/:doc_type/:name/history", get(history))
        .route("/:doc_type/:name/states", post(append))
}

type DocPath = Result<Path<(String, String)>, PathRejection>;

/// GET /workflow/:doc_type/:name
pub async fn current(
    State(state): State<AppState>,
    caller: Caller,
    path: DocPath,
) -> Result<Response, ApiError> {
    let Path((doc_type, name)) = path?;
    require(&state, &caller, &doc_type, Action::Read).await?;

    let row = state
        .repo()
        .current_workflow_state(caller.ctx(), &doc_type, &name)
        .await?
        .ok_or_else(|| DomainError::not_found(format!("workflow state of {doc_type} '{name}'")))?;
    Ok(errors::ok(row))
}

/// GET /workflow/:doc_type/:name/history
pub async fn history(
    State(state): State<AppState>,
    caller: Caller,
    path: DocPath,
) -> Result<Response, ApiError> {
    let Path((doc_type, name)) = path?;
    require(&state, &caller, &doc_type, Action::Read).await?;

    Ok(errors::ok(
        state
            .repo()
            .workflow_history(caller.ctx(), &doc_type, &name)
            .await?,
    ))
}

/// POST /workflow/:doc_type/:name/states
pub async fn append(
    State(state): State<AppState>,
    caller: Caller,
    path: DocPath,
    body: Result<Json<AppendWorkflowStateRequest>, JsonRejection>,
) -> Result<Response, ApiError> {
    let Path((doc_type, name)) = path?;
    let Json(req) = body?;
    require(&state, &caller, &doc_type, Action::Write).await?;

    let row = state
        .repo()
        .append_workflow_state(
            caller.ctx(),
            NewWorkflowState {
                doc_type,
                doc_name: name,
                state: req.state,
                submitted_by: Some(caller.principal().user_id),
            },
        )
        .await?;
    Ok(errors::ok_with(StatusCode::CREATED, "workflow state recorded", row))
}
