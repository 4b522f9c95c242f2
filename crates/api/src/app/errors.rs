use axum::extract::rejection::{JsonRejection, PathRejection, QueryRejection};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde::Serialize;
use tracing::error;

use erpguard_core::DomainError;

/// Status for a request abandoned by its client. Nothing is written back.
pub const CLIENT_CLOSED_REQUEST: u16 = 499;

/// Uniform response body for every endpoint.
#[derive(Debug, Serialize)]
pub struct Envelope<T: Serialize> {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<T>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorBody>,
}

#[derive(Debug, Serialize)]
pub struct ErrorBody {
    pub code: String,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<String>,
}

/// `200` with `{"success": true, "data": ...}`.
pub fn ok<T: Serialize>(data: T) -> Response {
    (
        StatusCode::OK,
        axum::Json(Envelope {
            success: true,
            data: Some(data),
            message: None,
            error: None,
        }),
    )
        .into_response()
}

/// Like [`ok`] with a human-readable message and the given status.
pub fn ok_with<T: Serialize>(status: StatusCode, message: &str, data: T) -> Response {
    (
        status,
        axum::Json(Envelope {
            success: true,
            data: Some(data),
            message: Some(message.to_string()),
            error: None,
        }),
    )
        .into_response()
}

pub fn json_error(status: StatusCode, code: &str, message: impl Into<String>) -> Response {
    (
        status,
        axum::Json(Envelope::<()> {
            success: false,
            data: None,
            message: None,
            error: Some(ErrorBody {
                code: code.to_string(),
                message: message.into(),
                details: None,
            }),
        }),
    )
        .into_response()
}

/// Handler error: a [`DomainError`] rendered as the error envelope.
#[derive(Debug)]
pub struct ApiError(pub DomainError);

impl From<DomainError> for ApiError {
    fn from(e: DomainError) -> Self {
        Self(e)
    }
}

impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        Self(DomainError::validation(rejection.body_text()))
    }
}

impl From<QueryRejection> for ApiError {
    fn from(rejection: QueryRejection) -> Self {
        Self(DomainError::validation(rejection.body_text()))
    }
}

impl From<PathRejection> for ApiError {
    fn from(rejection: PathRejection) -> Self {
        Self(DomainError::validation(rejection.body_text()))
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        domain_error_to_response(self.0)
    }
}

pub fn domain_error_to_response(err: DomainError) -> Response {
    let code = err.code().to_string();
    match err {
        // Same message whatever check failed.
        DomainError::Unauthenticated => {
            json_error(StatusCode::UNAUTHORIZED, &code, "authentication required")
        }
        DomainError::Forbidden { .. } => json_error(StatusCode::FORBIDDEN, &code, err.to_string()),
        DomainError::NotFound(what) => {
            json_error(StatusCode::NOT_FOUND, &code, format!("{what} not found"))
        }
        DomainError::Conflict { message, .. } => json_error(StatusCode::BAD_REQUEST, &code, message),
        DomainError::Validation(msg) => json_error(StatusCode::BAD_REQUEST, &code, msg),
        DomainError::Storage(msg) => {
            error!(error = %msg, "storage failure");
            json_error(StatusCode::INTERNAL_SERVER_ERROR, &code, "internal server error")
        }
        DomainError::Canceled => StatusCode::from_u16(CLIENT_CLOSED_REQUEST)
            .unwrap_or(StatusCode::REQUEST_TIMEOUT)
            .into_response(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn storage_detail_is_not_leaked() {
        let res = domain_error_to_response(DomainError::storage("connection refused to 10.0.0.3"));
        assert_eq!(res.status(), StatusCode::INTERNAL_SERVER_ERROR);
    }

    #[test]
    fn status_codes_follow_the_taxonomy() {
        let cases = [
            (DomainError::Unauthenticated, 401),
            (DomainError::forbidden("read", "Invoice"), 403),
            (DomainError::not_found("doc type 'X'"), 404),
            (DomainError::conflict("DOCTYPE_EXISTS", "exists"), 400),
            (DomainError::validation("bad"), 400),
            (DomainError::Canceled, 499),
        ];
        for (err, status) in cases {
            assert_eq!(domain_error_to_response(err).status().as_u16(), status);
        }
    }
}
