use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use erpguard_core::{DomainError, UserId};

use crate::RoleCode;

pub const DEFAULT_ISSUER: &str = "erp-system";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TokenType {
    Access,
    Refresh,
}

/// Verified token payload (the session claim).
///
/// Refresh tokens carry only `user_id`, `username` and `session_id`; the
/// remaining identity fields deserialize to their empty defaults.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionClaims {
    pub user_id: UserId,
    pub username: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub email: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub roles: Vec<RoleCode>,
    pub session_id: String,
    pub token_type: TokenType,

    /// Expiration (unix seconds).
    pub exp: i64,
    /// Issued-at (unix seconds).
    pub iat: i64,
    /// Not-before (unix seconds).
    pub nbf: i64,
    pub iss: String,
    /// Always the username.
    pub sub: String,
    /// Always the session id.
    pub jti: String,
}

impl SessionClaims {
    pub fn expires_at(&self) -> Option<DateTime<Utc>> {
        DateTime::from_timestamp(self.exp, 0)
    }
}

/// Why a token was rejected. Callers must not reveal the variant to clients.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum TokenError {
    #[error("token is malformed")]
    Malformed,

    #[error("token has expired")]
    Expired,

    #[error("token signature is invalid")]
    BadSignature,

    #[error("token type is not accepted here")]
    WrongType,
}

impl From<TokenError> for DomainError {
    fn from(_: TokenError) -> Self {
        DomainError::Unauthenticated
    }
}

/// Deterministically validate the time window and binding claims.
///
/// Signature verification happens before this in [`crate::TokenVerifier`].
pub fn validate_claims(
    claims: &SessionClaims,
    issuer: &str,
    now: DateTime<Utc>,
) -> Result<(), TokenError> {
    let now = now.timestamp();

    if claims.exp <= claims.iat {
        return Err(TokenError::Malformed);
    }
    if claims.iss != issuer {
        return Err(TokenError::Malformed);
    }
    if claims.sub != claims.username || claims.jti != claims.session_id {
        return Err(TokenError::Malformed);
    }
    if now < claims.nbf {
        return Err(TokenError::Malformed);
    }
    if claims.exp <= now {
        return Err(TokenError::Expired);
    }
    Ok(())
}
