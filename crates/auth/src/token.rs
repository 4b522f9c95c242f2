//! HS256 token verification and issuance.
//!
//! The verifier is stateless and performs no I/O: given the same token and
//! the same `now` it always returns the same answer. Revocation lives above
//! it, in the request gate.

use chrono::{DateTime, Duration, Utc};
use jsonwebtoken::errors::ErrorKind;
use jsonwebtoken::{Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use erpguard_core::UserId;

use crate::claims::{DEFAULT_ISSUER, validate_claims};
use crate::{RoleCode, SessionClaims, TokenError, TokenType};

/// Signing secret and lifetimes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct JwtSettings {
    pub secret: String,
    pub issuer: String,
    pub access_ttl_secs: i64,
    pub remember_me_ttl_secs: i64,
    pub refresh_ttl_secs: i64,
}

impl Default for JwtSettings {
    fn default() -> Self {
        Self {
            secret: String::new(),
            issuer: DEFAULT_ISSUER.to_string(),
            access_ttl_secs: 2 * 60 * 60,
            remember_me_ttl_secs: 7 * 24 * 60 * 60,
            refresh_ttl_secs: 30 * 24 * 60 * 60,
        }
    }
}

pub struct TokenVerifier {
    key: DecodingKey,
    validation: Validation,
    issuer: String,
}

impl TokenVerifier {
    pub fn new(settings: &JwtSettings) -> Self {
        let mut validation = Validation::new(Algorithm::HS256);
        // Time checks run in `validate_claims` against the caller's clock.
        validation.validate_exp = false;
        validation.validate_nbf = false;
        validation.leeway = 0;
        validation.set_required_spec_claims(&["exp", "iat", "nbf", "iss", "sub"]);

        Self {
            key: DecodingKey::from_secret(settings.secret.as_bytes()),
            validation,
            issuer: settings.issuer.clone(),
        }
    }

    /// Verify signature, algorithm and time window. Accepts either token type.
    pub fn verify(&self, token: &str, now: DateTime<Utc>) -> Result<SessionClaims, TokenError> {
        let token = token.trim();
        if token.is_empty() {
            return Err(TokenError::Malformed);
        }

        let data = jsonwebtoken::decode::<SessionClaims>(token, &self.key, &self.validation)
            .map_err(|e| match e.kind() {
                ErrorKind::InvalidSignature | ErrorKind::InvalidAlgorithm => {
                    TokenError::BadSignature
                }
                ErrorKind::ExpiredSignature => TokenError::Expired,
                _ => TokenError::Malformed,
            })?;

        validate_claims(&data.claims, &self.issuer, now)?;
        Ok(data.claims)
    }

    /// Verification for protected routes: refresh tokens are rejected.
    pub fn verify_access(&self, token: &str, now: DateTime<Utc>) -> Result<SessionClaims, TokenError> {
        let claims = self.verify(token, now)?;
        match claims.token_type {
            TokenType::Access => Ok(claims),
            TokenType::Refresh => Err(TokenError::WrongType),
        }
    }

    /// Verification for the refresh endpoint only.
    pub fn verify_refresh(&self, token: &str, now: DateTime<Utc>) -> Result<SessionClaims, TokenError> {
        let claims = self.verify(token, now)?;
        match claims.token_type {
            TokenType::Refresh => Ok(claims),
            TokenType::Access => Err(TokenError::WrongType),
        }
    }
}

/// Identity fields needed to mint an access token.
#[derive(Debug, Clone)]
pub struct TokenSubject {
    pub user_id: UserId,
    pub username: String,
    pub email: String,
    pub roles: Vec<RoleCode>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct IssuedToken {
    pub token: String,
    pub session_id: String,
    pub expires_at: DateTime<Utc>,
}

pub struct TokenIssuer {
    key: EncodingKey,
    settings: JwtSettings,
}

impl TokenIssuer {
    pub fn new(settings: &JwtSettings) -> Self {
        Self {
            key: EncodingKey::from_secret(settings.secret.as_bytes()),
            settings: settings.clone(),
        }
    }

    pub fn new_session_id() -> String {
        Uuid::now_v7().to_string()
    }

    pub fn refresh_ttl(&self) -> Duration {
        Duration::seconds(self.settings.refresh_ttl_secs)
    }

    pub fn issue_access(
        &self,
        subject: &TokenSubject,
        session_id: &str,
        remember_me: bool,
        now: DateTime<Utc>,
    ) -> Result<IssuedToken, TokenError> {
        let ttl = if remember_me {
            self.settings.remember_me_ttl_secs
        } else {
            self.settings.access_ttl_secs
        };

        let claims = SessionClaims {
            user_id: subject.user_id,
            username: subject.username.clone(),
            email: subject.email.clone(),
            roles: subject.roles.clone(),
            session_id: session_id.to_string(),
            token_type: TokenType::Access,
            exp: now.timestamp() + ttl,
            iat: now.timestamp(),
            nbf: now.timestamp(),
            iss: self.settings.issuer.clone(),
            sub: subject.username.clone(),
            jti: session_id.to_string(),
        };
        self.sign(&claims)
    }

    pub fn issue_refresh(
        &self,
        user_id: UserId,
        username: &str,
        session_id: &str,
        now: DateTime<Utc>,
    ) -> Result<IssuedToken, TokenError> {
        let claims = SessionClaims {
            user_id,
            username: username.to_string(),
            email: String::new(),
            roles: Vec::new(),
            session_id: session_id.to_string(),
            token_type: TokenType::Refresh,
            exp: now.timestamp() + self.settings.refresh_ttl_secs,
            iat: now.timestamp(),
            nbf: now.timestamp(),
            iss: self.settings.issuer.clone(),
            sub: username.to_string(),
            jti: session_id.to_string(),
        };
        self.sign(&claims)
    }

    fn sign(&self, claims: &SessionClaims) -> Result<IssuedToken, TokenError> {
        let token = jsonwebtoken::encode(&Header::new(Algorithm::HS256), claims, &self.key)
            .map_err(|_| TokenError::Malformed)?;
        let expires_at = claims.expires_at().ok_or(TokenError::Malformed)?;
        Ok(IssuedToken {
            token,
            session_id: claims.session_id.clone(),
            expires_at,
        })
    }
}
