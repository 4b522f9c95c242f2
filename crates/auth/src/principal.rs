use serde::{Deserialize, Serialize};

use erpguard_core::UserId;

use crate::{RoleCode, SessionClaims};

/// Identity of an authenticated caller, derived from a verified access token.
///
/// Lives for one request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Principal {
    pub user_id: UserId,
    pub username: String,
    pub email: String,
    pub roles: Vec<RoleCode>,
    pub session_id: String,
}

impl Principal {
    pub fn has_role(&self, code: &str) -> bool {
        self.roles.iter().any(|r| r.as_str() == code)
    }
}

impl From<SessionClaims> for Principal {
    fn from(claims: SessionClaims) -> Self {
        Self {
            user_id: claims.user_id,
            username: claims.username,
            email: claims.email,
            roles: claims.roles,
            session_id: claims.session_id,
        }
    }
}
