//! `erpguard-auth`: permission model, session tokens and pure evaluation.
//!
//! This crate is decoupled from HTTP and storage.

pub mod authorize;
pub mod claims;
pub mod context;
pub mod doctype;
pub mod permissions;
pub mod principal;
pub mod roles;
pub mod rules;
pub mod token;
pub mod user_permission;
pub mod workflow;

pub use authorize::Document;
pub use claims::{DEFAULT_ISSUER, SessionClaims, TokenError, TokenType, validate_claims};
pub use context::RequestContext;
pub use doctype::{DocType, FieldAccess, FieldPermissionLevel, NewFieldPermissionLevel, SortOrder};
pub use permissions::{Action, ActionFlags, PermissionLevel};
pub use principal::Principal;
pub use roles::{Role, RoleCode, RoleRef};
pub use rules::{NewPermissionRule, PermissionRule};
pub use token::{IssuedToken, JwtSettings, TokenIssuer, TokenSubject, TokenVerifier};
pub use user_permission::{NewUserPermission, Page, UserPermission};
pub use workflow::{DocumentWorkflowState, NewWorkflowState, current_state};
