//! Static route table: (method, path template) to a permission requirement.
//!
//! Paths are looked up without the `/api/v1` prefix after numeric segments
//! are rewritten to `{id}`. Any `{..}` template segment matches one path
//! segment. Routes missing from the table are denied.
//!
//! RPC methods (`/module.Service/Method`) are mapped by verb prefix and a
//! module to doc type table instead.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use erpguard_auth::{Action, PermissionLevel};
use erpguard_core::DomainError;

pub const API_PREFIX: &str = "/api/v1";

/// The permission triple a route demands.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RoutePermission {
    pub doc_type: String,
    pub action: Action,
    pub level: PermissionLevel,
}

impl RoutePermission {
    fn document(doc_type: &str, action: Action) -> Self {
        Self {
            doc_type: doc_type.to_string(),
            action,
            level: PermissionLevel::DOCUMENT,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RouteRequirement {
    /// No token needed.
    Public,
    /// A valid access token; the handler performs its own checks.
    Authenticated,
    Permission(RoutePermission),
    /// Not in the table.
    Unknown,
}

/// One configured replacement or addition to the built-in table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RouteOverride {
    pub method: String,
    /// Template relative to `/api/v1`, e.g. `/reports/{id}`.
    pub path: String,
    #[serde(default)]
    pub public: bool,
    #[serde(default)]
    pub doc_type: Option<String>,
    #[serde(default)]
    pub action: Option<String>,
    #[serde(default)]
    pub level: Option<i64>,
}

impl RouteOverride {
    fn requirement(&self) -> Result<RouteRequirement, DomainError> {
        if self.public {
            return Ok(RouteRequirement::Public);
        }
        let Some(doc_type) = self.doc_type.as_deref().filter(|d| !d.trim().is_empty()) else {
            return Ok(RouteRequirement::Authenticated);
        };
        let action = match &self.action {
            Some(a) => a.parse::<Action>()?,
            None => Action::Read,
        };
        let level = PermissionLevel::new(self.level.unwrap_or(0))?;
        Ok(RouteRequirement::Permission(RoutePermission {
            doc_type: doc_type.to_string(),
            action,
            level,
        }))
    }
}

#[derive(Debug, Clone)]
struct RouteEntry {
    method: String,
    segments: Vec<String>,
    requirement: RouteRequirement,
}

impl RouteEntry {
    fn new(method: &str, template: &str, requirement: RouteRequirement) -> Self {
        Self {
            method: method.to_ascii_uppercase(),
            segments: split(template).map(str::to_string).collect(),
            requirement,
        }
    }

    fn matches(&self, method: &str, path: &[String]) -> bool {
        self.method == method
            && self.segments.len() == path.len()
            && self
                .segments
                .iter()
                .zip(path)
                .all(|(t, p)| is_placeholder(t) || t == p)
    }

    fn same_route(&self, other: &RouteEntry) -> bool {
        self.method == other.method && self.segments == other.segments
    }
}

#[derive(Debug, Clone)]
pub struct RouteTable {
    entries: Vec<RouteEntry>,
    rpc_modules: BTreeMap<String, String>,
}

impl RouteTable {
    /// The routes this service exposes.
    pub fn builtin() -> Self {
        use Action::{Create, Delete, Read, Write};
        use RouteRequirement::{Authenticated, Public};

        let perm = |doc_type: &str, action| {
            RouteRequirement::Permission(RoutePermission::document(doc_type, action))
        };

        let entries = vec![
            RouteEntry::new("GET", "/health", Public),
            RouteEntry::new("POST", "/auth/login", Public),
            RouteEntry::new("POST", "/auth/register", Public),
            RouteEntry::new("POST", "/auth/refresh", Public),
            RouteEntry::new("POST", "/auth/logout", Authenticated),
            // Permission queries check the target user inside the handler.
            RouteEntry::new("GET", "/permissions/me", Authenticated),
            RouteEntry::new("POST", "/permissions/check", Authenticated),
            RouteEntry::new("GET", "/permissions/level", Authenticated),
            RouteEntry::new("GET", "/permissions/fields", Authenticated),
            RouteEntry::new("POST", "/permissions/filter", Authenticated),
            // Doc types
            RouteEntry::new("GET", "/doctypes", perm("DocType", Read)),
            RouteEntry::new("POST", "/doctypes", perm("DocType", Create)),
            RouteEntry::new("GET", "/doctypes/{name}", perm("DocType", Read)),
            RouteEntry::new("PUT", "/doctypes/{name}", perm("DocType", Write)),
            RouteEntry::new("DELETE", "/doctypes/{name}", perm("DocType", Delete)),
            // Rules
            RouteEntry::new("GET", "/permission-rules", perm("PermissionRule", Read)),
            RouteEntry::new("POST", "/permission-rules", perm("PermissionRule", Create)),
            RouteEntry::new("POST", "/permission-rules/batch", perm("PermissionRule", Create)),
            RouteEntry::new("GET", "/permission-rules/{id}", perm("PermissionRule", Read)),
            RouteEntry::new("PUT", "/permission-rules/{id}", perm("PermissionRule", Write)),
            RouteEntry::new("DELETE", "/permission-rules/{id}", perm("PermissionRule", Delete)),
            // Field levels
            RouteEntry::new("GET", "/field-levels", perm("FieldPermissionLevel", Read)),
            RouteEntry::new("POST", "/field-levels", perm("FieldPermissionLevel", Create)),
            RouteEntry::new("PUT", "/field-levels/{id}", perm("FieldPermissionLevel", Write)),
            RouteEntry::new("DELETE", "/field-levels/{id}", perm("FieldPermissionLevel", Delete)),
            // User permissions
            RouteEntry::new("GET", "/user-permissions", perm("UserPermission", Read)),
            RouteEntry::new("POST", "/user-permissions", perm("UserPermission", Create)),
            RouteEntry::new("POST", "/user-permissions/batch", perm("UserPermission", Create)),
            RouteEntry::new("GET", "/user-permissions/{id}", perm("UserPermission", Read)),
            RouteEntry::new("PUT", "/user-permissions/{id}", perm("UserPermission", Write)),
            RouteEntry::new("DELETE", "/user-permissions/{id}", perm("UserPermission", Delete)),
            // Role assignments
            RouteEntry::new("GET", "/users/{id}/roles", perm("UserRole", Read)),
            RouteEntry::new("POST", "/users/{id}/roles", perm("UserRole", Create)),
            RouteEntry::new("DELETE", "/users/{id}/roles/{id}", perm("UserRole", Delete)),
            // Workflow log, gated on the target doc type inside the handler.
            RouteEntry::new("GET", "/workflow/{doc_type}/{name}", Authenticated),
            RouteEntry::new("GET", "/workflow/{doc_type}/{name}/history", Authenticated),
            RouteEntry::new("POST", "/workflow/{doc_type}/{name}/states", Authenticated),
        ];

        let rpc_modules = [
            ("doctype", "DocType"),
            ("permission", "PermissionRule"),
            ("fieldlevel", "FieldPermissionLevel"),
            ("userpermission", "UserPermission"),
            ("workflow", "DocumentWorkflowState"),
        ]
        .into_iter()
        .map(|(m, d)| (m.to_string(), d.to_string()))
        .collect();

        Self {
            entries,
            rpc_modules,
        }
    }

    /// Apply configured overrides. An override replaces the built-in entry
    /// with the same method and template, otherwise it is added.
    pub fn with_overrides(mut self, overrides: &[RouteOverride]) -> Result<Self, DomainError> {
        for o in overrides {
            let entry = RouteEntry::new(&o.method, &o.path, o.requirement()?);
            match self.entries.iter_mut().find(|e| e.same_route(&entry)) {
                Some(existing) => *existing = entry,
                None => self.entries.push(entry),
            }
        }
        Ok(self)
    }

    /// Map an RPC module name to the doc type its methods act on.
    #[must_use]
    pub fn with_rpc_module(mut self, module: impl Into<String>, doc_type: impl Into<String>) -> Self {
        self.rpc_modules.insert(module.into(), doc_type.into());
        self
    }

    pub fn resolve(&self, method: &str, path: &str) -> RouteRequirement {
        if is_rpc_path(path) {
            return self
                .resolve_rpc(path)
                .map(RouteRequirement::Permission)
                .unwrap_or(RouteRequirement::Unknown);
        }

        let method = method.to_ascii_uppercase();
        let normalized = normalize_path(path);
        self.entries
            .iter()
            .find(|e| e.matches(&method, &normalized))
            .map(|e| e.requirement.clone())
            .unwrap_or(RouteRequirement::Unknown)
    }

    /// `/module.Service/Method` to the permission the call needs.
    pub fn resolve_rpc(&self, full_method: &str) -> Option<RoutePermission> {
        let (service, method) = full_method.trim_start_matches('/').split_once('/')?;
        let (module, _) = service.split_once('.')?;
        let doc_type = self.rpc_modules.get(&module.to_ascii_lowercase())?;
        let action = rpc_action(method)?;
        Some(RoutePermission::document(doc_type, action))
    }
}

/// `/module.Service/Method` to its `module.action` permission code.
pub fn rpc_permission_code(full_method: &str) -> Option<String> {
    let (service, method) = full_method.trim_start_matches('/').split_once('/')?;
    let (module, _) = service.split_once('.')?;
    Some(format!("{}.{}", module, rpc_action(method)?))
}

/// Verb prefix of an RPC method name to the action it performs.
fn rpc_action(method: &str) -> Option<Action> {
    const VERBS: [(&str, Action); 8] = [
        ("Get", Action::Read),
        ("List", Action::Read),
        ("Check", Action::Read),
        ("Create", Action::Create),
        ("Update", Action::Write),
        ("Delete", Action::Delete),
        ("Submit", Action::Submit),
        ("Cancel", Action::Cancel),
    ];
    VERBS
        .iter()
        .find(|(verb, _)| method.starts_with(verb))
        .map(|(_, action)| *action)
}

fn is_rpc_path(path: &str) -> bool {
    let trimmed = path.trim_start_matches('/');
    match trimmed.split_once('/') {
        Some((service, method)) => service.contains('.') && !method.is_empty() && !method.contains('/'),
        None => false,
    }
}

fn split(path: &str) -> impl Iterator<Item = &str> {
    path.split('/').filter(|s| !s.is_empty())
}

fn is_placeholder(segment: &str) -> bool {
    segment.starts_with('{') && segment.ends_with('}')
}

/// Strip the API prefix and rewrite all-digit segments to `{id}`.
pub fn normalize_path(path: &str) -> Vec<String> {
    let path = path.split('?').next().unwrap_or_default();
    let relative = path.strip_prefix(API_PREFIX).unwrap_or(path);
    split(relative)
        .map(|seg| {
            if seg.bytes().all(|b| b.is_ascii_digit()) {
                "{id}".to_string()
            } else {
                seg.to_string()
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn numeric_segments_normalize_to_id() {
        assert_eq!(
            normalize_path("/api/v1/permission-rules/42"),
            vec!["permission-rules".to_string(), "{id}".to_string()]
        );
        assert_eq!(normalize_path("/api/v1/doctypes/Invoice")[1], "Invoice");
    }

    #[test]
    fn builtin_table_resolves_protected_and_public_routes() {
        let table = RouteTable::builtin();
        assert_eq!(table.resolve("get", "/api/v1/health"), RouteRequirement::Public);
        assert_eq!(
            table.resolve("DELETE", "/api/v1/permission-rules/7"),
            RouteRequirement::Permission(RoutePermission::document("PermissionRule", Action::Delete))
        );
        assert_eq!(
            table.resolve("PUT", "/api/v1/doctypes/Sales Invoice"),
            RouteRequirement::Permission(RoutePermission::document("DocType", Action::Write))
        );
    }

    #[test]
    fn unknown_routes_and_methods_are_unknown() {
        let table = RouteTable::builtin();
        assert_eq!(table.resolve("GET", "/api/v1/users"), RouteRequirement::Unknown);
        assert_eq!(table.resolve("PATCH", "/api/v1/doctypes"), RouteRequirement::Unknown);
    }

    #[test]
    fn overrides_replace_or_extend() {
        let table = RouteTable::builtin()
            .with_overrides(&[
                RouteOverride {
                    method: "GET".into(),
                    path: "/doctypes".into(),
                    public: true,
                    doc_type: None,
                    action: None,
                    level: None,
                },
                RouteOverride {
                    method: "GET".into(),
                    path: "/reports/{id}".into(),
                    public: false,
                    doc_type: Some("Report".into()),
                    action: Some("print".into()),
                    level: Some(2),
                },
            ])
            .unwrap();

        assert_eq!(table.resolve("GET", "/api/v1/doctypes"), RouteRequirement::Public);
        assert_eq!(
            table.resolve("GET", "/api/v1/reports/9"),
            RouteRequirement::Permission(RoutePermission {
                doc_type: "Report".into(),
                action: Action::Print,
                level: PermissionLevel::new(2).unwrap(),
            })
        );
    }

    #[test]
    fn override_with_bad_action_is_rejected() {
        let bad = RouteOverride {
            method: "GET".into(),
            path: "/x".into(),
            public: false,
            doc_type: Some("X".into()),
            action: Some("teleport".into()),
            level: None,
        };
        assert!(RouteTable::builtin().with_overrides(&[bad]).is_err());
    }

    #[test]
    fn rpc_methods_map_by_verb_prefix() {
        let table = RouteTable::builtin();
        let p = table
            .resolve_rpc("/permission.PermissionService/CheckDocumentPermission")
            .unwrap();
        assert_eq!(p.doc_type, "PermissionRule");
        assert_eq!(p.action, Action::Read);
        assert_eq!(
            rpc_permission_code("/permission.PermissionService/CheckDocumentPermission").as_deref(),
            Some("permission.read")
        );
        assert_eq!(
            table.resolve_rpc("/doctype.DocTypeService/DeleteDocType").unwrap().action,
            Action::Delete
        );
        assert!(table.resolve_rpc("/doctype.DocTypeService/Frobnicate").is_none());
        assert!(table.resolve_rpc("/billing.BillingService/GetBill").is_none());
    }

    #[test]
    fn rpc_paths_resolve_through_resolve() {
        let table = RouteTable::builtin().with_rpc_module("billing", "Invoice");
        assert_eq!(
            table.resolve("POST", "/billing.BillingService/SubmitInvoice"),
            RouteRequirement::Permission(RoutePermission::document("Invoice", Action::Submit))
        );
        assert_eq!(
            table.resolve("POST", "/unknown.Service/GetThing"),
            RouteRequirement::Unknown
        );
    }
}
