//! Pure evaluation: rule matching, level derivation, field and row redaction.
//!
//! - No IO
//! - No panics
//! - Deny by default
//!
//! The async evaluator in `erpguard-infra` loads inputs through the cache and
//! hands them to these functions.

use std::collections::{BTreeMap, BTreeSet};

use serde_json::Value;

use crate::{Action, FieldAccess, FieldPermissionLevel, PermissionLevel, PermissionRule, UserPermission};

/// A document as seen by the redaction functions.
pub type Document = serde_json::Map<String, Value>;

/// True iff any rule grants `action` at exactly `level`.
///
/// Conflicting rules at the same level are unioned.
pub fn rules_grant<'a>(
    rules: impl IntoIterator<Item = &'a PermissionRule>,
    action: Action,
    level: PermissionLevel,
) -> bool {
    rules.into_iter().any(|r| r.grants(action, level))
}

/// Least level among rules granting read or write, `None` when there is none.
pub fn min_level<'a>(
    rules: impl IntoIterator<Item = &'a PermissionRule>,
) -> Option<PermissionLevel> {
    rules
        .into_iter()
        .filter(|r| r.grants_read_or_write())
        .map(|r| r.permission_level)
        .min()
}

/// Field name to level map. Later duplicates overwrite earlier ones.
pub fn field_level_map(levels: &[FieldPermissionLevel]) -> BTreeMap<String, PermissionLevel> {
    levels
        .iter()
        .map(|f| (f.field_name.clone(), f.permission_level))
        .collect()
}

/// One entry per classified field, ordered by field name.
pub fn accessible_fields(
    levels: &BTreeMap<String, PermissionLevel>,
    user_level: PermissionLevel,
) -> Vec<FieldAccess> {
    levels
        .iter()
        .map(|(name, level)| FieldAccess {
            field_name: name.clone(),
            can_access: user_level >= *level,
            permission_level: *level,
        })
        .collect()
}

/// Drop every key classified above `user_level`. Unclassified keys are level 0.
pub fn redact_document(
    doc: &mut Document,
    levels: &BTreeMap<String, PermissionLevel>,
    user_level: PermissionLevel,
) {
    doc.retain(|key, _| {
        levels
            .get(key)
            .is_none_or(|field_level| *field_level <= user_level)
    });
}

/// Keep only documents every applicable restriction allows.
///
/// Restrictions are grouped by `allowed_value`: a row must match at least one
/// `for_value` in each group. The compared field is `name` (or `id`) when the
/// restriction targets the listed doc type itself, otherwise the field named
/// after `allowed_value` (as written or in snake_case). Rows missing that
/// field are dropped.
pub fn filter_rows(
    docs: Vec<Document>,
    restrictions: &[UserPermission],
    doc_type: &str,
) -> Vec<Document> {
    let mut groups: BTreeMap<&str, BTreeSet<&str>> = BTreeMap::new();
    for r in restrictions
        .iter()
        .filter(|r| r.doc_type == doc_type && r.applies_to(doc_type))
    {
        groups
            .entry(r.allowed_value.as_str())
            .or_default()
            .insert(r.for_value.as_str());
    }

    if groups.is_empty() {
        return docs;
    }

    docs.into_iter()
        .filter(|doc| {
            groups.iter().all(|(allowed, values)| {
                reference_value(doc, allowed, doc_type)
                    .is_some_and(|v| values.contains(v.as_str()))
            })
        })
        .collect()
}

fn reference_value(doc: &Document, allowed_value: &str, doc_type: &str) -> Option<String> {
    let value = if allowed_value == doc_type {
        doc.get("name").or_else(|| doc.get("id"))
    } else {
        doc.get(allowed_value)
            .or_else(|| doc.get(&to_snake_case(allowed_value)))
    }?;

    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}

fn to_snake_case(name: &str) -> String {
    let mut out = String::with_capacity(name.len() + 4);
    for (i, ch) in name.chars().enumerate() {
        if ch.is_uppercase() {
            if i > 0 {
                out.push('_');
            }
            out.extend(ch.to_lowercase());
        } else if ch == ' ' || ch == '-' {
            out.push('_');
        } else {
            out.push(ch);
        }
    }
    out
}

/// `docType.action` codes granted at document level, sorted and deduplicated.
pub fn permission_codes<'a>(rules: impl IntoIterator<Item = &'a PermissionRule>) -> Vec<String> {
    let codes: BTreeSet<String> = rules
        .into_iter()
        .filter(|r| r.permission_level.is_document_level())
        .flat_map(|r| {
            r.permissions
                .granted()
                .map(move |a| format!("{}.{}", r.doc_type, a.as_str()))
        })
        .collect();
    codes.into_iter().collect()
}
