//! PostgreSQL-backed permission store.
//!
//! ## Tables
//!
//! | Table | Key | Notes |
//! |-------|-----|-------|
//! | `doc_types` | `name` | `search_fields TEXT[]`, `sort_order` is `asc`/`desc` |
//! | `roles` | `id` | managed outside this crate |
//! | `user_roles` | `(user_id, role_id)` | |
//! | `permission_rules` | `id`, unique `(role_id, doc_type, permission_level)` | one `can_*` column per action |
//! | `field_permission_levels` | `id`, unique `(doc_type, field_name)` | |
//! | `user_permissions` | `id` | unique `(user_id, doc_type, allowed_value, for_value)` |
//! | `document_workflow_states` | `id` | indexed `(doc_type, doc_name, created_at DESC)` |
//!
//! ## Error Mapping
//!
//! | PostgreSQL Error Code | StoreError |
//! |-----------------------|------------|
//! | `23505` unique violation | `Conflict` with the table's code |
//! | `23503` foreign key violation | `Validation` |
//! | anything else | `Backend` |

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::{PgPoolOptions, PgRow};
use sqlx::{PgPool, Postgres, Row, Transaction};
use tracing::{info, instrument};

use erpguard_auth::{
    Action, ActionFlags, DocType, DocumentWorkflowState, FieldPermissionLevel,
    NewFieldPermissionLevel, NewPermissionRule, NewUserPermission, NewWorkflowState, Page,
    PermissionLevel, PermissionRule, RoleCode, RoleRef, SortOrder, UserPermission,
};
use erpguard_core::{FieldLevelId, RoleId, RuleId, UserId, UserPermissionId, WorkflowStateId};

use crate::config::DatabaseConfig;

use super::{
    DOCTYPE_EXISTS, DOCTYPE_IN_USE, FIELD_LEVEL_EXISTS, PERMISSION_RULE_EXISTS, PermissionStore,
    ROLE_ASSIGNMENT_EXISTS, StoreError, USER_PERMISSION_EXISTS,
};

const DOC_TYPE_COLUMNS: &str = "name, label, module, is_submittable, is_child_table, naming_rule, \
     search_fields, title_field, sort_field, sort_order, version";

const RULE_COLUMNS: &str = "id, role_id, doc_type, permission_level, can_read, can_write, \
     can_create, can_delete, can_submit, can_cancel, can_amend, can_print, can_email, can_import, \
     can_export, can_share, can_report, can_set_user_permissions, only_if_creator, condition";

const FIELD_LEVEL_COLUMNS: &str = "id, doc_type, field_name, permission_level, field_type";

const USER_PERMISSION_COLUMNS: &str = "id, user_id, doc_type, allowed_value, for_value, \
     is_default, applicable_for, hide_descendants";

const WORKFLOW_COLUMNS: &str = "id, doc_type, doc_name, state, submitted_by, created_at, updated_at";

/// Flag columns in `Action::ALL` order.
const FLAG_COLUMNS: [&str; 14] = [
    "can_read",
    "can_write",
    "can_create",
    "can_delete",
    "can_submit",
    "can_cancel",
    "can_amend",
    "can_print",
    "can_email",
    "can_import",
    "can_export",
    "can_share",
    "can_report",
    "can_set_user_permissions",
];

#[derive(Debug, Clone)]
pub struct PostgresPermissionStore {
    pool: Arc<PgPool>,
}

impl PostgresPermissionStore {
    pub fn new(pool: PgPool) -> Self {
        Self {
            pool: Arc::new(pool),
        }
    }

    pub async fn connect(config: &DatabaseConfig) -> Result<Self, StoreError> {
        let pool = PgPoolOptions::new()
            .max_connections(config.max_connections)
            .acquire_timeout(config.acquire_timeout())
            .connect(&config.url)
            .await
            .map_err(|e| map_sqlx_error("connect", e, ""))?;
        info!(max_connections = config.max_connections, "postgres permission store connected");
        Ok(Self::new(pool))
    }

    async fn begin(&self, operation: &str) -> Result<Transaction<'_, Postgres>, StoreError> {
        self.pool
            .begin()
            .await
            .map_err(|e| map_sqlx_error(operation, e, ""))
    }
}

fn col<'r, T>(row: &'r PgRow, name: &str) -> Result<T, StoreError>
where
    T: sqlx::Decode<'r, Postgres> + sqlx::Type<Postgres>,
{
    row.try_get(name)
        .map_err(|e| StoreError::Backend(format!("failed to decode column '{name}': {e}")))
}

fn level_col(row: &PgRow, name: &str) -> Result<PermissionLevel, StoreError> {
    let raw: i16 = col(row, name)?;
    PermissionLevel::new(i64::from(raw))
        .map_err(|e| StoreError::Backend(format!("stored level out of range: {e}")))
}

fn doc_type_from_row(row: &PgRow) -> Result<DocType, StoreError> {
    let sort_order: String = col(row, "sort_order")?;
    Ok(DocType {
        name: col(row, "name")?,
        label: col(row, "label")?,
        module: col(row, "module")?,
        is_submittable: col(row, "is_submittable")?,
        is_child_table: col(row, "is_child_table")?,
        naming_rule: col(row, "naming_rule")?,
        search_fields: col(row, "search_fields")?,
        title_field: col(row, "title_field")?,
        sort_field: col(row, "sort_field")?,
        sort_order: if sort_order.eq_ignore_ascii_case("asc") {
            SortOrder::Asc
        } else {
            SortOrder::Desc
        },
        version: col(row, "version")?,
    })
}

fn sort_order_str(order: SortOrder) -> &'static str {
    match order {
        SortOrder::Asc => "asc",
        SortOrder::Desc => "desc",
    }
}

fn rule_from_row(row: &PgRow) -> Result<PermissionRule, StoreError> {
    let mut permissions = ActionFlags::default();
    for (action, column) in Action::ALL.iter().zip(FLAG_COLUMNS) {
        permissions.set(*action, col(row, column)?);
    }
    Ok(PermissionRule {
        id: RuleId::new(col(row, "id")?),
        role_id: RoleId::new(col(row, "role_id")?),
        doc_type: col(row, "doc_type")?,
        permission_level: level_col(row, "permission_level")?,
        permissions,
        only_if_creator: col(row, "only_if_creator")?,
        condition: col(row, "condition")?,
    })
}

fn field_level_from_row(row: &PgRow) -> Result<FieldPermissionLevel, StoreError> {
    Ok(FieldPermissionLevel {
        id: FieldLevelId::new(col(row, "id")?),
        doc_type: col(row, "doc_type")?,
        field_name: col(row, "field_name")?,
        permission_level: level_col(row, "permission_level")?,
        field_type: col(row, "field_type")?,
    })
}

fn user_permission_from_row(row: &PgRow) -> Result<UserPermission, StoreError> {
    Ok(UserPermission {
        id: UserPermissionId::new(col(row, "id")?),
        user_id: UserId::new(col(row, "user_id")?),
        doc_type: col(row, "doc_type")?,
        allowed_value: col(row, "allowed_value")?,
        for_value: col(row, "for_value")?,
        is_default: col(row, "is_default")?,
        applicable_for: col(row, "applicable_for")?,
        hide_descendants: col(row, "hide_descendants")?,
    })
}

fn workflow_from_row(row: &PgRow) -> Result<DocumentWorkflowState, StoreError> {
    let submitted_by: Option<i64> = col(row, "submitted_by")?;
    let created_at: DateTime<Utc> = col(row, "created_at")?;
    let updated_at: DateTime<Utc> = col(row, "updated_at")?;
    Ok(DocumentWorkflowState {
        id: WorkflowStateId::new(col(row, "id")?),
        doc_type: col(row, "doc_type")?,
        doc_name: col(row, "doc_name")?,
        state: col(row, "state")?,
        submitted_by: submitted_by.map(UserId::new),
        created_at,
        updated_at,
    })
}

fn rows<T>(rows: &[PgRow], f: fn(&PgRow) -> Result<T, StoreError>) -> Result<Vec<T>, StoreError> {
    rows.iter().map(f).collect()
}

fn insert_rule_sql() -> String {
    format!(
        "INSERT INTO permission_rules (role_id, doc_type, permission_level, {flags}, \
         only_if_creator, condition) \
         VALUES ($1, $2, $3, {placeholders}, $18, $19) \
         RETURNING {RULE_COLUMNS}",
        flags = FLAG_COLUMNS.join(", "),
        placeholders = (4..18).map(|i| format!("${i}")).collect::<Vec<_>>().join(", "),
    )
}

fn update_rule_sql() -> String {
    let assignments = FLAG_COLUMNS
        .iter()
        .enumerate()
        .map(|(i, c)| format!("{c} = ${}", i + 4))
        .collect::<Vec<_>>()
        .join(", ");
    format!(
        "UPDATE permission_rules SET role_id = $1, doc_type = $2, permission_level = $3, \
         {assignments}, only_if_creator = $18, condition = $19 \
         WHERE id = $20 RETURNING {RULE_COLUMNS}"
    )
}

/// Bind `$1..=$19` of the insert/update statements.
fn bind_rule<'q>(
    mut query: sqlx::query::Query<'q, Postgres, sqlx::postgres::PgArguments>,
    rule: &'q NewPermissionRule,
) -> sqlx::query::Query<'q, Postgres, sqlx::postgres::PgArguments> {
    query = query
        .bind(rule.role_id.get())
        .bind(rule.doc_type.as_str())
        .bind(i16::from(rule.permission_level.get()));
    for action in Action::ALL {
        query = query.bind(rule.permissions.allows(action));
    }
    query
        .bind(rule.only_if_creator)
        .bind(rule.condition.as_deref())
}

#[async_trait]
impl PermissionStore for PostgresPermissionStore {
    #[instrument(skip(self), err)]
    async fn get_doc_type(&self, name: &str) -> Result<DocType, StoreError> {
        let row = sqlx::query(&format!("SELECT {DOC_TYPE_COLUMNS} FROM doc_types WHERE name = $1"))
            .bind(name)
            .fetch_optional(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("get_doc_type", e, DOCTYPE_EXISTS))?
            .ok_or_else(|| StoreError::NotFound(format!("doc type '{name}'")))?;
        doc_type_from_row(&row)
    }

    async fn list_doc_types(&self) -> Result<Vec<DocType>, StoreError> {
        let found = sqlx::query(&format!("SELECT {DOC_TYPE_COLUMNS} FROM doc_types ORDER BY name"))
            .fetch_all(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("list_doc_types", e, DOCTYPE_EXISTS))?;
        rows(&found, doc_type_from_row)
    }

    #[instrument(skip(self, doc_type), fields(doc_type = %doc_type.name), err)]
    async fn create_doc_type(&self, doc_type: DocType) -> Result<DocType, StoreError> {
        let row = sqlx::query(&format!(
            "INSERT INTO doc_types ({DOC_TYPE_COLUMNS}) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, 1) \
             RETURNING {DOC_TYPE_COLUMNS}"
        ))
        .bind(&doc_type.name)
        .bind(&doc_type.label)
        .bind(&doc_type.module)
        .bind(doc_type.is_submittable)
        .bind(doc_type.is_child_table)
        .bind(doc_type.naming_rule.as_deref())
        .bind(&doc_type.search_fields)
        .bind(doc_type.title_field.as_deref())
        .bind(doc_type.sort_field.as_deref())
        .bind(sort_order_str(doc_type.sort_order))
        .fetch_one(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("create_doc_type", e, DOCTYPE_EXISTS))?;
        doc_type_from_row(&row)
    }

    #[instrument(skip(self, doc_type), fields(doc_type = %doc_type.name), err)]
    async fn update_doc_type(&self, doc_type: DocType) -> Result<DocType, StoreError> {
        let row = sqlx::query(&format!(
            "UPDATE doc_types SET label = $2, module = $3, is_submittable = $4, \
             is_child_table = $5, naming_rule = $6, search_fields = $7, title_field = $8, \
             sort_field = $9, sort_order = $10, version = version + 1 \
             WHERE name = $1 RETURNING {DOC_TYPE_COLUMNS}"
        ))
        .bind(&doc_type.name)
        .bind(&doc_type.label)
        .bind(&doc_type.module)
        .bind(doc_type.is_submittable)
        .bind(doc_type.is_child_table)
        .bind(doc_type.naming_rule.as_deref())
        .bind(&doc_type.search_fields)
        .bind(doc_type.title_field.as_deref())
        .bind(doc_type.sort_field.as_deref())
        .bind(sort_order_str(doc_type.sort_order))
        .fetch_optional(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("update_doc_type", e, DOCTYPE_EXISTS))?
        .ok_or_else(|| StoreError::NotFound(format!("doc type '{}'", doc_type.name)))?;
        doc_type_from_row(&row)
    }

    #[instrument(skip(self), err)]
    async fn delete_doc_type(&self, name: &str) -> Result<DocType, StoreError> {
        let mut tx = self.begin("delete_doc_type").await?;

        let referenced: i64 =
            sqlx::query_scalar("SELECT COUNT(*) FROM permission_rules WHERE doc_type = $1")
                .bind(name)
                .fetch_one(&mut *tx)
                .await
                .map_err(|e| map_sqlx_error("delete_doc_type", e, DOCTYPE_IN_USE))?;
        if referenced > 0 {
            return Err(StoreError::conflict(
                DOCTYPE_IN_USE,
                format!("doc type '{name}' is referenced by {referenced} permission rules"),
            ));
        }

        sqlx::query("DELETE FROM field_permission_levels WHERE doc_type = $1")
            .bind(name)
            .execute(&mut *tx)
            .await
            .map_err(|e| map_sqlx_error("delete_doc_type", e, DOCTYPE_IN_USE))?;

        let row = sqlx::query(&format!(
            "DELETE FROM doc_types WHERE name = $1 RETURNING {DOC_TYPE_COLUMNS}"
        ))
        .bind(name)
        .fetch_optional(&mut *tx)
        .await
        .map_err(|e| map_sqlx_error("delete_doc_type", e, DOCTYPE_IN_USE))?
        .ok_or_else(|| StoreError::NotFound(format!("doc type '{name}'")))?;

        tx.commit()
            .await
            .map_err(|e| map_sqlx_error("delete_doc_type", e, DOCTYPE_IN_USE))?;
        doc_type_from_row(&row)
    }

    async fn count_rules_for_doc_type(&self, doc_type: &str) -> Result<u64, StoreError> {
        let n: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM permission_rules WHERE doc_type = $1")
            .bind(doc_type)
            .fetch_one(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("count_rules_for_doc_type", e, ""))?;
        Ok(n.max(0) as u64)
    }

    #[instrument(skip(self), fields(user_id = %user_id), err)]
    async fn get_user_roles(&self, user_id: UserId) -> Result<Vec<RoleRef>, StoreError> {
        let found = sqlx::query(
            r#"
            SELECT r.id, r.code
            FROM user_roles ur
            JOIN roles r ON r.id = ur.role_id
            WHERE ur.user_id = $1 AND r.enabled
            ORDER BY r.sort_order, r.id
            "#,
        )
        .bind(user_id.get())
        .fetch_all(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("get_user_roles", e, ""))?;

        found
            .iter()
            .map(|row| {
                let code: String = col(row, "code")?;
                Ok(RoleRef {
                    id: RoleId::new(col(row, "id")?),
                    code: RoleCode::new(code),
                })
            })
            .collect()
    }

    #[instrument(skip(self), fields(user_id = %user_id, role_id = %role_id), err)]
    async fn assign_user_role(&self, user_id: UserId, role_id: RoleId) -> Result<(), StoreError> {
        sqlx::query("INSERT INTO user_roles (user_id, role_id) VALUES ($1, $2)")
            .bind(user_id.get())
            .bind(role_id.get())
            .execute(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("assign_user_role", e, ROLE_ASSIGNMENT_EXISTS))?;
        Ok(())
    }

    #[instrument(skip(self), fields(user_id = %user_id, role_id = %role_id), err)]
    async fn revoke_user_role(&self, user_id: UserId, role_id: RoleId) -> Result<(), StoreError> {
        let result = sqlx::query("DELETE FROM user_roles WHERE user_id = $1 AND role_id = $2")
            .bind(user_id.get())
            .bind(role_id.get())
            .execute(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("revoke_user_role", e, ""))?;
        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound(format!(
                "role {role_id} assignment for user {user_id}"
            )));
        }
        Ok(())
    }

    async fn get_rule(&self, id: RuleId) -> Result<PermissionRule, StoreError> {
        let row = sqlx::query(&format!("SELECT {RULE_COLUMNS} FROM permission_rules WHERE id = $1"))
            .bind(id.get())
            .fetch_optional(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("get_rule", e, ""))?
            .ok_or_else(|| StoreError::NotFound(format!("permission rule {id}")))?;
        rule_from_row(&row)
    }

    #[instrument(skip(self), fields(role_id = %role_id), err)]
    async fn list_rules_by_role_and_doc_type(
        &self,
        role_id: RoleId,
        doc_type: &str,
    ) -> Result<Vec<PermissionRule>, StoreError> {
        let found = sqlx::query(&format!(
            "SELECT {RULE_COLUMNS} FROM permission_rules \
             WHERE role_id = $1 AND doc_type = $2 ORDER BY permission_level, id"
        ))
        .bind(role_id.get())
        .bind(doc_type)
        .fetch_all(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("list_rules_by_role_and_doc_type", e, ""))?;
        rows(&found, rule_from_row)
    }

    async fn list_rules_by_role(&self, role_id: RoleId) -> Result<Vec<PermissionRule>, StoreError> {
        let found = sqlx::query(&format!(
            "SELECT {RULE_COLUMNS} FROM permission_rules WHERE role_id = $1 \
             ORDER BY doc_type, permission_level"
        ))
        .bind(role_id.get())
        .fetch_all(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("list_rules_by_role", e, ""))?;
        rows(&found, rule_from_row)
    }

    async fn list_rules_by_doc_type(&self, doc_type: &str) -> Result<Vec<PermissionRule>, StoreError> {
        let found = sqlx::query(&format!(
            "SELECT {RULE_COLUMNS} FROM permission_rules WHERE doc_type = $1 \
             ORDER BY role_id, permission_level"
        ))
        .bind(doc_type)
        .fetch_all(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("list_rules_by_doc_type", e, ""))?;
        rows(&found, rule_from_row)
    }

    #[instrument(skip(self, rule), fields(role_id = %rule.role_id, doc_type = %rule.doc_type), err)]
    async fn create_rule(&self, rule: NewPermissionRule) -> Result<PermissionRule, StoreError> {
        let sql = insert_rule_sql();
        let row = bind_rule(sqlx::query(&sql), &rule)
            .fetch_one(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("create_rule", e, PERMISSION_RULE_EXISTS))?;
        rule_from_row(&row)
    }

    #[instrument(skip(self, rules), fields(count = rules.len()), err)]
    async fn create_rules_batch(
        &self,
        rules: Vec<NewPermissionRule>,
    ) -> Result<Vec<PermissionRule>, StoreError> {
        let sql = insert_rule_sql();
        let mut tx = self.begin("create_rules_batch").await?;
        let mut created = Vec::with_capacity(rules.len());
        for rule in &rules {
            let row = bind_rule(sqlx::query(&sql), rule)
                .fetch_one(&mut *tx)
                .await
                .map_err(|e| map_sqlx_error("create_rules_batch", e, PERMISSION_RULE_EXISTS))?;
            created.push(rule_from_row(&row)?);
        }
        tx.commit()
            .await
            .map_err(|e| map_sqlx_error("create_rules_batch", e, PERMISSION_RULE_EXISTS))?;
        Ok(created)
    }

    #[instrument(skip(self, rule), fields(rule_id = %id), err)]
    async fn update_rule(
        &self,
        id: RuleId,
        rule: NewPermissionRule,
    ) -> Result<(PermissionRule, PermissionRule), StoreError> {
        let mut tx = self.begin("update_rule").await?;

        let previous = sqlx::query(&format!(
            "SELECT {RULE_COLUMNS} FROM permission_rules WHERE id = $1 FOR UPDATE"
        ))
        .bind(id.get())
        .fetch_optional(&mut *tx)
        .await
        .map_err(|e| map_sqlx_error("update_rule", e, PERMISSION_RULE_EXISTS))?
        .ok_or_else(|| StoreError::NotFound(format!("permission rule {id}")))?;
        let previous = rule_from_row(&previous)?;

        let sql = update_rule_sql();
        let row = bind_rule(sqlx::query(&sql), &rule)
            .bind(id.get())
            .fetch_one(&mut *tx)
            .await
            .map_err(|e| map_sqlx_error("update_rule", e, PERMISSION_RULE_EXISTS))?;
        let updated = rule_from_row(&row)?;

        tx.commit()
            .await
            .map_err(|e| map_sqlx_error("update_rule", e, PERMISSION_RULE_EXISTS))?;
        Ok((previous, updated))
    }

    #[instrument(skip(self), fields(rule_id = %id), err)]
    async fn delete_rule(&self, id: RuleId) -> Result<PermissionRule, StoreError> {
        let row = sqlx::query(&format!(
            "DELETE FROM permission_rules WHERE id = $1 RETURNING {RULE_COLUMNS}"
        ))
        .bind(id.get())
        .fetch_optional(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("delete_rule", e, ""))?
        .ok_or_else(|| StoreError::NotFound(format!("permission rule {id}")))?;
        rule_from_row(&row)
    }

    #[instrument(skip(self), fields(user_id = %user_id), err)]
    async fn get_min_permission_level(
        &self,
        user_id: UserId,
        doc_type: &str,
    ) -> Result<PermissionLevel, StoreError> {
        let min: Option<i16> = sqlx::query_scalar(
            r#"
            SELECT MIN(pr.permission_level)
            FROM permission_rules pr
            JOIN user_roles ur ON ur.role_id = pr.role_id
            JOIN roles r ON r.id = pr.role_id AND r.enabled
            WHERE ur.user_id = $1 AND pr.doc_type = $2 AND (pr.can_read OR pr.can_write)
            "#,
        )
        .bind(user_id.get())
        .bind(doc_type)
        .fetch_one(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("get_min_permission_level", e, ""))?;

        match min {
            Some(raw) => PermissionLevel::new(i64::from(raw))
                .map_err(|e| StoreError::Backend(format!("stored level out of range: {e}"))),
            None => Ok(PermissionLevel::DOCUMENT),
        }
    }

    async fn list_field_levels(&self, doc_type: &str) -> Result<Vec<FieldPermissionLevel>, StoreError> {
        let found = sqlx::query(&format!(
            "SELECT {FIELD_LEVEL_COLUMNS} FROM field_permission_levels \
             WHERE doc_type = $1 ORDER BY field_name"
        ))
        .bind(doc_type)
        .fetch_all(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("list_field_levels", e, ""))?;
        rows(&found, field_level_from_row)
    }

    #[instrument(skip(self, level), fields(doc_type = %level.doc_type, field = %level.field_name), err)]
    async fn create_field_level(
        &self,
        level: NewFieldPermissionLevel,
    ) -> Result<FieldPermissionLevel, StoreError> {
        let row = sqlx::query(&format!(
            "INSERT INTO field_permission_levels (doc_type, field_name, permission_level, field_type) \
             VALUES ($1, $2, $3, $4) RETURNING {FIELD_LEVEL_COLUMNS}"
        ))
        .bind(&level.doc_type)
        .bind(&level.field_name)
        .bind(i16::from(level.permission_level.get()))
        .bind(&level.field_type)
        .fetch_one(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("create_field_level", e, FIELD_LEVEL_EXISTS))?;
        field_level_from_row(&row)
    }

    #[instrument(skip(self, level), fields(field_level_id = %id), err)]
    async fn update_field_level(
        &self,
        id: FieldLevelId,
        level: NewFieldPermissionLevel,
    ) -> Result<(FieldPermissionLevel, FieldPermissionLevel), StoreError> {
        let mut tx = self.begin("update_field_level").await?;

        let previous = sqlx::query(&format!(
            "SELECT {FIELD_LEVEL_COLUMNS} FROM field_permission_levels WHERE id = $1 FOR UPDATE"
        ))
        .bind(id.get())
        .fetch_optional(&mut *tx)
        .await
        .map_err(|e| map_sqlx_error("update_field_level", e, FIELD_LEVEL_EXISTS))?
        .ok_or_else(|| StoreError::NotFound(format!("field permission level {id}")))?;
        let previous = field_level_from_row(&previous)?;

        let row = sqlx::query(&format!(
            "UPDATE field_permission_levels SET doc_type = $1, field_name = $2, \
             permission_level = $3, field_type = $4 WHERE id = $5 RETURNING {FIELD_LEVEL_COLUMNS}"
        ))
        .bind(&level.doc_type)
        .bind(&level.field_name)
        .bind(i16::from(level.permission_level.get()))
        .bind(&level.field_type)
        .bind(id.get())
        .fetch_one(&mut *tx)
        .await
        .map_err(|e| map_sqlx_error("update_field_level", e, FIELD_LEVEL_EXISTS))?;
        let updated = field_level_from_row(&row)?;

        tx.commit()
            .await
            .map_err(|e| map_sqlx_error("update_field_level", e, FIELD_LEVEL_EXISTS))?;
        Ok((previous, updated))
    }

    #[instrument(skip(self), fields(field_level_id = %id), err)]
    async fn delete_field_level(&self, id: FieldLevelId) -> Result<FieldPermissionLevel, StoreError> {
        let row = sqlx::query(&format!(
            "DELETE FROM field_permission_levels WHERE id = $1 RETURNING {FIELD_LEVEL_COLUMNS}"
        ))
        .bind(id.get())
        .fetch_optional(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("delete_field_level", e, ""))?
        .ok_or_else(|| StoreError::NotFound(format!("field permission level {id}")))?;
        field_level_from_row(&row)
    }

    async fn get_user_permission(&self, id: UserPermissionId) -> Result<UserPermission, StoreError> {
        let row = sqlx::query(&format!(
            "SELECT {USER_PERMISSION_COLUMNS} FROM user_permissions WHERE id = $1"
        ))
        .bind(id.get())
        .fetch_optional(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("get_user_permission", e, ""))?
        .ok_or_else(|| StoreError::NotFound(format!("user permission {id}")))?;
        user_permission_from_row(&row)
    }

    #[instrument(skip(self), fields(user_id = %user_id), err)]
    async fn list_user_permissions(
        &self,
        user_id: UserId,
        doc_type: &str,
        page: Page,
    ) -> Result<Vec<UserPermission>, StoreError> {
        let found = sqlx::query(&format!(
            "SELECT {USER_PERMISSION_COLUMNS} FROM user_permissions \
             WHERE user_id = $1 AND doc_type = $2 ORDER BY id LIMIT $3 OFFSET $4"
        ))
        .bind(user_id.get())
        .bind(doc_type)
        .bind(i64::from(page.size))
        .bind(i64::try_from(page.offset()).unwrap_or(i64::MAX))
        .fetch_all(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("list_user_permissions", e, ""))?;
        rows(&found, user_permission_from_row)
    }

    async fn count_user_permissions(&self, user_id: UserId, doc_type: &str) -> Result<u64, StoreError> {
        let n: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM user_permissions WHERE user_id = $1 AND doc_type = $2",
        )
        .bind(user_id.get())
        .bind(doc_type)
        .fetch_one(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("count_user_permissions", e, ""))?;
        Ok(n.max(0) as u64)
    }

    #[instrument(skip(self, permission), fields(user_id = %permission.user_id), err)]
    async fn create_user_permission(
        &self,
        permission: NewUserPermission,
    ) -> Result<UserPermission, StoreError> {
        let row = insert_user_permission(&permission)
            .fetch_one(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("create_user_permission", e, USER_PERMISSION_EXISTS))?;
        user_permission_from_row(&row)
    }

    #[instrument(skip(self, permissions), fields(count = permissions.len()), err)]
    async fn create_user_permissions_batch(
        &self,
        permissions: Vec<NewUserPermission>,
    ) -> Result<Vec<UserPermission>, StoreError> {
        let mut tx = self.begin("create_user_permissions_batch").await?;
        let mut created = Vec::with_capacity(permissions.len());
        for permission in &permissions {
            let row = insert_user_permission(permission)
                .fetch_one(&mut *tx)
                .await
                .map_err(|e| {
                    map_sqlx_error("create_user_permissions_batch", e, USER_PERMISSION_EXISTS)
                })?;
            created.push(user_permission_from_row(&row)?);
        }
        tx.commit()
            .await
            .map_err(|e| map_sqlx_error("create_user_permissions_batch", e, USER_PERMISSION_EXISTS))?;
        Ok(created)
    }

    #[instrument(skip(self, permission), fields(user_permission_id = %id), err)]
    async fn update_user_permission(
        &self,
        id: UserPermissionId,
        permission: NewUserPermission,
    ) -> Result<(UserPermission, UserPermission), StoreError> {
        let mut tx = self.begin("update_user_permission").await?;

        let previous = sqlx::query(&format!(
            "SELECT {USER_PERMISSION_COLUMNS} FROM user_permissions WHERE id = $1 FOR UPDATE"
        ))
        .bind(id.get())
        .fetch_optional(&mut *tx)
        .await
        .map_err(|e| map_sqlx_error("update_user_permission", e, USER_PERMISSION_EXISTS))?
        .ok_or_else(|| StoreError::NotFound(format!("user permission {id}")))?;
        let previous = user_permission_from_row(&previous)?;

        let row = sqlx::query(&format!(
            "UPDATE user_permissions SET user_id = $1, doc_type = $2, allowed_value = $3, \
             for_value = $4, is_default = $5, applicable_for = $6, hide_descendants = $7 \
             WHERE id = $8 RETURNING {USER_PERMISSION_COLUMNS}"
        ))
        .bind(permission.user_id.get())
        .bind(&permission.doc_type)
        .bind(&permission.allowed_value)
        .bind(&permission.for_value)
        .bind(permission.is_default)
        .bind(permission.applicable_for.as_deref())
        .bind(permission.hide_descendants)
        .bind(id.get())
        .fetch_one(&mut *tx)
        .await
        .map_err(|e| map_sqlx_error("update_user_permission", e, USER_PERMISSION_EXISTS))?;
        let updated = user_permission_from_row(&row)?;

        tx.commit()
            .await
            .map_err(|e| map_sqlx_error("update_user_permission", e, USER_PERMISSION_EXISTS))?;
        Ok((previous, updated))
    }

    #[instrument(skip(self), fields(user_permission_id = %id), err)]
    async fn delete_user_permission(&self, id: UserPermissionId) -> Result<UserPermission, StoreError> {
        let row = sqlx::query(&format!(
            "DELETE FROM user_permissions WHERE id = $1 RETURNING {USER_PERMISSION_COLUMNS}"
        ))
        .bind(id.get())
        .fetch_optional(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("delete_user_permission", e, ""))?
        .ok_or_else(|| StoreError::NotFound(format!("user permission {id}")))?;
        user_permission_from_row(&row)
    }

    #[instrument(skip(self, state), fields(doc_type = %state.doc_type, doc_name = %state.doc_name), err)]
    async fn append_workflow_state(
        &self,
        state: NewWorkflowState,
    ) -> Result<DocumentWorkflowState, StoreError> {
        let row = sqlx::query(&format!(
            "INSERT INTO document_workflow_states (doc_type, doc_name, state, submitted_by, created_at, updated_at) \
             VALUES ($1, $2, $3, $4, NOW(), NOW()) RETURNING {WORKFLOW_COLUMNS}"
        ))
        .bind(&state.doc_type)
        .bind(&state.doc_name)
        .bind(&state.state)
        .bind(state.submitted_by.map(|u| u.get()))
        .fetch_one(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("append_workflow_state", e, ""))?;
        workflow_from_row(&row)
    }

    async fn workflow_history(
        &self,
        doc_type: &str,
        doc_name: &str,
    ) -> Result<Vec<DocumentWorkflowState>, StoreError> {
        let found = sqlx::query(&format!(
            "SELECT {WORKFLOW_COLUMNS} FROM document_workflow_states \
             WHERE doc_type = $1 AND doc_name = $2 ORDER BY created_at DESC, id DESC"
        ))
        .bind(doc_type)
        .bind(doc_name)
        .fetch_all(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("workflow_history", e, ""))?;
        rows(&found, workflow_from_row)
    }

    async fn current_workflow_state(
        &self,
        doc_type: &str,
        doc_name: &str,
    ) -> Result<Option<DocumentWorkflowState>, StoreError> {
        let row = sqlx::query(&format!(
            "SELECT {WORKFLOW_COLUMNS} FROM document_workflow_states \
             WHERE doc_type = $1 AND doc_name = $2 ORDER BY created_at DESC, id DESC LIMIT 1"
        ))
        .bind(doc_type)
        .bind(doc_name)
        .fetch_optional(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("current_workflow_state", e, ""))?;
        row.as_ref().map(workflow_from_row).transpose()
    }
}

fn insert_user_permission(
    permission: &NewUserPermission,
) -> sqlx::query::Query<'_, Postgres, sqlx::postgres::PgArguments> {
    sqlx::query(USER_PERMISSION_INSERT)
        .bind(permission.user_id.get())
        .bind(permission.doc_type.as_str())
        .bind(permission.allowed_value.as_str())
        .bind(permission.for_value.as_str())
        .bind(permission.is_default)
        .bind(permission.applicable_for.as_deref())
        .bind(permission.hide_descendants)
}

const USER_PERMISSION_INSERT: &str = "INSERT INTO user_permissions \
     (user_id, doc_type, allowed_value, for_value, is_default, applicable_for, hide_descendants) \
     VALUES ($1, $2, $3, $4, $5, $6, $7) \
     RETURNING id, user_id, doc_type, allowed_value, for_value, is_default, applicable_for, hide_descendants";

/// Map sqlx errors onto [`StoreError`]. `conflict_code` names the unique
/// constraint the statement can violate.
fn map_sqlx_error(operation: &str, err: sqlx::Error, conflict_code: &'static str) -> StoreError {
    match err {
        sqlx::Error::Database(db_err) => {
            let msg = format!("database error in {}: {}", operation, db_err.message());
            match db_err.code().as_deref() {
                Some("23505") if !conflict_code.is_empty() => StoreError::conflict(conflict_code, msg),
                Some("23503") => StoreError::Validation(msg),
                _ => StoreError::Backend(msg),
            }
        }
        sqlx::Error::PoolClosed => {
            StoreError::Backend(format!("connection pool closed in {operation}"))
        }
        sqlx::Error::PoolTimedOut => {
            StoreError::Backend(format!("timed out acquiring a connection in {operation}"))
        }
        sqlx::Error::RowNotFound => StoreError::NotFound(operation.to_string()),
        _ => StoreError::Backend(format!("sqlx error in {operation}: {err}")),
    }
}
