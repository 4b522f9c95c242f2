//! Append-only workflow state log for document instances.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use erpguard_core::{DomainError, UserId, WorkflowStateId};

/// One row of the log. Rows are never mutated; the newest row by
/// `created_at` holds the current state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DocumentWorkflowState {
    pub id: WorkflowStateId,
    pub doc_type: String,
    pub doc_name: String,
    pub state: String,
    pub submitted_by: Option<UserId>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewWorkflowState {
    pub doc_type: String,
    pub doc_name: String,
    pub state: String,
    pub submitted_by: Option<UserId>,
}

impl NewWorkflowState {
    pub fn validate(&self) -> Result<(), DomainError> {
        if self.doc_type.trim().is_empty() || self.doc_name.trim().is_empty() {
            return Err(DomainError::validation("doc_type and doc_name are required"));
        }
        if self.state.trim().is_empty() {
            return Err(DomainError::validation("state cannot be empty"));
        }
        Ok(())
    }

    pub fn into_row(self, id: WorkflowStateId, now: DateTime<Utc>) -> DocumentWorkflowState {
        DocumentWorkflowState {
            id,
            doc_type: self.doc_type,
            doc_name: self.doc_name,
            state: self.state,
            submitted_by: self.submitted_by,
            created_at: now,
            updated_at: now,
        }
    }
}

/// The authoritative row among `rows`: latest `created_at`, ties broken by id.
pub fn current_state(rows: &[DocumentWorkflowState]) -> Option<&DocumentWorkflowState> {
    rows.iter().max_by_key(|r| (r.created_at, r.id))
}

#[cfg(test)]
mod tests {
    use chrono::Duration;

    use super::*;

    fn row(id: i64, state: &str, at: DateTime<Utc>) -> DocumentWorkflowState {
        NewWorkflowState {
            doc_type: "Invoice".into(),
            doc_name: "INV-001".into(),
            state: state.into(),
            submitted_by: None,
        }
        .into_row(WorkflowStateId::new(id), at)
    }

    #[test]
    fn latest_row_wins_regardless_of_order() {
        let t0 = Utc::now();
        let rows = vec![
            row(3, "Approved", t0 + Duration::seconds(10)),
            row(1, "Draft", t0),
            row(2, "Pending", t0 + Duration::seconds(5)),
        ];
        assert_eq!(current_state(&rows).unwrap().state, "Approved");
    }

    #[test]
    fn empty_log_has_no_state() {
        assert!(current_state(&[]).is_none());
    }

    #[test]
    fn same_timestamp_prefers_higher_id() {
        let t0 = Utc::now();
        let rows = vec![row(1, "Draft", t0), row(2, "Submitted", t0)];
        assert_eq!(current_state(&rows).unwrap().state, "Submitted");
    }
}
