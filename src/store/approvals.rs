//! In-memory approval tracker.
//!
//! Records pending approval requests and their resolution. Owned by a single
//! role loop, so no locking. Resolved records leave the tracker only through
//! [`ApprovalTracker::consume`]; a pending one can be withdrawn when its
//! request never reached the admin.

use std::collections::HashMap;

use chrono::Utc;
use uuid::Uuid;

use crate::errors::{AppError, AppResult};
use crate::models::approval::{ApprovalRecord, ApprovalStatus, SubjectData};

#[derive(Debug, Default)]
pub struct ApprovalTracker {
    records: HashMap<String, ApprovalRecord>,
    /// Insertion order of the ids still present in `records`.
    order: Vec<String>,
}

impl ApprovalTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a new pending record under a freshly generated id.
    pub fn submit(&mut self, subject_data: SubjectData) -> String {
        let approval_id = loop {
            let id = Uuid::new_v4().to_string();
            if !self.records.contains_key(&id) {
                break id;
            }
        };
        self.insert(ApprovalRecord::pending(approval_id.clone(), subject_data, None));
        approval_id
    }

    /// Insert a pending record whose id was assigned by the requesting party.
    ///
    /// Returns `false` (and leaves the existing record alone) when the id is
    /// already tracked, which happens on webhook re-delivery.
    pub fn track(
        &mut self,
        approval_id: &str,
        subject_data: SubjectData,
        origin_connection_id: Option<String>,
    ) -> bool {
        if self.records.contains_key(approval_id) {
            tracing::info!(approval_id, "approval request already tracked, ignoring duplicate");
            return false;
        }
        self.insert(ApprovalRecord::pending(
            approval_id.to_string(),
            subject_data,
            origin_connection_id,
        ));
        true
    }

    fn insert(&mut self, record: ApprovalRecord) {
        self.order.push(record.approval_id.clone());
        self.records.insert(record.approval_id.clone(), record);
    }

    /// Resolve a pending record.
    ///
    /// Returns `Ok(true)` when the status changed and `Ok(false)` when the
    /// record was already resolved; a duplicate never reverts the first answer.
    pub fn record_response(
        &mut self,
        approval_id: &str,
        approved: bool,
        comment: &str,
    ) -> AppResult<bool> {
        let record = self
            .records
            .get_mut(approval_id)
            .ok_or_else(|| AppError::not_found("approval", approval_id))?;

        if record.status.is_terminal() {
            tracing::info!(
                approval_id,
                status = %record.status,
                "duplicate approval response ignored"
            );
            return Ok(false);
        }

        record.status = ApprovalStatus::from_decision(approved);
        record.responded_at = Some(Utc::now());
        if !comment.is_empty() {
            record.comment = Some(comment.to_string());
        }
        tracing::info!(approval_id, status = %record.status, "approval resolved");
        Ok(true)
    }

    pub fn get(&self, approval_id: &str) -> Option<&ApprovalRecord> {
        self.records.get(approval_id)
    }

    pub fn list_pending(&self) -> Vec<&ApprovalRecord> {
        self.list_by_status(ApprovalStatus::Pending)
    }

    pub fn list_by_status(&self, status: ApprovalStatus) -> Vec<&ApprovalRecord> {
        self.list_all()
            .into_iter()
            .filter(|r| r.status == status)
            .collect()
    }

    /// Every tracked record, in insertion order.
    pub fn list_all(&self) -> Vec<&ApprovalRecord> {
        self.order
            .iter()
            .filter_map(|id| self.records.get(id))
            .collect()
    }

    /// Remove and return a resolved record.
    ///
    /// Unknown and still-pending ids fail with `NotFound`, so a record is
    /// handed out at most once.
    pub fn consume(&mut self, approval_id: &str) -> AppResult<ApprovalRecord> {
        match self.records.get(approval_id) {
            Some(r) if r.status.is_terminal() => {}
            _ => return Err(AppError::not_found("resolved approval", approval_id)),
        }
        self.order.retain(|id| id != approval_id);
        self.records
            .remove(approval_id)
            .ok_or_else(|| AppError::not_found("resolved approval", approval_id))
    }

    /// Drop a still-pending record whose request was never delivered.
    ///
    /// Resolved records are left alone; they go through `consume`.
    pub fn withdraw(&mut self, approval_id: &str) -> AppResult<ApprovalRecord> {
        match self.records.get(approval_id) {
            Some(r) if r.status == ApprovalStatus::Pending => {}
            _ => return Err(AppError::not_found("pending approval", approval_id)),
        }
        self.order.retain(|id| id != approval_id);
        self.records
            .remove(approval_id)
            .ok_or_else(|| AppError::not_found("pending approval", approval_id))
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}
