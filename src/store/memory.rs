//! In-memory store backing tests and single-process deployments.
//!
//! One mutex around the whole state gives the same transactional guarantees
//! the Postgres store gets from `BEGIN`/`COMMIT`: a request row and its
//! history entry always change together. Critical sections are short and
//! never held across an await point.

use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::errors::ApprovalError;
use crate::models::{
    ApprovalFilter, ApprovalHistoryEntry, ApprovalRequest, ApprovalStatus, Decision,
    HistoryAction, Outcome,
};
use crate::store::{ApprovalStore, CasOutcome};

#[derive(Default)]
struct Inner {
    requests: HashMap<String, ApprovalRequest>,
    history: Vec<ApprovalHistoryEntry>,
    next_history_id: i64,
}

impl Inner {
    fn append_history(
        &mut self,
        request_id: &str,
        action: HistoryAction,
        decision: &Decision,
        timestamp: DateTime<Utc>,
    ) {
        self.next_history_id += 1;
        self.history.push(ApprovalHistoryEntry {
            id: self.next_history_id,
            request_id: request_id.to_string(),
            action,
            operator: decision.operator.clone(),
            operator_role: decision.operator_role.clone(),
            comment: decision.comment.clone(),
            timestamp,
        });
    }
}

#[derive(Default)]
pub struct MemoryStore {
    inner: Mutex<Inner>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, Inner>, ApprovalError> {
        self.inner
            .lock()
            .map_err(|_| ApprovalError::Storage("memory store poisoned".into()))
    }
}

#[async_trait]
impl ApprovalStore for MemoryStore {
    async fn create(&self, request: &ApprovalRequest) -> Result<(), ApprovalError> {
        let mut inner = self.lock()?;
        if inner.requests.contains_key(&request.request_id) {
            return Err(ApprovalError::DuplicateRequest(request.request_id.clone()));
        }
        inner
            .requests
            .insert(request.request_id.clone(), request.clone());
        inner.append_history(
            &request.request_id,
            HistoryAction::Created,
            &Decision::system("approval request created"),
            request.created_at,
        );
        Ok(())
    }

    async fn compare_and_set_status(
        &self,
        request_id: &str,
        expected: ApprovalStatus,
        outcome: Outcome,
        decision: &Decision,
        now: DateTime<Utc>,
    ) -> Result<CasOutcome, ApprovalError> {
        let mut inner = self.lock()?;
        let Some(current) = inner.requests.get(request_id).cloned() else {
            return Ok(CasOutcome::Missing);
        };
        if current.status != expected {
            return Ok(CasOutcome::Stale(current));
        }

        let request = inner
            .requests
            .get_mut(request_id)
            .ok_or_else(|| ApprovalError::Storage("request vanished under lock".into()))?;
        request.status = outcome.status();
        request.approver = Some(decision.operator.clone());
        request.approver_role = decision.operator_role.clone();
        request.comment = decision.comment.clone();
        request.updated_at = now;
        let updated = request.clone();

        inner.append_history(request_id, outcome.into(), decision, now);
        Ok(CasOutcome::Applied(updated))
    }

    async fn get(&self, request_id: &str) -> Result<Option<ApprovalRequest>, ApprovalError> {
        Ok(self.lock()?.requests.get(request_id).cloned())
    }

    async fn list(&self, filter: &ApprovalFilter) -> Result<Vec<ApprovalRequest>, ApprovalError> {
        let inner = self.lock()?;
        let mut requests: Vec<ApprovalRequest> = inner
            .requests
            .values()
            .filter(|r| filter.matches(r))
            .cloned()
            .collect();
        requests.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(requests)
    }

    async fn get_history(
        &self,
        request_id: &str,
    ) -> Result<Vec<ApprovalHistoryEntry>, ApprovalError> {
        let inner = self.lock()?;
        let mut entries: Vec<ApprovalHistoryEntry> = inner
            .history
            .iter()
            .filter(|e| e.request_id == request_id)
            .cloned()
            .collect();
        entries.sort_by(|a, b| a.timestamp.cmp(&b.timestamp).then(a.id.cmp(&b.id)));
        Ok(entries)
    }

    async fn list_pending(&self) -> Result<Vec<ApprovalRequest>, ApprovalError> {
        self.list(&ApprovalFilter {
            status: Some(ApprovalStatus::Pending),
            ..Default::default()
        })
        .await
    }

    async fn delete(&self, request_id: &str) -> Result<bool, ApprovalError> {
        let mut inner = self.lock()?;
        let removed = inner.requests.remove(request_id).is_some();
        if removed {
            inner.history.retain(|e| e.request_id != request_id);
        }
        Ok(removed)
    }
}
