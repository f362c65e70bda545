//! Durable state for approval requests.
//!
//! Two implementations share one contract: [`PgStore`] for production and
//! [`MemoryStore`] for tests and single-process deployments. Both uphold the
//! same atomicity guarantees: a request row and its `created` history entry
//! are written together, and a terminal transition and its history entry are
//! written together or not at all.

pub mod memory;
pub mod postgres;

pub use memory::MemoryStore;
pub use postgres::PgStore;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::errors::ApprovalError;
use crate::models::{
    ApprovalFilter, ApprovalHistoryEntry, ApprovalRequest, ApprovalStatus, Decision, Outcome,
};

/// Result of a guarded status transition.
#[derive(Debug)]
pub enum CasOutcome {
    /// The transition was applied; this is the new state.
    Applied(ApprovalRequest),
    /// The request's status did not match the expected one; this is the
    /// current (already terminal) state.
    Stale(ApprovalRequest),
    /// No request with that id exists.
    Missing,
}

/// Storage contract consumed by the engine.
///
/// `compare_and_set_status` is what makes resolution race-safe: it applies the
/// transition only while the current status equals `expected`, and appends the
/// matching history entry in the same transaction. History writes are folded
/// into `create` and the CAS rather than exposed as a separate append, so a
/// partial transition can never be observed.
#[async_trait]
pub trait ApprovalStore: Send + Sync {
    /// Atomically persist a new request and its `created` history entry.
    /// Fails with [`ApprovalError::DuplicateRequest`] on id collision.
    async fn create(&self, request: &ApprovalRequest) -> Result<(), ApprovalError>;

    /// Atomically transition `request_id` from `expected` to the outcome's
    /// status, stamping the decision fields and appending a history entry.
    async fn compare_and_set_status(
        &self,
        request_id: &str,
        expected: ApprovalStatus,
        outcome: Outcome,
        decision: &Decision,
        now: DateTime<Utc>,
    ) -> Result<CasOutcome, ApprovalError>;

    async fn get(&self, request_id: &str) -> Result<Option<ApprovalRequest>, ApprovalError>;

    /// Fresh snapshot matching `filter`, ordered by `created_at` descending.
    async fn list(&self, filter: &ApprovalFilter) -> Result<Vec<ApprovalRequest>, ApprovalError>;

    /// History entries ordered by timestamp, ties broken by id.
    async fn get_history(
        &self,
        request_id: &str,
    ) -> Result<Vec<ApprovalHistoryEntry>, ApprovalError>;

    /// All still-pending requests; used by timer recovery at startup and the
    /// periodic overdue sweep.
    async fn list_pending(&self) -> Result<Vec<ApprovalRequest>, ApprovalError>;

    /// Remove a request and, by the storage-layer cascade contract, all of
    /// its history. Returns false if the id was unknown.
    async fn delete(&self, request_id: &str) -> Result<bool, ApprovalError>;
}
