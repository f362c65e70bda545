//! Approval lifecycle engine.
//!
//! Orchestrates create/approve/reject/timeout transitions over a pluggable
//! store, guarded by a per-request lock manager and the store's
//! compare-and-set. A human decision and a firing timer can race for the
//! same request; exactly one wins and the other observes `AlreadyResolved`
//! with the authoritative final state.

use std::sync::{Arc, Weak};
use std::time::Duration;

use chrono::Utc;
use tokio::sync::mpsc;

use crate::errors::ApprovalError;
use crate::jobs::TimeoutScheduler;
use crate::lock::LockManager;
use crate::models::{
    ApprovalFilter, ApprovalHistoryEntry, ApprovalRequest, ApprovalSpec, ApprovalStats,
    ApprovalStatus, Decision, Outcome,
};
use crate::notification::{NotificationSink, ResolutionEvent};
use crate::store::{ApprovalStore, CasOutcome};

pub const DEFAULT_TIMEOUT_SECONDS: i64 = 1800;
pub const DEFAULT_LOCK_TIMEOUT: Duration = Duration::from_secs(60);

/// Re-arm delay when a fired timer loses a transient race (lock held,
/// storage hiccup). Short, so a timeout lands without waiting for the sweep.
const TIMEOUT_RETRY_SECONDS: i64 = 1;

/// Engine tuning knobs. The request timeout and the lock timeout are
/// independent settings; neither is derived from the other.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    pub default_timeout_seconds: i64,
    pub lock_timeout: Duration,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            default_timeout_seconds: DEFAULT_TIMEOUT_SECONDS,
            lock_timeout: DEFAULT_LOCK_TIMEOUT,
        }
    }
}

pub struct ApprovalEngine {
    store: Arc<dyn ApprovalStore>,
    locks: LockManager,
    scheduler: TimeoutScheduler,
    sinks: Vec<Arc<dyn NotificationSink>>,
    default_timeout_seconds: i64,
}

impl ApprovalEngine {
    /// Construct the engine and start its timeout firer loop. Must be called
    /// from within a tokio runtime.
    pub fn new(
        store: Arc<dyn ApprovalStore>,
        sinks: Vec<Arc<dyn NotificationSink>>,
        config: EngineConfig,
    ) -> Arc<Self> {
        let (scheduler, expired_rx) = TimeoutScheduler::new();
        let engine = Arc::new(Self {
            store,
            locks: LockManager::new(config.lock_timeout),
            scheduler,
            sinks,
            default_timeout_seconds: config.default_timeout_seconds,
        });
        Self::spawn_timeout_firer(Arc::downgrade(&engine), expired_rx);
        engine
    }

    /// Drain loop turning fired deadlines into timeout resolutions. Holds
    /// only a weak reference so dropping the last engine handle stops it.
    fn spawn_timeout_firer(engine: Weak<Self>, mut expired_rx: mpsc::UnboundedReceiver<String>) {
        tokio::spawn(async move {
            while let Some(request_id) = expired_rx.recv().await {
                let Some(engine) = engine.upgrade() else { break };
                match engine
                    .resolve(
                        &request_id,
                        Outcome::Timeout,
                        Decision::system("approval timed out"),
                    )
                    .await
                {
                    Ok(request) => {
                        tracing::info!(request_id = %request.request_id, "approval timed out");
                    }
                    Err(ApprovalError::AlreadyResolved { current }) => {
                        tracing::debug!(
                            request_id = %current.request_id,
                            status = %current.status,
                            "timeout fired late, request already resolved"
                        );
                    }
                    Err(ApprovalError::NotFound(id)) => {
                        tracing::debug!(request_id = %id, "timeout fired for deleted request");
                    }
                    Err(e) if e.is_retryable() => {
                        // transient lock or storage contention; try again
                        // shortly rather than leaning on the sweep job
                        tracing::warn!(request_id = %request_id, "timeout resolve deferred: {}", e);
                        engine.scheduler.arm(
                            &request_id,
                            Utc::now() + chrono::Duration::seconds(TIMEOUT_RETRY_SECONDS),
                        );
                    }
                    Err(e) => {
                        tracing::error!(request_id = %request_id, "timeout resolve failed: {}", e);
                    }
                }
            }
        });
    }

    /// Validate and persist a new pending request, write its `created` audit
    /// entry atomically, and arm its deadline timer.
    pub async fn create(&self, spec: ApprovalSpec) -> Result<ApprovalRequest, ApprovalError> {
        let request = self.build_request(spec)?;
        self.store.create(&request).await?;
        self.scheduler.arm(&request.request_id, request.deadline());
        tracing::info!(
            request_id = %request.request_id,
            project = %request.project,
            env = %request.env,
            timeout_seconds = request.timeout_seconds,
            "created approval request"
        );
        Ok(request)
    }

    fn build_request(&self, spec: ApprovalSpec) -> Result<ApprovalRequest, ApprovalError> {
        let required = [
            ("project", &spec.project),
            ("env", &spec.env),
            ("build", &spec.build),
            ("job", &spec.job),
            ("version", &spec.version),
        ];
        for (field, value) in required {
            if value.trim().is_empty() {
                return Err(ApprovalError::Validation(format!(
                    "required field '{}' is empty",
                    field
                )));
            }
        }

        let timeout_seconds = spec.timeout_seconds.unwrap_or(self.default_timeout_seconds);
        if timeout_seconds <= 0 {
            return Err(ApprovalError::Validation(format!(
                "timeout_seconds must be positive, got {}",
                timeout_seconds
            )));
        }

        let request_id = match spec.request_id {
            Some(id) if id.trim().is_empty() => {
                return Err(ApprovalError::Validation("request_id is empty".into()));
            }
            Some(id) => id,
            None => format!("{}-{}-{}", spec.job, spec.build, spec.env),
        };

        let now = Utc::now();
        Ok(ApprovalRequest {
            request_id,
            project: spec.project,
            env: spec.env,
            build: spec.build,
            job: spec.job,
            version: spec.version,
            description: spec.description.unwrap_or_else(|| "routine update".into()),
            action: spec.action.unwrap_or_else(|| "deploy".into()),
            timeout_seconds,
            status: ApprovalStatus::Pending,
            created_at: now,
            updated_at: now,
            approver: None,
            approver_role: None,
            comment: None,
        })
    }

    /// Transition a pending request to a terminal outcome.
    ///
    /// Lock acquisition serializes concurrent deciders; the store's CAS is
    /// the authoritative guard. On success the timer is disarmed and every
    /// notification sink is told, fire-and-forget.
    pub async fn resolve(
        &self,
        request_id: &str,
        outcome: Outcome,
        decision: Decision,
    ) -> Result<ApprovalRequest, ApprovalError> {
        let token = self.locks.acquire(request_id)?;
        let result = self
            .store
            .compare_and_set_status(
                request_id,
                ApprovalStatus::Pending,
                outcome,
                &decision,
                Utc::now(),
            )
            .await;
        self.locks.release(request_id, token);

        let resolved = match result? {
            CasOutcome::Applied(request) => request,
            CasOutcome::Stale(current) => {
                return Err(ApprovalError::AlreadyResolved {
                    current: Box::new(current),
                });
            }
            CasOutcome::Missing => {
                return Err(ApprovalError::NotFound(request_id.to_string()));
            }
        };

        self.scheduler.disarm(request_id);
        tracing::info!(
            request_id,
            status = %resolved.status,
            operator = %decision.operator,
            "resolved approval request"
        );
        self.dispatch_notifications(&resolved);
        Ok(resolved)
    }

    /// Fan a resolution out to every sink in a detached task.
    fn dispatch_notifications(&self, request: &ApprovalRequest) {
        if self.sinks.is_empty() {
            return;
        }
        let event = ResolutionEvent::from_request(request);
        let sinks = self.sinks.clone();
        tokio::spawn(async move {
            for sink in &sinks {
                if let Err(e) = sink.notify(&event).await {
                    tracing::warn!(
                        sink = sink.name(),
                        request_id = %event.request_id,
                        error = %e,
                        "notification delivery failed"
                    );
                }
            }
        });
    }

    pub async fn get(&self, request_id: &str) -> Result<ApprovalRequest, ApprovalError> {
        self.store
            .get(request_id)
            .await?
            .ok_or_else(|| ApprovalError::NotFound(request_id.to_string()))
    }

    /// Fresh snapshot ordered newest-first.
    pub async fn list(
        &self,
        filter: &ApprovalFilter,
    ) -> Result<Vec<ApprovalRequest>, ApprovalError> {
        self.store.list(filter).await
    }

    pub async fn history(
        &self,
        request_id: &str,
    ) -> Result<Vec<ApprovalHistoryEntry>, ApprovalError> {
        // surface NotFound for unknown ids instead of an empty sequence
        self.get(request_id).await?;
        self.store.get_history(request_id).await
    }

    pub async fn stats(&self) -> Result<ApprovalStats, ApprovalError> {
        let requests = self.store.list(&ApprovalFilter::default()).await?;
        Ok(ApprovalStats::tally(&requests))
    }

    /// Remove a request and its history (storage cascade). Admin surface.
    pub async fn delete(&self, request_id: &str) -> Result<(), ApprovalError> {
        if !self.store.delete(request_id).await? {
            return Err(ApprovalError::NotFound(request_id.to_string()));
        }
        self.scheduler.disarm(request_id);
        tracing::info!(request_id, "deleted approval request");
        Ok(())
    }

    /// Re-arm deadline timers for every still-pending request. Called once
    /// at startup; overdue requests fire immediately. Returns how many
    /// timers were armed.
    pub async fn recover_pending(&self) -> Result<usize, ApprovalError> {
        let pending = self.store.list_pending().await?;
        let recovered = pending.len();
        for request in pending {
            self.scheduler.arm(&request.request_id, request.deadline());
        }
        if recovered > 0 {
            tracing::info!(recovered, "re-armed timers for pending approvals");
        }
        Ok(recovered)
    }

    /// Time out every overdue pending request right now. The sweep job's
    /// entry point; races with armed timers are absorbed by idempotency.
    pub async fn expire_overdue(&self) -> Result<usize, ApprovalError> {
        let now = Utc::now();
        let mut expired = 0;
        for request in self.store.list_pending().await? {
            if !request.is_overdue(now) {
                continue;
            }
            match self
                .resolve(
                    &request.request_id,
                    Outcome::Timeout,
                    Decision::system("approval timed out"),
                )
                .await
            {
                Ok(_) => expired += 1,
                Err(e) if e.is_retryable() => {
                    tracing::warn!(request_id = %request.request_id, "sweep skip: {}", e);
                }
                Err(_) => {} // resolved by someone else in the meantime
            }
        }
        Ok(expired)
    }

    pub fn evict_expired_locks(&self) -> usize {
        self.locks.evict_expired()
    }

    /// Number of currently armed deadline timers.
    pub fn armed_timers(&self) -> usize {
        self.scheduler.armed()
    }

    /// Drain all timers. Call on process shutdown.
    pub fn shutdown(&self) {
        self.scheduler.shutdown();
    }
}
