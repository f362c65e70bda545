//! Deadline behavior under a paused clock: the timer fires iff no human
//! resolution happens first, late firings are no-ops, and sinks hear about
//! every terminal transition exactly as it settled.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use deploygate::engine::{ApprovalEngine, EngineConfig};
use deploygate::errors::ApprovalError;
use deploygate::models::{
    ApprovalFilter, ApprovalHistoryEntry, ApprovalRequest, ApprovalSpec, ApprovalStatus, Decision,
    HistoryAction, Outcome,
};
use deploygate::notification::{NotificationSink, ResolutionEvent};
use deploygate::store::{ApprovalStore, CasOutcome, MemoryStore};
use tokio::sync::Mutex;

/// Test sink capturing every emitted event.
#[derive(Default)]
struct RecordingSink {
    events: Mutex<Vec<ResolutionEvent>>,
}

#[async_trait]
impl NotificationSink for RecordingSink {
    fn name(&self) -> &'static str {
        "recording"
    }

    async fn notify(&self, event: &ResolutionEvent) -> anyhow::Result<()> {
        self.events.lock().await.push(event.clone());
        Ok(())
    }
}

fn engine_with_sink() -> (Arc<ApprovalEngine>, Arc<RecordingSink>) {
    let sink = Arc::new(RecordingSink::default());
    let engine = ApprovalEngine::new(
        Arc::new(MemoryStore::new()),
        vec![sink.clone()],
        EngineConfig::default(),
    );
    (engine, sink)
}

fn short_spec(timeout_seconds: i64) -> ApprovalSpec {
    ApprovalSpec {
        request_id: None,
        project: "webapp".into(),
        env: "prod".into(),
        build: "001".into(),
        job: "webapp-deploy".into(),
        version: "v1.0.0".into(),
        description: None,
        action: None,
        timeout_seconds: Some(timeout_seconds),
    }
}

fn alice() -> Decision {
    Decision {
        operator: "alice".into(),
        operator_role: Some("ops".into()),
        comment: Some("lgtm".into()),
    }
}

async fn settle() {
    // let fired timers, the firer loop and notification tasks run
    for _ in 0..10 {
        tokio::task::yield_now().await;
    }
}

#[tokio::test(start_paused = true)]
async fn unattended_request_times_out_with_system_as_approver() {
    let (engine, sink) = engine_with_sink();
    let created = engine.create(short_spec(5)).await.unwrap();
    assert_eq!(created.status, ApprovalStatus::Pending);

    tokio::time::sleep(std::time::Duration::from_secs(6)).await;
    settle().await;

    let timed_out = engine.get(&created.request_id).await.unwrap();
    assert_eq!(timed_out.status, ApprovalStatus::Timeout);
    assert_eq!(timed_out.approver.as_deref(), Some("system"));

    let history = engine.history(&created.request_id).await.unwrap();
    assert_eq!(history.len(), 2);
    assert_eq!(history[0].action, HistoryAction::Created);
    assert_eq!(history[1].action, HistoryAction::Timeout);

    let events = sink.events.lock().await;
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].status, ApprovalStatus::Timeout);
}

#[tokio::test(start_paused = true)]
async fn human_resolution_beats_the_clock_and_the_late_timer_is_a_noop() {
    let (engine, sink) = engine_with_sink();
    let created = engine.create(short_spec(5)).await.unwrap();

    tokio::time::sleep(std::time::Duration::from_secs(1)).await;
    let resolved = engine
        .resolve(&created.request_id, Outcome::Approved, alice())
        .await
        .unwrap();
    assert_eq!(resolved.status, ApprovalStatus::Approved);

    // well past the original deadline
    tokio::time::sleep(std::time::Duration::from_secs(10)).await;
    settle().await;

    let still_approved = engine.get(&created.request_id).await.unwrap();
    assert_eq!(still_approved.status, ApprovalStatus::Approved);
    assert_eq!(still_approved.approver.as_deref(), Some("alice"));

    let history = engine.history(&created.request_id).await.unwrap();
    assert_eq!(history.len(), 2);
    assert_eq!(history[1].action, HistoryAction::Approved);

    // exactly one notification: the approval, never a timeout
    let events = sink.events.lock().await;
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].status, ApprovalStatus::Approved);
}

#[tokio::test(start_paused = true)]
async fn recovery_rearms_timers_for_preexisting_pending_requests() {
    let store = Arc::new(MemoryStore::new());

    // a request persisted by a previous process, already overdue
    let now = Utc::now();
    let overdue = ApprovalRequest {
        request_id: "stale-deploy-9-prod".into(),
        project: "webapp".into(),
        env: "prod".into(),
        build: "9".into(),
        job: "stale-deploy".into(),
        version: "v0.9.0".into(),
        description: "routine update".into(),
        action: "deploy".into(),
        timeout_seconds: 60,
        status: ApprovalStatus::Pending,
        created_at: now - chrono::Duration::seconds(120),
        updated_at: now - chrono::Duration::seconds(120),
        approver: None,
        approver_role: None,
        comment: None,
    };
    store.create(&overdue).await.unwrap();

    let engine = ApprovalEngine::new(store, vec![], EngineConfig::default());
    let recovered = engine.recover_pending().await.unwrap();
    assert_eq!(recovered, 1);

    tokio::time::sleep(std::time::Duration::from_millis(10)).await;
    settle().await;

    let request = engine.get("stale-deploy-9-prod").await.unwrap();
    assert_eq!(request.status, ApprovalStatus::Timeout);
}

#[tokio::test]
async fn expire_overdue_sweep_times_out_only_past_deadline_requests() {
    let store = Arc::new(MemoryStore::new());

    // already past its deadline, as after a long scheduler outage
    let now = Utc::now();
    let overdue = ApprovalRequest {
        request_id: "stale-deploy-9-prod".into(),
        project: "webapp".into(),
        env: "prod".into(),
        build: "9".into(),
        job: "stale-deploy".into(),
        version: "v0.9.0".into(),
        description: "routine update".into(),
        action: "deploy".into(),
        timeout_seconds: 60,
        status: ApprovalStatus::Pending,
        created_at: now - chrono::Duration::seconds(120),
        updated_at: now - chrono::Duration::seconds(120),
        approver: None,
        approver_role: None,
        comment: None,
    };
    store.create(&overdue).await.unwrap();

    let engine = ApprovalEngine::new(store, vec![], EngineConfig::default());
    let not_due = engine.create(short_spec(3600)).await.unwrap();

    let expired = engine.expire_overdue().await.unwrap();
    assert_eq!(expired, 1);

    assert_eq!(
        engine.get("stale-deploy-9-prod").await.unwrap().status,
        ApprovalStatus::Timeout
    );
    assert_eq!(
        engine.get(&not_due.request_id).await.unwrap().status,
        ApprovalStatus::Pending
    );

    // a second sweep finds nothing left to do
    assert_eq!(engine.expire_overdue().await.unwrap(), 0);
}

/// Store whose first `failures` guarded transitions fail as if the database
/// blinked; everything else passes through.
struct FlakyStore {
    inner: MemoryStore,
    failures: AtomicUsize,
}

impl FlakyStore {
    fn new(failures: usize) -> Self {
        Self {
            inner: MemoryStore::new(),
            failures: AtomicUsize::new(failures),
        }
    }
}

#[async_trait]
impl ApprovalStore for FlakyStore {
    async fn create(&self, request: &ApprovalRequest) -> Result<(), ApprovalError> {
        self.inner.create(request).await
    }

    async fn compare_and_set_status(
        &self,
        request_id: &str,
        expected: ApprovalStatus,
        outcome: Outcome,
        decision: &Decision,
        now: DateTime<Utc>,
    ) -> Result<CasOutcome, ApprovalError> {
        if self
            .failures
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
        {
            return Err(ApprovalError::Storage("connection reset".into()));
        }
        self.inner
            .compare_and_set_status(request_id, expected, outcome, decision, now)
            .await
    }

    async fn get(&self, request_id: &str) -> Result<Option<ApprovalRequest>, ApprovalError> {
        self.inner.get(request_id).await
    }

    async fn list(&self, filter: &ApprovalFilter) -> Result<Vec<ApprovalRequest>, ApprovalError> {
        self.inner.list(filter).await
    }

    async fn get_history(
        &self,
        request_id: &str,
    ) -> Result<Vec<ApprovalHistoryEntry>, ApprovalError> {
        self.inner.get_history(request_id).await
    }

    async fn list_pending(&self) -> Result<Vec<ApprovalRequest>, ApprovalError> {
        self.inner.list_pending().await
    }

    async fn delete(&self, request_id: &str) -> Result<bool, ApprovalError> {
        self.inner.delete(request_id).await
    }
}

#[tokio::test(start_paused = true)]
async fn timer_retries_past_a_transient_storage_failure() {
    let engine = ApprovalEngine::new(
        Arc::new(FlakyStore::new(1)),
        vec![],
        EngineConfig::default(),
    );
    let created = engine.create(short_spec(5)).await.unwrap();

    // deadline passes; the first resolve attempt hits the storage hiccup
    tokio::time::sleep(std::time::Duration::from_secs(6)).await;
    settle().await;
    assert_eq!(
        engine.get(&created.request_id).await.unwrap().status,
        ApprovalStatus::Pending
    );

    // the re-armed retry lands without any sweep job running
    tokio::time::sleep(std::time::Duration::from_secs(2)).await;
    settle().await;

    let timed_out = engine.get(&created.request_id).await.unwrap();
    assert_eq!(timed_out.status, ApprovalStatus::Timeout);
    assert_eq!(timed_out.approver.as_deref(), Some("system"));

    let history = engine.history(&created.request_id).await.unwrap();
    assert_eq!(history.len(), 2);
    assert_eq!(history[1].action, HistoryAction::Timeout);
}

#[tokio::test(start_paused = true)]
async fn shutdown_drains_armed_timers() {
    let (engine, _sink) = engine_with_sink();
    engine.create(short_spec(5)).await.unwrap();
    engine
        .create(ApprovalSpec {
            build: "002".into(),
            ..short_spec(5)
        })
        .await
        .unwrap();
    assert_eq!(engine.armed_timers(), 2);

    engine.shutdown();
    assert_eq!(engine.armed_timers(), 0);

    tokio::time::sleep(std::time::Duration::from_secs(10)).await;
    settle().await;

    // nothing fired after the drain
    let stats = engine.stats().await.unwrap();
    assert_eq!(stats.pending, 2);
    assert_eq!(stats.timeout, 0);
}
