//! Engine lifecycle tests over the in-memory store: creation invariants,
//! race behavior between concurrent deciders, idempotency, and cascade
//! deletes.

use std::sync::Arc;

use deploygate::engine::{ApprovalEngine, EngineConfig};
use deploygate::errors::ApprovalError;
use deploygate::models::{
    ApprovalFilter, ApprovalSpec, ApprovalStatus, Decision, HistoryAction, Outcome,
};
use deploygate::store::MemoryStore;

fn engine() -> Arc<ApprovalEngine> {
    ApprovalEngine::new(Arc::new(MemoryStore::new()), vec![], EngineConfig::default())
}

fn webapp_spec() -> ApprovalSpec {
    ApprovalSpec {
        request_id: None,
        project: "webapp".into(),
        env: "prod".into(),
        build: "001".into(),
        job: "webapp-deploy".into(),
        version: "v1.0.0".into(),
        description: None,
        action: None,
        timeout_seconds: Some(1800),
    }
}

fn alice() -> Decision {
    Decision {
        operator: "alice".into(),
        operator_role: Some("ops".into()),
        comment: Some("lgtm".into()),
    }
}

/// Retry through transient lock contention, returning the settled result.
async fn resolve_settled(
    engine: &ApprovalEngine,
    id: &str,
    outcome: Outcome,
    decision: Decision,
) -> Result<deploygate::models::ApprovalRequest, ApprovalError> {
    loop {
        match engine.resolve(id, outcome, decision.clone()).await {
            Err(ApprovalError::LockHeld { .. }) => {
                tokio::time::sleep(std::time::Duration::from_millis(5)).await;
            }
            settled => return settled,
        }
    }
}

#[tokio::test]
async fn create_then_get_is_pending_with_one_created_entry() {
    let engine = engine();
    let created = engine.create(webapp_spec()).await.unwrap();
    assert_eq!(created.request_id, "webapp-deploy-001-prod");
    assert_eq!(created.status, ApprovalStatus::Pending);

    let fetched = engine.get(&created.request_id).await.unwrap();
    assert_eq!(fetched.status, ApprovalStatus::Pending);
    assert!(fetched.approver.is_none());

    let history = engine.history(&created.request_id).await.unwrap();
    assert_eq!(history.len(), 1);
    assert_eq!(history[0].action, HistoryAction::Created);
}

#[tokio::test]
async fn create_rejects_missing_fields_before_any_write() {
    let engine = engine();
    let spec = ApprovalSpec {
        project: "".into(),
        ..webapp_spec()
    };
    let err = engine.create(spec).await.unwrap_err();
    assert!(matches!(err, ApprovalError::Validation(_)));

    // nothing was persisted
    assert!(engine.list(&ApprovalFilter::default()).await.unwrap().is_empty());
    assert_eq!(engine.armed_timers(), 0);
}

#[tokio::test]
async fn create_rejects_non_positive_timeout() {
    let engine = engine();
    let spec = ApprovalSpec {
        timeout_seconds: Some(0),
        ..webapp_spec()
    };
    assert!(matches!(
        engine.create(spec).await.unwrap_err(),
        ApprovalError::Validation(_)
    ));
}

#[tokio::test]
async fn create_defaults_timeout_to_1800() {
    let engine = engine();
    let spec = ApprovalSpec {
        timeout_seconds: None,
        ..webapp_spec()
    };
    let created = engine.create(spec).await.unwrap();
    assert_eq!(created.timeout_seconds, 1800);
}

#[tokio::test]
async fn duplicate_request_id_is_rejected() {
    let engine = engine();
    engine.create(webapp_spec()).await.unwrap();
    let err = engine.create(webapp_spec()).await.unwrap_err();
    assert!(matches!(err, ApprovalError::DuplicateRequest(_)));
}

#[tokio::test]
async fn resolve_stamps_decision_and_appends_history() {
    let engine = engine();
    let created = engine.create(webapp_spec()).await.unwrap();

    let resolved = engine
        .resolve(&created.request_id, Outcome::Approved, alice())
        .await
        .unwrap();
    assert_eq!(resolved.status, ApprovalStatus::Approved);
    assert_eq!(resolved.approver.as_deref(), Some("alice"));
    assert_eq!(resolved.approver_role.as_deref(), Some("ops"));
    assert_eq!(resolved.comment.as_deref(), Some("lgtm"));
    assert!(resolved.updated_at >= created.created_at);

    let history = engine.history(&created.request_id).await.unwrap();
    assert_eq!(history.len(), 2);
    assert_eq!(history[0].action, HistoryAction::Created);
    assert_eq!(history[1].action, HistoryAction::Approved);
    assert_eq!(history[1].operator, "alice");

    // the timer was disarmed on resolution
    assert_eq!(engine.armed_timers(), 0);
}

#[tokio::test]
async fn resolve_unknown_id_is_not_found() {
    let engine = engine();
    let err = engine
        .resolve("ghost", Outcome::Approved, alice())
        .await
        .unwrap_err();
    assert!(matches!(err, ApprovalError::NotFound(id) if id == "ghost"));
}

#[tokio::test]
async fn second_resolve_is_a_noop_returning_the_final_state() {
    let engine = engine();
    let created = engine.create(webapp_spec()).await.unwrap();

    let first = engine
        .resolve(&created.request_id, Outcome::Approved, alice())
        .await
        .unwrap();

    let err = engine
        .resolve(&created.request_id, Outcome::Approved, alice())
        .await
        .unwrap_err();
    let ApprovalError::AlreadyResolved { current } = err else {
        panic!("expected AlreadyResolved");
    };
    assert_eq!(current.status, first.status);
    assert_eq!(current.approver, first.approver);
    assert_eq!(current.updated_at, first.updated_at);

    // no additional history entry from the losing call
    let history = engine.history(&created.request_id).await.unwrap();
    assert_eq!(history.len(), 2);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_approve_and_reject_settle_on_exactly_one_outcome() {
    let engine = engine();
    let created = engine.create(webapp_spec()).await.unwrap();
    let id = created.request_id.clone();

    let bob = Decision {
        operator: "bob".into(),
        operator_role: Some("ops".into()),
        comment: Some("no".into()),
    };

    let (approve, reject) = tokio::join!(
        resolve_settled(&engine, &id, Outcome::Approved, alice()),
        resolve_settled(&engine, &id, Outcome::Rejected, bob),
    );

    // exactly one wins
    let winners = [approve.is_ok(), reject.is_ok()]
        .iter()
        .filter(|ok| **ok)
        .count();
    assert_eq!(winners, 1);

    let (winner, loser) = if approve.is_ok() {
        (approve.unwrap(), reject.unwrap_err())
    } else {
        (reject.unwrap(), approve.unwrap_err())
    };
    let ApprovalError::AlreadyResolved { current } = loser else {
        panic!("loser should observe AlreadyResolved");
    };
    assert_eq!(current.status, winner.status);

    // a single terminal history entry matching the winner
    let history = engine.history(&id).await.unwrap();
    assert_eq!(history.len(), 2);
    assert_eq!(history[1].action.as_str(), winner.status.as_str());

    let fetched = engine.get(&id).await.unwrap();
    assert_eq!(fetched.status, winner.status);
}

#[tokio::test]
async fn list_filters_and_orders_newest_first() {
    let engine = engine();
    engine.create(webapp_spec()).await.unwrap();
    tokio::time::sleep(std::time::Duration::from_millis(5)).await;
    engine
        .create(ApprovalSpec {
            build: "002".into(),
            env: "staging".into(),
            ..webapp_spec()
        })
        .await
        .unwrap();
    tokio::time::sleep(std::time::Duration::from_millis(5)).await;
    let third = engine
        .create(ApprovalSpec {
            build: "003".into(),
            ..webapp_spec()
        })
        .await
        .unwrap();
    engine
        .resolve(&third.request_id, Outcome::Rejected, alice())
        .await
        .unwrap();

    let all = engine.list(&ApprovalFilter::default()).await.unwrap();
    assert_eq!(all.len(), 3);
    assert_eq!(all[0].build, "003");
    assert_eq!(all[2].build, "001");

    let prod_pending = engine
        .list(&ApprovalFilter {
            env: Some("prod".into()),
            status: Some(ApprovalStatus::Pending),
            ..Default::default()
        })
        .await
        .unwrap();
    assert_eq!(prod_pending.len(), 1);
    assert_eq!(prod_pending[0].build, "001");

    // re-querying yields a fresh, consistent snapshot
    let again = engine.list(&ApprovalFilter::default()).await.unwrap();
    assert_eq!(again.len(), 3);
    assert_eq!(again[0].request_id, all[0].request_id);
}

#[tokio::test]
async fn stats_count_by_status() {
    let engine = engine();
    let a = engine.create(webapp_spec()).await.unwrap();
    engine
        .create(ApprovalSpec {
            build: "002".into(),
            ..webapp_spec()
        })
        .await
        .unwrap();
    engine
        .resolve(&a.request_id, Outcome::Approved, alice())
        .await
        .unwrap();

    let stats = engine.stats().await.unwrap();
    assert_eq!(stats.total, 2);
    assert_eq!(stats.pending, 1);
    assert_eq!(stats.approved, 1);
}

#[tokio::test]
async fn delete_cascades_to_history() {
    let engine = engine();
    let created = engine.create(webapp_spec()).await.unwrap();
    engine
        .resolve(&created.request_id, Outcome::Approved, alice())
        .await
        .unwrap();

    engine.delete(&created.request_id).await.unwrap();

    assert!(matches!(
        engine.get(&created.request_id).await.unwrap_err(),
        ApprovalError::NotFound(_)
    ));
    assert!(matches!(
        engine.history(&created.request_id).await.unwrap_err(),
        ApprovalError::NotFound(_)
    ));
    assert!(matches!(
        engine.delete(&created.request_id).await.unwrap_err(),
        ApprovalError::NotFound(_)
    ));
}

#[tokio::test]
async fn history_for_unknown_id_is_not_found() {
    let engine = engine();
    assert!(matches!(
        engine.history("ghost").await.unwrap_err(),
        ApprovalError::NotFound(_)
    ));
}
