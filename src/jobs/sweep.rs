//! Background job: time out overdue pending approvals.
//!
//! The armed per-request timers are the primary mechanism; this sweep is the
//! safety net for timers lost to a process restart between startup recovery
//! runs, and it evicts expired lock entries while it is at it. Redundant
//! firings are absorbed by the resolve path's idempotency.

use std::sync::Arc;
use std::time::Duration;

use tokio::time;

use crate::engine::ApprovalEngine;

/// Spawn the background sweep task. Call this once at startup.
pub fn spawn(engine: Arc<ApprovalEngine>, interval: Duration) {
    tokio::spawn(async move {
        let mut ticker = time::interval(interval);
        // the first tick completes immediately; skip it so startup recovery
        // has a chance to arm timers first
        ticker.tick().await;
        loop {
            ticker.tick().await;
            match engine.expire_overdue().await {
                Ok(expired) if expired > 0 => {
                    tracing::info!(expired, "sweep timed out overdue approvals");
                }
                Ok(_) => {}
                Err(e) => {
                    tracing::error!("overdue sweep failed: {}", e);
                }
            }
            let evicted = engine.evict_expired_locks();
            if evicted > 0 {
                tracing::debug!(evicted, "sweep evicted expired locks");
            }
        }
    });
}
