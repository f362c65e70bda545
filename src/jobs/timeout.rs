//! Per-request deadline timers.
//!
//! Each pending request gets one armed timer; when it fires, the request id
//! is handed to the engine's firer loop, which resolves it as `timeout`.
//! Disarm and shutdown are best-effort: a timer that slips through and fires
//! late is harmless because the resolve path is idempotent — the store's CAS
//! refuses to touch an already-terminal request.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use tokio::sync::mpsc;
use tokio::task::AbortHandle;

pub struct TimeoutScheduler {
    timers: Arc<DashMap<String, AbortHandle>>,
    tx: mpsc::UnboundedSender<String>,
}

impl TimeoutScheduler {
    /// Build a scheduler and the channel its timers fire into. The caller
    /// owns the receiving end (the engine's firer loop).
    pub fn new() -> (Self, mpsc::UnboundedReceiver<String>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (
            Self {
                timers: Arc::new(DashMap::new()),
                tx,
            },
            rx,
        )
    }

    /// Arm (or re-arm) the deadline timer for `request_id`. A deadline in
    /// the past fires immediately.
    pub fn arm(&self, request_id: &str, deadline: DateTime<Utc>) {
        let delay = (deadline - Utc::now()).to_std().unwrap_or(Duration::ZERO);
        let id = request_id.to_string();
        let tx = self.tx.clone();
        let timers = Arc::clone(&self.timers);

        let handle = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            timers.remove(&id);
            if tx.send(id.clone()).is_err() {
                tracing::debug!(request_id = %id, "timeout fired after engine shutdown");
            }
        });

        if let Some(previous) = self
            .timers
            .insert(request_id.to_string(), handle.abort_handle())
        {
            previous.abort();
        }
        tracing::debug!(request_id, delay_secs = delay.as_secs(), "armed timeout");
    }

    /// Cancel the timer for a resolved request. Best-effort.
    pub fn disarm(&self, request_id: &str) {
        if let Some((_, handle)) = self.timers.remove(request_id) {
            handle.abort();
            tracing::debug!(request_id, "disarmed timeout");
        }
    }

    /// Abort every armed timer. Called once on process shutdown.
    pub fn shutdown(&self) {
        let drained = self.timers.len();
        self.timers.retain(|_, handle| {
            handle.abort();
            false
        });
        if drained > 0 {
            tracing::info!(drained, "drained pending timeout timers");
        }
    }

    pub fn armed(&self) -> usize {
        self.timers.len()
    }
}
