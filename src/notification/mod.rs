//! Notification sinks invoked on every terminal transition.
//!
//! Delivery is at-least-once and fire-and-forget from the engine's point of
//! view; sinks must tolerate duplicates.

pub mod slack;
pub mod webhook;

pub use slack::SlackNotifier;
pub use webhook::WebhookNotifier;

use async_trait::async_trait;
use serde::Serialize;

use crate::models::{ApprovalRequest, ApprovalStatus};

/// Payload emitted to sinks when a request reaches a terminal status.
#[derive(Debug, Clone, Serialize)]
pub struct ResolutionEvent {
    pub request_id: String,
    pub status: ApprovalStatus,
    pub approver: Option<String>,
    pub comment: Option<String>,
    pub project: String,
    pub env: String,
    pub job: String,
    pub version: String,
    /// ISO-8601 timestamp of when the event was emitted.
    pub timestamp: String,
}

impl ResolutionEvent {
    pub fn from_request(request: &ApprovalRequest) -> Self {
        Self {
            request_id: request.request_id.clone(),
            status: request.status,
            approver: request.approver.clone(),
            comment: request.comment.clone(),
            project: request.project.clone(),
            env: request.env.clone(),
            job: request.job.clone(),
            version: request.version.clone(),
            timestamp: chrono::Utc::now().to_rfc3339(),
        }
    }
}

#[async_trait]
pub trait NotificationSink: Send + Sync {
    /// Sink name for logging.
    fn name(&self) -> &'static str;

    async fn notify(&self, event: &ResolutionEvent) -> anyhow::Result<()>;
}
