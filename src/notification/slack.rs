use anyhow::Context;
use async_trait::async_trait;
use serde::Serialize;

use crate::models::ApprovalStatus;
use crate::notification::{NotificationSink, ResolutionEvent};

#[derive(Clone)]
pub struct SlackNotifier {
    client: reqwest::Client,
    webhook_url: Option<String>,
}

impl SlackNotifier {
    pub fn new(webhook_url: Option<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            webhook_url,
        }
    }

    fn render(event: &ResolutionEvent) -> String {
        let verdict = match event.status {
            ApprovalStatus::Approved => "✅ *Deployment Approved*",
            ApprovalStatus::Rejected => "🚫 *Deployment Rejected*",
            ApprovalStatus::Timeout => "⏰ *Deployment Approval Timed Out*",
            ApprovalStatus::Pending => "⏳ *Deployment Pending*",
        };
        format!(
            "{}\n\nRequest: `{}`\nProject: {} ({})\nJob: {} @ {}\nBy: {}\nComment: {}",
            verdict,
            event.request_id,
            event.project,
            event.env,
            event.job,
            event.version,
            event.approver.as_deref().unwrap_or("system"),
            event.comment.as_deref().unwrap_or("-"),
        )
    }
}

#[async_trait]
impl NotificationSink for SlackNotifier {
    fn name(&self) -> &'static str {
        "slack"
    }

    async fn notify(&self, event: &ResolutionEvent) -> anyhow::Result<()> {
        let url = match &self.webhook_url {
            Some(u) => u,
            None => {
                tracing::debug!("No Slack webhook URL configured, skipping notification");
                return Ok(());
            }
        };

        let message = SlackMessage {
            text: Self::render(event),
        };

        let resp = self
            .client
            .post(url)
            .json(&message)
            .send()
            .await
            .context("failed to send slack notification")?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            anyhow::bail!("slack returned error: status={}, body={}", status, body);
        }

        tracing::info!(
            request_id = %event.request_id,
            "Sent Slack notification for approval resolution"
        );
        Ok(())
    }
}

#[derive(Serialize)]
struct SlackMessage {
    text: String,
}
