use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use hmac::{Hmac, Mac};
use sha2::Sha256;
use tracing::{debug, info, warn};

use crate::notification::{NotificationSink, ResolutionEvent};

// ── HMAC Signing ─────────────────────────────────────────────

/// Compute HMAC-SHA256 of `payload` using `secret`.
/// Returns lowercase hex digest (e.g. "sha256=<hex>").
fn hmac_sha256_hex(secret: &str, payload: &[u8]) -> String {
    let mut mac = Hmac::<Sha256>::new_from_slice(secret.as_bytes())
        .expect("HMAC can take key of any size");
    mac.update(payload);
    let result = mac.finalize();
    let bytes = result.into_bytes();
    format!("sha256={}", hex::encode(bytes))
}

// ── Webhook Notifier ──────────────────────────────────────────

/// Delivers resolution events to one or more configured URLs.
/// Supports:
/// - HMAC-SHA256 signing (X-Deploygate-Signature header)
/// - Up to 3 retries with exponential back-off (1s → 5s → 25s)
#[derive(Clone)]
pub struct WebhookNotifier {
    client: reqwest::Client,
    urls: Vec<String>,
    signing_secret: Option<String>,
}

impl WebhookNotifier {
    pub fn new(urls: Vec<String>, signing_secret: Option<String>) -> Self {
        Self {
            client: reqwest::Client::builder()
                .timeout(Duration::from_secs(10))
                .user_agent("Deploygate-Webhook/1.0")
                .build()
                .expect("failed to build webhook HTTP client"),
            urls,
            signing_secret,
        }
    }

    /// Send a signed event to a single URL with retry.
    ///
    /// If a signing secret is configured, the request body is signed with
    /// HMAC-SHA256 and the signature is sent in the `X-Deploygate-Signature`
    /// header. Retries up to 3 times on failure with exponential back-off.
    /// Returns `Ok(())` if delivery succeeded on any attempt.
    async fn send_signed(&self, url: &str, event: &ResolutionEvent) -> Result<()> {
        let payload = serde_json::to_vec(event)
            .map_err(|e| anyhow::anyhow!("webhook serialize error: {}", e))?;
        let delivery_id = uuid::Uuid::new_v4().to_string();
        let signature = self
            .signing_secret
            .as_deref()
            .map(|s| hmac_sha256_hex(s, &payload));

        let backoff_secs: &[u64] = &[0, 1, 5, 25];

        for (attempt, &delay) in backoff_secs.iter().enumerate() {
            if delay > 0 {
                debug!(
                    url,
                    attempt,
                    delay_secs = delay,
                    request_id = %event.request_id,
                    "retrying webhook delivery"
                );
                tokio::time::sleep(Duration::from_secs(delay)).await;
            }

            let mut req = self
                .client
                .post(url)
                .header("content-type", "application/json")
                .header("x-deploygate-delivery-id", &delivery_id)
                .header("x-deploygate-event", event.status.as_str());

            if let Some(ref sig) = signature {
                req = req.header("x-deploygate-signature", sig.as_str());
            }

            let result = req.body(payload.clone()).send().await;

            match result {
                Ok(resp) if resp.status().is_success() => {
                    info!(
                        url,
                        request_id = %event.request_id,
                        delivery_id = %delivery_id,
                        attempt,
                        status = %resp.status(),
                        "webhook delivered successfully"
                    );
                    return Ok(());
                }
                Ok(resp) => {
                    let status = resp.status();
                    let body = resp.text().await.unwrap_or_default();
                    warn!(
                        url,
                        request_id = %event.request_id,
                        delivery_id = %delivery_id,
                        attempt,
                        status = %status,
                        body = %body,
                        "webhook delivery failed (non-2xx), will retry"
                    );
                }
                Err(e) => {
                    warn!(
                        url,
                        request_id = %event.request_id,
                        delivery_id = %delivery_id,
                        attempt,
                        error = %e,
                        "webhook request error, will retry"
                    );
                }
            }
        }

        Err(anyhow::anyhow!(
            "webhook delivery failed after 3 retries: {}",
            url
        ))
    }
}

#[async_trait]
impl NotificationSink for WebhookNotifier {
    fn name(&self) -> &'static str {
        "webhook"
    }

    /// Each URL is attempted independently with retry; failures in one do
    /// not block others.
    async fn notify(&self, event: &ResolutionEvent) -> Result<()> {
        if self.urls.is_empty() {
            debug!("no webhook targets configured, skipping");
            return Ok(());
        }

        let mut failed = 0usize;
        for url in &self.urls {
            if let Err(e) = self.send_signed(url, event).await {
                warn!(url, error = %e, "webhook dispatch ultimately failed");
                failed += 1;
            }
        }

        if failed > 0 {
            anyhow::bail!("{}/{} webhook targets failed", failed, self.urls.len());
        }
        Ok(())
    }
}

// ── Tests ─────────────────────────────────────────────────────
