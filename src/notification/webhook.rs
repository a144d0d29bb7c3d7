use anyhow::Result;
use hmac::{Hmac, Mac};
use serde::Serialize;
use sha2::Sha256;
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::models::approval::ApprovalRequest;

// ── Webhook Event Types ───────────────────────────────────────

/// A structured event payload sent to webhook endpoints when an approval
/// reaches a terminal state.
#[derive(Debug, Clone, Serialize)]
pub struct WebhookEvent {
    /// Event type identifier, e.g. "approval_resolved", "approval_expired".
    pub event_type: String,
    /// ISO-8601 timestamp of when the event occurred.
    pub timestamp: String,
    /// The approval that reached a terminal state.
    pub approval_id: String,
    /// Session the approval was gating.
    pub session_id: String,
    /// Agent that raised the request.
    pub agent_id: String,
    /// Event-specific details (final status, operator, reason, etc.).
    pub details: serde_json::Value,
}

impl WebhookEvent {
    pub fn approval_resolved(record: &ApprovalRequest) -> Self {
        Self::from_record(
            "approval_resolved",
            record,
            serde_json::json!({
                "status": record.status.as_str(),
                "approved_by": record.approved_by,
                "notes": record.decision_notes,
            }),
        )
    }

    pub fn approval_expired(record: &ApprovalRequest) -> Self {
        Self::from_record(
            "approval_expired",
            record,
            serde_json::json!({
                "expired_at": record.updated_at.to_rfc3339(),
                "deadline": record.expires_at.to_rfc3339(),
            }),
        )
    }

    pub fn approval_cancelled(record: &ApprovalRequest) -> Self {
        Self::from_record(
            "approval_cancelled",
            record,
            serde_json::json!({
                "reason": record.cancellation_reason,
            }),
        )
    }

    fn from_record(event_type: &str, record: &ApprovalRequest, details: serde_json::Value) -> Self {
        Self {
            event_type: event_type.to_string(),
            timestamp: chrono::Utc::now().to_rfc3339(),
            approval_id: record.id.to_string(),
            session_id: record.session_id.clone(),
            agent_id: record.agent_id.clone(),
            details,
        }
    }
}

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

/// Dispatches webhook events to one or more configured URLs.
/// Supports:
/// - HMAC-SHA256 signing (X-Overseer-Signature header)
/// - Up to 3 retries with exponential back-off (1s → 5s → 25s)
#[derive(Clone)]
pub struct WebhookNotifier {
    client: reqwest::Client,
}

impl WebhookNotifier {
    pub fn new() -> Self {
        Self {
            client: reqwest::Client::builder()
                .timeout(Duration::from_secs(10))
                .user_agent("Overseer-Webhook/1.0")
                .build()
                .expect("failed to build webhook HTTP client"),
        }
    }

    /// Send a signed webhook event to a single URL with retry.
    ///
    /// If `signing_secret` is `Some`, the request body is signed with HMAC-SHA256
    /// and the signature is sent in the `X-Overseer-Signature` header.
    ///
    /// Retries up to 3 times on failure with exponential back-off.
    /// Returns `Ok(())` if delivery succeeded on any attempt.
    pub async fn send_signed(
        &self,
        url: &str,
        event: &WebhookEvent,
        signing_secret: Option<&str>,
    ) -> Result<()> {
        let payload = serde_json::to_vec(event)
            .map_err(|e| anyhow::anyhow!("webhook serialize error: {}", e))?;
        let delivery_id = uuid::Uuid::new_v4().to_string();
        let timestamp = chrono::Utc::now().timestamp().to_string();
        let signature = signing_secret.map(|s| hmac_sha256_hex(s, &payload));

        let backoff_secs: &[u64] = &[0, 1, 5, 25];

        for (attempt, &delay) in backoff_secs.iter().enumerate() {
            if delay > 0 {
                debug!(
                    url,
                    attempt,
                    delay_secs = delay,
                    event_type = %event.event_type,
                    "retrying webhook delivery"
                );
                tokio::time::sleep(Duration::from_secs(delay)).await;
            }

            let mut req = self
                .client
                .post(url)
                .header("content-type", "application/json")
                .header("x-overseer-delivery-id", &delivery_id)
                .header("x-overseer-timestamp", &timestamp)
                .header("x-overseer-event", &event.event_type);

            if let Some(ref sig) = signature {
                req = req.header("x-overseer-signature", sig.as_str());
            }

            let result = req.body(payload.clone()).send().await;

            match result {
                Ok(resp) if resp.status().is_success() => {
                    info!(
                        url,
                        event_type = %event.event_type,
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
                        event_type = %event.event_type,
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
                        event_type = %event.event_type,
                        delivery_id = %delivery_id,
                        attempt,
                        error = %e,
                        "webhook request error, will retry"
                    );
                }
            }
        }

        // All attempts exhausted
        warn!(
            url,
            event_type = %event.event_type,
            delivery_id = %delivery_id,
            "webhook delivery failed after all retries"
        );
        Err(anyhow::anyhow!(
            "webhook delivery failed after 3 retries: {}",
            url
        ))
    }

    pub async fn send(&self, url: &str, event: &WebhookEvent) -> Result<()> {
        self.send_signed(url, event, None).await
    }
}

impl Default for WebhookNotifier {
    fn default() -> Self {
        Self::new()
    }
}

// ── Resolution Event Sink ─────────────────────────────────────

/// Fan-out of terminal-transition events to the configured webhook URLs.
///
/// `emit` spawns the delivery so a slow or dead endpoint never blocks (or
/// fails) the state transition that produced the event. Each URL is
/// attempted independently; failures in one do not block others.
#[derive(Clone)]
pub struct ResolutionEvents {
    notifier: WebhookNotifier,
    urls: Vec<String>,
    signing_secret: Option<String>,
}

impl ResolutionEvents {
    pub fn new(urls: Vec<String>, signing_secret: Option<String>) -> Self {
        Self {
            notifier: WebhookNotifier::new(),
            urls,
            signing_secret,
        }
    }

    /// An event sink with no targets (tests, unconfigured deployments).
    pub fn disabled() -> Self {
        Self::new(Vec::new(), None)
    }

    pub fn emit(&self, event: WebhookEvent) {
        if self.urls.is_empty() {
            debug!(event_type = %event.event_type, "no webhook targets, skipping event");
            return;
        }

        let notifier = self.notifier.clone();
        let urls = self.urls.clone();
        let secret = self.signing_secret.clone();

        tokio::spawn(async move {
            for url in &urls {
                if let Err(e) = notifier.send_signed(url, &event, secret.as_deref()).await {
                    warn!(url, error = %e, "resolution event dispatch ultimately failed");
                }
            }
        });
    }
}

// ── Tests ─────────────────────────────────────────────────────
