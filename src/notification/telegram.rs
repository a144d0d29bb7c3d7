use anyhow::Context;
use serde::Serialize;

use crate::models::approval::ApprovalRequest;

const TELEGRAM_API_BASE: &str = "https://api.telegram.org";

/// Operator-facing notification channel over the Telegram Bot API.
///
/// Delivery is fire-and-forget: callers log failures and move on. An
/// unconfigured notifier (no bot token / chat id) silently skips sends so
/// the service runs fine without Telegram wired up.
#[derive(Clone)]
pub struct TelegramNotifier {
    client: reqwest::Client,
    bot_token: Option<String>,
    chat_id: Option<String>,
    api_base: String,
}

impl TelegramNotifier {
    pub fn new(bot_token: Option<String>, chat_id: Option<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            bot_token,
            chat_id,
            api_base: TELEGRAM_API_BASE.to_string(),
        }
    }

    /// Point the notifier at a different Bot API host (test servers).
    pub fn with_api_base(mut self, api_base: impl Into<String>) -> Self {
        self.api_base = api_base.into();
        self
    }

    pub fn is_configured(&self) -> bool {
        self.bot_token.is_some() && self.chat_id.is_some()
    }

    pub async fn send_approval_request(&self, record: &ApprovalRequest) -> anyhow::Result<()> {
        let details = serde_json::to_string_pretty(&record.request_details).unwrap_or_default();
        let text = format!(
            "🔐 *Approval required*\n\n\
             Request: `{}`\nAgent: `{}`\nSession: `{}`\nExpires: {}\n\n\
             ```\n{}\n```\n\
             Reply with `overseer approval approve {}` or `overseer approval reject {}`",
            record.id,
            record.agent_id,
            record.session_id,
            record.expires_at.format("%Y-%m-%d %H:%M:%S UTC"),
            details,
            record.id,
            record.id,
        );
        self.send_message(&text).await
    }

    pub async fn send_message(&self, text: &str) -> anyhow::Result<()> {
        let (token, chat_id) = match (&self.bot_token, &self.chat_id) {
            (Some(t), Some(c)) => (t, c),
            _ => {
                tracing::debug!("telegram notifier not configured, skipping send");
                return Ok(());
            }
        };

        let url = format!("{}/bot{}/sendMessage", self.api_base, token);
        let payload = SendMessage {
            chat_id,
            text,
            parse_mode: "Markdown",
        };

        let resp = self
            .client
            .post(&url)
            .json(&payload)
            .send()
            .await
            .context("failed to reach telegram bot api")?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            anyhow::bail!("telegram returned error: status={}, body={}", status, body);
        }

        tracing::info!("Sent Telegram notification to chat {}", chat_id);
        Ok(())
    }
}

#[derive(Serialize)]
struct SendMessage<'a> {
    chat_id: &'a str,
    text: &'a str,
    parse_mode: &'a str,
}
