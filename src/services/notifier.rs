//! Notification sink collaborators

use crate::config::TelegramConfig;
use async_trait::async_trait;
use serde_json::json;
use std::fmt;
use std::time::Duration;
use thiserror::Error;
use tracing::info;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Channel {
    /// Per-signal alerts
    Trades,
    /// Daily summaries
    Reports,
}

impl fmt::Display for Channel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Trades => f.write_str("trades"),
            Self::Reports => f.write_str("reports"),
        }
    }
}

#[derive(Debug, Error)]
pub enum NotifyError {
    #[error("notification transport error: {0}")]
    Transport(String),
    #[error("notification rejected with HTTP {status}: {body}")]
    Rejected { status: u16, body: String },
}

/// Best-effort delivery. Callers log failures and carry on.
#[async_trait]
pub trait NotificationSink: Send + Sync {
    async fn send(&self, channel: Channel, text: &str) -> Result<(), NotifyError>;
}

/// Telegram Bot API `sendMessage` with Markdown formatting
pub struct TelegramNotifier {
    api_url: String,
    bot_token: String,
    trades_chat: String,
    reports_chat: String,
    client: reqwest::Client,
}

impl TelegramNotifier {
    pub fn new(config: &TelegramConfig, timeout: Duration) -> Result<Self, reqwest::Error> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self::with_client(config, client))
    }

    pub fn with_client(config: &TelegramConfig, client: reqwest::Client) -> Self {
        Self {
            api_url: config.api_url.trim_end_matches('/').to_string(),
            bot_token: config.bot_token.clone(),
            trades_chat: config.trades_chat.clone(),
            reports_chat: config.reports_chat.clone(),
            client,
        }
    }

    fn chat_for(&self, channel: Channel) -> &str {
        match channel {
            Channel::Trades => &self.trades_chat,
            Channel::Reports => &self.reports_chat,
        }
    }
}

#[async_trait]
impl NotificationSink for TelegramNotifier {
    async fn send(&self, channel: Channel, text: &str) -> Result<(), NotifyError> {
        let url = format!("{}/bot{}/sendMessage", self.api_url, self.bot_token);
        let payload = json!({
            "chat_id": self.chat_for(channel),
            "text": text,
            "parse_mode": "Markdown",
            "disable_web_page_preview": true,
        });

        let response = self
            .client
            .post(&url)
            .json(&payload)
            .send()
            .await
            // the URL embeds the bot token; keep it out of logs
            .map_err(|e| NotifyError::Transport(e.without_url().to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(NotifyError::Rejected {
                status: status.as_u16(),
                body,
            });
        }
        Ok(())
    }
}

/// Sink used when no Telegram credentials are configured
pub struct LogNotifier;

#[async_trait]
impl NotificationSink for LogNotifier {
    async fn send(&self, channel: Channel, text: &str) -> Result<(), NotifyError> {
        info!(channel = %channel, "Notification (not delivered): {}", text);
        Ok(())
    }
}
