//! Telegram Bot API notifier.

use super::Notifier;
use crate::config::TelegramConfig;
use crate::error::NotifyError;
use async_trait::async_trait;
use reqwest::Client;
use std::time::Duration;
use tracing::debug;

const TELEGRAM_API_URL: &str = "https://api.telegram.org";

/// Sends HTML-formatted messages through `sendMessage`.
pub struct TelegramNotifier {
    http: Client,
    base_url: String,
    bot_token: String,
    chat_id: String,
}

impl TelegramNotifier {
    pub fn new(bot_token: impl Into<String>, chat_id: impl Into<String>) -> Self {
        Self::with_base_url(TELEGRAM_API_URL, bot_token, chat_id)
    }

    /// Use another API host, e.g. a local mock server.
    pub fn with_base_url(
        base_url: impl Into<String>,
        bot_token: impl Into<String>,
        chat_id: impl Into<String>,
    ) -> Self {
        let http = Client::builder()
            .timeout(Duration::from_secs(10))
            .build()
            .unwrap_or_default();

        Self {
            http,
            base_url: base_url.into(),
            bot_token: bot_token.into(),
            chat_id: chat_id.into(),
        }
    }

    /// `None` unless both the token and the chat id are set.
    pub fn from_config(config: &TelegramConfig) -> Option<Self> {
        if !config.is_configured() {
            return None;
        }
        let token = config.bot_token.as_deref()?;
        let chat_id = config.chat_id.as_deref()?;
        Some(Self::new(token, chat_id))
    }

    fn endpoint(&self) -> String {
        format!("{}/bot{}/sendMessage", self.base_url, self.bot_token)
    }
}

#[async_trait]
impl Notifier for TelegramNotifier {
    async fn send(&self, message: &str) -> Result<(), NotifyError> {
        let response = self
            .http
            .post(self.endpoint())
            .form(&[
                ("chat_id", self.chat_id.as_str()),
                ("text", message),
                ("parse_mode", "HTML"),
            ])
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(NotifyError::Rejected {
                status: status.as_u16(),
                body,
            });
        }

        debug!("Telegram message sent: {}", message);
        Ok(())
    }
}
