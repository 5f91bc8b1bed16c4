//! Telegram Bot API client

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde_json::json;

use crate::channel::ChannelClient;
use crate::errors::DeployError;
use crate::redact::redact;
use crate::utils::BestEffort;

const DEFAULT_API_BASE: &str = "https://api.telegram.org";

/// Minimal Telegram Bot API client
pub struct TelegramClient {
    client: Client,
    api_base: String,
}

impl TelegramClient {
    pub fn new() -> Result<Self, DeployError> {
        Self::with_base_url(DEFAULT_API_BASE)
    }

    pub fn with_base_url(api_base: &str) -> Result<Self, DeployError> {
        let client = Client::builder().timeout(Duration::from_secs(10)).build()?;
        Ok(Self {
            client,
            api_base: api_base.trim_end_matches('/').to_string(),
        })
    }
}

#[async_trait]
impl ChannelClient for TelegramClient {
    async fn clear_webhook(&self, bot_token: &str) -> BestEffort {
        let url = format!("{}/bot{}/deleteWebhook", self.api_base, bot_token);
        let result = self
            .client
            .post(&url)
            .json(&json!({ "drop_pending_updates": false }))
            .send()
            .await;

        // The bot token is part of the URL, so error text is redacted
        let outcome = match result {
            Ok(response) if response.status().is_success() => Ok(()),
            Ok(response) => Err(format!("Telegram answered {}", response.status())),
            Err(e) => Err(redact(&e.to_string())),
        };
        BestEffort::new("clear webhook", outcome)
    }
}
