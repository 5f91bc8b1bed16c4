//! Inbound channel housekeeping

pub mod telegram;

use async_trait::async_trait;

use crate::utils::BestEffort;

pub use telegram::TelegramClient;

/// Operations the orchestrator performs against a tenant's inbound channel
#[async_trait]
pub trait ChannelClient: Send + Sync {
    /// Remove any registered webhook so the runtime can long-poll
    async fn clear_webhook(&self, bot_token: &str) -> BestEffort;
}
