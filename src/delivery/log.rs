//! Log Sender - messages go to the log instead of a chat service.
//!
//! Used when `telegram.dry_run` is enabled, which is handy when wiring up a
//! new Sonarr instance without spamming real chats.

use super::{ChatSender, DeliveryError, RecipientId};
use async_trait::async_trait;
use tracing::info;

/// A sender that logs every message and always succeeds.
#[derive(Debug, Clone)]
pub struct LogSender {
    /// Prefix for log messages
    prefix: String,
}

impl LogSender {
    pub fn new() -> Self {
        Self {
            prefix: "dry-run".to_string(),
        }
    }

    /// Create a LogSender with a custom prefix
    pub fn with_prefix(prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
        }
    }

    pub fn prefix(&self) -> &str {
        &self.prefix
    }
}

impl Default for LogSender {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ChatSender for LogSender {
    fn name(&self) -> &str {
        "log"
    }

    async fn send_text(&self, recipient: RecipientId, text: &str) -> Result<(), DeliveryError> {
        info!(
            prefix = %self.prefix,
            chat_id = recipient,
            text = %text,
            "[{}] Message for chat {}",
            self.prefix,
            recipient
        );
        Ok(())
    }
}
