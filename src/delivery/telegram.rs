//! Telegram Sender - Bot API `sendMessage`.
//!
//! The [`TelegramSender`] delivers rendered notifications to Telegram chats
//! through the Bot API.
//!
//! # Example
//!
//! ```rust,ignore
//! use tvherald::delivery::TelegramSender;
//! use std::time::Duration;
//!
//! let sender = TelegramSender::new("123456:ABC-DEF")
//!     .with_timeout(Duration::from_secs(10))
//!     .with_parse_mode("Markdown");
//! ```

use super::{ChatSender, DeliveryError, RecipientId};
use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use serde_json::{json, Value};
use std::time::Duration;
use tracing::{debug, warn};

pub const DEFAULT_API_URL: &str = "https://api.telegram.org";

/// Default timeout for Bot API requests
const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

/// Error envelope returned by the Bot API.
#[derive(Debug, Default, Deserialize)]
struct ApiReply {
    #[serde(default)]
    ok: bool,

    #[serde(default)]
    description: Option<String>,

    #[serde(default)]
    parameters: Option<ReplyParameters>,
}

#[derive(Debug, Deserialize)]
struct ReplyParameters {
    retry_after: Option<u64>,
}

/// A sender that posts messages through the Telegram Bot API.
///
/// # Features
///
/// - Configurable timeout
/// - Optional `parse_mode` (Markdown, MarkdownV2, HTML)
/// - 429 and 5xx replies reported as transient, other 4xx as permanent
/// - Bot token never written to logs
#[derive(Debug, Clone)]
pub struct TelegramSender {
    /// Bot API root, without trailing slash
    api_url: String,

    /// Bot token from @BotFather
    token: String,

    /// HTTP client (reused for connection pooling)
    client: Client,

    /// Request timeout
    timeout: Duration,

    parse_mode: Option<String>,
}

impl TelegramSender {
    /// Create a sender for the given bot token
    pub fn new(token: impl Into<String>) -> Self {
        Self {
            api_url: DEFAULT_API_URL.to_string(),
            token: token.into(),
            client: Client::new(),
            timeout: DEFAULT_TIMEOUT,
            parse_mode: None,
        }
    }

    /// Use a different Bot API server (e.g. a local bot-api instance)
    pub fn with_api_url(mut self, api_url: impl Into<String>) -> Self {
        self.api_url = api_url.into().trim_end_matches('/').to_string();
        self
    }

    /// Set custom timeout
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Ask Telegram to parse the text as Markdown/HTML
    pub fn with_parse_mode(mut self, parse_mode: impl Into<String>) -> Self {
        self.parse_mode = Some(parse_mode.into());
        self
    }

    fn endpoint(&self) -> String {
        format!("{}/bot{}/sendMessage", self.api_url, self.token)
    }

    /// Build the `sendMessage` request body
    fn build_payload(&self, recipient: RecipientId, text: &str) -> Value {
        let mut payload = json!({
            "chat_id": recipient,
            "text": text,
        });

        if let Some(mode) = &self.parse_mode {
            payload["parse_mode"] = json!(mode);
        }

        payload
    }
}

#[async_trait]
impl ChatSender for TelegramSender {
    fn name(&self) -> &str {
        "telegram"
    }

    async fn send_text(&self, recipient: RecipientId, text: &str) -> Result<(), DeliveryError> {
        debug!(
            chat_id = recipient,
            api_url = %self.api_url,
            "Sending Telegram message"
        );

        let response = self
            .client
            .post(self.endpoint())
            .timeout(self.timeout)
            .json(&self.build_payload(recipient, text))
            .send()
            .await?;

        let status = response.status();
        let body = response.text().await?;
        let parsed = serde_json::from_str::<ApiReply>(&body);

        if status.is_success() {
            return match parsed {
                Ok(reply) if reply.ok => Ok(()),
                Ok(reply) => {
                    warn!(chat_id = recipient, status = %status, "Telegram reply not ok");
                    Err(DeliveryError::Failed(reply.description.unwrap_or(body)))
                }
                Err(e) => {
                    warn!(chat_id = recipient, status = %status, "Undecodable Telegram reply");
                    Err(DeliveryError::BadReply(e.to_string()))
                }
            };
        }

        let reply = parsed.unwrap_or_default();
        let message = reply.description.clone().unwrap_or(body);

        if status.as_u16() == 429 {
            return Err(DeliveryError::RateLimited {
                retry_after: reply.parameters.and_then(|p| p.retry_after),
            });
        }

        if status.is_server_error() {
            return Err(DeliveryError::Server {
                status: status.as_u16(),
                message,
            });
        }

        Err(DeliveryError::Rejected {
            status: status.as_u16(),
            message,
        })
    }
}
