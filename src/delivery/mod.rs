//! Chat delivery.
//!
//! The dispatcher talks to chat services through the [`ChatSender`] trait.
//! Like provider errors, a [`DeliveryError`] knows whether it is worth
//! retrying.
//!
//! ## Built-in Senders
//!
//! - [`TelegramSender`]: Telegram Bot API `sendMessage`
//! - [`LogSender`]: writes messages to the log instead of sending them
//!
//! ## Creating Custom Senders
//!
//! ```rust,ignore
//! use tvherald::delivery::{ChatSender, DeliveryError, RecipientId};
//! use async_trait::async_trait;
//!
//! struct MySender;
//!
//! #[async_trait]
//! impl ChatSender for MySender {
//!     fn name(&self) -> &str {
//!         "my-sender"
//!     }
//!
//!     async fn send_text(&self, recipient: RecipientId, text: &str) -> Result<(), DeliveryError> {
//!         // Your logic here
//!         Ok(())
//!     }
//! }
//! ```

pub mod log;
pub mod telegram;

use crate::retry::Transient;
use async_trait::async_trait;
use thiserror::Error;

pub use log::LogSender;
pub use telegram::TelegramSender;

/// Chat identifier. Telegram group chats use negative ids.
pub type RecipientId = i64;

/// Errors that can occur while delivering a message to one recipient.
#[derive(Error, Debug)]
pub enum DeliveryError {
    /// The request timed out
    #[error("request timed out: {0}")]
    Timeout(String),

    /// Connection-level failure
    #[error("network error: {0}")]
    Network(String),

    /// The service asked us to slow down
    #[error("rate limited (retry after {retry_after:?}s)")]
    RateLimited { retry_after: Option<u64> },

    /// A success status with a body we could not decode
    #[error("undecodable reply: {0}")]
    BadReply(String),

    /// 5xx from the service
    #[error("server error {status}: {message}")]
    Server { status: u16, message: String },

    /// The service refused the message (bad request, unknown chat, bot blocked, ...)
    #[error("rejected with status {status}: {message}")]
    Rejected { status: u16, message: String },

    /// Generic delivery failure
    #[error("delivery failed: {0}")]
    Failed(String),
}

impl Transient for DeliveryError {
    fn is_transient(&self) -> bool {
        matches!(
            self,
            Self::Timeout(_)
                | Self::Network(_)
                | Self::RateLimited { .. }
                | Self::BadReply(_)
                | Self::Server { .. }
        )
    }
}

impl From<reqwest::Error> for DeliveryError {
    fn from(e: reqwest::Error) -> Self {
        // reqwest errors embed the request URL, which carries the bot token
        let e = e.without_url();
        if e.is_builder() {
            Self::Failed(e.to_string())
        } else if e.is_timeout() {
            Self::Timeout(e.to_string())
        } else {
            Self::Network(e.to_string())
        }
    }
}

/// A chat service capable of delivering plain text to a recipient.
///
/// Senders must be `Send + Sync`; the dispatcher shares one instance across
/// all messages.
#[async_trait]
pub trait ChatSender: Send + Sync {
    /// Returns the name of this sender (e.g. "telegram", "log")
    fn name(&self) -> &str;

    /// Deliver `text` to `recipient`.
    async fn send_text(&self, recipient: RecipientId, text: &str) -> Result<(), DeliveryError>;
}
