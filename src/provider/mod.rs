//! Metadata providers.
//!
//! The enricher only depends on the [`MetadataProvider`] trait. Errors carry
//! their own transient/permanent classification through
//! [`Transient`](crate::retry::Transient), which decides whether a lookup is
//! retried or the task is dropped.
//!
//! ## Built-in Providers
//!
//! - [`TvdbClient`]: TheTVDB v4 REST API

pub mod tvdb;

use crate::event::EpisodeMetadata;
use crate::retry::Transient;
use async_trait::async_trait;
use thiserror::Error;

pub use tvdb::TvdbClient;

/// Errors returned by a [`MetadataProvider`].
#[derive(Error, Debug)]
pub enum ProviderError {
    /// Connection refused, timeout, reset, ...
    #[error("provider unreachable: {0}")]
    Network(String),

    /// The provider answered with something we could not decode
    #[error("provider returned bad data: {0}")]
    BadData(String),

    /// Non-success HTTP status
    #[error("provider returned status {status}: {message}")]
    Status { status: u16, message: String },

    #[error("series {series_id} has no episode S{season:02}E{episode:02}")]
    NotFound {
        series_id: u64,
        season: u32,
        episode: u32,
    },

    /// Credentials refused at login; retrying will not help
    #[error("provider rejected credentials: {0}")]
    Auth(String),

    /// Anything else
    #[error("provider failed: {0}")]
    Failed(String),
}

impl Transient for ProviderError {
    fn is_transient(&self) -> bool {
        match self {
            Self::Network(_) | Self::BadData(_) => true,
            Self::Status { status, .. } => matches!(status, 401 | 408 | 429 | 500..=599),
            Self::NotFound { .. } | Self::Auth(_) | Self::Failed(_) => false,
        }
    }
}

impl From<reqwest::Error> for ProviderError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_builder() {
            Self::Failed(e.to_string())
        } else if e.is_decode() {
            Self::BadData(e.to_string())
        } else {
            Self::Network(e.to_string())
        }
    }
}

/// Source of episode overviews and series banners.
#[async_trait]
pub trait MetadataProvider: Send + Sync {
    /// Short name used in log messages (e.g. "tvdb")
    fn name(&self) -> &str;

    /// Look up one episode of a series.
    async fn fetch_episode(
        &self,
        series_id: u64,
        season: u32,
        episode: u32,
    ) -> Result<EpisodeMetadata, ProviderError>;
}
