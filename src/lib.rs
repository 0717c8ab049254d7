//! # tvherald
//!
//! Relays Sonarr download notifications to Telegram chats, enriched with
//! episode overviews and banners from TheTVDB.
//!
//! ## Architecture
//!
//! ```text
//! Sonarr -> POST /sonarr -> Ingestor -> queue A -> Enricher -> queue B -> Dispatcher -> Telegram
//!                                                     |                        |
//!                                                  TheTVDB               per-recipient retry
//! ```
//!
//! A [`ShutdownController`] turns SIGINT/SIGTERM into stop requests for every
//! stage; stages observe them at each suspension point.
//!
//! ## Modules
//!
//! - [`event`]: Data model shared by all stages
//! - [`ingest`]: Payload validation and task fan-out
//! - [`queue`]: Stage hand-off queues
//! - [`retry`]: Backoff policy and stop-aware retry
//! - [`provider`]: Metadata provider trait and TheTVDB client
//! - [`enricher`]: Metadata lookup stage
//! - [`delivery`]: Chat sender trait, Telegram and log senders
//! - [`dispatcher`]: Rendering and per-recipient delivery stage
//! - [`shutdown`]: Signal handling and stop fan-out
//! - [`pipeline`]: Wiring of queues and stage tasks
//! - [`server`]: HTTP listener
//! - [`config`]: TOML configuration

pub mod config;
pub mod delivery;
pub mod dispatcher;
pub mod enricher;
pub mod event;
pub mod ingest;
pub mod pipeline;
pub mod provider;
pub mod queue;
pub mod retry;
pub mod server;
pub mod shutdown;
pub mod stats;

#[cfg(test)]
pub(crate) mod testing;

// Re-export commonly used types at crate root
pub use config::{ConfigError, HeraldConfig};
pub use delivery::{ChatSender, DeliveryError, RecipientId};
pub use event::{DomainEvent, EnrichedMessage, EnrichmentTask, EpisodeMetadata, EventType};
pub use ingest::{IngestError, Ingestor, ValidationError};
pub use pipeline::{Pipeline, PipelineOptions};
pub use provider::{MetadataProvider, ProviderError};
pub use retry::{BackoffPolicy, Transient};
pub use shutdown::{OsSignals, ShutdownController, StopHandle, Stoppable};
