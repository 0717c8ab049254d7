//! Core domain types for tvherald.
//!
//! A [`DomainEvent`] is what Sonarr reports through its webhook. The ingestor
//! splits it into one [`EnrichmentTask`] per episode; the enricher turns each
//! task into an [`EnrichedMessage`] once TheTVDB metadata has been attached.
//!
//! # Example payload
//!
//! ```json
//! {
//!   "eventType": "Download",
//!   "series": { "title": "Show", "tvdbId": 42 },
//!   "episodes": [
//!     { "seasonNumber": 1, "episodeNumber": 3, "title": "Pilot", "quality": "HDTV-720p" }
//!   ]
//! }
//! ```

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::fmt;

/// Lifecycle transition reported by Sonarr.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum EventType {
    Grab,
    Download,
    Rename,
    Test,
}

impl EventType {
    /// Parse an event type, ignoring ASCII case.
    pub fn parse(value: &str) -> Option<Self> {
        match value.to_ascii_lowercase().as_str() {
            "grab" => Some(Self::Grab),
            "download" => Some(Self::Download),
            "rename" => Some(Self::Rename),
            "test" => Some(Self::Test),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Grab => "Grab",
            Self::Download => "Download",
            Self::Rename => "Rename",
            Self::Test => "Test",
        }
    }

    /// Human readable action used in rendered chat messages.
    pub fn action(&self) -> &'static str {
        match self {
            Self::Grab => "Starting download",
            Self::Download => "Finished downloading",
            _ => "Unknown action",
        }
    }
}

impl fmt::Display for EventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Series identity as reported by Sonarr.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Series {
    pub title: String,

    /// TheTVDB series id
    pub tvdb_id: u64,
}

/// A single episode referenced by an event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EpisodeRef {
    pub season: u32,
    pub number: u32,
    pub title: String,

    /// Quality label, e.g. "HDTV-720p"
    pub quality: String,
}

impl EpisodeRef {
    /// Episode code in the usual `S01E03` form.
    pub fn code(&self) -> String {
        format!("S{:02}E{:02}", self.season, self.number)
    }
}

/// Correlation data carried alongside every task for log tracing.
///
/// All tasks split from one [`DomainEvent`] share the same context.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TraceContext {
    /// From the `X-Correlation-ID` header, or a generated UUID v4
    pub correlation_id: String,

    /// When the ingestor accepted the event
    pub received_at: DateTime<Utc>,
}

impl TraceContext {
    /// Create a context with the given correlation id, stamped now.
    pub fn new(correlation_id: impl Into<String>) -> Self {
        Self {
            correlation_id: correlation_id.into(),
            received_at: Utc::now(),
        }
    }

    /// Create a context with a fresh random correlation id.
    pub fn generate() -> Self {
        Self::new(uuid::Uuid::new_v4().to_string())
    }

    /// Milliseconds since the event was received (never negative).
    pub fn elapsed_ms(&self) -> i64 {
        (Utc::now() - self.received_at).num_milliseconds().max(0)
    }
}

/// A validated inbound event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DomainEvent {
    pub event_type: EventType,
    pub series: Series,
    pub episodes: Vec<EpisodeRef>,
}

impl DomainEvent {
    /// Split the event into one task per episode, preserving episode order.
    pub fn into_tasks(self, trace: TraceContext) -> Vec<EnrichmentTask> {
        let DomainEvent {
            event_type,
            series,
            episodes,
        } = self;

        episodes
            .into_iter()
            .map(|episode| EnrichmentTask {
                series: series.clone(),
                episode,
                event_type,
                trace: trace.clone(),
            })
            .collect()
    }
}

/// Unit of work for the enricher: exactly one episode.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EnrichmentTask {
    pub series: Series,
    pub episode: EpisodeRef,
    pub event_type: EventType,
    pub trace: TraceContext,
}

impl EnrichmentTask {
    /// Attach fetched metadata, consuming the task.
    pub fn enrich(self, metadata: EpisodeMetadata) -> EnrichedMessage {
        EnrichedMessage {
            series: self.series,
            episode: self.episode,
            event_type: self.event_type,
            metadata,
            trace: self.trace,
        }
    }
}

/// Descriptive metadata fetched from the metadata provider.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct EpisodeMetadata {
    pub overview: String,

    /// Series banner; `None` when the provider has none
    pub banner_url: Option<String>,
}

/// A task that has been successfully enriched and is ready for delivery.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EnrichedMessage {
    pub series: Series,
    pub episode: EpisodeRef,
    pub event_type: EventType,
    pub metadata: EpisodeMetadata,
    pub trace: TraceContext,
}
