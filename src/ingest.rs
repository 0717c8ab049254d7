//! Ingestion of Sonarr webhook payloads.
//!
//! [`parse_event`] turns a raw JSON payload into a [`DomainEvent`], rejecting
//! anything incomplete with a [`ValidationError`] that names the offending
//! field. [`Ingestor::ingest`] then splits the event into one
//! [`EnrichmentTask`] per episode and pushes them onto the enrichment queue.
//!
//! Keys are matched ignoring ASCII case, so both Sonarr v2 (`EventType`,
//! `Series`, `TvdbId`) and v3+ (`eventType`, `series`, `tvdbId`) payloads
//! are accepted.

use crate::event::{DomainEvent, EnrichmentTask, EpisodeRef, EventType, Series, TraceContext};
use crate::queue::QueueSender;
use crate::stats::PipelineStats;
use serde_json::{Map, Value};
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, info, warn};

/// A payload that cannot be turned into a [`DomainEvent`].
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ValidationError {
    #[error("missing field: {0}")]
    MissingField(String),

    #[error("invalid field '{path}': expected {expected}")]
    InvalidField {
        path: String,
        expected: &'static str,
    },

    #[error("'{0}' must be a JSON object")]
    NotAnObject(String),

    #[error("unknown event type: {0}")]
    UnknownEventType(String),
}

impl ValidationError {
    /// Path of the field the error refers to.
    pub fn field(&self) -> &str {
        match self {
            Self::MissingField(path) | Self::NotAnObject(path) => path.as_str(),
            Self::InvalidField { path, .. } => path.as_str(),
            Self::UnknownEventType(_) => "eventType",
        }
    }
}

/// Errors returned by [`Ingestor::ingest`].
#[derive(Debug, Error)]
pub enum IngestError {
    #[error(transparent)]
    Validation(#[from] ValidationError),

    /// The enricher has shut down and no longer accepts tasks
    #[error("enrichment queue is closed")]
    QueueClosed,
}

/// Look up a key ignoring ASCII case, preferring an exact match.
fn lookup<'a>(obj: &'a Map<String, Value>, key: &str) -> Option<&'a Value> {
    obj.get(key).or_else(|| {
        obj.iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(key))
            .map(|(_, v)| v)
    })
}

fn join(prefix: &str, key: &str) -> String {
    if prefix.is_empty() {
        key.to_string()
    } else {
        format!("{}.{}", prefix, key)
    }
}

fn required<'a>(
    obj: &'a Map<String, Value>,
    prefix: &str,
    key: &str,
) -> Result<&'a Value, ValidationError> {
    match lookup(obj, key) {
        Some(Value::Null) | None => Err(ValidationError::MissingField(join(prefix, key))),
        Some(value) => Ok(value),
    }
}

fn required_str(
    obj: &Map<String, Value>,
    prefix: &str,
    key: &str,
) -> Result<String, ValidationError> {
    required(obj, prefix, key)?
        .as_str()
        .map(str::to_string)
        .ok_or_else(|| ValidationError::InvalidField {
            path: join(prefix, key),
            expected: "a string",
        })
}

fn required_u64(obj: &Map<String, Value>, prefix: &str, key: &str) -> Result<u64, ValidationError> {
    required(obj, prefix, key)?
        .as_u64()
        .ok_or_else(|| ValidationError::InvalidField {
            path: join(prefix, key),
            expected: "a non-negative integer",
        })
}

fn required_u32(obj: &Map<String, Value>, prefix: &str, key: &str) -> Result<u32, ValidationError> {
    let value = required_u64(obj, prefix, key)?;
    u32::try_from(value).map_err(|_| ValidationError::InvalidField {
        path: join(prefix, key),
        expected: "a 32-bit integer",
    })
}

fn parse_series(value: &Value) -> Result<Series, ValidationError> {
    let obj = value
        .as_object()
        .ok_or_else(|| ValidationError::NotAnObject("series".to_string()))?;

    Ok(Series {
        title: required_str(obj, "series", "title")?,
        tvdb_id: required_u64(obj, "series", "tvdbId")?,
    })
}

fn parse_episode(index: usize, value: &Value) -> Result<EpisodeRef, ValidationError> {
    let prefix = format!("episodes[{}]", index);
    let obj = value
        .as_object()
        .ok_or_else(|| ValidationError::NotAnObject(prefix.clone()))?;

    Ok(EpisodeRef {
        season: required_u32(obj, &prefix, "seasonNumber")?,
        number: required_u32(obj, &prefix, "episodeNumber")?,
        title: required_str(obj, &prefix, "title")?,
        quality: required_str(obj, &prefix, "quality")?,
    })
}

/// Validate a raw webhook payload.
///
/// Either every episode is valid and the whole event is returned, or nothing
/// is. An empty `episodes` array is valid and yields an event with no
/// episodes.
pub fn parse_event(payload: &Value) -> Result<DomainEvent, ValidationError> {
    let obj = payload
        .as_object()
        .ok_or_else(|| ValidationError::NotAnObject("payload".to_string()))?;

    let raw_type = required_str(obj, "", "eventType")?;
    let event_type =
        EventType::parse(&raw_type).ok_or(ValidationError::UnknownEventType(raw_type))?;

    let series = parse_series(required(obj, "", "series")?)?;

    let episodes = required(obj, "", "episodes")?
        .as_array()
        .ok_or_else(|| ValidationError::InvalidField {
            path: "episodes".to_string(),
            expected: "an array",
        })?
        .iter()
        .enumerate()
        .map(|(index, value)| parse_episode(index, value))
        .collect::<Result<Vec<_>, _>>()?;

    Ok(DomainEvent {
        event_type,
        series,
        episodes,
    })
}

/// Front of the pipeline: validates events and feeds the enrichment queue.
#[derive(Clone)]
pub struct Ingestor {
    queue: QueueSender<EnrichmentTask>,
    stats: Arc<PipelineStats>,
}

impl Ingestor {
    pub fn new(queue: QueueSender<EnrichmentTask>, stats: Arc<PipelineStats>) -> Self {
        Self { queue, stats }
    }

    /// Returns false once the enricher has gone away.
    pub fn is_accepting(&self) -> bool {
        !self.queue.is_closed()
    }

    /// Validate and enqueue a payload under a fresh correlation id.
    pub fn ingest(&self, payload: &Value) -> Result<usize, IngestError> {
        self.ingest_traced(payload, TraceContext::generate())
    }

    /// Validate and enqueue a payload, returning the number of tasks enqueued.
    pub fn ingest_traced(
        &self,
        payload: &Value,
        trace: TraceContext,
    ) -> Result<usize, IngestError> {
        self.stats.record_event_received();

        let event = match parse_event(payload) {
            Ok(event) => event,
            Err(e) => {
                self.stats.record_event_rejected();
                warn!(
                    correlation_id = %trace.correlation_id,
                    field = %e.field(),
                    error = %e,
                    "Rejected invalid payload"
                );
                return Err(e.into());
            }
        };

        if self.queue.is_closed() {
            warn!(
                correlation_id = %trace.correlation_id,
                "Enrichment queue closed, rejecting event"
            );
            return Err(IngestError::QueueClosed);
        }

        let event_type = event.event_type;
        let title = event.series.title.clone();
        let correlation_id = trace.correlation_id.clone();

        let mut count = 0;
        for task in event.into_tasks(trace) {
            debug!(
                correlation_id = %correlation_id,
                episode = %task.episode.code(),
                "Enqueueing enrichment task"
            );
            self.queue.push(task).map_err(|_| IngestError::QueueClosed)?;
            count += 1;
        }

        self.stats.record_tasks_enqueued(count);
        info!(
            correlation_id = %correlation_id,
            event_type = %event_type,
            series = %title,
            tasks = count,
            "Event ingested"
        );

        Ok(count)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::queue::{self, Pop, QueueReceiver};
    use serde_json::json;
    use std::time::Duration;
    use tokio_util::sync::CancellationToken;

    fn ingestor() -> (Ingestor, QueueReceiver<EnrichmentTask>, Arc<PipelineStats>) {
        let (tx, rx) = queue::channel(Duration::from_millis(10));
        let stats = Arc::new(PipelineStats::new());
        (Ingestor::new(tx, stats.clone()), rx, stats)
    }

    async fn drain(rx: &mut QueueReceiver<EnrichmentTask>) -> Vec<EnrichmentTask> {
        let stop = CancellationToken::new();
        let mut tasks = Vec::new();
        while let Pop::Item(task) = rx.pop(&stop).await {
            tasks.push(task);
        }
        tasks
    }

    fn sample_payload() -> Value {
        json!({
            "eventType": "Download",
            "series": { "id": 7, "title": "Show", "tvdbId": 42 },
            "episodes": [
                { "seasonNumber": 1, "episodeNumber": 3, "title": "Third", "quality": "HDTV-720p" },
                { "seasonNumber": 1, "episodeNumber": 4, "title": "Fourth", "quality": "HDTV-720p" },
                { "seasonNumber": 2, "episodeNumber": 1, "title": "Premiere", "quality": "WEBDL-1080p" }
            ]
        })
    }

    #[test]
    fn test_parse_valid_payload() {
        let event = parse_event(&sample_payload()).unwrap();
        assert_eq!(event.event_type, EventType::Download);
        assert_eq!(event.series.title, "Show");
        assert_eq!(event.series.tvdb_id, 42);
        assert_eq!(event.episodes.len(), 3);
        assert_eq!(event.episodes[2].quality, "WEBDL-1080p");
    }

    #[test]
    fn test_parse_legacy_pascal_case_keys() {
        let payload = json!({
            "EventType": "grab",
            "Series": { "Title": "Old Show", "TvdbId": 9 },
            "Episodes": [
                { "SeasonNumber": 3, "EpisodeNumber": 10, "Title": "Ten", "Quality": "SDTV" }
            ]
        });

        let event = parse_event(&payload).unwrap();
        assert_eq!(event.event_type, EventType::Grab);
        assert_eq!(event.series.title, "Old Show");
        assert_eq!(event.episodes[0].code(), "S03E10");
    }

    #[test]
    fn test_missing_fields_are_named() {
        let cases = [
            (json!({"series": {}, "episodes": []}), "eventType"),
            (json!({"eventType": "Grab", "episodes": []}), "series"),
            (
                json!({"eventType": "Grab", "series": {"tvdbId": 1}, "episodes": []}),
                "series.title",
            ),
            (
                json!({"eventType": "Grab", "series": {"title": "S"}, "episodes": []}),
                "series.tvdbId",
            ),
            (
                json!({"eventType": "Grab", "series": {"title": "S", "tvdbId": 1}}),
                "episodes",
            ),
        ];

        for (payload, field) in cases {
            let err = parse_event(&payload).unwrap_err();
            assert_eq!(err, ValidationError::MissingField(field.to_string()));
            assert!(err.to_string().contains(field));
        }
    }

    #[test]
    fn test_missing_episode_field_names_index() {
        let mut payload = sample_payload();
        payload["episodes"][1]
            .as_object_mut()
            .unwrap()
            .remove("quality");

        let err = parse_event(&payload).unwrap_err();
        assert_eq!(
            err,
            ValidationError::MissingField("episodes[1].quality".to_string())
        );
    }

    #[test]
    fn test_null_counts_as_missing() {
        let mut payload = sample_payload();
        payload["series"]["title"] = Value::Null;

        let err = parse_event(&payload).unwrap_err();
        assert_eq!(err, ValidationError::MissingField("series.title".to_string()));
    }

    #[test]
    fn test_wrong_types_rejected() {
        let mut payload = sample_payload();
        payload["series"]["tvdbId"] = json!("42");
        assert!(matches!(
            parse_event(&payload).unwrap_err(),
            ValidationError::InvalidField { ref path, .. } if path == "series.tvdbId"
        ));

        let mut payload = sample_payload();
        payload["episodes"][0]["seasonNumber"] = json!(-1);
        assert!(matches!(
            parse_event(&payload).unwrap_err(),
            ValidationError::InvalidField { ref path, .. } if path == "episodes[0].seasonNumber"
        ));

        let mut payload = sample_payload();
        payload["episodes"] = json!({"not": "a list"});
        assert!(matches!(
            parse_event(&payload).unwrap_err(),
            ValidationError::InvalidField { ref path, .. } if path == "episodes"
        ));

        let mut payload = sample_payload();
        payload["episodes"][2] = json!("S02E01");
        assert_eq!(
            parse_event(&payload).unwrap_err(),
            ValidationError::NotAnObject("episodes[2]".to_string())
        );

        assert_eq!(
            parse_event(&json!([1, 2])).unwrap_err(),
            ValidationError::NotAnObject("payload".to_string())
        );
    }

    #[test]
    fn test_unknown_event_type() {
        let mut payload = sample_payload();
        payload["eventType"] = json!("Upgrade");

        let err = parse_event(&payload).unwrap_err();
        assert_eq!(err, ValidationError::UnknownEventType("Upgrade".to_string()));
        assert_eq!(err.field(), "eventType");
    }

    #[tokio::test]
    async fn test_ingest_enqueues_one_task_per_episode_in_order() {
        let (ingestor, mut rx, stats) = ingestor();

        let count = ingestor.ingest(&sample_payload()).unwrap();
        assert_eq!(count, 3);

        let tasks = drain(&mut rx).await;
        let codes: Vec<String> = tasks.iter().map(|t| t.episode.code()).collect();
        assert_eq!(codes, vec!["S01E03", "S01E04", "S02E01"]);
        assert!(tasks.iter().all(|t| t.event_type == EventType::Download));

        let correlation = &tasks[0].trace.correlation_id;
        assert!(tasks.iter().all(|t| &t.trace.correlation_id == correlation));

        assert_eq!(stats.snapshot().tasks_enqueued, 3);
    }

    #[tokio::test]
    async fn test_ingest_empty_episode_list_enqueues_nothing() {
        let (ingestor, mut rx, _) = ingestor();
        let payload = json!({
            "eventType": "Test",
            "series": { "title": "Show", "tvdbId": 42 },
            "episodes": []
        });

        assert_eq!(ingestor.ingest(&payload).unwrap(), 0);
        assert!(drain(&mut rx).await.is_empty());
    }

    #[tokio::test]
    async fn test_invalid_payload_enqueues_nothing() {
        let (ingestor, mut rx, stats) = ingestor();
        let mut payload = sample_payload();
        payload["episodes"][2]
            .as_object_mut()
            .unwrap()
            .remove("title");

        let err = ingestor.ingest(&payload).unwrap_err();
        assert!(matches!(
            err,
            IngestError::Validation(ValidationError::MissingField(ref f))
                if f == "episodes[2].title"
        ));
        assert!(drain(&mut rx).await.is_empty());

        let snapshot = stats.snapshot();
        assert_eq!(snapshot.events_received, 1);
        assert_eq!(snapshot.events_rejected, 1);
        assert_eq!(snapshot.tasks_enqueued, 0);
    }

    #[tokio::test]
    async fn test_ingest_traced_keeps_correlation_id() {
        let (ingestor, mut rx, _) = ingestor();

        ingestor
            .ingest_traced(&sample_payload(), TraceContext::new("from-header"))
            .unwrap();

        let tasks = drain(&mut rx).await;
        assert!(tasks.iter().all(|t| t.trace.correlation_id == "from-header"));
    }

    #[test]
    fn test_ingest_fails_when_queue_closed() {
        let (ingestor, rx, _) = ingestor();
        drop(rx);

        assert!(matches!(
            ingestor.ingest(&sample_payload()),
            Err(IngestError::QueueClosed)
        ));
    }
}
