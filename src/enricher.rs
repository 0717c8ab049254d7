//! Enricher stage.
//!
//! Pops [`EnrichmentTask`]s from the enrichment queue, looks the episode up
//! with a [`MetadataProvider`], and pushes the resulting [`EnrichedMessage`]
//! onto the delivery queue.
//!
//! ```text
//! loop {
//!   ├─► pop task (waits ≤ poll interval, observes stop)
//!   ├─► fetch_episode
//!   │     ├─► transient → log, sleep backoff, retry (stop-aware)
//!   │     ├─► permanent → log, drop task
//!   │     └─► ok        → push EnrichedMessage
//!   └─► repeat until stopped or the queue closes
//! }
//! ```

use crate::event::{EnrichedMessage, EnrichmentTask};
use crate::provider::{MetadataProvider, ProviderError};
use crate::queue::{Pop, QueueReceiver, QueueSender};
use crate::retry::{retry_transient, BackoffPolicy, RetryOutcome};
use crate::stats::PipelineStats;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Collaborators shared by every iteration of the enricher loop.
#[derive(Clone)]
pub struct EnricherParams {
    pub provider: Arc<dyn MetadataProvider>,
    pub backoff: BackoffPolicy,
    pub stats: Arc<PipelineStats>,
}

/// What happened to a single task.
#[derive(Debug)]
pub enum EnrichOutcome {
    Enriched(EnrichedMessage),
    /// Permanent provider failure; the task is gone
    Dropped(ProviderError),
    /// Stop was requested while retrying
    Abandoned,
}

/// Enrich one task, retrying transient provider errors until stopped.
pub async fn enrich_one(
    task: EnrichmentTask,
    params: &EnricherParams,
    stop: &CancellationToken,
) -> EnrichOutcome {
    let series_id = task.series.tvdb_id;
    let season = task.episode.season;
    let episode = task.episode.number;
    let operation = format!("{} lookup", params.provider.name());

    let outcome = retry_transient(&operation, &params.backoff, stop, || {
        params.provider.fetch_episode(series_id, season, episode)
    })
    .await;

    match outcome {
        RetryOutcome::Done(metadata) => EnrichOutcome::Enriched(task.enrich(metadata)),
        RetryOutcome::Failed(e) => EnrichOutcome::Dropped(e),
        RetryOutcome::Stopped => EnrichOutcome::Abandoned,
    }
}

/// Run the enricher loop until `stop` is cancelled or the task queue closes.
pub async fn run_enricher(
    mut tasks: QueueReceiver<EnrichmentTask>,
    messages: QueueSender<EnrichedMessage>,
    params: EnricherParams,
    stop: CancellationToken,
) {
    info!(
        provider = %params.provider.name(),
        poll_interval_ms = tasks.poll_interval().as_millis() as u64,
        "Enricher started"
    );

    loop {
        let task = match tasks.pop(&stop).await {
            Pop::Item(task) => task,
            Pop::Empty => continue,
            Pop::Stopped => break,
            Pop::Closed => {
                info!("Enrichment queue closed");
                break;
            }
        };

        let correlation_id = task.trace.correlation_id.clone();
        let series = task.series.title.clone();
        let code = task.episode.code();

        debug!(
            correlation_id = %correlation_id,
            series = %series,
            episode = %code,
            "Enriching episode"
        );

        match enrich_one(task, &params, &stop).await {
            EnrichOutcome::Enriched(message) => {
                params.stats.record_enriched();
                debug!(
                    correlation_id = %correlation_id,
                    series = %series,
                    episode = %code,
                    has_banner = message.metadata.banner_url.is_some(),
                    "Episode enriched"
                );

                if messages.push(message).is_err() {
                    warn!(
                        correlation_id = %correlation_id,
                        series = %series,
                        episode = %code,
                        "Delivery queue closed, discarding message"
                    );
                }
            }
            EnrichOutcome::Dropped(e) => {
                params.stats.record_dropped();
                error!(
                    correlation_id = %correlation_id,
                    series = %series,
                    episode = %code,
                    error = %e,
                    "Metadata lookup failed, dropping task"
                );
            }
            EnrichOutcome::Abandoned => {
                info!(
                    correlation_id = %correlation_id,
                    series = %series,
                    episode = %code,
                    "Stop requested during retry, abandoning task"
                );
                break;
            }
        }
    }

    info!("Enricher stopped");
}
