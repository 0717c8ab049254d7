//! Dispatcher stage - renders enriched messages and fans them out.
//!
//! Every [`EnrichedMessage`] is rendered once and then delivered to each
//! configured recipient in configuration order. Recipients are independent:
//!
//! ```text
//! message ──► render ──► recipient 1 ──► ok
//!                    ├─► recipient 2 ──► transient → backoff → retry 2 → ok
//!                    ├─► recipient 3 ──► permanent → log, skip
//!                    └─► recipient 4 ──► ok
//! ```
//!
//! A permanent failure for one recipient never affects the others, and a
//! transient failure is only ever retried against the recipient that
//! produced it.

use crate::delivery::{ChatSender, DeliveryError, RecipientId};
use crate::event::EnrichedMessage;
use crate::queue::{Pop, QueueReceiver};
use crate::retry::{retry_transient, BackoffPolicy, RetryOutcome};
use crate::stats::PipelineStats;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Render the chat text for a message.
///
/// ```text
/// {title} S{season:02}E{episode:02} ({quality})
/// {action}
///
/// {overview}
///
/// {banner}
/// ```
///
/// A missing banner leaves the last section empty; trailing whitespace is
/// trimmed.
pub fn render(message: &EnrichedMessage) -> String {
    let text = format!(
        "{title} {code} ({quality})\n{action}\n\n{overview}\n\n{banner}",
        title = message.series.title,
        code = message.episode.code(),
        quality = message.episode.quality,
        action = message.event_type.action(),
        overview = message.metadata.overview,
        banner = message.metadata.banner_url.as_deref().unwrap_or(""),
    );

    text.trim_end().to_string()
}

/// Collaborators shared by every iteration of the dispatcher loop.
#[derive(Clone)]
pub struct DispatcherParams {
    pub sender: Arc<dyn ChatSender>,
    /// Delivery order is the order of this list
    pub recipients: Arc<[RecipientId]>,
    pub backoff: BackoffPolicy,
    pub stats: Arc<PipelineStats>,
}

/// Result of delivering one message to every recipient.
#[derive(Debug, Default)]
pub struct DispatchReport {
    /// Recipients that received the message
    pub delivered: Vec<RecipientId>,

    /// Recipients that failed permanently
    pub failed: Vec<(RecipientId, DeliveryError)>,

    /// Recipients not attempted (or cut short) because of a stop request
    pub abandoned: Vec<RecipientId>,
}

impl DispatchReport {
    /// Returns true if every recipient received the message
    pub fn is_success(&self) -> bool {
        self.failed.is_empty() && self.abandoned.is_empty()
    }

    /// Returns the number of recipients that failed permanently
    pub fn failure_count(&self) -> usize {
        self.failed.len()
    }

    pub fn was_abandoned(&self) -> bool {
        !self.abandoned.is_empty()
    }
}

/// Deliver one message to every recipient.
pub async fn dispatch(
    message: &EnrichedMessage,
    params: &DispatcherParams,
    stop: &CancellationToken,
) -> DispatchReport {
    let text = render(message);
    let operation = format!("{} delivery", params.sender.name());
    let mut report = DispatchReport::default();

    for (index, &recipient) in params.recipients.iter().enumerate() {
        let outcome = retry_transient(&operation, &params.backoff, stop, || {
            params.sender.send_text(recipient, &text)
        })
        .await;

        match outcome {
            RetryOutcome::Done(()) => {
                params.stats.record_delivery_succeeded();
                debug!(
                    correlation_id = %message.trace.correlation_id,
                    chat_id = recipient,
                    "Message delivered"
                );
                report.delivered.push(recipient);
            }
            RetryOutcome::Failed(e) => {
                params.stats.record_delivery_failed();
                error!(
                    correlation_id = %message.trace.correlation_id,
                    chat_id = recipient,
                    error = %e,
                    "Failed sending message"
                );
                report.failed.push((recipient, e));
            }
            RetryOutcome::Stopped => {
                report
                    .abandoned
                    .extend_from_slice(&params.recipients[index..]);
                params
                    .stats
                    .record_deliveries_abandoned(report.abandoned.len());
                break;
            }
        }
    }

    report
}

/// Run the dispatcher loop until `stop` is cancelled or the message queue closes.
pub async fn run_dispatcher(
    mut messages: QueueReceiver<EnrichedMessage>,
    params: DispatcherParams,
    stop: CancellationToken,
) {
    info!(
        sender = %params.sender.name(),
        recipients = params.recipients.len(),
        poll_interval_ms = messages.poll_interval().as_millis() as u64,
        "Dispatcher started"
    );

    loop {
        let message = match messages.pop(&stop).await {
            Pop::Item(message) => message,
            Pop::Empty => continue,
            Pop::Stopped => break,
            Pop::Closed => {
                info!("Delivery queue closed");
                break;
            }
        };

        let report = dispatch(&message, &params, &stop).await;

        if report.is_success() {
            info!(
                correlation_id = %message.trace.correlation_id,
                series = %message.series.title,
                episode = %message.episode.code(),
                delivered = report.delivered.len(),
                latency_ms = message.trace.elapsed_ms(),
                "Message dispatched"
            );
        } else {
            warn!(
                correlation_id = %message.trace.correlation_id,
                series = %message.series.title,
                episode = %message.episode.code(),
                delivered = report.delivered.len(),
                failures = report.failure_count(),
                abandoned = ?report.abandoned,
                latency_ms = message.trace.elapsed_ms(),
                "Message dispatched with failures"
            );
        }

        if report.was_abandoned() {
            break;
        }
    }

    info!("Dispatcher stopped");
}
