//! Pipeline wiring.
//!
//! Builds both stage queues, spawns the enricher and dispatcher tasks and
//! hands back the [`Ingestor`] that feeds them:
//!
//! ```text
//! Ingestor ──► queue A ──► run_enricher ──► queue B ──► run_dispatcher
//!                               ▲                            ▲
//!                          StopHandle                   StopHandle
//! ```
//!
//! Each stage gets its own [`StopHandle`]; [`Pipeline::stoppables`] exposes
//! them for registration with a [`ShutdownController`](crate::shutdown::ShutdownController).

use crate::delivery::{ChatSender, RecipientId};
use crate::dispatcher::{run_dispatcher, DispatcherParams};
use crate::enricher::{run_enricher, EnricherParams};
use crate::ingest::Ingestor;
use crate::provider::MetadataProvider;
use crate::queue::{self, DEFAULT_POLL_INTERVAL};
use crate::retry::BackoffPolicy;
use crate::shutdown::{StopHandle, Stoppable};
use crate::stats::PipelineStats;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{error, info};

/// Tuning shared by both stages.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PipelineOptions {
    pub poll_interval: Duration,
    pub backoff: BackoffPolicy,
}

impl Default for PipelineOptions {
    fn default() -> Self {
        Self {
            poll_interval: DEFAULT_POLL_INTERVAL,
            backoff: BackoffPolicy::default(),
        }
    }
}

/// A running pipeline.
pub struct Pipeline {
    ingestor: Ingestor,
    stats: Arc<PipelineStats>,
    enricher_stop: StopHandle,
    dispatcher_stop: StopHandle,
    enricher: JoinHandle<()>,
    dispatcher: JoinHandle<()>,
}

impl Pipeline {
    /// Spawn both stages on the current runtime.
    pub fn start(
        provider: Arc<dyn MetadataProvider>,
        sender: Arc<dyn ChatSender>,
        recipients: Arc<[RecipientId]>,
        options: PipelineOptions,
    ) -> Self {
        let stats = Arc::new(PipelineStats::new());
        let (task_tx, task_rx) = queue::channel(options.poll_interval);
        let (message_tx, message_rx) = queue::channel(options.poll_interval);

        let enricher_stop = StopHandle::new("enricher");
        let dispatcher_stop = StopHandle::new("dispatcher");

        let enricher = tokio::spawn(run_enricher(
            task_rx,
            message_tx,
            EnricherParams {
                provider,
                backoff: options.backoff,
                stats: stats.clone(),
            },
            enricher_stop.token(),
        ));

        let dispatcher = tokio::spawn(run_dispatcher(
            message_rx,
            DispatcherParams {
                sender,
                recipients,
                backoff: options.backoff,
                stats: stats.clone(),
            },
            dispatcher_stop.token(),
        ));

        info!(
            poll_interval_ms = options.poll_interval.as_millis() as u64,
            backoff_max_secs = options.backoff.max.as_secs(),
            "Pipeline started"
        );

        Self {
            ingestor: Ingestor::new(task_tx, stats.clone()),
            stats,
            enricher_stop,
            dispatcher_stop,
            enricher,
            dispatcher,
        }
    }

    /// Entry point for new events
    pub fn ingestor(&self) -> Ingestor {
        self.ingestor.clone()
    }

    pub fn stats(&self) -> Arc<PipelineStats> {
        self.stats.clone()
    }

    /// Stage handles, for registration with a shutdown controller
    pub fn stoppables(&self) -> Vec<Arc<dyn Stoppable>> {
        vec![
            Arc::new(self.enricher_stop.clone()),
            Arc::new(self.dispatcher_stop.clone()),
        ]
    }

    /// Ask both stages to stop.
    pub fn stop(&self) {
        self.enricher_stop.stop();
        self.dispatcher_stop.stop();
    }

    /// Wait for both stage tasks to return.
    pub async fn join(self) {
        for (name, handle) in [("enricher", self.enricher), ("dispatcher", self.dispatcher)] {
            if let Err(e) = handle.await {
                error!(stage = name, error = %e, "Stage task failed");
            }
        }
        info!("Pipeline stopped");
    }
}
