//! Pipeline counters.
//!
//! Stages bump these with relaxed atomics; only the `/metrics` handler reads
//! them. Nothing in the pipeline branches on a counter value.

use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

/// Lock-free counters shared by all stages.
#[derive(Debug)]
pub struct PipelineStats {
    started_at: Instant,
    events_received: AtomicU64,
    events_rejected: AtomicU64,
    tasks_enqueued: AtomicU64,
    messages_enriched: AtomicU64,
    tasks_dropped: AtomicU64,
    deliveries_succeeded: AtomicU64,
    deliveries_failed: AtomicU64,
    deliveries_abandoned: AtomicU64,
}

/// Point-in-time copy of [`PipelineStats`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StatsSnapshot {
    pub events_received: u64,
    pub events_rejected: u64,
    pub tasks_enqueued: u64,
    pub messages_enriched: u64,
    pub tasks_dropped: u64,
    pub deliveries_succeeded: u64,
    pub deliveries_failed: u64,
    pub deliveries_abandoned: u64,
}

impl PipelineStats {
    pub fn new() -> Self {
        Self {
            started_at: Instant::now(),
            events_received: AtomicU64::new(0),
            events_rejected: AtomicU64::new(0),
            tasks_enqueued: AtomicU64::new(0),
            messages_enriched: AtomicU64::new(0),
            tasks_dropped: AtomicU64::new(0),
            deliveries_succeeded: AtomicU64::new(0),
            deliveries_failed: AtomicU64::new(0),
            deliveries_abandoned: AtomicU64::new(0),
        }
    }

    pub fn record_event_received(&self) {
        self.events_received.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_event_rejected(&self) {
        self.events_rejected.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_tasks_enqueued(&self, count: usize) {
        self.tasks_enqueued.fetch_add(count as u64, Ordering::Relaxed);
    }

    pub fn record_enriched(&self) {
        self.messages_enriched.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_dropped(&self) {
        self.tasks_dropped.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_delivery_succeeded(&self) {
        self.deliveries_succeeded.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_delivery_failed(&self) {
        self.deliveries_failed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_deliveries_abandoned(&self, count: usize) {
        self.deliveries_abandoned
            .fetch_add(count as u64, Ordering::Relaxed);
    }

    pub fn uptime_seconds(&self) -> u64 {
        self.started_at.elapsed().as_secs()
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            events_received: self.events_received.load(Ordering::Relaxed),
            events_rejected: self.events_rejected.load(Ordering::Relaxed),
            tasks_enqueued: self.tasks_enqueued.load(Ordering::Relaxed),
            messages_enriched: self.messages_enriched.load(Ordering::Relaxed),
            tasks_dropped: self.tasks_dropped.load(Ordering::Relaxed),
            deliveries_succeeded: self.deliveries_succeeded.load(Ordering::Relaxed),
            deliveries_failed: self.deliveries_failed.load(Ordering::Relaxed),
            deliveries_abandoned: self.deliveries_abandoned.load(Ordering::Relaxed),
        }
    }
}

impl Default for PipelineStats {
    fn default() -> Self {
        Self::new()
    }
}

/// Format seconds as `42s`, `3m 12s` or `2h 5m 9s`.
pub fn format_uptime(uptime: u64) -> String {
    if uptime < 60 {
        format!("{}s", uptime)
    } else if uptime < 3600 {
        format!("{}m {}s", uptime / 60, uptime % 60)
    } else {
        format!("{}h {}m {}s", uptime / 3600, (uptime % 3600) / 60, uptime % 60)
    }
}
