//! FIFO hand-off queues between pipeline stages.
//!
//! Each queue has one or more [`QueueSender`]s and exactly one
//! [`QueueReceiver`]. Pushing never blocks; popping waits at most one poll
//! interval so the consuming loop gets a chance to look at its stop token
//! even when nothing arrives.
//!
//! ```text
//! Ingestor ──push──► [ queue A ] ──pop──► Enricher ──push──► [ queue B ] ──pop──► Dispatcher
//! ```

use std::time::Duration;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

/// Default bounded wait for [`QueueReceiver::pop`].
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(1);

/// Create a new unbounded queue.
pub fn channel<T>(poll_interval: Duration) -> (QueueSender<T>, QueueReceiver<T>) {
    let (tx, rx) = mpsc::unbounded_channel();
    (QueueSender { tx }, QueueReceiver { rx, poll_interval })
}

/// Returned by [`QueueSender::push`] when the consumer is gone.
///
/// Hands the rejected item back to the caller.
#[derive(Debug)]
pub struct QueueClosed<T>(pub T);

impl<T> QueueClosed<T> {
    pub fn into_inner(self) -> T {
        self.0
    }
}

/// Producer side of a queue. Cheap to clone.
#[derive(Debug)]
pub struct QueueSender<T> {
    tx: mpsc::UnboundedSender<T>,
}

impl<T> Clone for QueueSender<T> {
    fn clone(&self) -> Self {
        Self {
            tx: self.tx.clone(),
        }
    }
}

impl<T> QueueSender<T> {
    /// Push an item, transferring ownership to the queue.
    pub fn push(&self, item: T) -> Result<(), QueueClosed<T>> {
        self.tx.send(item).map_err(|e| QueueClosed(e.0))
    }

    /// Returns true once the receiver has been dropped.
    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

/// Outcome of a single bounded wait on a queue.
#[derive(Debug, PartialEq, Eq)]
pub enum Pop<T> {
    /// An item was dequeued
    Item(T),
    /// Nothing arrived within the poll interval
    Empty,
    /// The stop token was cancelled
    Stopped,
    /// All senders are gone and the queue is drained
    Closed,
}

/// Consumer side of a queue.
#[derive(Debug)]
pub struct QueueReceiver<T> {
    rx: mpsc::UnboundedReceiver<T>,
    poll_interval: Duration,
}

impl<T> QueueReceiver<T> {
    pub fn poll_interval(&self) -> Duration {
        self.poll_interval
    }

    /// Wait up to one poll interval for the next item.
    ///
    /// A cancelled token wins over a ready item, so a stopped worker never
    /// picks up new work.
    pub async fn pop(&mut self, stop: &CancellationToken) -> Pop<T> {
        if stop.is_cancelled() {
            return Pop::Stopped;
        }

        tokio::select! {
            biased;
            _ = stop.cancelled() => Pop::Stopped,
            received = tokio::time::timeout(self.poll_interval, self.rx.recv()) => match received {
                Ok(Some(item)) => Pop::Item(item),
                Ok(None) => Pop::Closed,
                Err(_) => Pop::Empty,
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::time::Instant;

    #[tokio::test]
    async fn test_fifo_order() {
        let (tx, mut rx) = channel(DEFAULT_POLL_INTERVAL);
        let stop = CancellationToken::new();

        for i in 0..5 {
            tx.push(i).unwrap();
        }

        for i in 0..5 {
            assert_eq!(rx.pop(&stop).await, Pop::Item(i));
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_empty_queue_waits_one_poll_interval() {
        let (_tx, mut rx) = channel::<u32>(Duration::from_millis(250));
        let stop = CancellationToken::new();

        let started = Instant::now();
        assert_eq!(rx.pop(&stop).await, Pop::Empty);
        assert_eq!(started.elapsed(), Duration::from_millis(250));
    }

    #[tokio::test]
    async fn test_stopped_wins_over_ready_item() {
        let (tx, mut rx) = channel(DEFAULT_POLL_INTERVAL);
        let stop = CancellationToken::new();

        tx.push(1).unwrap();
        stop.cancel();

        assert_eq!(rx.pop(&stop).await, Pop::Stopped);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_interrupts_wait() {
        let (_tx, mut rx) = channel::<u32>(Duration::from_secs(60));
        let stop = CancellationToken::new();

        let trigger = stop.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(10)).await;
            trigger.cancel();
        });

        let started = Instant::now();
        assert_eq!(rx.pop(&stop).await, Pop::Stopped);
        assert!(started.elapsed() < Duration::from_secs(1));
    }

    #[tokio::test]
    async fn test_closed_after_senders_dropped() {
        let (tx, mut rx) = channel(DEFAULT_POLL_INTERVAL);
        let stop = CancellationToken::new();

        tx.push("last").unwrap();
        drop(tx);

        assert_eq!(rx.pop(&stop).await, Pop::Item("last"));
        assert_eq!(rx.pop(&stop).await, Pop::Closed);
    }

    #[tokio::test]
    async fn test_push_after_receiver_dropped_returns_item() {
        let (tx, rx) = channel(DEFAULT_POLL_INTERVAL);
        drop(rx);

        assert!(tx.is_closed());
        let rejected = tx.push(7).unwrap_err();
        assert_eq!(rejected.into_inner(), 7);
    }
}
