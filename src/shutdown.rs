//! Graceful shutdown coordination.
//!
//! The [`ShutdownController`] listens on a [`SignalSource`] and, for every
//! [`ShutdownRequest`] it receives, calls [`Stoppable::stop`] on each
//! registered component. It never waits for the components themselves; the
//! caller joins the worker tasks after the controller has fired.
//!
//! # Example
//!
//! ```rust,ignore
//! use tvherald::shutdown::{OsSignals, ShutdownController, StopHandle};
//!
//! let enricher = StopHandle::new("enricher");
//! let dispatcher = StopHandle::new("dispatcher");
//!
//! let mut controller = ShutdownController::new();
//! controller.register(Arc::new(enricher.clone()));
//! controller.register(Arc::new(dispatcher.clone()));
//!
//! tokio::spawn(controller.run(OsSignals::new()?, CancellationToken::new()));
//! ```

use async_trait::async_trait;
use std::fmt;
use std::io;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

/// A component that can be asked to stop.
///
/// `stop` must be idempotent and callable from any task.
pub trait Stoppable: Send + Sync {
    fn stop(&self);
}

/// Named wrapper around a [`CancellationToken`].
///
/// Clones share the same token, so the stage holds `token()` and the
/// controller holds the handle.
#[derive(Debug, Clone)]
pub struct StopHandle {
    name: String,
    token: CancellationToken,
}

impl StopHandle {
    pub fn new(name: impl Into<String>) -> Self {
        Self::with_token(name, CancellationToken::new())
    }

    /// Wrap an existing token (e.g. a child of a process-wide token)
    pub fn with_token(name: impl Into<String>, token: CancellationToken) -> Self {
        Self {
            name: name.into(),
            token,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Token to hand to the worker loop
    pub fn token(&self) -> CancellationToken {
        self.token.clone()
    }

    pub fn is_stopped(&self) -> bool {
        self.token.is_cancelled()
    }
}

impl Stoppable for StopHandle {
    fn stop(&self) {
        if self.token.is_cancelled() {
            debug!(component = %self.name, "Already stopped");
            return;
        }
        info!(component = %self.name, "Stopping");
        self.token.cancel();
    }
}

/// One shutdown trigger.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShutdownRequest {
    /// Signal name, e.g. `SIGTERM`
    pub signal: String,
}

impl ShutdownRequest {
    pub fn new(signal: impl Into<String>) -> Self {
        Self {
            signal: signal.into(),
        }
    }
}

impl fmt::Display for ShutdownRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.signal)
    }
}

/// An async stream of shutdown requests.
///
/// Returns `None` once no more requests can arrive.
#[async_trait]
pub trait SignalSource: Send {
    async fn next(&mut self) -> Option<ShutdownRequest>;
}

/// Process signals: SIGINT and SIGTERM on Unix, Ctrl+C elsewhere.
///
/// Handlers are installed once, in [`OsSignals::new`], and stay installed
/// for the life of the value so repeated signals are all observed.
pub struct OsSignals {
    #[cfg(unix)]
    interrupt: tokio::signal::unix::Signal,
    #[cfg(unix)]
    terminate: tokio::signal::unix::Signal,
}

impl OsSignals {
    #[cfg(unix)]
    pub fn new() -> io::Result<Self> {
        use tokio::signal::unix::{signal, SignalKind};

        Ok(Self {
            interrupt: signal(SignalKind::interrupt())?,
            terminate: signal(SignalKind::terminate())?,
        })
    }

    #[cfg(not(unix))]
    pub fn new() -> io::Result<Self> {
        Ok(Self {})
    }
}

#[async_trait]
impl SignalSource for OsSignals {
    #[cfg(unix)]
    async fn next(&mut self) -> Option<ShutdownRequest> {
        tokio::select! {
            received = self.interrupt.recv() => received.map(|_| ShutdownRequest::new("SIGINT")),
            received = self.terminate.recv() => received.map(|_| ShutdownRequest::new("SIGTERM")),
        }
    }

    #[cfg(not(unix))]
    async fn next(&mut self) -> Option<ShutdownRequest> {
        tokio::signal::ctrl_c()
            .await
            .ok()
            .map(|_| ShutdownRequest::new("Ctrl+C"))
    }
}

/// Channel-backed [`SignalSource`] for programmatic shutdown.
pub struct ChannelSignals {
    rx: mpsc::UnboundedReceiver<ShutdownRequest>,
}

impl ChannelSignals {
    /// Create the source and the sender that feeds it
    pub fn new() -> (mpsc::UnboundedSender<ShutdownRequest>, Self) {
        let (tx, rx) = mpsc::unbounded_channel();
        (tx, Self { rx })
    }
}

#[async_trait]
impl SignalSource for ChannelSignals {
    async fn next(&mut self) -> Option<ShutdownRequest> {
        self.rx.recv().await
    }
}

/// Fans shutdown requests out to every registered [`Stoppable`].
#[derive(Default)]
pub struct ShutdownController {
    stoppables: Vec<Arc<dyn Stoppable>>,
}

impl ShutdownController {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, stoppable: Arc<dyn Stoppable>) {
        self.stoppables.push(stoppable);
    }

    /// Stop every registered component once.
    pub fn stop_all(&self) {
        for stoppable in &self.stoppables {
            stoppable.stop();
        }
    }

    /// Handle requests from `source` until it is exhausted or `cancel` fires.
    pub async fn run<S: SignalSource>(self, mut source: S, cancel: CancellationToken) {
        loop {
            let request = tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                request = source.next() => request,
            };

            let Some(request) = request else {
                debug!("Signal source exhausted");
                break;
            };

            info!(
                signal = %request,
                components = self.stoppables.len(),
                "Caught signal {}: terminating",
                request
            );
            self.stop_all();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    #[derive(Default)]
    struct CountingStop {
        calls: AtomicUsize,
    }

    impl Stoppable for CountingStop {
        fn stop(&self) {
            self.calls.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[test]
    fn test_stop_handle_is_idempotent() {
        let handle = StopHandle::new("enricher");
        let token = handle.token();
        assert_eq!(handle.name(), "enricher");
        assert!(!handle.is_stopped());

        handle.stop();
        handle.stop();

        assert!(handle.is_stopped());
        assert!(token.is_cancelled());
    }

    #[test]
    fn test_clones_share_token() {
        let handle = StopHandle::new("dispatcher");
        let clone = handle.clone();

        clone.stop();
        assert!(handle.is_stopped());
    }

    #[tokio::test]
    async fn test_one_stop_per_signal() {
        let first = Arc::new(CountingStop::default());
        let second = Arc::new(CountingStop::default());

        let mut controller = ShutdownController::new();
        controller.register(first.clone());
        controller.register(second.clone());

        let (tx, source) = ChannelSignals::new();
        tx.send(ShutdownRequest::new("SIGINT")).unwrap();
        drop(tx);

        controller.run(source, CancellationToken::new()).await;

        assert_eq!(first.calls.load(Ordering::SeqCst), 1);
        assert_eq!(second.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_repeated_signals_are_safe() {
        let counter = Arc::new(CountingStop::default());
        let handle = StopHandle::new("server");

        let mut controller = ShutdownController::new();
        controller.register(counter.clone());
        controller.register(Arc::new(handle.clone()));

        let (tx, source) = ChannelSignals::new();
        tx.send(ShutdownRequest::new("SIGINT")).unwrap();
        tx.send(ShutdownRequest::new("SIGTERM")).unwrap();
        tx.send(ShutdownRequest::new("SIGTERM")).unwrap();
        drop(tx);

        controller.run(source, CancellationToken::new()).await;

        assert_eq!(counter.calls.load(Ordering::SeqCst), 3);
        assert!(handle.is_stopped());
    }

    #[tokio::test]
    async fn test_cancel_ends_controller_without_stopping() {
        let counter = Arc::new(CountingStop::default());
        let mut controller = ShutdownController::new();
        controller.register(counter.clone());

        let (_tx, source) = ChannelSignals::new();
        let cancel = CancellationToken::new();
        let handle = tokio::spawn(controller.run(source, cancel.clone()));

        cancel.cancel();
        tokio::time::timeout(Duration::from_secs(1), handle)
            .await
            .unwrap()
            .unwrap();

        assert_eq!(counter.calls.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_request_display() {
        assert_eq!(ShutdownRequest::new("SIGTERM").to_string(), "SIGTERM");
    }
}
