//! Shared state for HTTP handlers.

use std::sync::Arc;

use tokio::sync::watch;
use tokio_util::sync::CancellationToken;

use crate::ingest::Recorder;
use crate::source::{ReplayClient, WatcherStatus};

/// Application state shared across all handlers.
#[derive(Clone)]
pub struct AppState {
    pub recorder: Arc<Recorder>,
    pub replay: ReplayClient,
    /// Status of a watcher running in the same process.
    pub watcher_status: Option<watch::Receiver<WatcherStatus>>,
    /// Cancellation token for graceful shutdown.
    pub cancel: CancellationToken,
}

impl AppState {
    #[must_use]
    pub fn new(recorder: Arc<Recorder>, replay: ReplayClient) -> Self {
        Self {
            recorder,
            replay,
            watcher_status: None,
            cancel: CancellationToken::new(),
        }
    }

    /// Report the status of an in-process watcher.
    #[must_use]
    pub fn with_watcher_status(mut self, status: watch::Receiver<WatcherStatus>) -> Self {
        self.watcher_status = Some(status);
        self
    }

    #[must_use]
    pub fn with_cancel(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    /// Current watcher status, if a watcher is attached.
    #[must_use]
    pub fn watcher(&self) -> Option<WatcherStatus> {
        self.watcher_status.as_ref().map(|rx| *rx.borrow())
    }
}
