//! Polling log watcher.
//!
//! Tails a fixed log file or follows the newest `.txt` in a directory and
//! hands each poll's new lines to a [`LineSink`]. The cursor only moves past
//! lines the sink accepted, so a failed delivery is retried on the next poll
//! and the normalizer drops anything that had already gone through.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;

use super::discovery::{find_latest_log, load_offset, save_offset};
use super::error::SourceError;
use super::tailer::LogTailer;
use crate::ingest::{Recorder, LIVE_STREAM};
use crate::store::SourceTag;

/// Default delay between polls.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(500);

/// Timeout for a single pushed line.
const DELIVERY_TIMEOUT: Duration = Duration::from_secs(2);

/// Watcher state as of the last attempted poll.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WatcherStatus {
    /// Nothing to watch yet.
    Idle,
    /// Last poll read the source and delivered everything.
    Watching,
    /// Last poll failed to read or deliver.
    Error,
}

impl WatcherStatus {
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Watching => "watching",
            Self::Error => "error",
        }
    }
}

/// Destination for tailed lines.
#[async_trait]
pub trait LineSink: Send + Sync {
    /// Deliver one poll's lines. All-or-nothing from the watcher's view.
    async fn deliver(&self, lines: &[String]) -> Result<(), SourceError>;
}

/// Posts each line to a running recorder's `/api/ingest_line`.
#[derive(Debug, Clone)]
pub struct HttpLineSink {
    client: Client,
    url: String,
}

impl HttpLineSink {
    /// Create a sink posting to `url`.
    ///
    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be built.
    pub fn new(url: impl Into<String>) -> Result<Self, SourceError> {
        let client = Client::builder()
            .timeout(DELIVERY_TIMEOUT)
            .build()
            .map_err(|e| SourceError::Delivery(e.to_string()))?;
        Ok(Self {
            client,
            url: url.into(),
        })
    }

    #[must_use]
    pub fn url(&self) -> &str {
        &self.url
    }
}

#[async_trait]
impl LineSink for HttpLineSink {
    async fn deliver(&self, lines: &[String]) -> Result<(), SourceError> {
        for line in lines {
            self.client
                .post(&self.url)
                .json(&serde_json::json!({ "line": line }))
                .send()
                .await
                .and_then(reqwest::Response::error_for_status)
                .map_err(|e| SourceError::Delivery(e.to_string()))?;
        }
        Ok(())
    }
}

/// Ingests each poll as one batch on the live stream of an in-process recorder.
#[derive(Clone)]
pub struct RecorderSink {
    recorder: Arc<Recorder>,
}

impl RecorderSink {
    #[must_use]
    pub fn new(recorder: Arc<Recorder>) -> Self {
        Self { recorder }
    }
}

#[async_trait]
impl LineSink for RecorderSink {
    async fn deliver(&self, lines: &[String]) -> Result<(), SourceError> {
        self.recorder
            .ingest(LIVE_STREAM, lines, SourceTag::File, false)
            .await
            .map(|_| ())
            .map_err(|e| SourceError::Delivery(e.to_string()))
    }
}

/// What the watcher follows.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WatchTarget {
    /// A fixed log file.
    File(PathBuf),
    /// The newest `.txt` file in a directory.
    Directory(PathBuf),
}

impl WatchTarget {
    #[must_use]
    pub fn path(&self) -> &Path {
        match self {
            Self::File(path) | Self::Directory(path) => path,
        }
    }
}

/// Watcher settings.
#[derive(Debug, Clone)]
pub struct WatcherConfig {
    pub target: WatchTarget,
    pub poll_interval: Duration,
    /// End the loop once the target no longer exists.
    pub stop_on_missing: bool,
    /// Keep the cursor in a `<log>.offset` sidecar.
    pub persist_offsets: bool,
}

impl WatcherConfig {
    #[must_use]
    pub fn new(target: WatchTarget) -> Self {
        Self {
            target,
            poll_interval: DEFAULT_POLL_INTERVAL,
            stop_on_missing: false,
            persist_offsets: true,
        }
    }
}

/// Result of one poll.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollOutcome {
    Continue,
    Stop,
}

/// Polling loop over a log source.
pub struct LogWatcher<S> {
    config: WatcherConfig,
    sink: S,
    tailer: Option<LogTailer>,
    status_tx: watch::Sender<WatcherStatus>,
    cancel: CancellationToken,
}

impl<S: LineSink> LogWatcher<S> {
    #[must_use]
    pub fn new(config: WatcherConfig, sink: S) -> Self {
        let (status_tx, _) = watch::channel(WatcherStatus::Idle);
        Self {
            config,
            sink,
            tailer: None,
            status_tx,
            cancel: CancellationToken::new(),
        }
    }

    /// Use an external stop signal (builder pattern).
    #[must_use]
    pub fn with_cancel(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    /// Current status.
    #[must_use]
    pub fn status(&self) -> WatcherStatus {
        *self.status_tx.borrow()
    }

    /// Receiver for status changes, usable after the watcher is moved into a task.
    #[must_use]
    pub fn subscribe(&self) -> watch::Receiver<WatcherStatus> {
        self.status_tx.subscribe()
    }

    #[must_use]
    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// File currently being tailed.
    #[must_use]
    pub fn current_file(&self) -> Option<&Path> {
        self.tailer.as_ref().map(LogTailer::path)
    }

    fn set_status(&self, status: WatcherStatus) {
        self.status_tx.send_if_modified(|current| {
            if *current == status {
                false
            } else {
                tracing::debug!(from = current.as_str(), to = status.as_str(), "Watcher status changed");
                *current = status;
                true
            }
        });
    }

    fn resolve_target(&self) -> Option<Option<PathBuf>> {
        match &self.config.target {
            WatchTarget::File(path) => path.is_file().then(|| Some(path.clone())),
            WatchTarget::Directory(dir) => dir.is_dir().then(|| find_latest_log(dir)),
        }
    }

    async fn follow(&mut self, path: PathBuf) {
        if self.tailer.as_ref().is_some_and(|t| t.path() == path) {
            return;
        }
        let offset = if self.config.persist_offsets {
            load_offset(&path).await
        } else {
            0
        };
        tracing::info!(path = %path.display(), offset, "Following log file");
        self.tailer = Some(LogTailer::with_offset(path, offset));
    }

    /// Poll the source once and deliver whatever is new.
    pub async fn poll_once(&mut self) -> PollOutcome {
        let Some(selected) = self.resolve_target() else {
            if self.config.stop_on_missing {
                tracing::info!(path = %self.config.target.path().display(), "Watched path is gone, stopping");
                return PollOutcome::Stop;
            }
            self.set_status(WatcherStatus::Idle);
            return PollOutcome::Continue;
        };
        let Some(path) = selected else {
            // Directory exists but holds no logs yet
            self.set_status(WatcherStatus::Idle);
            return PollOutcome::Continue;
        };

        self.follow(path).await;
        let Some(tailer) = self.tailer.as_mut() else {
            return PollOutcome::Continue;
        };
        let previous = tailer.offset();

        let pending = match tailer.read_pending().await {
            Ok(pending) => pending,
            Err(SourceError::Unavailable(path)) => {
                tracing::debug!(path = %path.display(), "Log file disappeared");
                self.set_status(WatcherStatus::Idle);
                return if self.config.stop_on_missing {
                    PollOutcome::Stop
                } else {
                    PollOutcome::Continue
                };
            }
            Err(e) => {
                tracing::warn!(error = %e, "Failed to read log file");
                self.set_status(WatcherStatus::Error);
                return PollOutcome::Continue;
            }
        };

        if !pending.lines.is_empty() {
            if let Err(e) = self.sink.deliver(&pending.lines).await {
                tracing::warn!(error = %e, lines = pending.lines.len(), "Failed to deliver lines");
                self.set_status(WatcherStatus::Error);
                return PollOutcome::Continue;
            }
            tracing::debug!(lines = pending.lines.len(), "Delivered lines");
        }

        tailer.advance(pending.next_offset);
        if self.config.persist_offsets && pending.next_offset != previous {
            if let Err(e) = save_offset(tailer.path(), pending.next_offset).await {
                tracing::warn!(error = %e, "Failed to save tail offset");
            }
        }

        self.set_status(WatcherStatus::Watching);
        PollOutcome::Continue
    }

    /// Poll until cancelled or, with `stop_on_missing`, until the target is gone.
    pub async fn run(mut self) {
        tracing::info!(
            target = %self.config.target.path().display(),
            interval_ms = self.config.poll_interval.as_millis(),
            "Starting log watcher"
        );

        while !self.cancel.is_cancelled() {
            if self.poll_once().await == PollOutcome::Stop {
                break;
            }
            tokio::select! {
                () = self.cancel.cancelled() => break,
                () = tokio::time::sleep(self.config.poll_interval) => {}
            }
        }

        self.set_status(WatcherStatus::Idle);
        tracing::info!("Log watcher stopped");
    }
}
