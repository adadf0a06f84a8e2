//! Replay URL queue file.
//!
//! Users append replay links to a text file, one or more per line. Each
//! poll submits every queued URL once and rewrites the file with the URLs
//! that should be tried again, keeping anything appended meanwhile.

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::{Arc, LazyLock};
use std::time::Duration;

use async_trait::async_trait;
use regex::Regex;
use reqwest::Client;
use tokio_util::sync::CancellationToken;

use super::error::SourceError;
use super::replay::{normalize_replay_url, strip_replay_json, ReplayClient};
use crate::ingest::{IngestError, Recorder};

/// Default delay between queue polls.
pub const DEFAULT_QUEUE_INTERVAL: Duration = Duration::from_secs(1);

/// Timeout for one replay submission, fetch included.
const SUBMIT_TIMEOUT: Duration = Duration::from_secs(8);

static URL_PATTERN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"https?://\S+").expect("url regex is valid"));

/// Replay page URLs found in queue file text, deduplicated in order.
///
/// Lines without an http(s) URL are taken whole. Entries that do not
/// normalize to a replay URL are dropped.
#[must_use]
pub fn extract_replay_urls(text: &str) -> Vec<String> {
    let mut seen = HashSet::new();
    let mut urls = Vec::new();
    for line in text.lines().map(str::trim).filter(|l| !l.is_empty()) {
        let found: Vec<&str> = URL_PATTERN.find_iter(line).map(|m| m.as_str()).collect();
        let candidates = if found.is_empty() { vec![line] } else { found };
        for candidate in candidates {
            match normalize_replay_url(candidate) {
                Ok(document_url) => {
                    let url = strip_replay_json(&document_url);
                    if seen.insert(url.clone()) {
                        urls.push(url);
                    }
                }
                Err(e) => tracing::warn!(entry = candidate, error = %e, "Dropping queued entry"),
            }
        }
    }
    urls
}

/// Whether a failed submission should stay queued.
fn is_retryable(err: &SourceError) -> bool {
    matches!(err, SourceError::Delivery(_) | SourceError::Io(_))
}

/// Destination for queued replay URLs.
#[async_trait]
pub trait ReplaySink: Send + Sync {
    /// Import one replay.
    ///
    /// `Delivery` and `Io` errors keep the URL queued; any other error drops it.
    async fn submit(&self, url: &str) -> Result<(), SourceError>;
}

/// Posts each URL to a running recorder's `/api/ingest_replay`.
#[derive(Debug, Clone)]
pub struct HttpReplaySink {
    client: Client,
    url: String,
}

impl HttpReplaySink {
    /// Create a sink posting to `url`.
    ///
    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be built.
    pub fn new(url: impl Into<String>) -> Result<Self, SourceError> {
        let client = Client::builder()
            .timeout(SUBMIT_TIMEOUT)
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
impl ReplaySink for HttpReplaySink {
    async fn submit(&self, url: &str) -> Result<(), SourceError> {
        let response = self
            .client
            .post(&self.url)
            .json(&serde_json::json!({ "url": url }))
            .send()
            .await
            .map_err(|e| SourceError::Delivery(e.to_string()))?;

        // Any answer from the recorder is final for this URL
        let status = response.status();
        if status.is_success() {
            Ok(())
        } else {
            Err(SourceError::Fetch {
                url: url.to_string(),
                reason: format!("recorder answered {status}"),
            })
        }
    }
}

/// Imports each URL into an in-process recorder.
#[derive(Clone)]
pub struct RecorderReplaySink {
    recorder: Arc<Recorder>,
    client: ReplayClient,
}

impl RecorderReplaySink {
    #[must_use]
    pub fn new(recorder: Arc<Recorder>, client: ReplayClient) -> Self {
        Self { recorder, client }
    }
}

#[async_trait]
impl ReplaySink for RecorderReplaySink {
    async fn submit(&self, url: &str) -> Result<(), SourceError> {
        match self.recorder.import_replay(&self.client, url).await {
            Ok(_) => Ok(()),
            Err(IngestError::Source(e)) => Err(e),
            Err(IngestError::Store(e)) => Err(SourceError::Delivery(e.to_string())),
        }
    }
}

/// Outcome of one queue poll.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct QueueReport {
    pub imported: usize,
    pub dropped: usize,
    /// URLs left in the file for the next poll.
    pub kept: usize,
}

/// Polls a replay queue file and submits its URLs.
pub struct ReplayQueue<S> {
    path: PathBuf,
    sink: S,
    interval: Duration,
    cancel: CancellationToken,
}

impl<S: ReplaySink> ReplayQueue<S> {
    #[must_use]
    pub fn new(path: impl Into<PathBuf>, sink: S) -> Self {
        Self {
            path: path.into(),
            sink,
            interval: DEFAULT_QUEUE_INTERVAL,
            cancel: CancellationToken::new(),
        }
    }

    /// Set the delay between polls (builder pattern).
    #[must_use]
    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    /// Use an external stop signal (builder pattern).
    #[must_use]
    pub fn with_cancel(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Submit everything queued and rewrite the file.
    ///
    /// After the first retryable failure the remaining URLs are kept without
    /// being attempted. A missing or blank file is a no-op.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or rewritten.
    pub async fn poll_once(&self) -> Result<QueueReport, SourceError> {
        let text = match tokio::fs::read(&self.path).await {
            Ok(bytes) => String::from_utf8_lossy(&bytes).into_owned(),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Ok(QueueReport::default());
            }
            Err(e) if e.kind() == std::io::ErrorKind::PermissionDenied => {
                return Err(SourceError::PermissionDenied(self.path.clone()));
            }
            Err(e) => return Err(e.into()),
        };
        if text.trim().is_empty() {
            return Ok(QueueReport::default());
        }

        let urls = extract_replay_urls(&text);
        let mut report = QueueReport::default();
        let mut kept = Vec::new();
        let mut halted = false;

        for url in urls {
            if halted {
                kept.push(url);
                continue;
            }
            match self.sink.submit(&url).await {
                Ok(()) => {
                    tracing::info!(url = %url, "Queued replay imported");
                    report.imported += 1;
                }
                Err(e) if is_retryable(&e) => {
                    tracing::warn!(url = %url, error = %e, "Replay submission failed, keeping queued");
                    kept.push(url);
                    halted = true;
                }
                Err(e) => {
                    tracing::warn!(url = %url, error = %e, "Dropping queued replay");
                    report.dropped += 1;
                }
            }
        }
        report.kept = kept.len();

        self.rewrite(&text, &kept).await?;
        Ok(report)
    }

    async fn rewrite(&self, consumed: &str, kept: &[String]) -> Result<(), SourceError> {
        let current = match tokio::fs::read(&self.path).await {
            Ok(bytes) => String::from_utf8_lossy(&bytes).into_owned(),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => String::new(),
            Err(e) => return Err(e.into()),
        };
        let appended = current.strip_prefix(consumed).unwrap_or(&current);

        let mut next = String::new();
        for url in kept {
            next.push_str(url);
            next.push('\n');
        }
        next.push_str(appended);
        tokio::fs::write(&self.path, next).await?;
        Ok(())
    }

    /// Poll until cancelled.
    pub async fn run(self) {
        tracing::info!(path = %self.path.display(), "Watching replay queue");

        while !self.cancel.is_cancelled() {
            match self.poll_once().await {
                Ok(report) if report != QueueReport::default() => {
                    tracing::debug!(
                        imported = report.imported,
                        dropped = report.dropped,
                        kept = report.kept,
                        "Replay queue polled"
                    );
                }
                Ok(_) => {}
                Err(e) => tracing::warn!(error = %e, "Failed to process replay queue"),
            }
            tokio::select! {
                () = self.cancel.cancelled() => break,
                () = tokio::time::sleep(self.interval) => {}
            }
        }

        tracing::info!("Replay queue stopped");
    }
}
