//! Line source error types.

use std::path::PathBuf;

/// Errors raised while reading or delivering lines.
#[derive(thiserror::Error, Debug)]
pub enum SourceError {
    /// Watched path does not exist (yet).
    #[error("Source unavailable: {0}")]
    Unavailable(PathBuf),

    /// Permission denied reading the watched path.
    #[error("Permission denied: {0}")]
    PermissionDenied(PathBuf),

    /// I/O error while reading a source.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Replay URL could not be parsed.
    #[error("Invalid replay URL: {0}")]
    InvalidUrl(String),

    /// Remote transcript could not be fetched or decoded.
    #[error("Failed to fetch {url}: {reason}")]
    Fetch { url: String, reason: String },

    /// Lines could not be handed to the ingestion endpoint.
    #[error("Delivery failed: {0}")]
    Delivery(String),
}

impl SourceError {
    /// Whether the error is a network failure surfaced to the caller.
    #[must_use]
    pub fn is_network(&self) -> bool {
        matches!(self, Self::Fetch { .. } | Self::Delivery(_))
    }
}
