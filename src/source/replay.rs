//! Replay transcript fetching.

use std::time::Duration;

use reqwest::Client;
use serde::Deserialize;
use url::Url;

use super::error::SourceError;

/// Overall timeout for a replay download.
const FETCH_TIMEOUT: Duration = Duration::from_secs(8);

/// Turn a replay page URL into its JSON document URL.
///
/// `https://host/id` and `https://host/id/` become `https://host/id.json`;
/// a URL already ending in `.json` is kept.
///
/// # Errors
///
/// Returns `InvalidUrl` for blank input or anything that is not an
/// absolute http(s) URL.
pub fn normalize_replay_url(value: &str) -> Result<String, SourceError> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return Err(SourceError::InvalidUrl("empty url".to_string()));
    }

    let parsed = Url::parse(trimmed).map_err(|e| SourceError::InvalidUrl(format!("{trimmed}: {e}")))?;
    if !matches!(parsed.scheme(), "http" | "https") {
        return Err(SourceError::InvalidUrl(trimmed.to_string()));
    }

    if trimmed.ends_with(".json") {
        return Ok(trimmed.to_string());
    }
    Ok(format!("{}.json", trimmed.trim_end_matches('/')))
}

/// Replay page URL for a JSON document URL (drops `.json`).
#[must_use]
pub fn strip_replay_json(value: &str) -> String {
    let trimmed = value.trim();
    trimmed.strip_suffix(".json").unwrap_or(trimmed).to_string()
}

#[derive(Debug, Deserialize)]
struct ReplayDocument {
    #[serde(default)]
    log: String,
}

/// A fetched replay transcript.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Replay {
    /// Page URL without `.json`.
    pub url: String,
    /// Raw protocol log.
    pub log: String,
}

/// HTTP client for replay documents. Failures are returned, never retried.
#[derive(Debug, Clone)]
pub struct ReplayClient {
    client: Client,
}

impl ReplayClient {
    /// Create a client with the default timeout.
    ///
    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be built.
    pub fn new() -> Result<Self, SourceError> {
        let client = Client::builder()
            .timeout(FETCH_TIMEOUT)
            .build()
            .map_err(|e| SourceError::Fetch {
                url: String::new(),
                reason: e.to_string(),
            })?;
        Ok(Self { client })
    }

    /// Fetch a replay and return its log.
    ///
    /// # Errors
    ///
    /// Returns `InvalidUrl` for a bad URL, or `Fetch` when the request fails,
    /// the server answers with an error status, or the body is not a replay
    /// document.
    pub async fn fetch(&self, url: &str) -> Result<Replay, SourceError> {
        let document_url = normalize_replay_url(url)?;
        let fetch_error = |reason: String| SourceError::Fetch {
            url: document_url.clone(),
            reason,
        };

        tracing::debug!(url = %document_url, "Fetching replay");

        let response = self
            .client
            .get(&document_url)
            .send()
            .await
            .and_then(reqwest::Response::error_for_status)
            .map_err(|e| fetch_error(e.to_string()))?;

        let document: ReplayDocument = response
            .json()
            .await
            .map_err(|e| fetch_error(e.to_string()))?;

        Ok(Replay {
            url: strip_replay_json(&document_url),
            log: document.log,
        })
    }
}
