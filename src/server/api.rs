//! Request and response types for the HTTP endpoints.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::ingest::{IngestReport, OpenStream};
use crate::source::WatcherStatus;
use crate::store::{EventKind, EventQuery, Owner, Side, StoreStats};

/// Maximum allowed limit for pagination.
pub const MAX_PAGE_LIMIT: usize = 1000;

const fn default_limit() -> usize {
    100
}

const fn default_close() -> bool {
    true
}

/// Body for POST /api/ingest.
#[derive(Debug, Clone, Deserialize)]
pub struct IngestRequest {
    /// Multi-line log text.
    pub log: String,
    /// Stream to append to. A fresh stream is used when absent.
    #[serde(default)]
    pub stream: Option<String>,
    /// Close the stream's match after the last line.
    #[serde(default = "default_close")]
    pub close: bool,
}

/// Body for POST /api/ingest_line.
#[derive(Debug, Clone, Deserialize)]
pub struct IngestLineRequest {
    pub line: String,
}

/// Body for POST /api/ingest_replay.
#[derive(Debug, Clone, Deserialize)]
pub struct ReplayRequest {
    pub url: String,
}

/// Body for POST /api/matches/:id/nicknames.
///
/// Both lists are comma separated; an empty string clears that side.
#[derive(Debug, Clone, Deserialize)]
pub struct NicknamesRequest {
    pub mine: String,
    pub opponent: String,
    #[serde(default)]
    pub my_side: Option<Side>,
}

/// Response for every ingestion endpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IngestResponse {
    /// `ok`, or `ignored` for a blank pushed line.
    pub status: String,
    #[serde(flatten, skip_serializing_if = "Option::is_none")]
    pub report: Option<IngestReport>,
}

impl IngestResponse {
    #[must_use]
    pub fn ok(report: IngestReport) -> Self {
        Self {
            status: "ok".to_string(),
            report: Some(report),
        }
    }

    #[must_use]
    pub fn ignored() -> Self {
        Self {
            status: "ignored".to_string(),
            report: None,
        }
    }
}

/// Response for POST /api/matches/:id/close.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CloseResponse {
    pub match_id: Uuid,
    /// False when the match was already closed.
    pub closed: bool,
}

/// Query parameters for GET /api/matches.
#[derive(Debug, Clone, Deserialize)]
pub struct ListQuery {
    #[serde(default = "default_limit")]
    pub limit: usize,
}

impl ListQuery {
    #[must_use]
    pub fn effective_limit(&self) -> usize {
        self.limit.min(MAX_PAGE_LIMIT)
    }
}

impl Default for ListQuery {
    fn default() -> Self {
        Self {
            limit: default_limit(),
        }
    }
}

/// Query parameters for GET /api/matches/:id/lines.
#[derive(Debug, Clone, Deserialize)]
pub struct PageQuery {
    #[serde(default = "default_limit")]
    pub limit: usize,
    #[serde(default)]
    pub offset: usize,
}

impl PageQuery {
    /// Get the effective limit, capped at `MAX_PAGE_LIMIT`.
    #[must_use]
    pub fn effective_limit(&self) -> usize {
        self.limit.min(MAX_PAGE_LIMIT)
    }
}

impl Default for PageQuery {
    fn default() -> Self {
        Self {
            limit: default_limit(),
            offset: 0,
        }
    }
}

/// Query parameters for GET /api/matches/:id/events.
#[derive(Debug, Clone, Deserialize)]
pub struct EventsQuery {
    #[serde(default)]
    pub kind: Option<String>,
    #[serde(default)]
    pub owner: Option<String>,
    #[serde(default = "default_limit")]
    pub limit: usize,
    #[serde(default)]
    pub offset: usize,
}

impl Default for EventsQuery {
    fn default() -> Self {
        Self {
            kind: None,
            owner: None,
            limit: default_limit(),
            offset: 0,
        }
    }
}

impl EventsQuery {
    /// Parse the filters into a store query.
    ///
    /// # Errors
    ///
    /// Returns a message naming the first filter that does not parse.
    pub fn to_store_query(&self) -> Result<EventQuery, String> {
        let kind = self
            .kind
            .as_deref()
            .filter(|k| !k.trim().is_empty())
            .map(str::parse::<EventKind>)
            .transpose()?;
        let owner = self
            .owner
            .as_deref()
            .filter(|o| !o.trim().is_empty())
            .map(str::parse::<Owner>)
            .transpose()?;
        Ok(EventQuery {
            kind,
            owner,
            limit: self.limit.min(MAX_PAGE_LIMIT),
            offset: self.offset,
        })
    }
}

/// Query parameters for GET /api/damage and GET /api/damage/names.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct DamageQuery {
    #[serde(default)]
    pub attacker: Option<String>,
    #[serde(default)]
    pub defender: Option<String>,
    /// Restrict the lookup to one match.
    #[serde(default, rename = "match")]
    pub match_id: Option<Uuid>,
}

impl DamageQuery {
    /// Attacker and defender names, both required and non-blank.
    ///
    /// # Errors
    ///
    /// Returns a message naming the first missing participant.
    pub fn participants(&self) -> Result<(&str, &str), String> {
        let attacker = non_blank(self.attacker.as_deref()).ok_or("attacker is required")?;
        let defender = non_blank(self.defender.as_deref()).ok_or("defender is required")?;
        Ok((attacker, defender))
    }
}

fn non_blank(value: Option<&str>) -> Option<&str> {
    value.map(str::trim).filter(|v| !v.is_empty())
}

/// Response for GET /api/damage/names.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DamageNamesResponse {
    pub names: Vec<String>,
}

/// Response for GET /api/status.
#[derive(Debug, Clone, Serialize)]
pub struct StatusResponse {
    /// Streams with an open match.
    pub open_streams: Vec<OpenStream>,
    /// Whether any client is connected to the feed.
    pub feed_connected: bool,
    /// State of the in-process watcher, if one runs.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub watcher: Option<WatcherStatus>,
    #[serde(flatten)]
    pub stats: StoreStats,
}
