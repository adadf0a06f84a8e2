//! Persisted record types for matches, log lines and events.

use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Delivery mechanism a line arrived through.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceTag {
    /// Tailed log file on disk.
    File,
    /// Single line pushed by a browser-side observer.
    Push,
    /// Pasted or uploaded log block.
    Bulk,
    /// Fetched replay transcript.
    Replay,
}

impl SourceTag {
    /// Returns the string representation for database storage.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::File => "file",
            Self::Push => "push",
            Self::Bulk => "bulk",
            Self::Replay => "replay",
        }
    }

    /// Parse the database representation. Unknown values fall back to `Bulk`.
    #[must_use]
    pub fn from_db(value: &str) -> Self {
        match value {
            "file" => Self::File,
            "push" => Self::Push,
            "replay" => Self::Replay,
            _ => Self::Bulk,
        }
    }
}

/// Lifecycle state of a match.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MatchStatus {
    /// Accepting new lines.
    Open,
    /// No further lines accepted.
    Closed,
}

impl MatchStatus {
    /// Returns the string representation for database storage.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Open => "open",
            Self::Closed => "closed",
        }
    }

    #[must_use]
    pub fn from_db(value: &str) -> Self {
        if value == "open" {
            Self::Open
        } else {
            Self::Closed
        }
    }
}

/// Kind of a classified event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    /// Item use or trigger.
    Item,
    /// Damage measurement.
    Damage,
    /// Unclassified line, kept verbatim.
    Raw,
}

impl EventKind {
    /// Returns the string representation for database storage.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Item => "item",
            Self::Damage => "damage",
            Self::Raw => "raw",
        }
    }
}

impl FromStr for EventKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "item" => Ok(Self::Item),
            "damage" => Ok(Self::Damage),
            "raw" => Ok(Self::Raw),
            other => Err(format!("unknown event kind: {other}")),
        }
    }
}

/// Attribution of an event's subject to a participant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Owner {
    /// The local participant.
    Mine,
    /// The remote participant.
    Opponent,
    /// Could not be determined.
    Unknown,
}

impl Owner {
    /// Returns the string representation for database storage.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Mine => "mine",
            Self::Opponent => "opponent",
            Self::Unknown => "unknown",
        }
    }
}

impl FromStr for Owner {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "mine" => Ok(Self::Mine),
            "opponent" => Ok(Self::Opponent),
            "unknown" => Ok(Self::Unknown),
            other => Err(format!("unknown owner: {other}")),
        }
    }
}

/// Player slot in replay protocol lines (`p1a: Name`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Side {
    P1,
    P2,
}

impl Side {
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::P1 => "p1",
            Self::P2 => "p2",
        }
    }
}

impl FromStr for Side {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "p1" => Ok(Self::P1),
            "p2" => Ok(Self::P2),
            other => Err(format!("unknown side: {other}")),
        }
    }
}

/// Normalize a nickname for comparison: lowercase, whitespace collapsed, trimmed.
#[must_use]
pub fn normalize_nickname(name: &str) -> String {
    name.split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase()
}

/// A set of case-insensitive, trimmed nicknames.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct NicknameSet(BTreeSet<String>);

impl NicknameSet {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse a comma- or newline-separated list. Empty entries are dropped.
    #[must_use]
    pub fn parse(text: &str) -> Self {
        text.split([',', '\n', '\r']).collect()
    }

    /// Add a nickname. Returns false when it normalizes to nothing or is present.
    pub fn insert(&mut self, name: &str) -> bool {
        let normalized = normalize_nickname(name);
        if normalized.is_empty() {
            return false;
        }
        self.0.insert(normalized)
    }

    #[must_use]
    pub fn contains(&self, name: &str) -> bool {
        self.0.contains(&normalize_nickname(name))
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.0.iter().map(String::as_str)
    }
}

impl<'a> FromIterator<&'a str> for NicknameSet {
    fn from_iter<I: IntoIterator<Item = &'a str>>(iter: I) -> Self {
        let mut set = Self::new();
        for name in iter {
            set.insert(name);
        }
        set
    }
}

/// Participant identification for one match.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Roster {
    /// Nicknames belonging to the local participant.
    pub mine: NicknameSet,
    /// Nicknames belonging to the remote participant.
    pub opponent: NicknameSet,
    /// Protocol slot of the local participant, if known.
    pub my_side: Option<Side>,
}

impl Roster {
    #[must_use]
    pub fn new(mine: NicknameSet, opponent: NicknameSet) -> Self {
        Self {
            mine,
            opponent,
            my_side: None,
        }
    }

    #[must_use]
    pub fn with_side(mut self, side: Option<Side>) -> Self {
        self.my_side = side;
        self
    }
}

/// Outcome of a match from the local participant's view.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MatchResult {
    Won,
    Lost,
}

impl MatchResult {
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Won => "Won",
            Self::Lost => "Lost",
        }
    }

    #[must_use]
    pub fn from_db(value: &str) -> Option<Self> {
        match value {
            "Won" => Some(Self::Won),
            "Lost" => Some(Self::Lost),
            _ => None,
        }
    }
}

/// Descriptive metadata extracted from a match's lines.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MatchMeta {
    pub format: Option<String>,
    pub player1: Option<String>,
    pub player2: Option<String>,
    pub winner: Option<String>,
}

impl MatchMeta {
    /// Overlay fields that are set in `other`.
    pub fn merge(&mut self, other: &MatchMeta) {
        if other.format.is_some() {
            self.format.clone_from(&other.format);
        }
        if other.player1.is_some() {
            self.player1.clone_from(&other.player1);
        }
        if other.player2.is_some() {
            self.player2.clone_from(&other.player2);
        }
        if other.winner.is_some() {
            self.winner.clone_from(&other.winner);
        }
    }

    /// Won when the winner is player 1, Lost when it is player 2.
    #[must_use]
    pub fn result(&self) -> Option<MatchResult> {
        let winner = normalize_nickname(self.winner.as_deref()?);
        let player1 = normalize_nickname(self.player1.as_deref()?);
        if winner == player1 {
            return Some(MatchResult::Won);
        }
        match self.player2.as_deref() {
            Some(player2) if normalize_nickname(player2) == winner => Some(MatchResult::Lost),
            _ => None,
        }
    }
}

/// One logical game session.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Match {
    pub id: Uuid,
    /// Logical stream this match was segmented from.
    pub stream: String,
    /// Source of the line that opened the match.
    pub source: SourceTag,
    pub status: MatchStatus,
    pub started_at: DateTime<Utc>,
    pub ended_at: Option<DateTime<Utc>>,
    pub meta: MatchMeta,
    pub result: Option<MatchResult>,
    pub replay_url: Option<String>,
    pub roster: Roster,
}

impl Match {
    /// Create a new open match on a stream.
    pub fn open(stream: impl Into<String>, source: SourceTag) -> Self {
        Self {
            id: Uuid::new_v4(),
            stream: stream.into(),
            source,
            status: MatchStatus::Open,
            started_at: Utc::now(),
            ended_at: None,
            meta: MatchMeta::default(),
            result: None,
            replay_url: None,
            roster: Roster::default(),
        }
    }
}

/// One immutable normalized line of a match.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogLine {
    pub match_id: Uuid,
    /// 1-based, gapless within the match.
    pub seq: u64,
    pub text: String,
    pub source: SourceTag,
    pub received_at: DateTime<Utc>,
    /// Last turn number seen at or before this line.
    pub turn: Option<u32>,
}

/// Damage magnitude as a single percentage or a range.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct DamageRange {
    pub low: f64,
    pub high: Option<f64>,
}

impl fmt::Display for DamageRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.high {
            Some(high) => write!(f, "{}% to {}%", self.low, high),
            None => write!(f, "{}%", self.low),
        }
    }
}

/// Structured fact derived from exactly one log line.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    pub match_id: Uuid,
    /// Sequence number of the source line.
    pub seq: u64,
    pub kind: EventKind,
    pub subject: Option<String>,
    /// Item name or rendered damage (`37%`, `10% to 20%`).
    pub value: Option<String>,
    pub damage: Option<DamageRange>,
    pub attacker: Option<String>,
    pub move_name: Option<String>,
    pub owner: Owner,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_nickname_set_parse_commas_and_newlines() {
        let set = NicknameSet::parse("Foo, Bar\n  baz  \n\n,");
        assert_eq!(set.len(), 3);
        assert!(set.contains("foo"));
        assert!(set.contains("BAR"));
        assert!(set.contains(" Baz"));
    }

    #[test]
    fn test_nickname_set_collapses_whitespace() {
        let set = NicknameSet::parse("Eddie   bear");
        assert!(set.contains("eddie bear"));
    }

    #[test]
    fn test_empty_nickname_set() {
        let set = NicknameSet::parse(" , \n");
        assert!(set.is_empty());
    }

    #[test]
    fn test_match_result_from_meta() {
        let meta = MatchMeta {
            format: None,
            player1: Some("Ash".to_string()),
            player2: Some("Gary".to_string()),
            winner: Some("ash".to_string()),
        };
        assert_eq!(meta.result(), Some(MatchResult::Won));

        let meta = MatchMeta {
            winner: Some("Gary".to_string()),
            ..meta
        };
        assert_eq!(meta.result(), Some(MatchResult::Lost));
    }

    #[test]
    fn test_match_result_unknown_winner() {
        let meta = MatchMeta {
            format: None,
            player1: Some("Ash".to_string()),
            player2: None,
            winner: Some("Brock".to_string()),
        };
        assert_eq!(meta.result(), None);
    }

    #[test]
    fn test_meta_merge_keeps_existing() {
        let mut meta = MatchMeta {
            format: Some("gen9ou".to_string()),
            ..MatchMeta::default()
        };
        meta.merge(&MatchMeta {
            winner: Some("Ash".to_string()),
            ..MatchMeta::default()
        });
        assert_eq!(meta.format.as_deref(), Some("gen9ou"));
        assert_eq!(meta.winner.as_deref(), Some("Ash"));
    }

    #[test]
    fn test_damage_range_display() {
        let single = DamageRange {
            low: 37.0,
            high: None,
        };
        assert_eq!(single.to_string(), "37%");

        let range = DamageRange {
            low: 10.5,
            high: Some(20.0),
        };
        assert_eq!(range.to_string(), "10.5% to 20%");
    }

    #[test]
    fn test_enum_round_trip_strings() {
        assert_eq!("item".parse::<EventKind>().unwrap(), EventKind::Item);
        assert_eq!("Opponent".parse::<Owner>().unwrap(), Owner::Opponent);
        assert_eq!("p2".parse::<Side>().unwrap(), Side::P2);
        assert!("p3".parse::<Side>().is_err());
        assert_eq!(SourceTag::from_db("replay"), SourceTag::Replay);
        assert_eq!(MatchStatus::from_db("open"), MatchStatus::Open);
    }
}
