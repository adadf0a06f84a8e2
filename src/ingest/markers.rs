//! Session markers: match boundaries, turns and descriptive metadata.

use std::sync::LazyLock;

use regex::Regex;

use crate::store::MatchMeta;

static BOUNDARY: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)^Battle started between (?P<p1>.+?) and (?P<p2>.+?)!$")
        .expect("boundary regex is valid")
});

static TURN_TEXT: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)^Turn\s+(?P<turn>\d+)").expect("turn regex is valid"));

static TURN_PROTOCOL: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\|turn\|(?P<turn>\d+)").expect("turn protocol regex is valid"));

static FORMAT_TEXT: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)^Format:\s*(?P<format>.+)$").expect("format regex is valid")
});

static FORMAT_PROTOCOL: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\|tier\|(?P<format>[^|]+)").expect("tier regex is valid"));

static PLAYER_PROTOCOL: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^\|player\|(?P<side>p[12])\|(?P<name>[^|]+)").expect("player regex is valid")
});

static WIN_TEXT: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)^(?P<winner>.+?) won the battle!$").expect("win regex is valid")
});

static WIN_PROTOCOL: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\|win\|(?P<winner>[^|]+)").expect("win protocol regex is valid"));

/// Players named by a `Battle started between A and B!` line.
#[must_use]
pub fn parse_boundary(line: &str) -> Option<(String, String)> {
    let caps = BOUNDARY.captures(line)?;
    Some((caps["p1"].trim().to_string(), caps["p2"].trim().to_string()))
}

/// Whether a line starts a new match.
#[must_use]
pub fn is_boundary(line: &str) -> bool {
    BOUNDARY.is_match(line)
}

/// Turn number announced by a `Turn N` or `|turn|N` line.
#[must_use]
pub fn parse_turn(line: &str) -> Option<u32> {
    TURN_TEXT
        .captures(line)
        .or_else(|| TURN_PROTOCOL.captures(line))
        .and_then(|caps| caps["turn"].parse().ok())
}

fn non_empty(value: &str) -> Option<String> {
    let value = value.trim();
    (!value.is_empty()).then(|| value.to_string())
}

/// Metadata fields carried by a single line. Fields the line says nothing
/// about stay `None`.
#[must_use]
pub fn parse_meta(line: &str) -> MatchMeta {
    let mut meta = MatchMeta::default();

    if let Some((p1, p2)) = parse_boundary(line) {
        meta.player1 = Some(p1);
        meta.player2 = Some(p2);
    } else if let Some(caps) = FORMAT_TEXT
        .captures(line)
        .or_else(|| FORMAT_PROTOCOL.captures(line))
    {
        meta.format = non_empty(&caps["format"]);
    } else if let Some(caps) = PLAYER_PROTOCOL.captures(line) {
        let name = non_empty(&caps["name"]);
        if &caps["side"] == "p1" {
            meta.player1 = name;
        } else {
            meta.player2 = name;
        }
    } else if let Some(caps) = WIN_TEXT
        .captures(line)
        .or_else(|| WIN_PROTOCOL.captures(line))
    {
        meta.winner = non_empty(&caps["winner"]);
    }

    meta
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_boundary() {
        assert_eq!(
            parse_boundary("Battle started between Ash and Gary!"),
            Some(("Ash".to_string(), "Gary".to_string()))
        );
        assert!(is_boundary("battle started between a and b!"));
        assert_eq!(parse_boundary("The battle started!"), None);
    }

    #[test]
    fn test_parse_turn() {
        assert_eq!(parse_turn("Turn 12"), Some(12));
        assert_eq!(parse_turn("|turn|3"), Some(3));
        assert_eq!(parse_turn("Turnip used Tackle!"), None);
    }

    #[test]
    fn test_parse_meta_format() {
        assert_eq!(
            parse_meta("Format: [Gen 9] OU").format.as_deref(),
            Some("[Gen 9] OU")
        );
        assert_eq!(
            parse_meta("|tier|[Gen 9] Random Battle").format.as_deref(),
            Some("[Gen 9] Random Battle")
        );
    }

    #[test]
    fn test_parse_meta_players() {
        let meta = parse_meta("Battle started between Ash and Gary!");
        assert_eq!(meta.player1.as_deref(), Some("Ash"));
        assert_eq!(meta.player2.as_deref(), Some("Gary"));

        let meta = parse_meta("|player|p2|Gary|60|1500");
        assert_eq!(meta.player1, None);
        assert_eq!(meta.player2.as_deref(), Some("Gary"));
    }

    #[test]
    fn test_parse_meta_winner() {
        assert_eq!(
            parse_meta("Ash won the battle!").winner.as_deref(),
            Some("Ash")
        );
        assert_eq!(parse_meta("|win|Gary").winner.as_deref(), Some("Gary"));
    }

    #[test]
    fn test_parse_meta_ordinary_line() {
        assert_eq!(parse_meta("Foo used Tackle!"), MatchMeta::default());
    }
}
