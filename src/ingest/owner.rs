//! Attribution of event subjects to a participant.
//!
//! [`resolve`] is a pure function of its inputs. The owner stored with an
//! event is only a cached result of calling it with the roster current at
//! the time; it is recomputed whenever the roster changes.

use std::sync::LazyLock;

use regex::Regex;

use crate::store::{NicknameSet, Owner, Roster, Side};

static OPPOSING_KEYWORD: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)\b(?:opposing|foe)\b").expect("keyword regex is valid"));

static SIDE_TOKEN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\b(?P<side>p[12])[a-d]?:").expect("side token regex is valid"));

static SLOT_REFERENCE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\b(?P<side>p[12])[a-d]?: ?(?P<name>[^|]+)").expect("slot reference regex is valid")
});

/// Protocol side named by the first slot token (`p1a:`, `p2b:`) in a line.
#[must_use]
pub fn side_token(raw_line: &str) -> Option<Side> {
    SIDE_TOKEN
        .captures(raw_line)
        .and_then(|caps| caps["side"].parse().ok())
}

/// Whether a line names the opposing side by keyword.
#[must_use]
pub fn has_opposing_keyword(raw_line: &str) -> bool {
    OPPOSING_KEYWORD.is_match(raw_line)
}

/// Guess the local side from protocol lines.
///
/// Every slot reference (`p1a: Name`) whose name is in `mine` votes for its
/// side. Returns `None` when nothing votes or the vote is tied.
#[must_use]
pub fn infer_side<'a, I>(lines: I, mine: &NicknameSet) -> Option<Side>
where
    I: IntoIterator<Item = &'a str>,
{
    if mine.is_empty() {
        return None;
    }

    let (mut p1, mut p2) = (0_usize, 0_usize);
    for line in lines {
        for caps in SLOT_REFERENCE.captures_iter(line) {
            if !mine.contains(&caps["name"]) {
                continue;
            }
            match caps["side"].parse() {
                Ok(Side::P1) => p1 += 1,
                Ok(Side::P2) => p2 += 1,
                Err(_) => {}
            }
        }
    }

    match p1.cmp(&p2) {
        std::cmp::Ordering::Greater => Some(Side::P1),
        std::cmp::Ordering::Less => Some(Side::P2),
        std::cmp::Ordering::Equal => None,
    }
}

/// Attribute a subject to Mine, Opponent or Unknown.
///
/// Checked in order: the `mine` set, the `opponent` set, the opposing-side
/// keyword in the raw line, then the protocol side token when the roster
/// knows which side is ours.
#[must_use]
pub fn resolve(subject: Option<&str>, raw_line: &str, roster: &Roster) -> Owner {
    if let Some(subject) = subject {
        if roster.mine.contains(subject) {
            return Owner::Mine;
        }
        if roster.opponent.contains(subject) {
            return Owner::Opponent;
        }
    }

    if has_opposing_keyword(raw_line) {
        return Owner::Opponent;
    }

    if let (Some(my_side), Some(side)) = (roster.my_side, side_token(raw_line)) {
        return if side == my_side {
            Owner::Mine
        } else {
            Owner::Opponent
        };
    }

    Owner::Unknown
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::NicknameSet;

    fn roster(mine: &str, opponent: &str) -> Roster {
        Roster::new(NicknameSet::parse(mine), NicknameSet::parse(opponent))
    }

    #[test]
    fn test_empty_roster_is_unknown() {
        let line = "Foo's Leftovers restored a little HP!";
        assert_eq!(resolve(Some("Foo"), line, &Roster::default()), Owner::Unknown);
    }

    #[test]
    fn test_mine_after_roster_update() {
        let line = "Foo's Leftovers restored a little HP!";
        assert_eq!(resolve(Some("Foo"), line, &roster("foo", "")), Owner::Mine);
        assert_eq!(resolve(Some(" FOO "), line, &roster("Foo", "")), Owner::Mine);
    }

    #[test]
    fn test_opponent_set() {
        let line = "Bar's Life Orb activated!";
        assert_eq!(resolve(Some("Bar"), line, &roster("Foo", "Bar")), Owner::Opponent);
    }

    #[test]
    fn test_mine_wins_over_opposing_keyword() {
        let line = "The opposing Gengar took 37% damage!";
        assert_eq!(resolve(Some("Gengar"), line, &roster("Gengar", "")), Owner::Mine);
    }

    #[test]
    fn test_opposing_keyword() {
        let line = "The opposing Gengar took 37% damage!";
        assert_eq!(resolve(Some("Gengar"), line, &Roster::default()), Owner::Opponent);
        assert_eq!(
            resolve(None, "The foe's Spikes hurt!", &Roster::default()),
            Owner::Opponent
        );
    }

    #[test]
    fn test_keyword_requires_whole_word() {
        // "Foetus" contains "foe" but is not the keyword
        let line = "Foetus's Leftovers restored a little HP!";
        assert_eq!(resolve(Some("Foetus"), line, &Roster::default()), Owner::Unknown);
    }

    #[test]
    fn test_side_token_with_known_side() {
        let roster = Roster::default().with_side(Some(Side::P1));
        assert_eq!(
            resolve(Some("Gengar"), "|-enditem|p1a: Gengar|Sitrus Berry", &roster),
            Owner::Mine
        );
        assert_eq!(
            resolve(Some("Pikachu"), "|-enditem|p2a: Pikachu|Sitrus Berry", &roster),
            Owner::Opponent
        );
        // Without a known side the token is ignored
        assert_eq!(
            resolve(Some("Gengar"), "|-enditem|p1a: Gengar|Sitrus Berry", &Roster::default()),
            Owner::Unknown
        );
    }

    #[test]
    fn test_side_token_parse() {
        assert_eq!(side_token("|-damage|p2b: Gengar|50/100"), Some(Side::P2));
        assert_eq!(side_token("Gengar used Shadow Ball!"), None);
    }

    #[test]
    fn test_infer_side_from_mine_slots() {
        let lines = [
            "|switch|p1a: Eddie bear|Ursaring, L50|100/100",
            "|move|p2a: Gengar|Shadow Ball|p1a: Eddie bear",
            "|move|p1a: Eddie bear|Facade|p2a: Gengar",
            "Turn 2",
        ];
        let mine = NicknameSet::parse("eddie bear");
        assert_eq!(infer_side(lines, &mine), Some(Side::P1));

        let theirs = NicknameSet::parse("Gengar");
        assert_eq!(infer_side(lines, &theirs), Some(Side::P2));
    }

    #[test]
    fn test_infer_side_undecided() {
        let mine = NicknameSet::parse("Foo");
        assert_eq!(infer_side(["Foo used Tackle!"], &mine), None);
        assert_eq!(
            infer_side(["|switch|p1a: Foo|Foo|100/100", "|switch|p2a: Foo|Foo|100/100"], &mine),
            None
        );
        assert_eq!(
            infer_side(["|switch|p1a: Foo|Foo|100/100"], &NicknameSet::new()),
            None
        );
    }

    #[test]
    fn test_resolution_is_idempotent() {
        let roster = roster("Foo", "Bar");
        let lines = [
            (Some("Foo"), "Foo's Leftovers restored a little HP!"),
            (Some("Bar"), "Bar lost 12% of its health!"),
            (Some("Gengar"), "The opposing Gengar took 37% damage!"),
            (None, "Turn 4"),
        ];
        let first: Vec<_> = lines.iter().map(|(s, l)| resolve(*s, l, &roster)).collect();
        let second: Vec<_> = lines.iter().map(|(s, l)| resolve(*s, l, &roster)).collect();
        assert_eq!(first, second);
        assert_eq!(
            first,
            vec![Owner::Mine, Owner::Opponent, Owner::Opponent, Owner::Unknown]
        );
    }
}
