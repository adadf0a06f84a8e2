//! Rule-based event classification.
//!
//! A [`Classifier`] holds an ordered list of matcher functions. Each matcher
//! inspects a normalized line and either claims it or passes. The first
//! matcher that claims the line decides the event; a line nobody claims is
//! kept as [`EventKind::Raw`].

use std::sync::LazyLock;

use regex::{Captures, Regex};

use crate::store::{DamageRange, EventKind};

/// Result of classifying a single line.
#[derive(Debug, Clone, PartialEq)]
pub struct Classified {
    pub kind: EventKind,
    pub subject: Option<String>,
    /// Item name or rendered damage.
    pub value: Option<String>,
    pub damage: Option<DamageRange>,
    pub attacker: Option<String>,
    pub move_name: Option<String>,
}

impl Classified {
    /// An unclassified line.
    #[must_use]
    pub fn raw() -> Self {
        Self {
            kind: EventKind::Raw,
            subject: None,
            value: None,
            damage: None,
            attacker: None,
            move_name: None,
        }
    }

    #[must_use]
    pub fn item(subject: Option<String>, item: impl Into<String>) -> Self {
        Self {
            kind: EventKind::Item,
            subject,
            value: Some(item.into()),
            ..Self::raw()
        }
    }

    #[must_use]
    pub fn damage(subject: Option<String>, range: DamageRange) -> Self {
        Self {
            kind: EventKind::Damage,
            subject,
            value: Some(range.to_string()),
            damage: Some(range),
            ..Self::raw()
        }
    }

    /// A damage event whose amount comes from combat context.
    #[must_use]
    pub fn pending_damage(subject: Option<String>) -> Self {
        Self {
            kind: EventKind::Damage,
            subject,
            ..Self::raw()
        }
    }
}

/// Matcher signature: claim a line or pass.
pub type Matcher = fn(&str) -> Option<Classified>;

/// A named matcher in the rule list.
#[derive(Debug, Clone, Copy)]
pub struct Rule {
    pub name: &'static str,
    pub matcher: Matcher,
}

/// Ordered rule list; first match wins.
#[derive(Debug, Clone)]
pub struct Classifier {
    rules: Vec<Rule>,
}

impl Default for Classifier {
    fn default() -> Self {
        Self {
            rules: vec![
                Rule {
                    name: "item",
                    matcher: match_item,
                },
                Rule {
                    name: "damage",
                    matcher: match_damage,
                },
            ],
        }
    }
}

impl Classifier {
    /// Create a classifier with the built-in item and damage rules.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a classifier with no rules; every line is Raw.
    #[must_use]
    pub fn empty() -> Self {
        Self { rules: Vec::new() }
    }

    /// Append a rule after the existing ones.
    pub fn push_rule(&mut self, name: &'static str, matcher: Matcher) {
        self.rules.push(Rule { name, matcher });
    }

    #[must_use]
    pub fn rules(&self) -> &[Rule] {
        &self.rules
    }

    /// Classify a normalized line.
    #[must_use]
    pub fn classify(&self, line: &str) -> Classified {
        for rule in &self.rules {
            if let Some(classified) = (rule.matcher)(line) {
                tracing::trace!(rule = rule.name, line, "Line classified");
                return classified;
            }
        }
        Classified::raw()
    }
}

/// Classify with the built-in rules.
#[must_use]
pub fn classify(line: &str) -> Classified {
    static DEFAULT: LazyLock<Classifier> = LazyLock::new(Classifier::default);
    DEFAULT.classify(line)
}

const ITEM_CHARS: &str = r"[A-Za-z0-9' .-]";
const NUMBER: &str = r"\d+(?:\.\d+)?";

static ITEM_POSSESSIVE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(&format!(
        r"(?i)^(?P<subject>.+?)'s (?P<item>{ITEM_CHARS}+?) (?:restored|activated|was eaten|went|made|triggered|weakened|popped)\b"
    ))
    .expect("item possessive regex is valid")
});

static ITEM_HAD_ITS: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(&format!(
        r"(?i)^(?P<subject>.+?) had its (?P<item>{ITEM_CHARS}+?) (?:restored|activated|used|triggered)\b"
    ))
    .expect("item had-its regex is valid")
});

static ITEM_USED_ITS: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(&format!(
        r"(?i)^(?P<subject>.+?) (?:used|ate|hung on using) its (?P<item>{ITEM_CHARS}+?)[!.]?\)?$"
    ))
    .expect("item used-its regex is valid")
});

static ITEM_PROTOCOL: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^\|-(?:enditem|item)\|(?P<subject>p[12][a-d]?:[^|]+)\|(?P<item>[^|]+)")
        .expect("item protocol regex is valid")
});

static HEAL_FROM_ITEM: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^\|-heal\|(?P<subject>p[12][a-d]?:[^|]+)\|[^|]*\|\[from\] item: (?P<item>[^|]+)")
        .expect("heal protocol regex is valid")
});

static DAMAGE_SUBJECT_FIRST: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(&format!(
        r"(?i)^(?P<subject>.+?) (?:lost|took) (?P<low>{NUMBER})%(?:\s*(?:-|to)\s*(?P<high>{NUMBER})%)?(?P<rest>.*)$"
    ))
    .expect("damage regex is valid")
});

static DAMAGE_VALUE_FIRST: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(&format!(
        r"(?i)^\(?(?P<low>{NUMBER})%(?:\s*(?:-|to)\s*(?P<high>{NUMBER})%)?(?: damage)? (?:to|on|against) (?P<subject>.+?)[!.)]*$"
    ))
    .expect("damage value-first regex is valid")
});

static DAMAGE_PROTOCOL: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^\|-damage\|(?P<subject>p[12][a-d]?:[^|]+)\|")
        .expect("damage protocol regex is valid")
});

static DAMAGE_SOURCE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\bfrom (?P<attacker>.+?)'s (?P<move>[^!.()]+)")
        .expect("damage source regex is valid")
});

static SLOT_PREFIX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^p[12][a-d]?:\s*").expect("slot prefix regex is valid")
});

const SUBJECT_PREFIXES: &[&str] = &["the opposing ", "opposing ", "the foe's ", "foe's "];

/// Strip decoration around a participant reference.
///
/// Removes wrapping parentheses, protocol slots (`p2a: `) and side
/// prefixes (`The opposing `). A bare leading `The` is kept since it can be
/// part of a nickname.
#[must_use]
pub fn clean_subject(value: &str) -> Option<String> {
    let mut cleaned = value.trim().trim_start_matches('(').trim_end_matches(')').trim();
    cleaned = SLOT_PREFIX
        .find(cleaned)
        .map_or(cleaned, |m| &cleaned[m.end()..]);

    for prefix in SUBJECT_PREFIXES {
        if cleaned.len() > prefix.len()
            && cleaned.is_char_boundary(prefix.len())
            && cleaned[..prefix.len()].eq_ignore_ascii_case(prefix)
        {
            cleaned = &cleaned[prefix.len()..];
            break;
        }
    }

    let cleaned = cleaned.trim();
    if cleaned.is_empty() {
        None
    } else {
        Some(cleaned.to_string())
    }
}

fn capture_str<'a>(caps: &'a Captures<'_>, name: &str) -> Option<&'a str> {
    caps.name(name).map(|m| m.as_str().trim())
}

fn item_from(caps: &Captures<'_>) -> Option<Classified> {
    let item = capture_str(caps, "item")?
        .trim_end_matches(['!', '.', ')'])
        .trim();
    if item.is_empty() {
        return None;
    }
    let subject = capture_str(caps, "subject").and_then(clean_subject);
    Some(Classified::item(subject, item))
}

/// Item-use and item-trigger phrases.
#[must_use]
pub fn match_item(line: &str) -> Option<Classified> {
    [
        &*ITEM_PROTOCOL,
        &*HEAL_FROM_ITEM,
        &*ITEM_POSSESSIVE,
        &*ITEM_HAD_ITS,
        &*ITEM_USED_ITS,
    ]
    .into_iter()
    .find_map(|re| re.captures(line).and_then(|caps| item_from(&caps)))
}

fn range_from(caps: &Captures<'_>) -> Option<DamageRange> {
    let low = capture_str(caps, "low")?.parse::<f64>().ok()?;
    let high = match capture_str(caps, "high") {
        Some(high) => Some(high.parse::<f64>().ok()?),
        None => None,
    };
    Some(DamageRange { low, high })
}

/// A percentage or percentage range attached to a subject, or a protocol
/// HP report whose amount is derived later.
#[must_use]
pub fn match_damage(line: &str) -> Option<Classified> {
    if let Some(caps) = DAMAGE_PROTOCOL.captures(line) {
        let subject = capture_str(&caps, "subject").and_then(clean_subject);
        return Some(Classified::pending_damage(subject));
    }

    if let Some(caps) = DAMAGE_SUBJECT_FIRST.captures(line) {
        let range = range_from(&caps)?;
        let subject = capture_str(&caps, "subject").and_then(clean_subject);
        let mut classified = Classified::damage(subject, range);

        let source = capture_str(&caps, "rest").and_then(|rest| DAMAGE_SOURCE.captures(rest));
        if let Some(source) = source {
            classified.attacker = capture_str(&source, "attacker").and_then(clean_subject);
            classified.move_name = capture_str(&source, "move").map(str::to_string);
        }
        return Some(classified);
    }

    let caps = DAMAGE_VALUE_FIRST.captures(line)?;
    let range = range_from(&caps)?;
    let subject = capture_str(&caps, "subject").and_then(clean_subject);
    Some(Classified::damage(subject, range))
}
