//! Per-match combat context.
//!
//! Damage lines rarely say who dealt the damage, and replay protocol lines
//! only report the defender's remaining HP. [`CombatState`] remembers the
//! last move used and each slot's last known HP so that damage events can
//! be attributed and protocol HP drops turned into percentages.

use std::collections::HashMap;
use std::sync::LazyLock;

use regex::Regex;

use super::classifier::{clean_subject, Classified};
use crate::store::{DamageRange, EventKind};

static MOVE_USED: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)^(?P<actor>.+?) used (?P<move>.+?)!$").expect("move used regex is valid")
});

static HP_PERCENT: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?P<pct>\d+(?:\.\d+)?)%").expect("hp percent regex is valid")
});

static HP_RATIO: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?P<hp>\d+(?:\.\d+)?)\s*/\s*(?P<max>\d+(?:\.\d+)?)")
        .expect("hp ratio regex is valid")
});

/// Parse a protocol HP field (`63/100`, `63/100 par`, `48%`, `0 fnt`) as a percentage.
#[must_use]
pub fn parse_hp(text: &str) -> Option<f64> {
    let text = text.trim();
    if let Some(caps) = HP_PERCENT.captures(text) {
        return caps["pct"].parse().ok();
    }
    if let Some(caps) = HP_RATIO.captures(text) {
        let hp: f64 = caps["hp"].parse().ok()?;
        let max: f64 = caps["max"].parse().ok()?;
        return (max > 0.0).then(|| hp / max * 100.0);
    }
    (text.split_whitespace().next() == Some("0")).then_some(0.0)
}

/// Round to one decimal place.
fn round_pct(value: f64) -> f64 {
    (value * 10.0).round() / 10.0
}

/// Name part of a protocol slot reference (`p2a: Gengar` -> `Gengar`).
fn slot_name(value: &str) -> Option<String> {
    clean_subject(value)
}

/// Value of a `[tag] value` field in a protocol line.
fn tagged<'a>(fields: &[&'a str], tag: &str) -> Option<&'a str> {
    fields
        .iter()
        .find_map(|field| field.trim().strip_prefix(tag))
        .map(str::trim)
}

/// Move name from a `[from]` effect (`item: Life Orb` -> `Life Orb`).
fn effect_name(effect: &str) -> String {
    effect
        .split_once(": ")
        .map_or(effect, |(_, name)| name)
        .trim()
        .to_string()
}

/// Last move used and HP per protocol slot within one match.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CombatState {
    last_actor: Option<String>,
    last_move: Option<String>,
    hp: HashMap<String, f64>,
}

impl CombatState {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn last_actor(&self) -> Option<&str> {
        self.last_actor.as_deref()
    }

    #[must_use]
    pub fn last_move(&self) -> Option<&str> {
        self.last_move.as_deref()
    }

    /// Last known HP percentage of a protocol slot (`p2a: Gengar`).
    #[must_use]
    pub fn hp(&self, slot: &str) -> Option<f64> {
        self.hp.get(slot.trim()).copied()
    }

    /// Fold one line into the state without producing an event.
    pub fn track(&mut self, line: &str) {
        let mut ignored = Classified::raw();
        self.apply(line, &mut ignored);
    }

    /// Fold one line into the state and complete its classification.
    ///
    /// Damage events without a stated source get the last move and its user.
    /// A protocol `-damage` line gets the HP lost since the slot's previous
    /// report; the value stays empty when no previous report exists.
    pub fn apply(&mut self, line: &str, classified: &mut Classified) {
        if line.starts_with('|') {
            self.apply_protocol(line, classified);
        } else {
            self.apply_chat(line, classified);
        }
    }

    fn apply_chat(&mut self, line: &str, classified: &mut Classified) {
        if classified.kind != EventKind::Item {
            if let Some(caps) = MOVE_USED.captures(line) {
                let name = caps["move"].trim();
                // "X used its Sitrus Berry!" is an item, not a move
                if !name.to_ascii_lowercase().starts_with("its ") {
                    self.last_actor = clean_subject(&caps["actor"]);
                    self.last_move = Some(name.to_string());
                }
            }
        }
        self.attribute(classified);
    }

    fn apply_protocol(&mut self, line: &str, classified: &mut Classified) {
        let fields: Vec<&str> = line.split('|').collect();
        let Some(tag) = fields.get(1).copied() else {
            return;
        };

        match (tag, fields.get(2), fields.get(3), fields.get(4)) {
            ("move", Some(actor), Some(name), _) => {
                self.last_actor = slot_name(actor);
                self.last_move = Some(name.trim().to_string()).filter(|m| !m.is_empty());
            }
            ("switch" | "drag" | "replace", Some(slot), _, Some(hp)) => {
                if let Some(pct) = parse_hp(hp) {
                    self.hp.insert(slot.trim().to_string(), pct);
                }
            }
            ("-heal" | "-sethp", Some(slot), Some(hp), _) => {
                if let Some(pct) = parse_hp(hp) {
                    self.hp.insert(slot.trim().to_string(), pct);
                }
            }
            ("-damage", Some(slot), Some(hp), _) => {
                let Some(current) = parse_hp(hp) else {
                    return;
                };
                let previous = self.hp.insert(slot.trim().to_string(), current);
                if classified.kind != EventKind::Damage {
                    return;
                }

                if let Some(previous) = previous {
                    let lost = round_pct((previous - current).max(0.0));
                    let range = DamageRange {
                        low: lost,
                        high: None,
                    };
                    classified.value = Some(range.to_string());
                    classified.damage = Some(range);
                }

                let rest = &fields[4..];
                if let Some(effect) = tagged(rest, "[from]") {
                    classified.move_name = Some(effect_name(effect));
                    classified.attacker = tagged(rest, "[of]").and_then(slot_name);
                } else {
                    self.attribute(classified);
                }
            }
            _ => {}
        }
    }

    fn attribute(&self, classified: &mut Classified) {
        if classified.kind != EventKind::Damage
            || classified.attacker.is_some()
            || classified.move_name.is_some()
        {
            return;
        }
        classified.attacker.clone_from(&self.last_actor);
        classified.move_name.clone_from(&self.last_move);
    }
}
