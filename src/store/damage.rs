//! Attacker-versus-defender damage lookups.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// One attributed damage event as read from the store.
#[derive(Debug, Clone, PartialEq)]
pub struct DamageSample {
    pub attacker: String,
    pub defender: String,
    pub move_name: Option<String>,
    pub low: f64,
    pub high: f64,
    pub replay_url: Option<String>,
}

/// Damage figures for one move between a fixed attacker and defender.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MoveDamage {
    /// Move name, `-` when unknown.
    pub move_name: String,
    pub min_low: f64,
    pub max_high: f64,
    pub count: u64,
    /// A replay where this was observed, if any.
    pub replay_url: Option<String>,
}

/// Totals over every move of one direction.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DamageSummary {
    pub count: u64,
    pub min_low: Option<f64>,
    pub max_high: Option<f64>,
}

/// Damage dealt by `attacker` to `defender` and back, grouped by move.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DamageBreakdown {
    pub attacker: String,
    pub defender: String,
    /// Restricts the lookup to one match when set.
    pub match_id: Option<Uuid>,
    /// `attacker` hitting `defender`, strongest move first.
    pub forward: Vec<MoveDamage>,
    /// `defender` hitting `attacker`.
    pub reverse: Vec<MoveDamage>,
    /// Totals for the forward direction.
    pub summary: DamageSummary,
}

impl DamageBreakdown {
    /// Group samples for both directions of a pairing.
    #[must_use]
    pub fn build(
        samples: &[DamageSample],
        attacker: &str,
        defender: &str,
        match_id: Option<Uuid>,
    ) -> Self {
        let forward = group_by_move(samples, attacker, defender);
        let reverse = group_by_move(samples, defender, attacker);
        let summary = summarize(&forward);
        Self {
            attacker: attacker.trim().to_string(),
            defender: defender.trim().to_string(),
            match_id,
            forward,
            reverse,
            summary,
        }
    }
}

/// Fold a participant name for comparison: case-insensitive, punctuation
/// and repeated whitespace collapsed to single spaces.
#[must_use]
pub fn normalize_participant(name: &str) -> String {
    name.to_lowercase()
        .split(|c: char| !c.is_alphanumeric())
        .filter(|part| !part.is_empty())
        .collect::<Vec<_>>()
        .join(" ")
}

/// Per-move figures for samples from `attacker` to `defender`, ordered by
/// highest damage first.
#[must_use]
pub fn group_by_move(samples: &[DamageSample], attacker: &str, defender: &str) -> Vec<MoveDamage> {
    let attacker = normalize_participant(attacker);
    let defender = normalize_participant(defender);
    if attacker.is_empty() || defender.is_empty() {
        return Vec::new();
    }

    let mut buckets: BTreeMap<String, MoveDamage> = BTreeMap::new();
    for sample in samples.iter().filter(|s| {
        normalize_participant(&s.attacker) == attacker
            && normalize_participant(&s.defender) == defender
    }) {
        let move_name = sample
            .move_name
            .as_deref()
            .map(str::trim)
            .filter(|m| !m.is_empty())
            .unwrap_or("-")
            .to_string();
        let entry = buckets
            .entry(move_name.clone())
            .or_insert_with(|| MoveDamage {
                move_name,
                min_low: sample.low,
                max_high: sample.high,
                count: 0,
                replay_url: None,
            });
        entry.count += 1;
        entry.min_low = entry.min_low.min(sample.low);
        entry.max_high = entry.max_high.max(sample.high);
        if entry.replay_url.is_none() {
            entry.replay_url.clone_from(&sample.replay_url);
        }
    }

    let mut moves: Vec<MoveDamage> = buckets.into_values().collect();
    moves.sort_by(|a, b| b.max_high.total_cmp(&a.max_high));
    moves
}

fn summarize(moves: &[MoveDamage]) -> DamageSummary {
    DamageSummary {
        count: moves.iter().map(|m| m.count).sum(),
        min_low: moves.iter().map(|m| m.min_low).reduce(f64::min),
        max_high: moves.iter().map(|m| m.max_high).reduce(f64::max),
    }
}
