//! Match session management.
//!
//! Segments each logical stream into matches. A stream has at most one open
//! match; a `Battle started between ...` line closes it and opens the next.
//! Work happens in a [`StreamBatch`], a snapshot of one stream's state that
//! is only written back with [`SessionManager::commit`] once the batch has
//! been persisted, so a failed batch leaves no trace in memory either.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use uuid::Uuid;

use super::combat::CombatState;
use super::markers;
use super::normalizer::{collapse_whitespace, line_digest, LineNormalizer, DEFAULT_DEDUP_CAPACITY};
use crate::store::{
    BatchPlan, LogLine, Match, MatchMeta, MatchStatus, MatchStore, NicknameSet, OpenMatchState,
    Roster, SourceTag, StoreError,
};

/// Stream used by pushed lines and the file tailer.
pub const LIVE_STREAM: &str = "live";

/// The open match of a stream with its sequencing and dedup state.
#[derive(Debug, Clone)]
pub struct OpenMatch {
    record: Match,
    next_seq: u64,
    turn: Option<u32>,
    combat: CombatState,
    normalizer: LineNormalizer,
    persisted: bool,
    meta_dirty: bool,
}

impl OpenMatch {
    fn new(record: Match, dedup_capacity: usize) -> Self {
        Self {
            record,
            next_seq: 1,
            turn: None,
            combat: CombatState::new(),
            normalizer: LineNormalizer::new(dedup_capacity),
            persisted: false,
            meta_dirty: false,
        }
    }

    fn recovered(state: OpenMatchState, recent: &[String], dedup_capacity: usize) -> Self {
        let mut normalizer = LineNormalizer::new(dedup_capacity);
        normalizer.seed(recent.iter().map(String::as_str));
        let mut combat = CombatState::new();
        for line in recent {
            combat.track(line);
        }
        Self {
            record: state.record,
            next_seq: state.last_seq + 1,
            turn: state.last_turn,
            combat,
            normalizer,
            persisted: true,
            meta_dirty: false,
        }
    }

    #[must_use]
    pub fn record(&self) -> &Match {
        &self.record
    }

    /// Sequence number the next accepted line will get.
    #[must_use]
    pub fn next_seq(&self) -> u64 {
        self.next_seq
    }

    #[must_use]
    pub fn turn(&self) -> Option<u32> {
        self.turn
    }

    #[must_use]
    pub fn combat(&self) -> &CombatState {
        &self.combat
    }
}

/// Session state of one logical stream.
#[derive(Debug, Clone, Default)]
pub struct StreamState {
    current: Option<OpenMatch>,
}

impl StreamState {
    #[must_use]
    pub fn current(&self) -> Option<&OpenMatch> {
        self.current.as_ref()
    }
}

/// An open stream as reported by [`SessionManager::open_streams`].
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize)]
pub struct OpenStream {
    pub stream: String,
    pub match_id: Uuid,
    pub next_seq: u64,
}

/// Owns per-stream session state and recovers it from the store.
#[derive(Debug)]
pub struct SessionManager {
    store: MatchStore,
    dedup_capacity: usize,
    default_mine: NicknameSet,
    streams: HashMap<String, StreamState>,
}

impl SessionManager {
    #[must_use]
    pub fn new(store: MatchStore) -> Self {
        Self {
            store,
            dedup_capacity: DEFAULT_DEDUP_CAPACITY,
            default_mine: NicknameSet::new(),
            streams: HashMap::new(),
        }
    }

    /// Set the per-match dedup capacity (builder pattern).
    #[must_use]
    pub fn with_dedup_capacity(mut self, capacity: usize) -> Self {
        self.dedup_capacity = capacity.max(1);
        self
    }

    /// Nicknames every new match starts with in its `mine` set.
    #[must_use]
    pub fn with_default_mine(mut self, mine: NicknameSet) -> Self {
        self.default_mine = mine;
        self
    }

    #[must_use]
    pub fn dedup_capacity(&self) -> usize {
        self.dedup_capacity
    }

    /// Start a batch on a stream.
    ///
    /// The first time a stream is touched its open match, if any, is
    /// recovered from the store together with its last sequence number,
    /// last turn and a dedup cache seeded from its most recent lines.
    ///
    /// # Errors
    ///
    /// Returns an error if recovery queries fail.
    pub async fn begin(&mut self, stream: &str) -> Result<StreamBatch, StoreError> {
        if !self.streams.contains_key(stream) {
            let state = self.recover(stream).await?;
            self.streams.insert(stream.to_string(), state);
        }
        let state = self.streams.get(stream).cloned().unwrap_or_default();

        Ok(StreamBatch {
            stream: stream.to_string(),
            state,
            dedup_capacity: self.dedup_capacity,
            default_roster: Roster::new(self.default_mine.clone(), NicknameSet::new()),
            replay_url: None,
            closed: Vec::new(),
            opened: Vec::new(),
            meta_updates: Vec::new(),
            touched: Vec::new(),
            closed_ids: Vec::new(),
            accepted: 0,
            duplicates: 0,
        })
    }

    async fn recover(&self, stream: &str) -> Result<StreamState, StoreError> {
        let Some(open) = self.store.open_match_for_stream(stream).await? else {
            return Ok(StreamState::default());
        };
        let recent = self
            .store
            .recent_lines(open.record.id, self.dedup_capacity)
            .await?;

        tracing::info!(
            stream,
            match_id = %open.record.id,
            last_seq = open.last_seq,
            "Recovered open match"
        );

        Ok(StreamState {
            current: Some(OpenMatch::recovered(open, &recent, self.dedup_capacity)),
        })
    }

    /// Write back a stream's state after its batch was persisted.
    pub fn commit(&mut self, stream: impl Into<String>, state: StreamState) {
        self.streams.insert(stream.into(), state);
    }

    /// Open match of a stream, if loaded.
    #[must_use]
    pub fn open_match(&self, stream: &str) -> Option<&OpenMatch> {
        self.streams.get(stream).and_then(StreamState::current)
    }

    /// Loaded streams that currently have an open match.
    #[must_use]
    pub fn open_streams(&self) -> Vec<OpenStream> {
        let mut streams: Vec<_> = self
            .streams
            .iter()
            .filter_map(|(stream, state)| {
                state.current().map(|current| OpenStream {
                    stream: stream.clone(),
                    match_id: current.record.id,
                    next_seq: current.next_seq,
                })
            })
            .collect();
        streams.sort_by(|a, b| a.stream.cmp(&b.stream));
        streams
    }

    /// Drop a match from its stream after it was closed in the store.
    ///
    /// Returns the stream it was open on.
    pub fn forget_match(&mut self, match_id: Uuid) -> Option<String> {
        let (stream, state) = self
            .streams
            .iter_mut()
            .find(|(_, state)| state.current().is_some_and(|m| m.record.id == match_id))?;
        state.current = None;
        Some(stream.clone())
    }

    /// Replace the in-memory roster of an open match. No-op for matches
    /// that are not loaded.
    pub fn set_roster(&mut self, match_id: Uuid, roster: &Roster) {
        for state in self.streams.values_mut() {
            if let Some(current) = state.current.as_mut() {
                if current.record.id == match_id {
                    current.record.roster = roster.clone();
                }
            }
        }
    }
}

/// A line accepted into a match, with the context needed to classify it.
#[derive(Debug)]
pub struct Accepted<'a> {
    pub line: LogLine,
    pub roster: &'a Roster,
    pub combat: &'a mut CombatState,
}

/// Pending work on one stream.
#[derive(Debug)]
pub struct StreamBatch {
    stream: String,
    state: StreamState,
    dedup_capacity: usize,
    default_roster: Roster,
    replay_url: Option<String>,
    closed: Vec<(Uuid, DateTime<Utc>)>,
    opened: Vec<Match>,
    meta_updates: Vec<(Uuid, MatchMeta)>,
    touched: Vec<Uuid>,
    closed_ids: Vec<Uuid>,
    accepted: usize,
    duplicates: usize,
}

/// Counters and match ids produced by a finished batch.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BatchSummary {
    pub accepted: usize,
    pub duplicates: usize,
    /// Matches that received lines, in order of first line.
    pub matches: Vec<Uuid>,
    /// Matches this batch closed.
    pub closed: Vec<Uuid>,
}

impl StreamBatch {
    /// Attach a replay URL to matches this batch opens.
    #[must_use]
    pub fn with_replay_url(mut self, url: Option<String>) -> Self {
        self.replay_url = url;
        self
    }

    #[must_use]
    pub fn stream(&self) -> &str {
        &self.stream
    }

    /// Accept one raw line.
    ///
    /// Returns the sequenced line with the roster and combat state of the
    /// match it joined, or `None` when the line is blank or a re-delivery.
    pub fn accept(&mut self, raw: &str, source: SourceTag) -> Option<Accepted<'_>> {
        let cleaned = collapse_whitespace(raw);
        if cleaned.is_empty() {
            return None;
        }
        let now = Utc::now();

        if markers::is_boundary(&cleaned) {
            let redelivered = self
                .state
                .current
                .as_ref()
                .is_some_and(|m| m.normalizer.has_seen(&cleaned));
            if redelivered {
                self.duplicates += 1;
                return None;
            }
            self.retire_current(now);
        }

        if self.state.current.is_none() {
            self.open_match(source);
        }

        let current = self.state.current.as_mut()?;
        let Some(text) = current.normalizer.normalize(&cleaned) else {
            tracing::trace!(
                stream = %self.stream,
                digest = %line_digest(&cleaned),
                "Dropping re-delivered line"
            );
            self.duplicates += 1;
            return None;
        };

        if let Some(turn) = markers::parse_turn(&text) {
            current.turn = Some(turn);
        }
        let meta = markers::parse_meta(&text);
        if meta != MatchMeta::default() {
            current.record.meta.merge(&meta);
            current.record.result = current.record.meta.result();
            current.meta_dirty = true;
        }

        let line = LogLine {
            match_id: current.record.id,
            seq: current.next_seq,
            text,
            source,
            received_at: now,
            turn: current.turn,
        };
        current.next_seq += 1;

        self.accepted += 1;
        if self.touched.last() != Some(&line.match_id) {
            self.touched.push(line.match_id);
        }

        Some(Accepted {
            line,
            roster: &current.record.roster,
            combat: &mut current.combat,
        })
    }

    fn open_match(&mut self, source: SourceTag) {
        let mut record = Match::open(self.stream.clone(), source);
        record.roster = self.default_roster.clone();
        record.replay_url.clone_from(&self.replay_url);
        tracing::debug!(stream = %self.stream, match_id = %record.id, "Opening match");
        self.state.current = Some(OpenMatch::new(record, self.dedup_capacity));
    }

    fn retire_current(&mut self, now: DateTime<Utc>) {
        let Some(current) = self.state.current.take() else {
            return;
        };
        let id = current.record.id;
        tracing::debug!(stream = %self.stream, match_id = %id, "Closing match");

        if current.persisted {
            self.closed.push((id, now));
            if current.meta_dirty {
                self.meta_updates.push((id, current.record.meta));
            }
        } else {
            let mut record = current.record;
            record.status = MatchStatus::Closed;
            record.ended_at = Some(now);
            self.opened.push(record);
        }
        self.closed_ids.push(id);
    }

    /// Finish the batch, optionally closing the stream's open match.
    ///
    /// Returns the stream state to commit once `plan` (lines and events
    /// still to be attached by the caller) is persisted.
    #[must_use]
    pub fn finish(mut self, close: bool) -> (StreamState, BatchPlan, BatchSummary) {
        if close {
            self.retire_current(Utc::now());
        } else if let Some(current) = self.state.current.as_mut() {
            if !current.persisted {
                self.opened.push(current.record.clone());
                current.persisted = true;
            } else if current.meta_dirty {
                self.meta_updates
                    .push((current.record.id, current.record.meta.clone()));
            }
            current.meta_dirty = false;
        }

        let plan = BatchPlan {
            closed: self.closed,
            opened: self.opened,
            meta_updates: self.meta_updates,
            ..BatchPlan::default()
        };
        let summary = BatchSummary {
            accepted: self.accepted,
            duplicates: self.duplicates,
            matches: self.touched,
            closed: self.closed_ids,
        };
        (self.state, plan, summary)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn manager() -> SessionManager {
        SessionManager::new(MatchStore::open_in_memory().await.unwrap())
    }

    fn accept_all(batch: &mut StreamBatch, lines: &[&str]) -> Vec<LogLine> {
        lines
            .iter()
            .filter_map(|raw| batch.accept(raw, SourceTag::Bulk).map(|accepted| accepted.line))
            .collect()
    }

    #[tokio::test]
    async fn test_first_line_opens_match() {
        let mut sessions = manager().await;
        let mut batch = sessions.begin(LIVE_STREAM).await.unwrap();

        let lines = accept_all(&mut batch, &["Turn 1", "Foo used Tackle!"]);
        assert_eq!(lines.len(), 2);
        assert_eq!(lines[0].seq, 1);
        assert_eq!(lines[1].seq, 2);
        assert_eq!(lines[0].match_id, lines[1].match_id);
        assert_eq!(lines[1].turn, Some(1));

        let (state, plan, summary) = batch.finish(false);
        assert_eq!(plan.opened.len(), 1);
        assert_eq!(plan.opened[0].status, MatchStatus::Open);
        assert!(state.current().is_some());
        assert_eq!(summary.accepted, 2);
    }

    #[tokio::test]
    async fn test_boundary_restarts_sequence() {
        let mut sessions = manager().await;
        let mut batch = sessions.begin(LIVE_STREAM).await.unwrap();

        let lines = accept_all(
            &mut batch,
            &[
                "Battle started between Ash and Gary!",
                "Turn 1",
                "Battle started between Ash and Brock!",
                "Turn 1",
            ],
        );
        assert_eq!(lines.len(), 4);
        assert_eq!(lines[2].seq, 1);
        assert_eq!(lines[3].seq, 2);
        assert_ne!(lines[0].match_id, lines[2].match_id);

        let (_, plan, summary) = batch.finish(false);
        assert_eq!(plan.opened.len(), 2);
        assert_eq!(plan.opened[0].status, MatchStatus::Closed);
        assert_eq!(plan.opened[0].meta.player2.as_deref(), Some("Gary"));
        assert_eq!(plan.opened[1].status, MatchStatus::Open);
        assert_eq!(summary.closed, vec![lines[0].match_id]);
    }

    #[tokio::test]
    async fn test_redelivered_boundary_is_dropped() {
        let mut sessions = manager().await;
        let mut batch = sessions.begin(LIVE_STREAM).await.unwrap();

        let lines = accept_all(
            &mut batch,
            &[
                "Battle started between Ash and Gary!",
                "Turn 1",
                "Battle started between Ash and Gary!",
            ],
        );
        assert_eq!(lines.len(), 2);
        let (_, plan, summary) = batch.finish(false);
        assert_eq!(plan.opened.len(), 1);
        assert_eq!(summary.duplicates, 1);
    }

    #[tokio::test]
    async fn test_close_retires_match() {
        let mut sessions = manager().await;
        let mut batch = sessions.begin("bulk-1").await.unwrap();
        accept_all(&mut batch, &["Turn 1"]);

        let (state, plan, summary) = batch.finish(true);
        assert!(state.current().is_none());
        assert_eq!(plan.opened[0].status, MatchStatus::Closed);
        assert!(plan.opened[0].ended_at.is_some());
        assert_eq!(summary.closed.len(), 1);
    }

    #[tokio::test]
    async fn test_uncommitted_batch_leaves_state() {
        let mut sessions = manager().await;
        let mut batch = sessions.begin(LIVE_STREAM).await.unwrap();
        accept_all(&mut batch, &["Turn 1"]);
        drop(batch.finish(false));

        assert!(sessions.open_match(LIVE_STREAM).is_none());
    }

    #[tokio::test]
    async fn test_commit_continues_sequence() {
        let mut sessions = manager().await;

        let mut batch = sessions.begin(LIVE_STREAM).await.unwrap();
        accept_all(&mut batch, &["Turn 1", "Foo used Tackle!"]);
        let (state, plan, _) = batch.finish(false);
        assert_eq!(plan.opened.len(), 1);
        sessions.commit(LIVE_STREAM, state);

        let mut batch = sessions.begin(LIVE_STREAM).await.unwrap();
        let lines = accept_all(&mut batch, &["Foo used Tackle!", "Turn 2"]);
        assert_eq!(lines.len(), 1);
        assert_eq!(lines[0].seq, 3);
        assert_eq!(lines[0].turn, Some(2));

        let (_, plan, summary) = batch.finish(false);
        assert!(plan.opened.is_empty());
        assert_eq!(summary.duplicates, 1);
    }

    #[tokio::test]
    async fn test_metadata_tracked() {
        let mut sessions = manager().await;
        let mut batch = sessions.begin(LIVE_STREAM).await.unwrap();
        accept_all(
            &mut batch,
            &[
                "Battle started between Ash and Gary!",
                "Format: [Gen 9] OU",
                "Ash won the battle!",
            ],
        );
        let (_, plan, _) = batch.finish(true);
        let record = &plan.opened[0];
        assert_eq!(record.meta.format.as_deref(), Some("[Gen 9] OU"));
        assert_eq!(record.meta.winner.as_deref(), Some("Ash"));
        assert_eq!(record.result, Some(crate::store::MatchResult::Won));
    }

    #[tokio::test]
    async fn test_default_mine_seeds_roster() {
        let store = MatchStore::open_in_memory().await.unwrap();
        let mut sessions =
            SessionManager::new(store).with_default_mine(NicknameSet::parse("Foo"));
        let mut batch = sessions.begin(LIVE_STREAM).await.unwrap();
        let accepted = batch.accept("Turn 1", SourceTag::Push).unwrap();
        assert!(accepted.roster.mine.contains("foo"));
    }

    #[tokio::test]
    async fn test_recovery_rebuilds_combat_state() {
        let store = MatchStore::open_in_memory().await.unwrap();
        let mut sessions = SessionManager::new(store.clone());
        let mut batch = sessions.begin(LIVE_STREAM).await.unwrap();
        let lines = accept_all(
            &mut batch,
            &["|switch|p2a: Gengar|Gengar|100/100", "Foo used Shadow Ball!"],
        );
        let (_, mut plan, _) = batch.finish(false);
        plan.lines = lines;
        store.apply_batch(plan).await.unwrap();

        let mut restarted = SessionManager::new(store);
        let mut batch = restarted.begin(LIVE_STREAM).await.unwrap();
        let accepted = batch
            .accept("The opposing Gengar lost 37% of its health!", SourceTag::Push)
            .unwrap();
        assert_eq!(accepted.line.seq, 3);
        assert_eq!(accepted.combat.last_actor(), Some("Foo"));
        assert_eq!(accepted.combat.last_move(), Some("Shadow Ball"));
        assert_eq!(accepted.combat.hp("p2a: Gengar"), Some(100.0));
    }

    #[tokio::test]
    async fn test_forget_and_set_roster() {
        let mut sessions = manager().await;
        let mut batch = sessions.begin(LIVE_STREAM).await.unwrap();
        let lines = accept_all(&mut batch, &["Turn 1"]);
        let (state, _, _) = batch.finish(false);
        sessions.commit(LIVE_STREAM, state);
        let id = lines[0].match_id;

        let roster = Roster::new(NicknameSet::parse("Bar"), NicknameSet::new());
        sessions.set_roster(id, &roster);
        let open = sessions.open_match(LIVE_STREAM).unwrap();
        assert!(open.record().roster.mine.contains("bar"));
        assert_eq!(sessions.open_streams().len(), 1);

        assert_eq!(sessions.forget_match(id).as_deref(), Some(LIVE_STREAM));
        assert!(sessions.open_match(LIVE_STREAM).is_none());
        assert!(sessions.forget_match(id).is_none());
    }
}
