//! The ingestion pipeline.
//!
//! [`Recorder`] runs normalize, classify, resolve and sequence for one batch
//! under the session lock, then persists the batch in one store
//! transaction. Only after the write succeeds is the stream's new state
//! committed and a notice broadcast.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::{broadcast, Mutex};
use uuid::Uuid;

use super::classifier::Classifier;
use super::error::IngestError;
use super::owner;
use super::session::{OpenStream, SessionManager, LIVE_STREAM};
use crate::source::{split_bulk, ReplayClient};
use crate::store::{
    Event, MatchStore, NicknameSet, ResolutionReport, Roster, Side, SourceTag,
};

/// Default capacity for the ingest notice channel.
pub const DEFAULT_NOTICE_CHANNEL_CAPACITY: usize = 256;

/// Most recent lines examined when inferring the local side.
pub const SIDE_INFERENCE_LINES: usize = 2000;

/// Outcome of one ingested batch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IngestReport {
    pub stream: String,
    /// Lines persisted.
    pub accepted: usize,
    /// Lines dropped as re-deliveries.
    pub duplicates: usize,
    /// Matches that received lines.
    pub matches: Vec<Uuid>,
    /// Matches closed by this batch.
    pub closed: Vec<Uuid>,
}

/// Broadcast after every persisted batch.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IngestNotice {
    pub source: SourceTag,
    pub timestamp: DateTime<Utc>,
    #[serde(flatten)]
    pub report: IngestReport,
}

/// Tunables for a [`Recorder`].
#[derive(Debug, Clone)]
pub struct RecorderOptions {
    pub dedup_capacity: usize,
    /// Seed for the `mine` set of every new match.
    pub default_mine: NicknameSet,
}

impl Default for RecorderOptions {
    fn default() -> Self {
        Self {
            dedup_capacity: super::normalizer::DEFAULT_DEDUP_CAPACITY,
            default_mine: NicknameSet::new(),
        }
    }
}

/// Ingestion entry point shared by the HTTP server and the watcher.
pub struct Recorder {
    store: MatchStore,
    sessions: Mutex<SessionManager>,
    classifier: Classifier,
    notices: broadcast::Sender<IngestNotice>,
}

impl Recorder {
    #[must_use]
    pub fn new(store: MatchStore) -> Self {
        Self::with_options(store, RecorderOptions::default())
    }

    #[must_use]
    pub fn with_options(store: MatchStore, options: RecorderOptions) -> Self {
        let sessions = SessionManager::new(store.clone())
            .with_dedup_capacity(options.dedup_capacity)
            .with_default_mine(options.default_mine);
        let (notices, _) = broadcast::channel(DEFAULT_NOTICE_CHANNEL_CAPACITY);
        Self {
            store,
            sessions: Mutex::new(sessions),
            classifier: Classifier::default(),
            notices,
        }
    }

    /// Replace the classifier (builder pattern).
    #[must_use]
    pub fn with_classifier(mut self, classifier: Classifier) -> Self {
        self.classifier = classifier;
        self
    }

    #[must_use]
    pub fn store(&self) -> &MatchStore {
        &self.store
    }

    /// Receive a notice for every persisted batch.
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<IngestNotice> {
        self.notices.subscribe()
    }

    /// Number of live notice subscribers.
    #[must_use]
    pub fn feed_subscribers(&self) -> usize {
        self.notices.receiver_count()
    }

    /// Streams with an open match in memory.
    pub async fn open_streams(&self) -> Vec<OpenStream> {
        self.sessions.lock().await.open_streams()
    }

    /// Ingest lines on a stream as one atomic batch.
    ///
    /// With `close` the stream's open match is closed after the last line.
    ///
    /// # Errors
    ///
    /// Returns an error if persisting fails; no line of the batch is kept.
    pub async fn ingest<I>(
        &self,
        stream: &str,
        lines: I,
        source: SourceTag,
        close: bool,
    ) -> Result<IngestReport, IngestError>
    where
        I: IntoIterator,
        I::Item: AsRef<str>,
    {
        self.run_batch(stream, lines, source, close, None).await
    }

    async fn run_batch<I>(
        &self,
        stream: &str,
        lines: I,
        source: SourceTag,
        close: bool,
        replay_url: Option<String>,
    ) -> Result<IngestReport, IngestError>
    where
        I: IntoIterator,
        I::Item: AsRef<str>,
    {
        let mut sessions = self.sessions.lock().await;
        let mut batch = sessions.begin(stream).await?.with_replay_url(replay_url);

        let mut log_lines = Vec::new();
        let mut events = Vec::new();
        for raw in lines {
            let Some(mut accepted) = batch.accept(raw.as_ref(), source) else {
                continue;
            };
            let line = accepted.line;
            let mut classified = self.classifier.classify(&line.text);
            accepted.combat.apply(&line.text, &mut classified);
            let owner =
                owner::resolve(classified.subject.as_deref(), &line.text, accepted.roster);
            events.push(Event {
                match_id: line.match_id,
                seq: line.seq,
                kind: classified.kind,
                subject: classified.subject,
                value: classified.value,
                damage: classified.damage,
                attacker: classified.attacker,
                move_name: classified.move_name,
                owner,
            });
            log_lines.push(line);
        }

        let (state, mut plan, summary) = batch.finish(close);
        plan.lines = log_lines;
        plan.events = events;

        self.store.apply_batch(plan).await?;
        sessions.commit(stream, state);
        drop(sessions);

        let report = IngestReport {
            stream: stream.to_string(),
            accepted: summary.accepted,
            duplicates: summary.duplicates,
            matches: summary.matches,
            closed: summary.closed,
        };

        tracing::debug!(
            stream,
            source = source.as_str(),
            accepted = report.accepted,
            duplicates = report.duplicates,
            "Batch ingested"
        );

        if report.accepted > 0 || !report.closed.is_empty() {
            // No subscribers is fine
            let _ = self.notices.send(IngestNotice {
                source,
                timestamp: Utc::now(),
                report: report.clone(),
            });
        }

        Ok(report)
    }

    /// Ingest one pushed line on the live stream.
    ///
    /// # Errors
    ///
    /// Returns an error if persisting fails.
    pub async fn ingest_line(&self, line: &str) -> Result<IngestReport, IngestError> {
        self.ingest(LIVE_STREAM, [line], SourceTag::Push, false).await
    }

    /// Ingest a pasted or uploaded log.
    ///
    /// Without an explicit stream the log gets a fresh `bulk-<uuid>` stream.
    ///
    /// # Errors
    ///
    /// Returns an error if persisting fails.
    pub async fn ingest_bulk(
        &self,
        text: &str,
        stream: Option<&str>,
        close: bool,
    ) -> Result<IngestReport, IngestError> {
        let stream = stream.map_or_else(|| format!("bulk-{}", Uuid::new_v4()), str::to_string);
        let report = self
            .ingest(&stream, split_bulk(text), SourceTag::Bulk, close)
            .await?;
        tracing::info!(
            stream = %report.stream,
            accepted = report.accepted,
            matches = report.matches.len(),
            "Bulk log ingested"
        );
        Ok(report)
    }

    /// Fetch a replay and ingest it as a closed match on its own stream.
    ///
    /// # Errors
    ///
    /// Returns `Source` if the fetch fails, or a store error.
    pub async fn import_replay(
        &self,
        client: &ReplayClient,
        url: &str,
    ) -> Result<IngestReport, IngestError> {
        let replay = client.fetch(url).await?;
        let stream = format!("replay-{}", Uuid::new_v4());
        let report = self
            .run_batch(
                &stream,
                split_bulk(&replay.log),
                SourceTag::Replay,
                true,
                Some(replay.url.clone()),
            )
            .await?;
        tracing::info!(url = %replay.url, accepted = report.accepted, "Replay imported");
        Ok(report)
    }

    /// Close a stream's open match without opening a new one.
    ///
    /// # Errors
    ///
    /// Returns an error if persisting fails.
    pub async fn close_stream(&self, stream: &str) -> Result<Option<Uuid>, IngestError> {
        let report = self
            .ingest(stream, std::iter::empty::<&str>(), SourceTag::Bulk, true)
            .await?;
        Ok(report.closed.first().copied())
    }

    /// Close a match by id.
    ///
    /// Returns `false` if it was already closed.
    ///
    /// # Errors
    ///
    /// Returns an error for unknown matches or store failures.
    pub async fn close_match(&self, match_id: Uuid) -> Result<bool, IngestError> {
        let mut sessions = self.sessions.lock().await;
        let closed = self.store.close_match(match_id, Utc::now()).await?;
        let stream = sessions.forget_match(match_id);
        drop(sessions);

        if closed {
            tracing::info!(%match_id, stream = stream.as_deref(), "Match closed");
        }
        Ok(closed)
    }

    /// Replace a match's roster from user-entered text and re-derive the
    /// owner of every event of that match.
    ///
    /// Without an explicit `my_side` the side is inferred from the match's
    /// protocol lines that name a `mine` nickname.
    ///
    /// Runs under the session lock, so it never interleaves with a batch on
    /// the same match.
    ///
    /// # Errors
    ///
    /// Returns an error for unknown matches or store failures.
    pub async fn update_roster(
        &self,
        match_id: Uuid,
        mine: &str,
        opponent: &str,
        my_side: Option<Side>,
    ) -> Result<ResolutionReport, IngestError> {
        let mut sessions = self.sessions.lock().await;

        let mine = NicknameSet::parse(mine);
        let my_side = match my_side {
            Some(side) => Some(side),
            None if mine.is_empty() => None,
            None => {
                let recent = self
                    .store
                    .recent_lines(match_id, SIDE_INFERENCE_LINES)
                    .await?;
                let inferred = owner::infer_side(recent.iter().map(String::as_str), &mine);
                if let Some(side) = inferred {
                    tracing::debug!(%match_id, side = side.as_str(), "Inferred local side");
                }
                inferred
            }
        };
        let roster = Roster::new(mine, NicknameSet::parse(opponent)).with_side(my_side);
        let resolver_roster = roster.clone();
        let report = self
            .store
            .replace_roster(match_id, roster.clone(), move |subject, raw| {
                owner::resolve(subject, raw, &resolver_roster)
            })
            .await?;
        sessions.set_roster(match_id, &roster);
        drop(sessions);

        tracing::info!(
            %match_id,
            mine = roster.mine.len(),
            opponent = roster.opponent.len(),
            my_side = roster.my_side.map(|s| s.as_str()),
            total = report.total,
            changed = report.changed,
            "Owners re-resolved"
        );
        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{EventKind, EventQuery, MatchStatus, Owner};

    async fn recorder() -> Recorder {
        Recorder::new(MatchStore::open_in_memory().await.unwrap())
    }

    async fn events(recorder: &Recorder, match_id: Uuid) -> Vec<Event> {
        recorder
            .store()
            .get_events(
                match_id,
                EventQuery {
                    limit: 1000,
                    ..EventQuery::default()
                },
            )
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn test_item_line_then_roster_update() {
        let recorder = recorder().await;
        let report = recorder
            .ingest_line("Foo's Leftovers restored a little HP!")
            .await
            .unwrap();
        let id = report.matches[0];

        let before = events(&recorder, id).await;
        assert_eq!(before.len(), 1);
        assert_eq!(before[0].kind, EventKind::Item);
        assert_eq!(before[0].subject.as_deref(), Some("Foo"));
        assert_eq!(before[0].value.as_deref(), Some("Leftovers"));
        assert_eq!(before[0].owner, Owner::Unknown);

        let resolution = recorder.update_roster(id, "Foo", "", None).await.unwrap();
        assert_eq!(resolution.changed, 1);

        let after = events(&recorder, id).await;
        assert_eq!(after[0].owner, Owner::Mine);
    }

    #[tokio::test]
    async fn test_opposing_damage_line() {
        let recorder = recorder().await;
        let report = recorder
            .ingest_line("The opposing Gengar took 37% damage!")
            .await
            .unwrap();

        let events = events(&recorder, report.matches[0]).await;
        assert_eq!(events[0].kind, EventKind::Damage);
        assert_eq!(events[0].subject.as_deref(), Some("Gengar"));
        assert_eq!(events[0].value.as_deref(), Some("37%"));
        assert_eq!(events[0].owner, Owner::Opponent);
    }

    #[tokio::test]
    async fn test_damage_attributed_to_last_move() {
        let recorder = recorder().await;
        let report = recorder
            .ingest_bulk(
                "Foo used Shadow Ball!\nThe opposing Gengar lost 37% of its health!",
                None,
                true,
            )
            .await
            .unwrap();

        let events = events(&recorder, report.matches[0]).await;
        assert_eq!(events[1].kind, EventKind::Damage);
        assert_eq!(events[1].attacker.as_deref(), Some("Foo"));
        assert_eq!(events[1].move_name.as_deref(), Some("Shadow Ball"));
    }

    #[tokio::test]
    async fn test_combat_state_is_per_match() {
        let recorder = recorder().await;
        let report = recorder
            .ingest_bulk(
                "Foo used Shadow Ball!\n\
                 Battle started between Ash and Gary!\n\
                 The opposing Gengar lost 37% of its health!",
                None,
                true,
            )
            .await
            .unwrap();

        let events = events(&recorder, report.matches[1]).await;
        assert_eq!(events[1].kind, EventKind::Damage);
        assert_eq!(events[1].attacker, None);
    }

    #[tokio::test]
    async fn test_roster_update_infers_side() {
        let recorder = recorder().await;
        let log = "|switch|p1a: Eddie bear|Ursaring|100/100\n\
                   |switch|p2a: Gengar|Gengar|100/100\n\
                   |-enditem|p2a: Gengar|Focus Sash";
        let id = recorder.ingest_bulk(log, None, true).await.unwrap().matches[0];

        let item = |events: Vec<Event>| {
            events
                .into_iter()
                .find(|e| e.kind == EventKind::Item)
                .unwrap()
        };
        assert_eq!(item(events(&recorder, id).await).owner, Owner::Unknown);

        recorder.update_roster(id, "Eddie bear", "", None).await.unwrap();
        let record = recorder.store().get_match(id).await.unwrap().unwrap();
        assert_eq!(record.roster.my_side, Some(Side::P1));
        assert_eq!(item(events(&recorder, id).await).owner, Owner::Opponent);

        // An explicit side is kept as given
        recorder
            .update_roster(id, "Eddie bear", "", Some(Side::P2))
            .await
            .unwrap();
        assert_eq!(item(events(&recorder, id).await).owner, Owner::Mine);
    }

    #[tokio::test]
    async fn test_new_lines_use_updated_roster() {
        let recorder = recorder().await;
        let report = recorder.ingest_line("Turn 1").await.unwrap();
        let id = report.matches[0];
        recorder.update_roster(id, "Foo", "", None).await.unwrap();

        recorder
            .ingest_line("Foo's Leftovers restored a little HP!")
            .await
            .unwrap();
        let events = events(&recorder, id).await;
        assert_eq!(events[1].owner, Owner::Mine);
    }

    #[tokio::test]
    async fn test_bulk_reingest_same_stream_is_idempotent() {
        let recorder = recorder().await;
        let log = "Battle started between Ash and Gary!\nTurn 1\nFoo used Tackle!\n";

        let first = recorder.ingest_bulk(log, Some("paste"), false).await.unwrap();
        assert_eq!(first.accepted, 3);

        let second = recorder.ingest_bulk(log, Some("paste"), false).await.unwrap();
        assert_eq!(second.accepted, 0);
        assert_eq!(second.duplicates, 3);
        assert_eq!(recorder.store().count_events().await.unwrap(), 3);
    }

    #[tokio::test]
    async fn test_bulk_closes_match() {
        let recorder = recorder().await;
        let report = recorder
            .ingest_bulk("Turn 1\nTurn 2", None, true)
            .await
            .unwrap();
        assert!(report.stream.starts_with("bulk-"));
        assert_eq!(report.closed, report.matches);

        let record = recorder
            .store()
            .get_match(report.matches[0])
            .await
            .unwrap()
            .unwrap();
        assert_eq!(record.status, MatchStatus::Closed);
    }

    #[tokio::test]
    async fn test_close_match_and_stream() {
        let recorder = recorder().await;
        let report = recorder.ingest_line("Turn 1").await.unwrap();
        let id = report.matches[0];

        assert!(recorder.close_match(id).await.unwrap());
        assert!(!recorder.close_match(id).await.unwrap());
        assert!(recorder.open_streams().await.is_empty());

        // Next pushed line opens a fresh match
        let next = recorder.ingest_line("Turn 1").await.unwrap();
        assert_ne!(next.matches[0], id);
        assert_eq!(recorder.close_stream(LIVE_STREAM).await.unwrap(), Some(next.matches[0]));
        assert_eq!(recorder.close_stream(LIVE_STREAM).await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_close_unknown_match() {
        let recorder = recorder().await;
        let err = recorder.close_match(Uuid::new_v4()).await.unwrap_err();
        assert!(err.unknown_match().is_some());
    }

    #[tokio::test]
    async fn test_notice_broadcast() {
        let recorder = recorder().await;
        let mut notices = recorder.subscribe();
        recorder.ingest_line("Turn 1").await.unwrap();

        let notice = notices.recv().await.unwrap();
        assert_eq!(notice.source, SourceTag::Push);
        assert_eq!(notice.report.accepted, 1);
    }

    #[tokio::test]
    async fn test_failed_batch_leaves_no_trace() {
        let temp_dir = tempfile::tempdir().unwrap();
        let db_path = temp_dir.path().join("recorder.db");
        let store = MatchStore::open(&db_path).await.unwrap();
        let recorder = Recorder::new(store.clone());
        let id = recorder.ingest_line("Turn 1").await.unwrap().matches[0];

        // Occupy seq 2 from a second connection so the next batch fails
        let other = rusqlite::Connection::open(&db_path).unwrap();
        other
            .execute(
                "INSERT INTO log_lines (match_id, seq, text, source, received_at) VALUES (?1, 2, 'x', 'push', '2026-01-01T00:00:00Z')",
                [id.to_string()],
            )
            .unwrap();
        assert!(recorder.ingest_line("Turn 2").await.is_err());

        other
            .execute("DELETE FROM log_lines WHERE text = 'x'", [])
            .unwrap();

        // Neither the sequence number nor the dedup cache moved
        let retry = recorder.ingest_line("Turn 2").await.unwrap();
        assert_eq!(retry.accepted, 1);
        let lines = store.get_lines(id, 10, 0).await.unwrap();
        assert_eq!(lines.len(), 2);
        assert_eq!(lines[1].seq, 2);
        assert_eq!(lines[1].text, "Turn 2");
    }
}
