//! Match store with async `SQLite` operations.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension, Row, Transaction};
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use uuid::Uuid;

use super::damage::{normalize_participant, DamageBreakdown, DamageSample};
use super::error::StoreError;
use super::schema::SCHEMA;
use super::types::{
    DamageRange, Event, EventKind, LogLine, Match, MatchMeta, MatchResult, MatchStatus,
    NicknameSet, Owner, Roster, Side, SourceTag,
};

/// Returns the default path for the recorder database.
///
/// This is `~/.local/share/battle-recorder/recorder.db` on Unix systems.
#[must_use]
pub fn default_db_path() -> PathBuf {
    dirs::data_local_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("battle-recorder")
        .join("recorder.db")
}

/// Everything one ingested batch writes, applied in a single transaction.
#[derive(Debug, Clone, Default)]
pub struct BatchPlan {
    /// Previously persisted matches that this batch closes.
    pub closed: Vec<(Uuid, DateTime<Utc>)>,
    /// Matches created by this batch, in their final state.
    pub opened: Vec<Match>,
    /// Metadata changes for previously persisted matches.
    pub meta_updates: Vec<(Uuid, MatchMeta)>,
    pub lines: Vec<LogLine>,
    pub events: Vec<Event>,
}

impl BatchPlan {
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.closed.is_empty()
            && self.opened.is_empty()
            && self.meta_updates.is_empty()
            && self.lines.is_empty()
    }
}

/// Open match of a stream as recovered from disk.
#[derive(Debug, Clone)]
pub struct OpenMatchState {
    pub record: Match,
    pub last_seq: u64,
    pub last_turn: Option<u32>,
}

/// Outcome of re-deriving owners for a match.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResolutionReport {
    /// Events examined.
    pub total: u64,
    /// Events whose owner changed.
    pub changed: u64,
}

/// Filter and paging for event queries.
#[derive(Debug, Clone, Default)]
pub struct EventQuery {
    pub kind: Option<EventKind>,
    pub owner: Option<Owner>,
    pub limit: usize,
    pub offset: usize,
}

/// Aggregate damage figures across all matches.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DamageStats {
    pub hits: u64,
    pub min: Option<f64>,
    pub max: Option<f64>,
    pub avg: Option<f64>,
}

/// Store-wide totals.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StoreStats {
    pub matches: u64,
    pub open_matches: u64,
    pub lines: u64,
    pub item_events: u64,
    pub damage_events: u64,
    pub raw_events: u64,
    pub damage: DamageStats,
}

/// Durable store for matches, lines and events.
///
/// Holds a single writable connection; every operation takes the lock, so
/// writers are serialized.
#[derive(Debug, Clone)]
pub struct MatchStore {
    conn: Arc<Mutex<Connection>>,
    path: Option<PathBuf>,
}

impl MatchStore {
    /// Open a store at the specified path.
    ///
    /// Creates parent directories if they don't exist and initializes the schema.
    ///
    /// # Errors
    ///
    /// Returns an error if the database cannot be opened or the schema cannot be applied.
    pub async fn open(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        let path = path.as_ref().to_path_buf();

        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() && !parent.exists() {
                tokio::fs::create_dir_all(parent)
                    .await
                    .map_err(|source| StoreError::CreateDir {
                        path: parent.to_path_buf(),
                        source,
                    })?;
            }
        }

        let path_clone = path.clone();
        let conn = tokio::task::spawn_blocking(move || -> Result<Connection, StoreError> {
            let conn =
                Connection::open(&path_clone).map_err(|source| StoreError::DatabaseOpen {
                    path: path_clone,
                    source,
                })?;
            conn.execute_batch(SCHEMA)?;
            Ok(conn)
        })
        .await
        .map_err(|_| StoreError::TaskCancelled)??;

        tracing::debug!(path = %path.display(), "Opened match store");

        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
            path: Some(path),
        })
    }

    /// Open an in-memory store for testing.
    ///
    /// # Errors
    ///
    /// Returns an error if the database cannot be created or the schema cannot be applied.
    pub async fn open_in_memory() -> Result<Self, StoreError> {
        let conn = tokio::task::spawn_blocking(|| -> Result<Connection, StoreError> {
            let conn = Connection::open_in_memory()?;
            conn.execute_batch(SCHEMA)?;
            Ok(conn)
        })
        .await
        .map_err(|_| StoreError::TaskCancelled)??;

        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
            path: None,
        })
    }

    /// Returns the path to the database, if opened from a file.
    #[must_use]
    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    /// Run a closure against the connection on the blocking pool.
    async fn with_conn<T, F>(&self, f: F) -> Result<T, StoreError>
    where
        T: Send + 'static,
        F: FnOnce(&mut Connection) -> Result<T, StoreError> + Send + 'static,
    {
        let conn = self.conn.clone();
        tokio::task::spawn_blocking(move || {
            let mut conn = conn.blocking_lock();
            f(&mut conn)
        })
        .await
        .map_err(|_| StoreError::TaskCancelled)?
    }

    /// Persist one ingested batch atomically.
    ///
    /// # Errors
    ///
    /// Returns an error if any statement fails; nothing is written in that case.
    pub async fn apply_batch(&self, plan: BatchPlan) -> Result<(), StoreError> {
        if plan.is_empty() {
            return Ok(());
        }

        self.with_conn(move |conn| {
            let tx = conn.transaction()?;

            for (id, ended_at) in &plan.closed {
                tx.execute(
                    "UPDATE matches SET status = 'closed', ended_at = ?1 WHERE id = ?2 AND status = 'open'",
                    params![ended_at.to_rfc3339(), id.to_string()],
                )?;
            }

            for record in &plan.opened {
                insert_match(&tx, record)?;
            }

            for (id, meta) in &plan.meta_updates {
                update_meta(&tx, *id, meta)?;
            }

            {
                let mut line_stmt = tx.prepare(
                    "INSERT INTO log_lines (match_id, seq, text, source, received_at, turn)
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                )?;
                for line in &plan.lines {
                    line_stmt.execute(params![
                        line.match_id.to_string(),
                        line.seq,
                        line.text,
                        line.source.as_str(),
                        line.received_at.to_rfc3339(),
                        line.turn,
                    ])?;
                }

                let mut event_stmt = tx.prepare(
                    "INSERT INTO events (match_id, seq, kind, subject, value, value_low, value_high, attacker, move_name, owner)
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
                )?;
                for event in &plan.events {
                    event_stmt.execute(params![
                        event.match_id.to_string(),
                        event.seq,
                        event.kind.as_str(),
                        event.subject,
                        event.value,
                        event.damage.map(|d| d.low),
                        event.damage.map(|d| d.high.unwrap_or(d.low)),
                        event.attacker,
                        event.move_name,
                        event.owner.as_str(),
                    ])?;
                }
            }

            tx.commit()?;
            Ok(())
        })
        .await
    }

    /// Close a match if it is open.
    ///
    /// Returns `true` when the match transitioned to closed.
    ///
    /// # Errors
    ///
    /// Returns `UnknownMatch` if no such match exists.
    pub async fn close_match(
        &self,
        match_id: Uuid,
        ended_at: DateTime<Utc>,
    ) -> Result<bool, StoreError> {
        self.with_conn(move |conn| {
            let exists: Option<String> = conn
                .query_row(
                    "SELECT status FROM matches WHERE id = ?1",
                    params![match_id.to_string()],
                    |row| row.get(0),
                )
                .optional()?;
            if exists.is_none() {
                return Err(StoreError::UnknownMatch(match_id));
            }
            let updated = conn.execute(
                "UPDATE matches SET status = 'closed', ended_at = ?1 WHERE id = ?2 AND status = 'open'",
                params![ended_at.to_rfc3339(), match_id.to_string()],
            )?;
            Ok(updated > 0)
        })
        .await
    }

    /// Replace a match's roster and re-derive every event owner in one transaction.
    ///
    /// `resolve` receives each event's subject and raw line.
    ///
    /// # Errors
    ///
    /// Returns `UnknownMatch` if no such match exists, or a query error.
    pub async fn replace_roster<F>(
        &self,
        match_id: Uuid,
        roster: Roster,
        resolve: F,
    ) -> Result<ResolutionReport, StoreError>
    where
        F: Fn(Option<&str>, &str) -> Owner + Send + 'static,
    {
        self.with_conn(move |conn| {
            let tx = conn.transaction()?;
            let id = match_id.to_string();

            let updated = tx.execute(
                "UPDATE matches SET my_side = ?1 WHERE id = ?2",
                params![roster.my_side.map(|s| s.as_str()), id],
            )?;
            if updated == 0 {
                return Err(StoreError::UnknownMatch(match_id));
            }

            tx.execute(
                "DELETE FROM match_nicknames WHERE match_id = ?1",
                params![id],
            )?;
            insert_roster(&tx, match_id, &roster)?;

            let rows = {
                let mut stmt = tx.prepare(
                    "SELECT e.seq, e.subject, l.text, e.owner
                     FROM events e JOIN log_lines l ON l.match_id = e.match_id AND l.seq = e.seq
                     WHERE e.match_id = ?1 ORDER BY e.seq ASC",
                )?;
                let rows = stmt
                    .query_map(params![id], |row| {
                        Ok((
                            row.get::<_, u64>(0)?,
                            row.get::<_, Option<String>>(1)?,
                            row.get::<_, String>(2)?,
                            row.get::<_, String>(3)?,
                        ))
                    })?
                    .collect::<Result<Vec<_>, _>>()?;
                rows
            };

            let mut report = ResolutionReport {
                total: 0,
                changed: 0,
            };
            {
                let mut update =
                    tx.prepare("UPDATE events SET owner = ?1 WHERE match_id = ?2 AND seq = ?3")?;
                for (seq, subject, text, current) in rows {
                    report.total += 1;
                    let owner = resolve(subject.as_deref(), &text);
                    if owner.as_str() != current {
                        update.execute(params![owner.as_str(), id, seq])?;
                        report.changed += 1;
                    }
                }
            }

            tx.commit()?;
            Ok(report)
        })
        .await
    }

    /// Fetch a match with its roster.
    ///
    /// # Errors
    ///
    /// Returns an error if the query fails.
    pub async fn get_match(&self, match_id: Uuid) -> Result<Option<Match>, StoreError> {
        self.with_conn(move |conn| {
            let record = conn
                .query_row(
                    &format!("SELECT {MATCH_COLUMNS} FROM matches WHERE id = ?1"),
                    params![match_id.to_string()],
                    match_from_row,
                )
                .optional()?;
            match record {
                Some(mut record) => {
                    record.roster = load_roster(conn, match_id, record.roster.my_side)?;
                    Ok(Some(record))
                }
                None => Ok(None),
            }
        })
        .await
    }

    /// List matches, newest first.
    ///
    /// # Errors
    ///
    /// Returns an error if the query fails.
    pub async fn list_matches(&self, limit: usize) -> Result<Vec<Match>, StoreError> {
        self.with_conn(move |conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT {MATCH_COLUMNS} FROM matches ORDER BY started_at DESC, rowid DESC LIMIT ?1"
            ))?;
            let mut matches = stmt
                .query_map(params![to_sql_limit(limit)], match_from_row)?
                .collect::<Result<Vec<_>, _>>()?;
            for record in &mut matches {
                record.roster = load_roster(conn, record.id, record.roster.my_side)?;
            }
            Ok(matches)
        })
        .await
    }

    /// Find the open match of a stream with its last sequence number and turn.
    ///
    /// # Errors
    ///
    /// Returns an error if the query fails.
    pub async fn open_match_for_stream(
        &self,
        stream: &str,
    ) -> Result<Option<OpenMatchState>, StoreError> {
        let stream = stream.to_string();
        self.with_conn(move |conn| {
            let record = conn
                .query_row(
                    &format!(
                        "SELECT {MATCH_COLUMNS} FROM matches WHERE stream = ?1 AND status = 'open'"
                    ),
                    params![stream],
                    match_from_row,
                )
                .optional()?;
            let Some(mut record) = record else {
                return Ok(None);
            };
            record.roster = load_roster(conn, record.id, record.roster.my_side)?;

            let (last_seq, last_turn): (Option<u64>, Option<u32>) = conn.query_row(
                "SELECT MAX(seq), (SELECT turn FROM log_lines WHERE match_id = ?1 ORDER BY seq DESC LIMIT 1)
                 FROM log_lines WHERE match_id = ?1",
                params![record.id.to_string()],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )?;

            Ok(Some(OpenMatchState {
                record,
                last_seq: last_seq.unwrap_or(0),
                last_turn,
            }))
        })
        .await
    }

    /// Get lines of a match in sequence order.
    ///
    /// # Errors
    ///
    /// Returns an error if the query fails.
    pub async fn get_lines(
        &self,
        match_id: Uuid,
        limit: usize,
        offset: usize,
    ) -> Result<Vec<LogLine>, StoreError> {
        self.with_conn(move |conn| {
            let mut stmt = conn.prepare(
                "SELECT match_id, seq, text, source, received_at, turn
                 FROM log_lines WHERE match_id = ?1 ORDER BY seq ASC LIMIT ?2 OFFSET ?3",
            )?;
            let lines = stmt
                .query_map(
                    params![match_id.to_string(), to_sql_limit(limit), to_sql_limit(offset)],
                    line_from_row,
                )?
                .collect::<Result<Vec<_>, _>>()?;
            Ok(lines)
        })
        .await
    }

    /// Texts of the most recent lines of a match, oldest first.
    ///
    /// # Errors
    ///
    /// Returns an error if the query fails.
    pub async fn recent_lines(
        &self,
        match_id: Uuid,
        limit: usize,
    ) -> Result<Vec<String>, StoreError> {
        self.with_conn(move |conn| {
            let mut stmt = conn.prepare(
                "SELECT text FROM (
                    SELECT seq, text FROM log_lines WHERE match_id = ?1 ORDER BY seq DESC LIMIT ?2
                 ) ORDER BY seq ASC",
            )?;
            let texts = stmt
                .query_map(params![match_id.to_string(), to_sql_limit(limit)], |row| {
                    row.get(0)
                })?
                .collect::<Result<Vec<String>, _>>()?;
            Ok(texts)
        })
        .await
    }

    /// Get events of a match in sequence order.
    ///
    /// # Errors
    ///
    /// Returns an error if the query fails.
    pub async fn get_events(
        &self,
        match_id: Uuid,
        query: EventQuery,
    ) -> Result<Vec<Event>, StoreError> {
        self.with_conn(move |conn| {
            let mut stmt = conn.prepare(
                "SELECT match_id, seq, kind, subject, value, value_low, value_high, attacker, move_name, owner
                 FROM events
                 WHERE match_id = ?1 AND (?2 IS NULL OR kind = ?2) AND (?3 IS NULL OR owner = ?3)
                 ORDER BY seq ASC LIMIT ?4 OFFSET ?5",
            )?;
            let events = stmt
                .query_map(
                    params![
                        match_id.to_string(),
                        query.kind.map(|k| k.as_str()),
                        query.owner.map(|o| o.as_str()),
                        to_sql_limit(query.limit),
                        to_sql_limit(query.offset),
                    ],
                    event_from_row,
                )?
                .collect::<Result<Vec<_>, _>>()?;
            Ok(events)
        })
        .await
    }

    /// Count total events in the database.
    ///
    /// # Errors
    ///
    /// Returns an error if the query fails.
    pub async fn count_events(&self) -> Result<u64, StoreError> {
        self.with_conn(|conn| {
            let count: i64 = conn.query_row("SELECT COUNT(*) FROM events", [], |row| row.get(0))?;
            Ok(count.unsigned_abs())
        })
        .await
    }

    /// Store-wide totals and damage figures.
    ///
    /// # Errors
    ///
    /// Returns an error if the query fails.
    pub async fn stats(&self) -> Result<StoreStats, StoreError> {
        self.with_conn(|conn| {
            let count = |sql: &str| -> Result<u64, StoreError> {
                let n: i64 = conn.query_row(sql, [], |row| row.get(0))?;
                Ok(n.unsigned_abs())
            };

            let mut stats = StoreStats {
                matches: count("SELECT COUNT(*) FROM matches")?,
                open_matches: count("SELECT COUNT(*) FROM matches WHERE status = 'open'")?,
                lines: count("SELECT COUNT(*) FROM log_lines")?,
                item_events: count("SELECT COUNT(*) FROM events WHERE kind = 'item'")?,
                damage_events: count("SELECT COUNT(*) FROM events WHERE kind = 'damage'")?,
                raw_events: count("SELECT COUNT(*) FROM events WHERE kind = 'raw'")?,
                damage: DamageStats::default(),
            };

            stats.damage = conn.query_row(
                "SELECT COUNT(*), MIN(value_low), MAX(value_high), AVG((value_low + value_high) / 2.0)
                 FROM events
                 WHERE kind = 'damage' AND value_low IS NOT NULL AND value_high IS NOT NULL",
                [],
                |row| {
                    let hits: i64 = row.get(0)?;
                    Ok(DamageStats {
                        hits: hits.unsigned_abs(),
                        min: row.get(1)?,
                        max: row.get(2)?,
                        avg: row.get(3)?,
                    })
                },
            )?;

            Ok(stats)
        })
        .await
    }

    /// Attributed damage events with their match's replay URL, optionally
    /// restricted to one match.
    ///
    /// # Errors
    ///
    /// Returns an error if the query fails.
    pub async fn damage_samples(
        &self,
        match_id: Option<Uuid>,
    ) -> Result<Vec<DamageSample>, StoreError> {
        self.with_conn(move |conn| {
            let mut stmt = conn.prepare(
                "SELECT e.attacker, e.subject, e.move_name, e.value_low, e.value_high, m.replay_url
                 FROM events e JOIN matches m ON m.id = e.match_id
                 WHERE e.kind = 'damage'
                   AND e.attacker IS NOT NULL AND e.subject IS NOT NULL
                   AND e.value_low IS NOT NULL AND e.value_high IS NOT NULL
                   AND (?1 IS NULL OR e.match_id = ?1)
                 ORDER BY m.started_at ASC, e.seq ASC",
            )?;
            let samples = stmt
                .query_map(params![match_id.map(|id| id.to_string())], |row| {
                    Ok(DamageSample {
                        attacker: row.get(0)?,
                        defender: row.get(1)?,
                        move_name: row.get(2)?,
                        low: row.get(3)?,
                        high: row.get(4)?,
                        replay_url: row.get(5)?,
                    })
                })?
                .collect::<Result<Vec<_>, _>>()?;
            Ok(samples)
        })
        .await
    }

    /// Per-move damage between two participants, in both directions.
    ///
    /// # Errors
    ///
    /// Returns an error if the query fails.
    pub async fn damage_breakdown(
        &self,
        attacker: &str,
        defender: &str,
        match_id: Option<Uuid>,
    ) -> Result<DamageBreakdown, StoreError> {
        let samples = self.damage_samples(match_id).await?;
        Ok(DamageBreakdown::build(&samples, attacker, defender, match_id))
    }

    /// Distinct attacker and defender names seen in attributed damage.
    ///
    /// # Errors
    ///
    /// Returns an error if the query fails.
    pub async fn damage_participants(
        &self,
        match_id: Option<Uuid>,
    ) -> Result<Vec<String>, StoreError> {
        let samples = self.damage_samples(match_id).await?;
        let mut seen = BTreeMap::new();
        for name in samples
            .iter()
            .flat_map(|s| [s.attacker.trim(), s.defender.trim()])
        {
            seen.entry(normalize_participant(name))
                .or_insert_with(|| name.to_string());
        }
        Ok(seen.into_values().collect())
    }
}

const MATCH_COLUMNS: &str = "id, stream, source, status, started_at, ended_at, format, player1, player2, winner, result, replay_url, my_side";

fn to_sql_limit(value: usize) -> i64 {
    i64::try_from(value).unwrap_or(i64::MAX)
}

fn parse_timestamp(value: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(value).map_or_else(|_| Utc::now(), |dt| dt.with_timezone(&Utc))
}

fn parse_uuid(value: &str) -> Uuid {
    Uuid::parse_str(value).unwrap_or_else(|_| Uuid::nil())
}

fn insert_match(tx: &Transaction<'_>, record: &Match) -> Result<(), StoreError> {
    tx.execute(
        "INSERT INTO matches (id, stream, source, status, started_at, ended_at, format, player1, player2, winner, result, replay_url, my_side)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13)",
        params![
            record.id.to_string(),
            record.stream,
            record.source.as_str(),
            record.status.as_str(),
            record.started_at.to_rfc3339(),
            record.ended_at.map(|t| t.to_rfc3339()),
            record.meta.format,
            record.meta.player1,
            record.meta.player2,
            record.meta.winner,
            record.result.map(|r| r.as_str()),
            record.replay_url,
            record.roster.my_side.map(|s| s.as_str()),
        ],
    )?;
    insert_roster(tx, record.id, &record.roster)
}

fn insert_roster(tx: &Transaction<'_>, match_id: Uuid, roster: &Roster) -> Result<(), StoreError> {
    let mut stmt = tx.prepare(
        "INSERT OR IGNORE INTO match_nicknames (match_id, side, nickname) VALUES (?1, ?2, ?3)",
    )?;
    let id = match_id.to_string();
    for name in roster.mine.iter() {
        stmt.execute(params![id, Owner::Mine.as_str(), name])?;
    }
    for name in roster.opponent.iter() {
        stmt.execute(params![id, Owner::Opponent.as_str(), name])?;
    }
    Ok(())
}

fn update_meta(tx: &Transaction<'_>, match_id: Uuid, meta: &MatchMeta) -> Result<(), StoreError> {
    tx.execute(
        "UPDATE matches SET
            format = COALESCE(?1, format),
            player1 = COALESCE(?2, player1),
            player2 = COALESCE(?3, player2),
            winner = COALESCE(?4, winner),
            result = COALESCE(?5, result)
         WHERE id = ?6",
        params![
            meta.format,
            meta.player1,
            meta.player2,
            meta.winner,
            meta.result().map(|r| r.as_str()),
            match_id.to_string(),
        ],
    )?;
    Ok(())
}

fn load_roster(
    conn: &Connection,
    match_id: Uuid,
    my_side: Option<Side>,
) -> Result<Roster, StoreError> {
    let mut stmt =
        conn.prepare("SELECT side, nickname FROM match_nicknames WHERE match_id = ?1")?;
    let rows = stmt
        .query_map(params![match_id.to_string()], |row| {
            Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?))
        })?
        .collect::<Result<Vec<_>, _>>()?;

    let mut mine = NicknameSet::new();
    let mut opponent = NicknameSet::new();
    for (side, name) in rows {
        if side == Owner::Mine.as_str() {
            mine.insert(&name);
        } else {
            opponent.insert(&name);
        }
    }
    Ok(Roster::new(mine, opponent).with_side(my_side))
}

fn match_from_row(row: &Row<'_>) -> rusqlite::Result<Match> {
    let id: String = row.get(0)?;
    let source: String = row.get(2)?;
    let status: String = row.get(3)?;
    let started_at: String = row.get(4)?;
    let ended_at: Option<String> = row.get(5)?;
    let result: Option<String> = row.get(10)?;
    let my_side: Option<String> = row.get(12)?;

    Ok(Match {
        id: parse_uuid(&id),
        stream: row.get(1)?,
        source: SourceTag::from_db(&source),
        status: MatchStatus::from_db(&status),
        started_at: parse_timestamp(&started_at),
        ended_at: ended_at.as_deref().map(parse_timestamp),
        meta: MatchMeta {
            format: row.get(6)?,
            player1: row.get(7)?,
            player2: row.get(8)?,
            winner: row.get(9)?,
        },
        result: result.as_deref().and_then(MatchResult::from_db),
        replay_url: row.get(11)?,
        roster: Roster::default().with_side(my_side.and_then(|s| s.parse().ok())),
    })
}

fn line_from_row(row: &Row<'_>) -> rusqlite::Result<LogLine> {
    let match_id: String = row.get(0)?;
    let source: String = row.get(3)?;
    let received_at: String = row.get(4)?;
    Ok(LogLine {
        match_id: parse_uuid(&match_id),
        seq: row.get(1)?,
        text: row.get(2)?,
        source: SourceTag::from_db(&source),
        received_at: parse_timestamp(&received_at),
        turn: row.get(5)?,
    })
}

fn event_from_row(row: &Row<'_>) -> rusqlite::Result<Event> {
    let match_id: String = row.get(0)?;
    let kind: String = row.get(2)?;
    let low: Option<f64> = row.get(5)?;
    let high: Option<f64> = row.get(6)?;
    let owner: String = row.get(9)?;

    let damage = low.map(|low| DamageRange {
        low,
        high: high.filter(|h| (h - low).abs() > f64::EPSILON),
    });

    Ok(Event {
        match_id: parse_uuid(&match_id),
        seq: row.get(1)?,
        kind: kind.parse().unwrap_or(EventKind::Raw),
        subject: row.get(3)?,
        value: row.get(4)?,
        damage,
        attacker: row.get(7)?,
        move_name: row.get(8)?,
        owner: owner.parse().unwrap_or(Owner::Unknown),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn line(match_id: Uuid, seq: u64, text: &str) -> LogLine {
        LogLine {
            match_id,
            seq,
            text: text.to_string(),
            source: SourceTag::Push,
            received_at: Utc::now(),
            turn: None,
        }
    }

    fn raw_event(match_id: Uuid, seq: u64) -> Event {
        Event {
            match_id,
            seq,
            kind: EventKind::Raw,
            subject: None,
            value: None,
            damage: None,
            attacker: None,
            move_name: None,
            owner: Owner::Unknown,
        }
    }

    fn item_event(match_id: Uuid, seq: u64, subject: &str) -> Event {
        Event {
            kind: EventKind::Item,
            subject: Some(subject.to_string()),
            value: Some("Leftovers".to_string()),
            ..raw_event(match_id, seq)
        }
    }

    async fn seeded_store() -> (MatchStore, Uuid) {
        let store = MatchStore::open_in_memory().await.unwrap();
        let record = Match::open("live", SourceTag::Push);
        let id = record.id;
        store
            .apply_batch(BatchPlan {
                opened: vec![record],
                lines: vec![
                    line(id, 1, "Foo's Leftovers restored a little HP!"),
                    line(id, 2, "Bar's Leftovers restored a little HP!"),
                    line(id, 3, "Turn 2"),
                ],
                events: vec![
                    item_event(id, 1, "Foo"),
                    item_event(id, 2, "Bar"),
                    raw_event(id, 3),
                ],
                ..BatchPlan::default()
            })
            .await
            .unwrap();
        (store, id)
    }

    #[tokio::test]
    async fn test_open_in_memory() {
        let store = MatchStore::open_in_memory().await.unwrap();
        assert!(store.path().is_none());
        assert_eq!(store.count_events().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_apply_batch_persists_lines_and_events() {
        let (store, id) = seeded_store().await;

        let lines = store.get_lines(id, 100, 0).await.unwrap();
        assert_eq!(lines.len(), 3);
        assert_eq!(lines[0].seq, 1);
        assert_eq!(lines[2].text, "Turn 2");

        let events = store
            .get_events(
                id,
                EventQuery {
                    kind: Some(EventKind::Item),
                    limit: 100,
                    ..EventQuery::default()
                },
            )
            .await
            .unwrap();
        assert_eq!(events.len(), 2);
        assert_eq!(events[0].subject.as_deref(), Some("Foo"));
    }

    #[tokio::test]
    async fn test_apply_batch_is_atomic() {
        let (store, id) = seeded_store().await;

        // Duplicate seq violates the primary key; the whole batch must roll back
        let result = store
            .apply_batch(BatchPlan {
                lines: vec![line(id, 4, "new line"), line(id, 1, "dup seq")],
                events: vec![raw_event(id, 4)],
                ..BatchPlan::default()
            })
            .await;
        assert!(result.is_err());

        let lines = store.get_lines(id, 100, 0).await.unwrap();
        assert_eq!(lines.len(), 3);
    }

    #[tokio::test]
    async fn test_open_match_for_stream() {
        let (store, id) = seeded_store().await;

        let open = store.open_match_for_stream("live").await.unwrap().unwrap();
        assert_eq!(open.record.id, id);
        assert_eq!(open.last_seq, 3);

        assert!(store.open_match_for_stream("other").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_close_match() {
        let (store, id) = seeded_store().await;

        assert!(store.close_match(id, Utc::now()).await.unwrap());
        assert!(!store.close_match(id, Utc::now()).await.unwrap());

        let record = store.get_match(id).await.unwrap().unwrap();
        assert_eq!(record.status, MatchStatus::Closed);
        assert!(record.ended_at.is_some());

        let missing = store.close_match(Uuid::new_v4(), Utc::now()).await;
        assert!(matches!(missing, Err(StoreError::UnknownMatch(_))));
    }

    #[tokio::test]
    async fn test_replace_roster_reresolves() {
        let (store, id) = seeded_store().await;

        let roster = Roster::new(NicknameSet::parse("foo"), NicknameSet::new());
        let report = store
            .replace_roster(id, roster.clone(), |subject, _raw| match subject {
                Some(s) if s.eq_ignore_ascii_case("foo") => Owner::Mine,
                _ => Owner::Unknown,
            })
            .await
            .unwrap();
        assert_eq!(report.total, 3);
        assert_eq!(report.changed, 1);

        let record = store.get_match(id).await.unwrap().unwrap();
        assert!(record.roster.mine.contains("Foo"));

        let mine = store
            .get_events(
                id,
                EventQuery {
                    owner: Some(Owner::Mine),
                    limit: 10,
                    ..EventQuery::default()
                },
            )
            .await
            .unwrap();
        assert_eq!(mine.len(), 1);
        assert_eq!(mine[0].seq, 1);
    }

    #[tokio::test]
    async fn test_replace_roster_unknown_match() {
        let store = MatchStore::open_in_memory().await.unwrap();
        let result = store
            .replace_roster(Uuid::new_v4(), Roster::default(), |_, _| Owner::Unknown)
            .await;
        assert!(matches!(result, Err(StoreError::UnknownMatch(_))));
    }

    #[tokio::test]
    async fn test_recent_lines_oldest_first() {
        let (store, id) = seeded_store().await;
        let recent = store.recent_lines(id, 2).await.unwrap();
        assert_eq!(
            recent,
            vec![
                "Bar's Leftovers restored a little HP!".to_string(),
                "Turn 2".to_string()
            ]
        );
    }

    #[tokio::test]
    async fn test_stats_damage_figures() {
        let store = MatchStore::open_in_memory().await.unwrap();
        let record = Match::open("bulk-1", SourceTag::Bulk);
        let id = record.id;
        let damage = |seq, low, high| Event {
            kind: EventKind::Damage,
            subject: Some("Gengar".to_string()),
            damage: Some(DamageRange { low, high }),
            ..raw_event(id, seq)
        };
        store
            .apply_batch(BatchPlan {
                opened: vec![record],
                lines: vec![line(id, 1, "a"), line(id, 2, "b")],
                events: vec![damage(1, 10.0, Some(20.0)), damage(2, 40.0, None)],
                ..BatchPlan::default()
            })
            .await
            .unwrap();

        let stats = store.stats().await.unwrap();
        assert_eq!(stats.matches, 1);
        assert_eq!(stats.damage_events, 2);
        assert_eq!(stats.damage.hits, 2);
        assert_eq!(stats.damage.min, Some(10.0));
        assert_eq!(stats.damage.max, Some(40.0));

        let events = store
            .get_events(
                id,
                EventQuery {
                    limit: 10,
                    ..EventQuery::default()
                },
            )
            .await
            .unwrap();
        assert_eq!(events[0].damage.unwrap().high, Some(20.0));
        assert_eq!(events[1].damage.unwrap().high, None);
    }

    async fn damage_store() -> (MatchStore, Uuid, Uuid) {
        let store = MatchStore::open_in_memory().await.unwrap();
        let mut replay = Match::open("replay:gen9ou-1", SourceTag::Replay);
        replay.replay_url = Some("https://replay.example.com/gen9ou-1".to_string());
        let live = Match::open("live", SourceTag::Push);
        let (replay_id, live_id) = (replay.id, live.id);

        let hit = |match_id, seq, attacker: &str, defender: &str, mv: Option<&str>, low, high| Event {
            kind: EventKind::Damage,
            subject: Some(defender.to_string()),
            damage: Some(DamageRange { low, high }),
            attacker: Some(attacker.to_string()),
            move_name: mv.map(str::to_string),
            ..raw_event(match_id, seq)
        };
        let unattributed = Event {
            kind: EventKind::Damage,
            subject: Some("Gengar".to_string()),
            damage: Some(DamageRange { low: 90.0, high: None }),
            ..raw_event(live_id, 3)
        };

        store
            .apply_batch(BatchPlan {
                opened: vec![replay, live],
                lines: vec![
                    line(replay_id, 1, "a"),
                    line(replay_id, 2, "b"),
                    line(live_id, 1, "c"),
                    line(live_id, 2, "d"),
                    line(live_id, 3, "e"),
                ],
                events: vec![
                    hit(replay_id, 1, "Garchomp", "Gengar", Some("Earthquake"), 37.0, None),
                    hit(replay_id, 2, "Gengar", "Garchomp", Some("Shadow Ball"), 20.0, None),
                    hit(live_id, 1, "garchomp", "Gengar", Some("Earthquake"), 30.0, Some(45.0)),
                    hit(live_id, 2, "Garchomp", "Gengar", None, 12.0, None),
                    unattributed,
                ],
                ..BatchPlan::default()
            })
            .await
            .unwrap();
        (store, replay_id, live_id)
    }

    #[tokio::test]
    async fn test_damage_breakdown_across_matches() {
        let (store, _, _) = damage_store().await;

        let breakdown = store
            .damage_breakdown("Garchomp", "gengar", None)
            .await
            .unwrap();
        assert_eq!(breakdown.forward.len(), 2);
        let earthquake = &breakdown.forward[0];
        assert_eq!(earthquake.move_name, "Earthquake");
        assert_eq!(earthquake.count, 2);
        assert_eq!(earthquake.min_low, 30.0);
        assert_eq!(earthquake.max_high, 45.0);
        assert_eq!(
            earthquake.replay_url.as_deref(),
            Some("https://replay.example.com/gen9ou-1")
        );
        assert_eq!(breakdown.forward[1].move_name, "-");
        assert_eq!(breakdown.reverse.len(), 1);
        assert_eq!(breakdown.summary.count, 3);
        assert_eq!(breakdown.summary.min_low, Some(12.0));
    }

    #[tokio::test]
    async fn test_damage_breakdown_single_match() {
        let (store, _, live_id) = damage_store().await;

        let breakdown = store
            .damage_breakdown("Garchomp", "Gengar", Some(live_id))
            .await
            .unwrap();
        assert_eq!(breakdown.match_id, Some(live_id));
        assert_eq!(breakdown.summary.count, 2);
        assert!(breakdown.reverse.is_empty());
        assert_eq!(breakdown.forward[0].replay_url, None);
    }

    #[tokio::test]
    async fn test_damage_participants() {
        let (store, replay_id, _) = damage_store().await;

        let names: Vec<String> = store
            .damage_participants(None)
            .await
            .unwrap()
            .iter()
            .map(|n| n.to_lowercase())
            .collect();
        assert_eq!(names, vec!["garchomp".to_string(), "gengar".to_string()]);
        assert_eq!(store.damage_participants(Some(replay_id)).await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_open_creates_parent_dirs() {
        let temp_dir = tempfile::tempdir().unwrap();
        let db_path = temp_dir.path().join("nested").join("recorder.db");

        let store = MatchStore::open(&db_path).await.unwrap();
        assert_eq!(store.path(), Some(db_path.as_path()));
        assert!(db_path.exists());
    }

    #[test]
    fn test_default_db_path() {
        assert!(default_db_path().ends_with("battle-recorder/recorder.db"));
    }
}
