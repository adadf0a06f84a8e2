//! Persistence gateway: durable storage for matches, lines and events.

mod damage;
mod error;
mod gateway;
mod schema;
mod types;

pub use damage::{
    group_by_move, normalize_participant, DamageBreakdown, DamageSample, DamageSummary, MoveDamage,
};
pub use error::StoreError;
pub use gateway::{
    default_db_path, BatchPlan, DamageStats, EventQuery, MatchStore, OpenMatchState,
    ResolutionReport, StoreStats,
};
pub use schema::{SCHEMA, SCHEMA_VERSION};
pub use types::{
    normalize_nickname, DamageRange, Event, EventKind, LogLine, Match, MatchMeta, MatchResult,
    MatchStatus, NicknameSet, Owner, Roster, Side, SourceTag,
};
