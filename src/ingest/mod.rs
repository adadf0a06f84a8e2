//! Ingestion core: normalization, classification, owner attribution and
//! match sessions, glued together by [`Recorder`].

pub mod classifier;
pub mod combat;
mod error;
pub mod markers;
pub mod normalizer;
pub mod owner;
mod pipeline;
mod session;

pub use classifier::{classify, Classified, Classifier, Matcher, Rule};
pub use combat::{parse_hp, CombatState};
pub use error::IngestError;
pub use normalizer::{
    collapse_whitespace, line_digest, DedupCache, LineNormalizer, DEFAULT_DEDUP_CAPACITY,
};
pub use owner::resolve;
pub use pipeline::{
    IngestNotice, IngestReport, Recorder, RecorderOptions, DEFAULT_NOTICE_CHANNEL_CAPACITY,
};
pub use session::{
    Accepted, BatchSummary, OpenMatch, OpenStream, SessionManager, StreamBatch, StreamState,
    LIVE_STREAM,
};
