//! Line sources: file tailing, directory following, bulk splitting,
//! replay fetching and the replay queue file.

mod bulk;
mod discovery;
mod error;
mod replay;
mod replay_queue;
mod tailer;
mod watcher;

pub use bulk::split_bulk;
pub use discovery::{
    candidate_log_dirs, default_log_dirs, find_latest_log, load_offset, offset_path, save_offset,
    LOG_EXTENSION,
};
pub use error::SourceError;
pub use replay::{normalize_replay_url, strip_replay_json, Replay, ReplayClient};
pub use replay_queue::{
    extract_replay_urls, HttpReplaySink, QueueReport, RecorderReplaySink, ReplayQueue, ReplaySink,
    DEFAULT_QUEUE_INTERVAL,
};
pub use tailer::{LogTailer, PendingLines};
pub use watcher::{
    HttpLineSink, LineSink, LogWatcher, PollOutcome, RecorderSink, WatchTarget, WatcherConfig,
    WatcherStatus, DEFAULT_POLL_INTERVAL,
};
