//! Configuration types.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::ingest::DEFAULT_DEDUP_CAPACITY;
use crate::source::{WatchTarget, WatcherConfig};

/// Default port for the HTTP API.
pub const DEFAULT_PORT: u16 = 5000;

/// Default watcher poll interval in milliseconds.
pub const DEFAULT_POLL_INTERVAL_MS: u64 = 500;

/// File name of the default replay queue inside the data directory.
pub const REPLAY_QUEUE_NAME: &str = "replays.txt";

/// Top-level recorder configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RecorderConfig {
    pub server: ServerConfig,
    pub store: StoreConfig,
    pub ingest: IngestConfig,
    pub watcher: WatcherSettings,
}

/// HTTP server settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    /// Send permissive CORS headers (the browser observer posts cross-origin).
    pub cors_permissive: bool,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: DEFAULT_PORT,
            cors_permissive: true,
        }
    }
}

impl ServerConfig {
    /// Address to bind, `host:port`.
    #[must_use]
    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

/// Database location.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    /// Database file. Defaults to the user data directory.
    pub db_path: Option<PathBuf>,
    /// Directory for the database and the fallback live log.
    pub data_dir: Option<PathBuf>,
}

impl StoreConfig {
    /// Effective database path.
    #[must_use]
    pub fn resolved_db_path(&self) -> PathBuf {
        if let Some(path) = &self.db_path {
            return path.clone();
        }
        match &self.data_dir {
            Some(dir) => dir.join("recorder.db"),
            None => crate::store::default_db_path(),
        }
    }
}

/// Pipeline settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct IngestConfig {
    /// Lines remembered per match for re-delivery suppression.
    pub dedup_capacity: usize,
    /// Nicknames that every new match starts with as `mine`.
    pub default_mine: Vec<String>,
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            dedup_capacity: DEFAULT_DEDUP_CAPACITY,
            default_mine: Vec::new(),
        }
    }
}

/// Log watcher settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct WatcherSettings {
    /// Fixed log file to tail.
    pub log_path: Option<PathBuf>,
    /// Directory whose newest `.txt` is followed. Takes priority over `log_path`.
    pub log_dir: Option<PathBuf>,
    /// Ingestion endpoint for `watch` when it posts to a running server.
    pub api_url: String,
    pub poll_interval_ms: u64,
    pub stop_on_missing: bool,
    /// Queue file of replay URLs to import.
    pub replay_file: Option<PathBuf>,
    /// Watch only the replay queue, not a chat log.
    pub replay_mode: bool,
    /// Replay import endpoint for `watch` when it posts to a running server.
    pub replay_api_url: String,
}

impl Default for WatcherSettings {
    fn default() -> Self {
        Self {
            log_path: None,
            log_dir: None,
            api_url: format!("http://127.0.0.1:{DEFAULT_PORT}/api/ingest_line"),
            poll_interval_ms: DEFAULT_POLL_INTERVAL_MS,
            stop_on_missing: false,
            replay_file: None,
            replay_mode: false,
            replay_api_url: format!("http://127.0.0.1:{DEFAULT_PORT}/api/ingest_replay"),
        }
    }
}

impl WatcherSettings {
    /// Pick what to watch: the configured directory, the configured file,
    /// an auto-detected client log directory, or `fallback`.
    #[must_use]
    pub fn target(&self, detected_dirs: &[PathBuf], fallback: PathBuf) -> WatchTarget {
        if let Some(dir) = &self.log_dir {
            return WatchTarget::Directory(dir.clone());
        }
        if let Some(path) = &self.log_path {
            return WatchTarget::File(path.clone());
        }
        if let Some(dir) = detected_dirs.first() {
            return WatchTarget::Directory(dir.clone());
        }
        WatchTarget::File(fallback)
    }

    /// Replay queue to poll, if any. Replay mode falls back to
    /// `replays.txt` in `data_dir` when no file is configured.
    #[must_use]
    pub fn replay_queue(&self, data_dir: &Path) -> Option<PathBuf> {
        match (&self.replay_file, self.replay_mode) {
            (Some(path), _) => Some(path.clone()),
            (None, true) => Some(data_dir.join(REPLAY_QUEUE_NAME)),
            (None, false) => None,
        }
    }

    /// Build the watcher configuration for a target.
    #[must_use]
    pub fn watcher_config(&self, target: WatchTarget) -> WatcherConfig {
        WatcherConfig {
            poll_interval: Duration::from_millis(self.poll_interval_ms.max(1)),
            stop_on_missing: self.stop_on_missing,
            ..WatcherConfig::new(target)
        }
    }
}
