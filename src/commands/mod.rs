//! Subcommand implementations behind the CLI.

mod import;
mod serve;
mod watch;

use std::path::PathBuf;
use std::sync::Arc;

pub use import::{import_file, import_replay};
pub use serve::serve;
pub use watch::watch;

use crate::config::{ConfigError, RecorderConfig};
use crate::ingest::{IngestError, Recorder, RecorderOptions};
use crate::server::ServerError;
use crate::source::{default_log_dirs, SourceError, WatchTarget};
use crate::store::{MatchStore, StoreError};

/// File name of the fallback live log inside the data directory.
pub const FALLBACK_LOG_NAME: &str = "live_log.txt";

/// Errors surfaced by a subcommand.
#[derive(Debug, thiserror::Error)]
pub enum CommandError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Source(#[from] SourceError),

    #[error(transparent)]
    Ingest(#[from] IngestError),

    #[error(transparent)]
    Server(#[from] ServerError),

    /// Input file could not be read.
    #[error("Failed to read {path}: {source}")]
    ReadInput {
        path: PathBuf,
        source: std::io::Error,
    },
}

/// Open the configured store and build a recorder over it.
///
/// # Errors
///
/// Returns an error if the database cannot be opened.
pub async fn open_recorder(config: &RecorderConfig) -> Result<Arc<Recorder>, CommandError> {
    let db_path = config.store.resolved_db_path();
    let store = MatchStore::open(&db_path).await?;
    tracing::info!(path = %db_path.display(), "Opened match store");

    let options = RecorderOptions {
        dedup_capacity: config.ingest.dedup_capacity,
        default_mine: config.ingest.default_mine.iter().map(String::as_str).collect(),
    };
    Ok(Arc::new(Recorder::with_options(store, options)))
}

/// Resolve what the watcher follows from config, detected client
/// directories, and the fallback live log.
#[must_use]
pub fn watch_target(config: &RecorderConfig) -> WatchTarget {
    let fallback = config.data_dir().join(FALLBACK_LOG_NAME);
    config.watcher.target(&default_log_dirs(), fallback)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_open_recorder_uses_data_dir() {
        let temp_dir = tempfile::tempdir().unwrap();
        let mut config = RecorderConfig::default();
        config.store.data_dir = Some(temp_dir.path().to_path_buf());
        config.ingest.default_mine = vec!["Garchomp".to_string()];

        let recorder = open_recorder(&config).await.unwrap();
        assert_eq!(
            recorder.store().path(),
            Some(temp_dir.path().join("recorder.db").as_path())
        );
    }

    #[test]
    fn test_watch_target_prefers_configured_file() {
        let mut config = RecorderConfig::default();
        config.watcher.log_path = Some(PathBuf::from("/logs/battle.txt"));
        assert_eq!(
            watch_target(&config),
            WatchTarget::File(PathBuf::from("/logs/battle.txt"))
        );
    }

    #[test]
    fn test_command_error_display() {
        let err = CommandError::ReadInput {
            path: PathBuf::from("/tmp/log.txt"),
            source: std::io::Error::new(std::io::ErrorKind::NotFound, "missing"),
        };
        assert_eq!(err.to_string(), "Failed to read /tmp/log.txt: missing");
    }
}
