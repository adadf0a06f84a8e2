//! `import`: one-shot ingestion of a log file or replay.

use std::path::Path;

use super::{open_recorder, CommandError};
use crate::config::RecorderConfig;
use crate::ingest::IngestReport;
use crate::source::ReplayClient;

/// Ingest a saved log file.
///
/// The file gets its own stream unless `stream` is given; its match is
/// closed at the end unless `keep_open`.
///
/// # Errors
///
/// Returns an error if the file cannot be read or the batch fails to persist.
pub async fn import_file(
    config: &RecorderConfig,
    path: &Path,
    stream: Option<&str>,
    keep_open: bool,
) -> Result<IngestReport, CommandError> {
    let bytes = tokio::fs::read(path)
        .await
        .map_err(|source| CommandError::ReadInput {
            path: path.to_path_buf(),
            source,
        })?;
    let text = String::from_utf8_lossy(&bytes);

    let recorder = open_recorder(config).await?;
    let report = recorder.ingest_bulk(&text, stream, !keep_open).await?;
    tracing::info!(
        path = %path.display(),
        accepted = report.accepted,
        duplicates = report.duplicates,
        "Imported log file"
    );
    Ok(report)
}

/// Fetch a replay and ingest it as a closed match.
///
/// # Errors
///
/// Returns an error if the fetch fails or the batch fails to persist.
pub async fn import_replay(config: &RecorderConfig, url: &str) -> Result<IngestReport, CommandError> {
    let recorder = open_recorder(config).await?;
    let client = ReplayClient::new()?;
    Ok(recorder.import_replay(&client, url).await?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MatchStore;

    #[tokio::test]
    async fn test_import_file() {
        let temp_dir = tempfile::tempdir().unwrap();
        let log = temp_dir.path().join("battle.txt");
        std::fs::write(
            &log,
            "Battle started between Ash and Gary!\nTurn 1\nPikachu used its Light Ball!\n",
        )
        .unwrap();

        let mut config = RecorderConfig::default();
        config.store.data_dir = Some(temp_dir.path().to_path_buf());

        let report = import_file(&config, &log, None, false).await.unwrap();
        assert_eq!(report.accepted, 3);
        assert_eq!(report.matches.len(), 1);
        assert_eq!(report.closed, report.matches);

        let store = MatchStore::open(temp_dir.path().join("recorder.db"))
            .await
            .unwrap();
        let stats = store.stats().await.unwrap();
        assert_eq!(stats.item_events, 1);
        assert_eq!(stats.open_matches, 0);
    }

    #[tokio::test]
    async fn test_import_missing_file() {
        let temp_dir = tempfile::tempdir().unwrap();
        let mut config = RecorderConfig::default();
        config.store.data_dir = Some(temp_dir.path().to_path_buf());

        let result = import_file(&config, &temp_dir.path().join("nope.txt"), None, false).await;
        assert!(matches!(result, Err(CommandError::ReadInput { .. })));
    }
}
