//! Log file discovery.

use std::path::{Path, PathBuf};

/// Extension of client chat logs.
pub const LOG_EXTENSION: &str = "txt";

/// Find the most recently modified `.txt` file in a directory.
///
/// Returns `None` if the directory cannot be read or holds no logs.
#[must_use]
pub fn find_latest_log(dir: &Path) -> Option<PathBuf> {
    let entries = std::fs::read_dir(dir).ok()?;

    entries
        .filter_map(Result::ok)
        .filter(|entry| {
            entry
                .path()
                .extension()
                .is_some_and(|ext| ext.eq_ignore_ascii_case(LOG_EXTENSION))
        })
        .filter_map(|entry| {
            let metadata = entry.metadata().ok()?;
            if !metadata.is_file() {
                return None;
            }
            let modified = metadata.modified().ok()?;
            Some((entry.path(), modified))
        })
        .max_by_key(|(_, modified)| *modified)
        .map(|(path, _)| path)
}

/// Candidate client log directories, in priority order.
#[must_use]
pub fn candidate_log_dirs() -> Vec<PathBuf> {
    let mut candidates = Vec::new();
    if let Some(data) = dirs::data_dir() {
        candidates.push(data.join("Pokemon Showdown").join("Logs"));
        candidates.push(data.join("pokemon-showdown").join("logs"));
    }
    if let Some(local) = dirs::data_local_dir() {
        candidates.push(local.join("Pokemon Showdown").join("Logs"));
    }
    if let Some(documents) = dirs::document_dir() {
        candidates.push(documents.join("Pokemon Showdown").join("Logs"));
    }
    candidates.dedup();
    candidates
}

/// Client log directories that exist on this machine.
#[must_use]
pub fn default_log_dirs() -> Vec<PathBuf> {
    candidate_log_dirs()
        .into_iter()
        .filter(|dir| dir.is_dir())
        .collect()
}

/// Sidecar file that stores the tail offset of a log.
///
/// `battle.txt` maps to `battle.txt.offset`.
#[must_use]
pub fn offset_path(log: &Path) -> PathBuf {
    let mut name = log.file_name().unwrap_or_default().to_os_string();
    name.push(".offset");
    log.with_file_name(name)
}

/// Load a saved tail offset; missing or unreadable sidecars yield 0.
pub async fn load_offset(log: &Path) -> u64 {
    tokio::fs::read_to_string(offset_path(log))
        .await
        .ok()
        .and_then(|text| text.trim().parse().ok())
        .unwrap_or(0)
}

/// Persist a tail offset next to the log.
///
/// # Errors
///
/// Returns an I/O error if the sidecar cannot be written.
pub async fn save_offset(log: &Path, offset: u64) -> std::io::Result<()> {
    tokio::fs::write(offset_path(log), offset.to_string()).await
}
