//! Incremental log file tailer.
//!
//! Reads complete lines appended to a text log since the last read. An
//! incomplete trailing line is held back until its terminator arrives.

use std::path::{Path, PathBuf};

use tokio::fs::File;
use tokio::io::{AsyncReadExt, AsyncSeekExt};

use super::error::SourceError;

/// Identity of a file across polls, used to detect rotation.
type FileIdentity = (u64, u64);

#[cfg(unix)]
fn file_identity(metadata: &std::fs::Metadata) -> Option<FileIdentity> {
    use std::os::unix::fs::MetadataExt;
    Some((metadata.dev(), metadata.ino()))
}

#[cfg(not(unix))]
fn file_identity(metadata: &std::fs::Metadata) -> Option<FileIdentity> {
    let created = metadata.created().ok()?;
    let since_epoch = created.duration_since(std::time::UNIX_EPOCH).ok()?;
    Some((since_epoch.as_secs(), u64::from(since_epoch.subsec_nanos())))
}

/// Lines read by a poll that has not been committed yet.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PendingLines {
    pub lines: Vec<String>,
    /// Offset just past the last complete line.
    pub next_offset: u64,
}

/// Byte-offset cursor over a growing text file.
#[derive(Debug)]
pub struct LogTailer {
    path: PathBuf,
    offset: u64,
    identity: Option<FileIdentity>,
}

impl LogTailer {
    /// Create a tailer starting at the beginning of the file.
    #[must_use]
    pub fn new(path: PathBuf) -> Self {
        Self::with_offset(path, 0)
    }

    /// Create a tailer resuming from a saved offset.
    #[must_use]
    pub fn with_offset(path: PathBuf, offset: u64) -> Self {
        Self {
            path,
            offset,
            identity: None,
        }
    }

    #[must_use]
    pub fn offset(&self) -> u64 {
        self.offset
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Reset the cursor to the start of the file.
    pub fn reset(&mut self) {
        self.offset = 0;
    }

    /// Move the cursor past lines that were handled.
    pub fn advance(&mut self, next_offset: u64) {
        self.offset = next_offset;
    }

    /// Read complete lines appended since the cursor without moving it.
    ///
    /// If the file shrank below the cursor or was replaced by a different
    /// file, the cursor is reset to 0 first. Invalid UTF-8 is replaced.
    ///
    /// # Errors
    ///
    /// Returns `Unavailable` if the file does not exist, `PermissionDenied`
    /// if it cannot be opened, or an I/O error while reading.
    pub async fn read_pending(&mut self) -> Result<PendingLines, SourceError> {
        let mut file = match File::open(&self.path).await {
            Ok(f) => f,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(SourceError::Unavailable(self.path.clone()));
            }
            Err(e) if e.kind() == std::io::ErrorKind::PermissionDenied => {
                return Err(SourceError::PermissionDenied(self.path.clone()));
            }
            Err(e) => return Err(SourceError::Io(e)),
        };

        let metadata = file.metadata().await?;
        let file_len = metadata.len();
        let identity = file_identity(&metadata);

        if self.identity.is_some() && identity != self.identity {
            tracing::info!(path = %self.path.display(), "Log file replaced, restarting from the beginning");
            self.offset = 0;
        }
        self.identity = identity;

        if file_len < self.offset {
            tracing::warn!(
                path = %self.path.display(),
                old_offset = self.offset,
                new_len = file_len,
                "Log file truncated, resetting offset to 0"
            );
            self.offset = 0;
        }

        if file_len == self.offset {
            return Ok(PendingLines {
                lines: Vec::new(),
                next_offset: self.offset,
            });
        }

        file.seek(std::io::SeekFrom::Start(self.offset)).await?;
        let mut buf = Vec::new();
        file.read_to_end(&mut buf).await?;

        let Some(last_newline) = buf.iter().rposition(|&b| b == b'\n') else {
            // Only a partial line so far
            return Ok(PendingLines {
                lines: Vec::new(),
                next_offset: self.offset,
            });
        };

        let lines = buf[..last_newline]
            .split(|&b| b == b'\n')
            .map(|raw| raw.strip_suffix(b"\r").unwrap_or(raw))
            .map(|raw| String::from_utf8_lossy(raw).trim().to_string())
            .filter(|line| !line.is_empty())
            .collect();

        Ok(PendingLines {
            lines,
            next_offset: self.offset + last_newline as u64 + 1,
        })
    }

    /// Read complete new lines and move the cursor past them.
    ///
    /// # Errors
    ///
    /// See [`LogTailer::read_pending`].
    pub async fn read_new_lines(&mut self) -> Result<Vec<String>, SourceError> {
        let pending = self.read_pending().await?;
        self.advance(pending.next_offset);
        Ok(pending.lines)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[tokio::test]
    async fn test_reads_complete_lines() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(file, "Battle started between Ash and Gary!").unwrap();
        writeln!(file, "Turn 1").unwrap();
        file.flush().unwrap();

        let mut tailer = LogTailer::new(file.path().to_path_buf());
        let lines = tailer.read_new_lines().await.unwrap();
        assert_eq!(lines, vec!["Battle started between Ash and Gary!", "Turn 1"]);
        assert!(tailer.offset() > 0);

        assert!(tailer.read_new_lines().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_holds_back_partial_line() {
        let mut file = NamedTempFile::new().unwrap();
        write!(file, "Turn 1\nFoo used Tac").unwrap();
        file.flush().unwrap();

        let mut tailer = LogTailer::new(file.path().to_path_buf());
        assert_eq!(tailer.read_new_lines().await.unwrap(), vec!["Turn 1"]);
        assert_eq!(tailer.offset(), 7);

        write!(file, "kle!\r\n").unwrap();
        file.flush().unwrap();
        assert_eq!(
            tailer.read_new_lines().await.unwrap(),
            vec!["Foo used Tackle!"]
        );
    }

    #[tokio::test]
    async fn test_read_pending_does_not_advance() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(file, "Turn 1").unwrap();
        file.flush().unwrap();

        let mut tailer = LogTailer::new(file.path().to_path_buf());
        let pending = tailer.read_pending().await.unwrap();
        assert_eq!(pending.lines.len(), 1);
        assert_eq!(tailer.offset(), 0);

        let again = tailer.read_pending().await.unwrap();
        assert_eq!(again, pending);
    }

    #[tokio::test]
    async fn test_resets_on_truncation() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(file, "Turn 1").unwrap();
        writeln!(file, "Turn 2").unwrap();
        file.flush().unwrap();

        let mut tailer = LogTailer::new(file.path().to_path_buf());
        tailer.read_new_lines().await.unwrap();

        std::fs::write(file.path(), "Turn 9\n").unwrap();
        assert_eq!(tailer.read_new_lines().await.unwrap(), vec!["Turn 9"]);
    }

    #[tokio::test]
    async fn test_resets_on_replacement() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("battle.txt");
        std::fs::write(&path, "Turn 1\nTurn 2\n").unwrap();

        let mut tailer = LogTailer::new(path.clone());
        tailer.read_new_lines().await.unwrap();

        // Replace with a new, longer file under the same name
        let replacement = dir.path().join("next.txt");
        std::fs::write(&replacement, "Battle started between A and B!\nTurn 1\n").unwrap();
        std::fs::rename(&replacement, &path).unwrap();

        let lines = tailer.read_new_lines().await.unwrap();
        assert_eq!(lines[0], "Battle started between A and B!");
    }

    #[tokio::test]
    async fn test_missing_file_is_unavailable() {
        let mut tailer = LogTailer::new(PathBuf::from("/nonexistent/battle.txt"));
        let result = tailer.read_new_lines().await;
        assert!(matches!(result, Err(SourceError::Unavailable(_))));
    }

    #[tokio::test]
    async fn test_lossy_utf8() {
        let mut file = NamedTempFile::new().unwrap();
        file.write_all(b"Foo\xFF used Tackle!\n").unwrap();
        file.flush().unwrap();

        let mut tailer = LogTailer::new(file.path().to_path_buf());
        let lines = tailer.read_new_lines().await.unwrap();
        assert_eq!(lines, vec!["Foo\u{FFFD} used Tackle!"]);
    }

    #[tokio::test]
    async fn test_with_offset_resumes() {
        let mut file = NamedTempFile::new().unwrap();
        write!(file, "Turn 1\nTurn 2\n").unwrap();
        file.flush().unwrap();

        let mut tailer = LogTailer::with_offset(file.path().to_path_buf(), 7);
        assert_eq!(tailer.read_new_lines().await.unwrap(), vec!["Turn 2"]);
    }
}
