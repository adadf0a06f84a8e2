//! Configuration file loader and environment overrides.

use std::path::{Path, PathBuf};

use super::types::RecorderConfig;

/// Environment variable for a fixed log file.
pub const ENV_LOG_PATH: &str = "SHOWDOWN_LOG_PATH";
/// Environment variable for a log directory.
pub const ENV_LOG_DIR: &str = "SHOWDOWN_LOG_DIR";
/// Environment variable for the watcher's ingestion endpoint.
pub const ENV_API_URL: &str = "SHOWDOWN_API_URL";
/// Environment variable for the data directory.
pub const ENV_DATA_DIR: &str = "RECORDER_DATA_DIR";
/// Environment variable for the replay queue file.
pub const ENV_REPLAY_FILE: &str = "SHOWDOWN_REPLAY_FILE";
/// Environment variable switching the watcher to the replay queue only.
pub const ENV_REPLAY_MODE: &str = "SHOWDOWN_REPLAY_MODE";
/// Environment variable for the replay import endpoint.
pub const ENV_REPLAY_API_URL: &str = "SHOWDOWN_REPLAY_API_URL";

/// Configuration loader that searches multiple locations.
#[derive(Debug)]
pub struct ConfigLoader {
    /// Search paths in order of priority.
    search_paths: Vec<PathBuf>,
}

impl ConfigLoader {
    /// Create a new config loader with default search paths.
    #[must_use]
    pub fn new() -> Self {
        let mut search_paths = vec![PathBuf::from("battle-recorder.toml")];

        if let Some(config_dir) = dirs::config_dir() {
            search_paths.push(config_dir.join("battle-recorder").join("config.toml"));
        }

        Self { search_paths }
    }

    /// Create a config loader with a specific config file path.
    #[must_use]
    pub fn with_path(path: PathBuf) -> Self {
        Self {
            search_paths: vec![path],
        }
    }

    /// Load configuration from the first available file, or return defaults.
    ///
    /// # Errors
    ///
    /// Returns an error if a config file exists but cannot be parsed.
    pub fn load(&self) -> Result<RecorderConfig, ConfigError> {
        match self.find_config_file() {
            Some(path) => {
                tracing::debug!(path = %path.display(), "Loading config file");
                Self::load_from_path(&path)
            }
            None => {
                tracing::debug!("No config file found, using defaults");
                Ok(RecorderConfig::default())
            }
        }
    }

    fn load_from_path(path: &Path) -> Result<RecorderConfig, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::ReadError {
            path: path.to_path_buf(),
            source: e,
        })?;

        toml::from_str(&content).map_err(|e| ConfigError::ParseError {
            path: path.to_path_buf(),
            source: e,
        })
    }

    #[must_use]
    pub fn search_paths(&self) -> &[PathBuf] {
        &self.search_paths
    }

    /// Find the first config file that exists.
    #[must_use]
    pub fn find_config_file(&self) -> Option<PathBuf> {
        self.search_paths.iter().find(|p| p.exists()).cloned()
    }
}

impl Default for ConfigLoader {
    fn default() -> Self {
        Self::new()
    }
}

fn non_blank(value: Option<String>) -> Option<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

fn is_truthy(value: &str) -> bool {
    matches!(value.to_ascii_lowercase().as_str(), "1" | "true" | "yes")
}

impl RecorderConfig {
    /// Apply `SHOWDOWN_*` and `RECORDER_DATA_DIR` from the process environment.
    pub fn apply_env(&mut self) {
        self.apply_env_with(|key| std::env::var(key).ok());
    }

    /// Apply environment overrides from an arbitrary lookup. Blank values are ignored.
    pub fn apply_env_with<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(path) = non_blank(lookup(ENV_LOG_PATH)) {
            self.watcher.log_path = Some(PathBuf::from(path));
        }
        if let Some(dir) = non_blank(lookup(ENV_LOG_DIR)) {
            self.watcher.log_dir = Some(PathBuf::from(dir));
        }
        if let Some(url) = non_blank(lookup(ENV_API_URL)) {
            self.watcher.api_url = url;
        }
        if let Some(dir) = non_blank(lookup(ENV_DATA_DIR)) {
            self.store.data_dir = Some(PathBuf::from(dir));
        }
        if let Some(path) = non_blank(lookup(ENV_REPLAY_FILE)) {
            self.watcher.replay_file = Some(PathBuf::from(path));
        }
        if let Some(mode) = non_blank(lookup(ENV_REPLAY_MODE)) {
            self.watcher.replay_mode = is_truthy(&mode);
        }
        if let Some(url) = non_blank(lookup(ENV_REPLAY_API_URL)) {
            self.watcher.replay_api_url = url;
        }
    }

    /// Directory for the fallback live log and other local files.
    #[must_use]
    pub fn data_dir(&self) -> PathBuf {
        self.store.data_dir.clone().unwrap_or_else(|| {
            dirs::data_local_dir()
                .unwrap_or_else(|| PathBuf::from("."))
                .join("battle-recorder")
        })
    }
}

/// Errors that can occur during configuration loading.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file {path}: {source}")]
    ReadError {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Failed to parse config file {path}: {source}")]
    ParseError {
        path: PathBuf,
        source: toml::de::Error,
    },
}
