use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;

use crate::util::paths::config_path;

const DEFAULT_BACKEND_URL: &str = "http://127.0.0.1:8080";
const DEFAULT_FRAME_INTERVAL_MS: u64 = 16;
const DEFAULT_RECOVERY_DELAY_MS: u64 = 2000;

/// Application configuration
#[derive(Debug, Clone)]
pub struct Settings {
    /// Base URL of the chat backend
    pub backend_url: String,
    /// Bearer token sent on every backend request
    pub api_token: Option<String>,
    /// Override for the data directory (database, logs)
    pub data_dir: Option<PathBuf>,
    /// Delta batching flush interval in milliseconds
    pub frame_interval_ms: u64,
    /// Delay before the post-error backend refresh, in milliseconds
    pub recovery_delay_ms: u64,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            backend_url: DEFAULT_BACKEND_URL.to_string(),
            api_token: None,
            data_dir: None,
            frame_interval_ms: DEFAULT_FRAME_INTERVAL_MS,
            recovery_delay_ms: DEFAULT_RECOVERY_DELAY_MS,
        }
    }
}

/// TOML representation of the config file
#[derive(Debug, Clone, Default, Deserialize)]
pub struct TomlSettings {
    pub backend_url: Option<String>,
    pub api_token: Option<String>,
    pub data_dir: Option<PathBuf>,
    pub frame_interval_ms: Option<u64>,
    pub recovery_delay_ms: Option<u64>,
}

impl Settings {
    /// Load configuration from the default config file, merging with
    /// defaults. A missing or malformed file falls back to defaults.
    pub fn load() -> Self {
        Self::load_from(&config_path())
    }

    pub fn load_from(path: &Path) -> Self {
        let mut settings = Settings::default();

        if let Ok(contents) = fs::read_to_string(path) {
            match toml::from_str::<TomlSettings>(&contents) {
                Ok(parsed) => settings.merge(parsed),
                Err(e) => {
                    tracing::warn!(path = %path.display(), error = %e, "ignoring malformed config file");
                }
            }
        }
        settings
    }

    fn merge(&mut self, toml: TomlSettings) {
        if let Some(url) = toml.backend_url {
            self.backend_url = url;
        }
        if toml.api_token.is_some() {
            self.api_token = toml.api_token;
        }
        if toml.data_dir.is_some() {
            self.data_dir = toml.data_dir;
        }
        if let Some(ms) = toml.frame_interval_ms {
            self.frame_interval_ms = ms;
        }
        if let Some(ms) = toml.recovery_delay_ms {
            self.recovery_delay_ms = ms;
        }
    }

    pub fn frame_interval(&self) -> Duration {
        Duration::from_millis(self.frame_interval_ms)
    }

    pub fn recovery_delay(&self) -> Duration {
        Duration::from_millis(self.recovery_delay_ms)
    }
}
