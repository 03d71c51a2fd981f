//! Persistence configuration model, defaults and loading.

use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::time::Duration;

use log::{info, warn};

pub const CONFIG_FILE_NAME: &str = "persistence.toml";
pub const MAX_SAVE_TIMEOUT_MS: u64 = 60_000;
pub const MAX_PLAYLIST_CACHE_CAPACITY: usize = 256;

/// Root configuration persisted to `persistence.toml`.
#[derive(Debug, Clone, PartialEq, serde::Deserialize, serde::Serialize)]
pub struct PersistenceConfig {
    /// Directory name created under the cache root.
    #[serde(default = "default_app_dir_name")]
    pub app_dir_name: String,
    /// Overrides the platform cache directory.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cache_root: Option<PathBuf>,
    /// Debounce for settings-like tables.
    #[serde(default = "default_save_timeout_ms")]
    pub save_timeout_ms: u64,
    /// Debounce for the library and queue snapshots.
    #[serde(default)]
    pub snapshot_save_timeout_ms: u64,
    #[serde(default = "default_playlist_save_timeout_ms")]
    pub playlist_save_timeout_ms: u64,
    #[serde(default = "default_playlist_cache_capacity")]
    pub playlist_cache_capacity: usize,
    /// Tables loaded eagerly at startup.
    #[serde(default = "default_preload_tables")]
    pub preload_tables: Vec<String>,
}

impl Default for PersistenceConfig {
    fn default() -> Self {
        Self {
            app_dir_name: default_app_dir_name(),
            cache_root: None,
            save_timeout_ms: default_save_timeout_ms(),
            snapshot_save_timeout_ms: 0,
            playlist_save_timeout_ms: default_playlist_save_timeout_ms(),
            playlist_cache_capacity: default_playlist_cache_capacity(),
            preload_tables: default_preload_tables(),
        }
    }
}

impl PersistenceConfig {
    /// `<cache_root>/<app_dir_name>`, or `None` when the platform exposes no
    /// cache directory and none is configured.
    pub fn store_directory(&self) -> Option<PathBuf> {
        self.cache_root
            .clone()
            .or_else(dirs::cache_dir)
            .map(|root| root.join(&self.app_dir_name))
    }

    pub fn save_timeout(&self) -> Duration {
        Duration::from_millis(self.save_timeout_ms)
    }

    pub fn snapshot_save_timeout(&self) -> Duration {
        Duration::from_millis(self.snapshot_save_timeout_ms)
    }

    pub fn playlist_save_timeout(&self) -> Duration {
        Duration::from_millis(self.playlist_save_timeout_ms)
    }
}

fn default_app_dir_name() -> String {
    "roqtune".to_string()
}

fn default_save_timeout_ms() -> u64 {
    100
}

fn default_playlist_save_timeout_ms() -> u64 {
    500
}

fn default_playlist_cache_capacity() -> usize {
    8
}

fn default_preload_tables() -> Vec<String> {
    vec![
        "settings".to_string(),
        "stateSaved".to_string(),
        "hotkeys".to_string(),
    ]
}

/// Clamps values that would make the store unusable.
pub fn sanitize_persistence_config(config: PersistenceConfig) -> PersistenceConfig {
    let app_dir_name = if config.app_dir_name.trim().is_empty() {
        default_app_dir_name()
    } else {
        config.app_dir_name
    };

    PersistenceConfig {
        app_dir_name,
        save_timeout_ms: config.save_timeout_ms.min(MAX_SAVE_TIMEOUT_MS),
        snapshot_save_timeout_ms: config.snapshot_save_timeout_ms.min(MAX_SAVE_TIMEOUT_MS),
        playlist_save_timeout_ms: config.playlist_save_timeout_ms.min(MAX_SAVE_TIMEOUT_MS),
        playlist_cache_capacity: config
            .playlist_cache_capacity
            .clamp(1, MAX_PLAYLIST_CACHE_CAPACITY),
        ..config
    }
}

/// `<config_dir>/roqtune/persistence.toml`.
pub fn persistence_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|dir| dir.join("roqtune").join(CONFIG_FILE_NAME))
}

/// Reads and sanitizes the config at `path`, falling back to defaults when
/// the file is missing or invalid.
pub fn load_persistence_config(path: &Path) -> PersistenceConfig {
    let content = match std::fs::read_to_string(path) {
        Ok(content) => content,
        Err(err) if err.kind() == ErrorKind::NotFound => {
            info!(
                "No persistence config at {}. Using defaults.",
                path.display()
            );
            return PersistenceConfig::default();
        }
        Err(err) => {
            warn!(
                "Failed to read persistence config {}. Using defaults. error={}",
                path.display(),
                err
            );
            return PersistenceConfig::default();
        }
    };

    match toml::from_str::<PersistenceConfig>(&content) {
        Ok(config) => sanitize_persistence_config(config),
        Err(err) => {
            warn!(
                "Failed to parse persistence config {}. Using defaults. error={}",
                path.display(),
                err
            );
            PersistenceConfig::default()
        }
    }
}
