//! Persisted config (embedding sources, search sizes) in the app data directory.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::app_data;
use crate::engine::Backend;
use crate::loader::EmbeddingFormat;

const CONFIG_FILENAME: &str = "config.toml";

#[derive(Debug, Default, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Folder scanned for embedding files.
    pub embeddings_dir: Option<String>,
    /// Name of the source loaded when none is given.
    pub default_source: Option<String>,
    pub backend: Backend,
    /// Named embedding sources the user can switch between.
    pub sources: Vec<SourceConfig>,
    pub search: SearchSettings,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SourceConfig {
    pub name: String,
    pub path: String,
    /// Detected from the file name when absent.
    pub format: Option<EmbeddingFormat>,
}

/// Sizes and defaults for queries and layouts.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SearchSettings {
    pub topn_default: usize,
    pub neighborhood_size: usize,
    pub basis_word_count: usize,
    pub batch_size: usize,
    pub projector_seed: u64,
    pub min_local_vocabulary: usize,
    pub widen_topn: usize,
}

impl Default for SearchSettings {
    fn default() -> Self {
        Self {
            topn_default: 25,
            neighborhood_size: 1500,
            basis_word_count: 8,
            batch_size: 20,
            projector_seed: crate::projection::DEFAULT_SEED,
            min_local_vocabulary: crate::neighborhood::MIN_LOCAL_VOCABULARY,
            widen_topn: crate::neighborhood::WIDEN_TOPN,
        }
    }
}

impl Config {
    /// Source configured under `name`.
    pub fn source(&self, name: &str) -> Option<&SourceConfig> {
        self.sources.iter().find(|s| s.name == name)
    }
}

/// Load config from the app data directory. Returns default config if missing or invalid.
pub fn load_config() -> Config {
    let Some(data_dir) = app_data::app_data_dir() else {
        return Config::default();
    };
    load_config_from(&data_dir.join(CONFIG_FILENAME))
}

/// Load config from a specific file. Returns default config if missing or invalid.
pub fn load_config_from(path: &Path) -> Config {
    let Ok(s) = std::fs::read_to_string(path) else {
        return Config::default();
    };
    match toml::from_str(&s) {
        Ok(c) => c,
        Err(e) => {
            tracing::warn!(path = %path.display(), error = %e, "invalid config, using defaults");
            Config::default()
        }
    }
}

/// Save config to the app data directory.
pub fn save_config(config: &Config) -> Result<(), ConfigError> {
    let data_dir = app_data::app_data_dir().ok_or(ConfigError::NoDataDir)?;
    save_config_to(&data_dir.join(CONFIG_FILENAME), config)
}

pub fn save_config_to(path: &Path, config: &Config) -> Result<(), ConfigError> {
    let s = toml::to_string_pretty(config).map_err(ConfigError::Serialize)?;
    std::fs::write(path, s).map_err(ConfigError::Write)
}

/// Get the configured embeddings folder, if any.
pub fn get_embeddings_dir() -> Option<PathBuf> {
    load_config()
        .embeddings_dir
        .filter(|s| !s.is_empty())
        .map(PathBuf::from)
}

/// Set and persist the embeddings folder.
pub fn set_embeddings_dir(path: &Path) -> Result<(), ConfigError> {
    let path = path.canonicalize().map_err(ConfigError::Canonicalize)?;
    if !path.is_dir() {
        return Err(ConfigError::NotADirectory(path));
    }
    let mut config = load_config();
    config.embeddings_dir = Some(path.to_string_lossy().into_owned());
    save_config(&config)
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("could not determine app data directory")]
    NoDataDir,
    #[error("failed to serialize config: {0}")]
    Serialize(toml::ser::Error),
    #[error("failed to write config: {0}")]
    Write(std::io::Error),
    #[error("failed to resolve path: {0}")]
    Canonicalize(std::io::Error),
    #[error("not a directory: {0}")]
    NotADirectory(PathBuf),
}
