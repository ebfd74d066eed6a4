use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use contracts::{PluginConfig, StoreType, SCHEMA_VERSION_V1};
use thiserror::Error;

/// Overrides the data directory chosen by the host.
pub const DATA_DIR_ENV: &str = "DEATHCHEST_DATA_DIR";
pub const CONFIG_FILE_NAME: &str = "config.json";

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("could not access {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("invalid config file {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("could not serialize config: {0}")]
    Serialize(#[from] serde_json::Error),
}

pub type ConfigResult<T> = std::result::Result<T, ConfigError>;

/// `DEATHCHEST_DATA_DIR` when set and non-empty, otherwise `default_dir`.
pub fn resolve_data_dir(default_dir: impl Into<PathBuf>) -> PathBuf {
    std::env::var_os(DATA_DIR_ENV)
        .filter(|value| !value.is_empty())
        .map(PathBuf::from)
        .unwrap_or_else(|| default_dir.into())
}

pub fn config_path(data_dir: &Path) -> PathBuf {
    data_dir.join(CONFIG_FILE_NAME)
}

/// Read `config.json` from the data directory, writing the defaults first when it is missing.
pub fn load_or_init(data_dir: &Path) -> ConfigResult<PluginConfig> {
    let path = config_path(data_dir);
    if !path.exists() {
        let config = PluginConfig::default();
        save(data_dir, &config)?;
        log::info!("[Config] wrote default config to {}", path.display());
        return Ok(config);
    }

    let raw = fs::read_to_string(&path).map_err(|source| ConfigError::Io {
        path: path.clone(),
        source,
    })?;
    let config: PluginConfig = serde_json::from_str(&raw).map_err(|source| ConfigError::Parse {
        path: path.clone(),
        source,
    })?;

    if config.schema_version != SCHEMA_VERSION_V1 {
        log::warn!(
            "[Config] {} has schema version {}, reading as {SCHEMA_VERSION_V1}",
            path.display(),
            config.schema_version
        );
    }

    if let Some(name) = config.storage_type.as_deref() {
        if StoreType::match_name(name).is_none() {
            log::warn!(
                "[Config] unknown storage_type '{name}', using {}",
                StoreType::default()
            );
        }
    }
    Ok(config)
}

pub fn save(data_dir: &Path, config: &PluginConfig) -> ConfigResult<()> {
    fs::create_dir_all(data_dir).map_err(|source| ConfigError::Io {
        path: data_dir.to_path_buf(),
        source,
    })?;
    let path = config_path(data_dir);
    let payload = serde_json::to_string_pretty(config)?;
    fs::write(&path, payload).map_err(|source| ConfigError::Io { path, source })
}
