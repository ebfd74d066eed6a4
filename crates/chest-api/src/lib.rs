//! Host integration for the death chest engine: durable backends, migration
//! between them, configuration loading, and the plugin facade.

mod config;
mod factory;
mod json_store;
mod plugin;
mod sqlite;

pub use config::{
    config_path, load_or_init, resolve_data_dir, save, ConfigError, ConfigResult,
    CONFIG_FILE_NAME, DATA_DIR_ENV,
};
pub use factory::{migrate, MigrationReport, OpenedStore, StoreFactory};
pub use json_store::JsonDataStore;
pub use plugin::{Access, BreakOutcome, DeathChestPlugin, OpenOutcome};
pub use sqlite::SqliteDataStore;
