// Configuration management module
// TOML file in the base directory, with `.env` and environment overrides layered on top

pub mod display;
pub mod settings;


pub use display::show_config;
pub use settings::{
    Config, ConfigError, DEFAULT_COLLECTION, DEFAULT_TOP_K, IndexConfig, OpenAiConfig,
    SourceConfig, validate_collection_name,
};

/// Get the configuration directory path
#[inline]
pub fn get_config_dir() -> Result<std::path::PathBuf, ConfigError> {
    Config::default_dir()
}
