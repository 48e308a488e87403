pub mod config_cmd;
pub mod decode;
pub mod run;

use cadence_config::{ConfigError, EngineConfig};
use std::path::{Path, PathBuf};

pub fn config_path(explicit: Option<&Path>) -> PathBuf {
    explicit
        .map(Path::to_path_buf)
        .unwrap_or_else(|| EngineConfig::config_dir().join("config.toml"))
}

/// Load from an explicit path, or from the default location with
/// environment overrides applied.
pub fn load_config(explicit: Option<&Path>) -> Result<EngineConfig, ConfigError> {
    match explicit {
        Some(path) => {
            let config = EngineConfig::load_from(path)?;
            config.validate()?;
            Ok(config)
        }
        None => EngineConfig::load(),
    }
}
