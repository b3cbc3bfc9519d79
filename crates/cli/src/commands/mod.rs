pub mod config_cmd;
pub mod replay;
pub mod strategies;

use ironloop_config::{AppConfig, ConfigError};
use std::path::Path;

/// Load from an explicit file, or from the default location with
/// environment overrides.
pub fn load_config(path: Option<&Path>) -> Result<AppConfig, ConfigError> {
    match path {
        Some(path) => AppConfig::load_from(path),
        None => AppConfig::load(),
    }
}
