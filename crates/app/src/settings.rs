//! Configuration loading.
//!
//! Values come from, in increasing priority: built-in defaults, a TOML file,
//! and `SPARKLE_*` environment variables. Nested keys use a double
//! underscore, e.g. `SPARKLE_HEALTH__CHECK_INTERVAL_SECS=10`.

use std::path::Path;

use config::{Config, ConfigError, Environment, File};
use sparkle_domain::ClientConfig;

/// File read when no path is given. Missing is fine.
pub const DEFAULT_CONFIG_FILE: &str = "sparkle.toml";

/// Loads the client configuration.
///
/// An explicit `path` must exist; the default file is optional.
///
/// # Errors
///
/// Returns an error if a source cannot be read or a value has the wrong
/// type.
pub fn load_config(path: Option<&Path>) -> Result<ClientConfig, ConfigError> {
    let file = match path {
        Some(path) => File::from(path).required(true),
        None => File::with_name(DEFAULT_CONFIG_FILE).required(false),
    };
    Config::builder()
        .add_source(file)
        .add_source(
            Environment::with_prefix("SPARKLE")
                .prefix_separator("_")
                .separator("__")
                .try_parsing(true),
        )
        .build()?
        .try_deserialize()
}
