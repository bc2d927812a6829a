//! Configuration error types

use thiserror::Error;

/// Result type for configuration loading
pub type Result<T> = std::result::Result<T, ConfigError>;

/// Errors from loading or parsing configuration
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The config file could not be read
    #[error("failed to read config file '{path}': {source}")]
    Io {
        /// Path of the offending file
        path: String,
        #[source]
        source: std::io::Error,
    },

    /// The config contents are not valid TOML
    #[error("invalid config: {source}")]
    Parse {
        #[from]
        source: toml::de::Error,
    },
}
