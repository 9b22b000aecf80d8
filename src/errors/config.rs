//! Configuration loading errors

use std::path::PathBuf;
use thiserror::Error;

/// Errors from loading dashboard configuration
#[derive(Error, Debug)]
pub enum ConfigError {
    /// Configuration file could not be read
    #[error("Cannot read config file {path}: {source}")]
    Read {
        /// Path that failed to load
        path: PathBuf,
        /// Underlying IO error
        source: std::io::Error,
    },

    /// Configuration file is not valid TOML
    #[error("Invalid config: {0}")]
    Parse(#[from] toml::de::Error),

    /// No usable bearer token in environment, config or token file
    #[error("Token unavailable: {0}")]
    TokenUnavailable(String),
}
