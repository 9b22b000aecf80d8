use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::errors::{ConfigError, ConfigResult};
use crate::models::TimeRange;

pub const DEFAULT_CONFIG_FILE: &str = "scanboard.toml";

const ENV_TOKEN: &str = "SCANBOARD_TOKEN";
const ENV_URL: &str = "SCANBOARD_URL";

fn default_poll_interval_secs() -> u64 {
    5
}

fn default_poll_ceiling_secs() -> u64 {
    30 * 60
}

/// Dashboard configuration, loaded from a TOML file with environment
/// overrides for the base URL and token.
#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct DashboardConfig {
    pub base_url: String,
    /// Bearer token, inline. Takes precedence over `token_file`.
    #[serde(default)]
    pub token: Option<String>,
    /// Path to a file holding the bearer token (local persistent storage).
    #[serde(default)]
    pub token_file: Option<PathBuf>,
    #[serde(default = "default_poll_interval_secs")]
    pub poll_interval_secs: u64,
    #[serde(default = "default_poll_ceiling_secs")]
    pub poll_ceiling_secs: u64,
    /// Default metrics window when the caller does not pick one.
    #[serde(default)]
    pub time_range: Option<TimeRange>,
}

impl Default for DashboardConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:8080".to_string(),
            token: None,
            token_file: None,
            poll_interval_secs: default_poll_interval_secs(),
            poll_ceiling_secs: default_poll_ceiling_secs(),
            time_range: None,
        }
    }
}

impl DashboardConfig {
    pub fn from_file(path: &Path) -> ConfigResult<Self> {
        let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let mut config: DashboardConfig = toml::from_str(&raw)?;
        config.apply_env_overrides();
        Ok(config)
    }

    /// Load from the given path, or fall back to defaults (plus environment
    /// overrides) when no path is given and the default file is absent.
    pub fn load(path: Option<&Path>) -> ConfigResult<Self> {
        match path {
            Some(path) => Self::from_file(path),
            None => {
                let default_path = Path::new(DEFAULT_CONFIG_FILE);
                if default_path.exists() {
                    Self::from_file(default_path)
                } else {
                    let mut config = Self::default();
                    config.apply_env_overrides();
                    Ok(config)
                }
            }
        }
    }

    fn apply_env_overrides(&mut self) {
        if let Ok(url) = std::env::var(ENV_URL) {
            if !url.is_empty() {
                self.base_url = url;
            }
        }
        if let Ok(token) = std::env::var(ENV_TOKEN) {
            if !token.is_empty() {
                self.token = Some(token);
            }
        }
    }

    /// Resolve the bearer token: inline token first, then the token file.
    /// Absence is fatal for any fetch, so this is checked up front.
    pub fn resolve_token(&self) -> ConfigResult<String> {
        if let Some(token) = &self.token {
            if !token.trim().is_empty() {
                return Ok(token.trim().to_string());
            }
        }
        if let Some(path) = &self.token_file {
            let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
                path: path.clone(),
                source,
            })?;
            let token = raw.trim();
            if token.is_empty() {
                return Err(ConfigError::TokenUnavailable(format!(
                    "token file {} is empty",
                    path.display()
                )));
            }
            return Ok(token.to_string());
        }
        Err(ConfigError::TokenUnavailable(
            "no token or token_file configured".to_string(),
        ))
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs)
    }

    pub fn poll_ceiling(&self) -> Duration {
        Duration::from_secs(self.poll_ceiling_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn test_deserialization_defaults() {
        let config: DashboardConfig = toml::from_str(
            r#"
base_url = "https://api.example.com"
token = "abc123"
"#,
        )
        .unwrap();
        assert_eq!(config.base_url, "https://api.example.com");
        assert_eq!(config.poll_interval_secs, 5);
        assert_eq!(config.poll_ceiling_secs, 1800);
        assert_eq!(config.time_range, None);
        assert_eq!(config.resolve_token().unwrap(), "abc123");
    }

    #[test]
    fn test_explicit_timing_and_range() {
        let config: DashboardConfig = toml::from_str(
            r#"
base_url = "https://api.example.com"
poll_interval_secs = 2
poll_ceiling_secs = 60
time_range = "7d"
"#,
        )
        .unwrap();
        assert_eq!(config.poll_interval(), Duration::from_secs(2));
        assert_eq!(config.poll_ceiling(), Duration::from_secs(60));
        assert_eq!(config.time_range, Some(TimeRange::Week));
    }

    #[test]
    fn test_token_from_file() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(file, "  file-token  ").unwrap();

        let config = DashboardConfig {
            token: None,
            token_file: Some(file.path().to_path_buf()),
            ..Default::default()
        };
        assert_eq!(config.resolve_token().unwrap(), "file-token");
    }

    #[test]
    fn test_missing_token_is_an_error() {
        let config = DashboardConfig::default();
        assert!(matches!(
            config.resolve_token(),
            Err(ConfigError::TokenUnavailable(_))
        ));
    }

    #[test]
    fn test_inline_token_wins_over_file() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(file, "file-token").unwrap();

        let config = DashboardConfig {
            token: Some("inline-token".to_string()),
            token_file: Some(file.path().to_path_buf()),
            ..Default::default()
        };
        assert_eq!(config.resolve_token().unwrap(), "inline-token");
    }
}
