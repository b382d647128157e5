//! Configuration stored in ~/.workdeck/config.json

use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::api::RetryPolicy;
use crate::error::DeckError;

pub const ENV_API_BASE_URL: &str = "WORKDECK_API_BASE_URL";
pub const ENV_ACCESS_TOKEN: &str = "WORKDECK_ACCESS_TOKEN";
pub const ENV_LINKED_EMAILS: &str = "WORKDECK_LINKED_EMAILS";

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Config {
    #[serde(default = "default_api_base_url")]
    pub api_base_url: String,
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
    #[serde(default)]
    pub retry: RetryConfig,
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

fn default_api_base_url() -> String {
    "http://localhost:8080/api/v1".to_string()
}

fn default_request_timeout_secs() -> u64 {
    30
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for Config {
    fn default() -> Self {
        Self {
            api_base_url: default_api_base_url(),
            request_timeout_secs: default_request_timeout_secs(),
            retry: RetryConfig::default(),
            log_level: default_log_level(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RetryConfig {
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    #[serde(default = "default_initial_backoff_ms")]
    pub initial_backoff_ms: u64,
    #[serde(default = "default_max_backoff_ms")]
    pub max_backoff_ms: u64,
}

fn default_max_attempts() -> u32 {
    3
}

fn default_initial_backoff_ms() -> u64 {
    250
}

fn default_max_backoff_ms() -> u64 {
    2_000
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            initial_backoff_ms: default_initial_backoff_ms(),
            max_backoff_ms: default_max_backoff_ms(),
        }
    }
}

impl RetryConfig {
    pub fn to_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.max_attempts,
            initial_backoff_ms: self.initial_backoff_ms,
            max_backoff_ms: self.max_backoff_ms,
        }
    }
}

/// Get the canonical config file path (~/.workdeck/config.json)
pub fn config_path() -> Result<PathBuf, DeckError> {
    let home = dirs::home_dir()
        .ok_or_else(|| DeckError::Config("Could not find home directory".to_string()))?;
    Ok(home.join(".workdeck").join("config.json"))
}

/// Load configuration from `path`, falling back to defaults when the file is absent.
pub fn load_config_from(path: &Path) -> Result<Config, DeckError> {
    if !path.exists() {
        log::info!("No config at {}, using defaults", path.display());
        return Ok(Config::default());
    }

    let content = fs::read_to_string(path)
        .map_err(|e| DeckError::Config(format!("Failed to read config: {}", e)))?;
    let config: Config = serde_json::from_str(&content)
        .map_err(|e| DeckError::Config(format!("Failed to parse config: {}", e)))?;

    if url::Url::parse(&config.api_base_url).is_err() {
        return Err(DeckError::Config(format!(
            "apiBaseUrl is not a valid URL: {}",
            config.api_base_url
        )));
    }

    Ok(config)
}

/// Load configuration from ~/.workdeck/config.json with environment overrides applied.
pub fn load_config() -> Result<Config, DeckError> {
    let mut config = load_config_from(&config_path()?)?;
    apply_env_overrides(&mut config, |key| std::env::var(key).ok());
    Ok(config)
}

/// Applies `WORKDECK_*` overrides; `lookup` abstracts the environment for tests.
pub fn apply_env_overrides(config: &mut Config, lookup: impl Fn(&str) -> Option<String>) {
    if let Some(url) = lookup(ENV_API_BASE_URL).filter(|v| !v.trim().is_empty()) {
        config.api_base_url = url.trim().to_string();
    }
}

/// Create or update the config file atomically.
///
/// Reads the current file (or defaults), applies the mutator, then saves.
pub fn create_or_update_config(
    path: &Path,
    mutator: impl FnOnce(&mut Config),
) -> Result<Config, DeckError> {
    let mut config = load_config_from(path)?;
    mutator(&mut config);

    save_config(path, &config)?;
    Ok(config)
}

/// Write `config` to `path` via a sibling temp file and rename.
pub fn save_config(path: &Path, config: &Config) -> Result<(), DeckError> {
    if let Some(parent) = path.parent() {
        if !parent.exists() {
            fs::create_dir_all(parent)
                .map_err(|e| DeckError::Config(format!("Failed to create config dir: {}", e)))?;
        }
    }

    let content = serde_json::to_string_pretty(config)
        .map_err(|e| DeckError::Config(format!("Failed to serialize config: {}", e)))?;
    let tmp = path.with_extension("json.tmp");
    fs::write(&tmp, content)
        .map_err(|e| DeckError::Config(format!("Failed to write config: {}", e)))?;
    fs::rename(&tmp, path)
        .map_err(|e| DeckError::Config(format!("Failed to replace config: {}", e)))?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_missing_file_yields_defaults() {
        let temp = TempDir::new().unwrap();
        let config = load_config_from(&temp.path().join("config.json")).unwrap();
        assert_eq!(config.request_timeout_secs, 30);
        assert_eq!(config.retry.max_attempts, 3);
    }

    #[test]
    fn test_partial_file_fills_defaults() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("config.json");
        fs::write(&path, r#"{ "apiBaseUrl": "https://boards.example.com/api/v1" }"#).unwrap();

        let config = load_config_from(&path).unwrap();
        assert_eq!(config.api_base_url, "https://boards.example.com/api/v1");
        assert_eq!(config.log_level, "info");
    }

    #[test]
    fn test_invalid_url_rejected() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("config.json");
        fs::write(&path, r#"{ "apiBaseUrl": "not a url" }"#).unwrap();

        assert!(matches!(load_config_from(&path), Err(DeckError::Config(_))));
    }

    #[test]
    fn test_create_or_update_writes_file() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("nested").join("config.json");

        let config = create_or_update_config(&path, |c| c.log_level = "debug".to_string()).unwrap();
        assert_eq!(config.log_level, "debug");

        let reloaded = load_config_from(&path).unwrap();
        assert_eq!(reloaded.log_level, "debug");
        assert!(!path.with_extension("json.tmp").exists());
    }

    #[test]
    fn test_env_override() {
        let mut config = Config::default();
        apply_env_overrides(&mut config, |key| {
            (key == ENV_API_BASE_URL).then(|| "https://staging.example.com/api/v1".to_string())
        });
        assert_eq!(config.api_base_url, "https://staging.example.com/api/v1");
    }
}
