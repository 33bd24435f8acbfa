//! Global hydrate configuration.

use std::path::{Path, PathBuf};
use std::time::Duration;

use config::{Config, Environment, File};
use serde::{Deserialize, Serialize};

use crate::error::{HydrateError, HydrateResult};

static DEFAULT_DATA_DIR: &str = "~/.hydrate";
static DEFAULT_BACKEND_URL: &str = "http://127.0.0.1:8787";
static DEFAULT_REQUEST_TIMEOUT: &str = "10s";
static DEFAULT_LOGOUT_RETRY_BACKOFF: &str = "200ms";
const DEFAULT_LOGOUT_RETRY_ATTEMPTS: u32 = 3;

fn default_data_dir() -> PathBuf {
    PathBuf::from(DEFAULT_DATA_DIR)
}

fn is_default_data_dir(p: &PathBuf) -> bool {
    *p == default_data_dir()
}

fn default_backend_url() -> String {
    DEFAULT_BACKEND_URL.to_string()
}

fn default_request_timeout() -> String {
    DEFAULT_REQUEST_TIMEOUT.to_string()
}

fn default_logout_retry_attempts() -> u32 {
    DEFAULT_LOGOUT_RETRY_ATTEMPTS
}

fn default_logout_retry_backoff() -> String {
    DEFAULT_LOGOUT_RETRY_BACKOFF.to_string()
}

fn default_prewarm() -> bool {
    true
}

/// Global configuration at ~/.config/hydrate/config.toml
///
/// Every value can be overridden from the environment with a `HYDRATE_`
/// prefix, e.g. `HYDRATE_BACKEND_URL`.
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct HydrateConfig {
    #[serde(default = "default_data_dir", skip_serializing_if = "is_default_data_dir")]
    pub data_dir: PathBuf,

    #[serde(default = "default_backend_url")]
    pub backend_url: String,

    /// Hard deadline for a single backend call, e.g. "10s".
    #[serde(default = "default_request_timeout")]
    pub request_timeout: String,

    #[serde(default = "default_logout_retry_attempts")]
    pub logout_retry_attempts: u32,

    #[serde(default = "default_logout_retry_backoff")]
    pub logout_retry_backoff: String,

    /// IANA time zone used for aggregate queries. Falls back to the system zone.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub time_zone: Option<String>,

    #[serde(default = "default_prewarm")]
    pub prewarm: bool,
}

impl Default for HydrateConfig {
    fn default() -> Self {
        HydrateConfig {
            data_dir: default_data_dir(),
            backend_url: default_backend_url(),
            request_timeout: default_request_timeout(),
            logout_retry_attempts: default_logout_retry_attempts(),
            logout_retry_backoff: default_logout_retry_backoff(),
            time_zone: None,
            prewarm: default_prewarm(),
        }
    }
}

impl HydrateConfig {
    pub fn config_path() -> HydrateResult<PathBuf> {
        let config_dir = dirs::config_dir()
            .ok_or_else(|| HydrateError::Config("Could not determine config directory".into()))?
            .join("hydrate");

        Ok(config_dir.join("config.toml"))
    }

    /// Load ~/.config/hydrate/config.toml, creating a commented default on first run.
    pub fn load() -> HydrateResult<Self> {
        let config_path = Self::config_path()?;

        if !config_path.exists() {
            Self::create_default_config(&config_path)?;
        }

        Self::load_from(&config_path)
    }

    pub fn load_from(path: &Path) -> HydrateResult<Self> {
        Config::builder()
            .add_source(File::from(path).required(false))
            .add_source(Environment::with_prefix("HYDRATE"))
            .build()
            .map_err(|e| HydrateError::Config(e.to_string()))?
            .try_deserialize()
            .map_err(|e| HydrateError::Config(e.to_string()))
    }

    /// Save the current config to ~/.config/hydrate/config.toml
    pub fn save(&self) -> HydrateResult<()> {
        let config_path = Self::config_path()?;

        let content =
            toml::to_string_pretty(self).map_err(|e| HydrateError::Config(e.to_string()))?;

        std::fs::write(&config_path, content)
            .map_err(|e| HydrateError::Config(format!("Could not write config file: {e}")))?;

        Ok(())
    }

    /// Create a default config file with all options commented out.
    pub fn create_default_config(path: &Path) -> HydrateResult<()> {
        let contents = format!(
            "\
# hydrate configuration

# Where local data, the aggregate cache and the session live:
# data_dir = \"{DEFAULT_DATA_DIR}\"

# Cloud backend:
# backend_url = \"{DEFAULT_BACKEND_URL}\"
# request_timeout = \"{DEFAULT_REQUEST_TIMEOUT}\"

# Clearing local data on logout:
# logout_retry_attempts = {DEFAULT_LOGOUT_RETRY_ATTEMPTS}
# logout_retry_backoff = \"{DEFAULT_LOGOUT_RETRY_BACKOFF}\"

# Time zone for stats (defaults to the system zone):
# time_zone = \"Europe/Berlin\"

# Fetch the previous week/month in the background after showing stats:
# prewarm = true
"
        );

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| {
                HydrateError::Config(format!("Could not create config directory: {e}"))
            })?;
        }

        std::fs::write(path, contents)
            .map_err(|e| HydrateError::Config(format!("Could not write config file: {e}")))?;

        Ok(())
    }

    pub fn data_path(&self) -> PathBuf {
        let full_path_str = shellexpand::tilde(&self.data_dir.to_string_lossy()).into_owned();
        PathBuf::from(full_path_str)
    }

    pub fn store_path(&self) -> PathBuf {
        self.data_path().join("store.json")
    }

    pub fn cache_path(&self) -> PathBuf {
        self.data_path().join("cache")
    }

    pub fn session_path(&self) -> PathBuf {
        self.data_path().join("session.toml")
    }

    pub fn intake_path(&self) -> PathBuf {
        self.data_path().join("intake")
    }

    pub fn request_timeout(&self) -> HydrateResult<Duration> {
        parse_duration("request_timeout", &self.request_timeout)
    }

    pub fn logout_retry_backoff(&self) -> HydrateResult<Duration> {
        parse_duration("logout_retry_backoff", &self.logout_retry_backoff)
    }
}

fn parse_duration(key: &str, value: &str) -> HydrateResult<Duration> {
    humantime::parse_duration(value)
        .map_err(|e| HydrateError::Config(format!("Invalid duration for {key} '{value}': {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_load_defaults_from_commented_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("config.toml");
        HydrateConfig::create_default_config(&path).unwrap();

        let config = HydrateConfig::load_from(&path).unwrap();
        assert_eq!(config.backend_url, DEFAULT_BACKEND_URL);
        assert_eq!(config.logout_retry_attempts, 3);
        assert_eq!(config.request_timeout().unwrap(), Duration::from_secs(10));
        assert_eq!(config.logout_retry_backoff().unwrap(), Duration::from_millis(200));
        assert!(config.prewarm);
    }

    #[test]
    fn test_load_overrides() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(
            &path,
            concat!(
                "data_dir = \"/tmp/hydrate-test\"\n",
                "request_timeout = \"2s\"\n",
                "time_zone = \"Europe/Berlin\"\n",
            ),
        )
        .unwrap();

        let config = HydrateConfig::load_from(&path).unwrap();
        assert_eq!(config.data_path(), PathBuf::from("/tmp/hydrate-test"));
        assert_eq!(config.store_path(), PathBuf::from("/tmp/hydrate-test/store.json"));
        assert_eq!(config.request_timeout().unwrap(), Duration::from_secs(2));
        assert_eq!(config.time_zone.as_deref(), Some("Europe/Berlin"));
    }

    #[test]
    fn test_invalid_duration_is_config_error() {
        let config = HydrateConfig {
            request_timeout: "soon".into(),
            ..HydrateConfig::default()
        };
        assert!(matches!(config.request_timeout(), Err(HydrateError::Config(_))));
    }
}
