//! Client configuration: JSON file plus `BEZZ_*` environment overrides.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::debug;
use url::Url;

use crate::error::AppError;

pub const ENV_API_URL: &str = "BEZZ_API_URL";
pub const ENV_DATA_DIR: &str = "BEZZ_DATA_DIR";
pub const ENV_POLL_INTERVAL_SECS: &str = "BEZZ_POLL_INTERVAL_SECS";
pub const ENV_SLA_SECS: &str = "BEZZ_SLA_SECS";

const DEFAULT_API_URL: &str = "http://localhost:8080";
const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 30;
const DEFAULT_POLL_INTERVAL_SECS: u64 = 5;
const DEFAULT_PROGRESS_TICK_SECS: u64 = 1;
const DEFAULT_TOKEN_REFRESH_SECS: u64 = 50 * 60;
const DEFAULT_SLA_SECS: u64 = 300;
const DATA_DIR_NAME: &str = ".bezz";
const DATABASE_FILE: &str = "bezz.db";

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default, deny_unknown_fields)]
pub struct ClientConfig {
    pub api_url: String,
    pub request_timeout_secs: u64,
    pub poll_interval_secs: u64,
    pub progress_tick_secs: u64,
    pub token_refresh_secs: u64,
    pub sla_secs: u64,
    /// Defaults to `~/.bezz`.
    pub data_dir: Option<PathBuf>,
    /// Log query strings (redacted) along with request paths.
    pub log_query_params: bool,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            api_url: DEFAULT_API_URL.to_string(),
            request_timeout_secs: DEFAULT_REQUEST_TIMEOUT_SECS,
            poll_interval_secs: DEFAULT_POLL_INTERVAL_SECS,
            progress_tick_secs: DEFAULT_PROGRESS_TICK_SECS,
            token_refresh_secs: DEFAULT_TOKEN_REFRESH_SECS,
            sla_secs: DEFAULT_SLA_SECS,
            data_dir: None,
            log_query_params: false,
        }
    }
}

impl ClientConfig {
    /// Loads `path` (when given), applies environment overrides and
    /// validates the result.
    pub fn load(path: Option<&Path>) -> Result<Self, AppError> {
        let mut config = match path {
            Some(path) => Self::from_file(path)?,
            None => Self::default(),
        };
        config.apply_overrides(|key| std::env::var(key).ok())?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_file(path: &Path) -> Result<Self, AppError> {
        let raw = std::fs::read_to_string(path).map_err(|e| {
            AppError::Config(format!("Failed to read {}: {e}", path.display()))
        })?;
        let config = serde_json::from_str(&raw).map_err(|e| {
            AppError::Config(format!("Failed to parse {}: {e}", path.display()))
        })?;
        debug!("Loaded configuration from {}", path.display());
        Ok(config)
    }

    /// Applies `BEZZ_*` overrides read through `lookup`.
    pub fn apply_overrides(
        &mut self,
        lookup: impl Fn(&str) -> Option<String>,
    ) -> Result<(), AppError> {
        if let Some(url) = lookup(ENV_API_URL) {
            self.api_url = url;
        }
        if let Some(dir) = lookup(ENV_DATA_DIR) {
            self.data_dir = Some(PathBuf::from(dir));
        }
        if let Some(value) = lookup(ENV_POLL_INTERVAL_SECS) {
            self.poll_interval_secs = parse_secs(ENV_POLL_INTERVAL_SECS, &value)?;
        }
        if let Some(value) = lookup(ENV_SLA_SECS) {
            self.sla_secs = parse_secs(ENV_SLA_SECS, &value)?;
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<(), AppError> {
        let url = Url::parse(&self.api_url)
            .map_err(|e| AppError::Config(format!("Invalid api_url '{}': {e}", self.api_url)))?;
        if !matches!(url.scheme(), "http" | "https") {
            return Err(AppError::Config(format!(
                "api_url must use http or https, got '{}'",
                url.scheme()
            )));
        }

        for (name, value) in [
            ("request_timeout_secs", self.request_timeout_secs),
            ("poll_interval_secs", self.poll_interval_secs),
            ("progress_tick_secs", self.progress_tick_secs),
            ("token_refresh_secs", self.token_refresh_secs),
            ("sla_secs", self.sla_secs),
        ] {
            if value == 0 {
                return Err(AppError::Config(format!("{name} must be greater than zero")));
            }
        }
        Ok(())
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs)
    }

    pub fn tick_interval(&self) -> Duration {
        Duration::from_secs(self.progress_tick_secs)
    }

    pub fn refresh_interval(&self) -> Duration {
        Duration::from_secs(self.token_refresh_secs)
    }

    pub fn sla(&self) -> Duration {
        Duration::from_secs(self.sla_secs)
    }

    /// Configured data directory, else `~/.bezz`.
    pub fn data_dir(&self) -> Result<PathBuf, AppError> {
        if let Some(dir) = &self.data_dir {
            return Ok(dir.clone());
        }
        dirs::home_dir()
            .map(|home| home.join(DATA_DIR_NAME))
            .ok_or_else(|| AppError::Config("Could not determine home directory".to_string()))
    }

    pub fn database_path(&self) -> Result<PathBuf, AppError> {
        Ok(self.data_dir()?.join(DATABASE_FILE))
    }
}

fn parse_secs(key: &str, value: &str) -> Result<u64, AppError> {
    value
        .trim()
        .parse::<u64>()
        .map_err(|_| AppError::Config(format!("{key} must be a whole number of seconds, got '{value}'")))
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
