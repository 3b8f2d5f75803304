//! Worker configuration.
//!
//! Configuration is read from TOML:
//! - `$MEETREC_CONFIG` when set
//! - Linux: `~/.config/meetrec/worker.toml`
//! - Windows: `%APPDATA%/meetrec/worker.toml`
//!
//! Credentials can be supplied through `MEETREC_PRIMARY_API_KEY` and
//! `MEETREC_SECONDARY_TOKEN` instead of the file.

use std::path::{Path, PathBuf};
use std::time::Duration;

use meetrec_pipeline::types::{DEFAULT_MAX_POLL_ATTEMPTS, DEFAULT_POLL_INTERVAL, DEFAULT_TIME_BUDGET};
use meetrec_pipeline::{PipelineConfig, WaitPolicy};
use meetrec_protocol::constants::{DEFAULT_GRANULARITY, DEFAULT_MIME_TYPE};
use serde::{Deserialize, Serialize};

pub const CONFIG_ENV: &str = "MEETREC_CONFIG";
pub const PRIMARY_API_KEY_ENV: &str = "MEETREC_PRIMARY_API_KEY";
pub const SECONDARY_TOKEN_ENV: &str = "MEETREC_SECONDARY_TOKEN";

/// Worker configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Root URL of the ingestion service.
    #[serde(default = "default_primary_base_url")]
    pub primary_base_url: String,

    #[serde(default)]
    pub primary_api_key: String,

    /// Root URL of the storage service.
    #[serde(default = "default_secondary_base_url")]
    pub secondary_base_url: String,

    /// OAuth access token for the storage service. No token, no secondary.
    #[serde(default)]
    pub secondary_token: Option<String>,

    /// Destination folder on the storage service.
    #[serde(default)]
    pub secondary_parent_id: Option<String>,

    /// Directory holding `<session>/chunk_<index>` fragment files.
    #[serde(default = "default_fragment_root")]
    pub fragment_root: PathBuf,

    /// Directory holding session checkpoints and leases.
    #[serde(default = "default_checkpoint_root")]
    pub checkpoint_root: PathBuf,

    #[serde(default = "default_granularity")]
    pub granularity: usize,

    /// Transfer budget per invocation in seconds.
    #[serde(default = "default_time_budget_secs")]
    pub time_budget_secs: u64,

    #[serde(default = "default_poll_interval_secs")]
    pub poll_interval_secs: u64,

    #[serde(default = "default_max_poll_attempts")]
    pub max_poll_attempts: u32,

    /// Lease lifetime in seconds. Derived from the budget and the wait when unset.
    #[serde(default)]
    pub lease_ttl_secs: Option<u64>,

    /// Lease holder name (`<hostname>-<pid>` by default).
    #[serde(default)]
    pub worker_id: Option<String>,

    #[serde(default = "default_mime_type")]
    pub default_mime_type: String,
}

fn default_primary_base_url() -> String {
    meetrec_remote::ingest::DEFAULT_BASE_URL.into()
}

fn default_secondary_base_url() -> String {
    meetrec_remote::storage::DEFAULT_BASE_URL.into()
}

fn default_fragment_root() -> PathBuf {
    data_dir().join("fragments")
}

fn default_checkpoint_root() -> PathBuf {
    data_dir().join("checkpoints")
}

fn default_granularity() -> usize {
    DEFAULT_GRANULARITY
}

fn default_time_budget_secs() -> u64 {
    DEFAULT_TIME_BUDGET.as_secs()
}

fn default_poll_interval_secs() -> u64 {
    DEFAULT_POLL_INTERVAL.as_secs()
}

fn default_max_poll_attempts() -> u32 {
    DEFAULT_MAX_POLL_ATTEMPTS
}

fn default_mime_type() -> String {
    DEFAULT_MIME_TYPE.into()
}

impl Default for Config {
    fn default() -> Self {
        Self {
            primary_base_url: default_primary_base_url(),
            primary_api_key: String::new(),
            secondary_base_url: default_secondary_base_url(),
            secondary_token: None,
            secondary_parent_id: None,
            fragment_root: default_fragment_root(),
            checkpoint_root: default_checkpoint_root(),
            granularity: default_granularity(),
            time_budget_secs: default_time_budget_secs(),
            poll_interval_secs: default_poll_interval_secs(),
            max_poll_attempts: default_max_poll_attempts(),
            lease_ttl_secs: None,
            worker_id: None,
            default_mime_type: default_mime_type(),
        }
    }
}

impl Config {
    /// Loads configuration from disk, falling back to defaults when the file
    /// does not exist, then applies environment overrides.
    pub fn load() -> anyhow::Result<Self> {
        Self::load_from(&config_path(), |key| std::env::var(key).ok())
    }

    /// Loads `path` (defaults when absent), applies overrides from `lookup`
    /// and validates the result.
    pub fn load_from(
        path: &Path,
        lookup: impl Fn(&str) -> Option<String>,
    ) -> anyhow::Result<Self> {
        let mut config = if path.exists() {
            let content = std::fs::read_to_string(path)?;
            let config: Config = toml::from_str(&content)?;
            tracing::debug!(path = %path.display(), "configuration read");
            config
        } else {
            tracing::debug!(path = %path.display(), "no configuration file, using defaults");
            Config::default()
        };

        config.apply_env(lookup);
        config.validate()?;
        Ok(config)
    }

    /// Overrides credentials with non-empty values from `lookup`.
    pub fn apply_env(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(key) = lookup(PRIMARY_API_KEY_ENV).filter(|v| !v.is_empty()) {
            self.primary_api_key = key;
        }
        if let Some(token) = lookup(SECONDARY_TOKEN_ENV).filter(|v| !v.is_empty()) {
            self.secondary_token = Some(token);
        }
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        if self.primary_api_key.is_empty() {
            anyhow::bail!("primary API key missing (set {PRIMARY_API_KEY_ENV})");
        }
        if self.granularity == 0 {
            anyhow::bail!("granularity must be positive");
        }
        if self.max_poll_attempts == 0 {
            anyhow::bail!("max_poll_attempts must be at least 1");
        }
        Ok(())
    }

    /// Whether the secondary target can be used at all.
    pub fn secondary_configured(&self) -> bool {
        self.secondary_token.as_deref().is_some_and(|t| !t.is_empty())
            && self.secondary_parent_id.is_some()
    }

    pub fn to_pipeline_config(&self) -> PipelineConfig {
        let defaults = PipelineConfig::default();
        let wait = WaitPolicy {
            interval: Duration::from_secs(self.poll_interval_secs),
            max_attempts: self.max_poll_attempts,
        };
        let time_budget = Duration::from_secs(self.time_budget_secs);
        let lease_ttl = match self.lease_ttl_secs {
            Some(secs) => Duration::from_secs(secs),
            None => time_budget + wait.max_wait() + Duration::from_secs(60),
        };

        PipelineConfig {
            granularity: self.granularity,
            time_budget,
            wait,
            lease_ttl,
            worker_id: self.worker_id.clone().unwrap_or(defaults.worker_id),
            default_mime_type: self.default_mime_type.clone(),
            secondary_parent_id: self
                .secondary_parent_id
                .clone()
                .filter(|_| self.secondary_configured()),
        }
    }
}

/// Returns the configuration file path.
fn config_path() -> PathBuf {
    if let Some(path) = std::env::var_os(CONFIG_ENV) {
        return PathBuf::from(path);
    }
    config_dir().join("worker.toml")
}

fn config_dir() -> PathBuf {
    #[cfg(target_os = "windows")]
    {
        let appdata =
            std::env::var("APPDATA").unwrap_or_else(|_| "C:\\Users\\Default\\AppData".into());
        PathBuf::from(appdata).join("meetrec")
    }

    #[cfg(not(target_os = "windows"))]
    {
        let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".into());
        PathBuf::from(home).join(".config").join("meetrec")
    }
}

fn data_dir() -> PathBuf {
    #[cfg(target_os = "windows")]
    {
        let appdata =
            std::env::var("LOCALAPPDATA").unwrap_or_else(|_| "C:\\Users\\Default\\AppData".into());
        PathBuf::from(appdata).join("meetrec")
    }

    #[cfg(not(target_os = "windows"))]
    {
        let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".into());
        PathBuf::from(home).join(".local").join("share").join("meetrec")
    }
}
