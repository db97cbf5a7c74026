//! Runtime settings for the mirror
//!
//! Loaded in order of priority:
//! 1. An explicit JSON file passed by the caller
//! 2. `settings.json` in the mailmirror config directory
//! 3. Built-in defaults
//!
//! Environment variables are applied on top of whichever source won.

use anyhow::{Context, Result, bail};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Settings filename in the config directory
const SETTINGS_FILE: &str = "settings.json";

/// Longest lock TTL accepted: one week
const MAX_LOCK_TTL_SECONDS: u64 = 7 * 24 * 60 * 60;

/// Default provider API root
pub const DEFAULT_PROVIDER_URL: &str = "https://api.aurinko.io/v1";

/// Everything the engine, the dispatcher and the daemon need to run
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub provider: ProviderSettings,
    pub transport: TransportSettings,
    pub lock: LockSettings,
    pub storage: StorageSettings,
    pub worker: WorkerSettings,
}

/// Remote provider endpoints and initialization polling
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProviderSettings {
    pub base_url: String,
    /// Sync window requested for newly initialized accounts
    pub days_within: u32,
    /// How many times to poll the initialize endpoint for readiness
    pub init_ready_attempts: u32,
    pub init_ready_interval_ms: u64,
}

impl Default for ProviderSettings {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_PROVIDER_URL.to_string(),
            days_within: crate::models::DEFAULT_DAYS_WITHIN,
            init_ready_attempts: 5,
            init_ready_interval_ms: 1_000,
        }
    }
}

impl ProviderSettings {
    pub fn init_ready_interval(&self) -> Duration {
        Duration::from_millis(self.init_ready_interval_ms)
    }
}

/// Timeouts and retry policy for outbound calls
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TransportSettings {
    pub connect_timeout_ms: u64,
    pub read_timeout_ms: u64,
    pub write_timeout_ms: u64,
    /// Maximum age of an idle pooled connection
    pub pool_timeout_ms: u64,
    /// Total attempts per call, including the first
    pub max_attempts: u32,
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
    /// Upper bound of the random delay added to each backoff
    pub jitter_ms: u64,
    pub retryable_statuses: Vec<u16>,
}

impl Default for TransportSettings {
    fn default() -> Self {
        Self {
            connect_timeout_ms: 5_000,
            read_timeout_ms: 30_000,
            write_timeout_ms: 30_000,
            pool_timeout_ms: 90_000,
            max_attempts: 3,
            base_delay_ms: 500,
            max_delay_ms: 10_000,
            jitter_ms: 250,
            retryable_statuses: vec![429, 500, 502, 503, 504],
        }
    }
}

/// Exclusivity lock
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LockSettings {
    pub ttl_seconds: u64,
}

impl Default for LockSettings {
    fn default() -> Self {
        Self { ttl_seconds: 900 }
    }
}

impl LockSettings {
    pub fn ttl(&self) -> Duration {
        Duration::from_secs(self.ttl_seconds)
    }
}

/// Where the mirror and the coordination keys live
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageSettings {
    pub database_path: PathBuf,
    pub coordination_path: PathBuf,
}

impl Default for StorageSettings {
    fn default() -> Self {
        let dir = config::config_dir().unwrap_or_else(|| PathBuf::from("."));
        Self {
            database_path: dir.join("mirror.sqlite"),
            coordination_path: dir.join("coordination.sqlite"),
        }
    }
}

/// Job dispatcher
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkerSettings {
    pub workers: usize,
    pub queue_capacity: usize,
    /// Attempts per job before the dispatcher gives up on a failing cycle
    pub max_job_attempts: u32,
    pub job_retry_delay_ms: u64,
    /// How often the daemon re-enqueues every account
    pub poll_interval_secs: u64,
}

impl Default for WorkerSettings {
    fn default() -> Self {
        Self {
            workers: 4,
            queue_capacity: 256,
            max_job_attempts: 3,
            job_retry_delay_ms: 5_000,
            poll_interval_secs: 300,
        }
    }
}

impl WorkerSettings {
    pub fn job_retry_delay(&self) -> Duration {
        Duration::from_millis(self.job_retry_delay_ms)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs)
    }
}

impl Settings {
    /// Load settings from `path`, the config directory, or defaults, then
    /// apply environment overrides and validate.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let settings: Settings = match path {
            Some(path) => config::load_json_file(path)?,
            None => config::load_json_if_exists(SETTINGS_FILE)?.unwrap_or_default(),
        };

        let settings = settings.with_env_overrides()?;
        settings.validate()?;
        Ok(settings)
    }

    /// Parse settings from a JSON string
    pub fn from_json(json: &str) -> Result<Self> {
        let settings: Settings =
            serde_json::from_str(json).context("Failed to parse settings JSON")?;
        settings.validate()?;
        Ok(settings)
    }

    /// Default path of the settings file
    pub fn default_path() -> Option<PathBuf> {
        config::config_path(SETTINGS_FILE)
    }

    fn with_env_overrides(mut self) -> Result<Self> {
        if let Ok(url) = std::env::var("MAILMIRROR_PROVIDER_URL") {
            self.provider.base_url = url;
        }
        if let Ok(path) = std::env::var("MAILMIRROR_DATABASE_PATH") {
            self.storage.database_path = PathBuf::from(path);
        }
        if let Ok(path) = std::env::var("MAILMIRROR_COORDINATION_PATH") {
            self.storage.coordination_path = PathBuf::from(path);
        }
        if let Ok(ttl) = std::env::var("MAILMIRROR_LOCK_TTL_SECONDS") {
            self.lock.ttl_seconds = ttl
                .parse()
                .with_context(|| format!("MAILMIRROR_LOCK_TTL_SECONDS is not a number: {}", ttl))?;
        }
        if let Ok(workers) = std::env::var("MAILMIRROR_WORKERS") {
            self.worker.workers = workers
                .parse()
                .with_context(|| format!("MAILMIRROR_WORKERS is not a number: {}", workers))?;
        }
        Ok(self)
    }

    /// Reject settings the engine cannot run with
    pub fn validate(&self) -> Result<()> {
        url::Url::parse(&self.provider.base_url)
            .with_context(|| format!("Invalid provider base_url: {}", self.provider.base_url))?;

        if self.transport.max_attempts == 0 {
            bail!("transport.max_attempts must be at least 1");
        }
        if self.provider.init_ready_attempts == 0 {
            bail!("provider.init_ready_attempts must be at least 1");
        }
        if self.lock.ttl_seconds == 0 || self.lock.ttl_seconds > MAX_LOCK_TTL_SECONDS {
            bail!(
                "lock.ttl_seconds must be between 1 and {}",
                MAX_LOCK_TTL_SECONDS
            );
        }
        if self.worker.workers == 0 {
            bail!("worker.workers must be at least 1");
        }
        if self.worker.queue_capacity == 0 {
            bail!("worker.queue_capacity must be at least 1");
        }
        Ok(())
    }
}
