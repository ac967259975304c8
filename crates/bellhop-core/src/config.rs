use chrono::Duration;
use figment::{
    providers::{Env, Format, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};

use crate::error::BellhopError;

pub const DEFAULT_PORT: u16 = 18790;
pub const DEFAULT_BIND: &str = "127.0.0.1";

/// Headroom between the send timeout and the lease for acknowledging the job.
pub const LEASE_MARGIN_SECS: u64 = 30;

/// Top-level config (bellhop.toml + BELLHOP_* env overrides).
///
/// Every section has defaults, so an empty or missing file is a valid config.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BellhopConfig {
    #[serde(default)]
    pub gateway: GatewayConfig,
    #[serde(default)]
    pub database: DatabaseConfig,
    #[serde(default)]
    pub worker: WorkerConfig,
    #[serde(default)]
    pub sender: SenderConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GatewayConfig {
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default = "default_bind")]
    pub bind: String,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            port: DEFAULT_PORT,
            bind: DEFAULT_BIND.to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    #[serde(default = "default_db_path")]
    pub path: String,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: default_db_path(),
        }
    }
}

/// Reminder executor tuning.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkerConfig {
    /// Number of concurrent workers draining the queue.
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,
    /// Delivery attempts per job before it is discarded.
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    /// Retry delay after the first transient failure; doubles per attempt.
    #[serde(default = "default_backoff_base_secs")]
    pub backoff_base_secs: u64,
    /// Upper bound on the retry delay.
    #[serde(default = "default_backoff_max_secs")]
    pub backoff_max_secs: u64,
    /// Bound on a single notification sender call.
    #[serde(default = "default_send_timeout_secs")]
    pub send_timeout_secs: u64,
    /// Idle workers re-check the queue at least this often.
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
    /// A claimed job is redelivered if its worker has not acknowledged it
    /// within this window (e.g. the process crashed mid-send).
    #[serde(default = "default_visibility_timeout_secs")]
    pub visibility_timeout_secs: u64,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            concurrency: default_concurrency(),
            max_attempts: default_max_attempts(),
            backoff_base_secs: default_backoff_base_secs(),
            backoff_max_secs: default_backoff_max_secs(),
            send_timeout_secs: default_send_timeout_secs(),
            poll_interval_ms: default_poll_interval_ms(),
            visibility_timeout_secs: default_visibility_timeout_secs(),
        }
    }
}

impl WorkerConfig {
    pub fn backoff_base(&self) -> crate::error::Result<Duration> {
        seconds("worker.backoff_base_secs", self.backoff_base_secs)
    }

    pub fn backoff_max(&self) -> crate::error::Result<Duration> {
        seconds("worker.backoff_max_secs", self.backoff_max_secs)
    }

    pub fn visibility_timeout(&self) -> crate::error::Result<Duration> {
        seconds("worker.visibility_timeout_secs", self.visibility_timeout_secs)
    }

    /// Every duration must fit a `chrono::Duration`, and a send that runs
    /// into its timeout must still be acknowledged before the lease expires.
    /// Otherwise another worker reclaims the job and sends it a second time.
    pub fn validate(&self) -> crate::error::Result<()> {
        self.backoff_base()?;
        self.backoff_max()?;
        self.visibility_timeout()?;
        if self.send_timeout_secs.saturating_add(LEASE_MARGIN_SECS) > self.visibility_timeout_secs {
            return Err(BellhopError::Config(format!(
                "worker.send_timeout_secs ({}) plus {}s margin must not exceed \
                 worker.visibility_timeout_secs ({})",
                self.send_timeout_secs, LEASE_MARGIN_SECS, self.visibility_timeout_secs
            )));
        }
        Ok(())
    }
}

fn seconds(key: &str, secs: u64) -> crate::error::Result<Duration> {
    i64::try_from(secs)
        .ok()
        .and_then(Duration::try_seconds)
        .ok_or_else(|| BellhopError::Config(format!("{key} out of range: {secs}")))
}

/// Notification delivery. Without `webhook_url` reminders are only logged.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SenderConfig {
    pub webhook_url: Option<String>,
    /// Sent as the `x-bellhop-webhook-key` header.
    pub webhook_key: Option<String>,
}

fn default_port() -> u16 {
    DEFAULT_PORT
}
fn default_bind() -> String {
    DEFAULT_BIND.to_string()
}
fn default_concurrency() -> usize {
    4
}
fn default_max_attempts() -> u32 {
    3
}
fn default_backoff_base_secs() -> u64 {
    30
}
fn default_backoff_max_secs() -> u64 {
    900
}
fn default_send_timeout_secs() -> u64 {
    10
}
fn default_poll_interval_ms() -> u64 {
    1000
}
fn default_visibility_timeout_secs() -> u64 {
    300
}
fn default_db_path() -> String {
    let home = std::env::var("HOME").unwrap_or_else(|_| ".".to_string());
    format!("{}/.bellhop/bellhop.db", home)
}

impl BellhopConfig {
    /// Load config from a TOML file with BELLHOP_* env var overrides.
    ///
    /// Nested keys use a double underscore, e.g.
    /// `BELLHOP_WORKER__MAX_ATTEMPTS=5`.
    pub fn load(config_path: Option<&str>) -> crate::error::Result<Self> {
        let path = config_path
            .map(String::from)
            .unwrap_or_else(default_config_path);

        let config: Self = Self::figment(&path)
            .extract()
            .map_err(|e| BellhopError::Config(e.to_string()))?;
        config.worker.validate()?;
        Ok(config)
    }

    fn figment(path: &str) -> Figment {
        Figment::new()
            .merge(Toml::file(path))
            .merge(Env::prefixed("BELLHOP_").split("__"))
    }
}

fn default_config_path() -> String {
    let home = std::env::var("HOME").unwrap_or_else(|_| ".".to_string());
    format!("{}/.bellhop/bellhop.toml", home)
}
