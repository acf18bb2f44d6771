//! Agent settings: credential, refresh cadence and remote endpoints.
//!
//! Settings can be written in TOML, read from `BEARER_*` environment
//! variables, or assembled in code through [`crate::AgentBuilder`].

use std::{path::Path, time::Duration};

use {
    secrecy::{ExposeSecret, Secret},
    serde::Deserialize,
};

use crate::Result;

pub const DEFAULT_CONFIG_URL: &str = "https://config.bearer.sh/config";
pub const DEFAULT_LOGS_URL: &str = "https://logs.bearer.sh/logs";
/// Captured bodies longer than this are truncated.
pub const DEFAULT_MAX_BODY_BYTES: usize = 1024 * 1024;
/// Upper bound for one call to the config endpoint or the collector.
pub const DEFAULT_REMOTE_TIMEOUT_MS: u64 = 5_000;
/// Reports waiting for the collector beyond this many are dropped.
pub const DEFAULT_MAX_PENDING_REPORTS: usize = 256;

pub const ENV_SECRET_KEY: &str = "BEARER_SECRETKEY";
pub const ENV_REFRESH_CONFIG_MS: &str = "BEARER_REFRESH_CONFIG_MS";
pub const ENV_CONFIG_URL: &str = "BEARER_CONFIG_URL";
pub const ENV_LOGS_URL: &str = "BEARER_LOGS_URL";
pub const ENV_REMOTE_TIMEOUT_MS: &str = "BEARER_REMOTE_TIMEOUT_MS";

#[derive(Clone, Deserialize)]
#[serde(default)]
pub struct AgentSettings {
    /// Secret key sent as a bearer token. Empty means unauthenticated.
    pub secret_key: Secret<String>,

    /// Autonomous config refresh period in milliseconds; `0` disables it.
    pub refresh_config_every_ms: u64,

    /// Remote config endpoint.
    pub config_url: String,

    /// Log collector endpoint.
    pub logs_url: String,

    /// Maximum number of body bytes captured per request or response.
    pub max_body_bytes: usize,

    /// Timeout in milliseconds for calls to the config endpoint and the
    /// collector; `0` disables it.
    pub remote_timeout_ms: u64,

    /// Reports allowed to wait on the collector at once.
    pub max_pending_reports: usize,
}

impl std::fmt::Debug for AgentSettings {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AgentSettings")
            .field("secret_key", &"[REDACTED]")
            .field("refresh_config_every_ms", &self.refresh_config_every_ms)
            .field("config_url", &self.config_url)
            .field("logs_url", &self.logs_url)
            .field("max_body_bytes", &self.max_body_bytes)
            .field("remote_timeout_ms", &self.remote_timeout_ms)
            .field("max_pending_reports", &self.max_pending_reports)
            .finish()
    }
}

impl Default for AgentSettings {
    fn default() -> Self {
        Self {
            secret_key: Secret::new(String::new()),
            refresh_config_every_ms: 0,
            config_url: DEFAULT_CONFIG_URL.to_string(),
            logs_url: DEFAULT_LOGS_URL.to_string(),
            max_body_bytes: DEFAULT_MAX_BODY_BYTES,
            remote_timeout_ms: DEFAULT_REMOTE_TIMEOUT_MS,
            max_pending_reports: DEFAULT_MAX_PENDING_REPORTS,
        }
    }
}

impl AgentSettings {
    /// Parse settings from a TOML document. Missing keys keep their defaults.
    pub fn from_toml_str(raw: &str) -> Result<Self> {
        Ok(toml::from_str(raw)?)
    }

    /// Read a TOML settings file.
    pub fn load(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)?;
        Self::from_toml_str(&raw)
    }

    /// Defaults overridden by whatever `BEARER_*` variables are set.
    pub fn from_env() -> Self {
        let mut settings = Self::default();
        settings.apply_env();
        settings
    }

    /// Override fields with the `BEARER_*` environment variables that are set.
    pub fn apply_env(&mut self) {
        self.apply_vars(|key| std::env::var(key).ok());
    }

    fn apply_vars(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(key) = lookup(ENV_SECRET_KEY) {
            self.secret_key = Secret::new(key);
        }
        if let Some(ms) = parse_millis(&lookup, ENV_REFRESH_CONFIG_MS) {
            self.refresh_config_every_ms = ms;
        }
        if let Some(ms) = parse_millis(&lookup, ENV_REMOTE_TIMEOUT_MS) {
            self.remote_timeout_ms = ms;
        }
        if let Some(url) = lookup(ENV_CONFIG_URL) {
            self.config_url = url;
        }
        if let Some(url) = lookup(ENV_LOGS_URL) {
            self.logs_url = url;
        }
    }

    /// `None` when autonomous refresh is disabled.
    pub fn refresh_interval(&self) -> Option<Duration> {
        (self.refresh_config_every_ms > 0).then(|| Duration::from_millis(self.refresh_config_every_ms))
    }

    /// `None` when remote calls are not bounded.
    pub fn remote_timeout(&self) -> Option<Duration> {
        (self.remote_timeout_ms > 0).then(|| Duration::from_millis(self.remote_timeout_ms))
    }

    /// The credential, or `None` when it is empty.
    pub fn credential(&self) -> Option<Secret<String>> {
        let key = self.secret_key.expose_secret();
        (!key.trim().is_empty()).then(|| self.secret_key.clone())
    }
}

fn parse_millis(lookup: &impl Fn(&str) -> Option<String>, key: &str) -> Option<u64> {
    let raw = lookup(key)?;
    match raw.trim().parse() {
        Ok(ms) => Some(ms),
        Err(e) => {
            tracing::warn!(value = %raw, error = %e, "ignoring invalid {key}");
            None
        },
    }
}
