//! Wire types shared by the config store, the log shipper and the agent.
//!
//! `Config` comes from the remote config endpoint, `ReportLog` goes to the
//! collector. Both are plain values: a `Config` is published behind an `Arc`
//! and never mutated, a `ReportLog` is built once and moved into the shipper.

use std::collections::BTreeMap;

use {
    serde::{Deserialize, Serialize},
    time::OffsetDateTime,
};

// ── Remote policy ───────────────────────────────────────────────────────────

/// Remote policy snapshot.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Config {
    /// Hostnames that must never be contacted.
    #[serde(default, alias = "BlockedDomains")]
    pub blocked_domains: Vec<String>,
}

impl Config {
    #[must_use]
    pub fn with_blocked_domains<I, S>(domains: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            blocked_domains: domains.into_iter().map(Into::into).collect(),
        }
    }

    /// Exact, case-sensitive match of `host` against the blocklist.
    pub fn is_blocked(&self, host: &str) -> bool {
        self.blocked_domains.iter().any(|d| d == host)
    }
}

// ── Report log ──────────────────────────────────────────────────────────────

/// Kind of event a [`ReportLog`] describes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum LogType {
    /// The upstream answered (any status code).
    RequestEnd,
    /// The upstream call failed before producing a response.
    RequestError,
}

impl std::fmt::Display for LogType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::RequestEnd => write!(f, "REQUEST_END"),
            Self::RequestError => write!(f, "REQUEST_ERROR"),
        }
    }
}

/// One intercepted request and its outcome, as sent to the collector.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReportLog {
    /// URI scheme, e.g. `https`.
    pub protocol: String,
    pub path: String,
    pub hostname: String,
    pub method: String,
    /// Epoch milliseconds.
    pub started_at: i64,
    /// Epoch milliseconds.
    pub ended_at: i64,
    #[serde(rename = "type")]
    pub log_type: LogType,
    /// `0` when no response was received.
    pub status_code: u16,
    pub url: String,
    pub request_headers: BTreeMap<String, String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub request_body: Option<String>,
    pub response_headers: BTreeMap<String, String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub response_body: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
}

/// Current wall-clock time as epoch milliseconds.
pub fn now_millis() -> i64 {
    (OffsetDateTime::now_utc().unix_timestamp_nanos() / 1_000_000) as i64
}

// ── Tests ───────────────────────────────────────────────────────────────────
