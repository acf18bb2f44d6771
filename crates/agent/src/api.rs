//! Authenticated client for the remote config endpoint and the log collector.

use std::time::Duration;

use {
    secrecy::{ExposeSecret, Secret},
    tracing::{debug, instrument},
};

use crate::{Config, Error, ReportLog, Result};

/// HTTP client for the two remote endpoints.
///
/// Holds no mutable state; clones share the underlying connection pool.
#[derive(Clone)]
pub struct RemoteApi {
    client: reqwest::Client,
    config_url: String,
    logs_url: String,
    credential: Option<Secret<String>>,
    timeout: Option<Duration>,
}

impl std::fmt::Debug for RemoteApi {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RemoteApi")
            .field("config_url", &self.config_url)
            .field("logs_url", &self.logs_url)
            .field("authenticated", &self.credential.is_some())
            .field("timeout", &self.timeout)
            .finish()
    }
}

impl RemoteApi {
    pub fn new(
        client: reqwest::Client,
        config_url: impl Into<String>,
        logs_url: impl Into<String>,
        credential: Option<Secret<String>>,
    ) -> Self {
        Self {
            client,
            config_url: config_url.into(),
            logs_url: logs_url.into(),
            credential,
            timeout: None,
        }
    }

    /// Bound every call to either endpoint. `None` leaves the client's own
    /// timeout in charge.
    #[must_use]
    pub fn with_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn timeout(&self) -> Option<Duration> {
        self.timeout
    }

    fn authorized(&self, builder: reqwest::RequestBuilder, secret: &str) -> reqwest::RequestBuilder {
        let builder = builder.bearer_auth(secret);
        match self.timeout {
            Some(timeout) => builder.timeout(timeout),
            None => builder,
        }
    }

    pub fn is_authenticated(&self) -> bool {
        self.credential.is_some()
    }

    fn secret(&self) -> Result<&str> {
        self.credential
            .as_ref()
            .map(|s| s.expose_secret().as_str())
            .ok_or(Error::Unauthenticated)
    }

    /// GET the remote config. Transport, status and decode failures come back
    /// wrapped in [`Error::ConfigFetch`]; a missing key is [`Error::Unauthenticated`].
    #[instrument(skip(self), fields(url = %self.config_url))]
    pub async fn fetch_config(&self) -> Result<Config> {
        let secret = self.secret()?;
        let resp = self
            .authorized(self.client.get(&self.config_url), secret)
            .header(reqwest::header::ACCEPT, "application/json")
            .send()
            .await
            .map_err(|e| Error::config_fetch(Error::transport("config request", e)))?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(Error::config_fetch(Error::Server {
                context: "config request".into(),
                status,
                body,
            }));
        }

        let bytes = resp
            .bytes()
            .await
            .map_err(|e| Error::config_fetch(Error::transport("config body", e)))?;
        let config: Config =
            serde_json::from_slice(&bytes).map_err(|e| Error::config_fetch(e.into()))?;
        debug!(blocked = config.blocked_domains.len(), "config fetched");
        Ok(config)
    }

    /// POST a batch of records to the collector.
    #[instrument(skip(self, records), fields(url = %self.logs_url, count = records.len()))]
    pub async fn submit_logs(&self, records: &[ReportLog]) -> Result<()> {
        let secret = self.secret()?;
        let payload = serde_json::to_vec(records)?;
        let resp = self
            .authorized(self.client.post(&self.logs_url), secret)
            .header(reqwest::header::CONTENT_TYPE, "application/json")
            .body(payload)
            .send()
            .await
            .map_err(|e| Error::transport("log submission", e))?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(Error::Server {
                context: "log submission".into(),
                status,
                body,
            });
        }
        debug!(%status, "logs accepted");
        Ok(())
    }
}
