use std::{sync::Arc, time::Duration};

use {http::StatusCode, thiserror::Error};

#[derive(Debug, Error)]
pub enum Error {
    /// The request host is listed in the remote blocklist.
    #[error("domain {domain} is blocked by the remote policy")]
    BlockedDomain { domain: String },

    /// No secret key is configured, so the remote endpoints cannot be called.
    #[error("no secret key configured")]
    Unauthenticated,

    /// Fetching the remote configuration failed.
    ///
    /// The cause is shared so every caller that joined the same fetch gets it.
    #[error("config fetch failed: {source}")]
    ConfigFetch {
        #[source]
        source: Arc<Error>,
    },

    /// The request never produced a response (DNS, connect, TLS, body read...).
    #[error("{context}: {source}")]
    Transport {
        context: String,
        #[source]
        source: reqwest::Error,
    },

    /// A remote endpoint answered with a non-2xx status.
    #[error("{context}: server responded {status}: {body}")]
    Server {
        context: String,
        status: StatusCode,
        body: String,
    },

    #[error("request timed out after {}ms", after.as_millis())]
    Timeout { after: Duration },

    #[error("invalid request: {0}")]
    InvalidRequest(String),

    #[error(transparent)]
    Http(#[from] http::Error),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),

    #[error(transparent)]
    Toml(#[from] toml::de::Error),

    #[error("{0}")]
    Message(String),
}

impl Error {
    #[must_use]
    pub fn message(msg: impl Into<String>) -> Self {
        Self::Message(msg.into())
    }

    #[must_use]
    pub fn transport(context: impl Into<String>, source: reqwest::Error) -> Self {
        Self::Transport {
            context: context.into(),
            source,
        }
    }

    #[must_use]
    pub fn config_fetch(source: Self) -> Self {
        Self::ConfigFetch {
            source: Arc::new(source),
        }
    }

    /// Whether the same call may succeed if simply repeated.
    ///
    /// Blocked domains and missing credentials fail the same way every time;
    /// network hiccups, timeouts and 5xx answers may not.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Transport { .. } | Self::Timeout { .. } => true,
            Self::Server { status, .. } => status.is_server_error(),
            Self::ConfigFetch { source } => source.is_retryable(),
            _ => false,
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;
