//! Cached remote configuration with autonomous refresh.
//!
//! The first [`ConfigStore::get_cached`] call fetches the config and blocks
//! until it arrives; concurrent callers wait on the same fetch. Once a config
//! is cached, reads return immediately and a background task re-fetches it
//! every `refresh_interval`. A failed refresh keeps the previous config and
//! tries again one interval later. A failed first fetch is handed to every
//! caller that was waiting on it; the next caller tries again.
//!
//! The cache state sits behind a `std::sync::Mutex` that is never held across
//! an await. Fetches are serialized by a separate async gate.

use std::{
    sync::{Arc, Mutex, MutexGuard, PoisonError, Weak},
    time::Duration,
};

use {
    time::OffsetDateTime,
    tokio_util::sync::CancellationToken,
    tracing::{debug, info, instrument, warn},
};

#[cfg(feature = "metrics")]
use bearer_metrics::{config as metric, counter};

use crate::{Config, Error, Result, api::RemoteApi};

#[derive(Default)]
struct CacheState {
    cached: Option<Arc<Config>>,
    update_count: u64,
    last_fetch: Option<OffsetDateTime>,
    refresh_in_flight: bool,
    refresher_started: bool,
    /// Completed fetch attempts, successful or not.
    attempts: u64,
    last_failure: Option<Arc<Error>>,
}

struct Inner {
    api: RemoteApi,
    refresh_interval: Option<Duration>,
    state: Mutex<CacheState>,
    fetch_gate: tokio::sync::Mutex<()>,
    cancel: CancellationToken,
}

impl Inner {
    fn state(&self) -> MutexGuard<'_, CacheState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn snapshot(&self) -> Option<Arc<Config>> {
        self.state().cached.clone()
    }

    /// Fetch and publish. The caller must hold `fetch_gate`.
    async fn fetch_and_publish(&self) -> Result<Arc<Config>> {
        let in_flight = InFlight::start(self);
        let result = self.api.fetch_config().await;
        drop(in_flight);

        let mut state = self.state();
        state.attempts += 1;
        match result {
            Ok(config) => {
                let config = Arc::new(config);
                state.cached = Some(Arc::clone(&config));
                state.update_count += 1;
                state.last_fetch = Some(OffsetDateTime::now_utc());
                state.last_failure = None;
                #[cfg(feature = "metrics")]
                counter!(metric::FETCHES_TOTAL, "result" => "ok").increment(1);
                debug!(
                    update_count = state.update_count,
                    blocked = config.blocked_domains.len(),
                    "config published"
                );
                Ok(config)
            },
            Err(e) => {
                #[cfg(feature = "metrics")]
                counter!(metric::FETCHES_TOTAL, "result" => "error").increment(1);
                let shared = match e {
                    Error::ConfigFetch { source } => source,
                    other => Arc::new(other),
                };
                state.last_failure = Some(Arc::clone(&shared));
                Err(Error::ConfigFetch { source: shared })
            },
        }
    }
}

/// Marks a fetch as in flight until dropped, including when the fetching
/// future is cancelled.
struct InFlight<'a>(&'a Inner);

impl<'a> InFlight<'a> {
    fn start(inner: &'a Inner) -> Self {
        inner.state().refresh_in_flight = true;
        Self(inner)
    }
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.0.state().refresh_in_flight = false;
    }
}

impl Drop for Inner {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

/// Owner of the cached remote [`Config`].
///
/// Cloning is cheap and clones share the cache. The background refresher only
/// holds a weak reference, so it stops once the last clone is dropped.
#[derive(Clone)]
pub struct ConfigStore {
    inner: Arc<Inner>,
}

impl ConfigStore {
    pub fn new(api: RemoteApi, refresh_interval: Option<Duration>) -> Self {
        Self::with_state(api, refresh_interval, CacheState::default())
    }

    /// A store that starts out with `config` already cached.
    ///
    /// `update_count` stays at zero until a real fetch succeeds.
    pub fn seeded(api: RemoteApi, refresh_interval: Option<Duration>, config: Config) -> Self {
        Self::with_state(api, refresh_interval, CacheState {
            cached: Some(Arc::new(config)),
            ..CacheState::default()
        })
    }

    fn with_state(api: RemoteApi, refresh_interval: Option<Duration>, state: CacheState) -> Self {
        let refresh_interval = refresh_interval.filter(|d| !d.is_zero());
        Self {
            inner: Arc::new(Inner {
                api,
                refresh_interval,
                state: Mutex::new(state),
                fetch_gate: tokio::sync::Mutex::new(()),
                cancel: CancellationToken::new(),
            }),
        }
    }

    /// Fetch the remote config without touching the cache.
    pub async fn fetch_config(&self) -> Result<Config> {
        self.inner.api.fetch_config().await
    }

    /// The best-known config, fetching it first if nothing was ever cached.
    ///
    /// Callers that arrive while a first fetch is running share its outcome,
    /// success or failure, instead of fetching again.
    #[instrument(skip(self))]
    pub async fn get_cached(&self) -> Result<Arc<Config>> {
        let seen = {
            let state = self.inner.state();
            let cached = state.cached.clone();
            if let Some(config) = cached {
                drop(state);
                self.ensure_refresher();
                return Ok(config);
            }
            state.attempts
        };
        if !self.inner.api.is_authenticated() {
            return Err(Error::Unauthenticated);
        }

        let _gate = self.inner.fetch_gate.lock().await;
        {
            // Whoever held the gate before us may have finished a fetch.
            let state = self.inner.state();
            let cached = state.cached.clone();
            if let Some(config) = cached {
                drop(state);
                self.ensure_refresher();
                return Ok(config);
            }
            if state.attempts != seen
                && let Some(source) = &state.last_failure
            {
                return Err(Error::ConfigFetch {
                    source: Arc::clone(source),
                });
            }
        }

        let config = self.inner.fetch_and_publish().await?;
        self.ensure_refresher();
        Ok(config)
    }

    /// The cached config, if any, without fetching.
    pub fn snapshot(&self) -> Option<Arc<Config>> {
        self.inner.snapshot()
    }

    /// Number of successful fetches that replaced the cached config.
    pub fn update_count(&self) -> u64 {
        self.inner.state().update_count
    }

    /// When the cached config was last replaced.
    pub fn last_fetch(&self) -> Option<OffsetDateTime> {
        self.inner.state().last_fetch
    }

    pub fn is_refreshing(&self) -> bool {
        self.inner.state().refresh_in_flight
    }

    pub fn refresh_interval(&self) -> Option<Duration> {
        self.inner.refresh_interval
    }

    /// Start the autonomous refresher unless it already runs, refresh is
    /// disabled, or there is no credential to fetch with.
    fn ensure_refresher(&self) {
        let Some(interval) = self.inner.refresh_interval else {
            return;
        };
        if !self.inner.api.is_authenticated() {
            return;
        }
        {
            let mut state = self.inner.state();
            if state.refresher_started {
                return;
            }
            state.refresher_started = true;
        }
        info!(interval_ms = millis(interval), "starting config refresher");
        tokio::spawn(refresh_loop(
            Arc::downgrade(&self.inner),
            self.inner.cancel.clone(),
            interval,
        ));
    }
}

impl std::fmt::Debug for ConfigStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.inner.state();
        f.debug_struct("ConfigStore")
            .field("cached", &state.cached)
            .field("update_count", &state.update_count)
            .field("refresh_interval", &self.inner.refresh_interval)
            .finish()
    }
}

async fn refresh_loop(inner: Weak<Inner>, cancel: CancellationToken, interval: Duration) {
    loop {
        tokio::select! {
            () = cancel.cancelled() => break,
            () = tokio::time::sleep(interval) => {},
        }
        let Some(inner) = inner.upgrade() else {
            break;
        };
        let _gate = inner.fetch_gate.lock().await;
        match inner.fetch_and_publish().await {
            Ok(_) => debug!("config refreshed"),
            Err(e) => {
                #[cfg(feature = "metrics")]
                counter!(metric::REFRESH_FAILURES_TOTAL).increment(1);
                warn!(error = %e, retry_in_ms = millis(interval), "config refresh failed, keeping cached config");
            },
        }
    }
    debug!("config refresher stopped");
}

pub(crate) fn millis(d: Duration) -> u64 {
    u64::try_from(d.as_millis()).unwrap_or(u64::MAX)
}
