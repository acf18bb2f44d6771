//! The agent: a transport decorator that enforces the remote domain
//! blocklist and reports every upstream call to the collector.

use std::{
    sync::{
        Arc,
        atomic::{AtomicU64, Ordering},
    },
    time::{Duration, Instant},
};

use {
    async_trait::async_trait,
    bytes::Bytes,
    http::{Request, Response},
    secrecy::Secret,
    tokio::sync::Semaphore,
    tracing::{Instrument, debug, info_span, instrument, warn},
};

#[cfg(feature = "metrics")]
use bearer_metrics::{counter, gauge, histogram, logs as logs_metric, requests as metric};

use crate::{
    Config, ConfigStore, Error, LogShipper, ReportLog, RequestTimeout, ReqwestTransport, Result,
    ShipperStats, Transport,
    api::RemoteApi,
    config_store::millis,
    now_millis,
    report::{ReportDraft, hostname},
    settings::AgentSettings,
};

/// Bounds how many reports may wait on the collector at once.
struct ReportQueue {
    permits: Arc<Semaphore>,
    limit: usize,
    dropped: AtomicU64,
}

impl ReportQueue {
    fn new(limit: usize) -> Self {
        let limit = limit.min(Semaphore::MAX_PERMITS);
        Self {
            permits: Arc::new(Semaphore::new(limit)),
            limit,
            dropped: AtomicU64::new(0),
        }
    }
}

/// Wraps a [`Transport`] with domain blocking and request reporting.
///
/// Build one per application and share it; clones share the config cache,
/// the collector client and the wrapped transport.
#[derive(Clone)]
pub struct Agent {
    config: ConfigStore,
    shipper: LogShipper,
    transport: Arc<dyn Transport>,
    reports: Arc<ReportQueue>,
    max_body_bytes: usize,
}

impl Agent {
    pub fn builder() -> AgentBuilder {
        AgentBuilder::default()
    }

    pub fn new(settings: AgentSettings) -> Self {
        AgentBuilder::from_settings(settings).build()
    }

    pub fn config_store(&self) -> &ConfigStore {
        &self.config
    }

    pub fn shipper(&self) -> &LogShipper {
        &self.shipper
    }

    pub fn shipper_stats(&self) -> ShipperStats {
        self.shipper.stats()
    }

    /// Reports handed to the shipper that have not finished yet.
    pub fn pending_reports(&self) -> usize {
        self.reports.limit - self.reports.permits.available_permits()
    }

    /// Reports discarded because too many were already pending.
    pub fn dropped_reports(&self) -> u64 {
        self.reports.dropped.load(Ordering::Relaxed)
    }

    /// Send `request` through the wrapped transport.
    ///
    /// Fails with [`Error::BlockedDomain`] before any network call when the
    /// host is blocked. Transport errors are returned unchanged. Reporting
    /// happens on a detached task and never affects the result.
    ///
    /// A [`RequestTimeout`] covers the policy lookup and the upstream call
    /// together. A lookup that runs out of time means no policy applies.
    #[instrument(skip(self, request), fields(method = %request.method(), uri = %request.uri()))]
    pub async fn round_trip(&self, request: Request<Bytes>) -> Result<Response<Bytes>> {
        let begun = Instant::now();
        let timeout = request.extensions().get::<RequestTimeout>().map(|t| t.0);

        let Some(host) = hostname(request.uri()).map(str::to_owned) else {
            return Err(Error::InvalidRequest(format!(
                "request URI has no host: {}",
                request.uri()
            )));
        };

        if let Some(config) = self.policy_within(timeout).await
            && config.is_blocked(&host)
        {
            #[cfg(feature = "metrics")]
            counter!(metric::BLOCKED_TOTAL).increment(1);
            debug!(domain = %host, "request to blocked domain refused");
            return Err(Error::BlockedDomain { domain: host });
        }

        #[cfg(feature = "metrics")]
        counter!(metric::INTERCEPTED_TOTAL).increment(1);

        let draft = ReportDraft::from_request(&request, self.max_body_bytes);

        let started_at = now_millis();
        let start = Instant::now();
        let result = self.forward(request, timeout, begun).await;
        let ended_at = now_millis();

        #[cfg(feature = "metrics")]
        histogram!(metric::UPSTREAM_DURATION_SECONDS).record(start.elapsed().as_secs_f64());

        let log = match &result {
            Ok(response) => {
                debug!(
                    status = response.status().as_u16(),
                    elapsed_ms = millis(start.elapsed()),
                    "upstream responded"
                );
                draft.finish(response, started_at, ended_at)
            },
            Err(e) => {
                #[cfg(feature = "metrics")]
                counter!(metric::TRANSPORT_ERRORS_TOTAL).increment(1);
                debug!(error = %e, "upstream call failed");
                draft.failed(e, started_at, ended_at)
            },
        };
        self.report(log);

        result
    }

    /// Forward with whatever is left of `timeout` since `begun`.
    async fn forward(
        &self,
        request: Request<Bytes>,
        timeout: Option<Duration>,
        begun: Instant,
    ) -> Result<Response<Bytes>> {
        let Some(after) = timeout else {
            return self.transport.round_trip(request).await;
        };
        let remaining = after.saturating_sub(begun.elapsed());
        tokio::time::timeout(remaining, self.transport.round_trip(request))
            .await
            .unwrap_or(Err(Error::Timeout { after }))
    }

    async fn policy_within(&self, timeout: Option<Duration>) -> Option<Arc<Config>> {
        let Some(after) = timeout else {
            return self.current_config().await;
        };
        match tokio::time::timeout(after, self.current_config()).await {
            Ok(policy) => policy,
            Err(_) => {
                warn!(
                    budget_ms = millis(after),
                    "config lookup used up the request timeout, proceeding without domain policy"
                );
                None
            },
        }
    }

    /// The cached config, or `None` when no policy is available.
    async fn current_config(&self) -> Option<Arc<Config>> {
        match self.config.get_cached().await {
            Ok(config) => Some(config),
            Err(Error::Unauthenticated) => {
                debug!("no secret key, domain policy disabled");
                None
            },
            Err(e) => {
                warn!(error = %e, "config unavailable, proceeding without domain policy");
                None
            },
        }
    }

    /// Hand `log` to the shipper on a detached task, unless too many
    /// reports are already waiting on the collector.
    fn report(&self, log: ReportLog) {
        let Ok(permit) = Arc::clone(&self.reports.permits).try_acquire_owned() else {
            self.reports.dropped.fetch_add(1, Ordering::Relaxed);
            #[cfg(feature = "metrics")]
            counter!(logs_metric::REPORTS_DROPPED_TOTAL).increment(1);
            debug!(url = %log.url, limit = self.reports.limit, "too many pending reports, report dropped");
            return;
        };
        #[cfg(feature = "metrics")]
        gauge!(logs_metric::REPORTS_PENDING).increment(1.0);

        let shipper = self.shipper.clone();
        let span = info_span!("report", url = %log.url, status = log.status_code);
        tokio::spawn(
            async move {
                match shipper.submit(vec![log]).await {
                    Ok(()) => debug!("report shipped"),
                    Err(Error::Unauthenticated) => debug!("no secret key, report dropped"),
                    Err(e) => warn!(error = %e, "report submission failed"),
                }
                drop(permit);
                #[cfg(feature = "metrics")]
                gauge!(logs_metric::REPORTS_PENDING).decrement(1.0);
            }
            .instrument(span),
        );
    }
}

impl Default for Agent {
    fn default() -> Self {
        AgentBuilder::default().build()
    }
}

impl std::fmt::Debug for Agent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Agent")
            .field("config", &self.config)
            .field("authenticated", &self.shipper.is_authenticated())
            .field("pending_reports", &self.pending_reports())
            .field("max_body_bytes", &self.max_body_bytes)
            .finish()
    }
}

#[async_trait]
impl Transport for Agent {
    async fn round_trip(&self, request: Request<Bytes>) -> Result<Response<Bytes>> {
        Agent::round_trip(self, request).await
    }
}

// ── Builder ─────────────────────────────────────────────────────────────────

/// Assembles an [`Agent`] from settings plus optional overrides.
#[derive(Default)]
pub struct AgentBuilder {
    settings: AgentSettings,
    transport: Option<Arc<dyn Transport>>,
    http_client: Option<reqwest::Client>,
    seed: Option<Config>,
}

impl AgentBuilder {
    pub fn from_settings(settings: AgentSettings) -> Self {
        Self {
            settings,
            ..Self::default()
        }
    }

    #[must_use]
    pub fn secret_key(mut self, key: impl Into<String>) -> Self {
        self.settings.secret_key = Secret::new(key.into());
        self
    }

    /// Autonomous refresh period; `Duration::ZERO` disables refreshing.
    #[must_use]
    pub fn refresh_config_every(mut self, every: Duration) -> Self {
        self.settings.refresh_config_every_ms = millis(every);
        self
    }

    /// Timeout for each call to the config endpoint or the collector;
    /// `Duration::ZERO` removes it.
    #[must_use]
    pub fn remote_timeout(mut self, timeout: Duration) -> Self {
        self.settings.remote_timeout_ms = millis(timeout);
        self
    }

    /// How many reports may wait on the collector before new ones are dropped.
    #[must_use]
    pub fn max_pending_reports(mut self, max: usize) -> Self {
        self.settings.max_pending_reports = max;
        self
    }

    #[must_use]
    pub fn config_url(mut self, url: impl Into<String>) -> Self {
        self.settings.config_url = url.into();
        self
    }

    #[must_use]
    pub fn logs_url(mut self, url: impl Into<String>) -> Self {
        self.settings.logs_url = url.into();
        self
    }

    #[must_use]
    pub fn max_body_bytes(mut self, max: usize) -> Self {
        self.settings.max_body_bytes = max;
        self
    }

    /// Transport used for application requests. Defaults to [`ReqwestTransport`].
    #[must_use]
    pub fn transport(mut self, transport: impl Transport + 'static) -> Self {
        self.transport = Some(Arc::new(transport));
        self
    }

    /// Client used to reach the config endpoint and the collector.
    #[must_use]
    pub fn http_client(mut self, client: reqwest::Client) -> Self {
        self.http_client = Some(client);
        self
    }

    /// Start with `config` already cached instead of fetching it first.
    #[must_use]
    pub fn seed_config(mut self, config: Config) -> Self {
        self.seed = Some(config);
        self
    }

    pub fn build(self) -> Agent {
        let client = self.http_client.unwrap_or_default();
        let api = RemoteApi::new(
            client.clone(),
            self.settings.config_url.clone(),
            self.settings.logs_url.clone(),
            self.settings.credential(),
        )
        .with_timeout(self.settings.remote_timeout());
        let refresh = self.settings.refresh_interval();
        let config = match self.seed {
            Some(seed) => ConfigStore::seeded(api.clone(), refresh, seed),
            None => ConfigStore::new(api.clone(), refresh),
        };
        let transport = self
            .transport
            .unwrap_or_else(|| Arc::new(ReqwestTransport::new(client)));

        Agent {
            config,
            shipper: LogShipper::new(api),
            transport,
            reports: Arc::new(ReportQueue::new(self.settings.max_pending_reports)),
            max_body_bytes: self.settings.max_body_bytes,
        }
    }
}
