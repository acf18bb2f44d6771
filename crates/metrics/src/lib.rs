//! Metrics for the bearer agent.
//!
//! Re-exports the `metrics` facade macros and names every metric the agent
//! emits, so recorders and dashboards share one source of truth. Nothing is
//! recorded until the application installs a recorder; with the
//! `prometheus` feature, [`install_prometheus_recorder`] does that.

pub use metrics::{counter, gauge, histogram};

/// Remote config fetches.
pub mod config {
    /// Config fetches by `result` (`ok` | `error`).
    pub const FETCHES_TOTAL: &str = "bearer_config_fetches_total";
    /// Autonomous refreshes that failed and kept the stale config.
    pub const REFRESH_FAILURES_TOTAL: &str = "bearer_config_refresh_failures_total";
}

/// Intercepted application requests.
pub mod requests {
    /// Requests forwarded to the wrapped transport.
    pub const INTERCEPTED_TOTAL: &str = "bearer_requests_intercepted_total";
    /// Requests refused because their host is blocked.
    pub const BLOCKED_TOTAL: &str = "bearer_requests_blocked_total";
    /// Forwarded requests that produced no response.
    pub const TRANSPORT_ERRORS_TOTAL: &str = "bearer_requests_transport_errors_total";
    /// Wall-clock time spent in the wrapped transport.
    pub const UPSTREAM_DURATION_SECONDS: &str = "bearer_requests_upstream_duration_seconds";
}

/// Report shipping.
pub mod logs {
    /// Batch submissions by `result`.
    pub const SUBMISSIONS_TOTAL: &str = "bearer_logs_submissions_total";
    /// Records in accepted batches.
    pub const RECORDS_TOTAL: &str = "bearer_logs_records_total";
    /// Reports currently waiting on the collector.
    pub const REPORTS_PENDING: &str = "bearer_logs_reports_pending";
    /// Reports dropped because too many were pending.
    pub const REPORTS_DROPPED_TOTAL: &str = "bearer_logs_reports_dropped_total";
}

/// Register descriptions for every metric with the installed recorder.
pub fn describe_metrics() {
    use metrics::{Unit, describe_counter, describe_gauge, describe_histogram};

    describe_counter!(config::FETCHES_TOTAL, "Remote config fetches by result");
    describe_counter!(
        config::REFRESH_FAILURES_TOTAL,
        "Background config refreshes that failed"
    );
    describe_counter!(requests::INTERCEPTED_TOTAL, "Requests forwarded upstream");
    describe_counter!(requests::BLOCKED_TOTAL, "Requests refused by the domain blocklist");
    describe_counter!(
        requests::TRANSPORT_ERRORS_TOTAL,
        "Forwarded requests that failed without a response"
    );
    describe_histogram!(
        requests::UPSTREAM_DURATION_SECONDS,
        Unit::Seconds,
        "Time spent in the wrapped transport"
    );
    describe_counter!(logs::SUBMISSIONS_TOTAL, "Log batch submissions by result");
    describe_counter!(logs::RECORDS_TOTAL, "Records accepted by the collector");
    describe_gauge!(logs::REPORTS_PENDING, "Reports waiting on the collector");
    describe_counter!(
        logs::REPORTS_DROPPED_TOTAL,
        "Reports dropped while the collector was backed up"
    );
}

/// Install a global Prometheus recorder and describe all agent metrics.
#[cfg(feature = "prometheus")]
pub fn install_prometheus_recorder()
-> anyhow::Result<metrics_exporter_prometheus::PrometheusHandle> {
    use anyhow::Context;

    let handle = metrics_exporter_prometheus::PrometheusBuilder::new()
        .install_recorder()
        .context("failed to install prometheus recorder")?;
    describe_metrics();
    tracing::debug!("prometheus recorder installed");
    Ok(handle)
}
