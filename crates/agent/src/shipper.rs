//! Ships [`ReportLog`] batches to the collector.

use std::sync::{
    Arc,
    atomic::{AtomicU64, Ordering},
};

use {serde::Serialize, tracing::instrument};

#[cfg(feature = "metrics")]
use bearer_metrics::{counter, logs as metric};

use crate::{Error, ReportLog, Result, api::RemoteApi};

#[derive(Default)]
struct Counters {
    submitted: AtomicU64,
    failed: AtomicU64,
    records: AtomicU64,
}

/// Submission counters since the shipper was created.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ShipperStats {
    /// Batches accepted by the collector.
    pub submitted: u64,
    /// Batches that failed for any reason, including a missing key.
    pub failed: u64,
    /// Records contained in accepted batches.
    pub records: u64,
}

/// Posts record batches to the collector.
///
/// Safe to share between tasks: the only shared state is a set of atomic
/// counters, so concurrent submissions never wait on each other.
#[derive(Clone)]
pub struct LogShipper {
    api: RemoteApi,
    counters: Arc<Counters>,
}

impl LogShipper {
    pub fn new(api: RemoteApi) -> Self {
        Self {
            api,
            counters: Arc::new(Counters::default()),
        }
    }

    pub fn is_authenticated(&self) -> bool {
        self.api.is_authenticated()
    }

    /// Submit `records` as one batch.
    ///
    /// Fails with [`Error::Unauthenticated`] without any network call when no
    /// key is configured. Nothing is retried or deduplicated.
    #[instrument(skip(self, records), fields(count = records.len()))]
    pub async fn submit(&self, records: Vec<ReportLog>) -> Result<()> {
        let result = if self.api.is_authenticated() {
            self.api.submit_logs(&records).await
        } else {
            Err(Error::Unauthenticated)
        };

        match &result {
            Ok(()) => {
                self.counters.submitted.fetch_add(1, Ordering::Relaxed);
                self.counters
                    .records
                    .fetch_add(records.len() as u64, Ordering::Relaxed);
                #[cfg(feature = "metrics")]
                {
                    counter!(metric::SUBMISSIONS_TOTAL, "result" => "ok").increment(1);
                    counter!(metric::RECORDS_TOTAL).increment(records.len() as u64);
                }
            },
            Err(e) => {
                self.counters.failed.fetch_add(1, Ordering::Relaxed);
                #[cfg(feature = "metrics")]
                counter!(metric::SUBMISSIONS_TOTAL, "result" => failure_label(e)).increment(1);
                #[cfg(not(feature = "metrics"))]
                let _ = e;
            },
        }
        result
    }

    pub fn stats(&self) -> ShipperStats {
        ShipperStats {
            submitted: self.counters.submitted.load(Ordering::Relaxed),
            failed: self.counters.failed.load(Ordering::Relaxed),
            records: self.counters.records.load(Ordering::Relaxed),
        }
    }
}

#[cfg(feature = "metrics")]
fn failure_label(err: &Error) -> &'static str {
    match err {
        Error::Unauthenticated => "unauthenticated",
        Error::Server { .. } => "server_error",
        Error::Transport { .. } => "transport_error",
        _ => "error",
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use {
        super::*,
        crate::{LogType, now_millis},
        secrecy::Secret,
        std::collections::BTreeMap,
    };

    fn records() -> Vec<ReportLog> {
        vec![ReportLog {
            protocol: "https".into(),
            path: "/sample".into(),
            hostname: "api.example.com".into(),
            method: "GET".into(),
            started_at: now_millis() - 80,
            ended_at: now_millis(),
            log_type: LogType::RequestEnd,
            status_code: 200,
            url: "http://api.example.com/sample".into(),
            request_headers: BTreeMap::from([("Accept".into(), "application/json".into())]),
            request_body: Some(r#"{"body":"data"}"#.into()),
            response_headers: BTreeMap::from([(
                "Content-Type".into(),
                "application/json".into(),
            )]),
            response_body: Some(r#"{"ok":true}"#.into()),
            error_message: None,
        }]
    }

    fn shipper(logs_url: String, key: Option<&str>) -> LogShipper {
        LogShipper::new(RemoteApi::new(
            reqwest::Client::new(),
            "http://127.0.0.1:9/config",
            logs_url,
            key.map(|k| Secret::new(k.to_string())),
        ))
    }

    #[tokio::test]
    async fn unauthenticated_submissions_always_fail() {
        let shipper = shipper("http://127.0.0.1:9/logs".into(), None);
        for _ in 0..10 {
            let err = shipper.submit(records()).await.unwrap_err();
            assert!(matches!(err, Error::Unauthenticated));
        }
        assert_eq!(shipper.stats(), ShipperStats {
            submitted: 0,
            failed: 10,
            records: 0,
        });
    }

    #[tokio::test]
    async fn unauthenticated_concurrent_submissions_fail_independently() {
        let shipper = shipper("http://127.0.0.1:9/logs".into(), None);
        let handles: Vec<_> = (0..32)
            .map(|_| {
                let shipper = shipper.clone();
                tokio::spawn(async move { shipper.submit(records()).await })
            })
            .collect();
        for handle in handles {
            assert!(matches!(
                handle.await.unwrap().unwrap_err(),
                Error::Unauthenticated
            ));
        }
        assert_eq!(shipper.stats().failed, 32);
    }

    #[tokio::test]
    async fn identical_records_are_sent_twice() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/logs")
            .match_header("authorization", "Bearer sk_test")
            .with_status(200)
            .expect(2)
            .create_async()
            .await;
        let shipper = shipper(format!("{}/logs", server.url()), Some("sk_test"));

        let batch = records();
        shipper.submit(batch.clone()).await.unwrap();
        shipper.submit(batch).await.unwrap();

        mock.assert_async().await;
        assert_eq!(shipper.stats(), ShipperStats {
            submitted: 2,
            failed: 0,
            records: 2,
        });
    }

    #[tokio::test]
    async fn rejected_batch_counts_as_failure() {
        let mut server = mockito::Server::new_async().await;
        let _mock = server
            .mock("POST", "/logs")
            .with_status(500)
            .create_async()
            .await;
        let shipper = shipper(format!("{}/logs", server.url()), Some("sk"));

        let err = shipper.submit(records()).await.unwrap_err();
        assert!(matches!(err, Error::Server { .. }));
        assert!(err.is_retryable());
        assert_eq!(shipper.stats().failed, 1);
    }
}
