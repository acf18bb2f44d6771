//! Log shipping through an agent's shipper.

use std::collections::BTreeMap;

use bearer_agent::{Agent, Error, LogType, ReportLog, now_millis};

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
        response_headers: BTreeMap::from([("Content-Type".into(), "application/json".into())]),
        response_body: Some(r#"{"ok":true}"#.into()),
        error_message: None,
    }]
}

#[tokio::test]
async fn unauthenticated_agent_cannot_ship() {
    let agent = Agent::default();
    for _ in 0..10 {
        let err = agent.shipper().submit(records()).await.unwrap_err();
        assert!(matches!(err, Error::Unauthenticated));
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn unauthenticated_agent_cannot_ship_concurrently() {
    let agent = Agent::default();
    let handles: Vec<_> = (0..20)
        .map(|_| {
            let agent = agent.clone();
            tokio::spawn(async move { agent.shipper().submit(records()).await })
        })
        .collect();

    for handle in handles {
        let result = handle.await.unwrap();
        assert!(matches!(result, Err(Error::Unauthenticated)));
    }
    assert_eq!(agent.shipper_stats().failed, 20);
    assert_eq!(agent.shipper_stats().submitted, 0);
}

#[tokio::test]
async fn authenticated_agent_ships_every_submission() {
    let mut remote = mockito::Server::new_async().await;
    let collector = remote
        .mock("POST", "/logs")
        .match_header("authorization", "Bearer sk_test")
        .match_header("content-type", "application/json")
        .match_body(mockito::Matcher::Regex(r#""hostname":"api.example.com""#.into()))
        .with_status(200)
        .expect(3)
        .create_async()
        .await;

    let agent = Agent::builder()
        .secret_key("sk_test")
        .logs_url(format!("{}/logs", remote.url()))
        .build();

    let batch = records();
    for _ in 0..3 {
        agent.shipper().submit(batch.clone()).await.unwrap();
    }
    collector.assert_async().await;
    assert_eq!(agent.shipper_stats().records, 3);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_submissions_are_all_delivered() {
    let mut remote = mockito::Server::new_async().await;
    let collector = remote
        .mock("POST", "/logs")
        .with_status(200)
        .expect(20)
        .create_async()
        .await;

    let agent = Agent::builder()
        .secret_key("sk_test")
        .logs_url(format!("{}/logs", remote.url()))
        .build();

    let handles: Vec<_> = (0..20)
        .map(|_| {
            let agent = agent.clone();
            tokio::spawn(async move { agent.shipper().submit(records()).await })
        })
        .collect();
    for handle in handles {
        handle.await.unwrap().unwrap();
    }

    collector.assert_async().await;
    assert_eq!(agent.shipper_stats().submitted, 20);
}
