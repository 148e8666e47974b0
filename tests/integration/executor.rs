//! ResilientClient behavior over a scripted transport

use super::fakes::{ScriptedTransport, Step};
use cascade_guard::{BreakerState, Error, ResilientClient};
use std::sync::Arc;
use std::time::Duration;

fn client(
    transport: Arc<ScriptedTransport>,
    retries: u32,
    minimum_volume: u32,
    reset_timeout: Duration,
) -> ResilientClient {
    ResilientClient::builder()
        .base_address("http://svc.test/api")
        .retries(retries)
        .minimum_volume(minimum_volume)
        .reset_timeout(reset_timeout)
        .retry_delay(Arc::new(|_| Duration::from_millis(1)))
        .timeout(Duration::from_millis(500))
        .transport(transport)
        .build()
        .expect("client")
}

fn remote_status(err: &Error) -> Option<u16> {
    match err {
        Error::Remote { status, .. } => Some(*status),
        _ => None,
    }
}

#[tokio::test]
async fn test_closed_breaker_passes_outcomes_through() {
    let transport = ScriptedTransport::new(vec![Step::Status(200), Step::Status(404)]);
    let client = client(transport.clone(), 0, 5, Duration::from_secs(30));

    let ok = client.get("/orders", None).await.unwrap();
    assert_eq!(ok.map(|r| r.status), Some(200));

    let err = client.get("/orders/9", None).await.unwrap_err();
    assert_eq!(remote_status(&err), Some(404));
    assert_eq!(transport.calls(), 2);
    assert_eq!(
        transport.urls(),
        vec!["http://svc.test/api/orders", "http://svc.test/api/orders/9"]
    );
}

#[tokio::test]
async fn test_retries_until_success_within_budget() {
    let transport = ScriptedTransport::new(vec![
        Step::Status(500),
        Step::Status(500),
        Step::Status(200),
    ]);
    let client = client(transport.clone(), 2, 5, Duration::from_secs(30));

    let resp = client.get("/flaky", None).await.unwrap();
    assert_eq!(resp.map(|r| r.status), Some(200));
    assert_eq!(transport.calls(), 3);

    let status = client.circuit_status(None).unwrap();
    assert_eq!(status.state, BreakerState::Closed);
    assert_eq!((status.successes, status.failures), (1, 0));
}

#[tokio::test]
async fn test_client_errors_are_not_retried() {
    let transport = ScriptedTransport::always(Step::Status(400));
    let client = client(transport.clone(), 3, 5, Duration::from_secs(30));

    let err = client.get("/bad", None).await.unwrap_err();
    assert_eq!(remote_status(&err), Some(400));
    assert_eq!(transport.calls(), 1);
}

#[tokio::test]
async fn test_retry_budget_exhausted_returns_last_error() {
    let transport = ScriptedTransport::always(Step::Status(503));
    let client = client(transport.clone(), 2, 5, Duration::from_secs(30));

    let err = client.get("/down", None).await.unwrap_err();
    assert_eq!(remote_status(&err), Some(503));
    assert_eq!(transport.calls(), 3);

    // One breaker sample per logical call, however many attempts it took.
    let status = client.circuit_status(None).unwrap();
    assert_eq!(status.failures, 1);
}

#[tokio::test]
async fn test_network_errors_are_retried() {
    let transport = ScriptedTransport::new(vec![Step::Network, Step::Status(200)]);
    let client = client(transport.clone(), 1, 5, Duration::from_secs(30));

    let body = serde_json::json!({"sku": "A-1"});
    let resp = client.post("/orders", Some(body), None).await.unwrap();
    assert!(resp.is_some());
    assert_eq!(transport.calls(), 2);
}

#[tokio::test]
async fn test_breaker_opens_and_short_circuits() {
    let transport = ScriptedTransport::always(Step::Status(500));
    let client = client(transport.clone(), 0, 3, Duration::from_secs(30));

    for _ in 0..3 {
        assert!(client.get("/x", Some("inventory")).await.is_err());
    }
    assert_eq!(
        client.circuit_status(Some("inventory")).unwrap().state,
        BreakerState::Open
    );

    for _ in 0..5 {
        assert!(client.get("/x", Some("inventory")).await.unwrap().is_none());
    }
    assert_eq!(transport.calls(), 3);
    assert_eq!(client.circuit_status(Some("inventory")).unwrap().rejected, 5);
}

#[tokio::test]
async fn test_circuit_keys_are_isolated() {
    let transport = ScriptedTransport::new(vec![Step::Status(500), Step::Status(500)]);
    let client = client(transport.clone(), 0, 2, Duration::from_secs(30));

    assert!(client.get("/a", Some("a")).await.is_err());
    assert!(client.get("/a", Some("a")).await.is_err());
    assert!(client.get("/a", Some("a")).await.unwrap().is_none());

    let b = client.get("/b", Some("b")).await.unwrap();
    assert_eq!(b.map(|r| r.status), Some(200));
    assert_eq!(
        client.circuit_status(Some("b")).unwrap().state,
        BreakerState::Closed
    );
    assert_eq!(client.circuit_keys(), vec!["a".to_string(), "b".to_string()]);
    assert!(client.circuit_status(Some("never-used")).is_none());
}

#[tokio::test]
async fn test_recovery_scenario() {
    let transport = ScriptedTransport::new(vec![
        Step::Status(500),
        Step::Status(500),
        Step::Status(500),
    ]);
    let client = client(transport.clone(), 0, 3, Duration::from_millis(200));

    for _ in 0..3 {
        assert!(client.get("/r", Some("svc")).await.is_err());
    }
    assert!(client.get("/r", Some("svc")).await.unwrap().is_none());
    assert_eq!(transport.calls(), 3);

    tokio::time::sleep(Duration::from_millis(250)).await;

    let trial = client.get("/r", Some("svc")).await.unwrap();
    assert_eq!(trial.map(|r| r.status), Some(200));

    let status = client.circuit_status(Some("svc")).unwrap();
    assert_eq!(status.state, BreakerState::Closed);
    assert_eq!((status.successes, status.failures), (0, 0));
}

#[tokio::test]
async fn test_failed_trial_reopens() {
    let transport = ScriptedTransport::always(Step::Status(502));
    let client = client(transport.clone(), 0, 1, Duration::from_millis(50));

    assert!(client.get("/t", None).await.is_err());
    tokio::time::sleep(Duration::from_millis(80)).await;

    assert!(client.get("/t", None).await.is_err());
    assert_eq!(client.circuit_status(None).unwrap().state, BreakerState::Open);
    assert!(client.get("/t", None).await.unwrap().is_none());
    assert_eq!(transport.calls(), 2);
}

#[tokio::test]
async fn test_half_open_admits_single_trial() {
    let transport = ScriptedTransport::new(vec![
        Step::Status(500),
        Step::Hang(Duration::from_millis(100)),
    ]);
    let client = client(transport.clone(), 0, 1, Duration::from_millis(50));

    assert!(client.get("/h", None).await.is_err());
    tokio::time::sleep(Duration::from_millis(80)).await;

    let results = futures::future::join_all((0..3).map(|_| client.get("/h", None))).await;
    let admitted = results
        .iter()
        .filter(|r| matches!(r, Ok(Some(_))))
        .count();
    let fallbacks = results.iter().filter(|r| matches!(r, Ok(None))).count();

    assert_eq!(admitted, 1);
    assert_eq!(fallbacks, 2);
    assert_eq!(transport.calls(), 2);
    assert_eq!(client.circuit_status(None).unwrap().state, BreakerState::Closed);
}

#[tokio::test]
async fn test_rate_limited_responses_never_open_the_circuit() {
    let transport = ScriptedTransport::always(Step::Status(429));
    let client = client(transport.clone(), 0, 2, Duration::from_secs(30));

    for _ in 0..6 {
        let err = client.get("/limited", None).await.unwrap_err();
        assert_eq!(remote_status(&err), Some(429));
    }
    let status = client.circuit_status(None).unwrap();
    assert_eq!(status.state, BreakerState::Closed);
    assert_eq!(status.failures, 0);
    assert_eq!(transport.calls(), 6);
}

#[tokio::test]
async fn test_slow_call_times_out_at_twice_transport_timeout() {
    let transport = ScriptedTransport::always(Step::Hang(Duration::from_millis(400)));
    let client = ResilientClient::builder()
        .base_address("http://svc.test")
        .retries(0)
        .timeout(Duration::from_millis(50))
        .transport(transport)
        .build()
        .unwrap();

    match client.get("/slow", None).await {
        Err(Error::Timeout { key, after_ms }) => {
            assert_eq!(key, "default");
            assert_eq!(after_ms, 100);
        }
        other => panic!("expected timeout, got {:?}", other.map(|r| r.map(|x| x.status))),
    }
    assert_eq!(client.circuit_status(None).unwrap().timeouts, 1);
}

#[tokio::test]
async fn test_manual_reset_closes_circuit() {
    let transport = ScriptedTransport::new(vec![Step::Status(500)]);
    let client = client(transport.clone(), 0, 1, Duration::from_secs(60));

    assert!(client.get("/m", None).await.is_err());
    assert!(client.get("/m", None).await.unwrap().is_none());

    assert!(client.reset_circuit(None));
    assert!(!client.reset_circuit(Some("unknown")));

    let resp = client.get("/m", None).await.unwrap();
    assert_eq!(resp.map(|r| r.status), Some(200));
}

#[tokio::test]
async fn test_each_request_gets_a_fresh_retry_budget() {
    let transport = ScriptedTransport::new(vec![Step::Status(500), Step::Status(500)]);
    let client = client(transport.clone(), 1, 10, Duration::from_secs(60));

    let err = client.get("/budget", None).await.unwrap_err();
    assert_eq!(remote_status(&err), Some(500));
    assert_eq!(transport.calls(), 2);

    transport.push([Step::Status(500)]);
    let resp = client.get("/budget", None).await.unwrap();
    assert_eq!(resp.map(|r| r.status), Some(200));
    assert_eq!(transport.calls(), 4);
}
