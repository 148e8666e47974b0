//! ResilientClient over the real reqwest transport against mockito

use super::mock_server::MockServerFixture;
use cascade_guard::transport::HttpTransport;
use cascade_guard::{Error, HttpRequest, ResilientClient, Transport};
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;

#[tokio::test]
async fn test_successful_json_response() {
    let fixture = MockServerFixture::new().await;
    let mock = fixture
        .mock_json("GET", "/items", 200, r#"{"items":[1,2,3]}"#, 1)
        .await;
    let client = fixture.client_builder(3).build().unwrap();

    let resp = client.get("/items", Some("items")).await.unwrap().unwrap();
    assert_eq!(resp.status, 200);
    assert_eq!(resp.header("content-type"), Some("application/json"));
    let body: serde_json::Value = resp.json().unwrap();
    assert_eq!(body["items"], json!([1, 2, 3]));
    mock.assert_async().await;
}

#[tokio::test]
async fn test_bad_request_sent_once() {
    let fixture = MockServerFixture::new().await;
    let mock = fixture
        .mock_json("GET", "/invalid", 400, r#"{"error":"bad input"}"#, 1)
        .await;
    let client = fixture.client_builder(3).build().unwrap();

    match client.get("/invalid", None).await {
        Err(Error::Remote { status, message }) => {
            assert_eq!(status, 400);
            assert!(message.contains("bad input"));
        }
        other => panic!("expected remote error, got {:?}", other.map(|r| r.is_some())),
    }
    mock.assert_async().await;
}

#[tokio::test]
async fn test_unavailable_retried_until_budget_spent() {
    let fixture = MockServerFixture::new().await;
    let mock = fixture
        .mock_json("GET", "/busy", 503, r#"{"error":"busy"}"#, 4)
        .await;
    let client = fixture.client_builder(3).build().unwrap();

    let err = client.get("/busy", None).await.unwrap_err();
    assert_eq!(err.status(), Some(503));
    mock.assert_async().await;
}

#[tokio::test]
async fn test_default_headers_are_sent() {
    let fixture = MockServerFixture::new().await;
    let mock = fixture
        .mock_with_header("/secure", "x-api-key", "secret")
        .await;
    let client = fixture
        .client_builder(0)
        .default_header("X-Api-Key", "secret")
        .build()
        .unwrap();

    let resp = client.get("/secure", None).await.unwrap().unwrap();
    assert_eq!(resp.text(), "ok");
    mock.assert_async().await;
}

#[tokio::test]
async fn test_post_sends_json_body() {
    let fixture = MockServerFixture::new().await;
    let payload = json!({"sku": "A-1", "qty": 2});
    let mock = fixture.mock_json_body("/orders", payload.clone()).await;
    let client = fixture.client_builder(0).build().unwrap();

    let resp = client
        .post(&fixture.url("/orders"), Some(payload), None)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(resp.status, 201);
    mock.assert_async().await;
}

#[tokio::test]
async fn test_unreachable_host_is_a_transport_error() {
    let client = ResilientClient::builder()
        .base_address("http://127.0.0.1:1")
        .retries(1)
        .retry_delay(Arc::new(|_| Duration::from_millis(1)))
        .timeout(Duration::from_secs(2))
        .build()
        .unwrap();

    let err = client.get("/nothing", None).await.unwrap_err();
    assert!(matches!(err, Error::Transport(_)));
}

#[tokio::test]
async fn test_transport_returns_non_success_as_response() {
    let fixture = MockServerFixture::new().await;
    let _mock = fixture
        .mock_json("DELETE", "/gone", 410, r#"{"gone":true}"#, 1)
        .await;
    let transport = HttpTransport::new(Duration::from_secs(2)).unwrap();

    let req = HttpRequest::new(reqwest::Method::DELETE, fixture.url("/gone"));
    let resp = transport.send(&req).await.unwrap();
    assert_eq!(resp.status, 410);
    assert!(!resp.is_success());
    assert_eq!(transport.name(), "http");
}
