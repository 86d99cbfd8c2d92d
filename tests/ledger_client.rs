//! Ledger client tests against a mock JSON-RPC node

use mockito::Matcher;
use serde_json::json;
use std::io::Write;
use std::time::Duration;
use ticket_miner::ledger::{BackoffConfig, Credentials, LedgerClient, SolutionBroadcaster};

const TICKET: &str = "20abcdef";

fn client(url: &str) -> LedgerClient {
    client_with_timeout(url, Duration::from_secs(5))
}

fn client_with_timeout(url: &str, timeout: Duration) -> LedgerClient {
    LedgerClient::new(
        url,
        Credentials::new("alice", "secret").unwrap(),
        timeout,
    )
    .unwrap()
    .with_backoff_config(BackoffConfig {
        initial_delay: Duration::from_millis(10),
        max_delay: Duration::from_millis(20),
        multiplier: 2.0,
        max_retries: 2,
    })
}

#[tokio::test]
async fn accepted_when_error_is_null() {
    let mut server = mockito::Server::new_async().await;
    let mock = server
        .mock("POST", "/")
        .match_header("content-type", "application/json")
        // base64("alice:secret")
        .match_header("authorization", "Basic YWxpY2U6c2VjcmV0")
        .match_body(Matcher::PartialJson(json!({
            "jsonrpc": "1.0",
            "method": "broadcastsupportticket",
            "params": [TICKET],
        })))
        .with_status(200)
        .with_header("content-type", "application/json")
        .with_body(r#"{"result":"ok","error":null,"id":"x"}"#)
        .create_async()
        .await;

    let outcome = client(&server.url()).broadcast(TICKET).await;

    mock.assert_async().await;
    assert!(outcome.accepted);
    assert_eq!(outcome.error_message, None);
}

#[tokio::test]
async fn custom_method_name_is_sent() {
    let mut server = mockito::Server::new_async().await;
    let mock = server
        .mock("POST", "/")
        .match_body(Matcher::PartialJson(json!({"method": "submitticket"})))
        .with_status(200)
        .with_body(r#"{"result":null}"#)
        .create_async()
        .await;

    let outcome = client(&server.url())
        .with_method("submitticket")
        .broadcast(TICKET)
        .await;

    mock.assert_async().await;
    assert!(outcome.accepted);
}

#[tokio::test]
async fn rejected_on_error_object() {
    let mut server = mockito::Server::new_async().await;
    server
        .mock("POST", "/")
        .with_status(500)
        .with_body(r#"{"result":null,"error":{"code":-25,"message":"stale ticket"},"id":"x"}"#)
        .create_async()
        .await;

    let outcome = client(&server.url()).broadcast(TICKET).await;

    assert!(!outcome.accepted);
    assert_eq!(outcome.error_message.as_deref(), Some("stale ticket (code -25)"));
}

#[tokio::test]
async fn rejected_on_non_json_body() {
    let mut server = mockito::Server::new_async().await;
    server
        .mock("POST", "/")
        .with_status(401)
        .with_body("Unauthorized")
        .create_async()
        .await;

    let outcome = client(&server.url()).broadcast(TICKET).await;

    assert!(!outcome.accepted);
    let message = outcome.error_message.unwrap();
    assert!(message.contains("Non-JSON response"), "{}", message);
    assert!(message.contains("401"), "{}", message);
}

#[tokio::test]
async fn rejected_when_node_is_unreachable() {
    // Reserve a port, then free it so nothing listens there
    let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    let port = listener.local_addr().unwrap().port();
    drop(listener);

    let outcome = client(&format!("http://127.0.0.1:{}/", port))
        .broadcast(TICKET)
        .await;

    assert!(!outcome.accepted);
    assert!(outcome.error_message.is_some());
}

#[tokio::test]
async fn timed_out_broadcast_is_not_resent() {
    let mut server = mockito::Server::new_async().await;
    let mock = server
        .mock("POST", "/")
        .with_status(200)
        .with_chunked_body(|w| {
            std::thread::sleep(Duration::from_millis(300));
            w.write_all(br#"{"result":"ok","error":null}"#)
        })
        .expect(1)
        .create_async()
        .await;

    let outcome = client_with_timeout(&server.url(), Duration::from_millis(100))
        .broadcast(TICKET)
        .await;

    assert!(!outcome.accepted);
    mock.assert_async().await;
}
