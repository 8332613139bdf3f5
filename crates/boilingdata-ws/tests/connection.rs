// Copyright (C) 2025 Tom Waddington
//
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU Affero General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
// GNU Affero General Public License for more details.

//! Connection lifecycle and request correlation against a live socket

mod common;

use boilingdata_ws::{ClientError, HeaderMap, HeaderValue, Payload, WssClient, encode_payload};
use common::{API_KEY_HEADER, MockServer, eventually};
use std::time::{Duration, Instant};

async fn send(client: &WssClient, sql: &str) -> String {
    let payload = Payload::query(sql);
    client
        .send_message(encode_payload(&payload).expect("encode"), &payload.request_id)
        .await
        .expect("send_message");
    payload.request_id
}

#[tokio::test]
async fn test_connect_is_idempotent() {
    let server = MockServer::start().await;
    let client = WssClient::new(server.config());
    assert!(client.is_closed());

    client.connect().await.expect("first connect");
    client.connect().await.expect("second connect");

    assert!(!client.is_closed());
    assert_eq!(client.stats().connects, 1);
    assert!(eventually(|| server.connections() == 1).await);

    assert!(client.shutdown().await);
    assert!(client.is_closed());
    assert!(!client.shutdown().await, "Second shutdown has nothing to do");
}

#[tokio::test]
async fn test_single_frame_result_keeps_column_order() {
    let server = MockServer::start().await;
    let client = WssClient::new(server.config());
    client.connect().await.expect("connect");

    let request_id = send(&client, "SELECT zeta, alpha FROM t").await;
    let response = client.get_response(&request_id).await.expect("response");

    assert_eq!(response.request_id, request_id);
    assert_eq!(response.data.len(), 2);
    assert_eq!(
        response.keys,
        Some(vec![
            "zeta".to_string(),
            "alpha".to_string(),
            "requestId".to_string()
        ])
    );
    assert_eq!(client.stats().in_flight, 0, "Observed request is removed");
}

#[tokio::test]
async fn test_out_of_order_sub_batches_are_merged() {
    let server = MockServer::start().await;
    let client = WssClient::new(server.config());
    client.connect().await.expect("connect");

    let request_id = send(&client, "SPLIT 5").await;
    let response = client.get_response(&request_id).await.expect("response");

    let serials: Vec<i64> = response
        .data
        .iter()
        .map(|row| row["serial"].as_i64().expect("serial column"))
        .collect();
    assert_eq!(serials, vec![1, 2, 3, 4, 5]);
    assert_eq!(response.sub_batch_serial, 5);
    assert_eq!(response.total_sub_batches, 5);
}

#[tokio::test]
async fn test_empty_first_fragment_returns_without_waiting() {
    let server = MockServer::start().await;
    let client = WssClient::new(server.config());
    client.connect().await.expect("connect");

    let started = Instant::now();
    let request_id = send(&client, "EMPTY").await;
    let err = client.get_response(&request_id).await.expect_err("no rows");

    assert_eq!(err, ClientError::EmptyResult);
    assert!(started.elapsed() < Duration::from_secs(5));
}

#[tokio::test]
async fn test_server_error_is_scoped_to_request() {
    let server = MockServer::start().await;
    let client = WssClient::new(server.config());
    client.connect().await.expect("connect");

    let failing = send(&client, "FAIL Catalog Error: Table nope does not exist").await;
    match client.get_response(&failing).await {
        Err(ClientError::Server(message)) => assert!(message.contains("nope")),
        other => panic!("Expected Server error, got: {:?}", other),
    }

    assert!(!client.is_closed(), "Request errors keep the connection open");
    let next = send(&client, "SELECT 1").await;
    assert!(client.get_response(&next).await.is_ok());
}

#[tokio::test]
async fn test_silent_server_times_out_within_budget() {
    let server = MockServer::start().await;
    let budget = Duration::from_millis(300);
    let client = WssClient::new(server.config().with_response_timeout(budget));
    client.connect().await.expect("connect");

    let request_id = send(&client, "SILENT").await;
    let started = Instant::now();
    let err = client.get_response(&request_id).await.expect_err("no reply");
    let elapsed = started.elapsed();

    assert!(matches!(err, ClientError::Timeout { .. }), "got {err:?}");
    assert!(elapsed >= budget, "Returned early after {elapsed:?}");
    assert!(elapsed < budget + Duration::from_secs(1), "Overran: {elapsed:?}");
    assert!(!client.is_closed());
}

#[tokio::test]
async fn test_concurrent_requests_are_correlated() {
    let server = MockServer::start().await;
    let client = WssClient::new(server.config());
    client.connect().await.expect("connect");

    let tasks: Vec<_> = (0..12)
        .map(|i| {
            let client = client.clone();
            tokio::spawn(async move {
                let sql = if i % 2 == 0 { "SPLIT 3" } else { "SELECT 1" };
                let request_id = send(&client, sql).await;
                let response = client.get_response(&request_id).await.expect("response");
                (request_id, response)
            })
        })
        .collect();

    for task in tasks {
        let (request_id, response) = task.await.expect("task panicked");
        assert_eq!(response.request_id, request_id);
        assert!(
            response
                .data
                .iter()
                .all(|row| row["requestId"].as_str() == Some(request_id.as_str())),
            "Rows from another request leaked into {request_id}"
        );
    }
}

#[tokio::test]
async fn test_idle_connection_closes_and_reconnects() {
    let server = MockServer::start().await;
    let client = WssClient::new(server.config().with_idle_timeout(Duration::from_millis(200)));

    client.connect().await.expect("connect");
    assert!(!client.is_closed());
    assert!(eventually(|| client.is_closed()).await, "Idle timer never fired");

    client.connect().await.expect("reconnect");
    assert!(!client.is_closed());
    assert!(
        eventually(|| client.is_closed()).await,
        "Idle timer must re-arm for the next connection"
    );

    let stats = client.stats();
    assert_eq!(stats.connects, 2);
    assert_eq!(stats.teardowns, 2);
}

#[tokio::test]
async fn test_traffic_postpones_idle_timeout() {
    let server = MockServer::start().await;
    let client = WssClient::new(server.config().with_idle_timeout(Duration::from_millis(400)));
    client.connect().await.expect("connect");

    for _ in 0..4 {
        tokio::time::sleep(Duration::from_millis(200)).await;
        let request_id = send(&client, "SELECT 1").await;
        client.get_response(&request_id).await.expect("response");
        assert!(!client.is_closed());
    }
}

#[tokio::test]
async fn test_concurrent_shutdown_runs_once() {
    let server = MockServer::start().await;
    let client = WssClient::new(server.config());
    client.connect().await.expect("connect");

    let results = futures_util::future::join_all((0..8).map(|_| {
        let client = client.clone();
        async move { client.shutdown().await }
    }))
    .await;

    assert_eq!(results.iter().filter(|done| **done).count(), 1);
    assert!(client.is_closed());
    assert_eq!(client.stats().teardowns, 1);
}

#[tokio::test]
async fn test_shutdown_fails_waiting_callers() {
    let server = MockServer::start().await;
    let client = WssClient::new(server.config().with_response_timeout(Duration::from_secs(30)));
    client.connect().await.expect("connect");

    let request_id = send(&client, "SILENT").await;
    let waiter = {
        let client = client.clone();
        let request_id = request_id.clone();
        tokio::spawn(async move { client.get_response(&request_id).await })
    };
    assert!(eventually(|| client.stats().in_flight == 1).await);
    tokio::time::sleep(Duration::from_millis(50)).await;

    client.shutdown().await;

    let outcome = tokio::time::timeout(Duration::from_secs(2), waiter)
        .await
        .expect("waiter must not hang")
        .expect("task panicked");
    assert!(
        matches!(outcome, Err(ClientError::ConnectionClosed(_))),
        "got {outcome:?}"
    );
    assert_eq!(client.stats().in_flight, 0);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_send_racing_shutdown_is_never_orphaned() {
    let server = MockServer::start().await;
    let client = WssClient::new(server.config().with_response_timeout(Duration::from_secs(5)));

    for _ in 0..100 {
        client.connect().await.expect("connect");

        let closing = {
            let client = client.clone();
            tokio::spawn(async move { client.shutdown().await })
        };
        let payload = Payload::query("SILENT");
        let sent = client
            .send_message(encode_payload(&payload).expect("encode"), &payload.request_id)
            .await;
        closing.await.expect("shutdown task panicked");

        match sent {
            Ok(()) => {
                let started = Instant::now();
                match client.get_response(&payload.request_id).await {
                    Err(ClientError::ConnectionClosed(_)) => {}
                    other => panic!("Accepted request must fail with the teardown, got {other:?}"),
                }
                assert!(started.elapsed() < Duration::from_secs(1));
            }
            Err(ClientError::NotConnected) => {}
            Err(other) => panic!("Unexpected send error: {other:?}"),
        }
        assert_eq!(client.stats().in_flight, 0);
    }
}

#[tokio::test]
async fn test_interrupt_tears_down_then_reconnects() {
    let server = MockServer::start().await;
    let client = WssClient::new(server.config());
    client.connect().await.expect("connect");

    client.interrupt();
    assert!(eventually(|| client.is_closed()).await);

    client.connect().await.expect("reconnect after interrupt");
    assert!(!client.is_closed());

    let request_id = send(&client, "SELECT 1").await;
    let response = client
        .get_response(&request_id)
        .await
        .expect("requests work again after reconnect");
    assert_eq!(response.data.len(), 2);

    // The listener keeps serving interrupts after the first one
    client.interrupt();
    assert!(eventually(|| client.is_closed()).await);
    assert_eq!(client.stats().teardowns, 2);
}

#[tokio::test]
async fn test_server_close_is_fatal_for_outstanding_requests() {
    let server = MockServer::start().await;
    let client = WssClient::new(server.config());
    client.connect().await.expect("connect");

    let request_id = send(&client, "CLOSE").await;
    match client.get_response(&request_id).await {
        Err(ClientError::Read(_)) => {}
        other => panic!("Expected Read error, got: {:?}", other),
    }
    assert!(eventually(|| client.is_closed()).await);

    client.connect().await.expect("reconnect");
    let request_id = send(&client, "SELECT 1").await;
    assert!(client.get_response(&request_id).await.is_ok());
}

#[tokio::test]
async fn test_headers_are_sent_on_upgrade() {
    let server = MockServer::start().await;
    let client = WssClient::new(server.config());

    let mut headers = HeaderMap::new();
    headers.insert(API_KEY_HEADER, HeaderValue::from_static("first"));
    client.set_headers(headers);
    client.connect().await.expect("connect");
    client.shutdown().await;

    let mut headers = HeaderMap::new();
    headers.insert(API_KEY_HEADER, HeaderValue::from_static("second"));
    client.set_headers(headers);
    client.connect().await.expect("reconnect");

    assert!(eventually(|| server.api_keys().len() == 2).await);
    assert_eq!(server.api_keys(), vec!["first", "second"]);
}

#[tokio::test]
async fn test_query_connects_on_demand() {
    let server = MockServer::start().await;
    let client = WssClient::new(server.config());

    let response = client.query("SPLIT 2").await.expect("query");

    assert_eq!(response.data.len(), 2);
    assert!(!client.is_closed());
}
