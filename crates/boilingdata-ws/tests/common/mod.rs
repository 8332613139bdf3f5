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

//! In-process query service used by the integration tests
//!
//! The server answers each `SQL_QUERY` according to its `sql` text:
//!
//! - `SPLIT <n>`: `n` DATA fragments, sent in reverse serial order
//! - `EMPTY`: a first fragment with no rows out of three
//! - `FAIL <message>`: an ERROR log line for the request
//! - `SILENT`: nothing at all
//! - `CLOSE`: a close frame, ending the connection
//! - anything else: one unsplit DATA frame with two rows

#![allow(dead_code)]

use boilingdata_ws::ClientConfig;
use futures_util::{SinkExt, StreamExt};
use serde_json::{Value, json};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::net::{TcpListener, TcpStream};
use tokio_tungstenite::WebSocketStream;
use tokio_tungstenite::tungstenite::handshake::server::{ErrorResponse, Request, Response};
use tokio_tungstenite::tungstenite::protocol::Message;

pub const API_KEY_HEADER: &str = "x-api-key";

pub struct MockServer {
    pub url: String,
    connections: Arc<AtomicUsize>,
    api_keys: Arc<Mutex<Vec<String>>>,
}

impl MockServer {
    pub async fn start() -> Self {
        let listener = TcpListener::bind("127.0.0.1:0")
            .await
            .expect("bind mock server");
        let addr = listener.local_addr().expect("local addr");

        let connections = Arc::new(AtomicUsize::new(0));
        let api_keys = Arc::new(Mutex::new(Vec::new()));

        let accepted = Arc::clone(&connections);
        let seen_keys = Arc::clone(&api_keys);
        tokio::spawn(async move {
            while let Ok((stream, _)) = listener.accept().await {
                accepted.fetch_add(1, Ordering::SeqCst);
                let seen_keys = Arc::clone(&seen_keys);
                tokio::spawn(async move {
                    if let Some(ws) = handshake(stream, seen_keys).await {
                        serve(ws).await;
                    }
                });
            }
        });

        Self {
            url: format!("ws://{addr}/"),
            connections,
            api_keys,
        }
    }

    pub fn config(&self) -> ClientConfig {
        ClientConfig::new(self.url.clone())
            .with_interrupt_handling(false)
            .with_response_timeout(Duration::from_secs(5))
    }

    /// Number of WebSocket connections accepted so far
    pub fn connections(&self) -> usize {
        self.connections.load(Ordering::SeqCst)
    }

    /// Values of the api key header seen on each upgrade request
    pub fn api_keys(&self) -> Vec<String> {
        self.api_keys.lock().expect("api key lock").clone()
    }
}

async fn handshake(
    stream: TcpStream,
    seen_keys: Arc<Mutex<Vec<String>>>,
) -> Option<WebSocketStream<TcpStream>> {
    let record = move |request: &Request, response: Response| -> Result<Response, ErrorResponse> {
        if let Some(key) = request
            .headers()
            .get(API_KEY_HEADER)
            .and_then(|v| v.to_str().ok())
        {
            seen_keys.lock().expect("api key lock").push(key.to_string());
        }
        Ok(response)
    };
    tokio_tungstenite::accept_hdr_async(stream, record).await.ok()
}

async fn serve(mut ws: WebSocketStream<TcpStream>) {
    while let Some(Ok(message)) = ws.next().await {
        let Message::Text(text) = message else {
            continue;
        };
        let Ok(payload) = serde_json::from_str::<Value>(&text) else {
            continue;
        };
        let request_id = payload["requestId"].as_str().unwrap_or_default().to_string();
        let sql = payload["sql"].as_str().unwrap_or_default().to_string();

        for frame in replies(&request_id, &sql) {
            match frame {
                Reply::Frame(frame) => {
                    if ws.send(Message::Text(frame)).await.is_err() {
                        return;
                    }
                }
                Reply::Close => {
                    let _ = ws.close(None).await;
                    return;
                }
            }
        }
    }
}

enum Reply {
    Frame(String),
    Close,
}

fn replies(request_id: &str, sql: &str) -> Vec<Reply> {
    if let Some(count) = sql.strip_prefix("SPLIT ") {
        let total: i64 = count.trim().parse().unwrap_or(1);
        return (1..=total)
            .rev()
            .map(|serial| {
                Reply::Frame(data_frame(
                    request_id,
                    serial,
                    total,
                    json!([{"serial": serial, "requestId": request_id}]),
                ))
            })
            .collect();
    }
    if let Some(message) = sql.strip_prefix("FAIL ") {
        return vec![Reply::Frame(
            json!({
                "messageType": "LOG_MESSAGE",
                "logLevel": "ERROR",
                "requestId": request_id,
                "logMessage": message,
            })
            .to_string(),
        )];
    }

    match sql {
        "SILENT" => Vec::new(),
        "CLOSE" => vec![Reply::Close],
        "EMPTY" => vec![Reply::Frame(data_frame(request_id, 1, 3, json!([])))],
        _ => vec![
            Reply::Frame(
                json!({
                    "messageType": "LOG_MESSAGE",
                    "logLevel": "INFO",
                    "requestId": request_id,
                    "logMessage": "Query started",
                })
                .to_string(),
            ),
            Reply::Frame(data_frame(
                request_id,
                0,
                0,
                json!([
                    {"zeta": 1, "alpha": "a", "requestId": request_id},
                    {"zeta": 2, "alpha": "b", "requestId": request_id},
                ]),
            )),
        ],
    }
}

pub fn data_frame(request_id: &str, serial: i64, total: i64, rows: Value) -> String {
    json!({
        "messageType": "DATA",
        "requestId": request_id,
        "batchSerial": 1,
        "totalBatches": 1,
        "subBatchSerial": serial,
        "totalSubBatches": total,
        "data": rows,
    })
    .to_string()
}

/// Poll `condition` every few milliseconds for up to two seconds
pub async fn eventually(mut condition: impl FnMut() -> bool) -> bool {
    for _ in 0..200 {
        if condition() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    condition()
}
