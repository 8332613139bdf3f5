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

//! WebSocket dialing
//!
//! Knows nothing about the query protocol: it opens the socket with the
//! caller's signed headers and hands back the two halves.

use crate::error::{ClientError, Result};
use futures_util::StreamExt;
use futures_util::stream::{SplitSink, SplitStream};
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::HeaderMap;
use tokio_tungstenite::tungstenite::protocol::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};
use tracing::debug;

pub type WsStreamInner = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Write half of the connection
pub type WsSink = SplitSink<WsStreamInner, Message>;

/// Read half of the connection
pub type WsStream = SplitStream<WsStreamInner>;

/// Open a WebSocket to `url`, adding `headers` to the upgrade request
pub async fn dial(url: &str, headers: &HeaderMap) -> Result<(WsSink, WsStream)> {
    debug!(url = %url, "Connecting to WebSocket");

    let mut request = url
        .into_client_request()
        .map_err(|e| ClientError::Dial(e.to_string()))?;
    for (name, value) in headers {
        request.headers_mut().insert(name.clone(), value.clone());
    }

    let (ws, response) = connect_async(request)
        .await
        .map_err(|e| ClientError::Dial(e.to_string()))?;

    debug!(url = %url, status = %response.status(), "WebSocket connected");
    Ok(ws.split())
}
