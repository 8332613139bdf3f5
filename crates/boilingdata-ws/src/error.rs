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

use std::time::Duration;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, ClientError>;

/// Errors surfaced by the query-service client.
///
/// Variants are `Clone` because one teardown cause is delivered to every
/// request still waiting on the connection.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ClientError {
    /// The WebSocket handshake failed; the connection stays closed.
    #[error("Dial error: {0}")]
    Dial(String),

    /// Writing a frame failed. Fatal for the connection.
    #[error("Could not send message to websocket: {0}")]
    Write(String),

    /// Reading a frame failed or the server went away. Fatal for the connection.
    #[error("Could not read message from websocket: {0}")]
    Read(String),

    /// An inbound envelope could not be decoded. Scoped to one request.
    #[error("Error parsing JSON: {message}")]
    Decode {
        message: String,
        request_id: Option<String>,
    },

    /// The server reported an ERROR-level log line for the request.
    #[error("Log message from server: {0}")]
    Server(String),

    /// The first fragment of a result carried zero rows.
    #[error("No response from server. Check SQL syntax")]
    EmptyResult,

    /// The response did not arrive within the configured budget.
    #[error("Timeout after {duration:?} while waiting for response to {request_id}")]
    Timeout {
        request_id: String,
        duration: Duration,
    },

    /// An operation needed an open connection and there was none.
    #[error("Not connected to WebSocket server")]
    NotConnected,

    /// The connection was torn down while the request was outstanding.
    #[error("Connection closed: {0}")]
    ConnectionClosed(String),

    /// A caller-supplied payload was malformed.
    #[error("Protocol error: {0}")]
    Protocol(String),
}

impl ClientError {
    /// Create a decode error tied to whatever request id could be recovered
    pub fn decode(message: impl Into<String>, request_id: Option<String>) -> Self {
        Self::Decode {
            message: message.into(),
            request_id,
        }
    }

    /// Create a connection-closed error with the teardown reason
    pub fn closed(reason: impl std::fmt::Display) -> Self {
        Self::ConnectionClosed(reason.to_string())
    }

    /// Whether this error tears the whole connection down
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            Self::Write(_) | Self::Read(_) | Self::NotConnected | Self::ConnectionClosed(_)
        )
    }
}
