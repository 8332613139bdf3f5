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

//! # BoilingData WebSocket Client
//!
//! An async client that keeps one WebSocket open to the query service and
//! multiplexes SQL requests over it. Results split into sub-batches are
//! reassembled before they reach the caller.
//!
//! ## Example
//!
//! ```no_run
//! use boilingdata_ws::{ClientConfig, Payload, WssClient, encode_payload};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let client = WssClient::new(ClientConfig::new("wss://example.invalid/dev"));
//!     client.connect().await?;
//!
//!     let payload = Payload::query("SELECT 1 AS one");
//!     client
//!         .send_message(encode_payload(&payload)?, &payload.request_id)
//!         .await?;
//!     let response = client.get_response(&payload.request_id).await?;
//!     println!("{} rows, columns {:?}", response.data.len(), response.keys);
//!     Ok(())
//! }
//! ```

mod assembler;
mod codec;
mod config;
mod connection;
mod error;
mod facade;
mod lifecycle;
mod message;
mod receiver;
mod sender;
mod table;
mod transport;

pub use assembler::{Assembly, SubBatches, extract_keys};
pub use codec::{decode_envelope, decode_log, decode_payload, encode_payload, recover_request_id};
pub use config::{
    ClientConfig, DEFAULT_IDLE_TIMEOUT_MINUTES, DEFAULT_OUTBOUND_CAPACITY, DEFAULT_RESPONSE_TIMEOUT,
};
pub use connection::{ConnectionStats, TeardownReason, WssClient};
pub use error::{ClientError, Result};
pub use message::{ERROR_LEVEL, LogMessage, MessageType, Payload, Response, Row, SQL_QUERY};
pub use table::{CorrelationTable, Outcome};
pub use tokio_tungstenite::tungstenite::http::{HeaderMap, HeaderName, HeaderValue};
