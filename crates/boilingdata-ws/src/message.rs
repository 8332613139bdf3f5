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

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value};
use uuid::Uuid;

/// One result row. Field order follows the wire order.
pub type Row = Map<String, Value>;

/// Message type carried by every query request
pub const SQL_QUERY: &str = "SQL_QUERY";

/// Log level that turns a server log line into a request error
pub const ERROR_LEVEL: &str = "ERROR";

/// Outbound query request
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Payload {
    #[serde(rename = "messageType")]
    pub message_type: String,
    pub sql: String,
    #[serde(rename = "requestId")]
    pub request_id: String,
}

impl Payload {
    /// Build a query payload with a freshly generated request id
    pub fn query(sql: impl Into<String>) -> Self {
        Self::with_request_id(sql, Uuid::new_v4().to_string())
    }

    /// Build a query payload for a caller-chosen request id
    pub fn with_request_id(sql: impl Into<String>, request_id: impl Into<String>) -> Self {
        Self {
            message_type: SQL_QUERY.to_string(),
            sql: sql.into(),
            request_id: request_id.into(),
        }
    }
}

/// Inbound message types
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MessageType {
    Data,
    Info,
    LogMessage,
    #[default]
    #[serde(other)]
    Unknown,
}

/// Treat `"data": null` the same as a missing or empty array
fn deserialize_rows<'de, D>(deserializer: D) -> Result<Vec<Row>, D::Error>
where
    D: Deserializer<'de>,
{
    let rows: Option<Vec<Row>> = Option::deserialize(deserializer)?;
    Ok(rows.unwrap_or_default())
}

/// Inbound response envelope
///
/// Only `messageType`, `requestId`, `subBatchSerial`, `totalSubBatches` and
/// `data` drive correlation. The batch and split fields are carried through
/// untouched for callers that page across batches themselves.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Response {
    pub message_type: MessageType,
    pub request_id: String,
    pub batch_serial: i64,
    pub total_batches: i64,
    pub split_serial: i64,
    pub total_split_serials: i64,
    pub cache_info: Option<Value>,
    pub sub_batch_serial: i64,
    pub total_sub_batches: i64,
    #[serde(deserialize_with = "deserialize_rows")]
    pub data: Vec<Row>,
    /// Column order inferred from the first row of the final fragment
    #[serde(skip)]
    pub keys: Option<Vec<String>>,
}

impl Response {
    /// Whether this fragment closes its sub-batch series
    pub fn is_last_sub_batch(&self) -> bool {
        self.total_sub_batches == 0 || self.sub_batch_serial == self.total_sub_batches
    }
}

/// Server log line, sent in place of data for diagnostics and failures
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct LogMessage {
    pub message_type: MessageType,
    pub log_level: String,
    pub request_id: String,
    pub log_message: String,
}

impl LogMessage {
    pub fn is_error(&self) -> bool {
        self.log_level == ERROR_LEVEL
    }
}
