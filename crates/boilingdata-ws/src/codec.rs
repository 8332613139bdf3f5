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

//! JSON codec for query-service frames
//!
//! Every frame is one JSON object. Requests are `Payload`s; inbound frames
//! are decoded first as a generic `Response` envelope and, for log frames,
//! a second time as a `LogMessage`.

use crate::error::{ClientError, Result};
use crate::message::{LogMessage, Payload, Response};
use serde_json::Value;

pub fn encode_payload(payload: &Payload) -> Result<Vec<u8>> {
    serde_json::to_vec(payload).map_err(|e| ClientError::Protocol(e.to_string()))
}

/// Decode a caller-supplied request so its request id can be correlated
pub fn decode_payload(data: &[u8]) -> Result<Payload> {
    serde_json::from_slice(data)
        .map_err(|e| ClientError::Protocol(format!("error unmarshalling Payload : {e}")))
}

/// Decode the generic response envelope
///
/// On failure the error carries whatever request id can still be pulled out
/// of the frame, so the failure lands on the right caller.
pub fn decode_envelope(data: &[u8]) -> Result<Response> {
    serde_json::from_slice(data)
        .map_err(|e| ClientError::decode(e.to_string(), recover_request_id(data)))
}

pub fn decode_log(data: &[u8]) -> Result<LogMessage> {
    serde_json::from_slice(data)
        .map_err(|e| ClientError::decode(e.to_string(), recover_request_id(data)))
}

/// Best-effort extraction of `requestId` from a frame that failed to decode
pub fn recover_request_id(data: &[u8]) -> Option<String> {
    let value: Value = serde_json::from_slice(data).ok()?;
    value
        .get("requestId")
        .and_then(Value::as_str)
        .filter(|id| !id.is_empty())
        .map(str::to_string)
}
