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

//! Request submission and response retrieval

use crate::codec;
use crate::connection::WssClient;
use crate::error::{ClientError, Result};
use crate::message::{Payload, Response};
use crate::sender::Outbound;
use tracing::{debug, warn};

impl WssClient {
    /// Queue a serialized request frame for the sender
    ///
    /// Registers `request_id` as pending and clears the fatal slot while the
    /// connection is known to be live, then hands the frame off. Fails with `NotConnected` when there is no open
    /// connection; call `connect` first.
    pub async fn send_message(&self, message: impl Into<Vec<u8>>, request_id: &str) -> Result<()> {
        let frame = String::from_utf8(message.into())
            .map_err(|e| ClientError::Protocol(format!("request is not valid UTF-8: {e}")))?;

        let Some((generation, outbound)) = self.inner.outbound().await else {
            return Err(ClientError::NotConnected);
        };

        // Teardown needs the link lock, so queue space is awaited outside it
        let permit = outbound
            .reserve_owned()
            .await
            .map_err(|_| ClientError::NotConnected)?;

        debug!(request_id = %request_id, "Queueing request");
        self.inner
            .enqueue(
                generation,
                permit,
                Outbound {
                    request_id: request_id.to_string(),
                    frame,
                },
            )
            .await
    }

    /// Wait for the outcome of `request_id`
    ///
    /// Returns the merged response once every sub-batch has arrived, the
    /// request's own error, or the connection's fatal error. Gives up after
    /// the configured response timeout and forgets the request.
    pub async fn get_response(&self, request_id: &str) -> Result<Response> {
        let completion = self.inner.table.subscribe(request_id)?;
        let budget = self.inner.config.response_timeout();

        match tokio::time::timeout(budget, completion).await {
            Ok(Ok(outcome)) => outcome,
            Ok(Err(_)) => Err(ClientError::closed(format!(
                "request {request_id} was dropped before completing"
            ))),
            Err(_) => {
                warn!(request_id = %request_id, timeout = ?budget, "Timed out waiting for response");
                self.inner.table.forget(request_id);
                Err(ClientError::Timeout {
                    request_id: request_id.to_string(),
                    duration: budget,
                })
            }
        }
    }

    /// Send one SQL statement and wait for its merged result
    ///
    /// Connects first if needed. A fresh request id is generated per call.
    pub async fn query(&self, sql: &str) -> Result<Response> {
        self.connect().await?;

        let payload = Payload::query(sql);
        let frame = codec::encode_payload(&payload)?;
        self.send_message(frame, &payload.request_id).await?;
        self.get_response(&payload.request_id).await
    }
}
