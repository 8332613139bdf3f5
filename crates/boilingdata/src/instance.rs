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

//! One user's connection to the query service

use crate::auth::Authenticator;
use crate::error::{InstanceError, Result};
use boilingdata_ws::{Payload, Response, WssClient, decode_payload, encode_payload};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

/// A client paired with the credentials used to (re)open it
///
/// The connection is opened lazily by `query` and reopened the same way
/// after an idle timeout or interrupt closed it.
pub struct Instance<A> {
    client: WssClient,
    auth: A,
    // Serializes authenticate + connect so concurrent queries dial once
    connecting: Mutex<()>,
}

impl<A: Authenticator> Instance<A> {
    pub fn new(client: WssClient, auth: A) -> Self {
        Self {
            client,
            auth,
            connecting: Mutex::new(()),
        }
    }

    pub fn client(&self) -> &WssClient {
        &self.client
    }

    pub fn authenticator(&self) -> &A {
        &self.auth
    }

    /// Authenticate and connect if the connection is closed
    pub async fn ensure_connected(&self) -> Result<()> {
        if !self.client.is_closed() {
            return Ok(());
        }

        let _guard = self.connecting.lock().await;
        if !self.client.is_closed() {
            return Ok(());
        }

        debug!("Connection closed, authenticating");
        let id_token = self
            .auth
            .authenticate()
            .await
            .map_err(InstanceError::Auth)?;
        let headers = self
            .auth
            .signed_headers(&id_token)
            .await
            .map_err(InstanceError::Signing)?;
        self.client.set_headers(headers);

        if let Err(e) = self.client.connect().await {
            warn!(error = %e, "Connect failed");
        }
        if self.client.is_closed() {
            let reason = self
                .client
                .last_error()
                .unwrap_or_else(|| "Websocket connection is closed".to_string());
            return Err(InstanceError::Connect(reason));
        }

        info!("Instance connected");
        Ok(())
    }

    /// Run one serialized `Payload` and return its merged result
    ///
    /// The request id is read from the payload itself. A result without
    /// rows is reported as `NoData`.
    pub async fn query(&self, payload: &[u8]) -> Result<Response> {
        self.ensure_connected().await?;

        let decoded = decode_payload(payload)?;
        self.client
            .send_message(payload.to_vec(), &decoded.request_id)
            .await?;
        let response = self.client.get_response(&decoded.request_id).await?;

        if response.data.is_empty() {
            return Err(InstanceError::NoData);
        }
        Ok(response)
    }

    /// Build a payload for `sql` with a fresh request id and run it
    pub async fn query_sql(&self, sql: &str) -> Result<Response> {
        let payload = encode_payload(&Payload::query(sql))?;
        self.query(&payload).await
    }

    /// Close the connection. The next query reconnects.
    pub async fn close(&self) -> bool {
        self.client.shutdown().await
    }
}
