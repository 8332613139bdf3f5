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

//! Outbound task: drains the request queue onto the socket

use crate::connection::{Shared, TeardownReason};
use crate::error::{ClientError, Result};
use crate::lifecycle::IdleTimer;
use crate::transport::WsSink;
use futures_util::SinkExt;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, mpsc};
use tokio_tungstenite::tungstenite::protocol::Message;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, trace, warn};

/// Upper bound on the closing handshake during teardown
const CLOSE_TIMEOUT: Duration = Duration::from_secs(2);

/// One queued request frame
#[derive(Debug)]
pub(crate) struct Outbound {
    pub(crate) request_id: String,
    pub(crate) frame: String,
}

/// Write half guarded by the connection's writer lock
///
/// Every write to the socket goes through here. Teardown takes the sink out,
/// after which writes fail with `NotConnected`.
#[derive(Clone)]
pub(crate) struct Writer {
    sink: Arc<Mutex<Option<WsSink>>>,
}

impl Writer {
    pub(crate) fn new(sink: WsSink) -> Self {
        Self {
            sink: Arc::new(Mutex::new(Some(sink))),
        }
    }

    /// Write one message. Returns `Ok(false)` when `stop` fired first.
    pub(crate) async fn send(&self, message: Message, stop: &CancellationToken) -> Result<bool> {
        let mut guard = self.sink.lock().await;
        let Some(sink) = guard.as_mut() else {
            return Err(ClientError::NotConnected);
        };

        tokio::select! {
            biased;
            _ = stop.cancelled() => Ok(false),
            written = sink.send(message) => written
                .map(|_| true)
                .map_err(|e| ClientError::Write(e.to_string())),
        }
    }

    /// Take the sink out and send a close frame, bounded by `CLOSE_TIMEOUT`
    pub(crate) async fn close(&self) {
        let Some(mut sink) = self.sink.lock().await.take() else {
            return;
        };
        match tokio::time::timeout(CLOSE_TIMEOUT, sink.close()).await {
            Ok(Ok(())) => trace!("Close frame sent"),
            Ok(Err(e)) => debug!(error = %e, "Error closing websocket"),
            Err(_) => warn!("Timed out closing websocket"),
        }
    }
}

/// Run until stopped or until a write fails
///
/// Each request resets the idle timer before it is written. A failed write
/// is recorded as the connection's fatal error. Leaving the loop for any
/// reason tears the connection down.
pub(crate) async fn run_sender(
    shared: Arc<Shared>,
    generation: u64,
    mut queue: mpsc::Receiver<Outbound>,
    writer: Writer,
    idle: Arc<IdleTimer>,
    stop: CancellationToken,
) {
    debug!(generation, "Sender started");

    loop {
        let outbound = tokio::select! {
            biased;
            _ = stop.cancelled() => break,
            next = queue.recv() => match next {
                Some(outbound) => outbound,
                None => break,
            },
        };

        idle.reset();
        match writer.send(Message::Text(outbound.frame), &stop).await {
            Ok(true) => trace!(request_id = %outbound.request_id, "Request written"),
            Ok(false) => break,
            Err(e) => {
                error!(request_id = %outbound.request_id, error = %e, "write");
                if e.is_fatal() {
                    shared.record_fatal(generation, e).await;
                }
                break;
            }
        }
    }

    debug!(generation, "Sender stopped");
    shared
        .teardown(Some(generation), TeardownReason::SenderExit)
        .await;
}
