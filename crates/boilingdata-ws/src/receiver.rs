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

//! Inbound task: the only reader of the socket

use crate::assembler::extract_keys;
use crate::codec;
use crate::connection::{Shared, TeardownReason};
use crate::error::ClientError;
use crate::message::MessageType;
use crate::table::CorrelationTable;
use crate::transport::WsStream;
use futures_util::StreamExt;
use std::sync::Arc;
use tokio_tungstenite::tungstenite::protocol::Message;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, trace, warn};

/// Read frames until stopped or until the read side fails
///
/// A read error, a close frame or the end of the stream is recorded as the
/// connection's fatal error. Pings are answered by tungstenite on the next
/// read or write, so they need no handling here.
pub(crate) async fn run_receiver(
    shared: Arc<Shared>,
    generation: u64,
    mut stream: WsStream,
    stop: CancellationToken,
) {
    debug!(generation, "Receiver started");

    loop {
        let next = tokio::select! {
            biased;
            _ = stop.cancelled() => break,
            next = stream.next() => next,
        };

        let raw = match next {
            Some(Ok(Message::Text(text))) => text.into_bytes(),
            Some(Ok(Message::Binary(bytes))) => bytes,
            Some(Ok(Message::Close(frame))) => {
                let reason = frame
                    .map(|f| format!("closed by server ({}): {}", f.code, f.reason))
                    .unwrap_or_else(|| "closed by server".to_string());
                info!(generation, reason = %reason, "Server closed websocket");
                shared
                    .record_fatal(generation, ClientError::Read(reason))
                    .await;
                break;
            }
            Some(Ok(_)) => continue,
            Some(Err(e)) => {
                error!(generation, error = %e, "read");
                shared
                    .record_fatal(generation, ClientError::Read(e.to_string()))
                    .await;
                break;
            }
            None => {
                shared
                    .record_fatal(generation, ClientError::Read("stream ended".to_string()))
                    .await;
                break;
            }
        };

        dispatch(&shared.table, &raw);
    }

    debug!(generation, "Receiver stopped");
    shared
        .teardown(Some(generation), TeardownReason::ReceiverExit)
        .await;
}

/// Route one inbound frame to the request it belongs to
pub(crate) fn dispatch(table: &CorrelationTable, raw: &[u8]) {
    let envelope = match codec::decode_envelope(raw) {
        Ok(envelope) => envelope,
        Err(err) => {
            match &err {
                ClientError::Decode {
                    request_id: Some(request_id),
                    ..
                } => {
                    warn!(request_id = %request_id, error = %err, "Undecodable frame");
                    table.fail(request_id, err.clone());
                }
                _ => warn!(error = %err, "Undecodable frame without a request id dropped"),
            }
            return;
        }
    };

    match envelope.message_type {
        MessageType::LogMessage => match codec::decode_log(raw) {
            Ok(log) if log.is_error() => {
                if log.request_id.is_empty() {
                    warn!(message = %log.log_message, "Server error without a request id");
                    return;
                }
                debug!(request_id = %log.request_id, "Server reported an error");
                table.fail(&log.request_id, ClientError::Server(log.log_message));
            }
            Ok(log) => {
                trace!(
                    request_id = %log.request_id,
                    level = %log.log_level,
                    message = %log.log_message,
                    "Server log"
                );
            }
            Err(err) => {
                warn!(request_id = %envelope.request_id, error = %err, "Undecodable log message");
                table.fail(&envelope.request_id, err);
            }
        },
        MessageType::Data => {
            let mut fragment = envelope;
            if fragment.is_last_sub_batch() {
                fragment.keys = extract_keys(raw);
            }
            trace!(
                request_id = %fragment.request_id,
                serial = fragment.sub_batch_serial,
                total = fragment.total_sub_batches,
                rows = fragment.data.len(),
                "Data fragment"
            );
            table.insert_fragment(fragment);
        }
        MessageType::Info | MessageType::Unknown => {
            trace!(request_id = %envelope.request_id, "Ignoring non-data frame");
        }
    }
}
