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

//! Connection lifecycle: dial, task startup and teardown
//!
//! Each successful `connect` starts three tasks bound to one connection
//! generation: the sender, the receiver and the idle watcher. Any of them,
//! the caller or the interrupt listener can end the connection, and the
//! first to get there does the teardown.

use crate::config::ClientConfig;
use crate::error::{ClientError, Result};
use crate::lifecycle::{IdleTimer, listen_for_interrupts, watch_idle};
use crate::receiver::run_receiver;
use crate::sender::{Outbound, Writer, run_sender};
use crate::table::CorrelationTable;
use crate::transport;
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError, RwLock};
use tokio::sync::{Mutex as AsyncMutex, Notify, mpsc};
use tokio_tungstenite::tungstenite::http::HeaderMap;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

/// Why a connection was torn down
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TeardownReason {
    Caller,
    IdleTimeout,
    Interrupt,
    SenderExit,
    ReceiverExit,
}

impl fmt::Display for TeardownReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Caller => write!(f, "closed by caller"),
            Self::IdleTimeout => write!(f, "idle timeout reached"),
            Self::Interrupt => write!(f, "interrupt signal received"),
            Self::SenderExit => write!(f, "sender stopped"),
            Self::ReceiverExit => write!(f, "receiver stopped"),
        }
    }
}

/// Counters describing the client's lifetime so far
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ConnectionStats {
    pub connects: u64,
    pub teardowns: u64,
    pub in_flight: usize,
}

/// The one live connection and the handles needed to stop it
struct Link {
    generation: u64,
    outbound: mpsc::Sender<Outbound>,
    writer: Writer,
    stop: CancellationToken,
}

pub(crate) struct Shared {
    pub(crate) config: ClientConfig,
    pub(crate) table: CorrelationTable,
    headers: RwLock<HeaderMap>,
    link: AsyncMutex<Option<Link>>,
    // Generation of the live link, 0 while closed
    live: AtomicU64,
    next_generation: AtomicU64,
    last_error: Mutex<Option<String>>,
    interrupt: Arc<Notify>,
    listener_started: AtomicBool,
    connects: AtomicU64,
    teardowns: AtomicU64,
}

impl Shared {
    /// Tear the connection down exactly once
    ///
    /// `generation` names the connection the trigger belongs to; triggers
    /// from an already replaced connection are ignored. `None` targets
    /// whatever connection is live. Returns whether this call did the work.
    pub(crate) async fn teardown(&self, generation: Option<u64>, reason: TeardownReason) -> bool {
        let link = {
            let mut slot = self.link.lock().await;
            let Some(live) = slot.as_ref().map(|link| link.generation) else {
                return false;
            };
            if generation.is_some_and(|g| g != live) {
                return false;
            }
            slot.take()
        };
        let Some(link) = link else {
            return false;
        };

        self.live.store(0, Ordering::SeqCst);
        self.teardowns.fetch_add(1, Ordering::SeqCst);
        link.stop.cancel();

        // Callers that subscribe after this point see the cause through the
        // fatal slot until the next send or connect clears it.
        let cause = self
            .table
            .fatal()
            .unwrap_or_else(|| ClientError::closed(reason));
        self.table.record_fatal(cause.clone());
        let failed = self.table.clear(&cause);

        link.writer.close().await;

        info!(
            generation = link.generation,
            reason = %reason,
            failed_requests = failed,
            "Websocket connection closed"
        );
        true
    }

    /// Queue sender of the live connection, tagged with its generation
    pub(crate) async fn outbound(&self) -> Option<(u64, mpsc::Sender<Outbound>)> {
        self.link
            .lock()
            .await
            .as_ref()
            .map(|link| (link.generation, link.outbound.clone()))
    }

    /// Register `request_id` and queue its frame on connection `generation`
    ///
    /// Runs under the link lock, so teardown either sees the registered
    /// entry and fails it, or has already taken the link and the hand-off
    /// is refused with `NotConnected`.
    pub(crate) async fn enqueue(
        &self,
        generation: u64,
        permit: mpsc::OwnedPermit<Outbound>,
        outbound: Outbound,
    ) -> Result<()> {
        let slot = self.link.lock().await;
        if slot.as_ref().map(|link| link.generation) != Some(generation) {
            return Err(ClientError::NotConnected);
        }

        self.table.clear_fatal();
        self.table.register(&outbound.request_id);
        permit.send(outbound);
        Ok(())
    }

    /// Record a connection-fatal error raised by a task of `generation`
    ///
    /// Errors from a connection that was already replaced are dropped so
    /// they cannot leak into the live one.
    pub(crate) async fn record_fatal(&self, generation: u64, error: ClientError) -> bool {
        let slot = self.link.lock().await;
        if slot.as_ref().map(|link| link.generation) != Some(generation) {
            debug!(generation, error = %error, "Error from a stale connection dropped");
            return false;
        }
        self.table.record_fatal(error);
        true
    }

    #[cfg(test)]
    pub(crate) async fn writer(&self) -> Option<Writer> {
        self.link.lock().await.as_ref().map(|link| link.writer.clone())
    }

    pub(crate) fn interrupt_handle(&self) -> Arc<Notify> {
        Arc::clone(&self.interrupt)
    }
}

impl Drop for Shared {
    fn drop(&mut self) {
        // Wakes the interrupt listener so it notices the client is gone
        self.interrupt.notify_one();
    }
}

/// Persistent WebSocket client for the query service
///
/// Holds at most one connection. Requests are multiplexed over it and
/// correlated by their request id. Cloning is cheap and every clone drives
/// the same connection.
#[derive(Clone)]
pub struct WssClient {
    pub(crate) inner: Arc<Shared>,
}

impl fmt::Debug for WssClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WssClient")
            .field("url", &self.inner.config.url)
            .field("closed", &self.is_closed())
            .finish_non_exhaustive()
    }
}

impl WssClient {
    /// Create a closed client. Nothing is dialed until `connect`.
    pub fn new(config: ClientConfig) -> Self {
        Self {
            inner: Arc::new(Shared {
                config,
                table: CorrelationTable::new(),
                headers: RwLock::new(HeaderMap::new()),
                link: AsyncMutex::new(None),
                live: AtomicU64::new(0),
                next_generation: AtomicU64::new(1),
                last_error: Mutex::new(None),
                interrupt: Arc::new(Notify::new()),
                listener_started: AtomicBool::new(false),
                connects: AtomicU64::new(0),
                teardowns: AtomicU64::new(0),
            }),
        }
    }

    pub fn config(&self) -> &ClientConfig {
        &self.inner.config
    }

    /// Replace the headers sent with the next upgrade request
    pub fn set_headers(&self, headers: HeaderMap) {
        *self
            .inner
            .headers
            .write()
            .unwrap_or_else(PoisonError::into_inner) = headers;
    }

    /// Open the connection if it is closed
    ///
    /// Idempotent: returns immediately when a connection is already open.
    /// On failure the error text is also kept for `last_error`.
    pub async fn connect(&self) -> Result<()> {
        self.ensure_interrupt_listener();

        let mut slot = self.inner.link.lock().await;
        if slot.is_some() {
            return Ok(());
        }

        info!(url = %self.inner.config.url, "Connecting to web socket..");
        let headers = self
            .inner
            .headers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();

        let (sink, stream) = match transport::dial(&self.inner.config.url, &headers).await {
            Ok(halves) => halves,
            Err(e) => {
                error!(error = %e, "dial");
                *self
                    .inner
                    .last_error
                    .lock()
                    .unwrap_or_else(PoisonError::into_inner) = Some(e.to_string());
                return Err(e);
            }
        };

        let generation = self.inner.next_generation.fetch_add(1, Ordering::SeqCst);
        let stop = CancellationToken::new();
        let writer = Writer::new(sink);
        let idle = Arc::new(IdleTimer::new(self.inner.config.idle_window()));
        let (outbound, queue) = mpsc::channel(self.inner.config.outbound_capacity());

        self.inner.table.clear_fatal();

        tokio::spawn(run_sender(
            Arc::clone(&self.inner),
            generation,
            queue,
            writer.clone(),
            Arc::clone(&idle),
            stop.clone(),
        ));
        tokio::spawn(run_receiver(
            Arc::clone(&self.inner),
            generation,
            stream,
            stop.clone(),
        ));
        tokio::spawn(watch_idle(
            Arc::clone(&self.inner),
            generation,
            idle,
            stop.clone(),
        ));

        *slot = Some(Link {
            generation,
            outbound,
            writer,
            stop,
        });
        self.inner.live.store(generation, Ordering::SeqCst);
        self.inner.connects.fetch_add(1, Ordering::SeqCst);

        info!(generation, "Websocket Connected!");
        Ok(())
    }

    /// Close the connection, failing every outstanding request
    ///
    /// Safe to call concurrently and repeatedly; only one call per connection
    /// does the work and returns `true`.
    pub async fn shutdown(&self) -> bool {
        self.inner.teardown(None, TeardownReason::Caller).await
    }

    pub fn is_closed(&self) -> bool {
        self.inner.live.load(Ordering::SeqCst) == 0
    }

    /// Deliver an interrupt as if the process had received Ctrl-C
    ///
    /// Does nothing before the first `connect`, when there is no listener.
    pub fn interrupt(&self) {
        if self.inner.listener_started.load(Ordering::SeqCst) {
            self.inner.interrupt.notify_one();
        }
    }

    /// Text of the most recent dial failure
    pub fn last_error(&self) -> Option<String> {
        self.inner
            .last_error
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn stats(&self) -> ConnectionStats {
        ConnectionStats {
            connects: self.inner.connects.load(Ordering::SeqCst),
            teardowns: self.inner.teardowns.load(Ordering::SeqCst),
            in_flight: self.inner.table.len(),
        }
    }

    fn ensure_interrupt_listener(&self) {
        if self.inner.listener_started.swap(true, Ordering::SeqCst) {
            return;
        }
        tokio::spawn(listen_for_interrupts(
            Arc::downgrade(&self.inner),
            self.inner.interrupt_handle(),
            self.inner.config.handle_interrupts,
        ));
    }
}
