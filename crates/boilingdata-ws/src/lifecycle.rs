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

//! Idle timeout and interrupt handling

use crate::connection::{Shared, TeardownReason};
use std::sync::{Arc, Mutex, PoisonError, Weak};
use std::time::Duration;
use tokio::sync::Notify;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Windows too large to represent are capped at roughly thirty years
const FAR_FUTURE: Duration = Duration::from_secs(86400 * 365 * 30);

fn deadline_after(window: Duration) -> Instant {
    let now = Instant::now();
    now.checked_add(window).unwrap_or_else(|| now + FAR_FUTURE)
}

/// Deadline that moves forward with every outbound request
#[derive(Debug)]
pub(crate) struct IdleTimer {
    window: Duration,
    deadline: Mutex<Instant>,
}

impl IdleTimer {
    pub(crate) fn new(window: Duration) -> Self {
        Self {
            window,
            deadline: Mutex::new(deadline_after(window)),
        }
    }

    pub(crate) fn reset(&self) {
        *self.deadline.lock().unwrap_or_else(PoisonError::into_inner) = deadline_after(self.window);
    }

    fn deadline(&self) -> Instant {
        *self.deadline.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Wait until the deadline passes without a reset
    ///
    /// Returns `false` if `stop` fires first.
    pub(crate) async fn expired(&self, stop: &CancellationToken) -> bool {
        loop {
            let deadline = self.deadline();
            tokio::select! {
                biased;
                _ = stop.cancelled() => return false,
                _ = tokio::time::sleep_until(deadline) => {
                    if self.deadline() <= Instant::now() {
                        return true;
                    }
                }
            }
        }
    }
}

/// Close the connection once it has been idle for the whole window
pub(crate) async fn watch_idle(
    shared: Arc<Shared>,
    generation: u64,
    idle: Arc<IdleTimer>,
    stop: CancellationToken,
) {
    if idle.expired(&stop).await {
        info!(generation, window = ?idle.window, "Idle timeout reached, closing connection");
        shared
            .teardown(Some(generation), TeardownReason::IdleTimeout)
            .await;
    }
}

/// Tear the live connection down on every interrupt
///
/// Interrupts come from Ctrl-C when `handle_signals` is set, or from
/// `WssClient::interrupt`. The listener outlives individual connections and
/// stops once the client is dropped.
pub(crate) async fn listen_for_interrupts(
    shared: Weak<Shared>,
    interrupt: Arc<Notify>,
    handle_signals: bool,
) {
    let mut signals = handle_signals;

    loop {
        tokio::select! {
            _ = interrupt.notified() => {}
            received = tokio::signal::ctrl_c(), if signals => {
                if let Err(e) = received {
                    warn!(error = %e, "Unable to listen for Ctrl-C");
                    signals = false;
                    continue;
                }
            }
        }

        let Some(shared) = shared.upgrade() else {
            break;
        };
        info!("Interrupt received, closing connection");
        shared.teardown(None, TeardownReason::Interrupt).await;
    }

    debug!("Interrupt listener stopped");
}
