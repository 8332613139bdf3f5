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

//! Client configuration

use serde::Deserialize;
use std::time::Duration;

/// Idle window used when the configured one is not positive
pub const DEFAULT_IDLE_TIMEOUT_MINUTES: i64 = 10;

/// How long `get_response` waits before giving up
pub const DEFAULT_RESPONSE_TIMEOUT: Duration = Duration::from_secs(30);

/// Outbound queue depth. One slot makes `send_message` a hand-off to the sender.
pub const DEFAULT_OUTBOUND_CAPACITY: usize = 1;

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    /// WebSocket endpoint of the query service. Has no default.
    pub url: String,
    /// Idle window in minutes. Non-positive values fall back to the default.
    pub idle_timeout_minutes: i64,
    /// Sub-minute idle window; takes precedence over `idle_timeout_minutes`
    #[serde(skip)]
    pub idle_timeout: Option<Duration>,
    /// Response wait budget in milliseconds
    pub response_timeout_ms: u64,
    pub outbound_capacity: usize,
    /// Install a Ctrl-C listener that tears the connection down
    pub handle_interrupts: bool,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            url: String::new(),
            idle_timeout_minutes: DEFAULT_IDLE_TIMEOUT_MINUTES,
            idle_timeout: None,
            response_timeout_ms: DEFAULT_RESPONSE_TIMEOUT.as_millis() as u64,
            outbound_capacity: DEFAULT_OUTBOUND_CAPACITY,
            handle_interrupts: true,
        }
    }
}

impl ClientConfig {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            ..Self::default()
        }
    }

    pub fn with_idle_timeout_minutes(mut self, minutes: i64) -> Self {
        self.idle_timeout_minutes = minutes;
        self.idle_timeout = None;
        self
    }

    /// Set the idle window directly. A zero duration falls back to the default.
    pub fn with_idle_timeout(mut self, window: Duration) -> Self {
        self.idle_timeout = Some(window);
        self
    }

    pub fn with_response_timeout(mut self, timeout: Duration) -> Self {
        self.response_timeout_ms = timeout.as_millis() as u64;
        self
    }

    pub fn with_outbound_capacity(mut self, capacity: usize) -> Self {
        self.outbound_capacity = capacity;
        self
    }

    pub fn with_interrupt_handling(mut self, enabled: bool) -> Self {
        self.handle_interrupts = enabled;
        self
    }

    /// Effective idle window
    pub fn idle_window(&self) -> Duration {
        match self.idle_timeout {
            Some(window) if !window.is_zero() => window,
            _ if self.idle_timeout_minutes > 0 => {
                Duration::from_secs((self.idle_timeout_minutes as u64).saturating_mul(60))
            }
            _ => Duration::from_secs(DEFAULT_IDLE_TIMEOUT_MINUTES as u64 * 60),
        }
    }

    pub fn response_timeout(&self) -> Duration {
        Duration::from_millis(self.response_timeout_ms)
    }

    /// Queue depth, never below one
    pub fn outbound_capacity(&self) -> usize {
        self.outbound_capacity.max(1)
    }
}
