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

//! Correlation of inbound frames to outstanding requests
//!
//! The table is the only channel between the receiver task and callers.
//! Each request id owns a one-shot completion that is fulfilled exactly once,
//! when the request reaches a terminal state (merged response or error).
//! The outcome is buffered in the channel, so a caller that subscribes after
//! completion still gets it.

use crate::assembler::{Assembly, SubBatches};
use crate::error::{ClientError, Result};
use crate::message::Response;
use dashmap::DashMap;
use std::sync::{Mutex, PoisonError};
use tokio::sync::oneshot;
use tracing::{debug, trace};

/// Terminal result of one request
pub type Outcome = Result<Response>;

#[derive(Debug)]
enum Slot {
    Pending,
    Collecting(SubBatches),
    /// Outcome already sent; later frames for the id are ignored
    Done,
}

#[derive(Debug)]
struct Correlation {
    slot: Slot,
    tx: Option<oneshot::Sender<Outcome>>,
    rx: Option<oneshot::Receiver<Outcome>>,
}

impl Correlation {
    fn pending() -> Self {
        let (tx, rx) = oneshot::channel();
        Self {
            slot: Slot::Pending,
            tx: Some(tx),
            rx: Some(rx),
        }
    }

    fn finish(&mut self, outcome: Outcome) {
        self.slot = Slot::Done;
        if let Some(tx) = self.tx.take() {
            // The receiver lives either in this entry or with a caller; a
            // caller that gave up has already dropped it.
            let _ = tx.send(outcome);
        }
    }

    fn is_done(&self) -> bool {
        matches!(self.slot, Slot::Done)
    }

    /// Done and already handed to a caller: nothing left to keep
    fn is_settled(&self) -> bool {
        self.is_done() && self.rx.is_none()
    }
}

/// Concurrent request id → state map
///
/// Backed by a sharded map so unrelated request ids never contend on one
/// lock. A separate reserved slot holds the most recent connection-fatal
/// error.
#[derive(Debug, Default)]
pub struct CorrelationTable {
    entries: DashMap<String, Correlation>,
    fatal: Mutex<Option<ClientError>>,
}

impl CorrelationTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start tracking a request. A reused id replaces the previous entry.
    pub fn register(&self, request_id: &str) {
        if self
            .entries
            .insert(request_id.to_string(), Correlation::pending())
            .is_some()
        {
            debug!(request_id = %request_id, "Request id reused, previous entry replaced");
        }
    }

    /// Take the completion for a request id
    ///
    /// Ids that were never registered start out pending, so waiting on them
    /// ends in a timeout rather than an immediate failure. A set fatal slot is
    /// returned instead of a receiver.
    pub fn subscribe(&self, request_id: &str) -> Result<oneshot::Receiver<Outcome>> {
        if let Some(fatal) = self.fatal() {
            return Err(fatal);
        }

        let rx = self.update(request_id, |entry| entry.rx.take());
        rx.ok_or_else(|| {
            ClientError::Protocol(format!("request {request_id} is already being awaited"))
        })
    }

    /// Record a request-scoped error
    ///
    /// Terminal entries are left untouched; ids nobody registered or still
    /// waits for are dropped.
    pub fn fail(&self, request_id: &str, error: ClientError) {
        self.update_existing(request_id, |entry| {
            if entry.is_done() {
                trace!(request_id = %request_id, "Error for finished request dropped");
                return;
            }
            entry.finish(Err(error));
        });
    }

    /// Store one DATA fragment and complete the request once it is whole
    ///
    /// Fragments for unknown ids, such as a request that already timed out,
    /// are dropped.
    pub fn insert_fragment(&self, fragment: Response) {
        let request_id = fragment.request_id.clone();
        self.update_existing(&request_id, |entry| {
            let mut batches = match std::mem::replace(&mut entry.slot, Slot::Pending) {
                Slot::Done => {
                    entry.slot = Slot::Done;
                    trace!(request_id = %request_id, "Fragment for finished request dropped");
                    return;
                }
                Slot::Pending => SubBatches::new(),
                Slot::Collecting(batches) => batches,
            };

            batches.insert(fragment);
            match batches.status() {
                Assembly::Incomplete => {
                    trace!(
                        request_id = %request_id,
                        received = batches.len(),
                        "Waiting for more sub-batches"
                    );
                    entry.slot = Slot::Collecting(batches);
                }
                Assembly::Empty => entry.finish(Err(ClientError::EmptyResult)),
                Assembly::Complete => match batches.merge() {
                    Some(response) => entry.finish(Ok(response)),
                    None => entry.finish(Err(ClientError::EmptyResult)),
                },
            }
        });
    }

    /// Drop a request the caller stopped waiting for
    pub fn forget(&self, request_id: &str) {
        self.entries.remove(request_id);
    }

    /// Fill the reserved slot with a connection-fatal error
    pub fn record_fatal(&self, error: ClientError) {
        *self.fatal.lock().unwrap_or_else(PoisonError::into_inner) = Some(error);
    }

    pub fn fatal(&self) -> Option<ClientError> {
        self.fatal
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn clear_fatal(&self) {
        self.fatal.lock().unwrap_or_else(PoisonError::into_inner).take();
    }

    /// Remove every entry, failing outstanding requests with `error`
    ///
    /// Returns the number of requests that were still outstanding.
    pub fn clear(&self, error: &ClientError) -> usize {
        let ids: Vec<String> = self.entries.iter().map(|e| e.key().clone()).collect();
        let mut failed = 0;
        for id in ids {
            if let Some((_, mut entry)) = self.entries.remove(&id) {
                if !entry.is_done() {
                    entry.finish(Err(error.clone()));
                    failed += 1;
                }
            }
        }
        failed
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn contains(&self, request_id: &str) -> bool {
        self.entries.contains_key(request_id)
    }

    /// Apply `f` to the entry for `request_id`, creating it as pending, and
    /// drop the entry once its outcome has been delivered to a caller
    fn update<R>(&self, request_id: &str, f: impl FnOnce(&mut Correlation) -> R) -> R {
        let (result, settled) = {
            let mut entry = self
                .entries
                .entry(request_id.to_string())
                .or_insert_with(Correlation::pending);
            let result = f(&mut *entry);
            (result, entry.is_settled())
        };
        if settled {
            self.entries.remove_if(request_id, |_, entry| entry.is_settled());
        }
        result
    }

    /// Like `update`, but only for ids that already have an entry
    fn update_existing(&self, request_id: &str, f: impl FnOnce(&mut Correlation)) {
        let settled = match self.entries.get_mut(request_id) {
            Some(mut entry) => {
                f(&mut *entry);
                entry.is_settled()
            }
            None => {
                trace!(request_id = %request_id, "Frame for unknown request dropped");
                return;
            }
        };
        if settled {
            self.entries.remove_if(request_id, |_, entry| entry.is_settled());
        }
    }
}
