//! Per-connection table of everything keyed by an invocation or stream id.
//!
//! Ids are matched by the message that refers to them. `CancelInvocation`
//! addresses inbound invocations, while a client `Completion` addresses
//! either a pending client result or an upload stream. Client-chosen ids
//! (invocations and streams) share one namespace. Server-issued result ids
//! avoid every live id, but a client may still pick a pending result id for
//! a new invocation without either side noticing.

use std::collections::HashMap;

use switchboard_core::protocol::Completion;
use tokio::sync::{mpsc, oneshot};
use tokio_util::sync::CancellationToken;
use serde_json::Value;

use crate::errors::ClientResultError;
use crate::session::uploads::{UploadEnd, UploadSlot, UploadStream};

/// Why an inbound invocation could not be registered.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum BeginError {
    /// The invocation id is live.
    DuplicateId,
    /// A stream id is live or repeated.
    DuplicateStream(String),
    /// Opening the streams would exceed the per-connection limit.
    TooManyStreams(usize),
    /// The connection is draining.
    Closed,
}

/// Handles for a registered inbound invocation.
#[derive(Debug)]
pub(crate) struct Registered {
    pub(crate) key: u64,
    pub(crate) cancel: CancellationToken,
    pub(crate) streams: Vec<UploadStream>,
}

/// What [`InvocationTable::close`] released.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub(crate) struct Released {
    pub(crate) invocations: usize,
    pub(crate) results: usize,
    pub(crate) uploads: usize,
}

#[derive(Debug)]
struct ActiveInvocation {
    key: u64,
    cancel: CancellationToken,
}

/// Live ids of one connection.
#[derive(Debug, Default)]
pub(crate) struct InvocationTable {
    active: HashMap<String, ActiveInvocation>,
    results: HashMap<String, oneshot::Sender<Completion>>,
    uploads: HashMap<String, UploadSlot>,
    next_key: u64,
    next_result_id: u64,
    closed: bool,
}

impl InvocationTable {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Whether `id` is live in any role.
    pub(crate) fn in_use(&self, id: &str) -> bool {
        self.active.contains_key(id) || self.completion_target(id)
    }

    /// Whether `id` is taken for a new inbound invocation. Pending client
    /// results do not count: the server picked those ids, and the client
    /// only ever answers them with a `Completion`.
    pub(crate) fn invocation_id_in_use(&self, id: &str) -> bool {
        self.active.contains_key(id) || self.uploads.contains_key(id)
    }

    /// Whether a client `Completion` with this id would be routed somewhere.
    fn completion_target(&self, id: &str) -> bool {
        self.results.contains_key(id) || self.uploads.contains_key(id)
    }

    /// Register an inbound invocation together with its upload streams.
    /// Nothing is registered on error.
    pub(crate) fn begin(
        &mut self,
        id: Option<&str>,
        stream_ids: &[String],
        max_uploads: usize,
        capacity: usize,
        parent: &CancellationToken,
    ) -> Result<Registered, BeginError> {
        if self.closed {
            return Err(BeginError::Closed);
        }
        if id.is_some_and(|id| self.invocation_id_in_use(id)) {
            return Err(BeginError::DuplicateId);
        }
        for (i, stream_id) in stream_ids.iter().enumerate() {
            let repeated = stream_ids[..i].contains(stream_id) || id == Some(stream_id.as_str());
            if repeated || self.in_use(stream_id) {
                return Err(BeginError::DuplicateStream(stream_id.clone()));
            }
        }
        if self.uploads.len() + stream_ids.len() > max_uploads {
            return Err(BeginError::TooManyStreams(max_uploads));
        }

        let key = self.next_key;
        self.next_key += 1;
        let cancel = parent.child_token();
        if let Some(id) = id {
            let _ = self.active.insert(
                id.to_owned(),
                ActiveInvocation {
                    key,
                    cancel: cancel.clone(),
                },
            );
        }
        let streams = stream_ids
            .iter()
            .map(|stream_id| {
                let (slot, stream) = UploadSlot::open(stream_id.clone(), key, capacity);
                let _ = self.uploads.insert(stream_id.clone(), slot);
                stream
            })
            .collect();
        Ok(Registered {
            key,
            cancel,
            streams,
        })
    }

    /// Release an invocation and cancel the upload streams it still owns.
    pub(crate) fn finish(&mut self, key: u64, id: Option<&str>) {
        if let Some(id) = id {
            if self.active.get(id).is_some_and(|a| a.key == key) {
                let _ = self.active.remove(id);
            }
        }
        let owned: Vec<String> = self
            .uploads
            .iter()
            .filter(|(_, slot)| slot.owner == key)
            .map(|(id, _)| id.clone())
            .collect();
        for stream_id in owned {
            if let Some(slot) = self.uploads.remove(&stream_id) {
                slot.finish(UploadEnd::Canceled);
            }
        }
    }

    /// Signal cancellation to a running invocation. Unknown ids are ignored.
    pub(crate) fn cancel(&self, id: &str) -> bool {
        match self.active.get(id) {
            Some(active) => {
                active.cancel.cancel();
                true
            }
            None => false,
        }
    }

    /// Producer handles for an upload stream.
    pub(crate) fn upload_feeder(
        &self,
        stream_id: &str,
    ) -> Option<(mpsc::Sender<Value>, CancellationToken)> {
        self.uploads.get(stream_id).map(UploadSlot::feeder)
    }

    /// End an upload stream, optionally with a client error.
    pub(crate) fn complete_upload(&mut self, stream_id: &str, error: Option<String>) -> bool {
        match self.uploads.remove(stream_id) {
            Some(slot) => {
                slot.finish(error.map_or(UploadEnd::Completed, UploadEnd::Failed));
                true
            }
            None => false,
        }
    }

    /// Allocate a fresh id for a server-to-client invocation and register
    /// its result slot.
    pub(crate) fn register_result(
        &mut self,
    ) -> Result<(String, oneshot::Receiver<Completion>), ClientResultError> {
        if self.closed {
            return Err(ClientResultError::Disconnected);
        }
        let id = loop {
            self.next_result_id += 1;
            let candidate = self.next_result_id.to_string();
            if !self.in_use(&candidate) {
                break candidate;
            }
        };
        let (tx, rx) = oneshot::channel();
        let _ = self.results.insert(id.clone(), tx);
        Ok((id, rx))
    }

    /// Claim the result slot for a completion from the client.
    pub(crate) fn take_result(&mut self, id: &str) -> Option<oneshot::Sender<Completion>> {
        self.results.remove(id)
    }

    /// Drop an abandoned result slot.
    pub(crate) fn remove_result(&mut self, id: &str) -> bool {
        self.results.remove(id).is_some()
    }

    /// Refuse new entries, cancel invocations, and fail everything pending.
    pub(crate) fn close(&mut self) -> Released {
        self.closed = true;
        let released = Released {
            invocations: self.active.len(),
            results: self.results.len(),
            uploads: self.uploads.len(),
        };
        for (_, active) in self.active.drain() {
            active.cancel.cancel();
        }
        // Dropping the senders wakes waiters with a disconnect.
        self.results.clear();
        for (_, slot) in self.uploads.drain() {
            slot.finish(UploadEnd::Canceled);
        }
        released
    }

    pub(crate) fn is_closed(&self) -> bool {
        self.closed
    }

    pub(crate) fn active_count(&self) -> usize {
        self.active.len()
    }

    pub(crate) fn upload_count(&self) -> usize {
        self.uploads.len()
    }

    pub(crate) fn pending_result_count(&self) -> usize {
        self.results.len()
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
