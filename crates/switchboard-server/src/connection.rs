//! Shared state of one hub connection.
//!
//! A [`ConnectionHandle`] is what other tasks hold to reach a connection:
//! the lifetime registry fans sends out over handles, and hub methods use
//! one to invoke a client and await its result. All writes go through the
//! bounded outbound channel, drained by the connection's single writer task.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU8, Ordering};
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use serde_json::Value;
use switchboard_core::protocol::{
    CancelInvocationMessage, Completion, CompletionMessage, HubMessage, InvocationMessage,
};
use switchboard_core::{ConnectionId, UserId};
use tokio::sync::{mpsc, oneshot};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::errors::{ClientResultError, SendError};
use crate::session::invocations::InvocationTable;

/// Lifecycle state of a connection.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[repr(u8)]
pub enum ConnectionState {
    /// Waiting for the handshake.
    Handshaking = 0,
    /// Handshake done, messages flowing.
    Active = 1,
    /// Tearing down; outstanding work is being canceled.
    Draining = 2,
    /// Gone.
    Closed = 3,
}

impl ConnectionState {
    fn from_u8(value: u8) -> Self {
        match value {
            0 => Self::Handshaking,
            1 => Self::Active,
            2 => Self::Draining,
            _ => Self::Closed,
        }
    }
}

/// A live connection as seen from outside its session task.
#[derive(Debug)]
pub struct ConnectionHandle {
    id: ConnectionId,
    user_id: Option<UserId>,
    items: Mutex<HashMap<String, Value>>,
    tx: mpsc::Sender<HubMessage>,
    abort: CancellationToken,
    state: AtomicU8,
    connected_at: Instant,
    pub(crate) invocations: Mutex<InvocationTable>,
    pub(crate) groups: Mutex<HashSet<String>>,
}

impl ConnectionHandle {
    pub(crate) fn new(
        id: ConnectionId,
        user_id: Option<UserId>,
        items: HashMap<String, Value>,
        tx: mpsc::Sender<HubMessage>,
        abort: CancellationToken,
    ) -> Self {
        Self {
            id,
            user_id,
            items: Mutex::new(items),
            tx,
            abort,
            state: AtomicU8::new(ConnectionState::Handshaking as u8),
            connected_at: Instant::now(),
            invocations: Mutex::new(InvocationTable::new()),
            groups: Mutex::new(HashSet::new()),
        }
    }

    /// Connection id.
    pub fn id(&self) -> &ConnectionId {
        &self.id
    }

    /// Authenticated user, if any.
    pub fn user_id(&self) -> Option<&UserId> {
        self.user_id.as_ref()
    }

    /// Read a metadata item.
    pub fn item(&self, key: &str) -> Option<Value> {
        self.items.lock().get(key).cloned()
    }

    /// Set a metadata item, returning the previous value.
    pub fn set_item(&self, key: impl Into<String>, value: Value) -> Option<Value> {
        self.items.lock().insert(key.into(), value)
    }

    /// Groups this connection belongs to, sorted.
    pub fn groups(&self) -> Vec<String> {
        let mut groups: Vec<String> = self.groups.lock().iter().cloned().collect();
        groups.sort_unstable();
        groups
    }

    /// Current lifecycle state.
    pub fn state(&self) -> ConnectionState {
        ConnectionState::from_u8(self.state.load(Ordering::Acquire))
    }

    pub(crate) fn set_state(&self, state: ConnectionState) {
        self.state.store(state as u8, Ordering::Release);
    }

    /// Connection age.
    pub fn age(&self) -> Duration {
        self.connected_at.elapsed()
    }

    /// Ask the session to close this connection.
    pub fn abort(&self) {
        self.abort.cancel();
    }

    /// Whether an abort was requested.
    pub fn is_aborted(&self) -> bool {
        self.abort.is_cancelled()
    }

    pub(crate) fn abort_token(&self) -> &CancellationToken {
        &self.abort
    }

    /// Queue a message for this connection.
    ///
    /// Waits while the outbound queue is full. A closed connection drops the
    /// message silently; only `cancel` firing first is reported.
    pub async fn send(
        &self,
        message: HubMessage,
        cancel: &CancellationToken,
    ) -> Result<(), SendError> {
        if self.state() == ConnectionState::Closed {
            return Ok(());
        }
        tokio::select! {
            biased;
            () = cancel.cancelled() => Err(SendError::Canceled),
            sent = self.tx.send(message) => {
                if sent.is_err() {
                    debug!(connection_id = %self.id, "outbound queue closed, message dropped");
                }
                Ok(())
            }
            () = self.abort.cancelled() => {
                debug!(connection_id = %self.id, "connection aborting, message dropped");
                Ok(())
            }
        }
    }

    /// Queue a message with no caller-side cancellation.
    pub(crate) async fn enqueue(&self, message: HubMessage) {
        let never = CancellationToken::new();
        let _ = self.send(message, &never).await;
    }

    /// Queue the final `Close`. Goes through even after an abort so the
    /// writer can still flush it; fails only if the writer is gone.
    pub(crate) async fn send_final(&self, message: HubMessage) -> bool {
        self.tx.send(message).await.is_ok()
    }

    /// Invoke a client method and wait for the value it returns.
    ///
    /// The result slot is registered before the request is queued, so a fast
    /// reply is never lost. If `cancel` fires first, the slot is dropped, a
    /// `CancelInvocation` is sent best-effort, and any late reply is
    /// discarded by the read loop.
    pub async fn invoke(
        &self,
        method: &str,
        arguments: Vec<Value>,
        cancel: &CancellationToken,
    ) -> Result<Value, ClientResultError> {
        let (id, rx) = self.invocations.lock().register_result()?;
        let request = HubMessage::Invocation(InvocationMessage::with_id(id.clone(), method, arguments));

        let outcome = tokio::select! {
            biased;
            () = cancel.cancelled() => Err(ClientResultError::Canceled),
            outcome = self.await_result(request, rx) => outcome,
        };

        if outcome.is_err() {
            let _ = self.invocations.lock().remove_result(&id);
        }
        if outcome == Err(ClientResultError::Canceled) {
            let _ = self
                .tx
                .try_send(HubMessage::CancelInvocation(CancelInvocationMessage::new(id)));
        }
        outcome
    }

    async fn await_result(
        &self,
        request: HubMessage,
        rx: oneshot::Receiver<Completion>,
    ) -> Result<Value, ClientResultError> {
        let queued = tokio::select! {
            sent = self.tx.send(request) => sent.is_ok(),
            () = self.abort.cancelled() => false,
        };
        if !queued {
            return Err(ClientResultError::Disconnected);
        }
        match rx.await {
            Ok(Completion::Result(value)) => Ok(value),
            Ok(Completion::Empty) => Err(ClientResultError::NoResult),
            Ok(Completion::Error(message)) => Err(ClientResultError::Client(message)),
            Err(_) => Err(ClientResultError::Disconnected),
        }
    }

    /// Route a client completion to a pending result. Hands the completion
    /// back when no result with that id is pending.
    pub(crate) fn complete_result(&self, completion: CompletionMessage) -> Result<(), CompletionMessage> {
        let slot = self.invocations.lock().take_result(&completion.invocation_id);
        let Some(tx) = slot else {
            return Err(completion);
        };
        if tx.send(completion.outcome).is_err() {
            warn!(
                connection_id = %self.id,
                invocation_id = %completion.invocation_id,
                "client result arrived after the caller gave up"
            );
        }
        Ok(())
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
