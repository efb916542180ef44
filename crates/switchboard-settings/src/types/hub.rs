//! Per-hub protocol and session limits.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::errors::{Result, SettingsError};

/// Limits and timers applied to every connection of a hub.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct HubOptions {
    /// Maximum payload size of one record in bytes. `0` disables the limit.
    pub max_message_size: usize,
    /// Maximum size of the handshake record in bytes.
    pub max_handshake_size: usize,
    /// Time allowed for the client to complete the handshake.
    pub handshake_timeout_ms: u64,
    /// Idle-write interval after which the server sends a Ping.
    pub keep_alive_interval_ms: u64,
    /// Idle-read interval, armed after the client's first Ping.
    pub client_timeout_interval_ms: u64,
    /// Blocking invocations allowed to run concurrently on one connection.
    pub max_parallel_invocations: usize,
    /// Include error kinds and messages in error completions.
    pub enable_detailed_errors: bool,
    /// Upload streams allowed to be open at once on one connection.
    pub max_upload_streams: usize,
    /// Items buffered per upload stream before the read loop waits.
    pub stream_buffer_capacity: usize,
    /// Outbound messages queued per connection before senders wait.
    pub send_queue_capacity: usize,
    /// Protocol allow-list. Empty accepts every registered codec.
    pub supported_protocols: Vec<String>,
}

impl Default for HubOptions {
    fn default() -> Self {
        Self {
            max_message_size: 32 * 1024,
            max_handshake_size: 32 * 1024,
            handshake_timeout_ms: 15_000,
            keep_alive_interval_ms: 15_000,
            client_timeout_interval_ms: 30_000,
            max_parallel_invocations: 1,
            enable_detailed_errors: false,
            max_upload_streams: 10,
            stream_buffer_capacity: 10,
            send_queue_capacity: 1024,
            supported_protocols: Vec::new(),
        }
    }
}

impl HubOptions {
    /// Record size limit, `None` when unlimited.
    pub fn message_limit(&self) -> Option<usize> {
        (self.max_message_size > 0).then_some(self.max_message_size)
    }

    /// Handshake deadline.
    pub fn handshake_timeout(&self) -> Duration {
        Duration::from_millis(self.handshake_timeout_ms)
    }

    /// Server Ping interval.
    pub fn keep_alive_interval(&self) -> Duration {
        Duration::from_millis(self.keep_alive_interval_ms)
    }

    /// Client idle timeout.
    pub fn client_timeout_interval(&self) -> Duration {
        Duration::from_millis(self.client_timeout_interval_ms)
    }

    /// Reject values the session cannot run with.
    pub fn validate(&self) -> Result<()> {
        let checks: [(&str, bool); 8] = [
            ("maxHandshakeSize", self.max_handshake_size > 0),
            ("handshakeTimeoutMs", self.handshake_timeout_ms > 0),
            ("keepAliveIntervalMs", self.keep_alive_interval_ms > 0),
            ("clientTimeoutIntervalMs", self.client_timeout_interval_ms > 0),
            ("maxParallelInvocations", self.max_parallel_invocations > 0),
            ("maxUploadStreams", self.max_upload_streams > 0),
            ("streamBufferCapacity", self.stream_buffer_capacity > 0),
            ("sendQueueCapacity", self.send_queue_capacity > 0),
        ];
        match checks.iter().find(|(_, ok)| !ok) {
            Some((name, _)) => Err(SettingsError::InvalidValue(format!("{name} must be > 0"))),
            None => Ok(()),
        }
    }
}
