//! Codec-independent message types.
//!
//! Arguments, results, and stream items are carried as [`serde_json::Value`]
//! so a hub method sees the same dynamic value regardless of which codec the
//! connection negotiated.

use std::fmt;

use serde_json::Value;

/// One logical protocol message.
#[derive(Clone, Debug, PartialEq)]
pub enum HubMessage {
    /// Request to run a method, with an optional correlation id.
    Invocation(InvocationMessage),
    /// Request to run a method that streams results back.
    StreamInvocation(StreamInvocationMessage),
    /// One item of a stream (server→client results or client→server upload).
    StreamItem(StreamItemMessage),
    /// Terminates an invocation or a stream.
    Completion(CompletionMessage),
    /// Asks the peer to cancel a running invocation.
    CancelInvocation(CancelInvocationMessage),
    /// Keep-alive.
    Ping,
    /// Graceful close, optionally carrying an error.
    Close(CloseMessage),
}

/// Discriminant of a [`HubMessage`], matching the numeric `type` on the wire.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum MessageKind {
    /// `1`
    Invocation = 1,
    /// `2`
    StreamItem = 2,
    /// `3`
    Completion = 3,
    /// `4`
    StreamInvocation = 4,
    /// `5`
    CancelInvocation = 5,
    /// `6`
    Ping = 6,
    /// `7`
    Close = 7,
}

impl MessageKind {
    /// Decode the numeric wire type. Unknown values return `None`.
    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            1 => Some(Self::Invocation),
            2 => Some(Self::StreamItem),
            3 => Some(Self::Completion),
            4 => Some(Self::StreamInvocation),
            5 => Some(Self::CancelInvocation),
            6 => Some(Self::Ping),
            7 => Some(Self::Close),
            _ => None,
        }
    }

    /// Numeric wire type.
    #[inline]
    pub fn as_u8(self) -> u8 {
        self as u8
    }
}

impl fmt::Display for MessageKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Invocation => "invocation",
            Self::StreamItem => "stream_item",
            Self::Completion => "completion",
            Self::StreamInvocation => "stream_invocation",
            Self::CancelInvocation => "cancel_invocation",
            Self::Ping => "ping",
            Self::Close => "close",
        };
        f.write_str(name)
    }
}

impl HubMessage {
    /// Kind of this message.
    pub fn kind(&self) -> MessageKind {
        match self {
            Self::Invocation(_) => MessageKind::Invocation,
            Self::StreamInvocation(_) => MessageKind::StreamInvocation,
            Self::StreamItem(_) => MessageKind::StreamItem,
            Self::Completion(_) => MessageKind::Completion,
            Self::CancelInvocation(_) => MessageKind::CancelInvocation,
            Self::Ping => MessageKind::Ping,
            Self::Close(_) => MessageKind::Close,
        }
    }
}

/// `Invocation` (type 1).
#[derive(Clone, Debug, PartialEq)]
pub struct InvocationMessage {
    /// Correlation id. `None` marks a fire-and-forget invocation.
    pub invocation_id: Option<String>,
    /// Method name.
    pub target: String,
    /// Positional arguments.
    pub arguments: Vec<Value>,
    /// Upload streams the invocation will consume.
    pub stream_ids: Vec<String>,
}

impl InvocationMessage {
    /// Fire-and-forget invocation.
    pub fn new(target: impl Into<String>, arguments: Vec<Value>) -> Self {
        Self {
            invocation_id: None,
            target: target.into(),
            arguments,
            stream_ids: Vec::new(),
        }
    }

    /// Invocation that expects a completion.
    pub fn with_id(
        invocation_id: impl Into<String>,
        target: impl Into<String>,
        arguments: Vec<Value>,
    ) -> Self {
        Self {
            invocation_id: Some(invocation_id.into()),
            target: target.into(),
            arguments,
            stream_ids: Vec::new(),
        }
    }

    /// Attach upload stream ids.
    #[must_use]
    pub fn streams(mut self, stream_ids: Vec<String>) -> Self {
        self.stream_ids = stream_ids;
        self
    }
}

/// `StreamInvocation` (type 4).
#[derive(Clone, Debug, PartialEq)]
pub struct StreamInvocationMessage {
    /// Correlation id (always present for streams).
    pub invocation_id: String,
    /// Method name.
    pub target: String,
    /// Positional arguments.
    pub arguments: Vec<Value>,
    /// Upload streams the invocation will consume.
    pub stream_ids: Vec<String>,
}

impl StreamInvocationMessage {
    /// Streaming invocation without upload streams.
    pub fn new(
        invocation_id: impl Into<String>,
        target: impl Into<String>,
        arguments: Vec<Value>,
    ) -> Self {
        Self {
            invocation_id: invocation_id.into(),
            target: target.into(),
            arguments,
            stream_ids: Vec::new(),
        }
    }
}

/// `StreamItem` (type 2).
#[derive(Clone, Debug, PartialEq)]
pub struct StreamItemMessage {
    /// Invocation id (server→client) or stream id (client→server).
    pub invocation_id: String,
    /// The item value.
    pub item: Value,
}

impl StreamItemMessage {
    /// Build a stream item.
    pub fn new(invocation_id: impl Into<String>, item: Value) -> Self {
        Self {
            invocation_id: invocation_id.into(),
            item,
        }
    }
}

/// Outcome carried by a [`CompletionMessage`].
#[derive(Clone, Debug, PartialEq)]
pub enum Completion {
    /// Completed with no payload (void method, or end of stream).
    Empty,
    /// Completed with a result value (which may itself be `null`).
    Result(Value),
    /// Completed with an error message.
    Error(String),
}

/// `Completion` (type 3).
#[derive(Clone, Debug, PartialEq)]
pub struct CompletionMessage {
    /// Invocation or stream id being completed.
    pub invocation_id: String,
    /// Result, error, or nothing.
    pub outcome: Completion,
}

impl CompletionMessage {
    /// Completion with no payload.
    pub fn empty(invocation_id: impl Into<String>) -> Self {
        Self {
            invocation_id: invocation_id.into(),
            outcome: Completion::Empty,
        }
    }

    /// Completion with a result.
    pub fn with_result(invocation_id: impl Into<String>, result: Value) -> Self {
        Self {
            invocation_id: invocation_id.into(),
            outcome: Completion::Result(result),
        }
    }

    /// Completion with an error.
    pub fn with_error(invocation_id: impl Into<String>, error: impl Into<String>) -> Self {
        Self {
            invocation_id: invocation_id.into(),
            outcome: Completion::Error(error.into()),
        }
    }

    /// Error message, if this is an error completion.
    pub fn error(&self) -> Option<&str> {
        match &self.outcome {
            Completion::Error(e) => Some(e),
            _ => None,
        }
    }

    /// Result value, if this completion carries one.
    pub fn result(&self) -> Option<&Value> {
        match &self.outcome {
            Completion::Result(v) => Some(v),
            _ => None,
        }
    }
}

/// `CancelInvocation` (type 5).
#[derive(Clone, Debug, PartialEq)]
pub struct CancelInvocationMessage {
    /// Invocation to cancel.
    pub invocation_id: String,
}

impl CancelInvocationMessage {
    /// Build a cancel message.
    pub fn new(invocation_id: impl Into<String>) -> Self {
        Self {
            invocation_id: invocation_id.into(),
        }
    }
}

/// `Close` (type 7).
#[derive(Clone, Debug, Default, PartialEq)]
pub struct CloseMessage {
    /// Error that caused the close, if any.
    pub error: Option<String>,
    /// Whether the peer may reconnect.
    pub allow_reconnect: bool,
}

impl CloseMessage {
    /// Close without error.
    pub fn normal() -> Self {
        Self::default()
    }

    /// Close carrying an error.
    pub fn with_error(error: impl Into<String>) -> Self {
        Self {
            error: Some(error.into()),
            allow_reconnect: false,
        }
    }
}
