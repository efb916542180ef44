//! Error types for hub configuration, sessions, and hub method calls.

use switchboard_core::handshake::HandshakeRejection;
use switchboard_core::{CodecRegistryError, ConnectionId, ProtocolError};
use switchboard_settings::SettingsError;

/// Hub configuration rejected before any connection is accepted.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// Two methods share a name (case-insensitively).
    #[error("Duplicate definitions of '{0}'. Overloading is not supported.")]
    DuplicateMethod(String),

    /// A method uses a lifecycle hook name.
    #[error("'{0}' is a reserved method name.")]
    ReservedMethod(String),

    /// Codec set is empty or inconsistent.
    #[error(transparent)]
    Codecs(#[from] CodecRegistryError),

    /// Options failed validation.
    #[error(transparent)]
    Settings(#[from] SettingsError),
}

/// Why a connection ended abnormally.
///
/// Passed to `on_disconnected` hooks and returned from
/// [`HubEndpoint::serve`](crate::endpoint::HubEndpoint::serve).
#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    /// Handshake refused; the client received an error response.
    #[error("{0}")]
    Handshake(#[from] HandshakeRejection),

    /// Framing, decoding, or transport failure.
    #[error(transparent)]
    Protocol(#[from] ProtocolError),

    /// No frame arrived within the client timeout interval.
    #[error("Client hasn't sent a message/ping within the configured client timeout interval.")]
    ClientTimeout,

    /// A connect hook failed.
    #[error("{0}")]
    Connect(MethodError),

    /// A disconnect hook failed.
    #[error("{0}")]
    Disconnect(MethodError),

    /// The connection could not be registered.
    #[error(transparent)]
    Registry(#[from] RegistryError),
}

impl SessionError {
    /// Short error kind used in close messages and metric labels.
    pub fn kind(&self) -> &str {
        match self {
            Self::Handshake(_) => "Handshake",
            Self::Protocol(e) => e.kind(),
            Self::ClientTimeout => "Timeout",
            Self::Connect(e) | Self::Disconnect(e) => e.kind(),
            Self::Registry(_) => "Registry",
        }
    }
}

/// Failure reported by hub code (methods, lifecycle hooks, filters).
#[derive(Debug, thiserror::Error)]
pub enum MethodError {
    /// Message meant for the client. Always surfaced, regardless of the
    /// detailed-errors setting.
    #[error("{0}")]
    Hub(String),

    /// Typed failure. Kind and message are surfaced only with detailed errors.
    #[error("{message}")]
    Failure {
        /// Short error kind, e.g. `InvalidData`.
        kind: String,
        /// Human-readable detail.
        message: String,
    },

    /// Anything else.
    #[error(transparent)]
    Other(#[from] anyhow::Error),

    /// The call was canceled.
    #[error("Invocation canceled.")]
    Canceled,
}

impl MethodError {
    /// Client-visible failure.
    pub fn hub(message: impl Into<String>) -> Self {
        Self::Hub(message.into())
    }

    /// Typed failure.
    pub fn failure(kind: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Failure {
            kind: kind.into(),
            message: message.into(),
        }
    }

    /// Short error kind.
    pub fn kind(&self) -> &str {
        match self {
            Self::Hub(_) => "HubError",
            Self::Failure { kind, .. } => kind,
            Self::Other(_) => "Error",
            Self::Canceled => "Canceled",
        }
    }
}

impl From<ClientResultError> for MethodError {
    fn from(err: ClientResultError) -> Self {
        match err {
            ClientResultError::Canceled => Self::Canceled,
            ClientResultError::ParallelismRequired => Self::Hub(err.to_string()),
            other => Self::failure("ClientResultError", other.to_string()),
        }
    }
}

impl From<SendError> for MethodError {
    fn from(err: SendError) -> Self {
        match err {
            SendError::Canceled => Self::Canceled,
        }
    }
}

impl From<StreamError> for MethodError {
    fn from(err: StreamError) -> Self {
        match err {
            StreamError::Canceled => Self::Canceled,
            StreamError::Client(message) => Self::failure("StreamError", message),
        }
    }
}

/// A send was abandoned because its cancellation fired.
///
/// Sends to closed or unknown connections are silent no-ops, not errors.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SendError {
    /// Cancellation fired before the message was queued.
    #[error("Send was canceled.")]
    Canceled,
}

/// Failure awaiting a result from a client.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ClientResultError {
    /// The server-side cancellation fired.
    #[error("Invocation canceled by the server.")]
    Canceled,

    /// The connection closed before the client answered.
    #[error("Connection disconnected before the client returned a result.")]
    Disconnected,

    /// No such connection.
    #[error("Connection '{0}' does not exist.")]
    UnknownConnection(ConnectionId),

    /// The client completed with an error.
    #[error("{0}")]
    Client(String),

    /// The client completed without a result.
    #[error("Client didn't provide a result.")]
    NoResult,

    /// Waiting on the caller from inside a hub method would block its read loop.
    #[error(
        "Client results inside a hub method require maxParallelInvocations to be greater than 1."
    )]
    ParallelismRequired,
}

/// Lifetime registry rejected an operation.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RegistryError {
    /// A connection with this id is already registered.
    #[error("Connection '{0}' is already registered.")]
    DuplicateConnection(ConnectionId),
}

/// Terminal signal from an upload stream.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum StreamError {
    /// The owning invocation finished or the connection closed.
    #[error("Stream canceled.")]
    Canceled,

    /// The client completed the stream with an error.
    #[error("{0}")]
    Client(String),
}

/// Arguments did not match the method's declared parameters.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum BindingError {
    /// Wrong number of arguments.
    #[error("Invocation provides {provided} argument(s) but target expects {expected}.")]
    Count {
        /// Arguments the client sent.
        provided: usize,
        /// Arguments the method declares.
        expected: usize,
    },

    /// An argument had the wrong JSON type.
    #[error("Error binding arguments. Argument {index} is not a valid {expected}.")]
    Type {
        /// Zero-based argument index.
        index: usize,
        /// Declared parameter type.
        expected: &'static str,
    },
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
