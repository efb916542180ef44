//! Protocol-level error types.
//!
//! [`ProtocolError`] covers everything that can go wrong between raw bytes
//! and a typed [`HubMessage`](crate::protocol::HubMessage): record framing,
//! size limits, handshake parsing, and codec failures. Any `ProtocolError`
//! raised while reading is fatal for the connection.
//!
//! [`CodecRegistryError`] is a startup-time configuration failure.

use thiserror::Error;

/// Errors raised while framing, parsing, or writing protocol records.
#[derive(Debug, Error)]
pub enum ProtocolError {
    /// A record exceeded the configured size limit. Detected before the
    /// record is handed to a codec.
    #[error("The maximum message size of {limit}B was exceeded.")]
    MessageTooLarge {
        /// Configured limit in bytes.
        limit: usize,
    },

    /// The transport ended in the middle of a record.
    #[error("Connection terminated while reading a message.")]
    Truncated,

    /// Record boundary could not be determined (e.g. malformed length prefix).
    #[error("{0}")]
    InvalidFrame(String),

    /// A message or handshake is missing a required property.
    #[error("Missing required property '{0}'.")]
    MissingProperty(&'static str),

    /// A message is structurally invalid.
    #[error("{0}")]
    InvalidMessage(String),

    /// Payload is not valid JSON / does not match the expected shape.
    #[error("{0}")]
    Json(#[from] serde_json::Error),

    /// Transport I/O failure.
    #[error("{0}")]
    Io(#[from] std::io::Error),
}

impl ProtocolError {
    /// Short machine-readable kind, used in close reasons and metrics labels.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::MessageTooLarge { .. } => "MessageTooLarge",
            Self::Truncated
            | Self::InvalidFrame(_)
            | Self::MissingProperty(_)
            | Self::InvalidMessage(_)
            | Self::Json(_) => "InvalidData",
            Self::Io(_) => "Io",
        }
    }
}

/// Startup-time failures building the set of available codecs.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum CodecRegistryError {
    /// No codec was registered, or the allow-list filtered all of them out.
    #[error("No hub protocols are registered.")]
    Empty,

    /// Two codecs share a protocol name.
    #[error("Duplicate hub protocol '{0}'.")]
    Duplicate(String),
}

/// Result type for protocol operations.
pub type Result<T> = std::result::Result<T, ProtocolError>;

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
