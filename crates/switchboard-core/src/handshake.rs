//! Handshake records.
//!
//! The handshake is always a JSON text record terminated by
//! [`RECORD_SEPARATOR`], regardless of which codec it selects.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::errors::{ProtocolError, Result};
use crate::protocol::{RECORD_SEPARATOR, TransferFormat};

/// First record sent by a client.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct HandshakeRequest {
    /// Requested protocol name (e.g. `"json"`).
    pub protocol: String,
    /// Requested protocol version.
    pub version: u32,
}

/// Server reply to a [`HandshakeRequest`]. `{}` means success.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct HandshakeResponse {
    /// Why the handshake failed.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl HandshakeResponse {
    /// Successful response.
    pub fn ok() -> Self {
        Self::default()
    }

    /// Failure response.
    pub fn failed(error: impl Into<String>) -> Self {
        Self {
            error: Some(error.into()),
        }
    }
}

/// Reasons a well-formed handshake request is refused.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum HandshakeRejection {
    /// No registered codec has this name.
    #[error("The protocol '{0}' is not supported.")]
    UnsupportedProtocol(String),

    /// The codec exists but cannot speak the requested version.
    #[error("The server does not support version {version} of the '{protocol}' protocol.")]
    UnsupportedVersion {
        /// Protocol name.
        protocol: String,
        /// Requested version.
        version: u32,
    },

    /// The codec needs a transfer format the transport cannot carry.
    #[error(
        "Cannot use the '{protocol}' protocol on the current transport. The transport does not support '{format}' transfer format."
    )]
    UnsupportedTransferFormat {
        /// Protocol name.
        protocol: String,
        /// Format the codec needs.
        format: TransferFormat,
    },

    /// The handshake did not complete before the deadline or was too large.
    #[error("Handshake was canceled.")]
    Canceled,
}

#[derive(Deserialize)]
struct RawRequest {
    protocol: Option<String>,
    version: Option<u32>,
}

/// Parse a handshake request payload (without its terminator).
pub fn parse_request(payload: &[u8]) -> Result<HandshakeRequest> {
    let raw: RawRequest = serde_json::from_slice(payload)?;
    Ok(HandshakeRequest {
        protocol: raw
            .protocol
            .ok_or(ProtocolError::MissingProperty("protocol"))?,
        version: raw.version.ok_or(ProtocolError::MissingProperty("version"))?,
    })
}

/// Parse a handshake response payload (without its terminator).
pub fn parse_response(payload: &[u8]) -> Result<HandshakeResponse> {
    Ok(serde_json::from_slice(payload)?)
}

/// Serialize a request, including the trailing record separator.
pub fn write_request(request: &HandshakeRequest) -> Result<Vec<u8>> {
    Ok(terminated(serde_json::to_vec(request)?))
}

/// Serialize a response, including the trailing record separator.
pub fn write_response(response: &HandshakeResponse) -> Result<Vec<u8>> {
    Ok(terminated(serde_json::to_vec(response)?))
}

fn terminated(mut bytes: Vec<u8>) -> Vec<u8> {
    bytes.push(RECORD_SEPARATOR);
    bytes
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
