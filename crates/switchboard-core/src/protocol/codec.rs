//! The pluggable message codec boundary.

use std::fmt;

use crate::errors::Result;
use crate::protocol::messages::HubMessage;

/// Record separator terminating text records (and every handshake record).
pub const RECORD_SEPARATOR: u8 = 0x1E;

/// Whether a codec produces text or binary payloads.
///
/// Hosting adapters use this to pick WebSocket text vs binary frames.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TransferFormat {
    /// UTF-8 payloads.
    Text,
    /// Arbitrary bytes.
    Binary,
}

impl fmt::Display for TransferFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Text => "Text",
            Self::Binary => "Binary",
        })
    }
}

/// How records are delimited on the byte stream once a codec is active.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Framing {
    /// Each record ends with the given delimiter byte.
    Delimited(u8),
    /// Each record is preceded by a varint length (at most 5 bytes).
    LengthPrefixed,
}

/// Serializes [`HubMessage`]s to and from single record payloads.
///
/// Framing is owned by [`FrameCodec`](crate::framing::FrameCodec); a codec
/// only ever sees one complete, size-checked record at a time.
pub trait HubCodec: Send + Sync + 'static {
    /// Protocol name advertised in the handshake.
    fn name(&self) -> &str;

    /// Highest protocol version this codec speaks.
    fn version(&self) -> u32;

    /// Whether a client-requested version is acceptable.
    fn supports_version(&self, version: u32) -> bool {
        version <= self.version()
    }

    /// Payload format.
    fn transfer_format(&self) -> TransferFormat;

    /// Record framing used after the handshake.
    fn framing(&self) -> Framing;

    /// Decode one record payload.
    ///
    /// Returns `Ok(None)` for well-formed records of a message type this
    /// codec does not know; those are skipped.
    fn decode(&self, payload: &[u8]) -> Result<Option<HubMessage>>;

    /// Encode one message to a record payload (without framing).
    fn encode(&self, message: &HubMessage) -> Result<Vec<u8>>;
}

impl fmt::Debug for dyn HubCodec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HubCodec")
            .field("name", &self.name())
            .field("version", &self.version())
            .finish()
    }
}
