//! # switchboard-core
//!
//! Transport-agnostic building blocks of the hub protocol:
//!
//! - [`ids`]: branded connection and user ids
//! - [`protocol`]: logical messages, the [`HubCodec`](protocol::HubCodec)
//!   trait, the `json` and `messagepack` codecs, and codec negotiation
//! - [`handshake`]: handshake request/response records
//! - [`framing`]: record framing with size limits for `tokio_util` codecs
//! - [`errors`]: protocol error taxonomy
//! - [`logging`]: subscriber setup and log capture for tests

#![deny(unsafe_code)]

pub mod errors;
pub mod framing;
pub mod handshake;
pub mod ids;
pub mod logging;
pub mod protocol;

pub use errors::{CodecRegistryError, ProtocolError};
pub use framing::FrameCodec;
pub use ids::{ConnectionId, UserId};
