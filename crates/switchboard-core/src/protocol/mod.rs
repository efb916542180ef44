//! Hub protocol: message model, codec trait, the JSON and MessagePack
//! codecs, and the codec registry used during handshake negotiation.

pub mod codec;
pub mod json;
pub mod messages;
pub mod msgpack;
pub mod registry;

pub use codec::{Framing, HubCodec, RECORD_SEPARATOR, TransferFormat};
pub use json::{JSON_PROTOCOL, JsonCodec};
pub use messages::{
    CancelInvocationMessage, CloseMessage, Completion, CompletionMessage, HubMessage,
    InvocationMessage, MessageKind, StreamInvocationMessage, StreamItemMessage,
};
pub use msgpack::{MESSAGEPACK_PROTOCOL, MessagePackCodec};
pub use registry::CodecRegistry;
