//! The `json` hub protocol, version 1.
//!
//! Each record is one UTF-8 JSON object with a numeric `type` property.
//! Unknown properties are ignored so newer clients can add headers freely.

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;

use crate::errors::{ProtocolError, Result};
use crate::protocol::codec::{Framing, HubCodec, RECORD_SEPARATOR, TransferFormat};
use crate::protocol::messages::{
    CancelInvocationMessage, CloseMessage, Completion, CompletionMessage, HubMessage,
    InvocationMessage, MessageKind, StreamInvocationMessage, StreamItemMessage,
};

/// Protocol name negotiated in the handshake.
pub const JSON_PROTOCOL: &str = "json";

/// JSON text codec.
#[derive(Clone, Copy, Debug, Default)]
pub struct JsonCodec;

impl JsonCodec {
    /// Create the codec.
    pub fn new() -> Self {
        Self
    }
}

/// Deserialize a field that is present, keeping an explicit `null` as
/// `Some(Value::Null)`. Combined with `#[serde(default)]`, an absent field
/// stays `None`.
fn present<'de, D>(deserializer: D) -> std::result::Result<Option<Value>, D::Error>
where
    D: Deserializer<'de>,
{
    Value::deserialize(deserializer).map(Some)
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawMessage {
    #[serde(rename = "type")]
    kind: Option<u64>,
    invocation_id: Option<String>,
    target: Option<String>,
    arguments: Option<Vec<Value>>,
    stream_ids: Option<Vec<String>>,
    #[serde(default, deserialize_with = "present")]
    item: Option<Value>,
    #[serde(default, deserialize_with = "present")]
    result: Option<Value>,
    error: Option<String>,
    #[serde(default)]
    allow_reconnect: bool,
}

impl RawMessage {
    fn required_id(&mut self) -> Result<String> {
        self.invocation_id
            .take()
            .ok_or(ProtocolError::MissingProperty("invocationId"))
    }

    fn required_target(&mut self) -> Result<String> {
        self.target
            .take()
            .ok_or(ProtocolError::MissingProperty("target"))
    }

    fn required_arguments(&mut self) -> Result<Vec<Value>> {
        self.arguments
            .take()
            .ok_or(ProtocolError::MissingProperty("arguments"))
    }

    fn into_message(mut self) -> Result<Option<HubMessage>> {
        let raw_kind = self.kind.ok_or(ProtocolError::MissingProperty("type"))?;
        let Some(kind) = u8::try_from(raw_kind).ok().and_then(MessageKind::from_u8) else {
            return Ok(None);
        };

        let message = match kind {
            MessageKind::Invocation => HubMessage::Invocation(InvocationMessage {
                target: self.required_target()?,
                arguments: self.required_arguments()?,
                stream_ids: self.stream_ids.take().unwrap_or_default(),
                invocation_id: self.invocation_id,
            }),
            MessageKind::StreamInvocation => {
                HubMessage::StreamInvocation(StreamInvocationMessage {
                    invocation_id: self.required_id()?,
                    target: self.required_target()?,
                    arguments: self.required_arguments()?,
                    stream_ids: self.stream_ids.take().unwrap_or_default(),
                })
            }
            MessageKind::StreamItem => HubMessage::StreamItem(StreamItemMessage {
                invocation_id: self.required_id()?,
                item: self.item.ok_or(ProtocolError::MissingProperty("item"))?,
            }),
            MessageKind::Completion => {
                let invocation_id = self.required_id()?;
                let outcome = match (self.error, self.result) {
                    (Some(_), Some(_)) => {
                        return Err(ProtocolError::InvalidMessage(
                            "The 'error' and 'result' properties are mutually exclusive."
                                .into(),
                        ));
                    }
                    (Some(error), None) => Completion::Error(error),
                    (None, Some(result)) => Completion::Result(result),
                    (None, None) => Completion::Empty,
                };
                HubMessage::Completion(CompletionMessage {
                    invocation_id,
                    outcome,
                })
            }
            MessageKind::CancelInvocation => {
                HubMessage::CancelInvocation(CancelInvocationMessage {
                    invocation_id: self.required_id()?,
                })
            }
            MessageKind::Ping => HubMessage::Ping,
            MessageKind::Close => HubMessage::Close(CloseMessage {
                error: self.error,
                allow_reconnect: self.allow_reconnect,
            }),
        };
        Ok(Some(message))
    }
}

fn is_false(value: &bool) -> bool {
    !*value
}

fn is_empty(ids: &&[String]) -> bool {
    ids.is_empty()
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct WireMessage<'a> {
    #[serde(rename = "type")]
    kind: u8,
    #[serde(skip_serializing_if = "Option::is_none")]
    invocation_id: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    target: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    arguments: Option<&'a [Value]>,
    #[serde(skip_serializing_if = "is_empty")]
    stream_ids: &'a [String],
    #[serde(skip_serializing_if = "Option::is_none")]
    item: Option<&'a Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    result: Option<&'a Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<&'a str>,
    #[serde(skip_serializing_if = "is_false")]
    allow_reconnect: bool,
}

impl<'a> WireMessage<'a> {
    fn bare(kind: MessageKind) -> Self {
        Self {
            kind: kind.as_u8(),
            invocation_id: None,
            target: None,
            arguments: None,
            stream_ids: &[],
            item: None,
            result: None,
            error: None,
            allow_reconnect: false,
        }
    }

    fn from_message(message: &'a HubMessage) -> Self {
        let mut wire = Self::bare(message.kind());
        match message {
            HubMessage::Invocation(m) => {
                wire.invocation_id = m.invocation_id.as_deref();
                wire.target = Some(&m.target);
                wire.arguments = Some(&m.arguments);
                wire.stream_ids = &m.stream_ids;
            }
            HubMessage::StreamInvocation(m) => {
                wire.invocation_id = Some(&m.invocation_id);
                wire.target = Some(&m.target);
                wire.arguments = Some(&m.arguments);
                wire.stream_ids = &m.stream_ids;
            }
            HubMessage::StreamItem(m) => {
                wire.invocation_id = Some(&m.invocation_id);
                wire.item = Some(&m.item);
            }
            HubMessage::Completion(m) => {
                wire.invocation_id = Some(&m.invocation_id);
                match &m.outcome {
                    Completion::Empty => {}
                    Completion::Result(v) => wire.result = Some(v),
                    Completion::Error(e) => wire.error = Some(e),
                }
            }
            HubMessage::CancelInvocation(m) => {
                wire.invocation_id = Some(&m.invocation_id);
            }
            HubMessage::Ping => {}
            HubMessage::Close(m) => {
                wire.error = m.error.as_deref();
                wire.allow_reconnect = m.allow_reconnect;
            }
        }
        wire
    }
}

impl HubCodec for JsonCodec {
    fn name(&self) -> &str {
        JSON_PROTOCOL
    }

    fn version(&self) -> u32 {
        1
    }

    fn transfer_format(&self) -> TransferFormat {
        TransferFormat::Text
    }

    fn framing(&self) -> Framing {
        Framing::Delimited(RECORD_SEPARATOR)
    }

    fn decode(&self, payload: &[u8]) -> Result<Option<HubMessage>> {
        let raw: RawMessage = serde_json::from_slice(payload)?;
        raw.into_message()
    }

    fn encode(&self, message: &HubMessage) -> Result<Vec<u8>> {
        Ok(serde_json::to_vec(&WireMessage::from_message(message))?)
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
