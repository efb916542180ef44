//! The `messagepack` hub protocol, version 1.
//!
//! Each record is one MessagePack array whose first element is the message
//! type. Records are length-prefixed on the wire. Headers are accepted and
//! ignored on input and written as an empty map.

use rmpv::{Integer, Value as Packed};
use serde_json::{Map, Number, Value};

use crate::errors::{ProtocolError, Result};
use crate::protocol::codec::{Framing, HubCodec, TransferFormat};
use crate::protocol::messages::{
    CancelInvocationMessage, CloseMessage, Completion, CompletionMessage, HubMessage,
    InvocationMessage, MessageKind, StreamInvocationMessage, StreamItemMessage,
};

/// Protocol name negotiated in the handshake.
pub const MESSAGEPACK_PROTOCOL: &str = "messagepack";

const RESULT_ERROR: u64 = 1;
const RESULT_VOID: u64 = 2;
const RESULT_VALUE: u64 = 3;

/// MessagePack binary codec.
#[derive(Clone, Copy, Debug, Default)]
pub struct MessagePackCodec;

impl MessagePackCodec {
    /// Create the codec.
    pub fn new() -> Self {
        Self
    }
}

fn invalid(message: impl Into<String>) -> ProtocolError {
    ProtocolError::InvalidMessage(message.into())
}

/// Convert a decoded MessagePack value into the dynamic value hub methods see.
fn to_json(value: Packed) -> Result<Value> {
    Ok(match value {
        Packed::Nil => Value::Null,
        Packed::Boolean(b) => Value::Bool(b),
        Packed::Integer(n) => match (n.as_u64(), n.as_i64()) {
            (Some(u), _) => Value::from(u),
            (None, Some(i)) => Value::from(i),
            (None, None) => return Err(invalid("Integer out of range.")),
        },
        Packed::F32(f) => Number::from_f64(f64::from(f)).map_or(Value::Null, Value::Number),
        Packed::F64(f) => Number::from_f64(f).map_or(Value::Null, Value::Number),
        Packed::String(s) => Value::String(
            s.into_str()
                .ok_or_else(|| invalid("String is not valid UTF-8."))?,
        ),
        Packed::Binary(bytes) => Value::Array(bytes.into_iter().map(Value::from).collect()),
        Packed::Array(items) => Value::Array(items.into_iter().map(to_json).collect::<Result<_>>()?),
        Packed::Map(entries) => {
            let mut map = Map::with_capacity(entries.len());
            for (key, value) in entries {
                let Packed::String(key) = key else {
                    return Err(invalid("Map keys must be strings."));
                };
                let key = key
                    .into_str()
                    .ok_or_else(|| invalid("String is not valid UTF-8."))?;
                let _ = map.insert(key, to_json(value)?);
            }
            Value::Object(map)
        }
        Packed::Ext(kind, _) => return Err(invalid(format!("Unsupported extension type {kind}."))),
    })
}

fn from_json(value: &Value) -> Packed {
    match value {
        Value::Null => Packed::Nil,
        Value::Bool(b) => Packed::Boolean(*b),
        Value::Number(n) => {
            if let Some(u) = n.as_u64() {
                Packed::Integer(Integer::from(u))
            } else if let Some(i) = n.as_i64() {
                Packed::Integer(Integer::from(i))
            } else {
                Packed::F64(n.as_f64().unwrap_or_default())
            }
        }
        Value::String(s) => Packed::from(s.as_str()),
        Value::Array(items) => Packed::Array(items.iter().map(from_json).collect()),
        Value::Object(map) => Packed::Map(
            map.iter()
                .map(|(k, v)| (Packed::from(k.as_str()), from_json(v)))
                .collect(),
        ),
    }
}

/// Positional reader over the elements of one message array.
struct Fields {
    items: std::vec::IntoIter<Packed>,
}

impl Fields {
    fn next(&mut self, name: &'static str) -> Result<Packed> {
        self.items.next().ok_or(ProtocolError::MissingProperty(name))
    }

    fn string(&mut self, name: &'static str) -> Result<String> {
        match self.next(name)? {
            Packed::String(s) => s
                .into_str()
                .ok_or_else(|| invalid(format!("'{name}' is not valid UTF-8."))),
            _ => Err(invalid(format!("Expected '{name}' to be a string."))),
        }
    }

    fn optional_string(&mut self, name: &'static str) -> Result<Option<String>> {
        match self.next(name)? {
            Packed::Nil => Ok(None),
            Packed::String(s) => s
                .into_str()
                .map(Some)
                .ok_or_else(|| invalid(format!("'{name}' is not valid UTF-8."))),
            _ => Err(invalid(format!("Expected '{name}' to be a string or nil."))),
        }
    }

    fn headers(&mut self) -> Result<()> {
        match self.next("headers")? {
            Packed::Map(_) => Ok(()),
            _ => Err(invalid("Expected 'headers' to be a map.")),
        }
    }

    fn arguments(&mut self) -> Result<Vec<Value>> {
        match self.next("arguments")? {
            Packed::Array(items) => items.into_iter().map(to_json).collect(),
            _ => Err(invalid("Expected 'arguments' to be an array.")),
        }
    }

    /// Stream ids are a trailing element older clients omit.
    fn stream_ids(&mut self) -> Result<Vec<String>> {
        match self.items.next() {
            None | Some(Packed::Nil) => Ok(Vec::new()),
            Some(Packed::Array(ids)) => ids
                .into_iter()
                .map(|id| match id {
                    Packed::String(s) => s
                        .into_str()
                        .ok_or_else(|| invalid("'streamIds' is not valid UTF-8.")),
                    _ => Err(invalid("Expected 'streamIds' to hold strings.")),
                })
                .collect(),
            Some(_) => Err(invalid("Expected 'streamIds' to be an array.")),
        }
    }
}

fn decode_message(kind: MessageKind, fields: &mut Fields) -> Result<HubMessage> {
    Ok(match kind {
        MessageKind::Invocation => {
            fields.headers()?;
            let invocation_id = fields.optional_string("invocationId")?;
            HubMessage::Invocation(InvocationMessage {
                invocation_id,
                target: fields.string("target")?,
                arguments: fields.arguments()?,
                stream_ids: fields.stream_ids()?,
            })
        }
        MessageKind::StreamInvocation => {
            fields.headers()?;
            HubMessage::StreamInvocation(StreamInvocationMessage {
                invocation_id: fields.string("invocationId")?,
                target: fields.string("target")?,
                arguments: fields.arguments()?,
                stream_ids: fields.stream_ids()?,
            })
        }
        MessageKind::StreamItem => {
            fields.headers()?;
            HubMessage::StreamItem(StreamItemMessage {
                invocation_id: fields.string("invocationId")?,
                item: to_json(fields.next("item")?)?,
            })
        }
        MessageKind::Completion => {
            fields.headers()?;
            let invocation_id = fields.string("invocationId")?;
            let result_kind = match fields.next("resultKind")? {
                Packed::Integer(n) => n.as_u64(),
                _ => None,
            };
            let outcome = match result_kind {
                Some(RESULT_ERROR) => Completion::Error(fields.string("error")?),
                Some(RESULT_VOID) => Completion::Empty,
                Some(RESULT_VALUE) => Completion::Result(to_json(fields.next("result")?)?),
                _ => return Err(invalid("Invalid completion result kind.")),
            };
            HubMessage::Completion(CompletionMessage {
                invocation_id,
                outcome,
            })
        }
        MessageKind::CancelInvocation => {
            fields.headers()?;
            HubMessage::CancelInvocation(CancelInvocationMessage {
                invocation_id: fields.string("invocationId")?,
            })
        }
        MessageKind::Ping => HubMessage::Ping,
        MessageKind::Close => {
            let error = fields.optional_string("error")?;
            let allow_reconnect = matches!(fields.items.next(), Some(Packed::Boolean(true)));
            HubMessage::Close(CloseMessage {
                error,
                allow_reconnect,
            })
        }
    })
}

fn opt_str(value: Option<&str>) -> Packed {
    value.map_or(Packed::Nil, Packed::from)
}

fn strings(ids: &[String]) -> Packed {
    Packed::Array(ids.iter().map(|id| Packed::from(id.as_str())).collect())
}

fn arguments(args: &[Value]) -> Packed {
    Packed::Array(args.iter().map(from_json).collect())
}

fn encode_message(message: &HubMessage) -> Packed {
    let kind = Packed::from(message.kind().as_u8());
    let headers = || Packed::Map(Vec::new());
    let fields = match message {
        HubMessage::Invocation(m) => vec![
            kind,
            headers(),
            opt_str(m.invocation_id.as_deref()),
            Packed::from(m.target.as_str()),
            arguments(&m.arguments),
            strings(&m.stream_ids),
        ],
        HubMessage::StreamInvocation(m) => vec![
            kind,
            headers(),
            Packed::from(m.invocation_id.as_str()),
            Packed::from(m.target.as_str()),
            arguments(&m.arguments),
            strings(&m.stream_ids),
        ],
        HubMessage::StreamItem(m) => vec![
            kind,
            headers(),
            Packed::from(m.invocation_id.as_str()),
            from_json(&m.item),
        ],
        HubMessage::Completion(m) => {
            let mut fields = vec![kind, headers(), Packed::from(m.invocation_id.as_str())];
            match &m.outcome {
                Completion::Error(error) => {
                    fields.push(Packed::from(RESULT_ERROR));
                    fields.push(Packed::from(error.as_str()));
                }
                Completion::Empty => fields.push(Packed::from(RESULT_VOID)),
                Completion::Result(value) => {
                    fields.push(Packed::from(RESULT_VALUE));
                    fields.push(from_json(value));
                }
            }
            fields
        }
        HubMessage::CancelInvocation(m) => {
            vec![kind, headers(), Packed::from(m.invocation_id.as_str())]
        }
        HubMessage::Ping => vec![kind],
        HubMessage::Close(m) => vec![
            kind,
            opt_str(m.error.as_deref()),
            Packed::Boolean(m.allow_reconnect),
        ],
    };
    Packed::Array(fields)
}

impl HubCodec for MessagePackCodec {
    fn name(&self) -> &str {
        MESSAGEPACK_PROTOCOL
    }

    fn version(&self) -> u32 {
        1
    }

    fn transfer_format(&self) -> TransferFormat {
        TransferFormat::Binary
    }

    fn framing(&self) -> Framing {
        Framing::LengthPrefixed
    }

    fn decode(&self, payload: &[u8]) -> Result<Option<HubMessage>> {
        let mut input = payload;
        let value = rmpv::decode::read_value(&mut input).map_err(|e| invalid(e.to_string()))?;
        if !input.is_empty() {
            return Err(invalid("Unexpected bytes after the message."));
        }
        let Packed::Array(items) = value else {
            return Err(invalid("Message is not an array."));
        };
        let mut fields = Fields {
            items: items.into_iter(),
        };
        let raw_kind = match fields.next("type")? {
            Packed::Integer(n) => n.as_u64(),
            _ => None,
        }
        .ok_or_else(|| invalid("Expected the message type to be an integer."))?;
        let Some(kind) = u8::try_from(raw_kind).ok().and_then(MessageKind::from_u8) else {
            return Ok(None);
        };
        decode_message(kind, &mut fields).map(Some)
    }

    fn encode(&self, message: &HubMessage) -> Result<Vec<u8>> {
        let mut out = Vec::new();
        rmpv::encode::write_value(&mut out, &encode_message(message))
            .map_err(|e| invalid(e.to_string()))?;
        Ok(out)
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
