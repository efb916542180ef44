//! Record framing on top of an ordered byte stream.
//!
//! [`FrameCodec`] splits incoming bytes into record payloads and enforces the
//! size limit before any codec sees the payload. It starts in handshake mode
//! (separator-terminated, handshake size limit) and is switched with
//! [`FrameCodec::reframe`] once a codec has been negotiated. Bytes already
//! buffered past the handshake record are kept.

use bytes::{Buf, BufMut, Bytes, BytesMut};
use tokio_util::codec::{Decoder, Encoder};

use crate::errors::ProtocolError;
use crate::protocol::{Framing, RECORD_SEPARATOR};

/// Longest accepted varint length prefix.
const MAX_VARINT_LEN: usize = 5;

/// Splits a byte stream into records and writes records back out.
#[derive(Clone, Debug)]
pub struct FrameCodec {
    framing: Framing,
    max_len: Option<usize>,
    /// Bytes already scanned for a delimiter.
    scan_from: usize,
}

impl FrameCodec {
    /// Codec with the given framing and optional payload limit.
    pub fn new(framing: Framing, max_len: Option<usize>) -> Self {
        Self {
            framing,
            max_len,
            scan_from: 0,
        }
    }

    /// Codec for the handshake record.
    pub fn handshake(max_len: usize) -> Self {
        Self::new(Framing::Delimited(RECORD_SEPARATOR), Some(max_len))
    }

    /// Switch framing after the handshake.
    pub fn reframe(&mut self, framing: Framing, max_len: Option<usize>) {
        self.framing = framing;
        self.max_len = max_len;
        self.scan_from = 0;
    }

    /// Current framing.
    pub fn framing(&self) -> Framing {
        self.framing
    }

    /// Current payload limit.
    pub fn max_len(&self) -> Option<usize> {
        self.max_len
    }

    fn check_len(&self, len: usize) -> Result<(), ProtocolError> {
        match self.max_len {
            Some(limit) if len > limit => Err(ProtocolError::MessageTooLarge { limit }),
            _ => Ok(()),
        }
    }

    fn decode_delimited(
        &mut self,
        delimiter: u8,
        src: &mut BytesMut,
    ) -> Result<Option<Bytes>, ProtocolError> {
        let start = self.scan_from.min(src.len());
        let Some(end) = src[start..]
            .iter()
            .position(|b| *b == delimiter)
            .map(|i| i + start)
        else {
            // Oversized records fail before the delimiter ever arrives.
            self.check_len(src.len())?;
            self.scan_from = src.len();
            return Ok(None);
        };

        self.check_len(end)?;
        self.scan_from = 0;
        let mut record = src.split_to(end + 1);
        record.truncate(end);
        Ok(Some(record.freeze()))
    }

    fn decode_length_prefixed(&self, src: &mut BytesMut) -> Result<Option<Bytes>, ProtocolError> {
        let Some((len, header)) = decode_varint(src)? else {
            return Ok(None);
        };
        self.check_len(len)?;
        let total = header + len;
        if src.len() < total {
            src.reserve(total - src.len());
            return Ok(None);
        }
        src.advance(header);
        Ok(Some(src.split_to(len).freeze()))
    }
}

/// Decode a little-endian base-128 length prefix.
///
/// Returns `(value, bytes_consumed)`, or `None` if more bytes are needed.
fn decode_varint(buffer: &[u8]) -> Result<Option<(usize, usize)>, ProtocolError> {
    let mut value: usize = 0;
    for (index, byte) in buffer.iter().copied().take(MAX_VARINT_LEN).enumerate() {
        value |= usize::from(byte & 0x7f) << (index * 7);
        if byte & 0x80 == 0 {
            return Ok(Some((value, index + 1)));
        }
    }
    if buffer.len() >= MAX_VARINT_LEN {
        return Err(ProtocolError::InvalidFrame(
            "Messages over 2GB in size are not supported.".into(),
        ));
    }
    Ok(None)
}

fn encode_varint(mut value: usize, dst: &mut BytesMut) {
    loop {
        #[allow(clippy::cast_possible_truncation)]
        let mut byte = (value & 0x7f) as u8;
        value >>= 7;
        if value != 0 {
            byte |= 0x80;
        }
        dst.put_u8(byte);
        if value == 0 {
            break;
        }
    }
}

impl Decoder for FrameCodec {
    type Item = Bytes;
    type Error = ProtocolError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Bytes>, ProtocolError> {
        match self.framing {
            Framing::Delimited(delimiter) => self.decode_delimited(delimiter, src),
            Framing::LengthPrefixed => self.decode_length_prefixed(src),
        }
    }

    fn decode_eof(&mut self, buf: &mut BytesMut) -> Result<Option<Bytes>, ProtocolError> {
        if let Some(frame) = self.decode(buf)? {
            return Ok(Some(frame));
        }
        if buf.is_empty() {
            Ok(None)
        } else {
            Err(ProtocolError::Truncated)
        }
    }
}

impl Encoder<Bytes> for FrameCodec {
    type Error = ProtocolError;

    fn encode(&mut self, payload: Bytes, dst: &mut BytesMut) -> Result<(), ProtocolError> {
        match self.framing {
            Framing::Delimited(delimiter) => {
                dst.reserve(payload.len() + 1);
                dst.extend_from_slice(&payload);
                dst.put_u8(delimiter);
            }
            Framing::LengthPrefixed => {
                dst.reserve(payload.len() + MAX_VARINT_LEN);
                encode_varint(payload.len(), dst);
                dst.extend_from_slice(&payload);
            }
        }
        Ok(())
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
