//! Adapts an axum WebSocket into the ordered byte stream a session reads.
//!
//! Inbound text and binary frames are concatenated in order; record
//! boundaries come from the session's framing, not from WebSocket frames.
//! Outbound writes become one frame each, text when the bytes are UTF-8.

use std::future::ready;
use std::io;

use axum::extract::ws::{Message, WebSocket};
use bytes::Bytes;
use futures::{SinkExt, StreamExt};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio_util::io::{CopyToBytes, SinkWriter, StreamReader};
use tracing::debug;

/// Split a WebSocket into read and write halves.
pub fn split(
    ws: WebSocket,
) -> (
    impl AsyncRead + Unpin + Send + 'static,
    impl AsyncWrite + Unpin + Send + 'static,
) {
    let (ws_tx, mut ws_rx) = ws.split();

    let incoming = async_stream::stream! {
        while let Some(frame) = ws_rx.next().await {
            match frame {
                Ok(Message::Text(text)) => yield Ok(Bytes::copy_from_slice(text.as_str().as_bytes())),
                Ok(Message::Binary(data)) => yield Ok(data),
                Ok(Message::Close(_)) => {
                    debug!("client sent close frame");
                    break;
                }
                Ok(Message::Ping(_) | Message::Pong(_)) => {}
                Err(err) => {
                    yield Err(io::Error::other(err));
                    break;
                }
            }
        }
    };
    let reader = StreamReader::new(Box::pin(incoming));

    let outgoing = ws_tx
        .sink_map_err(io::Error::other)
        .with(|bytes: Bytes| ready(Ok::<_, io::Error>(to_message(bytes))));
    let writer = SinkWriter::new(CopyToBytes::new(outgoing));

    (reader, writer)
}

fn to_message(bytes: Bytes) -> Message {
    match String::from_utf8(bytes.into()) {
        Ok(text) => Message::Text(text.into()),
        Err(err) => Message::Binary(Bytes::from(err.into_bytes())),
    }
}
