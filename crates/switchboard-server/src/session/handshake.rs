//! Server side of the handshake.

use std::sync::Arc;

use futures::StreamExt;
use metrics::counter;
use switchboard_core::FrameCodec;
use switchboard_core::ProtocolError;
use switchboard_core::handshake::{self, HandshakeRejection, HandshakeResponse};
use switchboard_core::protocol::{CodecRegistry, HubCodec};
use switchboard_settings::HubOptions;
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};
use tokio_util::codec::FramedRead;
use tracing::{debug, warn};

use crate::errors::SessionError;
use crate::metrics::HUB_HANDSHAKE_FAILURES_TOTAL;

/// Result of a handshake that did not fail.
#[derive(Debug)]
pub(crate) enum Handshake {
    /// Codec negotiated; the success response has been written.
    Accepted(Arc<dyn HubCodec>),
    /// The peer closed before sending anything.
    Closed,
}

/// Read the handshake record, negotiate a codec, and write the response.
///
/// Any bytes after the handshake record stay buffered in `reader`.
pub(crate) async fn perform<R, W>(
    reader: &mut FramedRead<R, FrameCodec>,
    writer: &mut W,
    codecs: &CodecRegistry,
    options: &HubOptions,
    binary_transport: bool,
) -> Result<Handshake, SessionError>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let payload = match tokio::time::timeout(options.handshake_timeout(), reader.next()).await {
        Err(_elapsed) => {
            warn!(timeout_ms = options.handshake_timeout_ms, "handshake timed out");
            return reject(writer, HandshakeRejection::Canceled, "timeout").await;
        }
        Ok(None) => return Ok(Handshake::Closed),
        Ok(Some(Err(ProtocolError::MessageTooLarge { limit }))) => {
            warn!(limit, "handshake exceeded size limit");
            return reject(writer, HandshakeRejection::Canceled, "too_large").await;
        }
        Ok(Some(Err(err))) => {
            // Partial record at EOF or transport failure; nobody to answer.
            debug!(error = %err, "handshake read failed");
            counter!(HUB_HANDSHAKE_FAILURES_TOTAL, "reason" => "read").increment(1);
            return Err(err.into());
        }
        Ok(Some(Ok(payload))) => payload,
    };

    let request = match handshake::parse_request(&payload) {
        Ok(request) => request,
        Err(err) => {
            warn!(error = %err, "malformed handshake");
            counter!(HUB_HANDSHAKE_FAILURES_TOTAL, "reason" => "malformed").increment(1);
            respond(writer, &HandshakeResponse::failed(err.to_string())).await?;
            return Err(err.into());
        }
    };

    match codecs.negotiate(&request, binary_transport) {
        Ok(codec) => {
            respond(writer, &HandshakeResponse::ok()).await?;
            debug!(protocol = %request.protocol, version = request.version, "handshake accepted");
            Ok(Handshake::Accepted(codec))
        }
        Err(rejection) => {
            warn!(protocol = %request.protocol, version = request.version, %rejection, "handshake rejected");
            reject(writer, rejection, "unsupported").await
        }
    }
}

async fn reject<W: AsyncWrite + Unpin>(
    writer: &mut W,
    rejection: HandshakeRejection,
    reason: &'static str,
) -> Result<Handshake, SessionError> {
    counter!(HUB_HANDSHAKE_FAILURES_TOTAL, "reason" => reason).increment(1);
    respond(writer, &HandshakeResponse::failed(rejection.to_string())).await?;
    Err(SessionError::Handshake(rejection))
}

async fn respond<W: AsyncWrite + Unpin>(
    writer: &mut W,
    response: &HandshakeResponse,
) -> Result<(), SessionError> {
    let bytes = handshake::write_response(response)?;
    writer
        .write_all(&bytes)
        .await
        .map_err(ProtocolError::from)?;
    writer.flush().await.map_err(ProtocolError::from)?;
    Ok(())
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
