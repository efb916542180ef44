//! The single writer of a connection.
//!
//! Drains the outbound queue into the framed transport and sends a `Ping`
//! whenever nothing was written for the keep-alive interval.

use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use futures::SinkExt;
use metrics::counter;
use switchboard_core::FrameCodec;
use switchboard_core::protocol::{HubCodec, HubMessage};
use tokio::io::AsyncWrite;
use tokio::sync::mpsc;
use tokio::time::{Instant, sleep};
use tokio_util::codec::FramedWrite;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::metrics::HUB_MESSAGES_SENT_TOTAL;

/// Why the writer stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum WriterExit {
    /// A `Close` message was written.
    Closed,
    /// Every sender is gone and the queue is empty.
    Drained,
    /// Stopped from outside.
    Stopped,
    /// The transport failed.
    Failed,
}

/// Drain `rx` into `sink` until a `Close` goes out, the queue closes,
/// `stop` fires, or the transport fails. A transport failure fires `abort`.
pub(crate) async fn run_writer<W>(
    mut sink: FramedWrite<W, FrameCodec>,
    codec: Arc<dyn HubCodec>,
    mut rx: mpsc::Receiver<HubMessage>,
    keep_alive: Duration,
    stop: CancellationToken,
    abort: CancellationToken,
) -> WriterExit
where
    W: AsyncWrite + Unpin,
{
    let idle = sleep(keep_alive);
    tokio::pin!(idle);

    loop {
        let message = tokio::select! {
            biased;
            () = stop.cancelled() => return WriterExit::Stopped,
            next = rx.recv() => match next {
                Some(message) => message,
                None => return WriterExit::Drained,
            },
            () = &mut idle => HubMessage::Ping,
        };

        let is_close = matches!(message, HubMessage::Close(_));
        let kind = message.kind();
        let payload = match codec.encode(&message) {
            Ok(payload) => payload,
            Err(err) => {
                warn!(error = %err, %kind, "failed to encode outbound message, skipping");
                continue;
            }
        };
        if let Err(err) = sink.send(Bytes::from(payload)).await {
            debug!(error = %err, "transport write failed");
            abort.cancel();
            return WriterExit::Failed;
        }
        counter!(HUB_MESSAGES_SENT_TOTAL, "type" => kind.to_string()).increment(1);
        idle.as_mut().reset(Instant::now() + keep_alive);

        if is_close {
            return WriterExit::Closed;
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
