//! One connection from handshake to teardown.
//!
//! 1. Handshake on the raw byte stream, then reframe for the negotiated codec
//! 2. Spawn the single writer (outbound queue, keep-alive pings)
//! 3. Register the connection and run the connect chain
//! 4. Read loop: decode frames in order and dispatch them
//! 5. Drain: cancel outstanding work, write `Close`, run the disconnect
//!    chain, unregister

pub(crate) mod dispatch;
pub(crate) mod handshake;
pub(crate) mod invocations;
pub(crate) mod timeout;
pub mod uploads;
pub(crate) mod writer;

use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;

use futures::{FutureExt, StreamExt};
use metrics::{counter, gauge, histogram};
use switchboard_core::FrameCodec;
use switchboard_core::protocol::{CloseMessage, HubCodec, HubMessage};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::{Semaphore, mpsc};
use tokio::task::{JoinError, JoinSet};
use tokio_util::codec::{FramedRead, FramedWrite};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};

use crate::connection::{ConnectionHandle, ConnectionState};
use crate::endpoint::{ConnectionInfo, HubShared};
use crate::errors::{MethodError, SessionError};
use crate::filters::FilterChain;
use crate::hub::context::CallerContext;
use crate::metrics::{
    HUB_CONNECTION_DURATION_SECONDS, HUB_CONNECTIONS_ACTIVE, HUB_CONNECTIONS_TOTAL,
    HUB_DISCONNECTIONS_TOTAL, HUB_MESSAGES_RECEIVED_TOTAL, HUB_PROTOCOL_ERRORS_TOTAL,
};
use dispatch::{Flow, dispatch, panic_error};
use handshake::Handshake;
use timeout::{ClientTimeout, expire};
use writer::run_writer;

/// How long canceled invocations get to finish during teardown.
const DRAIN_TIMEOUT: Duration = Duration::from_secs(5);

/// How long the writer gets to flush the final `Close`.
const CLOSE_TIMEOUT: Duration = Duration::from_secs(5);

/// State shared between the read loop and the invocations it spawns.
pub(crate) struct SessionShared {
    pub(crate) handle: Arc<ConnectionHandle>,
    pub(crate) caller: CallerContext,
    pub(crate) hub: Arc<HubShared>,
    pub(crate) filters: FilterChain,
    pub(crate) permits: Arc<Semaphore>,
}

/// Run a connection to completion.
///
/// Returns `Ok` for a clean close (including a peer that hangs up before
/// the handshake) and the reason otherwise.
#[instrument(skip_all, fields(connection_id))]
pub(crate) async fn run<R, W>(
    hub: Arc<HubShared>,
    read: R,
    mut write: W,
    info: ConnectionInfo,
) -> Result<(), SessionError>
where
    R: AsyncRead + Unpin + Send + 'static,
    W: AsyncWrite + Unpin + Send + 'static,
{
    let connection_id = info.id.unwrap_or_default();
    let _ = tracing::Span::current().record("connection_id", tracing::field::display(&connection_id));
    let options = &hub.options;

    let mut reader = FramedRead::new(read, FrameCodec::handshake(options.max_handshake_size));
    let negotiated = tokio::select! {
        outcome = handshake::perform(&mut reader, &mut write, &hub.codecs, options, info.binary) => outcome?,
        () = hub.shutdown.cancelled() => {
            debug!("server shutting down during handshake");
            return Ok(());
        }
    };
    let codec = match negotiated {
        Handshake::Accepted(codec) => codec,
        Handshake::Closed => {
            debug!("transport closed before handshake");
            return Ok(());
        }
    };

    let framing = codec.framing();
    reader.decoder_mut().reframe(framing, options.message_limit());
    let sink = FramedWrite::new(write, FrameCodec::new(framing, None));

    let (tx, rx) = mpsc::channel(options.send_queue_capacity);
    let abort = hub.shutdown.child_token();
    let handle = Arc::new(ConnectionHandle::new(
        connection_id,
        info.user_id,
        info.items,
        tx,
        abort.clone(),
    ));
    let stop_writer = CancellationToken::new();
    let mut writer = tokio::spawn(run_writer(
        sink,
        codec.clone(),
        rx,
        options.keep_alive_interval(),
        stop_writer.clone(),
        abort,
    ));

    let client_results = options.max_parallel_invocations > 1;
    let shared = Arc::new(SessionShared {
        handle: handle.clone(),
        caller: CallerContext::new(handle.clone(), hub.registry.clone(), client_results),
        hub: hub.clone(),
        filters: FilterChain::new(&hub.filters),
        permits: Arc::new(Semaphore::new(options.max_parallel_invocations)),
    });

    handle.set_state(ConnectionState::Active);
    counter!(HUB_CONNECTIONS_TOTAL).increment(1);
    gauge!(HUB_CONNECTIONS_ACTIVE).increment(1.0);
    info!(protocol = codec.name(), user_id = ?handle.user_id(), "connection established");

    let mut tasks = JoinSet::new();
    let outcome = match hub.registry.add_connection(handle.clone()) {
        Err(err) => Err(SessionError::from(err)),
        Ok(()) => match connect(&shared).await {
            Err(err) => {
                warn!(error = %err, "connect hook failed");
                Err(SessionError::Connect(err))
            }
            Ok(()) => read_loop(&shared, &mut reader, codec.as_ref(), &mut tasks).await,
        },
    };

    // Draining.
    handle.set_state(ConnectionState::Draining);
    let released = handle.invocations.lock().close();
    debug!(?released, "outstanding work canceled");
    drain_tasks(&mut tasks).await;

    let close = close_message(&outcome, options.enable_detailed_errors);
    let queued = tokio::time::timeout(CLOSE_TIMEOUT, handle.send_final(HubMessage::Close(close)))
        .await
        .unwrap_or(false);
    let flushed = queued && tokio::time::timeout(CLOSE_TIMEOUT, &mut writer).await.is_ok();
    if flushed {
        debug!("close message flushed");
    } else {
        warn!("writer did not flush the close message, stopping it");
        stop_writer.cancel();
        if let Err(err) = writer.await {
            warn!(error = %err, "writer task failed");
        }
    }
    handle.abort();

    let disconnected = AssertUnwindSafe(shared.filters.on_disconnected(
        &shared.caller,
        outcome.as_ref().err(),
        hub.lifecycle.as_ref(),
    ))
    .catch_unwind()
    .await
    .unwrap_or_else(|panic| Err(panic_error(&panic)));
    if let Err(err) = &disconnected {
        error!(error = %err, "disconnect hook failed");
    }

    hub.registry.remove_connection(&handle);
    shared.filters.dispose().await;
    handle.set_state(ConnectionState::Closed);

    let reason = match &outcome {
        Ok(()) => "normal".to_owned(),
        Err(err) => err.kind().to_owned(),
    };
    if let Err(SessionError::Protocol(err)) = &outcome {
        counter!(HUB_PROTOCOL_ERRORS_TOTAL, "kind" => err.kind()).increment(1);
    }
    counter!(HUB_DISCONNECTIONS_TOTAL, "reason" => reason.clone()).increment(1);
    gauge!(HUB_CONNECTIONS_ACTIVE).decrement(1.0);
    histogram!(HUB_CONNECTION_DURATION_SECONDS).record(handle.age().as_secs_f64());
    info!(%reason, duration_ms = handle.age().as_millis(), "connection closed");

    match (outcome, disconnected) {
        (Err(err), _) => Err(err),
        (Ok(()), Err(err)) => Err(SessionError::Disconnect(err)),
        (Ok(()), Ok(())) => Ok(()),
    }
}

async fn connect(shared: &SessionShared) -> Result<(), MethodError> {
    AssertUnwindSafe(
        shared
            .filters
            .on_connected(&shared.caller, shared.hub.lifecycle.as_ref()),
    )
    .catch_unwind()
    .await
    .unwrap_or_else(|panic| Err(panic_error(&panic)))
}

async fn read_loop<R>(
    shared: &Arc<SessionShared>,
    reader: &mut FramedRead<R, FrameCodec>,
    codec: &dyn HubCodec,
    tasks: &mut JoinSet<()>,
) -> Result<(), SessionError>
where
    R: AsyncRead + Unpin,
{
    let abort = shared.handle.abort_token().clone();
    let mut watchdog = ClientTimeout::new(shared.hub.options.client_timeout_interval());

    loop {
        let frame = tokio::select! {
            biased;
            () = abort.cancelled() => {
                debug!("connection aborted");
                return Ok(());
            }
            Some(joined) = tasks.join_next(), if !tasks.is_empty() => {
                log_join(joined);
                continue;
            }
            () = expire(watchdog.deadline()) => {
                warn!("client timeout elapsed");
                return Err(SessionError::ClientTimeout);
            }
            frame = reader.next() => frame,
        };

        let payload = match frame {
            None => {
                debug!("transport closed by peer");
                return Ok(());
            }
            Some(Err(err)) => {
                warn!(error = %err, "fatal protocol error");
                return Err(err.into());
            }
            Some(Ok(payload)) => payload,
        };
        watchdog.touch();

        let message = match codec.decode(&payload) {
            Ok(Some(message)) => message,
            Ok(None) => {
                debug!("message of unknown type ignored");
                continue;
            }
            Err(err) => {
                warn!(error = %err, "undecodable message");
                return Err(err.into());
            }
        };
        counter!(HUB_MESSAGES_RECEIVED_TOTAL, "type" => message.kind().to_string()).increment(1);

        match dispatch(shared, message, tasks).await {
            Flow::Continue => {}
            Flow::Ping => watchdog.arm(),
            Flow::Close(None) => {
                debug!("client closed the connection");
                return Ok(());
            }
            Flow::Close(Some(error)) => {
                info!(%error, "client closed the connection with an error");
                return Ok(());
            }
        }
        watchdog.touch();
    }
}

async fn drain_tasks(tasks: &mut JoinSet<()>) {
    let drained = tokio::time::timeout(DRAIN_TIMEOUT, async {
        while let Some(joined) = tasks.join_next().await {
            log_join(joined);
        }
    })
    .await;
    if drained.is_err() {
        warn!(remaining = tasks.len(), "invocations ignored cancellation, aborting them");
        tasks.shutdown().await;
    }
}

fn log_join(joined: Result<(), JoinError>) {
    if let Err(err) = joined {
        if err.is_panic() {
            error!(error = %err, "invocation task panicked");
        }
    }
}

/// Final `Close` for a connection outcome.
///
/// Protocol failures always carry their detail; hub-code failures only
/// with detailed errors, unless they are client-facing hub errors.
pub(crate) fn close_message(outcome: &Result<(), SessionError>, detailed: bool) -> CloseMessage {
    let Err(err) = outcome else {
        return CloseMessage::normal();
    };
    match err {
        SessionError::Connect(e) | SessionError::Disconnect(e)
            if !detailed && !matches!(e, MethodError::Hub(_)) =>
        {
            CloseMessage::with_error("Connection closed with an error.")
        }
        _ => CloseMessage::with_error(format!(
            "Connection closed with an error. {}: {err}",
            err.kind()
        )),
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
