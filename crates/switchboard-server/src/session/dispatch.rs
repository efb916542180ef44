//! Per-message dispatch for an active connection.
//!
//! Runs on the read loop, so everything here happens in arrival order.
//! Method bodies are spawned into the session's `JoinSet`; the read loop
//! only waits when the connection is at its blocking-invocation limit or an
//! upload stream is applying backpressure.

use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Instant;

use futures::stream::BoxStream;
use futures::{FutureExt, StreamExt};
use metrics::{counter, histogram};
use serde_json::Value;
use switchboard_core::protocol::{
    Completion, CompletionMessage, HubMessage, StreamItemMessage,
};
use tokio::sync::OwnedSemaphorePermit;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, warn};

use super::SessionShared;
use super::invocations::BeginError;
use crate::errors::MethodError;
use crate::hub::context::HubCall;
use crate::hub::methods::{MethodDescriptor, MethodOutput, is_reserved};
use crate::metrics::{
    HUB_INVOCATION_DURATION_SECONDS, HUB_INVOCATION_ERRORS_TOTAL, HUB_INVOCATIONS_TOTAL,
};

/// What the read loop should do after a message.
#[derive(Debug, PartialEq, Eq)]
pub(crate) enum Flow {
    Continue,
    /// Client pinged; arms the client timeout.
    Ping,
    /// Client closed, optionally reporting an error.
    Close(Option<String>),
}

/// An `Invocation` or `StreamInvocation`, flattened.
struct Request {
    id: Option<String>,
    target: String,
    arguments: Vec<Value>,
    stream_ids: Vec<String>,
    streaming: bool,
}

pub(crate) async fn dispatch(
    session: &Arc<SessionShared>,
    message: HubMessage,
    tasks: &mut JoinSet<()>,
) -> Flow {
    match message {
        HubMessage::Invocation(inv) => {
            let request = Request {
                id: inv.invocation_id,
                target: inv.target,
                arguments: inv.arguments,
                stream_ids: inv.stream_ids,
                streaming: false,
            };
            on_invocation(session, request, tasks).await;
        }
        HubMessage::StreamInvocation(inv) => {
            let request = Request {
                id: Some(inv.invocation_id),
                target: inv.target,
                arguments: inv.arguments,
                stream_ids: inv.stream_ids,
                streaming: true,
            };
            on_invocation(session, request, tasks).await;
        }
        HubMessage::StreamItem(item) => on_stream_item(session, item).await,
        HubMessage::Completion(completion) => on_completion(session, completion),
        HubMessage::CancelInvocation(cancel) => {
            let found = session.handle.invocations.lock().cancel(&cancel.invocation_id);
            if !found {
                debug!(invocation_id = %cancel.invocation_id, "cancel for unknown invocation ignored");
            }
        }
        HubMessage::Ping => return Flow::Ping,
        HubMessage::Close(close) => return Flow::Close(close.error),
    }
    Flow::Continue
}

async fn on_stream_item(session: &SessionShared, item: StreamItemMessage) {
    let feeder = session.handle.invocations.lock().upload_feeder(&item.invocation_id);
    let Some((tx, closed)) = feeder else {
        debug!(stream_id = %item.invocation_id, "stream item for unknown or finished stream dropped");
        return;
    };
    tokio::select! {
        biased;
        () = closed.cancelled() => {
            debug!(stream_id = %item.invocation_id, "upload stream closed while delivering item");
        }
        () = session.handle.abort_token().cancelled() => {}
        sent = tx.send(item.item) => {
            if sent.is_err() {
                debug!(stream_id = %item.invocation_id, "upload stream consumer dropped, item discarded");
            }
        }
    }
}

fn on_completion(session: &SessionShared, completion: CompletionMessage) {
    let Err(completion) = session.handle.complete_result(completion) else {
        return;
    };
    let error = completion.error().map(str::to_owned);
    let routed = session
        .handle
        .invocations
        .lock()
        .complete_upload(&completion.invocation_id, error);
    if !routed {
        warn!(
            invocation_id = %completion.invocation_id,
            "completion for unknown invocation id discarded"
        );
    }
}

async fn on_invocation(session: &Arc<SessionShared>, request: Request, tasks: &mut JoinSet<()>) {
    let options = &session.hub.options;
    let detailed = options.enable_detailed_errors;

    let duplicate = request
        .id
        .as_deref()
        .is_some_and(|id| session.handle.invocations.lock().invocation_id_in_use(id));
    if duplicate {
        warn!(invocation_id = ?request.id, method = %request.target, "duplicate invocation id, message dropped");
        return;
    }

    let descriptor = if is_reserved(&request.target) {
        None
    } else {
        session.hub.resolver.resolve(&request.target)
    };
    let Some(descriptor) = descriptor else {
        debug!(method = %request.target, "unknown hub method");
        reply_error(
            session,
            &request,
            format!(
                "Failed to invoke '{}' due to an error on the server. HubError: Method does not exist.",
                request.target
            ),
        )
        .await;
        return;
    };

    if descriptor.is_streaming() != request.streaming {
        let message = if request.streaming {
            format!(
                "The client attempted to invoke the non-streaming '{}' method with a streaming invocation.",
                request.target
            )
        } else {
            format!(
                "The client attempted to invoke the streaming '{}' method with a non-streaming invocation.",
                request.target
            )
        };
        reply_error(session, &request, message).await;
        return;
    }

    if let Err(err) = descriptor.bind(&request.arguments) {
        debug!(method = %request.target, error = %err, "argument binding failed");
        let message = if detailed {
            format!(
                "Failed to invoke '{}' due to an error on the server. InvalidData: {err}",
                request.target
            )
        } else {
            format!("Failed to invoke '{}' due to an error on the server.", request.target)
        };
        reply_error(session, &request, message).await;
        return;
    }

    if request.stream_ids.len() != descriptor.stream_count() {
        let message = format!(
            "Client sent {} stream(s), Hub method expects {}.",
            request.stream_ids.len(),
            descriptor.stream_count()
        );
        reply_error(session, &request, hub_error_text(&request.target, &message)).await;
        return;
    }

    let begun = session.handle.invocations.lock().begin(
        request.id.as_deref(),
        &request.stream_ids,
        options.max_upload_streams,
        options.stream_buffer_capacity,
        session.handle.abort_token(),
    );
    let registered = match begun {
        Ok(registered) => registered,
        Err(BeginError::DuplicateStream(stream_id)) => {
            let message = format!("Stream id '{stream_id}' is already in use.");
            reply_error(session, &request, hub_error_text(&request.target, &message)).await;
            return;
        }
        Err(BeginError::TooManyStreams(limit)) => {
            let message = format!("Client exceeded the limit of {limit} concurrent upload streams.");
            reply_error(session, &request, hub_error_text(&request.target, &message)).await;
            return;
        }
        Err(BeginError::DuplicateId) => {
            warn!(invocation_id = ?request.id, "duplicate invocation id, message dropped");
            return;
        }
        Err(BeginError::Closed) => return,
    };

    // Streaming results and upload consumers run outside the limit; they
    // depend on the read loop to make progress.
    let blocking = !request.streaming && request.stream_ids.is_empty();
    let permit = if blocking {
        let acquired = tokio::select! {
            permit = session.permits.clone().acquire_owned() => permit.ok(),
            () = session.handle.abort_token().cancelled() => None,
        };
        if acquired.is_none() {
            session
                .handle
                .invocations
                .lock()
                .finish(registered.key, request.id.as_deref());
            return;
        }
        acquired
    } else {
        None
    };

    let call = HubCall {
        method: request.target,
        invocation_id: request.id,
        arguments: request.arguments,
        streams: registered.streams,
        cancel: registered.cancel,
        caller: session.caller.clone(),
    };
    let _ = tasks.spawn(run_invocation(
        session.clone(),
        descriptor,
        call,
        registered.key,
        permit,
    ));
}

/// Error completion for a request that never started. Fire-and-forget
/// requests only log.
async fn reply_error(session: &SessionShared, request: &Request, message: String) {
    match &request.id {
        Some(id) => {
            session
                .handle
                .enqueue(HubMessage::Completion(CompletionMessage::with_error(id.clone(), message)))
                .await;
        }
        None => warn!(method = %request.target, error = %message, "fire-and-forget invocation failed"),
    }
}

async fn run_invocation(
    session: Arc<SessionShared>,
    descriptor: Arc<MethodDescriptor>,
    call: HubCall,
    key: u64,
    _permit: Option<OwnedSemaphorePermit>,
) {
    let method = descriptor.name().to_owned();
    let id = call.invocation_id.clone();
    let cancel = call.cancel.clone();
    let detailed = session.hub.options.enable_detailed_errors;
    let started = Instant::now();
    counter!(HUB_INVOCATIONS_TOTAL, "method" => method.clone()).increment(1);

    let invoked = AssertUnwindSafe(session.filters.invoke(call, descriptor.handler().as_ref()))
        .catch_unwind()
        .await
        .unwrap_or_else(|panic| Err(panic_error(&panic)));

    let (outcome, failure) = if descriptor.is_streaming() {
        let streamed = match invoked {
            Ok(MethodOutput::Stream(stream)) => {
                stream_results(&session, id.as_deref().unwrap_or_default(), stream, &cancel).await
            }
            Ok(other) => Err(MethodError::failure(
                "InvalidOperation",
                format!("Streaming method returned {other:?} instead of a stream."),
            )),
            Err(err) => Err(err),
        };
        match streamed {
            Ok(()) => (Completion::Empty, None),
            Err(MethodError::Canceled) if cancel.is_cancelled() => (Completion::Empty, None),
            Err(err) => (Completion::Error(stream_error_text(&err, detailed)), Some(err)),
        }
    } else {
        match invoked {
            Ok(MethodOutput::Unit) => (Completion::Empty, None),
            Ok(MethodOutput::Value(value)) => (Completion::Result(value), None),
            Ok(MethodOutput::Stream(_)) => {
                let err = MethodError::failure(
                    "InvalidOperation",
                    "Non-streaming method returned a stream.",
                );
                (Completion::Error(invocation_error_text(&method, &err, detailed)), Some(err))
            }
            Err(err) => (Completion::Error(invocation_error_text(&method, &err, detailed)), Some(err)),
        }
    };

    histogram!(HUB_INVOCATION_DURATION_SECONDS, "method" => method.clone())
        .record(started.elapsed().as_secs_f64());
    if let Some(err) = &failure {
        counter!(
            HUB_INVOCATION_ERRORS_TOTAL,
            "method" => method.clone(),
            "error_kind" => err.kind().to_owned()
        )
        .increment(1);
        match err {
            MethodError::Canceled => debug!(method = %method, invocation_id = ?id, "hub method canceled"),
            _ => error!(method = %method, invocation_id = ?id, error = %err, "hub method failed"),
        }
    }

    // Release the id before the completion goes out so the client may reuse it.
    session.handle.invocations.lock().finish(key, id.as_deref());
    if let Some(id) = id {
        session
            .handle
            .enqueue(HubMessage::Completion(CompletionMessage {
                invocation_id: id,
                outcome,
            }))
            .await;
    }
}

async fn stream_results(
    session: &SessionShared,
    id: &str,
    mut stream: BoxStream<'static, Result<Value, MethodError>>,
    cancel: &CancellationToken,
) -> Result<(), MethodError> {
    loop {
        let next = tokio::select! {
            biased;
            () = cancel.cancelled() => return Err(MethodError::Canceled),
            next = AssertUnwindSafe(stream.next()).catch_unwind() => next,
        };
        match next {
            Err(panic) => return Err(panic_error(&panic)),
            Ok(None) => return Ok(()),
            Ok(Some(Err(err))) => return Err(err),
            Ok(Some(Ok(item))) => {
                session
                    .handle
                    .send(HubMessage::StreamItem(StreamItemMessage::new(id, item)), cancel)
                    .await?;
            }
        }
    }
}

fn hub_error_text(method: &str, message: &str) -> String {
    format!("An unexpected error occurred invoking '{method}' on the server. HubError: {message}")
}

/// Client-facing text for a failed invocation.
pub(crate) fn invocation_error_text(method: &str, err: &MethodError, detailed: bool) -> String {
    match err {
        MethodError::Hub(message) => hub_error_text(method, message),
        _ if detailed => format!(
            "An unexpected error occurred invoking '{method}' on the server. {}: {err}",
            err.kind()
        ),
        _ => format!("An unexpected error occurred invoking '{method}' on the server."),
    }
}

/// Client-facing text for a failed result stream.
pub(crate) fn stream_error_text(err: &MethodError, detailed: bool) -> String {
    const BASE: &str = "An error occurred on the server while streaming results.";
    match err {
        MethodError::Hub(message) => format!("{BASE} HubError: {message}"),
        _ if detailed => format!("{BASE} {}: {err}", err.kind()),
        _ => BASE.to_owned(),
    }
}

pub(crate) fn panic_error(panic: &Box<dyn Any + Send>) -> MethodError {
    let message = panic
        .downcast_ref::<&str>()
        .map(|s| (*s).to_owned())
        .or_else(|| panic.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "hub code panicked".to_owned());
    MethodError::failure("Panic", message)
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
