//! End-to-end sessions over an in-memory transport.

mod common;

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use assert_matches::assert_matches;
use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::json;
use switchboard_core::ProtocolError;
use switchboard_core::logging::capture_logs;
use switchboard_core::protocol::{
    CancelInvocationMessage, Completion, CompletionMessage, HubMessage,
};
use switchboard_server::hub::{CallerContext, HubCall, HubLifecycle, MethodOutput};
use switchboard_server::{HubEndpoint, HubFilter, InvokeNext, MethodError, SessionError};
use switchboard_settings::HubOptions;
use tracing::Level;

use common::{TestClient, demo_builder, demo_endpoint, hold_uploads, invocation};

const QUIET: Duration = Duration::from_millis(100);

fn options() -> HubOptions {
    HubOptions::default()
}

fn close_error(message: Option<HubMessage>) -> Option<String> {
    match message {
        Some(HubMessage::Close(close)) => close.error,
        other => panic!("expected close, got {other:?}"),
    }
}

// ── Invocations ─────────────────────────────────────────────────────────────

#[tokio::test]
async fn echo_round_trip_and_clean_close() {
    let endpoint = demo_endpoint(options());
    let mut client = TestClient::connect(&endpoint, "a").await;

    client
        .send_json(r#"{"type":1,"invocationId":"1","target":"Echo","arguments":["hi"]}"#)
        .await;
    assert_eq!(
        client.recv_raw_skip_pings().await.as_deref(),
        Some(r#"{"type":3,"invocationId":"1","result":"hi"}"#)
    );

    client.send_json(r#"{"type":7}"#).await;
    assert_eq!(client.recv_raw_skip_pings().await.as_deref(), Some(r#"{"type":7}"#));
    assert!(client.finished().await.is_ok());
    assert_eq!(endpoint.registry().connection_count(), 0);
}

#[tokio::test]
async fn fire_and_forget_gets_no_completion() {
    let endpoint = demo_endpoint(options());
    let mut client = TestClient::connect(&endpoint, "a").await;

    client
        .send_json(r#"{"type":1,"target":"Nothing","arguments":[]}"#)
        .await;
    client
        .send_json(r#"{"type":1,"target":"Missing","arguments":[]}"#)
        .await;
    client.send_json(&invocation("2", "Add", json!([2, 3]))).await;

    assert_eq!(
        client.recv().await,
        Some(HubMessage::Completion(CompletionMessage::with_result("2", json!(5))))
    );
    assert_eq!(client.recv_within(QUIET).await, None);
}

#[tokio::test]
async fn one_completion_per_invocation() {
    let endpoint = demo_endpoint(options());
    let mut client = TestClient::connect(&endpoint, "a").await;

    for id in ["1", "2", "3"] {
        client.send_json(&invocation(id, "Echo", json!([id]))).await;
    }
    for id in ["1", "2", "3"] {
        assert_eq!(
            client.recv().await,
            Some(HubMessage::Completion(CompletionMessage::with_result(id, json!(id))))
        );
    }
    assert_eq!(client.recv_within(QUIET).await, None);
}

#[tokio::test]
async fn unknown_and_reserved_methods_do_not_exist() {
    let endpoint = demo_endpoint(options());
    let mut client = TestClient::connect(&endpoint, "a").await;

    client.send_json(&invocation("1", "Missing", json!([]))).await;
    assert_eq!(
        client.recv().await,
        Some(HubMessage::Completion(CompletionMessage::with_error(
            "1",
            "Failed to invoke 'Missing' due to an error on the server. HubError: Method does not exist."
        )))
    );

    client.send_json(&invocation("2", "ondisconnected", json!([]))).await;
    let Some(HubMessage::Completion(completion)) = client.recv().await else {
        panic!("expected completion");
    };
    assert_eq!(completion.invocation_id, "2");
    assert!(completion.error().unwrap().ends_with("HubError: Method does not exist."));
}

#[tokio::test]
async fn binding_errors_hide_detail_by_default() {
    let endpoint = demo_endpoint(options());
    let mut client = TestClient::connect(&endpoint, "a").await;

    client.send_json(&invocation("1", "Add", json!([1]))).await;
    assert_eq!(
        client.recv().await,
        Some(HubMessage::Completion(CompletionMessage::with_error(
            "1",
            "Failed to invoke 'Add' due to an error on the server."
        )))
    );
}

#[tokio::test]
async fn binding_errors_with_detailed_errors() {
    let endpoint = demo_endpoint(HubOptions {
        enable_detailed_errors: true,
        ..options()
    });
    let mut client = TestClient::connect(&endpoint, "a").await;

    client.send_json(&invocation("1", "Add", json!([1, "two"]))).await;
    assert_eq!(
        client.recv().await,
        Some(HubMessage::Completion(CompletionMessage::with_error(
            "1",
            "Failed to invoke 'Add' due to an error on the server. InvalidData: Error binding arguments. Argument 1 is not a valid integer."
        )))
    );
}

#[tokio::test]
async fn method_failures_respect_detailed_errors() {
    let endpoint = demo_endpoint(options());
    let mut client = TestClient::connect(&endpoint, "a").await;
    client.send_json(&invocation("1", "Fail", json!([]))).await;
    client.send_json(&invocation("2", "Reject", json!([]))).await;
    assert_eq!(
        client.recv().await,
        Some(HubMessage::Completion(CompletionMessage::with_error(
            "1",
            "An unexpected error occurred invoking 'Fail' on the server."
        )))
    );
    assert_eq!(
        client.recv().await,
        Some(HubMessage::Completion(CompletionMessage::with_error(
            "2",
            "An unexpected error occurred invoking 'Reject' on the server. HubError: not allowed"
        )))
    );

    let endpoint = demo_endpoint(HubOptions {
        enable_detailed_errors: true,
        ..options()
    });
    let mut client = TestClient::connect(&endpoint, "a").await;
    client.send_json(&invocation("1", "Fail", json!([]))).await;
    assert_eq!(
        client.recv().await,
        Some(HubMessage::Completion(CompletionMessage::with_error(
            "1",
            "An unexpected error occurred invoking 'Fail' on the server. InvalidOperation: boom"
        )))
    );
}

#[tokio::test]
async fn non_streaming_invocation_of_streaming_method() {
    let endpoint = demo_endpoint(options());
    let mut client = TestClient::connect(&endpoint, "a").await;

    client.send_json(&invocation("1", "Counter", json!([3]))).await;
    assert_eq!(
        client.recv().await,
        Some(HubMessage::Completion(CompletionMessage::with_error(
            "1",
            "The client attempted to invoke the streaming 'Counter' method with a non-streaming invocation."
        )))
    );
}

#[tokio::test]
async fn cancel_of_unknown_id_is_a_no_op() {
    let endpoint = demo_endpoint(options());
    let mut client = TestClient::connect(&endpoint, "a").await;

    client.send_json(r#"{"type":5,"invocationId":"nope"}"#).await;
    client.send_json(&invocation("1", "Echo", json!([1]))).await;
    assert_eq!(
        client.recv().await,
        Some(HubMessage::Completion(CompletionMessage::with_result("1", json!(1))))
    );
}

#[tokio::test]
async fn unknown_message_type_is_ignored() {
    let endpoint = demo_endpoint(options());
    let mut client = TestClient::connect(&endpoint, "a").await;

    client.send_json(r#"{"type":99,"whatever":true}"#).await;
    client.send_json(&invocation("1", "Echo", json!(["still here"]))).await;
    assert_eq!(
        client.recv().await,
        Some(HubMessage::Completion(CompletionMessage::with_result(
            "1",
            json!("still here")
        )))
    );
}

#[tokio::test]
async fn malformed_message_closes_with_error() {
    let endpoint = demo_endpoint(options());
    let mut client = TestClient::connect(&endpoint, "a").await;

    client.send_json(r#"{"type":1,"invocationId":"1"}"#).await;
    let error = close_error(client.recv().await).unwrap();
    assert!(error.starts_with("Connection closed with an error. InvalidData:"), "{error}");
    assert_matches!(client.finished().await, Err(SessionError::Protocol(_)));
}

// ── Streaming ───────────────────────────────────────────────────────────────

#[tokio::test]
async fn streaming_results_then_empty_completion() {
    let endpoint = demo_endpoint(options());
    let mut client = TestClient::connect(&endpoint, "a").await;

    client
        .send_json(r#"{"type":4,"invocationId":"1","target":"Counter","arguments":[3]}"#)
        .await;
    for i in 0..3 {
        assert_eq!(
            client.recv_raw_skip_pings().await,
            Some(format!(r#"{{"type":2,"invocationId":"1","item":{i}}}"#))
        );
    }
    assert_eq!(
        client.recv_raw_skip_pings().await.as_deref(),
        Some(r#"{"type":3,"invocationId":"1"}"#)
    );
}

#[tokio::test]
async fn cancel_stops_a_stream_with_one_completion() {
    let endpoint = demo_endpoint(options());
    let mut client = TestClient::connect(&endpoint, "a").await;

    client
        .send_json(r#"{"type":4,"invocationId":"1","target":"Forever","arguments":[]}"#)
        .await;
    assert_matches!(client.recv().await, Some(HubMessage::StreamItem(_)));
    client.send_json(r#"{"type":5,"invocationId":"1"}"#).await;

    let completion = loop {
        match client.recv().await {
            Some(HubMessage::StreamItem(item)) => assert_eq!(item.invocation_id, "1"),
            Some(HubMessage::Completion(completion)) => break completion,
            other => panic!("unexpected {other:?}"),
        }
    };
    assert_eq!(completion, CompletionMessage::empty("1"));
    assert_eq!(client.recv_within(QUIET).await, None);
}

#[tokio::test]
async fn upload_stream_is_summed() {
    let endpoint = demo_endpoint(options());
    let mut client = TestClient::connect(&endpoint, "a").await;

    client
        .send_json(r#"{"type":1,"invocationId":"1","target":"Sum","arguments":[],"streamIds":["s"]}"#)
        .await;
    for item in 1..=3 {
        client
            .send_json(&format!(r#"{{"type":2,"invocationId":"s","item":{item}}}"#))
            .await;
    }
    client.send_json(r#"{"type":3,"invocationId":"s"}"#).await;

    assert_eq!(
        client.recv().await,
        Some(HubMessage::Completion(CompletionMessage::with_result("1", json!(6))))
    );
}

#[tokio::test]
async fn wrong_stream_count_is_rejected() {
    let endpoint = demo_endpoint(options());
    let mut client = TestClient::connect(&endpoint, "a").await;

    client.send_json(&invocation("1", "Sum", json!([]))).await;
    assert_eq!(
        client.recv().await,
        Some(HubMessage::Completion(CompletionMessage::with_error(
            "1",
            "An unexpected error occurred invoking 'Sum' on the server. HubError: Client sent 0 stream(s), Hub method expects 1."
        )))
    );
}

#[tokio::test]
async fn disconnect_cancels_every_upload_stream() {
    let canceled = Arc::new(AtomicUsize::new(0));
    let endpoint = demo_builder()
        .method(hold_uploads(3, canceled.clone()))
        .build()
        .unwrap();
    let mut client = TestClient::connect(&endpoint, "a").await;

    client
        .send_json(r#"{"type":1,"invocationId":"1","target":"Hold","arguments":[],"streamIds":["x","y","z"]}"#)
        .await;
    client.send_json(&invocation("2", "Echo", json!(["sync"]))).await;
    assert_eq!(
        client.recv().await,
        Some(HubMessage::Completion(CompletionMessage::with_result("2", json!("sync"))))
    );

    assert!(client.hang_up().await.is_ok());
    assert_eq!(canceled.load(Ordering::SeqCst), 3);
}

// ── Groups and client results ───────────────────────────────────────────────

#[tokio::test]
async fn group_except_skips_excluded_member() {
    let endpoint = demo_endpoint(options());
    let mut a = TestClient::connect(&endpoint, "a").await;
    let mut b = TestClient::connect(&endpoint, "b").await;
    let mut c = TestClient::connect(&endpoint, "c").await;

    for (client, id) in [(&mut a, "a"), (&mut b, "b"), (&mut c, "c")] {
        client.send_json(&invocation(id, "JoinGroup", json!(["g"]))).await;
        assert_eq!(
            client.recv().await,
            Some(HubMessage::Completion(CompletionMessage::empty(id)))
        );
    }

    a.send_json(&invocation("1", "GroupExcept", json!(["g", "hello", ["b"]])))
        .await;

    let send = r#"{"type":1,"target":"Send","arguments":["hello"]}"#;
    assert_eq!(a.recv_raw_skip_pings().await.as_deref(), Some(send));
    assert_eq!(
        a.recv().await,
        Some(HubMessage::Completion(CompletionMessage::empty("1")))
    );
    assert_eq!(c.recv_raw_skip_pings().await.as_deref(), Some(send));
    assert_eq!(b.recv_within(QUIET).await, None);
}

#[tokio::test]
async fn groups_are_left_on_disconnect() {
    let endpoint = demo_endpoint(options());
    let mut a = TestClient::connect(&endpoint, "a").await;
    a.send_json(&invocation("1", "JoinGroup", json!(["g"]))).await;
    assert_matches!(a.recv().await, Some(HubMessage::Completion(_)));
    assert_eq!(endpoint.registry().group_members("g").len(), 1);

    assert!(a.hang_up().await.is_ok());
    assert!(endpoint.registry().group_members("g").is_empty());
    assert_eq!(endpoint.registry().group_count(), 0);
}

#[tokio::test]
async fn client_result_round_trip_and_late_duplicate() {
    let (logs, _guard) = capture_logs();
    let endpoint = demo_endpoint(HubOptions {
        max_parallel_invocations: 2,
        ..options()
    });
    let mut client = TestClient::connect(&endpoint, "a").await;

    client.send_json(&invocation("1", "AskCaller", json!(["GetValue"]))).await;
    let Some(HubMessage::Invocation(request)) = client.recv().await else {
        panic!("expected a server invocation");
    };
    assert_eq!(request.target, "GetValue");
    let server_id = request.invocation_id.unwrap();

    let answer = HubMessage::Completion(CompletionMessage::with_result(server_id.as_str(), json!(9)));
    client.send(&answer).await;
    assert_eq!(
        client.recv().await,
        Some(HubMessage::Completion(CompletionMessage::with_result("1", json!(9))))
    );

    client.send(&answer).await;
    client.send_json(&invocation("2", "Echo", json!(["after"]))).await;
    assert_eq!(
        client.recv().await,
        Some(HubMessage::Completion(CompletionMessage::with_result("2", json!("after"))))
    );
    assert!(logs.has_event(Level::WARN, "completion for unknown invocation id discarded"));
}

#[tokio::test]
async fn client_result_needs_parallel_invocations() {
    let endpoint = demo_endpoint(options());
    let mut client = TestClient::connect(&endpoint, "a").await;

    client.send_json(&invocation("1", "AskCaller", json!(["GetValue"]))).await;
    let Some(HubMessage::Completion(completion)) = client.recv().await else {
        panic!("expected completion");
    };
    assert_eq!(completion.invocation_id, "1");
    assert!(
        completion.error().unwrap().contains("maxParallelInvocations"),
        "{completion:?}"
    );
}

#[tokio::test]
async fn client_invocation_may_reuse_a_pending_result_id() {
    let endpoint = demo_endpoint(HubOptions {
        max_parallel_invocations: 3,
        ..options()
    });
    let mut client = TestClient::connect(&endpoint, "a").await;

    client.send_json(&invocation("1", "AskCaller", json!(["GetValue"]))).await;
    let Some(HubMessage::Invocation(request)) = client.recv().await else {
        panic!("expected a server invocation");
    };
    let server_id = request.invocation_id.unwrap();
    assert_ne!(server_id, "1");

    client.send_json(&invocation(&server_id, "Echo", json!(["hello"]))).await;
    assert_eq!(
        client.recv_within(Duration::from_secs(5)).await,
        Some(HubMessage::Completion(CompletionMessage::with_result(
            server_id.as_str(),
            json!("hello")
        )))
    );

    client
        .send(&HubMessage::Completion(CompletionMessage::with_result(
            server_id.as_str(),
            json!(9),
        )))
        .await;
    assert_eq!(
        client.recv().await,
        Some(HubMessage::Completion(CompletionMessage::with_result("1", json!(9))))
    );
}

#[tokio::test(start_paused = true)]
async fn canceled_client_result_tells_client_and_drops_late_reply() {
    let (logs, _guard) = capture_logs();
    let endpoint = demo_endpoint(HubOptions {
        max_parallel_invocations: 2,
        ..options()
    });
    let mut client = TestClient::connect(&endpoint, "a").await;

    client
        .send_json(&invocation("1", "AskCallerWithin", json!(["GetValue", 500])))
        .await;
    let Some(HubMessage::Invocation(request)) = client.recv().await else {
        panic!("expected a server invocation");
    };
    let server_id = request.invocation_id.unwrap();

    // No answer: the hub method's deadline cancels the request.
    assert_eq!(
        client.recv().await,
        Some(HubMessage::CancelInvocation(CancelInvocationMessage::new(
            server_id.as_str()
        )))
    );
    assert_eq!(
        client.recv().await,
        Some(HubMessage::Completion(CompletionMessage::with_result("1", json!("canceled"))))
    );

    client
        .send(&HubMessage::Completion(CompletionMessage::with_result(
            server_id.as_str(),
            json!(9),
        )))
        .await;
    client.send_json(&invocation("2", "Echo", json!(["still here"]))).await;
    assert_eq!(
        client.recv().await,
        Some(HubMessage::Completion(CompletionMessage::with_result("2", json!("still here"))))
    );
    assert!(logs.has_event(Level::WARN, "completion for unknown invocation id discarded"));
    assert!(!client.session.is_finished());
}

// ── Limits and timeouts ─────────────────────────────────────────────────────

#[tokio::test]
async fn oversized_message_closes_without_completion() {
    let endpoint = demo_endpoint(HubOptions {
        max_message_size: 50,
        ..options()
    });
    let mut client = TestClient::connect(&endpoint, "a").await;

    let record = invocation("1", "Echo", json!(["x".repeat(20)]));
    assert!(record.len() > 50);
    client.send_json(&record).await;

    assert_eq!(
        close_error(client.recv().await).as_deref(),
        Some("Connection closed with an error. MessageTooLarge: The maximum message size of 50B was exceeded.")
    );
    assert_eq!(client.recv().await, None);
    assert_matches!(
        client.finished().await,
        Err(SessionError::Protocol(ProtocolError::MessageTooLarge { limit: 50 }))
    );
}

#[tokio::test(start_paused = true)]
async fn client_timeout_waits_for_first_ping() {
    let endpoint = demo_endpoint(options());
    let mut client = TestClient::connect(&endpoint, "a").await;

    tokio::time::sleep(Duration::from_secs(120)).await;
    assert!(!client.session.is_finished());

    client.send_json(r#"{"type":6}"#).await;
    let error = close_error(client.recv().await).unwrap();
    assert!(error.contains("Timeout"), "{error}");
    assert_matches!(client.finished().await, Err(SessionError::ClientTimeout));
}

#[tokio::test(start_paused = true)]
async fn client_timeout_counts_from_last_ping() {
    let endpoint = demo_endpoint(HubOptions {
        client_timeout_interval_ms: 2_000,
        ..options()
    });
    let timeout = Duration::from_secs(2);
    let mut client = TestClient::connect(&endpoint, "a").await;

    client.send_json(r#"{"type":6}"#).await;
    for _ in 0..6 {
        tokio::time::sleep(timeout / 2).await;
        client.send_json(r#"{"type":6}"#).await;
    }
    assert!(!client.session.is_finished());

    // Quiet until just before the deadline, closed right after it.
    let early = Duration::from_millis(100);
    assert_eq!(client.recv_within(timeout - early).await, None);
    assert!(!client.session.is_finished());

    let error = close_error(client.recv_within(early * 2).await).unwrap();
    assert_eq!(
        error,
        "Connection closed with an error. Timeout: Client hasn't sent a message/ping within the configured client timeout interval."
    );
    assert_matches!(client.finished().await, Err(SessionError::ClientTimeout));
}

#[tokio::test(start_paused = true)]
async fn idle_connection_receives_keep_alive_pings() {
    let endpoint = demo_endpoint(options());
    let mut client = TestClient::connect(&endpoint, "a").await;

    assert_eq!(client.recv_raw().await.as_deref(), Some(r#"{"type":6}"#));
}

// ── Handshake ───────────────────────────────────────────────────────────────

#[tokio::test]
async fn unsupported_protocol_is_rejected() {
    let endpoint = demo_endpoint(options());
    let mut client = TestClient::open(&endpoint, "a");

    client
        .send_raw(b"{\"protocol\":\"msgpack\",\"version\":1}\x1e")
        .await;
    assert_eq!(
        client.recv_raw().await.as_deref(),
        Some(r#"{"error":"The protocol 'msgpack' is not supported."}"#)
    );
    assert_matches!(client.finished().await, Err(SessionError::Handshake(_)));
    assert_eq!(endpoint.registry().connection_count(), 0);
}

#[tokio::test]
async fn hang_up_before_handshake_is_clean() {
    let endpoint = demo_endpoint(options());
    let client = TestClient::open(&endpoint, "a");
    assert!(client.hang_up().await.is_ok());
}

#[test]
fn handshake_survives_any_chunking() {
    use proptest::prelude::*;

    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .unwrap();
    let mut bytes = common::HANDSHAKE.to_vec();
    bytes.extend_from_slice(invocation("1", "Echo", json!([7])).as_bytes());
    bytes.push(0x1e);
    let total = bytes.len();

    proptest!(ProptestConfig::with_cases(32), |(mut cuts in proptest::collection::vec(1..total, 0..6))| {
        cuts.sort_unstable();
        cuts.dedup();
        let bytes = bytes.clone();
        runtime.block_on(async move {
            let endpoint = demo_endpoint(options());
            let mut client = TestClient::open(&endpoint, "a");
            let mut start = 0;
            for cut in cuts.into_iter().chain([total]) {
                client.send_raw(&bytes[start..cut]).await;
                start = cut;
            }
            assert_eq!(client.recv_raw().await.as_deref(), Some("{}"));
            assert_eq!(
                client.recv().await,
                Some(HubMessage::Completion(CompletionMessage::with_result("1", json!(7))))
            );
        });
    });
}

// ── Registry ────────────────────────────────────────────────────────────────

#[tokio::test]
async fn duplicate_connection_id_is_refused() {
    let endpoint = demo_endpoint(options());
    let _first = TestClient::connect(&endpoint, "dup").await;
    let mut second = TestClient::connect(&endpoint, "dup").await;

    let error = close_error(second.recv().await).unwrap();
    assert!(error.contains("already registered"), "{error}");
    assert_matches!(second.finished().await, Err(SessionError::Registry(_)));
    assert_eq!(endpoint.registry().connection_count(), 1);
}

#[tokio::test]
async fn shutdown_closes_live_connections() {
    let endpoint = demo_endpoint(options());
    let mut client = TestClient::connect(&endpoint, "a").await;

    endpoint.shutdown_token().cancel();
    assert_eq!(close_error(client.recv().await), None);
    assert!(client.finished().await.is_ok());
}

// ── Lifecycle and filters ───────────────────────────────────────────────────

#[derive(Default)]
struct Recorder {
    connected: AtomicUsize,
    disconnect_error: Mutex<Option<Option<String>>>,
    refuse: Option<MethodError>,
}

struct Hooks(Arc<Recorder>);

#[async_trait]
impl HubLifecycle for Hooks {
    async fn on_connected(&self, _ctx: &CallerContext) -> Result<(), MethodError> {
        let _ = self.0.connected.fetch_add(1, Ordering::SeqCst);
        match &self.0.refuse {
            Some(MethodError::Hub(message)) => Err(MethodError::hub(message.clone())),
            Some(err) => Err(MethodError::failure(err.kind(), err.to_string())),
            None => Ok(()),
        }
    }

    async fn on_disconnected(
        &self,
        _ctx: &CallerContext,
        error: Option<&SessionError>,
    ) -> Result<(), MethodError> {
        *self.0.disconnect_error.lock() = Some(error.map(ToString::to_string));
        Ok(())
    }
}

#[tokio::test]
async fn lifecycle_hooks_see_the_closing_error() {
    let recorder = Arc::new(Recorder::default());
    let endpoint = demo_builder()
        .options(HubOptions {
            max_message_size: 50,
            ..options()
        })
        .lifecycle(Hooks(recorder.clone()))
        .build()
        .unwrap();
    let mut client = TestClient::connect(&endpoint, "a").await;
    client
        .send_json(&invocation("1", "Echo", json!(["y".repeat(64)])))
        .await;
    let _ = client.recv().await;
    let _ = client.finished().await;

    assert_eq!(recorder.connected.load(Ordering::SeqCst), 1);
    assert_eq!(
        recorder.disconnect_error.lock().clone(),
        Some(Some("The maximum message size of 50B was exceeded.".to_owned()))
    );
}

#[tokio::test]
async fn failed_connect_hook_closes_with_generic_error() {
    let recorder = Arc::new(Recorder {
        refuse: Some(MethodError::failure("Unauthorized", "no token")),
        ..Recorder::default()
    });
    let endpoint = demo_builder().lifecycle(Hooks(recorder.clone())).build().unwrap();
    let mut client = TestClient::connect(&endpoint, "a").await;

    assert_eq!(
        close_error(client.recv().await).as_deref(),
        Some("Connection closed with an error.")
    );
    assert_matches!(client.finished().await, Err(SessionError::Connect(_)));
    assert_eq!(endpoint.registry().connection_count(), 0);
}

#[tokio::test]
async fn failed_connect_hook_with_hub_error_is_shown() {
    let recorder = Arc::new(Recorder {
        refuse: Some(MethodError::hub("banned")),
        ..Recorder::default()
    });
    let endpoint = demo_builder().lifecycle(Hooks(recorder)).build().unwrap();
    let mut client = TestClient::connect(&endpoint, "a").await;

    assert_eq!(
        close_error(client.recv().await).as_deref(),
        Some("Connection closed with an error. HubError: banned")
    );
}

struct Gate {
    blocked: &'static str,
    disposed: Arc<AtomicUsize>,
}

#[async_trait]
impl HubFilter for Gate {
    async fn invoke(&self, call: HubCall, next: InvokeNext<'_>) -> Result<MethodOutput, MethodError> {
        if call.method == self.blocked {
            return Err(MethodError::hub("blocked"));
        }
        next.run(call).await
    }

    async fn on_dispose(&self) {
        let _ = self.disposed.fetch_add(1, Ordering::SeqCst);
    }
}

#[tokio::test]
async fn filter_short_circuits_and_is_disposed() {
    let disposed = Arc::new(AtomicUsize::new(0));
    let endpoint = demo_builder()
        .filter(Gate {
            blocked: "Add",
            disposed: disposed.clone(),
        })
        .build()
        .unwrap();
    let mut client = TestClient::connect(&endpoint, "a").await;

    client.send_json(&invocation("1", "Add", json!([1, 2]))).await;
    client.send_json(&invocation("2", "Echo", json!(["ok"]))).await;
    assert_eq!(
        client.recv().await,
        Some(HubMessage::Completion(CompletionMessage::with_error(
            "1",
            "An unexpected error occurred invoking 'Add' on the server. HubError: blocked"
        )))
    );
    assert_eq!(
        client.recv().await.map(|m| match m {
            HubMessage::Completion(c) => c.outcome,
            other => panic!("unexpected {other:?}"),
        }),
        Some(Completion::Result(json!("ok")))
    );

    assert!(client.hang_up().await.is_ok());
    assert_eq!(disposed.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn endpoint_is_usable_from_outside_a_hub_method() {
    let endpoint: HubEndpoint = demo_endpoint(options());
    let mut client = TestClient::connect(&endpoint, "a").await;

    endpoint
        .context()
        .clients()
        .all()
        .send("Notify", vec![json!(1)], &tokio_util::sync::CancellationToken::new())
        .await
        .unwrap();
    assert_eq!(
        client.recv_raw_skip_pings().await.as_deref(),
        Some(r#"{"type":1,"target":"Notify","arguments":[1]}"#)
    );
}
