//! Shared helpers for end-to-end session tests.
//!
//! A [`TestClient`] speaks the JSON protocol over one end of an in-memory
//! duplex pipe while the hub serves the other end.

#![allow(dead_code)]

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use futures::StreamExt;
use serde_json::{Value, json};
use switchboard_core::protocol::{
    Framing, HubCodec, HubMessage, JsonCodec, RECORD_SEPARATOR,
};
use switchboard_core::{ConnectionId, FrameCodec};
use switchboard_server::hub::{HubCall, MethodDescriptor, MethodOutput, ParamType};
use switchboard_server::{
    ClientResultError, ConnectionInfo, HubEndpoint, MethodError, SessionError, StreamError,
};
use tokio::io::{AsyncWriteExt, DuplexStream, ReadHalf, WriteHalf, duplex};
use tokio::task::JoinHandle;
use tokio_util::codec::FramedRead;

pub const HANDSHAKE: &[u8] = b"{\"protocol\":\"json\",\"version\":1}\x1e";

/// JSON-protocol client on an in-memory transport.
pub struct TestClient {
    reader: FramedRead<ReadHalf<DuplexStream>, FrameCodec>,
    writer: WriteHalf<DuplexStream>,
    pub session: JoinHandle<Result<(), SessionError>>,
}

impl TestClient {
    /// Open a transport without handshaking.
    pub fn open(endpoint: &HubEndpoint, id: &str) -> Self {
        let (client, server) = duplex(64 * 1024);
        let endpoint = endpoint.clone();
        let info = ConnectionInfo {
            id: Some(ConnectionId::from(id)),
            ..ConnectionInfo::default()
        };
        let session = tokio::spawn(async move { endpoint.serve(server, info).await });
        let (read, writer) = tokio::io::split(client);
        let framing = Framing::Delimited(RECORD_SEPARATOR);
        Self {
            reader: FramedRead::new(read, FrameCodec::new(framing, None)),
            writer,
            session,
        }
    }

    /// Open a transport and complete the JSON handshake.
    pub async fn connect(endpoint: &HubEndpoint, id: &str) -> Self {
        let mut client = Self::open(endpoint, id);
        client.send_raw(HANDSHAKE).await;
        assert_eq!(client.recv_raw().await.as_deref(), Some("{}"));
        client
    }

    pub async fn send_raw(&mut self, bytes: &[u8]) {
        self.writer.write_all(bytes).await.unwrap();
        self.writer.flush().await.unwrap();
    }

    /// Send one JSON record (the separator is appended).
    pub async fn send_json(&mut self, record: &str) {
        let mut bytes = record.as_bytes().to_vec();
        bytes.push(RECORD_SEPARATOR);
        self.send_raw(&bytes).await;
    }

    pub async fn send(&mut self, message: &HubMessage) {
        let mut bytes = JsonCodec::new().encode(message).unwrap();
        bytes.push(RECORD_SEPARATOR);
        self.send_raw(&bytes).await;
    }

    /// Next raw record, or `None` at EOF.
    pub async fn recv_raw(&mut self) -> Option<String> {
        let frame = self.reader.next().await?.unwrap();
        Some(String::from_utf8(frame.to_vec()).unwrap())
    }

    /// Next raw record that is not a `Ping`.
    pub async fn recv_raw_skip_pings(&mut self) -> Option<String> {
        loop {
            let raw = self.recv_raw().await?;
            if raw != r#"{"type":6}"# {
                return Some(raw);
            }
        }
    }

    /// Next message that is not a `Ping`.
    pub async fn recv(&mut self) -> Option<HubMessage> {
        let raw = self.recv_raw_skip_pings().await?;
        JsonCodec::new().decode(raw.as_bytes()).unwrap()
    }

    /// Wait (up to `within`) for a non-ping message.
    pub async fn recv_within(&mut self, within: Duration) -> Option<HubMessage> {
        tokio::time::timeout(within, self.recv()).await.ok().flatten()
    }

    /// Close the client side of the transport.
    pub async fn hang_up(mut self) -> Result<(), SessionError> {
        self.writer.shutdown().await.unwrap();
        drop(self.writer);
        drop(self.reader);
        self.session.await.unwrap()
    }

    /// Wait for the session to end.
    pub async fn finished(self) -> Result<(), SessionError> {
        self.session.await.unwrap()
    }
}

pub fn invocation(id: &str, target: &str, args: Value) -> String {
    json!({"type": 1, "invocationId": id, "target": target, "arguments": args}).to_string()
}

// ── Demo hub methods ────────────────────────────────────────────────────────

pub async fn echo(call: HubCall) -> Result<MethodOutput, MethodError> {
    Ok(MethodOutput::Value(call.arguments[0].clone()))
}

pub async fn add(call: HubCall) -> Result<MethodOutput, MethodError> {
    let a: i64 = call.arg(0)?;
    let b: i64 = call.arg(1)?;
    MethodOutput::value(a + b)
}

pub async fn fail(_call: HubCall) -> Result<MethodOutput, MethodError> {
    Err(MethodError::failure("InvalidOperation", "boom"))
}

pub async fn reject(_call: HubCall) -> Result<MethodOutput, MethodError> {
    Err(MethodError::hub("not allowed"))
}

pub async fn nothing(_call: HubCall) -> Result<MethodOutput, MethodError> {
    Ok(MethodOutput::Unit)
}

pub async fn join_group(call: HubCall) -> Result<MethodOutput, MethodError> {
    let group: String = call.arg(0)?;
    call.caller.groups().add_to_group(call.caller.connection_id(), &group);
    Ok(MethodOutput::Unit)
}

pub async fn group_except(call: HubCall) -> Result<MethodOutput, MethodError> {
    let group: String = call.arg(0)?;
    let excluded: Vec<String> = call.arg(2)?;
    let excluded = excluded.into_iter().map(ConnectionId::from).collect();
    call.caller
        .clients()
        .group_except(group, excluded)
        .send("Send", vec![call.arguments[1].clone()], &call.cancel)
        .await?;
    Ok(MethodOutput::Unit)
}

pub async fn ask_caller(call: HubCall) -> Result<MethodOutput, MethodError> {
    let method: String = call.arg(0)?;
    let value = call
        .caller
        .clients()
        .caller()
        .invoke(&method, vec![], &call.cancel)
        .await?;
    Ok(MethodOutput::Value(value))
}

/// Asks the caller for a value but gives up after `arguments[1]`
/// milliseconds, answering `"canceled"` in that case.
pub async fn ask_caller_within(call: HubCall) -> Result<MethodOutput, MethodError> {
    let method: String = call.arg(0)?;
    let wait = Duration::from_millis(call.arg(1)?);
    let deadline = call.cancel.child_token();
    let timer = deadline.clone();
    let _ = tokio::spawn(async move {
        tokio::time::sleep(wait).await;
        timer.cancel();
    });
    let answer = call
        .caller
        .clients()
        .caller()
        .invoke(&method, vec![], &deadline)
        .await;
    match answer {
        Ok(value) => Ok(MethodOutput::Value(value)),
        Err(ClientResultError::Canceled) => MethodOutput::value("canceled"),
        Err(err) => Err(err.into()),
    }
}

pub async fn counter(call: HubCall) -> Result<MethodOutput, MethodError> {
    let count: u64 = call.arg(0)?;
    Ok(MethodOutput::stream(futures::stream::iter(
        (0..count).map(|i| Ok(json!(i))),
    )))
}

pub async fn forever(_call: HubCall) -> Result<MethodOutput, MethodError> {
    let ticks = async_stream::stream! {
        let mut i = 0_u64;
        loop {
            yield Ok(json!(i));
            i += 1;
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    };
    Ok(MethodOutput::stream(ticks))
}

pub async fn sum(mut call: HubCall) -> Result<MethodOutput, MethodError> {
    let stream = call.take_streams().remove(0);
    let values = stream.collect_values().await?;
    let total: i64 = values.iter().filter_map(Value::as_i64).sum();
    MethodOutput::value(total)
}

/// Endpoint exposing the demo methods.
pub fn demo_endpoint(options: switchboard_settings::HubOptions) -> HubEndpoint {
    demo_builder().options(options).build().unwrap()
}

pub fn demo_builder() -> switchboard_server::HubEndpointBuilder {
    HubEndpoint::builder()
        .method(MethodDescriptor::new("Echo", echo).params([ParamType::Any]))
        .method(MethodDescriptor::new("Add", add).params([ParamType::Integer, ParamType::Integer]))
        .method(MethodDescriptor::new("Fail", fail))
        .method(MethodDescriptor::new("Reject", reject))
        .method(MethodDescriptor::new("Nothing", nothing))
        .method(MethodDescriptor::new("JoinGroup", join_group).params([ParamType::String]))
        .method(
            MethodDescriptor::new("GroupExcept", group_except).params([
                ParamType::String,
                ParamType::Any,
                ParamType::Array,
            ]),
        )
        .method(MethodDescriptor::new("AskCaller", ask_caller).params([ParamType::String]))
        .method(
            MethodDescriptor::new("AskCallerWithin", ask_caller_within)
                .params([ParamType::String, ParamType::Integer]),
        )
        .method(MethodDescriptor::streaming("Counter", counter).params([ParamType::Integer]))
        .method(MethodDescriptor::streaming("Forever", forever))
        .method(MethodDescriptor::new("Sum", sum).upload_streams(1))
}

/// Hub method that holds `streams` uploads open and counts how many end
/// with a cancellation signal.
pub fn hold_uploads(streams: usize, canceled: Arc<AtomicUsize>) -> MethodDescriptor {
    let body = move |mut call: HubCall| {
        let canceled = canceled.clone();
        async move {
            let waits = call.take_streams().into_iter().map(|mut stream| {
                let canceled = canceled.clone();
                async move {
                    while let Some(item) = stream.recv().await {
                        if let Err(StreamError::Canceled) = item {
                            let _ = canceled.fetch_add(1, Ordering::SeqCst);
                        }
                    }
                }
            });
            let _ = futures::future::join_all(waits).await;
            Ok(MethodOutput::Unit)
        }
    };
    MethodDescriptor::new("Hold", body).upload_streams(streams)
}
