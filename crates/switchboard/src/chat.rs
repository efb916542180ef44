//! Demo chat hub served by the binary.
//!
//! Clients receive `ReceiveMessage(user, text)` broadcasts and may join
//! rooms (groups), stream a countdown, or upload numbers to be summed.

use std::time::Duration;

use async_trait::async_trait;
use serde_json::{Value, json};
use switchboard_server::hub::{
    CallerContext, HubCall, HubLifecycle, MethodDescriptor, MethodOutput, ParamType,
};
use switchboard_server::{HubEndpointBuilder, MethodError, SessionError};
use tracing::info;

/// Client method every chat message is delivered to.
pub const RECEIVE: &str = "ReceiveMessage";

fn sender(call: &HubCall) -> String {
    call.caller
        .user_id()
        .map_or_else(|| call.caller.connection_id().to_string(), ToString::to_string)
}

async fn send(call: HubCall) -> Result<MethodOutput, MethodError> {
    let text: String = call.arg(0)?;
    let from = sender(&call);
    call.caller
        .clients()
        .all()
        .send(RECEIVE, vec![json!(from), json!(text)], &call.cancel)
        .await?;
    Ok(MethodOutput::Unit)
}

async fn join(call: HubCall) -> Result<MethodOutput, MethodError> {
    let room: String = call.arg(0)?;
    call.caller.groups().add_to_group(call.caller.connection_id(), &room);
    let notice = format!("{} joined {room}", sender(&call));
    call.caller
        .clients()
        .others_in_group(room)
        .send(RECEIVE, vec![json!("system"), json!(notice)], &call.cancel)
        .await?;
    Ok(MethodOutput::Unit)
}

async fn leave(call: HubCall) -> Result<MethodOutput, MethodError> {
    let room: String = call.arg(0)?;
    call.caller
        .groups()
        .remove_from_group(call.caller.connection_id(), &room);
    Ok(MethodOutput::Unit)
}

async fn send_to_room(call: HubCall) -> Result<MethodOutput, MethodError> {
    let room: String = call.arg(0)?;
    let text: String = call.arg(1)?;
    let from = sender(&call);
    call.caller
        .clients()
        .group(room)
        .send(RECEIVE, vec![json!(from), json!(text)], &call.cancel)
        .await?;
    Ok(MethodOutput::Unit)
}

async fn countdown(call: HubCall) -> Result<MethodOutput, MethodError> {
    let from: u64 = call.arg(0)?;
    let delay = Duration::from_millis(call.arg(1)?);
    let ticks = async_stream::stream! {
        for n in (0..=from).rev() {
            yield Ok(json!(n));
            if n > 0 {
                tokio::time::sleep(delay).await;
            }
        }
    };
    Ok(MethodOutput::stream(ticks))
}

async fn sum(mut call: HubCall) -> Result<MethodOutput, MethodError> {
    let mut total = 0.0;
    if let Some(mut numbers) = call.take_streams().into_iter().next() {
        while let Some(item) = numbers.recv().await {
            let item = item?;
            let Some(n) = item.as_f64() else {
                return Err(MethodError::hub(format!("Expected a number, got {item}.")));
            };
            total += n;
        }
    }
    MethodOutput::value(total)
}

async fn ask_name(call: HubCall) -> Result<MethodOutput, MethodError> {
    let answer = call
        .caller
        .clients()
        .caller()
        .invoke("GetName", vec![], &call.cancel)
        .await?;
    match answer {
        Value::String(name) => {
            let _ = call.caller.set_item("name", json!(name));
            Ok(MethodOutput::Value(json!(name)))
        }
        other => Err(MethodError::hub(format!("Expected a name, got {other}."))),
    }
}

async fn online(call: HubCall) -> Result<MethodOutput, MethodError> {
    MethodOutput::value(call.caller.registry().connection_count())
}

/// Announces arrivals and departures to everyone else.
pub struct Presence;

#[async_trait]
impl HubLifecycle for Presence {
    async fn on_connected(&self, ctx: &CallerContext) -> Result<(), MethodError> {
        info!(connection_id = %ctx.connection_id(), "chat member joined");
        let notice = format!("{} connected", ctx.connection_id());
        ctx.clients()
            .others()
            .send(RECEIVE, vec![json!("system"), json!(notice)], &Default::default())
            .await?;
        Ok(())
    }

    async fn on_disconnected(
        &self,
        ctx: &CallerContext,
        error: Option<&SessionError>,
    ) -> Result<(), MethodError> {
        info!(connection_id = %ctx.connection_id(), error = ?error.map(ToString::to_string), "chat member left");
        let notice = format!("{} disconnected", ctx.connection_id());
        ctx.clients()
            .others()
            .send(RECEIVE, vec![json!("system"), json!(notice)], &Default::default())
            .await?;
        Ok(())
    }
}

/// Register the chat methods and presence hooks on `builder`.
pub fn register(builder: HubEndpointBuilder) -> HubEndpointBuilder {
    builder
        .method(MethodDescriptor::new("Send", send).params([ParamType::String]))
        .method(MethodDescriptor::new("JoinRoom", join).params([ParamType::String]))
        .method(MethodDescriptor::new("LeaveRoom", leave).params([ParamType::String]))
        .method(
            MethodDescriptor::new("SendToRoom", send_to_room)
                .params([ParamType::String, ParamType::String]),
        )
        .method(
            MethodDescriptor::streaming("Countdown", countdown)
                .params([ParamType::Integer, ParamType::Integer]),
        )
        .method(MethodDescriptor::new("Sum", sum).upload_streams(1))
        .method(MethodDescriptor::new("AskName", ask_name))
        .method(MethodDescriptor::new("Online", online))
        .lifecycle(Presence)
}

#[cfg(test)]
mod tests {
    use super::*;
    use switchboard_server::{ConnectionInfo, HubEndpoint};
    use tokio::io::{AsyncReadExt, AsyncWriteExt, DuplexStream};

    async fn record(io: &mut DuplexStream) -> String {
        let mut bytes = Vec::new();
        loop {
            let byte = io.read_u8().await.unwrap();
            if byte == 0x1e {
                return String::from_utf8(bytes).unwrap();
            }
            bytes.push(byte);
        }
    }

    async fn connect(endpoint: &HubEndpoint, id: &str) -> DuplexStream {
        let (mut client, server) = tokio::io::duplex(4096);
        let endpoint = endpoint.clone();
        let info = ConnectionInfo {
            id: Some(id.into()),
            ..ConnectionInfo::default()
        };
        let _ = tokio::spawn(async move { endpoint.serve(server, info).await });
        client
            .write_all(b"{\"protocol\":\"json\",\"version\":1}\x1e")
            .await
            .unwrap();
        assert_eq!(record(&mut client).await, "{}");
        client
    }

    #[test]
    fn chat_hub_builds() {
        let endpoint = register(HubEndpoint::builder()).build().unwrap();
        assert_eq!(endpoint.protocols(), vec!["json", "messagepack"]);
    }

    #[tokio::test]
    async fn send_reaches_everyone() {
        let endpoint = register(HubEndpoint::builder()).build().unwrap();
        let mut alice = connect(&endpoint, "alice").await;
        let mut bob = connect(&endpoint, "bob").await;
        assert_eq!(
            record(&mut alice).await,
            r#"{"type":1,"target":"ReceiveMessage","arguments":["system","bob connected"]}"#
        );

        bob.write_all(b"{\"type\":1,\"invocationId\":\"1\",\"target\":\"send\",\"arguments\":[\"hi\"]}\x1e")
            .await
            .unwrap();
        let expected = r#"{"type":1,"target":"ReceiveMessage","arguments":["bob","hi"]}"#;
        assert_eq!(record(&mut alice).await, expected);
        assert_eq!(record(&mut bob).await, expected);
        assert_eq!(record(&mut bob).await, r#"{"type":3,"invocationId":"1"}"#);
    }

    #[tokio::test]
    async fn sum_rejects_non_numeric_items() {
        let endpoint = register(HubEndpoint::builder()).build().unwrap();
        let mut client = connect(&endpoint, "c").await;
        client
            .write_all(b"{\"type\":1,\"invocationId\":\"1\",\"target\":\"Sum\",\"arguments\":[],\"streamIds\":[\"n\"]}\x1e")
            .await
            .unwrap();
        client
            .write_all(b"{\"type\":2,\"invocationId\":\"n\",\"item\":2}\x1e{\"type\":2,\"invocationId\":\"n\",\"item\":\"x\"}\x1e")
            .await
            .unwrap();
        assert_eq!(
            record(&mut client).await,
            r#"{"type":3,"invocationId":"1","error":"An unexpected error occurred invoking 'Sum' on the server. HubError: Expected a number, got \"x\"."}"#
        );
    }

    #[tokio::test]
    async fn countdown_streams_to_zero() {
        let endpoint = register(HubEndpoint::builder()).build().unwrap();
        let mut client = connect(&endpoint, "c").await;
        client
            .write_all(b"{\"type\":4,\"invocationId\":\"7\",\"target\":\"Countdown\",\"arguments\":[2,0]}\x1e")
            .await
            .unwrap();
        for n in [2, 1, 0] {
            assert_eq!(
                record(&mut client).await,
                format!(r#"{{"type":2,"invocationId":"7","item":{n}}}"#)
            );
        }
        assert_eq!(record(&mut client).await, r#"{"type":3,"invocationId":"7"}"#);
    }
}
