//! What a hub method sees: the caller and the invocation itself.

use std::sync::Arc;

use serde::de::DeserializeOwned;
use serde_json::Value;
use switchboard_core::{ConnectionId, UserId};
use tokio_util::sync::CancellationToken;

use crate::connection::ConnectionHandle;
use crate::errors::MethodError;
use crate::hub::clients::{CallerClients, GroupManager};
use crate::registry::LifetimeRegistry;
use crate::session::uploads::UploadStream;

/// The calling connection, plus access to the rest of the hub.
#[derive(Clone, Debug)]
pub struct CallerContext {
    connection: Arc<ConnectionHandle>,
    registry: Arc<LifetimeRegistry>,
    client_results: bool,
}

impl CallerContext {
    pub(crate) fn new(
        connection: Arc<ConnectionHandle>,
        registry: Arc<LifetimeRegistry>,
        client_results: bool,
    ) -> Self {
        Self {
            connection,
            registry,
            client_results,
        }
    }

    /// Caller's connection id.
    pub fn connection_id(&self) -> &ConnectionId {
        self.connection.id()
    }

    /// Caller's user, if authenticated.
    pub fn user_id(&self) -> Option<&UserId> {
        self.connection.user_id()
    }

    /// Caller's connection handle.
    pub fn connection(&self) -> &Arc<ConnectionHandle> {
        &self.connection
    }

    /// Read a connection metadata item.
    pub fn item(&self, key: &str) -> Option<Value> {
        self.connection.item(key)
    }

    /// Set a connection metadata item.
    pub fn set_item(&self, key: impl Into<String>, value: Value) -> Option<Value> {
        self.connection.set_item(key, value)
    }

    /// Client proxies relative to the caller.
    pub fn clients(&self) -> CallerClients {
        CallerClients::new(
            self.registry.clone(),
            self.connection.id().clone(),
            self.client_results,
        )
    }

    /// Group membership.
    pub fn groups(&self) -> GroupManager {
        GroupManager::new(self.registry.clone())
    }

    /// Close the caller's connection.
    pub fn abort(&self) {
        self.connection.abort();
    }

    /// The hub's lifetime registry.
    pub fn registry(&self) -> &Arc<LifetimeRegistry> {
        &self.registry
    }
}

/// One invocation of a hub method.
#[derive(Debug)]
pub struct HubCall {
    /// Target name as the client sent it.
    pub method: String,
    /// Correlation id, absent for fire-and-forget calls.
    pub invocation_id: Option<String>,
    /// Positional arguments, already checked against the declaration.
    pub arguments: Vec<Value>,
    /// Client upload streams, in the order the client listed them.
    pub streams: Vec<UploadStream>,
    /// Fires when the client cancels or the connection closes.
    pub cancel: CancellationToken,
    /// The calling connection.
    pub caller: CallerContext,
}

impl HubCall {
    /// Deserialize argument `index`.
    pub fn arg<T: DeserializeOwned>(&self, index: usize) -> Result<T, MethodError> {
        let value = self.arguments.get(index).ok_or_else(|| {
            MethodError::failure("InvalidData", format!("Missing argument {index}."))
        })?;
        T::deserialize(value)
            .map_err(|e| MethodError::failure("InvalidData", format!("Argument {index}: {e}")))
    }

    /// Take ownership of the upload streams.
    pub fn take_streams(&mut self) -> Vec<UploadStream> {
        std::mem::take(&mut self.streams)
    }
}
