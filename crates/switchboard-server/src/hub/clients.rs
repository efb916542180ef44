//! Client proxies: typed handles for sending to sets of connections.

use std::ops::Deref;
use std::sync::Arc;

use serde_json::Value;
use switchboard_core::{ConnectionId, UserId};
use tokio_util::sync::CancellationToken;

use crate::errors::{ClientResultError, SendError};
use crate::registry::{LifetimeRegistry, Target};

/// Sends to every connection a [`Target`] resolves to.
#[derive(Clone, Debug)]
pub struct ClientProxy {
    registry: Arc<LifetimeRegistry>,
    target: Target,
}

impl ClientProxy {
    /// Recipients of this proxy.
    pub fn target(&self) -> &Target {
        &self.target
    }

    /// Invoke `method` on every recipient without awaiting results.
    pub async fn send(
        &self,
        method: &str,
        arguments: Vec<Value>,
        cancel: &CancellationToken,
    ) -> Result<(), SendError> {
        self.registry.send(&self.target, method, arguments, cancel).await
    }
}

/// Proxy for exactly one connection, able to await client results.
#[derive(Clone, Debug)]
pub struct SingleClientProxy {
    registry: Arc<LifetimeRegistry>,
    connection_id: ConnectionId,
    client_results: bool,
}

impl SingleClientProxy {
    /// Connection this proxy targets.
    pub fn connection_id(&self) -> &ConnectionId {
        &self.connection_id
    }

    /// Invoke `method` without awaiting a result.
    pub async fn send(
        &self,
        method: &str,
        arguments: Vec<Value>,
        cancel: &CancellationToken,
    ) -> Result<(), SendError> {
        self.registry
            .send_connection(&self.connection_id, method, arguments, cancel)
            .await
    }

    /// Invoke `method` and await the value the client returns.
    pub async fn invoke(
        &self,
        method: &str,
        arguments: Vec<Value>,
        cancel: &CancellationToken,
    ) -> Result<Value, ClientResultError> {
        if !self.client_results {
            return Err(ClientResultError::ParallelismRequired);
        }
        self.registry
            .invoke_connection(&self.connection_id, method, arguments, cancel)
            .await
    }
}

/// Entry point for targeting connections from anywhere in the process.
#[derive(Clone, Debug)]
pub struct HubClients {
    registry: Arc<LifetimeRegistry>,
}

impl HubClients {
    pub(crate) fn new(registry: Arc<LifetimeRegistry>) -> Self {
        Self { registry }
    }

    fn proxy(&self, target: Target) -> ClientProxy {
        ClientProxy {
            registry: self.registry.clone(),
            target,
        }
    }

    /// Every connection.
    pub fn all(&self) -> ClientProxy {
        self.proxy(Target::All)
    }

    /// Every connection except `excluded`.
    pub fn all_except(&self, excluded: Vec<ConnectionId>) -> ClientProxy {
        self.proxy(Target::AllExcept(excluded))
    }

    /// One connection.
    pub fn client(&self, id: ConnectionId) -> SingleClientProxy {
        SingleClientProxy {
            registry: self.registry.clone(),
            connection_id: id,
            client_results: true,
        }
    }

    /// Several connections.
    pub fn clients(&self, ids: Vec<ConnectionId>) -> ClientProxy {
        self.proxy(Target::Connections(ids))
    }

    /// Members of a group.
    pub fn group(&self, name: impl Into<String>) -> ClientProxy {
        self.proxy(Target::Group(name.into()))
    }

    /// Members of any of the groups.
    pub fn groups(&self, names: Vec<String>) -> ClientProxy {
        self.proxy(Target::Groups(names))
    }

    /// Members of a group except `excluded`.
    pub fn group_except(&self, name: impl Into<String>, excluded: Vec<ConnectionId>) -> ClientProxy {
        self.proxy(Target::GroupExcept(name.into(), excluded))
    }

    /// Connections of a user.
    pub fn user(&self, user: UserId) -> ClientProxy {
        self.proxy(Target::User(user))
    }

    /// Connections of any of the users.
    pub fn users(&self, users: Vec<UserId>) -> ClientProxy {
        self.proxy(Target::Users(users))
    }
}

/// [`HubClients`] seen from inside a hub method, adding caller-relative
/// targets.
///
/// Awaiting a result from the caller blocks the caller's read loop unless
/// the connection may run more than one invocation at a time, so those
/// calls fail with [`ClientResultError::ParallelismRequired`] otherwise.
#[derive(Clone, Debug)]
pub struct CallerClients {
    clients: HubClients,
    caller: ConnectionId,
    client_results: bool,
}

impl CallerClients {
    pub(crate) fn new(registry: Arc<LifetimeRegistry>, caller: ConnectionId, client_results: bool) -> Self {
        Self {
            clients: HubClients::new(registry),
            caller,
            client_results,
        }
    }

    /// The calling connection.
    pub fn caller(&self) -> SingleClientProxy {
        self.client(self.caller.clone())
    }

    /// One connection. Targeting the caller is subject to the same
    /// restriction as [`caller`](Self::caller).
    pub fn client(&self, id: ConnectionId) -> SingleClientProxy {
        let client_results = self.client_results || id != self.caller;
        SingleClientProxy {
            client_results,
            ..self.clients.client(id)
        }
    }

    /// Every connection except the caller.
    pub fn others(&self) -> ClientProxy {
        self.clients.all_except(vec![self.caller.clone()])
    }

    /// Members of a group except the caller.
    pub fn others_in_group(&self, name: impl Into<String>) -> ClientProxy {
        self.clients.group_except(name, vec![self.caller.clone()])
    }
}

impl Deref for CallerClients {
    type Target = HubClients;

    fn deref(&self) -> &HubClients {
        &self.clients
    }
}

/// Adds and removes connections from groups.
#[derive(Clone, Debug)]
pub struct GroupManager {
    registry: Arc<LifetimeRegistry>,
}

impl GroupManager {
    pub(crate) fn new(registry: Arc<LifetimeRegistry>) -> Self {
        Self { registry }
    }

    /// Add a connection to a group. Idempotent.
    pub fn add_to_group(&self, id: &ConnectionId, group: &str) {
        self.registry.add_to_group(id, group);
    }

    /// Remove a connection from a group. Idempotent.
    pub fn remove_from_group(&self, id: &ConnectionId, group: &str) {
        self.registry.remove_from_group(id, group);
    }
}

/// Hub access for code running outside a hub method.
#[derive(Clone, Debug)]
pub struct HubContext {
    registry: Arc<LifetimeRegistry>,
}

impl HubContext {
    pub(crate) fn new(registry: Arc<LifetimeRegistry>) -> Self {
        Self { registry }
    }

    /// Client proxies.
    pub fn clients(&self) -> HubClients {
        HubClients::new(self.registry.clone())
    }

    /// Group membership.
    pub fn groups(&self) -> GroupManager {
        GroupManager::new(self.registry.clone())
    }

    /// The underlying registry.
    pub fn registry(&self) -> &Arc<LifetimeRegistry> {
        &self.registry
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connection::tests::make_handle;
    use assert_matches::assert_matches;
    use switchboard_core::protocol::HubMessage;

    #[tokio::test]
    async fn others_excludes_caller() {
        let registry = Arc::new(LifetimeRegistry::new());
        let (a, mut rx_a) = make_handle("a", None, 8);
        let (b, mut rx_b) = make_handle("b", None, 8);
        registry.add_connection(a.clone()).unwrap();
        registry.add_connection(b.clone()).unwrap();

        let clients = CallerClients::new(registry.clone(), a.id().clone(), false);
        clients
            .others()
            .send("Hello", vec![], &CancellationToken::new())
            .await
            .unwrap();
        assert!(rx_a.try_recv().is_err());
        assert_matches!(rx_b.try_recv(), Ok(HubMessage::Invocation(m)) if m.target == "Hello");
    }

    #[tokio::test]
    async fn caller_results_need_parallelism() {
        let registry = Arc::new(LifetimeRegistry::new());
        let (a, _rx) = make_handle("a", None, 8);
        registry.add_connection(a.clone()).unwrap();

        let clients = CallerClients::new(registry.clone(), a.id().clone(), false);
        assert_eq!(
            clients
                .caller()
                .invoke("Ask", vec![], &CancellationToken::new())
                .await,
            Err(ClientResultError::ParallelismRequired)
        );
        assert_eq!(
            clients
                .client(a.id().clone())
                .invoke("Ask", vec![], &CancellationToken::new())
                .await,
            Err(ClientResultError::ParallelismRequired)
        );
    }

    #[tokio::test]
    async fn other_clients_may_be_awaited() {
        let registry = Arc::new(LifetimeRegistry::new());
        let clients = CallerClients::new(registry, "a".into(), false);
        assert_matches!(
            clients
                .client("b".into())
                .invoke("Ask", vec![], &CancellationToken::new())
                .await,
            Err(ClientResultError::UnknownConnection(id)) if id.as_str() == "b"
        );
    }

    #[tokio::test]
    async fn hub_context_reaches_groups() {
        let registry = Arc::new(LifetimeRegistry::new());
        let (a, mut rx_a) = make_handle("a", None, 8);
        registry.add_connection(a.clone()).unwrap();

        let ctx = HubContext::new(registry);
        ctx.groups().add_to_group(a.id(), "room");
        ctx.clients()
            .group("room")
            .send("Ping", vec![], &CancellationToken::new())
            .await
            .unwrap();
        assert_matches!(rx_a.try_recv(), Ok(HubMessage::Invocation(m)) if m.target == "Ping");
        ctx.groups().remove_from_group(a.id(), "room");
        assert!(ctx.registry().group_members("room").is_empty());
    }
}
