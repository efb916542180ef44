//! Lifetime registry: every live connection of a hub, plus group and user
//! indexes, and targeted fan-out over them.
//!
//! Each send resolves its recipients to a snapshot first and then writes to
//! every recipient concurrently, so a membership change racing a send is
//! either wholly included or wholly excluded.

use std::collections::HashSet;
use std::sync::Arc;

use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use futures::future::join_all;
use serde_json::Value;
use switchboard_core::protocol::{HubMessage, InvocationMessage};
use switchboard_core::{ConnectionId, UserId};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::connection::{ConnectionHandle, ConnectionState};
use crate::errors::{ClientResultError, RegistryError, SendError};

/// Recipients of a send.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Target {
    /// Every connection.
    All,
    /// Every connection except the listed ones.
    AllExcept(Vec<ConnectionId>),
    /// One connection.
    Connection(ConnectionId),
    /// Several connections.
    Connections(Vec<ConnectionId>),
    /// Members of a group.
    Group(String),
    /// Members of any of the groups, each once.
    Groups(Vec<String>),
    /// Members of a group except the listed connections.
    GroupExcept(String, Vec<ConnectionId>),
    /// Connections of a user.
    User(UserId),
    /// Connections of any of the users, each once.
    Users(Vec<UserId>),
}

/// All live connections of one hub.
#[derive(Debug, Default)]
pub struct LifetimeRegistry {
    connections: DashMap<ConnectionId, Arc<ConnectionHandle>>,
    groups: DashMap<String, HashSet<ConnectionId>>,
    users: DashMap<UserId, HashSet<ConnectionId>>,
}

impl LifetimeRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a connection. Fails if its id is already taken.
    pub fn add_connection(&self, handle: Arc<ConnectionHandle>) -> Result<(), RegistryError> {
        let id = handle.id().clone();
        match self.connections.entry(id.clone()) {
            Entry::Occupied(_) => return Err(RegistryError::DuplicateConnection(id)),
            Entry::Vacant(slot) => {
                let _ = slot.insert(handle.clone());
            }
        }
        if let Some(user) = handle.user_id() {
            let _ = self.users.entry(user.clone()).or_default().insert(id.clone());
        }
        debug!(connection_id = %id, "connection registered");
        Ok(())
    }

    /// Remove a connection and all its group memberships. Only removes the
    /// registered entry if it is this exact handle; safe to call twice.
    pub fn remove_connection(&self, handle: &Arc<ConnectionHandle>) {
        let id = handle.id();
        let removed = self
            .connections
            .remove_if(id, |_, registered| Arc::ptr_eq(registered, handle))
            .is_some();

        let memberships: Vec<String> = handle.groups.lock().drain().collect();
        for group in memberships {
            self.leave_group_index(&group, id);
        }

        if removed {
            if let Some(user) = handle.user_id() {
                if let Some(mut set) = self.users.get_mut(user) {
                    let _ = set.remove(id);
                }
                let _ = self.users.remove_if(user, |_, set| set.is_empty());
            }
            debug!(connection_id = %id, "connection unregistered");
        }
    }

    /// Look up a connection.
    pub fn connection(&self, id: &ConnectionId) -> Option<Arc<ConnectionHandle>> {
        self.connections.get(id).map(|entry| entry.value().clone())
    }

    /// Number of live connections.
    pub fn connection_count(&self) -> usize {
        self.connections.len()
    }

    /// Number of non-empty groups.
    pub fn group_count(&self) -> usize {
        self.groups.len()
    }

    /// Member ids of a group, sorted.
    pub fn group_members(&self, group: &str) -> Vec<ConnectionId> {
        let mut members: Vec<ConnectionId> = self
            .groups
            .get(group)
            .map(|set| set.iter().cloned().collect())
            .unwrap_or_default();
        members.sort_unstable();
        members
    }

    /// Add a connection to a group. Unknown or closing connections and
    /// repeated adds are no-ops.
    pub fn add_to_group(&self, id: &ConnectionId, group: &str) {
        let Some(handle) = self.connection(id) else {
            debug!(connection_id = %id, group, "add to group for unknown connection ignored");
            return;
        };
        let mut memberships = handle.groups.lock();
        if matches!(handle.state(), ConnectionState::Draining | ConnectionState::Closed) {
            return;
        }
        if memberships.insert(group.to_owned()) {
            let _ = self
                .groups
                .entry(group.to_owned())
                .or_default()
                .insert(id.clone());
            debug!(connection_id = %id, group, "joined group");
        }
    }

    /// Remove a connection from a group. Non-members are a no-op.
    pub fn remove_from_group(&self, id: &ConnectionId, group: &str) {
        let Some(handle) = self.connection(id) else {
            return;
        };
        let mut memberships = handle.groups.lock();
        if memberships.remove(group) {
            self.leave_group_index(group, id);
            debug!(connection_id = %id, group, "left group");
        }
    }

    fn leave_group_index(&self, group: &str, id: &ConnectionId) {
        if let Some(mut set) = self.groups.get_mut(group) {
            let _ = set.remove(id);
        }
        let _ = self.groups.remove_if(group, |_, set| set.is_empty());
    }

    /// Resolve a target to a snapshot of live handles, each at most once.
    pub fn resolve(&self, target: &Target) -> Vec<Arc<ConnectionHandle>> {
        let ids: Vec<ConnectionId> = match target {
            Target::All => return self.all_except(&[]),
            Target::AllExcept(excluded) => return self.all_except(excluded),
            Target::Connection(id) => vec![id.clone()],
            Target::Connections(ids) => dedup(ids.iter().cloned()),
            Target::Group(name) => self.group_snapshot(name),
            Target::Groups(names) => {
                dedup(names.iter().flat_map(|name| self.group_snapshot(name)))
            }
            Target::GroupExcept(name, excluded) => self
                .group_snapshot(name)
                .into_iter()
                .filter(|id| !excluded.contains(id))
                .collect(),
            Target::User(user) => self.user_snapshot(user),
            Target::Users(users) => dedup(users.iter().flat_map(|user| self.user_snapshot(user))),
        };
        ids.iter().filter_map(|id| self.connection(id)).collect()
    }

    fn all_except(&self, excluded: &[ConnectionId]) -> Vec<Arc<ConnectionHandle>> {
        self.connections
            .iter()
            .filter(|entry| !excluded.contains(entry.key()))
            .map(|entry| entry.value().clone())
            .collect()
    }

    fn group_snapshot(&self, name: &str) -> Vec<ConnectionId> {
        self.groups
            .get(name)
            .map(|set| set.iter().cloned().collect())
            .unwrap_or_default()
    }

    fn user_snapshot(&self, user: &UserId) -> Vec<ConnectionId> {
        self.users
            .get(user)
            .map(|set| set.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// Invoke `method` on every connection of `target` without awaiting
    /// results. Completes when the message is queued for every recipient.
    pub async fn send(
        &self,
        target: &Target,
        method: &str,
        arguments: Vec<Value>,
        cancel: &CancellationToken,
    ) -> Result<(), SendError> {
        let recipients = self.resolve(target);
        if recipients.is_empty() {
            return Ok(());
        }
        let message = HubMessage::Invocation(InvocationMessage::new(method, arguments));
        let sends = recipients
            .iter()
            .map(|handle| handle.send(message.clone(), cancel));

        let results = tokio::select! {
            biased;
            () = cancel.cancelled() => return Err(SendError::Canceled),
            results = join_all(sends) => results,
        };
        if results.iter().any(Result::is_err) {
            return Err(SendError::Canceled);
        }
        Ok(())
    }

    /// Send to every connection.
    pub async fn send_all(
        &self,
        method: &str,
        arguments: Vec<Value>,
        cancel: &CancellationToken,
    ) -> Result<(), SendError> {
        self.send(&Target::All, method, arguments, cancel).await
    }

    /// Send to one connection. Unknown ids are a no-op.
    pub async fn send_connection(
        &self,
        id: &ConnectionId,
        method: &str,
        arguments: Vec<Value>,
        cancel: &CancellationToken,
    ) -> Result<(), SendError> {
        self.send(&Target::Connection(id.clone()), method, arguments, cancel)
            .await
    }

    /// Send to every member of a group.
    pub async fn send_group(
        &self,
        group: &str,
        method: &str,
        arguments: Vec<Value>,
        cancel: &CancellationToken,
    ) -> Result<(), SendError> {
        self.send(&Target::Group(group.to_owned()), method, arguments, cancel)
            .await
    }

    /// Send to every connection of a user.
    pub async fn send_user(
        &self,
        user: &UserId,
        method: &str,
        arguments: Vec<Value>,
        cancel: &CancellationToken,
    ) -> Result<(), SendError> {
        self.send(&Target::User(user.clone()), method, arguments, cancel)
            .await
    }

    /// Invoke a client method on one connection and await its result.
    pub async fn invoke_connection(
        &self,
        id: &ConnectionId,
        method: &str,
        arguments: Vec<Value>,
        cancel: &CancellationToken,
    ) -> Result<Value, ClientResultError> {
        let handle = self
            .connection(id)
            .ok_or_else(|| ClientResultError::UnknownConnection(id.clone()))?;
        handle.invoke(method, arguments, cancel).await
    }

    /// Abort every live connection.
    pub fn abort_all(&self) {
        let count = self.connections.len();
        for entry in &self.connections {
            entry.value().abort();
        }
        if count > 0 {
            info!(count, "aborting all connections");
        }
    }
}

fn dedup(ids: impl Iterator<Item = ConnectionId>) -> Vec<ConnectionId> {
    let mut seen = HashSet::new();
    ids.filter(|id| seen.insert(id.clone())).collect()
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
