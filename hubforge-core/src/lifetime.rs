//! Connection lifetimes and message fanout.
//!
//! The [`HubLifetimeManager`] is the single place where connections are
//! registered, grouped, and where server-initiated invocations are fanned
//! out. [`DefaultHubLifetimeManager`] keeps everything in process.
//!
//! # Fanout rules
//!
//! - Every send builds **one** fire-and-forget invocation and wraps it in one
//!   shared [`SerializedHubMessage`], so each protocol encodes it at most once
//!   no matter how many connections receive it.
//! - Id, group and user lists are sets: a connection receives a given send at
//!   most once, even when it matches several entries.
//! - Unknown or closing targets are skipped. Only
//!   [`send_to_connection`](HubLifetimeManager::send_to_connection) reports
//!   [`Error::ChannelClosed`](crate::error::Error::ChannelClosed) for its
//!   single target.
//! - Sends enqueue without blocking. To cancel one, drop its future.

use crate::connection::{Connection, ConnectionId, ConnectionStore};
use crate::error::Result;
use crate::group::GroupList;
use crate::message::{HubMessage, InvocationMessage, SerializedHubMessage};
use async_trait::async_trait;
use serde_json::Value;
use std::collections::HashSet;
use std::sync::Arc;
use tracing::debug;

/// Registers connections and fans messages out to them.
#[async_trait]
pub trait HubLifetimeManager: Send + Sync + 'static {
    /// Registers a newly negotiated connection.
    async fn on_connected(&self, connection: &Connection) -> Result<()>;

    /// Unregisters a connection and removes it from every group.
    ///
    /// Tolerates partially registered connections and repeated calls.
    async fn on_disconnected(&self, connection: &Connection) -> Result<()>;

    /// Sends to every connection.
    async fn send_to_all(&self, method: &str, args: Vec<Value>) -> Result<()>;

    /// Sends to every connection except `excluded`.
    async fn send_to_all_except(
        &self,
        method: &str,
        args: Vec<Value>,
        excluded: &[ConnectionId],
    ) -> Result<()>;

    /// Sends to a single connection.
    async fn send_to_connection(
        &self,
        connection_id: &str,
        method: &str,
        args: Vec<Value>,
    ) -> Result<()>;

    /// Sends to each listed connection.
    async fn send_to_connections(
        &self,
        connection_ids: &[ConnectionId],
        method: &str,
        args: Vec<Value>,
    ) -> Result<()>;

    /// Sends to every member of a group.
    async fn send_to_group(&self, group: &str, method: &str, args: Vec<Value>) -> Result<()>;

    /// Sends to every member of any listed group.
    async fn send_to_groups(&self, groups: &[String], method: &str, args: Vec<Value>)
    -> Result<()>;

    /// Sends to every member of a group except `excluded`.
    async fn send_to_group_except(
        &self,
        group: &str,
        method: &str,
        args: Vec<Value>,
        excluded: &[ConnectionId],
    ) -> Result<()>;

    /// Sends to every connection of a user.
    async fn send_to_user(&self, user_id: &str, method: &str, args: Vec<Value>) -> Result<()>;

    /// Sends to every connection of any listed user.
    async fn send_to_users(&self, user_ids: &[String], method: &str, args: Vec<Value>)
    -> Result<()>;

    /// Adds a registered connection to a group. Unknown ids are ignored.
    async fn add_to_group(&self, connection_id: &str, group: &str) -> Result<()>;

    /// Removes a connection from a group. Non-members are ignored.
    async fn remove_from_group(&self, connection_id: &str, group: &str) -> Result<()>;
}

fn fanout_message(method: &str, args: Vec<Value>) -> Arc<SerializedHubMessage> {
    Arc::new(SerializedHubMessage::new(HubMessage::Invocation(
        InvocationMessage::fire_and_forget(method, args),
    )))
}

/// In-process lifetime manager.
#[derive(Default)]
pub struct DefaultHubLifetimeManager {
    connections: ConnectionStore,
    groups: GroupList,
}

impl DefaultHubLifetimeManager {
    /// Creates an empty manager.
    pub fn new() -> Self {
        Self::default()
    }

    /// The connection registry.
    pub fn connections(&self) -> &ConnectionStore {
        &self.connections
    }

    /// The group membership table.
    pub fn groups(&self) -> &GroupList {
        &self.groups
    }

    /// Enqueues `message` on every connection in `targets`, skipping ids
    /// already seen. Per-target failures are logged and swallowed.
    fn fan_out<I>(&self, targets: I, message: &Arc<SerializedHubMessage>) -> usize
    where
        I: IntoIterator<Item = Connection>,
    {
        let mut seen = HashSet::new();
        let mut sent = 0;
        for conn in targets {
            if !seen.insert(conn.id().clone()) {
                continue;
            }
            match conn.write(message.clone()) {
                Ok(()) => sent += 1,
                Err(e) => debug!("Skipping {} during fanout: {}", conn.id(), e),
            }
        }
        sent
    }

    /// Adds `connection` to `group`, undoing the add if the connection was
    /// unregistered while it ran.
    fn join_group(&self, connection: &Connection, group: &str) {
        let id = connection.id();
        self.groups.add(connection, group);
        if self.connections.get(id).is_none() {
            debug!("{} disconnected while joining '{}'", id, group);
            self.groups.remove(id, group);
        }
    }
}

#[async_trait]
impl HubLifetimeManager for DefaultHubLifetimeManager {
    async fn on_connected(&self, connection: &Connection) -> Result<()> {
        self.connections.add(connection.clone());
        Ok(())
    }

    async fn on_disconnected(&self, connection: &Connection) -> Result<()> {
        let id = connection.id();
        self.connections.remove(id);
        self.groups.remove_connection_from_all(id);
        Ok(())
    }

    async fn send_to_all(&self, method: &str, args: Vec<Value>) -> Result<()> {
        let message = fanout_message(method, args);
        let sent = self.fan_out(self.connections.all_connections(), &message);
        debug!("'{}' sent to {} connection(s)", method, sent);
        Ok(())
    }

    async fn send_to_all_except(
        &self,
        method: &str,
        args: Vec<Value>,
        excluded: &[ConnectionId],
    ) -> Result<()> {
        let message = fanout_message(method, args);
        let excluded: HashSet<&str> = excluded.iter().map(String::as_str).collect();
        let targets = self
            .connections
            .all_connections()
            .into_iter()
            .filter(|c| !excluded.contains(c.id().as_str()));
        let sent = self.fan_out(targets, &message);
        debug!(
            "'{}' sent to {} connection(s) ({} excluded)",
            method,
            sent,
            excluded.len()
        );
        Ok(())
    }

    async fn send_to_connection(
        &self,
        connection_id: &str,
        method: &str,
        args: Vec<Value>,
    ) -> Result<()> {
        let Some(conn) = self.connections.get(connection_id) else {
            debug!("'{}' not sent: {} is not connected", method, connection_id);
            return Ok(());
        };
        conn.write(fanout_message(method, args))
    }

    async fn send_to_connections(
        &self,
        connection_ids: &[ConnectionId],
        method: &str,
        args: Vec<Value>,
    ) -> Result<()> {
        let message = fanout_message(method, args);
        let targets = connection_ids
            .iter()
            .filter_map(|id| self.connections.get(id));
        self.fan_out(targets, &message);
        Ok(())
    }

    async fn send_to_group(&self, group: &str, method: &str, args: Vec<Value>) -> Result<()> {
        let message = fanout_message(method, args);
        let sent = self.fan_out(self.groups.get(group), &message);
        debug!("'{}' sent to {} member(s) of '{}'", method, sent, group);
        Ok(())
    }

    async fn send_to_groups(
        &self,
        groups: &[String],
        method: &str,
        args: Vec<Value>,
    ) -> Result<()> {
        let message = fanout_message(method, args);
        let targets = groups.iter().flat_map(|g| self.groups.get(g));
        self.fan_out(targets, &message);
        Ok(())
    }

    async fn send_to_group_except(
        &self,
        group: &str,
        method: &str,
        args: Vec<Value>,
        excluded: &[ConnectionId],
    ) -> Result<()> {
        let message = fanout_message(method, args);
        let excluded: HashSet<&str> = excluded.iter().map(String::as_str).collect();
        let targets = self
            .groups
            .get(group)
            .into_iter()
            .filter(|c| !excluded.contains(c.id().as_str()));
        self.fan_out(targets, &message);
        Ok(())
    }

    async fn send_to_user(&self, user_id: &str, method: &str, args: Vec<Value>) -> Result<()> {
        self.send_to_users(&[user_id.to_string()], method, args)
            .await
    }

    async fn send_to_users(
        &self,
        user_ids: &[String],
        method: &str,
        args: Vec<Value>,
    ) -> Result<()> {
        let message = fanout_message(method, args);
        let users: HashSet<&str> = user_ids.iter().map(String::as_str).collect();
        let targets = self
            .connections
            .all_connections()
            .into_iter()
            .filter(|c| c.user_id().is_some_and(|u| users.contains(u)));
        self.fan_out(targets, &message);
        Ok(())
    }

    async fn add_to_group(&self, connection_id: &str, group: &str) -> Result<()> {
        match self.connections.get(connection_id) {
            Some(conn) => self.join_group(&conn, group),
            None => debug!(
                "Not adding {} to '{}': connection not found",
                connection_id, group
            ),
        }
        Ok(())
    }

    async fn remove_from_group(&self, connection_id: &str, group: &str) -> Result<()> {
        self.groups.remove(connection_id, group);
        Ok(())
    }
}

impl std::fmt::Debug for DefaultHubLifetimeManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DefaultHubLifetimeManager")
            .field("connections", &self.connections.count())
            .field("groups", &self.groups.group_count())
            .finish()
    }
}
