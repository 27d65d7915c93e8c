//! Client proxies: typed fanout targets.
//!
//! A [`ClientProxy`] names a set of clients ([`ClientTarget`]) and forwards
//! [`invoke`](ClientProxy::invoke) to the matching
//! [`HubLifetimeManager`] method. Proxies are cheap to build and hold no
//! state beyond the target description.
//!
//! ```ignore
//! use hubforge::prelude::*;
//! use serde_json::json;
//!
//! async fn send(ctx: HubCallContext, Arg(text): Arg<String>) -> Result<()> {
//!     ctx.clients().others().invoke("Receive", vec![json!(text)]).await
//! }
//! ```

use crate::connection::ConnectionId;
use crate::error::Result;
use crate::lifetime::HubLifetimeManager;
use serde_json::Value;
use std::sync::Arc;

/// Which clients a proxy addresses.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClientTarget {
    /// Every connection.
    All,
    /// Every connection except the listed ids.
    AllExcept(Vec<ConnectionId>),
    /// One connection.
    Connection(ConnectionId),
    /// The listed connections.
    Connections(Vec<ConnectionId>),
    /// Members of one group.
    Group(String),
    /// Members of any listed group.
    Groups(Vec<String>),
    /// Members of a group except the listed ids.
    GroupExcept(String, Vec<ConnectionId>),
    /// Connections of one user.
    User(String),
    /// Connections of any listed user.
    Users(Vec<String>),
}

/// Sends invocations to a [`ClientTarget`].
#[derive(Clone)]
pub struct ClientProxy {
    lifetime: Arc<dyn HubLifetimeManager>,
    target: ClientTarget,
}

impl ClientProxy {
    /// Creates a proxy.
    pub fn new(lifetime: Arc<dyn HubLifetimeManager>, target: ClientTarget) -> Self {
        Self { lifetime, target }
    }

    /// The addressed clients.
    pub fn target(&self) -> &ClientTarget {
        &self.target
    }

    /// Invokes `method` on every addressed client, fire-and-forget.
    pub async fn invoke(&self, method: &str, args: Vec<Value>) -> Result<()> {
        let lifetime = &self.lifetime;
        match &self.target {
            ClientTarget::All => lifetime.send_to_all(method, args).await,
            ClientTarget::AllExcept(excluded) if excluded.is_empty() => {
                lifetime.send_to_all(method, args).await
            }
            ClientTarget::AllExcept(excluded) => {
                lifetime.send_to_all_except(method, args, excluded).await
            }
            ClientTarget::Connection(id) => lifetime.send_to_connection(id, method, args).await,
            ClientTarget::Connections(ids) => {
                lifetime.send_to_connections(ids, method, args).await
            }
            ClientTarget::Group(group) => lifetime.send_to_group(group, method, args).await,
            ClientTarget::Groups(groups) => lifetime.send_to_groups(groups, method, args).await,
            ClientTarget::GroupExcept(group, excluded) => {
                lifetime
                    .send_to_group_except(group, method, args, excluded)
                    .await
            }
            ClientTarget::User(user) => lifetime.send_to_user(user, method, args).await,
            ClientTarget::Users(users) => lifetime.send_to_users(users, method, args).await,
        }
    }
}

impl std::fmt::Debug for ClientProxy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClientProxy")
            .field("target", &self.target)
            .finish()
    }
}

/// Builds proxies for any set of clients.
#[derive(Clone)]
pub struct HubClients {
    lifetime: Arc<dyn HubLifetimeManager>,
}

impl HubClients {
    /// Creates a proxy factory over `lifetime`.
    pub fn new(lifetime: Arc<dyn HubLifetimeManager>) -> Self {
        Self { lifetime }
    }

    fn proxy(&self, target: ClientTarget) -> ClientProxy {
        ClientProxy::new(self.lifetime.clone(), target)
    }

    /// Every connection.
    pub fn all(&self) -> ClientProxy {
        self.proxy(ClientTarget::All)
    }

    /// Every connection except `excluded`.
    pub fn all_except(&self, excluded: Vec<ConnectionId>) -> ClientProxy {
        self.proxy(ClientTarget::AllExcept(excluded))
    }

    /// One connection.
    pub fn client(&self, id: impl Into<ConnectionId>) -> ClientProxy {
        self.proxy(ClientTarget::Connection(id.into()))
    }

    /// The listed connections.
    pub fn clients(&self, ids: Vec<ConnectionId>) -> ClientProxy {
        self.proxy(ClientTarget::Connections(ids))
    }

    /// Members of `group`.
    pub fn group(&self, group: impl Into<String>) -> ClientProxy {
        self.proxy(ClientTarget::Group(group.into()))
    }

    /// Members of any listed group.
    pub fn groups(&self, groups: Vec<String>) -> ClientProxy {
        self.proxy(ClientTarget::Groups(groups))
    }

    /// Members of `group` except `excluded`.
    pub fn group_except(&self, group: impl Into<String>, excluded: Vec<ConnectionId>) -> ClientProxy {
        self.proxy(ClientTarget::GroupExcept(group.into(), excluded))
    }

    /// Connections of `user`.
    pub fn user(&self, user: impl Into<String>) -> ClientProxy {
        self.proxy(ClientTarget::User(user.into()))
    }

    /// Connections of any listed user.
    pub fn users(&self, users: Vec<String>) -> ClientProxy {
        self.proxy(ClientTarget::Users(users))
    }
}

/// Proxies relative to the connection that made the current call.
#[derive(Clone)]
pub struct HubCallerClients {
    clients: HubClients,
    caller: ConnectionId,
}

impl HubCallerClients {
    /// Creates caller-relative proxies for `caller`.
    pub fn new(clients: HubClients, caller: ConnectionId) -> Self {
        Self { clients, caller }
    }

    /// The calling connection.
    pub fn caller(&self) -> ClientProxy {
        self.clients.client(self.caller.clone())
    }

    /// Everyone but the caller.
    pub fn others(&self) -> ClientProxy {
        self.clients.all_except(vec![self.caller.clone()])
    }

    /// Members of `group` except the caller.
    pub fn others_in_group(&self, group: impl Into<String>) -> ClientProxy {
        self.clients.group_except(group, vec![self.caller.clone()])
    }
}

impl std::ops::Deref for HubCallerClients {
    type Target = HubClients;

    fn deref(&self) -> &HubClients {
        &self.clients
    }
}

/// Adds and removes connections from groups.
#[derive(Clone)]
pub struct GroupManager {
    lifetime: Arc<dyn HubLifetimeManager>,
}

impl GroupManager {
    /// Creates a group manager over `lifetime`.
    pub fn new(lifetime: Arc<dyn HubLifetimeManager>) -> Self {
        Self { lifetime }
    }

    /// Adds a connection to a group.
    pub async fn add_to_group(&self, connection_id: &str, group: &str) -> Result<()> {
        self.lifetime.add_to_group(connection_id, group).await
    }

    /// Removes a connection from a group.
    pub async fn remove_from_group(&self, connection_id: &str, group: &str) -> Result<()> {
        self.lifetime.remove_from_group(connection_id, group).await
    }
}
