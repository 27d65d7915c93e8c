//! Contexts handed to hub code.
//!
//! - [`HubCallContext`] is available inside a hub method or lifecycle hook
//!   and knows who the caller is.
//! - [`HubContext`] is for code outside the hub (background jobs, other
//!   services) that wants to push messages to clients.

use crate::auth::Identity;
use crate::clients::{GroupManager, HubCallerClients, HubClients};
use crate::connection::{Connection, ConnectionId, ConnectionInfo};
use crate::lifetime::HubLifetimeManager;
use crate::state::AppState;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// Everything a hub method can reach about its call.
#[derive(Clone)]
pub struct HubCallContext {
    connection: Connection,
    clients: HubCallerClients,
    groups: GroupManager,
    state: AppState,
    cancellation: CancellationToken,
}

impl HubCallContext {
    /// Creates a call context for `connection`.
    ///
    /// `cancellation` fires when the call should stop early: for streaming
    /// invocations when the client cancels or the connection closes, for
    /// everything else when the connection closes.
    pub fn new(
        connection: Connection,
        lifetime: Arc<dyn HubLifetimeManager>,
        state: AppState,
        cancellation: CancellationToken,
    ) -> Self {
        let clients = HubCallerClients::new(HubClients::new(lifetime.clone()), connection.id().clone());
        Self {
            connection,
            clients,
            groups: GroupManager::new(lifetime),
            state,
            cancellation,
        }
    }

    /// The caller's connection id.
    pub fn connection_id(&self) -> &ConnectionId {
        self.connection.id()
    }

    /// The caller's user id, if any.
    pub fn user_id(&self) -> Option<&str> {
        self.connection.user_id()
    }

    /// The caller's identity.
    pub fn identity(&self) -> &Identity {
        &self.connection.info().identity
    }

    /// Connection metadata.
    pub fn info(&self) -> &ConnectionInfo {
        self.connection.info()
    }

    /// The caller's connection.
    pub fn connection(&self) -> &Connection {
        &self.connection
    }

    /// Caller-relative client proxies.
    pub fn clients(&self) -> &HubCallerClients {
        &self.clients
    }

    /// Group management.
    pub fn groups(&self) -> &GroupManager {
        &self.groups
    }

    /// Shared application state.
    pub fn state(&self) -> &AppState {
        &self.state
    }

    /// Fires when the call should stop early.
    pub fn cancellation_token(&self) -> &CancellationToken {
        &self.cancellation
    }

    /// Closes the caller's connection.
    pub fn abort(&self) {
        self.connection.abort();
    }
}

impl std::fmt::Debug for HubCallContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HubCallContext")
            .field("connection", &self.connection)
            .finish()
    }
}

/// Fanout and group management from outside a hub.
///
/// ```ignore
/// use hubforge::prelude::*;
/// use serde_json::json;
///
/// async fn announce(hub: HubContext) -> Result<()> {
///     hub.clients().all().invoke("Announce", vec![json!("maintenance at noon")]).await
/// }
/// ```
#[derive(Clone)]
pub struct HubContext {
    clients: HubClients,
    groups: GroupManager,
}

impl HubContext {
    /// Creates a context over `lifetime`.
    pub fn new(lifetime: Arc<dyn HubLifetimeManager>) -> Self {
        Self {
            clients: HubClients::new(lifetime.clone()),
            groups: GroupManager::new(lifetime),
        }
    }

    /// Client proxies.
    pub fn clients(&self) -> &HubClients {
        &self.clients
    }

    /// Group management.
    pub fn groups(&self) -> &GroupManager {
        &self.groups
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connection::tests::test_connection;
    use crate::lifetime::DefaultHubLifetimeManager;
    use crate::message::HubMessage;

    #[tokio::test]
    async fn test_caller_reaches_own_connection() {
        let lifetime = Arc::new(DefaultHubLifetimeManager::new());
        let (conn, mut rx) = test_connection("me", Some("alice"));
        lifetime.on_connected(&conn).await.unwrap();

        let ctx = HubCallContext::new(
            conn,
            lifetime.clone(),
            AppState::new(),
            CancellationToken::new(),
        );
        assert_eq!(ctx.connection_id(), "me");
        assert_eq!(ctx.user_id(), Some("alice"));

        ctx.clients().caller().invoke("Hello", vec![]).await.unwrap();
        let msg = rx.try_recv().unwrap();
        assert!(matches!(msg.message(), HubMessage::Invocation(inv) if inv.target == "Hello"));
    }

    #[tokio::test]
    async fn test_hub_context_groups() {
        let lifetime = Arc::new(DefaultHubLifetimeManager::new());
        let (conn, mut rx) = test_connection("c1", None);
        lifetime.on_connected(&conn).await.unwrap();

        let hub = HubContext::new(lifetime.clone());
        hub.groups().add_to_group("c1", "room").await.unwrap();
        hub.clients().group("room").invoke("m", vec![]).await.unwrap();
        assert!(rx.try_recv().is_ok());

        hub.groups().remove_from_group("c1", "room").await.unwrap();
        hub.clients().group("room").invoke("m", vec![]).await.unwrap();
        assert!(rx.try_recv().is_err());
    }
}
