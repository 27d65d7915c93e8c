//! Live hub connections and the registry that tracks them.
//!
//! A [`Connection`] is a cheap, clonable handle to one negotiated client
//! session. It owns the sending half of the session's outbound queue; the
//! receiving half belongs to the connection's write loop (see
//! [`crate::pump`]). Anything that wants to talk to a client, whether the
//! dispatcher answering an invocation or the lifetime manager fanning a
//! message out, goes through [`Connection::write`].
//!
//! # Architecture
//!
//! ```text
//!   dispatcher ─┐
//!               ├─> Connection::write ─> [unbounded mpsc] ─> write loop ─> transport
//!   lifetime ───┘
//! ```
//!
//! Messages enqueued from a single task arrive in the order they were
//! enqueued. Writes never block; backpressure is applied by the transport
//! sink inside the write loop.
//!
//! Once the connection's abort token fires, [`Connection::write`] refuses new
//! messages with [`Error::ChannelClosed`]. Messages already queued are still
//! flushed before the transport closes.
//!
//! The [`ConnectionStore`] is the registry: a sharded map from connection id
//! to handle. Lookups never take a global lock, so fanout to one connection
//! never waits on fanout to another.

use crate::auth::Identity;
use crate::error::{Error, Result};
use crate::message::{HubMessage, SerializedHubMessage};
use crate::protocol::HubProtocol;
use dashmap::DashMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, Weak};
use std::time::{SystemTime, UNIX_EPOCH};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

/// Type alias for connection identifiers.
pub type ConnectionId = String;

static CONNECTION_COUNTER: AtomicU64 = AtomicU64::new(0);

/// Generates a unique connection id of the form `conn_N`.
pub fn generate_connection_id() -> ConnectionId {
    let id = CONNECTION_COUNTER.fetch_add(1, Ordering::SeqCst);
    format!("conn_{}", id)
}

/// Metadata captured when a client connects.
#[derive(Debug, Clone)]
pub struct ConnectionInfo {
    /// Peer address, when the transport has one.
    pub addr: Option<SocketAddr>,
    /// Unix timestamp (seconds) of when the transport was accepted.
    pub connected_at: u64,
    /// Who the caller is.
    pub identity: Identity,
}

impl ConnectionInfo {
    /// Creates metadata stamped with the current time.
    pub fn new(addr: Option<SocketAddr>, identity: Identity) -> Self {
        let connected_at = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs())
            .unwrap_or(0);
        Self {
            addr,
            connected_at,
            identity,
        }
    }
}

impl Default for ConnectionInfo {
    fn default() -> Self {
        Self::new(None, Identity::anonymous())
    }
}

struct ConnectionInner {
    id: ConnectionId,
    user_id: Option<String>,
    info: ConnectionInfo,
    protocol: Arc<dyn HubProtocol>,
    sender: mpsc::UnboundedSender<Arc<SerializedHubMessage>>,
    abort: CancellationToken,
    close_error: Mutex<Option<String>>,
}

/// Handle to one live client session.
///
/// Cloning is cheap; every clone refers to the same session.
#[derive(Clone)]
pub struct Connection {
    inner: Arc<ConnectionInner>,
}

impl Connection {
    /// Creates a handle.
    ///
    /// Returns the handle together with the receiving half of its outbound
    /// queue, which the caller must drain.
    pub fn new(
        id: ConnectionId,
        user_id: Option<String>,
        info: ConnectionInfo,
        protocol: Arc<dyn HubProtocol>,
    ) -> (Self, mpsc::UnboundedReceiver<Arc<SerializedHubMessage>>) {
        let (sender, receiver) = mpsc::unbounded_channel();
        let connection = Self {
            inner: Arc::new(ConnectionInner {
                id,
                user_id,
                info,
                protocol,
                sender,
                abort: CancellationToken::new(),
                close_error: Mutex::new(None),
            }),
        };
        (connection, receiver)
    }

    /// The connection id.
    pub fn id(&self) -> &ConnectionId {
        &self.inner.id
    }

    /// The user this connection belongs to, if any.
    pub fn user_id(&self) -> Option<&str> {
        self.inner.user_id.as_deref()
    }

    /// Metadata captured at connect time.
    pub fn info(&self) -> &ConnectionInfo {
        &self.inner.info
    }

    /// The negotiated protocol.
    pub fn protocol(&self) -> &Arc<dyn HubProtocol> {
        &self.inner.protocol
    }

    /// Enqueues a shared outbound message.
    ///
    /// Fails with [`Error::ChannelClosed`] once the connection is aborting.
    pub fn write(&self, message: Arc<SerializedHubMessage>) -> Result<()> {
        if self.inner.abort.is_cancelled() {
            return Err(Error::ChannelClosed(self.inner.id.clone()));
        }
        self.inner
            .sender
            .send(message)
            .map_err(|_| Error::ChannelClosed(self.inner.id.clone()))
    }

    /// Enqueues a message addressed to this connection alone.
    pub fn write_message(&self, message: HubMessage) -> Result<()> {
        self.write(Arc::new(SerializedHubMessage::new(message)))
    }

    /// Signals the connection to shut down.
    ///
    /// Idempotent; the first recorded error wins.
    pub fn abort(&self) {
        if !self.inner.abort.is_cancelled() {
            debug!("Abort requested for {}", self.inner.id);
        }
        self.inner.abort.cancel();
    }

    /// Signals shutdown and records why, unless a reason was already recorded.
    pub fn abort_with_error(&self, error: impl Into<String>) {
        {
            let mut slot = self
                .inner
                .close_error
                .lock()
                .unwrap_or_else(|e| e.into_inner());
            if slot.is_none() {
                *slot = Some(error.into());
            }
        }
        self.abort();
    }

    /// Returns `true` once shutdown was signaled.
    pub fn is_aborted(&self) -> bool {
        self.inner.abort.is_cancelled()
    }

    /// The connection's abort token.
    ///
    /// Streaming invocations derive child tokens from it.
    pub fn abort_token(&self) -> &CancellationToken {
        &self.inner.abort
    }

    /// The error recorded by [`abort_with_error`](Self::abort_with_error).
    pub fn close_error(&self) -> Option<String> {
        self.inner
            .close_error
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    /// Creates a weak handle that does not keep the session alive.
    pub fn downgrade(&self) -> WeakConnection {
        WeakConnection {
            inner: Arc::downgrade(&self.inner),
        }
    }
}

impl std::fmt::Debug for Connection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connection")
            .field("id", &self.inner.id)
            .field("user_id", &self.inner.user_id)
            .field("protocol", &self.inner.protocol.name())
            .field("aborted", &self.is_aborted())
            .finish()
    }
}

/// A non-owning reference to a [`Connection`].
#[derive(Clone)]
pub struct WeakConnection {
    inner: Weak<ConnectionInner>,
}

impl WeakConnection {
    /// Returns the connection if its session is still alive.
    pub fn upgrade(&self) -> Option<Connection> {
        self.inner.upgrade().map(|inner| Connection { inner })
    }
}

/// Thread-safe registry of live connections.
///
/// # Examples
///
/// ```ignore
/// use hubforge::prelude::*;
///
/// let store = ConnectionStore::new();
/// println!("{} connections", store.count());
/// for id in store.all_ids() {
///     println!("  {}", id);
/// }
/// ```
pub struct ConnectionStore {
    connections: Arc<DashMap<ConnectionId, Connection>>,
}

impl ConnectionStore {
    /// Creates an empty registry.
    pub fn new() -> Self {
        Self {
            connections: Arc::new(DashMap::new()),
        }
    }

    /// Registers a connection and returns the new total.
    pub fn add(&self, conn: Connection) -> usize {
        let id = conn.id().clone();
        self.connections.insert(id.clone(), conn);
        let count = self.connections.len();
        info!("Added connection: {} (Total: {})", id, count);
        count
    }

    /// Unregisters a connection.
    pub fn remove(&self, id: &str) -> Option<Connection> {
        let result = self.connections.remove(id).map(|(_, conn)| conn);
        if result.is_some() {
            info!(
                "Removed connection: {} (Total: {})",
                id,
                self.connections.len()
            );
        }
        result
    }

    /// Looks up a connection by id.
    pub fn get(&self, id: &str) -> Option<Connection> {
        self.connections.get(id).map(|entry| entry.value().clone())
    }

    /// Number of registered connections.
    pub fn count(&self) -> usize {
        self.connections.len()
    }

    /// Snapshot of every registered id.
    pub fn all_ids(&self) -> Vec<ConnectionId> {
        self.connections.iter().map(|e| e.key().clone()).collect()
    }

    /// Snapshot of every registered connection.
    pub fn all_connections(&self) -> Vec<Connection> {
        self.connections.iter().map(|e| e.value().clone()).collect()
    }
}

impl Default for ConnectionStore {
    fn default() -> Self {
        Self::new()
    }
}
