//! # HubForge Core - Real-Time Hub Dispatch
//!
//! `hubforge-core` is the foundational library of the HubForge framework. It
//! turns persistent client connections into a *hub*: a set of named methods
//! that clients invoke remotely, plus a way for server code to push
//! invocations back to any connection, any named group of connections, or
//! every connection of a user.
//!
//! ## Key Features
//!
//! - 🔌 **Transport Agnostic**: Anything that is a `Stream` and `Sink` of
//!   frames can carry a hub; WebSocket and in-memory transports ship built in
//! - 🔧 **Type-Safe Hub Methods**: Plain async functions with `Arg<T>`,
//!   `State<T>` and context extractors, returning anything serializable
//! - 🌊 **Streaming**: Methods that return a stream of items, cancellable by
//!   the client
//! - 📡 **Fan-Out**: All, all-except, connection, group and user targets,
//!   encoded once per protocol no matter how many recipients
//! - ⚡ **Concurrent**: Lock-free registry and group table built on DashMap
//! - 🛡️ **Fault Isolation**: A failing method or connection never affects
//!   another
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │                        Application                           │
//! │  ┌────────────┐  ┌────────────┐  ┌────────────────────────┐  │
//! │  │ Hub methods│  │   Hooks    │  │  State & Extractors    │  │
//! │  └────────────┘  └────────────┘  └────────────────────────┘  │
//! └──────────────────────────────────────────────────────────────┘
//!                              │
//! ┌──────────────────────────────────────────────────────────────┐
//! │                      HubForge Core                           │
//! │  ┌──────────────┐  ┌──────────────┐  ┌───────────────────┐   │
//! │  │  Connection  │  │  Invocation  │  │ Lifetime Manager  │   │
//! │  │     Pump     │  │  Dispatcher  │  │ (registry/groups) │   │
//! │  └──────────────┘  └──────────────┘  └───────────────────┘   │
//! └──────────────────────────────────────────────────────────────┘
//!                              │
//! ┌──────────────────────────────────────────────────────────────┐
//! │        Transport (tokio-tungstenite WebSocket / memory)      │
//! └──────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Module Structure
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`connection`] | Connection handles and the connection registry |
//! | [`group`] | Group membership table |
//! | [`lifetime`] | Registration and fan-out |
//! | [`clients`] | Client proxies used by hub code |
//! | [`pump`] | Per-connection lifecycle and read/write loops |
//! | [`dispatcher`] | Invocation binding, authorization and execution |
//! | [`hub`] / [`handler`] / [`extractor`] | Defining hubs and methods |
//! | [`protocol`] | Handshake and the JSON hub protocol |
//! | [`transport`] / [`server`] | Transports and WebSocket hosting |
//!
//! ## Quick Start
//!
//! ```ignore
//! use hubforge_core::prelude::*;
//!
//! async fn send(ctx: HubCallContext, Arg(text): Arg<String>) -> Result<()> {
//!     let from = ctx.user_id().unwrap_or("anonymous").to_string();
//!     ctx.clients().all().invoke("Receive", vec![from.into(), text.into()]).await
//! }
//!
//! #[tokio::main]
//! async fn main() -> Result<()> {
//!     let hub = Hub::builder().method("Send", method(send)).build()?;
//!     let handler = HubConnectionHandler::builder(hub).build();
//!
//!     HubServer::new(handler).listen("127.0.0.1:8080").await
//! }
//! ```

#![cfg_attr(docsrs, feature(doc_cfg))]
#![warn(missing_docs)]
#![warn(rustdoc::missing_crate_level_docs)]

pub mod auth;
pub mod clients;
pub mod connection;
pub mod context;
pub mod dispatcher;
pub mod error;
pub mod extractor;
pub mod frame;
pub mod group;
pub mod handler;
pub mod hub;
pub mod lifetime;
pub mod message;
pub mod options;
pub mod protocol;
pub mod pump;
pub mod server;
pub mod state;
pub mod transport;

pub use auth::{Authorizer, Identity, NameUserIdProvider, RoleAuthorizer, UserIdProvider};
pub use clients::{ClientProxy, ClientTarget, GroupManager, HubCallerClients, HubClients};
pub use connection::{Connection, ConnectionId, ConnectionInfo};
pub use context::{HubCallContext, HubContext};
pub use error::{Error, Result};
pub use extractor::{Arg, ConnectInfo, FromInvocation, Json, State};
pub use frame::{Frame, FrameKind};
pub use handler::{HubMethod, IntoHubResult, method, stream};
pub use hub::{Hub, HubBuilder};
pub use lifetime::{DefaultHubLifetimeManager, HubLifetimeManager};
pub use message::{HubMessage, SerializedHubMessage};
pub use options::HubOptions;
pub use protocol::{HubProtocol, JsonHubProtocol, TransferFormat};
pub use pump::{ConnectionState, HubConnectionHandler};
pub use server::{HubServer, UpgradeRequest, query_param};
pub use state::AppState;
pub use transport::{MemoryTransport, Transport, WebSocketTransport};

/// Commonly used types and traits for HubForge applications.
///
/// ```ignore
/// use hubforge_core::prelude::*;
/// ```
///
/// # Included Types
///
/// - **Hubs**: [`Hub`], [`HubMethod`], [`method()`], [`stream()`]
/// - **Extractors**: [`Arg<T>`], [`Json<T>`], [`State<T>`], [`ConnectInfo`]
/// - **Contexts**: [`HubCallContext`], [`HubContext`]
/// - **Hosting**: [`HubConnectionHandler`], [`HubServer`], [`HubOptions`]
/// - **Errors**: [`Error`], [`Result`]
pub mod prelude {
    pub use crate::auth::{Identity, UserIdProvider};
    pub use crate::clients::{ClientProxy, GroupManager, HubCallerClients, HubClients};
    pub use crate::connection::{Connection, ConnectionId, ConnectionInfo};
    pub use crate::context::{HubCallContext, HubContext};
    pub use crate::error::{Error, Result};
    pub use crate::extractor::{Arg, ConnectInfo, Json, State};
    pub use crate::handler::{HubMethod, method, stream};
    pub use crate::hub::Hub;
    pub use crate::lifetime::{DefaultHubLifetimeManager, HubLifetimeManager};
    pub use crate::options::HubOptions;
    pub use crate::pump::HubConnectionHandler;
    pub use crate::server::{HubServer, UpgradeRequest, query_param};
    pub use crate::state::AppState;
    pub use crate::transport::MemoryTransport;
    pub use tokio_util::sync::CancellationToken;
}
