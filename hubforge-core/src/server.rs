//! WebSocket hosting for a hub.
//!
//! [`HubServer`] accepts TCP connections, upgrades them to WebSocket and runs
//! each one through a [`HubConnectionHandler`]. An optional identify callback
//! turns the upgrade request into an [`Identity`]; without one every
//! connection is anonymous.
//!
//! # Examples
//!
//! ```ignore
//! use hubforge::prelude::*;
//!
//! #[tokio::main]
//! async fn main() -> Result<()> {
//!     let hub = Hub::builder().method("Echo", method(echo)).build()?;
//!
//!     HubServer::new(HubConnectionHandler::builder(hub).build())
//!         .identify(|req| match query_param(req, "user") {
//!             Some(name) => Identity::named(name),
//!             None => Identity::anonymous(),
//!         })
//!         .listen("127.0.0.1:8080")
//!         .await
//! }
//! ```

use crate::auth::Identity;
use crate::connection::ConnectionInfo;
use crate::error::{Error, Result};
use crate::pump::HubConnectionHandler;
use crate::transport::WebSocketTransport;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::{TcpListener, TcpStream};
use tokio_tungstenite::accept_hdr_async;
use tokio_tungstenite::tungstenite::handshake::server::{ErrorResponse, Response};
use tracing::{debug, error, info};

/// The HTTP upgrade request of an incoming WebSocket connection.
pub use tokio_tungstenite::tungstenite::handshake::server::Request as UpgradeRequest;

type IdentifyFn = Arc<dyn Fn(&UpgradeRequest) -> Identity + Send + Sync>;

/// Serves a hub over WebSocket.
#[derive(Clone)]
pub struct HubServer {
    handler: HubConnectionHandler,
    identify: Option<IdentifyFn>,
}

impl HubServer {
    /// Creates a server for `handler`.
    pub fn new(handler: HubConnectionHandler) -> Self {
        Self {
            handler,
            identify: None,
        }
    }

    /// Derives each connection's identity from its upgrade request.
    pub fn identify<F>(mut self, f: F) -> Self
    where
        F: Fn(&UpgradeRequest) -> Identity + Send + Sync + 'static,
    {
        self.identify = Some(Arc::new(f));
        self
    }

    /// The connection handler.
    pub fn handler(&self) -> &HubConnectionHandler {
        &self.handler
    }

    /// Binds `addr` and serves until the listener fails.
    pub async fn listen(self, addr: impl AsRef<str>) -> Result<()> {
        let addr: SocketAddr = addr
            .as_ref()
            .parse()
            .map_err(|e| Error::custom(format!("Invalid address: {}", e)))?;

        let listener = TcpListener::bind(addr).await?;
        info!("Hub server listening on {}", addr);
        self.serve(listener).await
    }

    /// Serves connections from an already bound listener.
    pub async fn serve(self, listener: TcpListener) -> Result<()> {
        let server = Arc::new(self);
        loop {
            let (stream, peer_addr) = listener.accept().await?;
            let server = server.clone();

            tokio::spawn(async move {
                if let Err(e) = server.handle_connection(stream, peer_addr).await {
                    error!("Connection error: {}", e);
                }
            });
        }
    }

    async fn handle_connection(&self, stream: TcpStream, peer_addr: SocketAddr) -> Result<()> {
        let mut identity = Identity::anonymous();
        let identify = self.identify.clone();

        let callback = |req: &UpgradeRequest, response: Response| -> std::result::Result<Response, ErrorResponse> {
            debug!("Upgrade request from {}: {}", peer_addr, req.uri());
            if let Some(identify) = identify {
                identity = identify(req);
            }
            Ok(response)
        };
        let ws_stream = accept_hdr_async(stream, callback).await?;

        let info = ConnectionInfo::new(Some(peer_addr), identity);
        self.handler
            .clone()
            .run_connection(WebSocketTransport::new(ws_stream), info)
            .await;
        Ok(())
    }
}

/// Reads a query string parameter from an upgrade request.
///
/// Values are returned as sent; percent-encoding is not decoded.
pub fn query_param(req: &UpgradeRequest, name: &str) -> Option<String> {
    req.uri().query()?.split('&').find_map(|pair| {
        let (key, value) = pair.split_once('=').unwrap_or((pair, ""));
        (key == name).then(|| value.to_string())
    })
}
