//! Per-connection message pump.
//!
//! Every transport handed to [`HubConnectionHandler::run_connection`] gets a
//! [`ConnectionPump`], which walks it through four states:
//!
//! ```text
//! Negotiating ──ok──> Active ──fault / close──> Draining ──> Closed
//!      │                                                       ▲
//!      └──────────────── handshake failed ─────────────────────┘
//! ```
//!
//! - **Negotiating**: read the handshake request, pick a protocol, answer.
//!   Nothing is registered until this succeeds.
//! - **Active**: the read loop (in the pump task) parses inbound messages and
//!   hands invocations to the dispatcher, one spawned task each. A separate
//!   write task drains the connection's outbound queue into the transport
//!   and sends keep-alive pings.
//! - **Draining**: abort is signaled, streaming invocations are cancelled,
//!   every dispatched task is awaited, and the write task flushes what is
//!   queued, sends a Close message and closes the transport.
//! - **Closed**: the hub's disconnected hook runs, then the lifetime manager
//!   forgets the connection. This happens exactly once per registered
//!   connection, before the pump returns.
//!
//! A fault on one connection (transport error, undecodable bytes, oversized
//! message, client timeout) ends that connection only.

use crate::auth::{Authorizer, NameUserIdProvider, RoleAuthorizer, UserIdProvider};
use crate::connection::{Connection, ConnectionId, ConnectionInfo, generate_connection_id};
use crate::context::HubContext;
use crate::dispatcher::{HubDispatcher, InvocationTable};
use crate::error::{Error, Result};
use crate::frame::{Frame, FrameKind};
use crate::hub::Hub;
use crate::lifetime::{DefaultHubLifetimeManager, HubLifetimeManager};
use crate::message::{CloseMessage, HubMessage, SerializedHubMessage};
use crate::options::HubOptions;
use crate::protocol::handshake::{HandshakeRequest, HandshakeResponse};
use crate::protocol::{HubProtocol, HubProtocolResolver, JsonHubProtocol, TransferFormat};
use crate::state::AppState;
use crate::transport::Transport;
use bytes::BytesMut;
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tokio::time::{Instant, Interval, MissedTickBehavior, interval_at, timeout};
use tracing::{debug, error, info, warn};

/// Where a connection is in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// Waiting for the handshake.
    Negotiating,
    /// Exchanging hub messages.
    Active,
    /// Shutting down.
    Draining,
    /// Done.
    Closed,
}

struct Shared {
    dispatcher: HubDispatcher,
    lifetime: Arc<dyn HubLifetimeManager>,
    protocols: HubProtocolResolver,
    options: Arc<HubOptions>,
    user_ids: Arc<dyn UserIdProvider>,
}

impl Shared {
    fn close_error(&self, error: &Error) -> String {
        if self.options.enable_detailed_errors {
            format!("Connection closed with an error. {}", error)
        } else {
            "Connection closed with an error.".to_string()
        }
    }
}

/// Runs hub connections over any [`Transport`].
///
/// Holds everything shared between connections: the hub, the lifetime
/// manager, protocols, options and application state.
///
/// ```ignore
/// use hubforge::prelude::*;
///
/// let handler = HubConnectionHandler::builder(hub)
///     .options(HubOptions::new().with_detailed_errors(true))
///     .state(state)
///     .build();
///
/// let (server_end, client_end) = MemoryTransport::pair();
/// tokio::spawn(handler.run_connection(server_end, ConnectionInfo::default()));
/// ```
#[derive(Clone)]
pub struct HubConnectionHandler {
    shared: Arc<Shared>,
}

impl HubConnectionHandler {
    /// Starts building a handler for `hub`.
    pub fn builder(hub: Hub) -> HubConnectionHandlerBuilder {
        HubConnectionHandlerBuilder::new(hub)
    }

    /// A context for pushing messages to clients from outside the hub.
    pub fn hub_context(&self) -> HubContext {
        HubContext::new(self.shared.lifetime.clone())
    }

    /// The lifetime manager shared by every connection.
    pub fn lifetime(&self) -> &Arc<dyn HubLifetimeManager> {
        &self.shared.lifetime
    }

    /// The options every connection runs with.
    pub fn options(&self) -> &HubOptions {
        &self.shared.options
    }

    /// Runs one connection to completion.
    pub async fn run_connection<T: Transport>(self, transport: T, info: ConnectionInfo) {
        ConnectionPump::new(self.shared.clone(), info)
            .run(transport)
            .await;
    }
}

/// Builder for [`HubConnectionHandler`].
pub struct HubConnectionHandlerBuilder {
    hub: Hub,
    lifetime: Option<Arc<dyn HubLifetimeManager>>,
    protocols: Vec<Arc<dyn HubProtocol>>,
    options: HubOptions,
    authorizer: Arc<dyn Authorizer>,
    user_ids: Arc<dyn UserIdProvider>,
    state: AppState,
}

impl HubConnectionHandlerBuilder {
    fn new(hub: Hub) -> Self {
        Self {
            hub,
            lifetime: None,
            protocols: Vec::new(),
            options: HubOptions::default(),
            authorizer: Arc::new(RoleAuthorizer),
            user_ids: Arc::new(NameUserIdProvider),
            state: AppState::new(),
        }
    }

    /// Uses `lifetime` instead of a fresh [`DefaultHubLifetimeManager`].
    pub fn lifetime(mut self, lifetime: Arc<dyn HubLifetimeManager>) -> Self {
        self.lifetime = Some(lifetime);
        self
    }

    /// Offers `protocol` to clients. Defaults to JSON only.
    pub fn protocol(mut self, protocol: Arc<dyn HubProtocol>) -> Self {
        self.protocols.push(protocol);
        self
    }

    /// Sets connection options.
    pub fn options(mut self, options: HubOptions) -> Self {
        self.options = options;
        self
    }

    /// Sets the authorizer used for hub and method policies.
    pub fn authorizer(mut self, authorizer: Arc<dyn Authorizer>) -> Self {
        self.authorizer = authorizer;
        self
    }

    /// Sets how connections map to user ids.
    pub fn user_id_provider(mut self, provider: Arc<dyn UserIdProvider>) -> Self {
        self.user_ids = provider;
        self
    }

    /// Sets the shared application state.
    pub fn state(mut self, state: AppState) -> Self {
        self.state = state;
        self
    }

    /// Builds the handler.
    pub fn build(self) -> HubConnectionHandler {
        let lifetime = self
            .lifetime
            .unwrap_or_else(|| Arc::new(DefaultHubLifetimeManager::new()));
        let mut protocols = self.protocols;
        if protocols.is_empty() {
            protocols.push(Arc::new(JsonHubProtocol::new()));
        }
        let options = Arc::new(self.options);
        let dispatcher = HubDispatcher::new(
            Arc::new(self.hub),
            lifetime.clone(),
            self.authorizer,
            options.clone(),
            self.state,
        );

        HubConnectionHandler {
            shared: Arc::new(Shared {
                dispatcher,
                lifetime,
                protocols: HubProtocolResolver::new(
                    protocols,
                    options.supported_protocols.clone(),
                ),
                options,
                user_ids: self.user_ids,
            }),
        }
    }
}

enum Flow {
    Continue,
    Close,
}

type Outbound = mpsc::UnboundedReceiver<Arc<SerializedHubMessage>>;

/// Drives one connection through its lifecycle.
pub struct ConnectionPump {
    id: ConnectionId,
    state: ConnectionState,
    shared: Arc<Shared>,
    info: ConnectionInfo,
}

impl ConnectionPump {
    fn new(shared: Arc<Shared>, info: ConnectionInfo) -> Self {
        Self {
            id: generate_connection_id(),
            state: ConnectionState::Negotiating,
            shared,
            info,
        }
    }

    /// The current state.
    pub fn state(&self) -> ConnectionState {
        self.state
    }

    fn transition(&mut self, next: ConnectionState) {
        debug!("{}: {:?} -> {:?}", self.id, self.state, next);
        self.state = next;
    }

    /// Runs the connection over `transport` until it is closed.
    pub async fn run<T: Transport>(mut self, transport: T) {
        let (mut sink, mut stream) = transport.split();
        debug!("{}: {:?}", self.id, self.state);

        let negotiated = timeout(
            self.shared.options.handshake_timeout,
            self.read_handshake(&mut stream),
        )
        .await
        .unwrap_or_else(|_| Err(Error::Handshake("Handshake was canceled.".to_string())));

        let (protocol, leftover) = match negotiated {
            Ok(Some(accepted)) => accepted,
            Ok(None) => {
                debug!("{} went away during the handshake", self.id);
                let _ = sink.close().await;
                self.transition(ConnectionState::Closed);
                return;
            }
            Err(Error::Handshake(reason)) => {
                info!("Handshake rejected for {}: {}", self.id, reason);
                if let Err(e) = send_handshake(&mut sink, HandshakeResponse::error(reason)).await {
                    debug!("Handshake error not delivered to {}: {}", self.id, e);
                }
                let _ = sink.close().await;
                self.transition(ConnectionState::Closed);
                return;
            }
            Err(e) => {
                warn!("Handshake failed for {}: {}", self.id, e);
                let _ = sink.close().await;
                self.transition(ConnectionState::Closed);
                return;
            }
        };

        if let Err(e) = send_handshake(&mut sink, HandshakeResponse::ok()).await {
            warn!("Failed to answer handshake for {}: {}", self.id, e);
            self.transition(ConnectionState::Closed);
            return;
        }

        let user_id = self.shared.user_ids.user_id(&self.info);
        let (connection, outbound) =
            Connection::new(self.id.clone(), user_id, self.info.clone(), protocol);
        info!(
            "Hub connection established: {} (protocol: {}, user: {:?})",
            self.id,
            connection.protocol().name(),
            connection.user_id()
        );

        let writer = tokio::spawn(write_loop(
            connection.clone(),
            outbound,
            sink,
            self.shared.options.keep_alive_interval,
            self.shared.clone(),
        ));

        let mut registered = false;
        match self.shared.lifetime.on_connected(&connection).await {
            Ok(()) => registered = true,
            Err(e) => {
                error!("Failed to register {}: {}", self.id, e);
                connection.abort_with_error(self.shared.close_error(&e));
            }
        }
        if registered {
            if let Err(e) = self.shared.dispatcher.on_connected(&connection).await {
                warn!("Connected hook failed for {}: {}", self.id, e);
                connection.abort_with_error(self.shared.close_error(&e));
            }
        }

        let table = Arc::new(InvocationTable::new());
        let mut tasks = JoinSet::new();

        if !connection.is_aborted() {
            self.transition(ConnectionState::Active);
            self.read_loop(&connection, &table, &mut tasks, &mut stream, leftover)
                .await;
        }

        self.transition(ConnectionState::Draining);
        connection.abort();
        table.cancel_all();
        while let Some(result) = tasks.join_next().await {
            if let Err(e) = result {
                warn!("Invocation task for {} ended abnormally: {}", self.id, e);
            }
        }
        match writer.await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => debug!("Write loop for {} ended with: {}", self.id, e),
            Err(e) => error!("Write loop for {} panicked: {}", self.id, e),
        }

        self.transition(ConnectionState::Closed);
        if registered {
            self.shared
                .dispatcher
                .on_disconnected(&connection, connection.close_error())
                .await;
        }
        if let Err(e) = self.shared.lifetime.on_disconnected(&connection).await {
            error!("Failed to unregister {}: {}", self.id, e);
        }
        info!("Hub connection closed: {}", self.id);
    }

    /// Reads and vets the handshake request.
    ///
    /// `Ok(None)` means the client went away first. A request the server
    /// cannot serve is an [`Error::Handshake`] carrying the client-facing
    /// reason.
    async fn read_handshake<T: Transport>(
        &self,
        stream: &mut SplitStream<T>,
    ) -> Result<Option<(Arc<dyn HubProtocol>, BytesMut)>> {
        let max = self.shared.options.maximum_receive_message_size;
        let mut buffer = BytesMut::new();

        let request = loop {
            if let Some(request) = HandshakeRequest::parse(&mut buffer)? {
                break request;
            }
            if let Some(max) = max {
                if buffer.len() > max {
                    return Err(Error::MessageTooLarge(max));
                }
            }
            match stream.next().await {
                Some(Ok(frame)) if frame.is_data() => buffer.extend_from_slice(&frame.data),
                Some(Ok(frame)) if frame.is_close() => return Ok(None),
                Some(Ok(_)) => continue,
                Some(Err(e)) => return Err(e),
                None => return Ok(None),
            }
        };

        debug!(
            "{} requested protocol '{}' v{}",
            self.id, request.protocol, request.version
        );
        let Some(protocol) = self.shared.protocols.get(&request.protocol) else {
            return Err(Error::Handshake(format!(
                "The protocol '{}' is not supported.",
                request.protocol
            )));
        };
        if !protocol.is_version_supported(request.version) {
            return Err(Error::Handshake(format!(
                "The server does not support version {} of the '{}' protocol.",
                request.version, request.protocol
            )));
        }
        Ok(Some((protocol, buffer)))
    }

    async fn read_loop<T: Transport>(
        &mut self,
        connection: &Connection,
        table: &Arc<InvocationTable>,
        tasks: &mut JoinSet<()>,
        stream: &mut SplitStream<T>,
        mut buffer: BytesMut,
    ) {
        let client_timeout = self.shared.options.client_timeout_interval;

        // Bytes that arrived with the handshake.
        match self.process_buffer(connection, table, tasks, &mut buffer) {
            Ok(Flow::Continue) => {}
            Ok(Flow::Close) => return,
            Err(e) => {
                warn!("Closing {}: {}", self.id, e);
                connection.abort_with_error(self.shared.close_error(&e));
                return;
            }
        }

        loop {
            while let Some(result) = tasks.try_join_next() {
                if let Err(e) = result {
                    if e.is_panic() {
                        error!("Invocation task panicked on {}", self.id);
                        connection.abort_with_error(
                            self.shared.close_error(&Error::custom("invocation task panicked")),
                        );
                        return;
                    }
                }
            }

            let next = tokio::select! {
                _ = connection.abort_token().cancelled() => return,
                next = read_frame(stream, client_timeout) => next,
            };

            let frame = match next {
                Ok(Some(frame)) => frame,
                Ok(None) => {
                    debug!("Transport closed by {}", self.id);
                    return;
                }
                Err(e) => {
                    warn!("Closing {}: {}", self.id, e);
                    connection.abort_with_error(self.shared.close_error(&e));
                    return;
                }
            };

            match frame.kind {
                FrameKind::Close => {
                    debug!("Close frame received from {}", self.id);
                    return;
                }
                FrameKind::Ping | FrameKind::Pong => continue,
                FrameKind::Text | FrameKind::Binary => {
                    buffer.extend_from_slice(&frame.data);
                    match self.process_buffer(connection, table, tasks, &mut buffer) {
                        Ok(Flow::Continue) => {}
                        Ok(Flow::Close) => return,
                        Err(e) => {
                            warn!("Closing {}: {}", self.id, e);
                            connection.abort_with_error(self.shared.close_error(&e));
                            return;
                        }
                    }
                }
            }
        }
    }

    fn process_buffer(
        &self,
        connection: &Connection,
        table: &Arc<InvocationTable>,
        tasks: &mut JoinSet<()>,
        buffer: &mut BytesMut,
    ) -> Result<Flow> {
        let max = self.shared.options.maximum_receive_message_size;
        let protocol = connection.protocol().clone();

        loop {
            let before = buffer.len();
            let Some(message) = protocol.parse_message(buffer)? else {
                break;
            };
            if let Some(max) = max {
                if before - buffer.len() > max {
                    return Err(Error::MessageTooLarge(max));
                }
            }

            debug!("📨 {} from {}", message.kind(), self.id);
            match message {
                HubMessage::Invocation(invocation) => {
                    let work = self
                        .shared
                        .dispatcher
                        .dispatch(connection, table, invocation, false);
                    tasks.spawn(work);
                }
                HubMessage::StreamInvocation(invocation) => {
                    let work = self
                        .shared
                        .dispatcher
                        .dispatch(connection, table, invocation, true);
                    tasks.spawn(work);
                }
                HubMessage::CancelInvocation(cancel) => {
                    if !table.cancel(&cancel.invocation_id) {
                        debug!(
                            "Cancel for unknown invocation '{}' from {}",
                            cancel.invocation_id, self.id
                        );
                    }
                }
                HubMessage::Ping => {}
                HubMessage::Close(close) => {
                    debug!("{} sent Close (error: {:?})", self.id, close.error);
                    return Ok(Flow::Close);
                }
                // Client results and upload streams are not supported.
                HubMessage::Completion(_) | HubMessage::StreamItem(_) => {
                    debug!("Ignoring {} from {}", message.kind(), self.id);
                }
            }
        }

        if let Some(max) = max {
            if buffer.len() > max {
                return Err(Error::MessageTooLarge(max));
            }
        }
        Ok(Flow::Continue)
    }
}

async fn send_handshake<S>(sink: &mut S, response: HandshakeResponse) -> Result<()>
where
    S: futures_util::Sink<Frame, Error = Error> + Unpin,
{
    let bytes = response.to_bytes()?;
    sink.send(Frame::for_format(bytes, TransferFormat::Text)).await
}

async fn read_frame<T: Transport>(
    stream: &mut SplitStream<T>,
    client_timeout: Option<Duration>,
) -> Result<Option<Frame>> {
    let next = match client_timeout {
        Some(limit) => timeout(limit, stream.next())
            .await
            .map_err(|_| Error::ClientTimeout)?,
        None => stream.next().await,
    };
    next.transpose()
}

async fn tick(keep_alive: &mut Option<Interval>) {
    match keep_alive {
        Some(interval) => {
            interval.tick().await;
        }
        None => std::future::pending().await,
    }
}

async fn write_frame<T: Transport>(
    sink: &mut SplitSink<T, Frame>,
    connection: &Connection,
    message: &SerializedHubMessage,
) -> Result<()> {
    let protocol = connection.protocol();
    let bytes = message.serialized(protocol.as_ref())?;
    sink.send(Frame::for_format(bytes, protocol.transfer_format()))
        .await
}

async fn write_loop<T: Transport>(
    connection: Connection,
    mut outbound: Outbound,
    mut sink: SplitSink<T, Frame>,
    keep_alive: Option<Duration>,
    shared: Arc<Shared>,
) -> Result<()> {
    debug!("Write loop started for {}", connection.id());
    let mut keep_alive = keep_alive.map(|period| {
        let mut interval = interval_at(Instant::now() + period, period);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        interval
    });
    let ping = SerializedHubMessage::new(HubMessage::Ping);

    loop {
        let result = tokio::select! {
            biased;
            next = outbound.recv() => match next {
                Some(message) => {
                    let sent = write_frame(&mut sink, &connection, &message).await;
                    if let Some(interval) = keep_alive.as_mut() {
                        interval.reset();
                    }
                    sent
                }
                None => break,
            },
            _ = connection.abort_token().cancelled() => break,
            _ = tick(&mut keep_alive) => {
                debug!("Sending keep-alive to {}", connection.id());
                write_frame(&mut sink, &connection, &ping).await
            }
        };

        if let Err(e) = result {
            warn!("Failed to write to {}: {}", connection.id(), e);
            connection.abort_with_error(shared.close_error(&e));
            let _ = sink.close().await;
            return Err(e);
        }
    }

    // Flush what was queued before the abort, then say goodbye.
    outbound.close();
    while let Ok(message) = outbound.try_recv() {
        write_frame(&mut sink, &connection, &message).await?;
    }
    let close = SerializedHubMessage::new(HubMessage::Close(CloseMessage {
        error: connection.close_error(),
        allow_reconnect: false,
    }));
    write_frame(&mut sink, &connection, &close).await?;
    sink.close().await?;
    debug!("Write loop ended for {}", connection.id());
    Ok(())
}
