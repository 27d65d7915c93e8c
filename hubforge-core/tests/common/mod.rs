#![allow(dead_code)]

use bytes::BytesMut;
use futures_util::stream::{self, Stream};
use futures_util::{SinkExt, StreamExt};
use hubforge_core::message::{CancelInvocationMessage, CompletionMessage, InvocationMessage};
use hubforge_core::protocol::handshake::{HandshakeRequest, HandshakeResponse};
use hubforge_core::{
    AppState, Arg, ConnectionInfo, DefaultHubLifetimeManager, Error, Frame, Hub, HubCallContext,
    HubConnectionHandler, HubMessage, HubOptions, HubProtocol, Identity, JsonHubProtocol,
    MemoryTransport, Result, State, method, stream as stream_method,
};
use serde_json::Value;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::{sleep, timeout};

const WAIT: Duration = Duration::from_secs(5);

/// Records lifecycle hook calls.
#[derive(Default)]
pub struct Hooks {
    pub connected: AtomicUsize,
    pub disconnected: AtomicUsize,
    pub last_error: Mutex<Option<String>>,
}

async fn echo(Arg(text): Arg<String>) -> String {
    text
}

async fn add(Arg(a): Arg<i64>, Arg(b): Arg<i64>) -> i64 {
    a + b
}

async fn who_am_i(ctx: HubCallContext) -> String {
    ctx.connection_id().clone()
}

async fn fail() -> Result<()> {
    Err(Error::custom("database is down"))
}

async fn reject() -> Result<()> {
    Err(Error::hub("Room is full"))
}

async fn noop() {}

async fn join_group(ctx: HubCallContext, Arg(group): Arg<String>) -> Result<()> {
    ctx.groups().add_to_group(ctx.connection_id(), &group).await
}

async fn leave_group(ctx: HubCallContext, Arg(group): Arg<String>) -> Result<()> {
    ctx.groups()
        .remove_from_group(ctx.connection_id(), &group)
        .await
}

async fn send_to_group(
    ctx: HubCallContext,
    Arg(group): Arg<String>,
    Arg(text): Arg<String>,
) -> Result<()> {
    ctx.clients()
        .group(group)
        .invoke("Receive", vec![text.into()])
        .await
}

async fn send_to_others(ctx: HubCallContext, Arg(text): Arg<String>) -> Result<()> {
    ctx.clients()
        .others()
        .invoke("Receive", vec![text.into()])
        .await
}

async fn send_to_user(
    ctx: HubCallContext,
    Arg(user): Arg<String>,
    Arg(text): Arg<String>,
) -> Result<()> {
    ctx.clients()
        .user(user)
        .invoke("Receive", vec![text.into()])
        .await
}

async fn connected_count(State(hooks): State<Hooks>) -> usize {
    hooks.connected.load(Ordering::SeqCst)
}

fn counter(Arg(n): Arg<u32>) -> impl Stream<Item = Result<u32>> + Send {
    stream::iter((1..=n).map(Ok))
}

/// Yields 1 right away; every later item takes far longer than any test.
fn gated() -> impl Stream<Item = Result<u32>> + Send {
    stream::unfold(1u32, |n| async move {
        if n > 1 {
            sleep(Duration::from_secs(60)).await;
        }
        Some((Ok(n), n + 1))
    })
    .take(3)
}

fn broken(Arg(n): Arg<u32>) -> impl Stream<Item = Result<u32>> + Send {
    stream::iter((1..=n).map(Ok).chain(std::iter::once(Err(Error::hub("sensor offline")))))
}

pub fn test_hub() -> Hub {
    Hub::builder()
        .method("Echo", method(echo))
        .method("Add", method(add))
        .method("WhoAmI", method(who_am_i))
        .method("Fail", method(fail))
        .method("Reject", method(reject))
        .method("Admin", method(noop).authorize("admin"))
        .method("JoinGroup", method(join_group))
        .method("LeaveGroup", method(leave_group))
        .method("SendToGroup", method(send_to_group))
        .method("SendToOthers", method(send_to_others))
        .method("SendToUser", method(send_to_user))
        .method("ConnectedCount", method(connected_count))
        .method("Counter", stream_method(counter))
        .method("Gated", stream_method(gated))
        .method("Broken", stream_method(broken))
        .on_connected(|ctx: HubCallContext| async move {
            if let Some(hooks) = ctx.state().get::<Hooks>() {
                hooks.connected.fetch_add(1, Ordering::SeqCst);
            }
            Ok(())
        })
        .on_disconnected(|ctx: HubCallContext, error: Option<String>| async move {
            if let Some(hooks) = ctx.state().get::<Hooks>() {
                hooks.disconnected.fetch_add(1, Ordering::SeqCst);
                if let Ok(mut last) = hooks.last_error.lock() {
                    *last = error;
                }
            }
            Ok(())
        })
        .build()
        .unwrap()
}

/// Options without keep-alives so tests only see what they ask for.
pub fn quiet_options() -> HubOptions {
    HubOptions::new().with_keep_alive_interval(None)
}

pub struct TestServer {
    pub handler: HubConnectionHandler,
    pub lifetime: Arc<DefaultHubLifetimeManager>,
    pub hooks: Arc<Hooks>,
}

impl TestServer {
    pub fn new(options: HubOptions) -> Self {
        Self::with_hub(test_hub(), options)
    }

    pub fn with_hub(hub: Hub, options: HubOptions) -> Self {
        let lifetime = Arc::new(DefaultHubLifetimeManager::new());
        let hooks = Arc::new(Hooks::default());
        let state = AppState::new();
        state.insert(hooks.clone());

        let handler = HubConnectionHandler::builder(hub)
            .lifetime(lifetime.clone())
            .options(options)
            .state(state)
            .build();

        Self {
            handler,
            lifetime,
            hooks,
        }
    }

    /// Starts a connection and returns the client end without negotiating.
    pub fn open(&self, identity: Identity) -> (TestClient, JoinHandle<()>) {
        let (server_end, client_end) = MemoryTransport::pair();
        let info = ConnectionInfo::new(None, identity);
        let pump = tokio::spawn(self.handler.clone().run_connection(server_end, info));
        (TestClient::new(client_end), pump)
    }

    /// Connects, negotiates JSON and waits until the connection is registered.
    pub async fn connect(&self, identity: Identity) -> (TestClient, JoinHandle<()>) {
        let before = self.hooks.connected.load(Ordering::SeqCst);
        let (mut client, pump) = self.open(identity);
        let response = client.handshake("json", 1).await;
        assert_eq!(response, Some(HandshakeResponse::ok()));
        wait_until(|| self.hooks.connected.load(Ordering::SeqCst) > before).await;
        (client, pump)
    }

    pub fn connection_count(&self) -> usize {
        self.lifetime.connections().count()
    }
}

pub async fn wait_until(mut condition: impl FnMut() -> bool) {
    timeout(WAIT, async {
        while !condition() {
            sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("condition not met in time");
}

/// A minimal JSON hub protocol client.
pub struct TestClient {
    transport: MemoryTransport,
    buffer: BytesMut,
    protocol: JsonHubProtocol,
}

impl TestClient {
    fn new(transport: MemoryTransport) -> Self {
        Self {
            transport,
            buffer: BytesMut::new(),
            protocol: JsonHubProtocol::new(),
        }
    }

    pub async fn send_text(&mut self, text: &str) {
        self.transport.send(Frame::text(text)).await.unwrap();
    }

    pub async fn handshake(&mut self, protocol: &str, version: u32) -> Option<HandshakeResponse> {
        let request = HandshakeRequest::new(protocol, version).to_bytes().unwrap();
        self.send_text(std::str::from_utf8(&request).unwrap()).await;
        self.read_handshake().await
    }

    pub async fn read_handshake(&mut self) -> Option<HandshakeResponse> {
        timeout(WAIT, async {
            loop {
                if let Some(response) = HandshakeResponse::parse(&mut self.buffer).unwrap() {
                    return Some(response);
                }
                if !self.fill().await {
                    return None;
                }
            }
        })
        .await
        .expect("timed out waiting for the handshake response")
    }

    pub async fn send(&mut self, message: HubMessage) {
        let bytes = self.protocol.write_message(&message).unwrap();
        self.send_text(std::str::from_utf8(&bytes).unwrap()).await;
    }

    pub async fn invoke(&mut self, id: &str, target: &str, args: Vec<Value>) {
        self.send(HubMessage::Invocation(InvocationMessage::with_id(
            id, target, args,
        )))
        .await;
    }

    pub async fn stream(&mut self, id: &str, target: &str, args: Vec<Value>) {
        self.send(HubMessage::StreamInvocation(InvocationMessage::with_id(
            id, target, args,
        )))
        .await;
    }

    pub async fn cancel(&mut self, id: &str) {
        self.send(HubMessage::CancelInvocation(CancelInvocationMessage {
            invocation_id: id.to_string(),
        }))
        .await;
    }

    /// Invokes `target` and returns its completion.
    pub async fn call(&mut self, id: &str, target: &str, args: Vec<Value>) -> CompletionMessage {
        self.invoke(id, target, args).await;
        self.completion().await
    }

    pub async fn completion(&mut self) -> CompletionMessage {
        match self.recv().await {
            Some(HubMessage::Completion(completion)) => completion,
            other => panic!("expected a completion, got {:?}", other),
        }
    }

    /// Next message other than a ping, or `None` once the server hung up.
    pub async fn recv(&mut self) -> Option<HubMessage> {
        loop {
            match self.recv_any().await {
                Some(HubMessage::Ping) => continue,
                other => return other,
            }
        }
    }

    pub async fn recv_any(&mut self) -> Option<HubMessage> {
        timeout(WAIT, async {
            loop {
                if let Some(message) = self.protocol.parse_message(&mut self.buffer).unwrap() {
                    return Some(message);
                }
                if !self.fill().await {
                    return None;
                }
            }
        })
        .await
        .expect("timed out waiting for a message")
    }

    /// Asserts nothing but pings arrives within `window`.
    pub async fn assert_silent(&mut self, window: Duration) {
        let result = timeout(window, async {
            loop {
                if let Some(message) = self.protocol.parse_message(&mut self.buffer).unwrap() {
                    if message != HubMessage::Ping {
                        return message;
                    }
                    continue;
                }
                if !self.fill().await {
                    std::future::pending::<()>().await;
                }
            }
        })
        .await;
        if let Ok(message) = result {
            panic!("expected silence, got {:?}", message);
        }
    }

    /// Returns `true` once the server has closed the transport.
    pub async fn closed(&mut self) -> bool {
        timeout(WAIT, async {
            while self.fill().await {}
        })
        .await
        .is_ok()
    }

    async fn fill(&mut self) -> bool {
        match self.transport.next().await {
            Some(Ok(frame)) if frame.is_close() => false,
            Some(Ok(frame)) => {
                if frame.is_data() {
                    self.buffer.extend_from_slice(&frame.data);
                }
                true
            }
            _ => false,
        }
    }
}
