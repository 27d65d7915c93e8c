//! Invocation dispatch.
//!
//! The [`HubDispatcher`] turns one inbound invocation into calls on the
//! hub's method table and writes the outcome back to the caller. Each
//! invocation passes through the same checks, in order; the first failure
//! produces an error completion and stops the invocation:
//!
//! 1. the method exists (names compared ignoring case);
//! 2. the caller satisfies every hub-level and method-level policy;
//! 3. the invocation kind matches the method kind (unary vs streaming);
//! 4. the arguments bind to the method's parameters;
//! 5. the method runs. Errors and panics both count as failures.
//!
//! Fire-and-forget invocations (no invocation id) go through the same steps
//! but never produce a completion.
//!
//! # Streaming
//!
//! A streaming invocation registers a cancellation token in the
//! connection's [`InvocationTable`] before any of its code runs. The token is
//! a child of the connection's abort token, so it fires when the client
//! cancels or the connection closes. Items are pulled one at a time and
//! written as they arrive; exactly one completion follows the last item.

use crate::auth::Authorizer;
use crate::connection::Connection;
use crate::context::HubCallContext;
use crate::error::{Error, Result};
use crate::handler::MethodKind;
use crate::hub::Hub;
use crate::lifetime::HubLifetimeManager;
use crate::message::{CompletionMessage, HubMessage, InvocationMessage, StreamItemMessage};
use crate::options::HubOptions;
use crate::state::AppState;
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use futures_util::FutureExt;
use futures_util::future::BoxFuture;
use futures_util::stream::StreamExt;
use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// Streaming invocations in flight on one connection.
#[derive(Default)]
pub struct InvocationTable {
    active: DashMap<String, CancellationToken>,
}

impl InvocationTable {
    /// Creates an empty table.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `token` under `id`. Returns `false` if `id` is in use.
    pub fn try_register(&self, id: &str, token: CancellationToken) -> bool {
        match self.active.entry(id.to_string()) {
            Entry::Occupied(_) => false,
            Entry::Vacant(slot) => {
                slot.insert(token);
                true
            }
        }
    }

    /// Cancels the invocation. Returns `false` for unknown ids.
    ///
    /// The id stays registered until the invocation's task calls
    /// [`complete`](Self::complete), so it cannot be reused while the
    /// cancelled stream is still winding down.
    pub fn cancel(&self, id: &str) -> bool {
        match self.active.get(id) {
            Some(token) => {
                token.cancel();
                true
            }
            None => false,
        }
    }

    /// Removes a finished invocation.
    pub fn complete(&self, id: &str) {
        self.active.remove(id);
    }

    /// Cancels every registered invocation.
    pub fn cancel_all(&self) {
        for entry in self.active.iter() {
            entry.value().cancel();
        }
    }

    /// Number of registered invocations.
    pub fn len(&self) -> usize {
        self.active.len()
    }

    /// Returns `true` if nothing is registered.
    pub fn is_empty(&self) -> bool {
        self.active.is_empty()
    }
}

/// Runs invocations against a [`Hub`].
#[derive(Clone)]
pub struct HubDispatcher {
    hub: Arc<Hub>,
    lifetime: Arc<dyn HubLifetimeManager>,
    authorizer: Arc<dyn Authorizer>,
    options: Arc<HubOptions>,
    state: AppState,
}

impl HubDispatcher {
    /// Creates a dispatcher.
    pub fn new(
        hub: Arc<Hub>,
        lifetime: Arc<dyn HubLifetimeManager>,
        authorizer: Arc<dyn Authorizer>,
        options: Arc<HubOptions>,
        state: AppState,
    ) -> Self {
        Self {
            hub,
            lifetime,
            authorizer,
            options,
            state,
        }
    }

    /// The hub being dispatched to.
    pub fn hub(&self) -> &Arc<Hub> {
        &self.hub
    }

    /// Builds a call context for `connection`.
    pub fn call_context(
        &self,
        connection: &Connection,
        cancellation: CancellationToken,
    ) -> HubCallContext {
        HubCallContext::new(
            connection.clone(),
            self.lifetime.clone(),
            self.state.clone(),
            cancellation,
        )
    }

    /// Runs the hub's connected hook for `connection`.
    pub async fn on_connected(&self, connection: &Connection) -> Result<()> {
        let ctx = self.call_context(connection, connection.abort_token().clone());
        self.hub.connected(ctx).await
    }

    /// Runs the hub's disconnected hook for `connection`. Errors are logged.
    pub async fn on_disconnected(&self, connection: &Connection, error: Option<String>) {
        let ctx = self.call_context(connection, connection.abort_token().clone());
        if let Err(e) = self.hub.disconnected(ctx, error).await {
            warn!("Disconnected hook failed for {}: {}", connection.id(), e);
        }
    }

    /// Prepares one invocation for execution.
    ///
    /// Streaming ids are registered in `table` before this returns, so a
    /// cancel that arrives right after the invocation always finds it. The
    /// returned future does the rest and must be driven to completion.
    pub fn dispatch(
        &self,
        connection: &Connection,
        table: &Arc<InvocationTable>,
        invocation: InvocationMessage,
        streaming: bool,
    ) -> BoxFuture<'static, ()> {
        let token = connection.abort_token().child_token();

        if streaming {
            let id = invocation.invocation_id.clone().unwrap_or_default();
            if !table.try_register(&id, token.clone()) {
                debug!("Duplicate invocation id '{}' from {}", id, connection.id());
                send_completion(
                    connection,
                    CompletionMessage::with_error(
                        id.clone(),
                        format!("Invocation ID '{}' is already in use.", id),
                    ),
                );
                return Box::pin(async {});
            }
        }

        let dispatcher = self.clone();
        let connection = connection.clone();
        let table = table.clone();
        Box::pin(async move {
            dispatcher
                .invoke(&connection, &table, invocation, streaming, token)
                .await;
        })
    }

    async fn invoke(
        &self,
        connection: &Connection,
        table: &InvocationTable,
        invocation: InvocationMessage,
        streaming: bool,
        token: CancellationToken,
    ) {
        let InvocationMessage {
            invocation_id,
            target,
            arguments,
        } = invocation;
        debug!(
            "Invoking '{}' for {} (id: {:?}, streaming: {})",
            target,
            connection.id(),
            invocation_id,
            streaming
        );

        let id = invocation_id.clone().unwrap_or_default();
        // Streaming ids are free again once the completion is written.
        let reply = |completion: CompletionMessage| {
            if streaming {
                table.complete(invocation_id.as_deref().unwrap_or_default());
            }
            if invocation_id.is_some() {
                send_completion(connection, completion);
            }
        };

        let Some(registered) = self.hub.method(&target) else {
            debug!("Unknown hub method '{}' invoked by {}", target, connection.id());
            reply(CompletionMessage::with_error(
                id,
                Error::MethodNotFound(target).to_string(),
            ));
            return;
        };
        let name = registered.name.clone();
        let method = registered.method.clone();

        if !self.is_authorized(connection, method.policies()).await {
            debug!("{} is not authorized to invoke '{}'", connection.id(), name);
            reply(CompletionMessage::with_error(
                id,
                format!("Failed to invoke '{}' because user is unauthorized", name),
            ));
            return;
        }

        let ctx = self.call_context(connection, token.clone());

        match (method.kind(), streaming) {
            (MethodKind::Streaming(_), false) => reply(CompletionMessage::with_error(
                id,
                format!(
                    "The client attempted to invoke the streaming '{}' method with a non-streaming invocation.",
                    name
                ),
            )),
            (MethodKind::Unary(_), true) => reply(CompletionMessage::with_error(
                id,
                format!(
                    "The client attempted to invoke the non-streaming '{}' method with a streaming invocation.",
                    name
                ),
            )),
            (MethodKind::Unary(handler), false) => {
                let bound = std::panic::catch_unwind(AssertUnwindSafe(|| {
                    handler.bind(&ctx, arguments)
                }));
                let future = match bound {
                    Ok(Ok(future)) => future,
                    Ok(Err(e)) => {
                        reply(CompletionMessage::with_error(id, self.binding_error(&name, &e)));
                        return;
                    }
                    Err(panic) => {
                        reply(CompletionMessage::with_error(id, self.panic_error(&name, panic)));
                        return;
                    }
                };

                match AssertUnwindSafe(future).catch_unwind().await {
                    Ok(Ok(Some(result))) => reply(CompletionMessage::with_result(id, result)),
                    Ok(Ok(None)) => reply(CompletionMessage::empty(id)),
                    Ok(Err(e)) => {
                        warn!("Hub method '{}' failed for {}: {}", name, connection.id(), e);
                        reply(CompletionMessage::with_error(id, self.execution_error(&name, &e)));
                    }
                    Err(panic) => {
                        warn!("Hub method '{}' panicked for {}", name, connection.id());
                        reply(CompletionMessage::with_error(id, self.panic_error(&name, panic)));
                    }
                }
            }
            (MethodKind::Streaming(handler), true) => {
                let bound = std::panic::catch_unwind(AssertUnwindSafe(|| {
                    handler.bind(&ctx, arguments)
                }));
                let mut items = match bound {
                    Ok(Ok(items)) => items,
                    Ok(Err(e)) => {
                        reply(CompletionMessage::with_error(id, self.binding_error(&name, &e)));
                        return;
                    }
                    Err(panic) => {
                        reply(CompletionMessage::with_error(id, self.panic_error(&name, panic)));
                        return;
                    }
                };

                let mut error = None;
                loop {
                    tokio::select! {
                        biased;
                        _ = token.cancelled() => {
                            debug!("Stream '{}' ({}) canceled", name, id);
                            break;
                        }
                        next = AssertUnwindSafe(items.next()).catch_unwind() => match next {
                            Ok(Some(Ok(item))) => {
                                let message = HubMessage::StreamItem(StreamItemMessage {
                                    invocation_id: id.clone(),
                                    item,
                                });
                                if let Err(e) = connection.write_message(message) {
                                    debug!("Stream '{}' ({}) stopped: {}", name, id, e);
                                    break;
                                }
                            }
                            Ok(Some(Err(e))) => {
                                warn!("Stream '{}' failed for {}: {}", name, connection.id(), e);
                                error = Some(self.execution_error(&name, &e));
                                break;
                            }
                            Ok(None) => break,
                            Err(panic) => {
                                warn!("Stream '{}' panicked for {}", name, connection.id());
                                error = Some(self.panic_error(&name, panic));
                                break;
                            }
                        }
                    }
                }
                drop(items);

                reply(match error {
                    Some(error) => CompletionMessage::with_error(id, error),
                    None => CompletionMessage::empty(id),
                });
            }
        }
    }

    async fn is_authorized(&self, connection: &Connection, method_policies: &[String]) -> bool {
        let identity = &connection.info().identity;
        for policy in self.hub.policies().iter().chain(method_policies) {
            if !self.authorizer.authorize(identity, policy).await {
                return false;
            }
        }
        true
    }

    fn with_detail(&self, base: String, detail: &dyn std::fmt::Display, always: bool) -> String {
        if always || self.options.enable_detailed_errors {
            format!("{} {}", base, detail)
        } else {
            base
        }
    }

    fn binding_error(&self, name: &str, error: &Error) -> String {
        self.with_detail(
            format!("Failed to invoke '{}' due to an error on the server.", name),
            error,
            false,
        )
    }

    fn execution_error(&self, name: &str, error: &Error) -> String {
        self.with_detail(
            format!("An unexpected error occurred invoking '{}' on the server.", name),
            error,
            error.is_client_visible(),
        )
    }

    fn panic_error(&self, name: &str, panic: Box<dyn Any + Send>) -> String {
        let detail = panic
            .downcast_ref::<&str>()
            .map(|s| s.to_string())
            .or_else(|| panic.downcast_ref::<String>().cloned())
            .unwrap_or_else(|| "unknown panic".to_string());
        self.with_detail(
            format!("An unexpected error occurred invoking '{}' on the server.", name),
            &format!("Hub method panicked: {}", detail),
            false,
        )
    }
}

fn send_completion(connection: &Connection, completion: CompletionMessage) {
    if let Err(e) = connection.write_message(HubMessage::Completion(completion)) {
        debug!("Completion for {} dropped: {}", connection.id(), e);
    }
}

impl std::fmt::Debug for HubDispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HubDispatcher")
            .field("hub", &self.hub)
            .field("options", &self.options)
            .finish()
    }
}
