//! Hub definitions.
//!
//! A [`Hub`] is an immutable method table plus lifecycle hooks, built once
//! with [`HubBuilder`]. Method names are matched case-insensitively; two
//! methods whose names differ only in case are rejected at build time.
//!
//! ```ignore
//! use hubforge::prelude::*;
//!
//! async fn send(ctx: HubCallContext, Arg(text): Arg<String>) -> Result<()> {
//!     ctx.clients().all().invoke("Receive", vec![text.into()]).await
//! }
//!
//! let hub = Hub::builder()
//!     .method("Send", method(send))
//!     .on_connected(|ctx: HubCallContext| async move {
//!         ctx.groups().add_to_group(ctx.connection_id(), "lobby").await
//!     })
//!     .build()?;
//! ```

use crate::context::HubCallContext;
use crate::error::{Error, Result};
use crate::handler::HubMethod;
use futures_util::future::BoxFuture;
use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;

type ConnectedHook = Arc<dyn Fn(HubCallContext) -> BoxFuture<'static, Result<()>> + Send + Sync>;
type DisconnectedHook =
    Arc<dyn Fn(HubCallContext, Option<String>) -> BoxFuture<'static, Result<()>> + Send + Sync>;

/// A method as registered on a hub.
#[derive(Debug, Clone)]
pub struct RegisteredMethod {
    /// The name as registered (original casing).
    pub name: String,
    /// The method.
    pub method: HubMethod,
}

/// An immutable hub definition.
#[derive(Clone)]
pub struct Hub {
    methods: HashMap<String, RegisteredMethod>,
    policies: Vec<String>,
    on_connected: Option<ConnectedHook>,
    on_disconnected: Option<DisconnectedHook>,
}

impl Hub {
    /// Starts building a hub.
    pub fn builder() -> HubBuilder {
        HubBuilder::new()
    }

    /// Looks up a method, ignoring case.
    pub fn method(&self, name: &str) -> Option<&RegisteredMethod> {
        self.methods.get(&name.to_lowercase())
    }

    /// Hub-level authorization policies, applied to every method.
    pub fn policies(&self) -> &[String] {
        &self.policies
    }

    /// Number of registered methods.
    pub fn method_count(&self) -> usize {
        self.methods.len()
    }

    /// Runs the connected hook, if any.
    pub async fn connected(&self, ctx: HubCallContext) -> Result<()> {
        match &self.on_connected {
            Some(hook) => hook(ctx).await,
            None => Ok(()),
        }
    }

    /// Runs the disconnected hook, if any.
    pub async fn disconnected(&self, ctx: HubCallContext, error: Option<String>) -> Result<()> {
        match &self.on_disconnected {
            Some(hook) => hook(ctx, error).await,
            None => Ok(()),
        }
    }
}

impl std::fmt::Debug for Hub {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut names: Vec<&str> = self.methods.values().map(|m| m.name.as_str()).collect();
        names.sort_unstable();
        f.debug_struct("Hub")
            .field("methods", &names)
            .field("policies", &self.policies)
            .finish()
    }
}

/// Builder for [`Hub`].
#[derive(Default)]
pub struct HubBuilder {
    methods: Vec<(String, HubMethod)>,
    policies: Vec<String>,
    on_connected: Option<ConnectedHook>,
    on_disconnected: Option<DisconnectedHook>,
}

impl HubBuilder {
    /// Creates an empty builder.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a method under `name`.
    pub fn method(mut self, name: impl Into<String>, method: HubMethod) -> Self {
        self.methods.push((name.into(), method));
        self
    }

    /// Requires `policy` for every method of the hub.
    pub fn authorize(mut self, policy: impl Into<String>) -> Self {
        self.policies.push(policy.into());
        self
    }

    /// Runs `hook` after a connection is registered.
    ///
    /// An error closes the connection with an error.
    pub fn on_connected<F, Fut>(mut self, hook: F) -> Self
    where
        F: Fn(HubCallContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<()>> + Send + 'static,
    {
        let hook: ConnectedHook =
            Arc::new(move |ctx: HubCallContext| -> BoxFuture<'static, Result<()>> {
                Box::pin(hook(ctx))
            });
        self.on_connected = Some(hook);
        self
    }

    /// Runs `hook` when a connection ends, with the close error if any.
    ///
    /// Errors are logged and otherwise ignored.
    pub fn on_disconnected<F, Fut>(mut self, hook: F) -> Self
    where
        F: Fn(HubCallContext, Option<String>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<()>> + Send + 'static,
    {
        let hook: DisconnectedHook = Arc::new(
            move |ctx: HubCallContext, error: Option<String>| -> BoxFuture<'static, Result<()>> {
                Box::pin(hook(ctx, error))
            },
        );
        self.on_disconnected = Some(hook);
        self
    }

    /// Builds the hub.
    ///
    /// Fails with [`Error::DuplicateMethod`] when two names collide ignoring
    /// case.
    pub fn build(self) -> Result<Hub> {
        let mut methods = HashMap::with_capacity(self.methods.len());
        for (name, method) in self.methods {
            let key = name.to_lowercase();
            if methods.contains_key(&key) {
                return Err(Error::DuplicateMethod(name));
            }
            methods.insert(key, RegisteredMethod { name, method });
        }

        Ok(Hub {
            methods,
            policies: self.policies,
            on_connected: self.on_connected,
            on_disconnected: self.on_disconnected,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::handler::method;

    async fn noop() {}

    #[test]
    fn test_lookup_ignores_case() {
        let hub = Hub::builder()
            .method("SendMessage", method(noop))
            .build()
            .unwrap();

        assert_eq!(hub.method("sendmessage").unwrap().name, "SendMessage");
        assert!(hub.method("SENDMESSAGE").is_some());
        assert!(hub.method("Other").is_none());
        assert_eq!(hub.method_count(), 1);
    }

    #[test]
    fn test_duplicate_names_rejected() {
        let err = Hub::builder()
            .method("Send", method(noop))
            .method("send", method(noop))
            .build()
            .unwrap_err();
        assert!(matches!(err, Error::DuplicateMethod(name) if name == "send"));
    }

    #[test]
    fn test_hub_policies() {
        let hub = Hub::builder()
            .authorize("authenticated")
            .method("Send", method(noop).authorize("admin"))
            .build()
            .unwrap();

        assert_eq!(hub.policies(), ["authenticated".to_string()]);
        assert_eq!(
            hub.method("send").unwrap().method.policies(),
            ["admin".to_string()]
        );
    }
}
