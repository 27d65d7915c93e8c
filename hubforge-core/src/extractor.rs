//! Type-safe parameters for hub methods.
//!
//! Every parameter of a hub method implements [`FromInvocation`]. Some
//! parameters consume a positional argument of the invocation ([`Arg`],
//! [`Json`]); the rest are taken from the call context and consume nothing.
//!
//! # Available Extractors
//!
//! | Extractor | Consumes an argument | Provides |
//! |-----------|----------------------|----------|
//! | [`Arg<T>`] | yes | the next argument deserialized as `T` |
//! | [`Json<T>`] | yes | same as `Arg<T>` |
//! | [`State<T>`] | no | shared value from [`AppState`](crate::state::AppState) |
//! | [`HubCallContext`] | no | caller, client proxies, groups |
//! | [`Connection`] | no | the caller's connection handle |
//! | [`ConnectInfo`] | no | connection metadata |
//! | [`CancellationToken`] | no | fires when the call should stop |
//!
//! The number of arguments a method expects is the number of consuming
//! parameters. A call with a different number of arguments fails before the
//! method body runs.
//!
//! ```ignore
//! use hubforge::prelude::*;
//!
//! async fn add(Arg(a): Arg<i64>, Arg(b): Arg<i64>) -> i64 {
//!     a + b
//! }
//!
//! async fn whoami(ConnectInfo(info): ConnectInfo) -> Option<String> {
//!     info.identity.name
//! }
//! ```

use crate::connection::{Connection, ConnectionInfo};
use crate::context::HubCallContext;
use crate::error::{Error, Result};
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::debug;

const BINDING_TYPE_MISMATCH: &str = "Error binding arguments. Make sure that the types of the provided values match the types of the hub method being invoked.";

/// Hands positional invocation arguments to consuming extractors in order.
pub struct ArgBinder {
    args: std::vec::IntoIter<Value>,
}

impl ArgBinder {
    /// Wraps the arguments of one invocation after checking their count.
    pub fn new(args: Vec<Value>, expected: usize) -> Result<Self> {
        if args.len() != expected {
            return Err(Error::binding(format!(
                "Invocation provides {} argument(s) but target expects {}.",
                args.len(),
                expected
            )));
        }
        Ok(Self {
            args: args.into_iter(),
        })
    }

    /// Deserializes the next argument as `T`.
    pub fn next<T: DeserializeOwned>(&mut self) -> Result<T> {
        let value = self.args.next().ok_or_else(|| Error::binding(BINDING_TYPE_MISMATCH))?;
        serde_json::from_value(value).map_err(|e| {
            debug!(
                "Argument does not bind to {}: {}",
                std::any::type_name::<T>(),
                e
            );
            Error::binding(BINDING_TYPE_MISMATCH)
        })
    }
}

/// A hub method parameter.
pub trait FromInvocation: Sized + Send + 'static {
    /// How many positional arguments this parameter consumes.
    const ARGS: usize = 0;

    /// Builds the parameter.
    fn from_invocation(ctx: &HubCallContext, args: &mut ArgBinder) -> Result<Self>;
}

/// The next positional argument, deserialized as `T`.
#[derive(Debug, Clone)]
pub struct Arg<T>(pub T);

impl<T: DeserializeOwned + Send + 'static> FromInvocation for Arg<T> {
    const ARGS: usize = 1;

    fn from_invocation(_ctx: &HubCallContext, args: &mut ArgBinder) -> Result<Self> {
        args.next().map(Arg)
    }
}

/// A JSON value: as a parameter, the next positional argument; as a return
/// value, any serializable result.
#[derive(Debug, Clone)]
pub struct Json<T>(pub T);

impl<T: DeserializeOwned + Send + 'static> FromInvocation for Json<T> {
    const ARGS: usize = 1;

    fn from_invocation(_ctx: &HubCallContext, args: &mut ArgBinder) -> Result<Self> {
        args.next().map(Json)
    }
}

impl<T: Serialize> Json<T> {
    /// Serializes the wrapped value.
    pub fn into_value(self) -> Result<Value> {
        Ok(serde_json::to_value(&self.0)?)
    }
}

/// Shared state of type `T`.
pub struct State<T>(pub Arc<T>);

impl<T: Send + Sync + 'static> FromInvocation for State<T> {
    fn from_invocation(ctx: &HubCallContext, _args: &mut ArgBinder) -> Result<Self> {
        ctx.state().get::<T>().map(State).ok_or_else(|| {
            Error::custom(format!(
                "State not found: {}",
                std::any::type_name::<T>()
            ))
        })
    }
}

impl FromInvocation for HubCallContext {
    fn from_invocation(ctx: &HubCallContext, _args: &mut ArgBinder) -> Result<Self> {
        Ok(ctx.clone())
    }
}

impl FromInvocation for Connection {
    fn from_invocation(ctx: &HubCallContext, _args: &mut ArgBinder) -> Result<Self> {
        Ok(ctx.connection().clone())
    }
}

/// Connection metadata.
pub struct ConnectInfo(pub ConnectionInfo);

impl FromInvocation for ConnectInfo {
    fn from_invocation(ctx: &HubCallContext, _args: &mut ArgBinder) -> Result<Self> {
        Ok(ConnectInfo(ctx.info().clone()))
    }
}

impl FromInvocation for CancellationToken {
    fn from_invocation(ctx: &HubCallContext, _args: &mut ArgBinder) -> Result<Self> {
        Ok(ctx.cancellation_token().clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connection::tests::test_connection;
    use crate::lifetime::DefaultHubLifetimeManager;
    use crate::state::AppState;
    use serde::Deserialize;
    use serde_json::json;

    fn ctx() -> HubCallContext {
        let (conn, _rx) = test_connection("c1", Some("alice"));
        let state = AppState::new();
        state.insert(Arc::new(7_u32));
        HubCallContext::new(
            conn,
            Arc::new(DefaultHubLifetimeManager::new()),
            state,
            CancellationToken::new(),
        )
    }

    #[derive(Debug, Deserialize, PartialEq)]
    struct Point {
        x: i32,
        y: i32,
    }

    #[test]
    fn test_args_bind_in_order() {
        let ctx = ctx();
        let mut binder = ArgBinder::new(vec![json!("hi"), json!({"x": 1, "y": 2})], 2).unwrap();

        let Arg(text) = Arg::<String>::from_invocation(&ctx, &mut binder).unwrap();
        let Json(point) = Json::<Point>::from_invocation(&ctx, &mut binder).unwrap();
        assert_eq!(text, "hi");
        assert_eq!(point, Point { x: 1, y: 2 });
    }

    #[test]
    fn test_count_mismatch() {
        let err = ArgBinder::new(vec![json!(1)], 2).err().unwrap();
        assert_eq!(
            err.to_string(),
            "Invocation provides 1 argument(s) but target expects 2."
        );
    }

    #[test]
    fn test_type_mismatch() {
        let ctx = ctx();
        let mut binder = ArgBinder::new(vec![json!("not a number")], 1).unwrap();
        let err = Arg::<i64>::from_invocation(&ctx, &mut binder).err().unwrap();
        assert!(matches!(err, Error::Binding(_)));
        assert!(err.to_string().starts_with("Error binding arguments."));
    }

    #[test]
    fn test_context_extractors_consume_nothing() {
        let ctx = ctx();
        let mut binder = ArgBinder::new(vec![], 0).unwrap();

        let State(value) = State::<u32>::from_invocation(&ctx, &mut binder).unwrap();
        assert_eq!(*value, 7);
        assert!(State::<String>::from_invocation(&ctx, &mut binder).is_err());

        let conn = Connection::from_invocation(&ctx, &mut binder).unwrap();
        assert_eq!(conn.id(), "c1");

        let ConnectInfo(info) = ConnectInfo::from_invocation(&ctx, &mut binder).unwrap();
        assert!(info.addr.is_none());

        let token = CancellationToken::from_invocation(&ctx, &mut binder).unwrap();
        assert!(!token.is_cancelled());

        assert_eq!(<State<u32> as FromInvocation>::ARGS, 0);
        assert_eq!(<Arg<u32> as FromInvocation>::ARGS, 1);
    }
}
