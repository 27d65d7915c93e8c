//! Hub method handlers.
//!
//! Hub methods are plain async functions (or closures) whose parameters are
//! [extractors](crate::extractor) and whose return type implements
//! [`IntoHubResult`]. [`method`] turns such a function into a unary
//! [`HubMethod`]; [`stream`] does the same for a function returning a
//! [`Stream`] of items.
//!
//! # Handler Signatures
//!
//! ```ignore
//! use hubforge::prelude::*;
//! use futures_util::stream;
//!
//! // No arguments, no result
//! async fn ping() {}
//!
//! // Positional arguments and a result
//! async fn add(Arg(a): Arg<i64>, Arg(b): Arg<i64>) -> i64 {
//!     a + b
//! }
//!
//! // Context first, then arguments; errors become error completions
//! async fn join(ctx: HubCallContext, Arg(room): Arg<String>) -> Result<()> {
//!     ctx.groups().add_to_group(ctx.connection_id(), &room).await
//! }
//!
//! // Streaming: one item per stream element
//! fn count(Arg(n): Arg<u32>) -> impl Stream<Item = u32> {
//!     stream::iter(0..n)
//! }
//!
//! let hub = Hub::builder()
//!     .method("Ping", method(ping))
//!     .method("Add", method(add))
//!     .method("Join", method(join))
//!     .method("Count", stream(count))
//!     .build()?;
//! ```
//!
//! # Return Types
//!
//! | Return type | Completion |
//! |-------------|------------|
//! | `()` | no result |
//! | `String`, `&'static str`, numbers, `bool`, `Value` | that value |
//! | `Vec<T>`, [`Json<T>`] | the serialized value |
//! | `Option<T>` | `None` completes with `null` |
//! | `Result<T>` | `Err` completes with an error |

use crate::context::HubCallContext;
use crate::error::Result;
use crate::extractor::{ArgBinder, FromInvocation, Json};
use futures_util::future::BoxFuture;
use futures_util::stream::{BoxStream, Stream, StreamExt};
use serde::Serialize;
use serde_json::Value;
use std::future::Future;
use std::marker::PhantomData;
use std::sync::Arc;

/// Converts a hub method's return value into a completion result.
///
/// `Ok(None)` completes without a value; `Ok(Some(v))` completes with `v`.
pub trait IntoHubResult: Send {
    /// Performs the conversion.
    fn into_hub_result(self) -> Result<Option<Value>>;
}

impl IntoHubResult for () {
    fn into_hub_result(self) -> Result<Option<Value>> {
        Ok(None)
    }
}

impl IntoHubResult for Value {
    fn into_hub_result(self) -> Result<Option<Value>> {
        Ok(Some(self))
    }
}

impl IntoHubResult for String {
    fn into_hub_result(self) -> Result<Option<Value>> {
        Ok(Some(Value::String(self)))
    }
}

impl IntoHubResult for &'static str {
    fn into_hub_result(self) -> Result<Option<Value>> {
        Ok(Some(Value::String(self.to_string())))
    }
}

macro_rules! impl_into_hub_result_for_scalar {
    ($($ty:ty),*) => {
        $(
            impl IntoHubResult for $ty {
                fn into_hub_result(self) -> Result<Option<Value>> {
                    Ok(Some(Value::from(self)))
                }
            }
        )*
    };
}

impl_into_hub_result_for_scalar!(bool, i8, i16, i32, i64, u8, u16, u32, u64, usize, f32, f64);

impl<T: Serialize + Send> IntoHubResult for Vec<T> {
    fn into_hub_result(self) -> Result<Option<Value>> {
        Ok(Some(serde_json::to_value(self)?))
    }
}

impl<T: Serialize + Send> IntoHubResult for Json<T> {
    fn into_hub_result(self) -> Result<Option<Value>> {
        self.into_value().map(Some)
    }
}

impl<T: IntoHubResult> IntoHubResult for Option<T> {
    fn into_hub_result(self) -> Result<Option<Value>> {
        match self {
            Some(value) => value.into_hub_result(),
            None => Ok(Some(Value::Null)),
        }
    }
}

impl<T: IntoHubResult> IntoHubResult for Result<T> {
    fn into_hub_result(self) -> Result<Option<Value>> {
        self?.into_hub_result()
    }
}

/// Future returned by a bound unary method.
pub type MethodFuture = BoxFuture<'static, Result<Option<Value>>>;

/// Stream returned by a bound streaming method.
pub type ItemStream = BoxStream<'static, Result<Value>>;

/// A unary hub method with its parameters erased.
pub trait UnaryHandler: Send + Sync + 'static {
    /// Binds the invocation's arguments and returns the method's future.
    ///
    /// Binding errors are returned before any method code runs.
    fn bind(&self, ctx: &HubCallContext, args: Vec<Value>) -> Result<MethodFuture>;
}

/// A streaming hub method with its parameters erased.
pub trait StreamingHandler: Send + Sync + 'static {
    /// Binds the invocation's arguments and returns the item stream.
    fn bind(&self, ctx: &HubCallContext, args: Vec<Value>) -> Result<ItemStream>;
}

/// Adapts a function to [`UnaryHandler`].
pub struct UnaryService<F, T> {
    handler: F,
    _marker: PhantomData<fn() -> T>,
}

/// Adapts a function to [`StreamingHandler`].
pub struct StreamService<F, T> {
    handler: F,
    _marker: PhantomData<fn() -> T>,
}

/// Functions usable as unary hub methods.
pub trait IntoUnaryHandler<T> {
    /// The adapted handler.
    type Handler: UnaryHandler;

    /// Performs the conversion.
    fn into_unary_handler(self) -> Self::Handler;
}

/// Functions usable as streaming hub methods.
pub trait IntoStreamingHandler<T> {
    /// The adapted handler.
    type Handler: StreamingHandler;

    /// Performs the conversion.
    fn into_streaming_handler(self) -> Self::Handler;
}

macro_rules! impl_hub_method {
    (
        $($ty:ident),*
    ) => {
        #[allow(non_snake_case, unused_mut, unused_variables)]
        impl<F, Fut, Res, $($ty,)*> UnaryHandler for UnaryService<F, ($($ty,)*)>
        where
            F: Fn($($ty,)*) -> Fut + Send + Sync + 'static,
            Fut: Future<Output = Res> + Send + 'static,
            Res: IntoHubResult + 'static,
            $( $ty: FromInvocation, )*
        {
            fn bind(&self, ctx: &HubCallContext, args: Vec<Value>) -> Result<MethodFuture> {
                let mut binder = ArgBinder::new(args, 0 $(+ <$ty as FromInvocation>::ARGS)*)?;
                $(
                    let $ty = <$ty as FromInvocation>::from_invocation(ctx, &mut binder)?;
                )*
                let fut = (self.handler)($($ty,)*);
                Ok(Box::pin(async move { fut.await.into_hub_result() }))
            }
        }

        impl<F, Fut, Res, $($ty,)*> IntoUnaryHandler<($($ty,)*)> for F
        where
            F: Fn($($ty,)*) -> Fut + Send + Sync + 'static,
            Fut: Future<Output = Res> + Send + 'static,
            Res: IntoHubResult + 'static,
            $( $ty: FromInvocation, )*
        {
            type Handler = UnaryService<F, ($($ty,)*)>;

            fn into_unary_handler(self) -> Self::Handler {
                UnaryService {
                    handler: self,
                    _marker: PhantomData,
                }
            }
        }

        #[allow(non_snake_case, unused_mut, unused_variables)]
        impl<F, S, Item, $($ty,)*> StreamingHandler for StreamService<F, ($($ty,)*)>
        where
            F: Fn($($ty,)*) -> S + Send + Sync + 'static,
            S: Stream<Item = Item> + Send + 'static,
            Item: IntoHubResult + 'static,
            $( $ty: FromInvocation, )*
        {
            fn bind(&self, ctx: &HubCallContext, args: Vec<Value>) -> Result<ItemStream> {
                let mut binder = ArgBinder::new(args, 0 $(+ <$ty as FromInvocation>::ARGS)*)?;
                $(
                    let $ty = <$ty as FromInvocation>::from_invocation(ctx, &mut binder)?;
                )*
                let items = (self.handler)($($ty,)*)
                    .map(|item| item.into_hub_result().map(|v| v.unwrap_or(Value::Null)));
                Ok(items.boxed())
            }
        }

        impl<F, S, Item, $($ty,)*> IntoStreamingHandler<($($ty,)*)> for F
        where
            F: Fn($($ty,)*) -> S + Send + Sync + 'static,
            S: Stream<Item = Item> + Send + 'static,
            Item: IntoHubResult + 'static,
            $( $ty: FromInvocation, )*
        {
            type Handler = StreamService<F, ($($ty,)*)>;

            fn into_streaming_handler(self) -> Self::Handler {
                StreamService {
                    handler: self,
                    _marker: PhantomData,
                }
            }
        }
    };
}

// Implement for 0 to 8 parameters
impl_hub_method!();
impl_hub_method!(T1);
impl_hub_method!(T1, T2);
impl_hub_method!(T1, T2, T3);
impl_hub_method!(T1, T2, T3, T4);
impl_hub_method!(T1, T2, T3, T4, T5);
impl_hub_method!(T1, T2, T3, T4, T5, T6);
impl_hub_method!(T1, T2, T3, T4, T5, T6, T7);
impl_hub_method!(T1, T2, T3, T4, T5, T6, T7, T8);

/// How a registered method is invoked.
#[derive(Clone)]
pub enum MethodKind {
    /// One result per call.
    Unary(Arc<dyn UnaryHandler>),
    /// A stream of items per call.
    Streaming(Arc<dyn StreamingHandler>),
}

/// A method ready to be registered on a hub.
#[derive(Clone)]
pub struct HubMethod {
    kind: MethodKind,
    policies: Vec<String>,
}

impl HubMethod {
    /// Requires callers to satisfy `policy` (in addition to any hub-level
    /// policies).
    pub fn authorize(mut self, policy: impl Into<String>) -> Self {
        self.policies.push(policy.into());
        self
    }

    /// How the method is invoked.
    pub fn kind(&self) -> &MethodKind {
        &self.kind
    }

    /// Returns `true` for streaming methods.
    pub fn is_streaming(&self) -> bool {
        matches!(self.kind, MethodKind::Streaming(_))
    }

    /// Method-level authorization policies.
    pub fn policies(&self) -> &[String] {
        &self.policies
    }
}

impl std::fmt::Debug for HubMethod {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HubMethod")
            .field("streaming", &self.is_streaming())
            .field("policies", &self.policies)
            .finish()
    }
}

/// Creates a unary hub method from an async function.
pub fn method<F, T>(f: F) -> HubMethod
where
    F: IntoUnaryHandler<T>,
{
    HubMethod {
        kind: MethodKind::Unary(Arc::new(f.into_unary_handler())),
        policies: Vec::new(),
    }
}

/// Creates a streaming hub method from a function returning a [`Stream`].
pub fn stream<F, T>(f: F) -> HubMethod
where
    F: IntoStreamingHandler<T>,
{
    HubMethod {
        kind: MethodKind::Streaming(Arc::new(f.into_streaming_handler())),
        policies: Vec::new(),
    }
}
