//! # HubForge - Real-Time Hubs for Rust
//!
//! HubForge lets clients call named server methods over a persistent
//! connection and lets the server call back into any client, group of
//! clients, or every connection of a user. Messages use the JSON hub
//! protocol (record-separator framed JSON), so standard hub clients can
//! connect without custom code.
//!
//! ## Quick Start
//!
//! ```ignore
//! [dependencies]
//! hubforge = "0.1.0"
//! tokio = { version = "1.40", features = ["full"] }
//! ```
//!
//! ### Chat Hub
//!
//! ```ignore
//! use hubforge::prelude::*;
//!
//! async fn send(ctx: HubCallContext, Arg(text): Arg<String>) -> Result<()> {
//!     let from = ctx.user_id().unwrap_or("anonymous").to_string();
//!     ctx.clients()
//!         .others()
//!         .invoke("Receive", vec![from.into(), text.into()])
//!         .await
//! }
//!
//! async fn join(ctx: HubCallContext, Arg(room): Arg<String>) -> Result<()> {
//!     ctx.groups().add_to_group(ctx.connection_id(), &room).await
//! }
//!
//! #[tokio::main]
//! async fn main() -> Result<()> {
//!     let hub = Hub::builder()
//!         .method("Send", method(send))
//!         .method("Join", method(join))
//!         .build()?;
//!
//!     HubServer::new(HubConnectionHandler::builder(hub).build())
//!         .listen("127.0.0.1:8080")
//!         .await
//! }
//! ```
//!
//! ### Streaming
//!
//! ```ignore
//! use futures_util::stream::{self, Stream};
//! use hubforge::prelude::*;
//!
//! fn counter(Arg(n): Arg<u32>) -> impl Stream<Item = Result<u32>> + Send {
//!     stream::iter((0..n).map(Ok))
//! }
//!
//! let hub = Hub::builder().method("Counter", stream(counter)).build()?;
//! ```
//!
//! See [`hubforge_core`] for the full API.

#![cfg_attr(docsrs, feature(doc_cfg))]
#![warn(missing_docs)]
#![warn(rustdoc::missing_crate_level_docs)]

pub use hubforge_core::*;

/// Prelude module for convenient imports.
///
/// ```ignore
/// use hubforge::prelude::*;
/// ```
pub mod prelude {
    pub use hubforge_core::prelude::*;
}
