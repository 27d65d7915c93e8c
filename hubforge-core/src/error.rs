//! Error types and result handling for HubForge.
//!
//! A single [`Error`] enum covers every failure the hub core can report, from
//! transport faults that tear a connection down to per-invocation failures
//! that are turned into error completions and sent back to the caller.
//!
//! # Error Categories
//!
//! - **Transport**: [`WebSocket`](Error::WebSocket), [`Io`](Error::Io),
//!   [`ChannelClosed`](Error::ChannelClosed)
//! - **Protocol**: [`Handshake`](Error::Handshake), [`Protocol`](Error::Protocol),
//!   [`MessageTooLarge`](Error::MessageTooLarge), [`ClientTimeout`](Error::ClientTimeout),
//!   [`Json`](Error::Json)
//! - **Hub**: [`MethodNotFound`](Error::MethodNotFound),
//!   [`DuplicateMethod`](Error::DuplicateMethod), [`Binding`](Error::Binding),
//!   [`Hub`](Error::Hub)
//! - **Application**: [`Custom`](Error::Custom)
//!
//! Connection-level errors end the connection they happened on and nothing
//! else. Invocation-level errors never escape the invocation.
//!
//! # Examples
//!
//! ```ignore
//! use hubforge::prelude::*;
//!
//! async fn withdraw(Arg(amount): Arg<u64>) -> Result<u64> {
//!     if amount == 0 {
//!         // Hub errors are always shown to the caller.
//!         return Err(Error::hub("Amount must be positive"));
//!     }
//!     Ok(amount)
//! }
//! ```

use std::fmt;
use thiserror::Error;

/// The main error type for HubForge operations.
///
/// Uses [`thiserror`](https://docs.rs/thiserror) for the `std::error::Error`
/// implementation and for `From` conversions from the underlying crates.
#[derive(Debug, Error)]
pub enum Error {
    /// WebSocket protocol error from `tokio-tungstenite`.
    #[error("WebSocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),

    /// I/O error from the underlying socket.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization or deserialization error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// The connection's outbound channel is closing and refuses new writes.
    ///
    /// Only single-target sends report this; broadcasts skip the target.
    #[error("Connection {0} is closing and no longer accepts messages")]
    ChannelClosed(String),

    /// The invocation targeted a method the hub does not expose.
    #[error("Unknown hub method '{0}'")]
    MethodNotFound(String),

    /// Two methods with the same (case-insensitive) name were registered.
    ///
    /// Raised once by [`HubBuilder::build`](crate::hub::HubBuilder::build),
    /// never per call.
    #[error("Duplicate definitions of '{0}'. Overloading is not supported.")]
    DuplicateMethod(String),

    /// The negotiation step failed.
    ///
    /// The message is sent to the client verbatim in the handshake response.
    #[error("{0}")]
    Handshake(String),

    /// The peer sent bytes the negotiated protocol could not decode.
    #[error("Protocol error: {0}")]
    Protocol(String),

    /// A single inbound message exceeded the configured maximum size.
    #[error("The maximum message size of {0}B was exceeded.")]
    MessageTooLarge(usize),

    /// The client went silent for longer than the client timeout interval.
    #[error("Client hasn't sent a message/ping within the configured client timeout interval.")]
    ClientTimeout,

    /// Invocation arguments could not be bound to the method's parameters.
    #[error("{0}")]
    Binding(String),

    /// An error raised deliberately by hub code.
    ///
    /// Unlike every other variant, the text of a hub error is always sent to
    /// the calling client, even when detailed errors are disabled.
    #[error("{0}")]
    Hub(String),

    /// Custom application-defined error.
    #[error("Custom error: {0}")]
    Custom(String),
}

/// A type alias for `Result<T, Error>`.
pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    /// Creates a custom error with the given message.
    pub fn custom<T: fmt::Display>(msg: T) -> Self {
        Error::Custom(msg.to_string())
    }

    /// Creates a hub error whose text is always visible to the caller.
    ///
    /// ```ignore
    /// use hubforge::prelude::*;
    ///
    /// async fn join(Arg(room): Arg<String>) -> Result<()> {
    ///     if room.is_empty() {
    ///         return Err(Error::hub("Room name is required"));
    ///     }
    ///     Ok(())
    /// }
    /// ```
    pub fn hub<T: fmt::Display>(msg: T) -> Self {
        Error::Hub(msg.to_string())
    }

    /// Creates a protocol (decode) error.
    pub fn protocol<T: fmt::Display>(msg: T) -> Self {
        Error::Protocol(msg.to_string())
    }

    /// Creates an argument binding error.
    pub fn binding<T: fmt::Display>(msg: T) -> Self {
        Error::Binding(msg.to_string())
    }

    /// Returns `true` if this error's text may be shown to a client even
    /// when detailed errors are disabled.
    pub fn is_client_visible(&self) -> bool {
        matches!(self, Error::Hub(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_custom_error() {
        let err = Error::custom("test error");
        assert!(matches!(err, Error::Custom(_)));
        assert_eq!(err.to_string(), "Custom error: test error");
    }

    #[test]
    fn test_hub_error_is_client_visible() {
        let err = Error::hub("not allowed");
        assert!(err.is_client_visible());
        assert_eq!(err.to_string(), "not allowed");
        assert!(!Error::custom("secret").is_client_visible());
    }

    #[test]
    fn test_method_not_found() {
        let err = Error::MethodNotFound("DoesNotExist".to_string());
        assert_eq!(err.to_string(), "Unknown hub method 'DoesNotExist'");
    }

    #[test]
    fn test_message_too_large() {
        let err = Error::MessageTooLarge(32);
        assert_eq!(err.to_string(), "The maximum message size of 32B was exceeded.");
    }

    #[test]
    fn test_error_from_io() {
        let io_err = std::io::Error::new(std::io::ErrorKind::BrokenPipe, "pipe closed");
        let err = Error::from(io_err);
        assert!(matches!(err, Error::Io(_)));
    }

    #[test]
    fn test_error_from_json() {
        let json_err = serde_json::from_str::<serde_json::Value>("invalid json").unwrap_err();
        let err = Error::from(json_err);
        assert!(matches!(err, Error::Json(_)));
    }
}
