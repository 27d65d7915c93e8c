//! Hub message types and the per-message serialization cache.
//!
//! [`HubMessage`] is the protocol-independent form of everything exchanged
//! after negotiation. Protocols in [`crate::protocol`] turn it into bytes and
//! back.
//!
//! | Message | Direction | Purpose |
//! |---------|-----------|---------|
//! | [`HubMessage::Invocation`] | both | unary call, or server-to-client fanout |
//! | [`HubMessage::StreamInvocation`] | client → server | call expecting a stream of items |
//! | [`HubMessage::StreamItem`] | server → client | one item of a streamed result |
//! | [`HubMessage::Completion`] | server → client | terminal result or error |
//! | [`HubMessage::CancelInvocation`] | client → server | stop a streamed invocation |
//! | [`HubMessage::Ping`] | both | keep-alive |
//! | [`HubMessage::Close`] | both | graceful shutdown |

use crate::error::Result;
use crate::protocol::HubProtocol;
use bytes::Bytes;
use serde_json::Value;
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};

/// A client- or server-issued method call.
#[derive(Debug, Clone, PartialEq)]
pub struct InvocationMessage {
    /// Correlation id; `None` marks a fire-and-forget invocation.
    pub invocation_id: Option<String>,
    /// Name of the method to invoke.
    pub target: String,
    /// Positional arguments.
    pub arguments: Vec<Value>,
}

impl InvocationMessage {
    /// Creates a fire-and-forget invocation (no completion expected).
    pub fn fire_and_forget(target: impl Into<String>, arguments: Vec<Value>) -> Self {
        Self {
            invocation_id: None,
            target: target.into(),
            arguments,
        }
    }

    /// Creates an invocation that expects a completion.
    pub fn with_id(
        invocation_id: impl Into<String>,
        target: impl Into<String>,
        arguments: Vec<Value>,
    ) -> Self {
        Self {
            invocation_id: Some(invocation_id.into()),
            target: target.into(),
            arguments,
        }
    }

    /// Returns `true` if no completion may be sent for this invocation.
    pub fn is_fire_and_forget(&self) -> bool {
        self.invocation_id.is_none()
    }
}

/// One item of a streamed result.
#[derive(Debug, Clone, PartialEq)]
pub struct StreamItemMessage {
    /// Id of the streaming invocation this item belongs to.
    pub invocation_id: String,
    /// The item value.
    pub item: Value,
}

/// Terminal message for an invocation.
///
/// `result: None` means "completed without a value" while
/// `result: Some(Value::Null)` means "completed with a null value".
#[derive(Debug, Clone, PartialEq)]
pub struct CompletionMessage {
    /// Id of the invocation being completed.
    pub invocation_id: String,
    /// Result payload, if the method produced one.
    pub result: Option<Value>,
    /// Error text, if the invocation failed.
    pub error: Option<String>,
}

impl CompletionMessage {
    /// Completion without a value.
    pub fn empty(invocation_id: impl Into<String>) -> Self {
        Self {
            invocation_id: invocation_id.into(),
            result: None,
            error: None,
        }
    }

    /// Completion carrying a value.
    pub fn with_result(invocation_id: impl Into<String>, result: Value) -> Self {
        Self {
            invocation_id: invocation_id.into(),
            result: Some(result),
            error: None,
        }
    }

    /// Completion carrying an error.
    pub fn with_error(invocation_id: impl Into<String>, error: impl Into<String>) -> Self {
        Self {
            invocation_id: invocation_id.into(),
            result: None,
            error: Some(error.into()),
        }
    }

    /// Distinguishes "completed with null" from "completed with no value".
    pub fn has_result(&self) -> bool {
        self.result.is_some()
    }
}

/// Request to stop a streamed invocation.
#[derive(Debug, Clone, PartialEq)]
pub struct CancelInvocationMessage {
    /// Id of the streaming invocation to cancel.
    pub invocation_id: String,
}

/// Graceful shutdown notice.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct CloseMessage {
    /// Why the connection closed; `None` for an orderly close.
    pub error: Option<String>,
    /// Whether the client may reconnect.
    pub allow_reconnect: bool,
}

/// Every message exchanged after negotiation.
#[derive(Debug, Clone, PartialEq)]
pub enum HubMessage {
    /// Unary invocation (or server-to-client fanout).
    Invocation(InvocationMessage),
    /// Invocation whose result is streamed.
    StreamInvocation(InvocationMessage),
    /// One streamed item.
    StreamItem(StreamItemMessage),
    /// Terminal result.
    Completion(CompletionMessage),
    /// Cancels a streamed invocation.
    CancelInvocation(CancelInvocationMessage),
    /// Keep-alive.
    Ping,
    /// Graceful shutdown.
    Close(CloseMessage),
}

impl HubMessage {
    /// Short name used in logs.
    pub fn kind(&self) -> &'static str {
        match self {
            HubMessage::Invocation(_) => "Invocation",
            HubMessage::StreamInvocation(_) => "StreamInvocation",
            HubMessage::StreamItem(_) => "StreamItem",
            HubMessage::Completion(_) => "Completion",
            HubMessage::CancelInvocation(_) => "CancelInvocation",
            HubMessage::Ping => "Ping",
            HubMessage::Close(_) => "Close",
        }
    }
}

struct CachedEncoding {
    protocol: String,
    bytes: Bytes,
}

/// Two inline slots cover the usual case of at most two protocols in use
/// across all connected clients.
#[derive(Default)]
struct EncodingCache {
    first: Option<CachedEncoding>,
    second: Option<CachedEncoding>,
    overflow: Vec<CachedEncoding>,
}

impl EncodingCache {
    fn find(&self, protocol: &str) -> Option<Bytes> {
        [self.first.as_ref(), self.second.as_ref()]
            .into_iter()
            .flatten()
            .chain(self.overflow.iter())
            .find(|entry| entry.protocol == protocol)
            .map(|entry| entry.bytes.clone())
    }

    fn store(&mut self, protocol: &str, bytes: Bytes) {
        let entry = CachedEncoding {
            protocol: protocol.to_string(),
            bytes,
        };
        if self.first.is_none() {
            self.first = Some(entry);
        } else if self.second.is_none() {
            self.second = Some(entry);
        } else {
            self.overflow.push(entry);
        }
    }
}

/// An outbound message shared by every connection it is sent to.
///
/// The first connection using a given protocol encodes the message; every
/// later connection with the same protocol reuses those bytes. A broadcast to
/// N connections sharing one protocol therefore serializes exactly once and
/// records N-1 cache hits.
pub struct SerializedHubMessage {
    message: HubMessage,
    cache: Mutex<EncodingCache>,
    hits: AtomicUsize,
}

impl SerializedHubMessage {
    /// Wraps a message with an empty cache.
    pub fn new(message: HubMessage) -> Self {
        Self {
            message,
            cache: Mutex::new(EncodingCache::default()),
            hits: AtomicUsize::new(0),
        }
    }

    /// The wrapped message.
    pub fn message(&self) -> &HubMessage {
        &self.message
    }

    /// Returns the message encoded with `protocol`, encoding it on first use.
    pub fn serialized(&self, protocol: &dyn HubProtocol) -> Result<Bytes> {
        // A poisoned lock only means another writer panicked mid-encode;
        // the cache itself is never left half-written.
        let mut cache = self.cache.lock().unwrap_or_else(|e| e.into_inner());

        if let Some(bytes) = cache.find(protocol.name()) {
            self.hits.fetch_add(1, Ordering::Relaxed);
            return Ok(bytes);
        }

        let bytes = protocol.write_message(&self.message)?;
        cache.store(protocol.name(), bytes.clone());
        Ok(bytes)
    }

    /// Number of lookups served from the cache.
    pub fn cache_hits(&self) -> usize {
        self.hits.load(Ordering::Relaxed)
    }
}

impl std::fmt::Debug for SerializedHubMessage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SerializedHubMessage")
            .field("message", &self.message)
            .field("cache_hits", &self.cache_hits())
            .finish()
    }
}
