//! Hub protocols: how [`HubMessage`]s become bytes and back.
//!
//! A client picks a protocol by name during negotiation (see
//! [`handshake`]). Every message after that is encoded with the chosen
//! [`HubProtocol`]. The server can offer several protocols at once; a
//! [`HubProtocolResolver`] finds the one a client asked for, restricted to
//! [`HubOptions::supported_protocols`](crate::options::HubOptions) when set.
//!
//! The only protocol shipped here is [`JsonHubProtocol`].

pub mod handshake;
pub mod json;

pub use json::JsonHubProtocol;

use crate::error::Result;
use crate::message::HubMessage;
use bytes::{Bytes, BytesMut};
use std::sync::Arc;

/// How a protocol's encoded bytes travel over the transport.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransferFormat {
    /// UTF-8 text frames.
    Text,
    /// Binary frames.
    Binary,
}

/// A wire codec for hub messages.
///
/// `parse_message` is called repeatedly on a growing buffer. It consumes the
/// bytes of one complete message and returns it, returns `Ok(None)` when the
/// buffer holds only part of a message, and fails when the bytes cannot be
/// decoded.
pub trait HubProtocol: Send + Sync + 'static {
    /// Protocol name as sent by clients in the handshake request.
    fn name(&self) -> &str;

    /// Highest protocol version this implementation understands.
    fn version(&self) -> u32;

    /// Transport frame type used for encoded messages.
    fn transfer_format(&self) -> TransferFormat;

    /// Parses one message from the front of `buffer`.
    fn parse_message(&self, buffer: &mut BytesMut) -> Result<Option<HubMessage>>;

    /// Encodes a message, including any framing.
    fn write_message(&self, message: &HubMessage) -> Result<Bytes>;

    /// Returns `true` if the client's requested version can be served.
    fn is_version_supported(&self, version: u32) -> bool {
        version <= self.version()
    }
}

/// Finds a registered protocol by name.
#[derive(Clone)]
pub struct HubProtocolResolver {
    protocols: Vec<Arc<dyn HubProtocol>>,
    allowed: Option<Vec<String>>,
}

impl HubProtocolResolver {
    /// Creates a resolver over `protocols`.
    ///
    /// When `allowed` is `Some`, only protocols named in it can be resolved.
    pub fn new(protocols: Vec<Arc<dyn HubProtocol>>, allowed: Option<Vec<String>>) -> Self {
        Self { protocols, allowed }
    }

    /// Looks up a protocol by name (exact match, as clients send it).
    pub fn get(&self, name: &str) -> Option<Arc<dyn HubProtocol>> {
        if let Some(allowed) = &self.allowed {
            if !allowed.iter().any(|n| n == name) {
                return None;
            }
        }
        self.protocols.iter().find(|p| p.name() == name).cloned()
    }

    /// Names of every protocol this resolver can hand out.
    pub fn names(&self) -> Vec<String> {
        self.protocols
            .iter()
            .map(|p| p.name().to_string())
            .filter(|name| self.get(name).is_some())
            .collect()
    }
}

impl Default for HubProtocolResolver {
    fn default() -> Self {
        Self::new(vec![Arc::new(JsonHubProtocol::new())], None)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resolves_json_by_default() {
        let resolver = HubProtocolResolver::default();
        let protocol = resolver.get("json").unwrap();
        assert_eq!(protocol.name(), "json");
        assert_eq!(protocol.transfer_format(), TransferFormat::Text);
        assert!(resolver.get("messagepack").is_none());
    }

    #[test]
    fn test_allowed_list_restricts_lookup() {
        let resolver = HubProtocolResolver::new(
            vec![Arc::new(JsonHubProtocol::new())],
            Some(vec!["messagepack".to_string()]),
        );
        assert!(resolver.get("json").is_none());
        assert!(resolver.names().is_empty());
    }

    #[test]
    fn test_version_support() {
        let protocol = JsonHubProtocol::new();
        assert!(protocol.is_version_supported(1));
        assert!(protocol.is_version_supported(0));
        assert!(!protocol.is_version_supported(2));
    }
}
