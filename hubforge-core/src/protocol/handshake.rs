//! The negotiation exchange that opens every hub connection.
//!
//! ```text
//! client → {"protocol":"json","version":1}\x1e
//! server → {}\x1e                       (accepted)
//! server → {"error":"..."}\x1e          (rejected, then the transport closes)
//! ```
//!
//! Handshake messages are always JSON text terminated by
//! [`RECORD_SEPARATOR`], whatever protocol is being negotiated.

use crate::error::{Error, Result};
use bytes::{Bytes, BytesMut};
use serde::{Deserialize, Serialize};

/// Terminates every handshake message and every JSON hub message.
pub const RECORD_SEPARATOR: u8 = 0x1e;

/// The client's opening message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HandshakeRequest {
    /// Requested protocol name.
    pub protocol: String,
    /// Requested protocol version.
    pub version: u32,
}

impl HandshakeRequest {
    /// Creates a request.
    pub fn new(protocol: impl Into<String>, version: u32) -> Self {
        Self {
            protocol: protocol.into(),
            version,
        }
    }

    /// Parses a request from the front of `buffer`.
    ///
    /// Returns `Ok(None)` until a record separator has arrived. The request
    /// bytes and separator are consumed; anything after them stays in the
    /// buffer.
    pub fn parse(buffer: &mut BytesMut) -> Result<Option<Self>> {
        let Some(end) = buffer.iter().position(|b| *b == RECORD_SEPARATOR) else {
            return Ok(None);
        };

        let record = buffer.split_to(end + 1);
        let request = serde_json::from_slice(&record[..end])
            .map_err(|e| Error::protocol(format!("Malformed handshake request: {}", e)))?;
        Ok(Some(request))
    }

    /// Encodes the request, including the separator.
    pub fn to_bytes(&self) -> Result<Bytes> {
        frame_json(self)
    }
}

/// The server's answer to a [`HandshakeRequest`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct HandshakeResponse {
    /// Why negotiation failed; `None` on success.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl HandshakeResponse {
    /// The empty (successful) response.
    pub fn ok() -> Self {
        Self { error: None }
    }

    /// A failed response carrying `error`.
    pub fn error(error: impl Into<String>) -> Self {
        Self {
            error: Some(error.into()),
        }
    }

    /// Encodes the response, including the separator.
    pub fn to_bytes(&self) -> Result<Bytes> {
        frame_json(self)
    }

    /// Parses a response from the front of `buffer`.
    pub fn parse(buffer: &mut BytesMut) -> Result<Option<Self>> {
        let Some(end) = buffer.iter().position(|b| *b == RECORD_SEPARATOR) else {
            return Ok(None);
        };

        let record = buffer.split_to(end + 1);
        Ok(Some(serde_json::from_slice(&record[..end])?))
    }
}

fn frame_json<T: Serialize>(value: &T) -> Result<Bytes> {
    let mut out = serde_json::to_vec(value)?;
    out.push(RECORD_SEPARATOR);
    Ok(Bytes::from(out))
}
