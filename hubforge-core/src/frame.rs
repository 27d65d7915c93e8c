//! Transport-level frames.
//!
//! A [`Frame`] is one unit handed over by a transport: a text or binary
//! payload, or a control frame. Hub protocols never see frames directly; the
//! connection pump appends payload bytes to a parse buffer and lets the
//! negotiated protocol split that buffer into hub messages, so one frame may
//! carry several hub messages and one hub message may span several frames.
//!
//! | Kind | Carries | Pump behavior |
//! |------|---------|---------------|
//! | [`FrameKind::Text`] | UTF-8 payload | appended to the parse buffer |
//! | [`FrameKind::Binary`] | raw bytes | appended to the parse buffer |
//! | [`FrameKind::Ping`] / [`FrameKind::Pong`] | keep-alive | resets the client timeout |
//! | [`FrameKind::Close`] | nothing | ends the connection orderly |

use crate::protocol::TransferFormat;
use bytes::Bytes;
use tokio_tungstenite::tungstenite::Message as TungsteniteMessage;

/// The kind of a transport frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameKind {
    /// UTF-8 text payload.
    Text,
    /// Binary payload.
    Binary,
    /// Transport-level ping.
    Ping,
    /// Transport-level pong.
    Pong,
    /// The peer is closing the transport.
    Close,
}

/// One transport frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    /// Payload bytes (empty for control frames without data).
    pub data: Vec<u8>,
    /// What kind of frame this is.
    pub kind: FrameKind,
}

impl Frame {
    /// Creates a text frame.
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            data: text.into().into_bytes(),
            kind: FrameKind::Text,
        }
    }

    /// Creates a binary frame.
    pub fn binary(data: impl Into<Vec<u8>>) -> Self {
        Self {
            data: data.into(),
            kind: FrameKind::Binary,
        }
    }

    /// Creates a close frame.
    pub fn close() -> Self {
        Self {
            data: Vec::new(),
            kind: FrameKind::Close,
        }
    }

    /// Wraps encoded protocol bytes in the frame kind matching `format`.
    pub fn for_format(payload: Bytes, format: TransferFormat) -> Self {
        match format {
            TransferFormat::Text => Self {
                data: payload.to_vec(),
                kind: FrameKind::Text,
            },
            TransferFormat::Binary => Self::binary(payload.to_vec()),
        }
    }

    /// Returns `true` for text and binary frames.
    pub fn is_data(&self) -> bool {
        matches!(self.kind, FrameKind::Text | FrameKind::Binary)
    }

    /// Returns `true` for close frames.
    pub fn is_close(&self) -> bool {
        self.kind == FrameKind::Close
    }

    /// Returns the payload as text when this is a valid UTF-8 text frame.
    pub fn as_text(&self) -> Option<&str> {
        if self.kind == FrameKind::Text {
            std::str::from_utf8(&self.data).ok()
        } else {
            None
        }
    }

    /// Converts into a `tungstenite` message.
    pub fn into_tungstenite(self) -> TungsteniteMessage {
        match self.kind {
            FrameKind::Text => {
                TungsteniteMessage::Text(String::from_utf8_lossy(&self.data).into_owned())
            }
            FrameKind::Binary => TungsteniteMessage::Binary(self.data),
            FrameKind::Ping => TungsteniteMessage::Ping(self.data),
            FrameKind::Pong => TungsteniteMessage::Pong(self.data),
            FrameKind::Close => TungsteniteMessage::Close(None),
        }
    }

    /// Converts from a `tungstenite` message.
    pub fn from_tungstenite(msg: TungsteniteMessage) -> Self {
        match msg {
            TungsteniteMessage::Text(text) => Self::text(text),
            TungsteniteMessage::Binary(data) => Self::binary(data),
            TungsteniteMessage::Ping(data) => Self {
                data,
                kind: FrameKind::Ping,
            },
            TungsteniteMessage::Pong(data) => Self {
                data,
                kind: FrameKind::Pong,
            },
            TungsteniteMessage::Close(_) => Self::close(),
            // Raw frames only show up when writing; treat as empty payload.
            TungsteniteMessage::Frame(_) => Self::binary(Vec::new()),
        }
    }
}
