//! The JSON hub protocol.
//!
//! Each message is one JSON object terminated by
//! [`RECORD_SEPARATOR`](super::handshake::RECORD_SEPARATOR):
//!
//! ```text
//! {"type":1,"invocationId":"1","target":"Send","arguments":["hi"]}\x1e
//! {"type":2,"invocationId":"1","item":42}\x1e
//! {"type":3,"invocationId":"1","result":42}\x1e
//! {"type":4,"invocationId":"1","target":"Counter","arguments":[3]}\x1e
//! {"type":5,"invocationId":"1"}\x1e
//! {"type":6}\x1e
//! {"type":7,"error":"...","allowReconnect":true}\x1e
//! ```
//!
//! A Completion's `result` property is written whenever the result is
//! present, including an explicit `null`; a Completion without a value omits
//! it. Unknown properties are ignored on read.

use super::handshake::RECORD_SEPARATOR;
use super::{HubProtocol, TransferFormat};
use crate::error::{Error, Result};
use crate::message::{
    CancelInvocationMessage, CloseMessage, CompletionMessage, HubMessage, InvocationMessage,
    StreamItemMessage,
};
use bytes::{Bytes, BytesMut};
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;

const INVOCATION: u8 = 1;
const STREAM_ITEM: u8 = 2;
const COMPLETION: u8 = 3;
const STREAM_INVOCATION: u8 = 4;
const CANCEL_INVOCATION: u8 = 5;
const PING: u8 = 6;
const CLOSE: u8 = 7;

/// JSON text protocol, name `"json"`, version 1.
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonHubProtocol;

impl JsonHubProtocol {
    /// Creates the protocol.
    pub fn new() -> Self {
        Self
    }
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawMessage {
    #[serde(rename = "type")]
    kind: Option<u8>,
    invocation_id: Option<String>,
    target: Option<String>,
    arguments: Option<Vec<Value>>,
    #[serde(default, deserialize_with = "present")]
    item: Option<Value>,
    #[serde(default, deserialize_with = "present")]
    result: Option<Value>,
    error: Option<String>,
    allow_reconnect: Option<bool>,
}

/// Keeps an explicit `null` as `Some(Value::Null)`; absence stays `None`
/// through `#[serde(default)]`.
fn present<'de, D>(deserializer: D) -> std::result::Result<Option<Value>, D::Error>
where
    D: Deserializer<'de>,
{
    Value::deserialize(deserializer).map(Some)
}

fn required<T>(value: Option<T>, property: &str) -> Result<T> {
    value.ok_or_else(|| Error::protocol(format!("Missing required property '{}'.", property)))
}

impl RawMessage {
    fn into_hub_message(self) -> Result<HubMessage> {
        let kind = required(self.kind, "type")?;
        let message = match kind {
            INVOCATION => HubMessage::Invocation(InvocationMessage {
                invocation_id: self.invocation_id,
                target: required(self.target, "target")?,
                arguments: required(self.arguments, "arguments")?,
            }),
            STREAM_INVOCATION => HubMessage::StreamInvocation(InvocationMessage {
                invocation_id: Some(required(self.invocation_id, "invocationId")?),
                target: required(self.target, "target")?,
                arguments: required(self.arguments, "arguments")?,
            }),
            STREAM_ITEM => HubMessage::StreamItem(StreamItemMessage {
                invocation_id: required(self.invocation_id, "invocationId")?,
                item: required(self.item, "item")?,
            }),
            COMPLETION => {
                if self.result.is_some() && self.error.is_some() {
                    return Err(Error::protocol(
                        "The 'error' and 'result' properties are mutually exclusive.",
                    ));
                }
                HubMessage::Completion(CompletionMessage {
                    invocation_id: required(self.invocation_id, "invocationId")?,
                    result: self.result,
                    error: self.error,
                })
            }
            CANCEL_INVOCATION => HubMessage::CancelInvocation(CancelInvocationMessage {
                invocation_id: required(self.invocation_id, "invocationId")?,
            }),
            PING => HubMessage::Ping,
            CLOSE => HubMessage::Close(CloseMessage {
                error: self.error,
                allow_reconnect: self.allow_reconnect.unwrap_or(false),
            }),
            other => {
                return Err(Error::protocol(format!("Unknown message type '{}'.", other)));
            }
        };
        Ok(message)
    }
}

#[derive(Serialize, Default)]
#[serde(rename_all = "camelCase")]
struct WireMessage<'a> {
    #[serde(rename = "type")]
    kind: u8,
    #[serde(skip_serializing_if = "Option::is_none")]
    invocation_id: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    target: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    arguments: Option<&'a [Value]>,
    #[serde(skip_serializing_if = "Option::is_none")]
    item: Option<&'a Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    result: Option<&'a Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<&'a str>,
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    allow_reconnect: bool,
}

impl<'a> WireMessage<'a> {
    fn invocation(kind: u8, invocation: &'a InvocationMessage) -> Self {
        Self {
            kind,
            invocation_id: invocation.invocation_id.as_deref(),
            target: Some(invocation.target.as_str()),
            arguments: Some(invocation.arguments.as_slice()),
            ..Default::default()
        }
    }

    fn from_message(message: &'a HubMessage) -> Self {
        match message {
            HubMessage::Invocation(invocation) => Self::invocation(INVOCATION, invocation),
            HubMessage::StreamInvocation(invocation) => {
                Self::invocation(STREAM_INVOCATION, invocation)
            }
            HubMessage::StreamItem(item) => Self {
                kind: STREAM_ITEM,
                invocation_id: Some(item.invocation_id.as_str()),
                item: Some(&item.item),
                ..Default::default()
            },
            // An error completion never carries a result.
            HubMessage::Completion(completion) => Self {
                kind: COMPLETION,
                invocation_id: Some(completion.invocation_id.as_str()),
                result: completion
                    .result
                    .as_ref()
                    .filter(|_| completion.error.is_none()),
                error: completion.error.as_deref(),
                ..Default::default()
            },
            HubMessage::CancelInvocation(cancel) => Self {
                kind: CANCEL_INVOCATION,
                invocation_id: Some(cancel.invocation_id.as_str()),
                ..Default::default()
            },
            HubMessage::Ping => Self {
                kind: PING,
                ..Default::default()
            },
            HubMessage::Close(close) => Self {
                kind: CLOSE,
                error: close.error.as_deref(),
                allow_reconnect: close.allow_reconnect,
                ..Default::default()
            },
        }
    }
}

impl HubProtocol for JsonHubProtocol {
    fn name(&self) -> &str {
        "json"
    }

    fn version(&self) -> u32 {
        1
    }

    fn transfer_format(&self) -> TransferFormat {
        TransferFormat::Text
    }

    fn parse_message(&self, buffer: &mut BytesMut) -> Result<Option<HubMessage>> {
        let Some(end) = buffer.iter().position(|b| *b == RECORD_SEPARATOR) else {
            return Ok(None);
        };

        let record = buffer.split_to(end + 1);
        let raw: RawMessage = serde_json::from_slice(&record[..end])
            .map_err(|e| Error::protocol(format!("Error reading JSON: {}", e)))?;
        raw.into_hub_message().map(Some)
    }

    fn write_message(&self, message: &HubMessage) -> Result<Bytes> {
        let mut out = serde_json::to_vec(&WireMessage::from_message(message))?;
        out.push(RECORD_SEPARATOR);
        Ok(Bytes::from(out))
    }
}
