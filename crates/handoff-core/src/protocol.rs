//! Relay wire protocol.
//!
//! Every message is one text frame holding a JSON array. Element 0 is the tag,
//! element 1 (when present) the payload:
//!
//! ```text
//! ["Host","shoes"]      client -> relay
//! ["ConnectionID","AB12"] relay -> client
//! ```
//!
//! Inbound frames are kept as a list of JSON-encoded tokens, so string
//! elements still carry their surrounding quotes. [`unquote`] strips them the
//! same way the relay's other clients do, and [`InboundPacket::fields`] gives
//! handlers the fully decoded values when they need more than a string.

use std::fmt;

use serde_json::Value;
use tracing::warn;

use crate::errors::TransportError;

/// Payload the relay returns for `ItemID` when the code matches no session.
pub const INVALID_ITEM: &str = "INVALID";

/// Tags the client sends to the relay.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum OutboundTag {
    /// Register an item; the relay answers with `ConnectionID`.
    Host,
    /// Look up the item for a connection code; the relay answers with `ItemID`.
    GetItem,
    /// Acknowledge that the item reached the receiver.
    ItemReceived,
}

impl OutboundTag {
    /// Wire name of the tag.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Host => "Host",
            Self::GetItem => "GetItem",
            Self::ItemReceived => "ItemReceived",
        }
    }
}

impl fmt::Display for OutboundTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Tags the relay sends to the client.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum InboundTag {
    /// Connection code issued to a sender.
    ConnectionId,
    /// Item looked up for a receiver, or [`INVALID_ITEM`].
    ItemId,
    /// Receipt forwarded to the sender once the receiver acknowledged.
    ItemReceived,
}

impl InboundTag {
    /// Every inbound tag.
    pub const ALL: [Self; 3] = [Self::ConnectionId, Self::ItemId, Self::ItemReceived];

    /// Wire name of the tag.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::ConnectionId => "ConnectionID",
            Self::ItemId => "ItemID",
            Self::ItemReceived => "ItemReceived",
        }
    }

    /// Parse a wire name.
    pub fn parse(tag: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|t| t.as_str() == tag)
    }
}

impl fmt::Display for InboundTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Strip the surrounding quote characters from an encoded token.
///
/// Tokens of at least four characters lose exactly their first and last
/// character. Shorter tokens are returned unchanged and logged, since they
/// cannot hold a quoted value of useful length. Length is counted in chars.
pub fn unquote(token: &str) -> String {
    let len = token.chars().count();
    if len < 4 {
        warn!(token, len, "token too short to unquote");
        return token.to_owned();
    }
    let mut chars = token.chars();
    let _ = chars.next();
    let _ = chars.next_back();
    chars.as_str().to_owned()
}

/// Result of a receiver's code lookup.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ItemLookup {
    /// The code matched a hosted item.
    Found(String),
    /// The relay answered with the [`INVALID_ITEM`] sentinel.
    Invalid,
}

impl ItemLookup {
    /// Classify an unquoted `ItemID` payload.
    pub fn from_payload(payload: &str) -> Self {
        if payload == INVALID_ITEM {
            Self::Invalid
        } else {
            Self::Found(payload.to_owned())
        }
    }
}

/// One inbound message as a list of JSON-encoded tokens.
///
/// Only valid for the duration of a dispatch; handlers copy out what they need.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct InboundPacket {
    tokens: Vec<String>,
}

impl InboundPacket {
    /// Build a packet from already-encoded tokens.
    pub fn from_tokens(tokens: Vec<String>) -> Self {
        Self { tokens }
    }

    /// Decode a text frame holding a JSON array.
    ///
    /// Each element is re-encoded as a token, so string elements keep their
    /// quotes until a handler unquotes them.
    pub fn decode(text: &str) -> Result<Self, TransportError> {
        let value: Value = serde_json::from_str(text)?;
        let Value::Array(items) = value else {
            return Err(TransportError::Envelope(format!(
                "expected a JSON array, got {}",
                kind_of(&value)
            )));
        };
        let tokens = items.iter().map(Value::to_string).collect();
        Ok(Self { tokens })
    }

    /// Raw encoded tokens.
    pub fn tokens(&self) -> &[String] {
        &self.tokens
    }

    /// Number of tokens.
    pub fn len(&self) -> usize {
        self.tokens.len()
    }

    /// Whether the packet has no tokens at all.
    pub fn is_empty(&self) -> bool {
        self.tokens.is_empty()
    }

    /// Unquoted tag (element 0).
    pub fn tag(&self) -> Option<String> {
        self.tokens.first().map(|t| unquote(t))
    }

    /// Unquoted single-string payload (element 1).
    pub fn text_payload(&self) -> Option<String> {
        self.tokens.get(1).map(|t| unquote(t))
    }

    /// Every token decoded as JSON.
    ///
    /// A token that is not valid JSON is returned as a plain string value.
    pub fn fields(&self) -> Vec<Value> {
        self.tokens
            .iter()
            .map(|t| serde_json::from_str(t).unwrap_or_else(|_| Value::String(t.clone())))
            .collect()
    }

    /// Interpret the payload as an `ItemID` lookup result.
    pub fn item_lookup(&self) -> Option<ItemLookup> {
        self.text_payload().map(|p| ItemLookup::from_payload(&p))
    }
}

fn kind_of(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

/// One outbound message.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct OutboundFrame {
    /// Message tag.
    pub tag: OutboundTag,
    /// Optional string payload.
    pub payload: Option<String>,
}

impl OutboundFrame {
    /// Create a frame; `None` sends the bare tag.
    pub fn new(tag: OutboundTag, payload: Option<&str>) -> Self {
        Self {
            tag,
            payload: payload.map(str::to_owned),
        }
    }

    /// Encode as the JSON array text sent on the wire.
    pub fn encode(&self) -> String {
        let mut items = vec![Value::String(self.tag.as_str().to_owned())];
        if let Some(payload) = &self.payload {
            items.push(Value::String(payload.clone()));
        }
        Value::Array(items).to_string()
    }
}
