//! Real-time channel wire protocol.
//!
//! Every frame is a JSON object with a `type` discriminator. Client frames are
//! a closed set and map onto [`ClientFrame`]. Server frames are open-ended: the
//! types the dashboard understands decode into typed [`ServerEvent`] variants and
//! anything else is kept as [`ServerEvent::Other`] so consumers can still
//! register handlers for it.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::DecodeError;
use crate::models::{ArchivedMessage, BotStatus, GroupId};

/// Server frame type names.
pub mod event_types {
    pub const AUTHENTICATED: &str = "authenticated";
    pub const MESSAGE_NEW: &str = "message:new";
    pub const BOT_QR: &str = "bot:qr";
    pub const BOT_STATUS: &str = "bot:status";
}

use event_types::{AUTHENTICATED, BOT_QR, BOT_STATUS, MESSAGE_NEW};

/// Frames sent from the dashboard to the server.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum ClientFrame {
    Authenticate {
        token: String,
    },
    Subscribe {
        #[serde(rename = "groupIds")]
        group_ids: Vec<GroupId>,
    },
    Unsubscribe {
        #[serde(rename = "groupIds")]
        group_ids: Vec<GroupId>,
    },
}

impl ClientFrame {
    /// The wire `type` of this frame.
    pub fn kind(&self) -> &'static str {
        match self {
            ClientFrame::Authenticate { .. } => "authenticate",
            ClientFrame::Subscribe { .. } => "subscribe",
            ClientFrame::Unsubscribe { .. } => "unsubscribe",
        }
    }

    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}

/// An inbound frame split into its declared type and the remaining fields.
#[derive(Debug, Clone, PartialEq)]
pub struct InboundFrame {
    pub kind: String,
    pub body: Value,
}

impl InboundFrame {
    pub fn parse(text: &str) -> Result<Self, DecodeError> {
        let value: Value = serde_json::from_str(text).map_err(DecodeError::Json)?;
        let Value::Object(mut fields) = value else {
            return Err(DecodeError::NotAnObject);
        };

        let kind = match fields.remove("type") {
            Some(Value::String(kind)) => kind,
            Some(_) => return Err(DecodeError::InvalidType),
            None => return Err(DecodeError::MissingType),
        };

        Ok(Self {
            kind,
            body: Value::Object(fields),
        })
    }
}

/// A decoded server-pushed event.
#[derive(Debug, Clone, PartialEq)]
pub enum ServerEvent {
    /// Result of the post-connect credential exchange
    Authenticated { success: bool },
    MessageNew(ArchivedMessage),
    /// Pairing code the operator scans to link the archiving bot
    BotQr { qr: String },
    BotStatus(BotStatus),
    /// A frame type this crate does not model
    Other { kind: String, body: Value },
}

#[derive(Deserialize)]
struct AuthAck {
    success: bool,
}

#[derive(Deserialize)]
struct QrCode {
    qr: String,
}

fn payload<T: DeserializeOwned>(kind: &str, body: Value) -> Result<T, DecodeError> {
    serde_json::from_value(body).map_err(|source| DecodeError::Payload {
        kind: kind.to_string(),
        source,
    })
}

impl ServerEvent {
    /// Decode a raw text frame.
    pub fn from_text(text: &str) -> Result<Self, DecodeError> {
        InboundFrame::parse(text).and_then(Self::decode)
    }

    pub fn decode(frame: InboundFrame) -> Result<Self, DecodeError> {
        let InboundFrame { kind, body } = frame;
        let event = match kind.as_str() {
            AUTHENTICATED => {
                let ack: AuthAck = payload(&kind, body)?;
                ServerEvent::Authenticated {
                    success: ack.success,
                }
            }
            MESSAGE_NEW => ServerEvent::MessageNew(payload(&kind, body)?),
            BOT_QR => {
                let code: QrCode = payload(&kind, body)?;
                ServerEvent::BotQr { qr: code.qr }
            }
            BOT_STATUS => ServerEvent::BotStatus(payload(&kind, body)?),
            _ => ServerEvent::Other { kind, body },
        };
        Ok(event)
    }

    /// The wire `type` this event was decoded from.
    pub fn kind(&self) -> &str {
        match self {
            ServerEvent::Authenticated { .. } => AUTHENTICATED,
            ServerEvent::MessageNew(_) => MESSAGE_NEW,
            ServerEvent::BotQr { .. } => BOT_QR,
            ServerEvent::BotStatus(_) => BOT_STATUS,
            ServerEvent::Other { kind, .. } => kind.as_str(),
        }
    }

    /// Re-encode the event as a wire frame.
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        let body = match self {
            ServerEvent::Authenticated { success } => serde_json::json!({ "success": success }),
            ServerEvent::MessageNew(message) => serde_json::to_value(message)?,
            ServerEvent::BotQr { qr } => serde_json::json!({ "qr": qr }),
            ServerEvent::BotStatus(status) => serde_json::to_value(status)?,
            ServerEvent::Other { body, .. } => body.clone(),
        };

        let mut fields = match body {
            Value::Object(fields) => fields,
            _ => Map::new(),
        };
        fields.insert("type".to_string(), Value::String(self.kind().to_string()));
        serde_json::to_string(&Value::Object(fields))
    }
}
