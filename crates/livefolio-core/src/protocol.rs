//! JSON wire protocol shared by server and client.
//!
//! Every frame is a JSON object discriminated by a string `type` field:
//!
//! ```text
//! client → server  {"type":"subscribe","userId":42}
//! server → client  {"type":"investment_update","userId":42,"payload":{...}}
//! ```
//!
//! Unrecognized `type` values decode to [`Message::Unknown`] so newer peers
//! can add message kinds without breaking older ones.

use serde::Deserialize;
use serde_json::{Map, Value};

use crate::errors::{DecodeError, EncodeError};
use crate::ids::UserId;

const TYPE_SUBSCRIBE: &str = "subscribe";
const TYPE_INVESTMENT_UPDATE: &str = "investment_update";

/// A decoded wire message.
#[derive(Clone, Debug, PartialEq)]
pub enum Message {
    /// Client asks to receive events for `user_id`.
    Subscribe {
        /// The subscribing user.
        user_id: UserId,
    },
    /// Server notifies that an investment of `user_id` changed.
    InvestmentUpdate {
        /// The affected user.
        user_id: UserId,
        /// Opaque event payload.
        payload: Value,
    },
    /// Any other `type`; carried so callers can log it, never acted upon.
    Unknown {
        /// The unrecognized `type` value.
        kind: String,
    },
}

impl Message {
    /// Build a subscribe message.
    pub fn subscribe(user_id: UserId) -> Self {
        Self::Subscribe { user_id }
    }

    /// The wire `type` string.
    pub fn kind(&self) -> &str {
        match self {
            Self::Subscribe { .. } => TYPE_SUBSCRIBE,
            Self::InvestmentUpdate { .. } => TYPE_INVESTMENT_UPDATE,
            Self::Unknown { kind } => kind,
        }
    }

    fn to_value(&self) -> Value {
        let mut obj = Map::new();
        let _ = obj.insert("type".into(), Value::String(self.kind().to_owned()));
        match self {
            Self::Subscribe { user_id } => {
                let _ = obj.insert("userId".into(), Value::from(user_id.get()));
            }
            Self::InvestmentUpdate { user_id, payload } => {
                let _ = obj.insert("userId".into(), Value::from(user_id.get()));
                let _ = obj.insert("payload".into(), payload.clone());
            }
            Self::Unknown { .. } => {}
        }
        Value::Object(obj)
    }
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct SubscribeFields {
    user_id: UserId,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct InvestmentUpdateFields {
    user_id: UserId,
    #[serde(default)]
    payload: Value,
}

/// Serialize a message to its JSON text frame.
pub fn encode(message: &Message) -> Result<String, EncodeError> {
    Ok(serde_json::to_string(&message.to_value())?)
}

/// Decode a text frame.
pub fn decode_str(text: &str) -> Result<Message, DecodeError> {
    decode(text.as_bytes())
}

/// Decode raw frame bytes.
pub fn decode(bytes: &[u8]) -> Result<Message, DecodeError> {
    let value: Value =
        serde_json::from_slice(bytes).map_err(|e| DecodeError::Malformed(e.to_string()))?;
    let Value::Object(obj) = value else {
        return Err(DecodeError::NotAnObject);
    };
    let kind = match obj.get("type") {
        Some(Value::String(kind)) => kind.clone(),
        _ => return Err(DecodeError::MissingType),
    };

    let invalid = |e: serde_json::Error| DecodeError::InvalidFields {
        kind: kind.clone(),
        reason: e.to_string(),
    };

    match kind.as_str() {
        TYPE_SUBSCRIBE => {
            let fields: SubscribeFields =
                serde_json::from_value(Value::Object(obj)).map_err(invalid)?;
            Ok(Message::Subscribe {
                user_id: fields.user_id,
            })
        }
        TYPE_INVESTMENT_UPDATE => {
            let fields: InvestmentUpdateFields =
                serde_json::from_value(Value::Object(obj)).map_err(invalid)?;
            Ok(Message::InvestmentUpdate {
                user_id: fields.user_id,
                payload: fields.payload,
            })
        }
        _ => Ok(Message::Unknown { kind }),
    }
}
