//! Domain events fanned out to subscribed clients.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::ids::UserId;
use crate::protocol::Message;

/// Fixed enumeration of event kinds the server emits.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    /// A tracked investment changed state.
    InvestmentUpdate,
}

impl EventKind {
    /// Wire `type` string for this kind.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::InvestmentUpdate => "investment_update",
        }
    }
}

/// An event produced by the business layer for one user.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DomainEvent {
    /// What happened.
    pub kind: EventKind,
    /// The user whose connections should hear about it.
    pub target_user_id: UserId,
    /// Opaque payload forwarded verbatim.
    #[serde(default)]
    pub payload: Value,
}

impl DomainEvent {
    /// Build an `investment_update` event.
    pub fn investment_update(target_user_id: UserId, payload: Value) -> Self {
        Self {
            kind: EventKind::InvestmentUpdate,
            target_user_id,
            payload,
        }
    }

    /// The server→client wire message carrying this event.
    pub fn to_message(&self) -> Message {
        match self.kind {
            EventKind::InvestmentUpdate => Message::InvestmentUpdate {
                user_id: self.target_user_id,
                payload: self.payload.clone(),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn kind_wire_name() {
        assert_eq!(EventKind::InvestmentUpdate.as_str(), "investment_update");
        let json = serde_json::to_string(&EventKind::InvestmentUpdate).unwrap();
        assert_eq!(json, "\"investment_update\"");
    }

    #[test]
    fn to_message_carries_target_and_payload() {
        let event = DomainEvent::investment_update(UserId::new(42), json!({"investmentId": 7}));
        match event.to_message() {
            Message::InvestmentUpdate { user_id, payload } => {
                assert_eq!(user_id, UserId::new(42));
                assert_eq!(payload["investmentId"], 7);
            }
            other => panic!("unexpected message: {other:?}"),
        }
    }

    #[test]
    fn deserializes_from_camel_case_json() {
        let event: DomainEvent = serde_json::from_value(json!({
            "kind": "investment_update",
            "targetUserId": 9,
            "payload": {"status": "closed"}
        }))
        .unwrap();
        assert_eq!(event.target_user_id, UserId::new(9));
        assert_eq!(event.payload["status"], "closed");
    }

    #[test]
    fn payload_defaults_to_null() {
        let event: DomainEvent = serde_json::from_value(json!({
            "kind": "investment_update",
            "targetUserId": 1
        }))
        .unwrap();
        assert!(event.payload.is_null());
    }

    #[test]
    fn unknown_kind_is_rejected_on_ingest() {
        let result = serde_json::from_value::<DomainEvent>(json!({
            "kind": "portfolio_rebalanced",
            "targetUserId": 1
        }));
        assert!(result.is_err());
    }
}
