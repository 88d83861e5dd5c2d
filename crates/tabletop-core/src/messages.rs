//! Wire messages exchanged with the room server
//!
//! JSON objects tagged by `type`. Inbound overlay messages are resolved into
//! [`OverlayPayload`] here, once, so nothing downstream inspects raw
//! payloads.

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{TabletopError, TabletopResult};
use crate::intent::Intent;
use crate::overlay::{FullOverlay, OverlayDiff, OverlayPayload, OVERLAY_SCHEMA_VERSION};
use crate::types::{IntentId, RoomId};

/// Client to server
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase", rename_all_fields = "camelCase")]
pub enum ClientMessage {
    Hello {
        room_id: RoomId,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        token: Option<String>,
        #[serde(default)]
        capabilities: Vec<String>,
    },
    Intent {
        intent: Intent,
    },
    /// Ask for a full private overlay after a stale diff
    OverlayResync {
        room_id: RoomId,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        have_version: Option<u64>,
    },
}

impl ClientMessage {
    pub fn to_json(&self) -> TabletopResult<String> {
        Ok(serde_json::to_string(self)?)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RoomTokens {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub player_token: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub spectator_token: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HelloAck {
    #[serde(default)]
    pub accepted_capabilities: Vec<String>,
}

/// Server to client, as it appears on the wire
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase", rename_all_fields = "camelCase")]
pub enum ServerMessage {
    Ack {
        intent_id: IntentId,
        ok: bool,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        error: Option<String>,
    },
    PrivateOverlay {
        payload: FullOverlay,
    },
    PrivateOverlayDiff {
        payload: OverlayDiff,
    },
    LogEvent {
        event_id: String,
        payload: serde_json::Value,
    },
    RoomTokens {
        payload: RoomTokens,
    },
    HelloAck {
        payload: HelloAck,
    },
}

/// Validated inbound message
#[derive(Debug, Clone, PartialEq)]
pub enum Inbound {
    Ack {
        intent_id: IntentId,
        ok: bool,
        error: Option<String>,
    },
    Overlay(OverlayPayload),
    LogEvent {
        event_id: String,
        payload: serde_json::Value,
    },
    RoomTokens(RoomTokens),
    HelloAck(HelloAck),
}

impl ServerMessage {
    /// Parse a raw frame; malformed input is a validation failure
    pub fn from_json(raw: &str) -> TabletopResult<Self> {
        serde_json::from_str(raw)
            .map_err(|e| TabletopError::Validation(format!("malformed server message: {e}")))
    }

    /// Check versions and resolve overlays into [`OverlayPayload`]
    pub fn into_inbound(self) -> TabletopResult<Inbound> {
        let inbound = match self {
            ServerMessage::Ack {
                intent_id,
                ok,
                error,
            } => Inbound::Ack {
                intent_id,
                ok,
                error,
            },
            ServerMessage::PrivateOverlay { payload } => {
                if payload.schema_version != OVERLAY_SCHEMA_VERSION {
                    return Err(TabletopError::Validation(format!(
                        "unsupported overlay schema version {} (expected {})",
                        payload.schema_version, OVERLAY_SCHEMA_VERSION
                    )));
                }
                Inbound::Overlay(OverlayPayload::Full(payload))
            }
            ServerMessage::PrivateOverlayDiff { payload } => {
                if payload.overlay_version <= payload.base_overlay_version {
                    return Err(TabletopError::Validation(format!(
                        "overlay diff version {} does not advance base {}",
                        payload.overlay_version, payload.base_overlay_version
                    )));
                }
                Inbound::Overlay(OverlayPayload::Diff(payload))
            }
            ServerMessage::LogEvent { event_id, payload } => Inbound::LogEvent { event_id, payload },
            ServerMessage::RoomTokens { payload } => Inbound::RoomTokens(payload),
            ServerMessage::HelloAck { payload } => {
                debug!(capabilities = ?payload.accepted_capabilities, "Hello acknowledged");
                Inbound::HelloAck(payload)
            }
        };
        Ok(inbound)
    }
}

/// Parse and validate one raw inbound frame
pub fn decode_inbound(raw: &str) -> TabletopResult<Inbound> {
    ServerMessage::from_json(raw)?.into_inbound()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ops::BoardOp;
    use crate::types::{CardId, PlayerId};

    #[test]
    fn test_outbound_intent_shape() {
        let intent = Intent::new(BoardOp::TapCard {
            card_id: CardId::from("c1"),
            tapped: false,
        });
        let json: serde_json::Value = serde_json::from_str(
            &ClientMessage::Intent {
                intent: intent.clone(),
            }
            .to_json()
            .unwrap(),
        )
        .unwrap();
        assert_eq!(json["type"], "intent");
        assert_eq!(json["intent"]["id"], intent.id.to_string());
        assert_eq!(json["intent"]["type"], "tapCard");
        assert_eq!(json["intent"]["payload"]["cardId"], "c1");
    }

    #[test]
    fn test_ack_decodes() {
        let id = IntentId::new();
        let raw = format!(r#"{{"type":"ack","intentId":"{id}","ok":false,"error":"denied"}}"#);
        assert_eq!(
            decode_inbound(&raw).unwrap(),
            Inbound::Ack {
                intent_id: id,
                ok: false,
                error: Some("denied".into()),
            }
        );
    }

    #[test]
    fn test_full_overlay_resolves_to_full_payload() {
        let raw = r#"{"type":"privateOverlay","payload":{
            "schemaVersion":1,"overlayVersion":3,"roomId":"r1","viewerId":"p1",
            "cards":[{"id":"c1","zoneId":"hand-p1","ownerId":"p1","name":"Opt"}],
            "zoneCardOrders":{"library-p1":["c9","c8"]}
        }}"#;
        let Inbound::Overlay(OverlayPayload::Full(full)) = decode_inbound(raw).unwrap() else {
            panic!("expected full overlay");
        };
        assert_eq!(full.overlay_version, 3);
        assert_eq!(full.viewer_id, Some(PlayerId::from("p1")));
        assert_eq!(full.cards[0].identity.name, "Opt");
    }

    #[test]
    fn test_unsupported_schema_version_is_validation_failure() {
        let raw = r#"{"type":"privateOverlay","payload":{"schemaVersion":2,"overlayVersion":1,"roomId":"r1"}}"#;
        assert!(matches!(decode_inbound(raw), Err(TabletopError::Validation(_))));
    }

    #[test]
    fn test_diff_resolves_and_checks_versions() {
        let raw = r#"{"type":"privateOverlayDiff","payload":{"baseOverlayVersion":3,"overlayVersion":4,"removes":["c1"]}}"#;
        assert!(matches!(
            decode_inbound(raw).unwrap(),
            Inbound::Overlay(OverlayPayload::Diff(_))
        ));
        let backwards = r#"{"type":"privateOverlayDiff","payload":{"baseOverlayVersion":4,"overlayVersion":4}}"#;
        assert!(decode_inbound(backwards).is_err());
    }

    #[test]
    fn test_tokens_hello_and_log_events() {
        let tokens = decode_inbound(r#"{"type":"roomTokens","payload":{"playerToken":"a.b"}}"#).unwrap();
        assert_eq!(
            tokens,
            Inbound::RoomTokens(RoomTokens {
                player_token: Some("a.b".into()),
                spectator_token: None,
            })
        );
        let hello =
            decode_inbound(r#"{"type":"helloAck","payload":{"acceptedCapabilities":["overlayDiff"]}}"#)
                .unwrap();
        assert_eq!(
            hello,
            Inbound::HelloAck(HelloAck {
                accepted_capabilities: vec!["overlayDiff".into()],
            })
        );
        let log = decode_inbound(r#"{"type":"logEvent","eventId":"e1","payload":{"text":"drew"}}"#)
            .unwrap();
        assert!(matches!(log, Inbound::LogEvent { ref event_id, .. } if event_id == "e1"));
    }

    #[test]
    fn test_garbage_is_validation_failure() {
        assert!(matches!(decode_inbound("{nope"), Err(TabletopError::Validation(_))));
        assert!(matches!(
            decode_inbound(r#"{"type":"mystery"}"#),
            Err(TabletopError::Validation(_))
        ));
    }
}
