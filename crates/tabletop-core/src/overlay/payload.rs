//! Overlay payload shapes

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::types::{Card, CardId, CardIdentity, PlayerId, Position, RoomId, Visibility, ZoneId};

/// Overlay schema this build understands
pub const OVERLAY_SCHEMA_VERSION: u32 = 1;

/// A hidden card as the viewer is allowed to see it
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OverlayCard {
    pub id: CardId,
    pub zone_id: ZoneId,
    pub owner_id: PlayerId,
    #[serde(flatten)]
    pub identity: CardIdentity,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub controller_id: Option<PlayerId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub position: Option<Position>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub visibility: Option<Visibility>,
}

impl OverlayCard {
    pub fn new(
        id: impl Into<CardId>,
        zone_id: impl Into<ZoneId>,
        owner_id: impl Into<PlayerId>,
        identity: CardIdentity,
    ) -> Self {
        Self {
            id: id.into(),
            zone_id: zone_id.into(),
            owner_id: owner_id.into(),
            identity,
            controller_id: None,
            position: None,
            visibility: None,
        }
    }

    /// Build a full card record for a card the public state has no record of
    pub fn to_card(&self, zone_id: ZoneId) -> Card {
        let mut card = Card::new(
            self.id.clone(),
            self.identity.clone(),
            self.owner_id.clone(),
            zone_id,
        );
        if let Some(controller) = &self.controller_id {
            card.controller_id = controller.clone();
        }
        if let Some(position) = self.position {
            card.position = position;
        }
        if let Some(visibility) = &self.visibility {
            card.visibility = visibility.clone();
        }
        card
    }
}

/// Everything currently visible to the viewer
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FullOverlay {
    pub schema_version: u32,
    pub overlay_version: u64,
    pub room_id: RoomId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub viewer_id: Option<PlayerId>,
    #[serde(default)]
    pub cards: Vec<OverlayCard>,
    #[serde(default)]
    pub zone_card_orders: BTreeMap<ZoneId, Vec<CardId>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub meta: Option<serde_json::Value>,
}

/// Changes since `base_overlay_version`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OverlayDiff {
    pub base_overlay_version: u64,
    pub overlay_version: u64,
    #[serde(default)]
    pub upserts: Vec<OverlayCard>,
    #[serde(default)]
    pub removes: Vec<CardId>,
    #[serde(default)]
    pub zone_order_removals: Vec<ZoneId>,
    #[serde(default)]
    pub zone_card_orders: BTreeMap<ZoneId, Vec<CardId>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub meta: Option<serde_json::Value>,
}

/// A private overlay, resolved at the transport boundary
#[derive(Debug, Clone, PartialEq)]
pub enum OverlayPayload {
    Full(FullOverlay),
    Diff(OverlayDiff),
}

impl OverlayPayload {
    /// Version the viewer holds once this payload is applied
    pub fn overlay_version(&self) -> u64 {
        match self {
            OverlayPayload::Full(full) => full.overlay_version,
            OverlayPayload::Diff(diff) => diff.overlay_version,
        }
    }
}
