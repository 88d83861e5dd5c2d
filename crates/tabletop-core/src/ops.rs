//! Semantic board operations
//!
//! A [`BoardOp`] is one user-level action (move, tap, counter, ...) expressed
//! as data. The same value is authorized and applied by the gateway, carried
//! over the wire inside an intent, and replayed by the reconciler, so the
//! board rules exist in exactly one place: [`BoardOp::apply`].

use std::ops::RangeInclusive;

use serde::{Deserialize, Serialize};

use crate::error::{TabletopError, TabletopResult};
use crate::permissions::{self, PermissionResult};
use crate::types::state::Placement;
use crate::types::{
    Card, CardId, CardIdentity, FaceDownMode, GameState, Player, PlayerId, PlayerUpdate, Position,
    Visibility, Zone, ZoneId, ZoneKind,
};

/// A semantic operation on the board
///
/// Serialized as `{"type": "...", "payload": {...}}`, which is the shape of
/// an intent on the wire.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(
    tag = "type",
    content = "payload",
    rename_all = "camelCase",
    rename_all_fields = "camelCase"
)]
pub enum BoardOp {
    /// Add (positive) or remove (negative) counters of one kind
    AddCounter {
        card_id: CardId,
        kind: String,
        delta: i64,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        color: Option<String>,
    },
    MoveCard {
        card_id: CardId,
        to_zone_id: ZoneId,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        index: Option<usize>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        position: Option<Position>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        face_down: Option<FaceDownMode>,
        /// Identity the mover knows, published when the card goes public
        #[serde(default, skip_serializing_if = "Option::is_none")]
        identity: Option<CardIdentity>,
    },
    TapCard {
        card_id: CardId,
        tapped: bool,
    },
    ReorderZone {
        zone_id: ZoneId,
        order: Vec<CardId>,
    },
    AddPlayer {
        player: Player,
    },
    UpdatePlayer {
        player_id: PlayerId,
        update: PlayerUpdate,
    },
    AddZone {
        zone: Zone,
    },
    /// Add a card (or token) to a zone
    AddCard {
        card: Card,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        index: Option<usize>,
    },
    SetViewScale {
        player_id: PlayerId,
        scale: f64,
    },
    SetRoomLock {
        locked: bool,
    },
    /// Change who may see a card
    RevealCard {
        card_id: CardId,
        visibility: Visibility,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        identity: Option<CardIdentity>,
    },
    /// Publish (Some) or withdraw (None) the top card of a library
    PublishLibraryTop {
        zone_id: ZoneId,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        identity: Option<CardIdentity>,
    },
    /// Move cards from the top of the player's library into their hand
    DrawCards {
        player_id: PlayerId,
        count: u32,
    },
}

impl BoardOp {
    /// Short name used for commit messages and audit entries
    pub fn label(&self) -> &'static str {
        match self {
            BoardOp::AddCounter { .. } => "addCounter",
            BoardOp::MoveCard { .. } => "moveCard",
            BoardOp::TapCard { .. } => "tapCard",
            BoardOp::ReorderZone { .. } => "reorderZone",
            BoardOp::AddPlayer { .. } => "addPlayer",
            BoardOp::UpdatePlayer { .. } => "updatePlayer",
            BoardOp::AddZone { .. } => "addZone",
            BoardOp::AddCard { .. } => "addCard",
            BoardOp::SetViewScale { .. } => "setViewScale",
            BoardOp::SetRoomLock { .. } => "setRoomLock",
            BoardOp::RevealCard { .. } => "revealCard",
            BoardOp::PublishLibraryTop { .. } => "publishLibraryTop",
            BoardOp::DrawCards { .. } => "drawCards",
        }
    }

    /// Decide whether `actor` may perform this operation on `state`.
    ///
    /// Missing cards, zones or players are validation failures, not denials.
    pub fn authorize(&self, actor: &PlayerId, state: &GameState) -> TabletopResult<PermissionResult> {
        let result = match self {
            BoardOp::AddCounter { card_id, .. } => {
                let (card, zone) = card_and_zone(state, card_id)?;
                permissions::can_modify_card_state(actor, &card, zone)
            }
            BoardOp::TapCard { card_id, .. } => {
                let (card, zone) = card_and_zone(state, card_id)?;
                permissions::can_tap_card(actor, &card, zone)
            }
            BoardOp::RevealCard { card_id, .. } => {
                let (card, zone) = card_and_zone(state, card_id)?;
                permissions::can_modify_card_state(actor, &card, zone)
            }
            BoardOp::MoveCard {
                card_id,
                to_zone_id,
                ..
            } => {
                let (card, from) = card_and_zone(state, card_id)?;
                let to = zone(state, to_zone_id)?;
                permissions::can_move_card(actor, &card, from, to)
            }
            BoardOp::ReorderZone { zone_id, .. } | BoardOp::PublishLibraryTop { zone_id, .. } => {
                permissions::can_reorder_zone(actor, zone(state, zone_id)?)
            }
            BoardOp::AddPlayer { player } => {
                if &player.id == actor {
                    PermissionResult::allow()
                } else {
                    PermissionResult::deny("Players can only seat themselves")
                }
            }
            BoardOp::UpdatePlayer { player_id, update } => {
                permissions::can_update_player(actor, player(state, player_id)?, update)
            }
            BoardOp::SetViewScale { player_id, scale } => {
                let update = PlayerUpdate {
                    view_scale: Some(*scale),
                    ..Default::default()
                };
                permissions::can_update_player(actor, player(state, player_id)?, &update)
            }
            BoardOp::AddZone { zone } => permissions::can_add_zone(actor, zone),
            BoardOp::AddCard { card, .. } => {
                permissions::can_create_token(actor, zone(state, &card.zone_id)?)
            }
            BoardOp::SetRoomLock { .. } => permissions::can_lock_room(actor, &state.meta),
            BoardOp::DrawCards { player_id, .. } => {
                if player_id != actor {
                    PermissionResult::deny("Players can only draw for themselves")
                } else {
                    let library = owned_zone(state, player_id, ZoneKind::Library)?;
                    permissions::can_reorder_zone(actor, library)
                }
            }
        };
        Ok(result)
    }

    /// Apply the operation, enforcing the board's domain rules.
    ///
    /// On error `state` may be partially modified; callers apply to a scratch
    /// copy or inside [`crate::room::RoomDoc::mutate`].
    pub fn apply(&self, state: &mut GameState, life_bounds: &RangeInclusive<i32>) -> TabletopResult<()> {
        match self {
            BoardOp::AddCounter {
                card_id,
                kind,
                delta,
                color,
            } => {
                if kind.trim().is_empty() {
                    return Err(TabletopError::Validation("counter kind is empty".into()));
                }
                state.add_counter(card_id, kind, *delta, color.as_deref())?;
                Ok(())
            }
            BoardOp::MoveCard {
                card_id,
                to_zone_id,
                index,
                position,
                face_down,
                identity,
            } => state.move_card(
                card_id,
                to_zone_id,
                Placement {
                    index: *index,
                    position: *position,
                    face_down: *face_down,
                    identity: identity.clone(),
                },
            ),
            BoardOp::TapCard { card_id, tapped } => state.set_tapped(card_id, *tapped),
            BoardOp::ReorderZone { zone_id, order } => state.reorder_zone(zone_id, order.clone()),
            BoardOp::AddPlayer { player } => {
                let mut player = player.clone();
                player.apply(&PlayerUpdate::default(), life_bounds);
                player.view_scale = crate::types::player::clamp_view_scale(player.view_scale);
                state.upsert_player(player);
                Ok(())
            }
            BoardOp::UpdatePlayer { player_id, update } => {
                state.update_player(player_id, update, life_bounds)
            }
            BoardOp::SetViewScale { player_id, scale } => {
                let update = PlayerUpdate {
                    view_scale: Some(*scale),
                    ..Default::default()
                };
                state.update_player(player_id, &update, life_bounds)
            }
            BoardOp::AddZone { zone } => state.add_zone(zone.clone()),
            BoardOp::AddCard { card, index } => state.add_card(card.clone(), *index),
            BoardOp::SetRoomLock { locked } => {
                state.set_locked(*locked);
                Ok(())
            }
            BoardOp::RevealCard {
                card_id,
                visibility,
                identity,
            } => state.set_visibility(card_id, visibility.clone(), identity.clone()),
            BoardOp::PublishLibraryTop { zone_id, identity } => {
                state.publish_library_top(zone_id, identity.clone())
            }
            BoardOp::DrawCards { player_id, count } => {
                let library = owned_zone(state, player_id, ZoneKind::Library)?.id.clone();
                let hand = owned_zone(state, player_id, ZoneKind::Hand)?.id.clone();
                for _ in 0..*count {
                    let Some(top) = state.zone(&library).and_then(Zone::top).cloned() else {
                        return Err(TabletopError::Validation(format!(
                            "library of {player_id} is empty"
                        )));
                    };
                    state.move_card(&top, &hand, Placement::default())?;
                }
                Ok(())
            }
        }
    }

    /// JSON of the record this operation touches, for audit before/after
    pub fn subject(&self, state: &GameState) -> Option<serde_json::Value> {
        let value = match self {
            BoardOp::AddCounter { card_id, .. }
            | BoardOp::MoveCard { card_id, .. }
            | BoardOp::TapCard { card_id, .. }
            | BoardOp::RevealCard { card_id, .. } => serde_json::to_value(state.card(card_id)?),
            BoardOp::ReorderZone { zone_id, .. } | BoardOp::PublishLibraryTop { zone_id, .. } => {
                serde_json::to_value(state.zone(zone_id)?)
            }
            BoardOp::AddPlayer { player } => serde_json::to_value(state.player(&player.id)?),
            BoardOp::UpdatePlayer { player_id, .. } | BoardOp::SetViewScale { player_id, .. } => {
                serde_json::to_value(state.player(player_id)?)
            }
            BoardOp::AddZone { zone } => serde_json::to_value(state.zone(&zone.id)?),
            BoardOp::AddCard { card, .. } => serde_json::to_value(state.card(&card.id)?),
            BoardOp::SetRoomLock { .. } => serde_json::to_value(&state.meta),
            BoardOp::DrawCards { player_id, .. } => {
                serde_json::to_value(state.zone_of_kind(player_id, ZoneKind::Hand)?)
            }
        };
        value.ok()
    }
}

fn zone<'a>(state: &'a GameState, id: &ZoneId) -> TabletopResult<&'a Zone> {
    state
        .zone(id)
        .ok_or_else(|| TabletopError::Validation(format!("unknown zone {id}")))
}

fn player<'a>(state: &'a GameState, id: &PlayerId) -> TabletopResult<&'a Player> {
    state
        .player(id)
        .ok_or_else(|| TabletopError::Validation(format!("unknown player {id}")))
}

fn owned_zone<'a>(state: &'a GameState, owner: &PlayerId, kind: ZoneKind) -> TabletopResult<&'a Zone> {
    state
        .zone_of_kind(owner, kind)
        .ok_or_else(|| TabletopError::Validation(format!("{owner} has no {kind} zone")))
}

/// Card record and the zone listing it; a listed id without a record is
/// treated as a concealed card owned by the zone owner
fn card_and_zone<'a>(state: &'a GameState, card_id: &CardId) -> TabletopResult<(Card, &'a Zone)> {
    let zone_id = state
        .zone_containing(card_id)
        .ok_or_else(|| TabletopError::Validation(format!("card {card_id} is not in any zone")))?;
    let zone = zone(state, zone_id)?;
    let card = state.card(card_id).cloned().unwrap_or_else(|| {
        Card::placeholder(card_id.clone(), zone.id.clone(), zone.owner_id.clone())
    });
    Ok((card, zone))
}
