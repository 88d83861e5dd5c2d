//! Whole-board snapshot and the semantic transforms applied to it
//!
//! `GameState` is what a [`crate::room::RoomDoc`] materializes into, what the
//! intent reconciler replays over, and what the overlay merger produces. The
//! transforms here are the single implementation of the board rules; the
//! gateway runs them against a freshly read document snapshot inside the
//! transaction, so every remote write is re-validated at apply time.

use std::collections::{BTreeMap, BTreeSet};
use std::ops::RangeInclusive;

use serde::{Deserialize, Serialize};

use super::{
    Card, CardId, CardIdentity, FaceDownMode, Player, PlayerId, PlayerUpdate, Position, Visibility,
    Zone, ZoneId, ZoneKind,
};
use crate::error::{TabletopError, TabletopResult};

/// Room-level metadata stored alongside the board
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RoomMeta {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub host_id: Option<PlayerId>,
    #[serde(default)]
    pub locked: bool,
}

/// Identity published to every peer for a card in a concealed position
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RevealRecord {
    pub identity: CardIdentity,
    /// Published because the owner plays with the library top revealed
    #[serde(default)]
    pub library_top: bool,
}

/// Where a moved card lands and how it is presented
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Placement {
    /// Insert index in the destination list; None puts the card on top
    pub index: Option<usize>,
    pub position: Option<Position>,
    /// Enter face down (public destinations only)
    pub face_down: Option<FaceDownMode>,
    /// Identity known to the mover, needed when a concealed card goes public
    pub identity: Option<CardIdentity>,
}

/// Materialized board state of one room
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GameState {
    #[serde(default)]
    pub players: BTreeMap<PlayerId, Player>,
    #[serde(default)]
    pub zones: BTreeMap<ZoneId, Zone>,
    #[serde(default)]
    pub cards: BTreeMap<CardId, Card>,
    #[serde(default)]
    pub reveals: BTreeMap<CardId, RevealRecord>,
    /// Counter kind to display color; first writer wins
    #[serde(default)]
    pub counter_colors: BTreeMap<String, String>,
    #[serde(default)]
    pub meta: RoomMeta,
}

impl GameState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn card(&self, id: &CardId) -> Option<&Card> {
        self.cards.get(id)
    }

    pub fn zone(&self, id: &ZoneId) -> Option<&Zone> {
        self.zones.get(id)
    }

    pub fn player(&self, id: &PlayerId) -> Option<&Player> {
        self.players.get(id)
    }

    /// First zone of `kind` owned by `owner`
    pub fn zone_of_kind(&self, owner: &PlayerId, kind: ZoneKind) -> Option<&Zone> {
        self.zones
            .values()
            .find(|z| z.kind == kind && &z.owner_id == owner)
    }

    /// Number of cards listed in `owner`'s zone of `kind`
    pub fn zone_len(&self, owner: &PlayerId, kind: ZoneKind) -> usize {
        self.zone_of_kind(owner, kind)
            .map(|z| z.card_ids.len())
            .unwrap_or(0)
    }

    /// Verify the zone-membership invariant over every card record.
    ///
    /// Each card's zone must exist and list it exactly once, and no zone may
    /// list an id whose record points elsewhere. Ids without a record are
    /// allowed (concealed cards not yet resolved).
    pub fn check_membership(&self) -> Result<(), String> {
        for card in self.cards.values() {
            let zone = self
                .zones
                .get(&card.zone_id)
                .ok_or_else(|| format!("card {} points at missing zone {}", card.id, card.zone_id))?;
            let hits = zone.card_ids.iter().filter(|id| **id == card.id).count();
            if hits != 1 {
                return Err(format!(
                    "card {} listed {} times in zone {}",
                    card.id, hits, zone.id
                ));
            }
        }
        let mut seen = BTreeSet::new();
        for zone in self.zones.values() {
            for id in &zone.card_ids {
                if !seen.insert(id) {
                    return Err(format!("card {id} listed in more than one zone"));
                }
                if let Some(card) = self.cards.get(id) {
                    if card.zone_id != zone.id {
                        return Err(format!(
                            "zone {} lists card {} which belongs to {}",
                            zone.id, id, card.zone_id
                        ));
                    }
                }
            }
        }
        Ok(())
    }

    // ------------------------------------------------------------------
    // Transforms
    // ------------------------------------------------------------------

    pub fn upsert_player(&mut self, player: Player) {
        self.players.insert(player.id.clone(), player);
    }

    pub fn update_player(
        &mut self,
        id: &PlayerId,
        update: &PlayerUpdate,
        life_bounds: &RangeInclusive<i32>,
    ) -> TabletopResult<()> {
        let player = self
            .players
            .get_mut(id)
            .ok_or_else(|| TabletopError::Validation(format!("unknown player {id}")))?;
        player.apply(update, life_bounds);
        Ok(())
    }

    pub fn add_zone(&mut self, zone: Zone) -> TabletopResult<()> {
        if self.zones.contains_key(&zone.id) {
            return Err(TabletopError::Validation(format!("zone {} already exists", zone.id)));
        }
        for id in &zone.card_ids {
            if self.zone_containing(id).is_some() {
                return Err(TabletopError::Validation(format!(
                    "card {id} already belongs to another zone"
                )));
            }
        }
        self.zones.insert(zone.id.clone(), zone);
        Ok(())
    }

    /// Add a new card to the zone named by `card.zone_id`
    pub fn add_card(&mut self, card: Card, index: Option<usize>) -> TabletopResult<()> {
        if self.cards.contains_key(&card.id) || self.zone_containing(&card.id).is_some() {
            return Err(TabletopError::Validation(format!("card {} already exists", card.id)));
        }
        let zone = self
            .zones
            .get_mut(&card.zone_id)
            .ok_or_else(|| TabletopError::Validation(format!("unknown zone {}", card.zone_id)))?;
        zone.insert(card.id.clone(), index);
        self.cards.insert(card.id.clone(), card);
        Ok(())
    }

    /// Remove a card from the table entirely
    pub fn remove_card(&mut self, id: &CardId) -> bool {
        let mut found = self.cards.remove(id).is_some();
        for zone in self.zones.values_mut() {
            found |= zone.remove(id);
        }
        self.reveals.remove(id);
        found
    }

    /// Move a card between (or within) zones.
    ///
    /// Leaving the battlefield drops board state; tokens leaving the
    /// battlefield cease to exist. Entering the battlefield hands control to
    /// the destination's owner.
    pub fn move_card(
        &mut self,
        card_id: &CardId,
        to_zone: &ZoneId,
        placement: Placement,
    ) -> TabletopResult<()> {
        let (dest_kind, dest_owner) = self
            .zones
            .get(to_zone)
            .map(|z| (z.kind, z.owner_id.clone()))
            .ok_or_else(|| TabletopError::Validation(format!("unknown zone {to_zone}")))?;
        let (from_zone, from_kind, from_owner) = self
            .zones
            .values()
            .find(|z| z.contains(card_id))
            .map(|z| (z.id.clone(), z.kind, z.owner_id.clone()))
            .ok_or_else(|| TabletopError::Validation(format!("card {card_id} is not in any zone")))?;

        let mut card = self
            .cards
            .remove(card_id)
            .unwrap_or_else(|| Card::placeholder(card_id.clone(), from_zone.clone(), from_owner));

        if let Some(zone) = self.zones.get_mut(&from_zone) {
            zone.remove(card_id);
        }

        let leaving_battlefield =
            from_kind == ZoneKind::Battlefield && dest_kind != ZoneKind::Battlefield;

        if leaving_battlefield && card.is_token {
            self.reveals.remove(card_id);
            return Ok(());
        }
        if leaving_battlefield {
            card.reset_board_state();
        }

        if card.identity.is_none() {
            card.identity = placement
                .identity
                .clone()
                .or_else(|| self.reveals.get(card_id).map(|r| r.identity.clone()));
        }

        card.visibility = match (dest_kind.is_public(), placement.face_down) {
            (true, Some(mode)) => Visibility::FaceDown { mode },
            (true, None) => Visibility::Standard,
            // The whole table saw it go back to hand
            (false, _) if from_kind.is_public() && dest_kind == ZoneKind::Hand => {
                Visibility::KnownToAll
            }
            (false, _) if from_kind == dest_kind => card.visibility.clone(),
            (false, _) => Visibility::Standard,
        };

        match &card.visibility {
            Visibility::KnownToAll => {
                if let Some(identity) = card.identity.clone() {
                    self.reveals.insert(
                        card_id.clone(),
                        RevealRecord {
                            identity,
                            library_top: false,
                        },
                    );
                }
            }
            Visibility::RevealedToAll => {}
            _ => {
                self.reveals.remove(card_id);
            }
        }

        card.zone_id = to_zone.clone();
        if dest_kind != ZoneKind::Battlefield {
            card.controller_id = card.owner_id.clone();
        } else if from_zone != *to_zone {
            card.controller_id = dest_owner;
        }
        if let Some(pos) = placement.position {
            card.position = pos;
        }

        if let Some(zone) = self.zones.get_mut(to_zone) {
            zone.insert(card_id.clone(), placement.index);
        }
        self.cards.insert(card_id.clone(), card);
        Ok(())
    }

    pub fn set_tapped(&mut self, card_id: &CardId, tapped: bool) -> TabletopResult<()> {
        let card = self.card_mut(card_id)?;
        card.tapped = tapped;
        Ok(())
    }

    /// Apply a counter delta, registering the kind's color on first use.
    ///
    /// Returns the resulting count (0 means the entry was removed).
    pub fn add_counter(
        &mut self,
        card_id: &CardId,
        kind: &str,
        delta: i64,
        color: Option<&str>,
    ) -> TabletopResult<u32> {
        if let Some(color) = color {
            self.counter_colors
                .entry(kind.to_string())
                .or_insert_with(|| color.to_string());
        }
        let registered = self.counter_colors.get(kind).cloned();
        let card = self.card_mut(card_id)?;
        Ok(card.apply_counter_delta(kind, delta, registered.as_deref().or(color)))
    }

    /// Replace a zone's ordering with a permutation of the same ids
    pub fn reorder_zone(&mut self, zone_id: &ZoneId, order: Vec<CardId>) -> TabletopResult<()> {
        let zone = self
            .zones
            .get_mut(zone_id)
            .ok_or_else(|| TabletopError::Validation(format!("unknown zone {zone_id}")))?;
        if !zone.is_permutation(&order) {
            return Err(TabletopError::Validation(format!(
                "new order for {zone_id} is not a permutation of its cards"
            )));
        }
        let top_changed = zone.top() != order.last();
        let kind = zone.kind;
        zone.card_ids = order;
        if top_changed && kind == ZoneKind::Library {
            self.reveals.retain(|_, r| !r.library_top);
        }
        Ok(())
    }

    /// Change who may see a card.
    ///
    /// `identity` is published for reveals to everyone; targeted reveals are
    /// delivered privately and only recorded as a viewer set here.
    pub fn set_visibility(
        &mut self,
        card_id: &CardId,
        visibility: Visibility,
        identity: Option<CardIdentity>,
    ) -> TabletopResult<()> {
        let card = self.card_mut(card_id)?;
        card.visibility = visibility.clone();
        let known = identity.or_else(|| card.identity.clone());
        if visibility.is_public_knowledge() {
            if let Some(identity) = known {
                self.reveals.insert(
                    card_id.clone(),
                    RevealRecord {
                        identity,
                        library_top: false,
                    },
                );
            }
        } else {
            self.reveals.remove(card_id);
        }
        Ok(())
    }

    /// Publish (or withdraw) the identity of the top card of a library
    pub fn publish_library_top(
        &mut self,
        zone_id: &ZoneId,
        identity: Option<CardIdentity>,
    ) -> TabletopResult<()> {
        let zone = self
            .zones
            .get(zone_id)
            .ok_or_else(|| TabletopError::Validation(format!("unknown zone {zone_id}")))?;
        let members: BTreeSet<CardId> = zone.card_ids.iter().cloned().collect();
        let top = zone.top().cloned();
        self.reveals
            .retain(|id, r| !(r.library_top && members.contains(id)));
        if let (Some(top), Some(identity)) = (top, identity) {
            self.reveals.insert(
                top,
                RevealRecord {
                    identity,
                    library_top: true,
                },
            );
        }
        Ok(())
    }

    pub fn set_locked(&mut self, locked: bool) {
        self.meta.locked = locked;
    }

    /// Id of the zone whose list currently contains `card_id`
    pub fn zone_containing(&self, card_id: &CardId) -> Option<&ZoneId> {
        self.zones
            .values()
            .find(|z| z.contains(card_id))
            .map(|z| &z.id)
    }

    fn card_mut(&mut self, card_id: &CardId) -> TabletopResult<&mut Card> {
        self.cards
            .get_mut(card_id)
            .ok_or_else(|| TabletopError::Validation(format!("unknown card {card_id}")))
    }

    /// Deterministic replacement host: the smallest remaining player id
    pub fn next_host(&self, departing: &PlayerId) -> Option<PlayerId> {
        self.players.keys().find(|id| *id != departing).cloned()
    }
}

/// Two seated players, each with hand, library, battlefield and graveyard
/// zones named `<kind>-<player>`
#[cfg(test)]
pub(crate) fn two_player_table() -> GameState {
    let mut state = GameState::new();
    for (id, name) in [("p1", "Alice"), ("p2", "Bob")] {
        state.upsert_player(Player::new(id, name, 40));
        for kind in [
            ZoneKind::Hand,
            ZoneKind::Library,
            ZoneKind::Battlefield,
            ZoneKind::Graveyard,
        ] {
            state
                .add_zone(Zone::new(format!("{kind}-{id}"), kind, id))
                .unwrap();
        }
    }
    state
}
