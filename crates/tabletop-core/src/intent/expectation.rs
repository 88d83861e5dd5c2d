//! What the authoritative state looks like once an intent has landed
//!
//! Computed once at submission from the displayed state before and after the
//! optimistic apply. Replay checks it against each new authoritative snapshot
//! so an operation the document already carries is never applied twice.
//!
//! Relative operations (counter and life deltas) cannot predict an absolute
//! result when peers change the same value concurrently. They record the
//! confirmed value at submission instead and count as landed once the
//! authoritative value moves off it.

use std::ops::RangeInclusive;

use crate::ops::BoardOp;
use crate::types::{CardId, GameState, Player, PlayerId, PlayerUpdate, Visibility, ZoneId, ZoneKind};

#[derive(Debug, Clone, PartialEq)]
pub enum Expectation {
    /// Every listed card sits in `zone`
    CardsInZone { cards: Vec<CardId>, zone: ZoneId },
    /// The card no longer exists (token left the battlefield)
    CardGone(CardId),
    Tapped { card: CardId, tapped: bool },
    CounterEquals { card: CardId, kind: String, count: u32 },
    /// The counter no longer holds the confirmed value seen at submission
    CounterMoved { card: CardId, kind: String, base: u32 },
    ZoneOrder { zone: ZoneId, order: Vec<CardId> },
    PlayerPresent(PlayerId),
    /// The fields named by `update` hold the values in `expected`.
    ///
    /// With `life_base` set, life only has to differ from it.
    PlayerFields {
        expected: Player,
        update: PlayerUpdate,
        life_base: Option<i32>,
    },
    ZonePresent(ZoneId),
    Locked(bool),
    Visibility { card: CardId, visibility: Visibility },
    /// `card` (or nothing, when None) is the published top of `zone`
    LibraryTop { zone: ZoneId, card: Option<CardId> },
}

impl Expectation {
    /// Derive the expectation for `op` from the state before and after it.
    ///
    /// `confirmed` is the authoritative state at submission; relative
    /// operations take their base from it. Returns None when `after` does not
    /// carry the touched record, which only happens for operations that failed
    /// to apply.
    pub fn derive(
        op: &BoardOp,
        confirmed: &GameState,
        before: &GameState,
        after: &GameState,
    ) -> Option<Self> {
        let expectation = match op {
            BoardOp::AddCounter { card_id, kind, .. } => {
                let count = after.card(card_id)?.counter(kind);
                let shown = before.card(card_id).map(|c| c.counter(kind)).unwrap_or(0);
                if count == shown {
                    // Clamped to a no-op; the absolute value is safe to compare
                    Expectation::CounterEquals {
                        card: card_id.clone(),
                        kind: kind.clone(),
                        count,
                    }
                } else {
                    Expectation::CounterMoved {
                        card: card_id.clone(),
                        kind: kind.clone(),
                        base: confirmed.card(card_id).map(|c| c.counter(kind)).unwrap_or(0),
                    }
                }
            }
            BoardOp::MoveCard {
                card_id,
                to_zone_id,
                ..
            } => {
                if after.zone_containing(card_id).is_none() {
                    Expectation::CardGone(card_id.clone())
                } else {
                    Expectation::CardsInZone {
                        cards: vec![card_id.clone()],
                        zone: to_zone_id.clone(),
                    }
                }
            }
            BoardOp::TapCard { card_id, tapped } => Expectation::Tapped {
                card: card_id.clone(),
                tapped: *tapped,
            },
            BoardOp::ReorderZone { zone_id, order } => Expectation::ZoneOrder {
                zone: zone_id.clone(),
                order: order.clone(),
            },
            BoardOp::AddPlayer { player } => Expectation::PlayerPresent(player.id.clone()),
            BoardOp::UpdatePlayer { player_id, update } => {
                let expected = after.player(player_id)?.clone();
                let shown = before.player(player_id).map(|p| p.life);
                let relative = update.life.is_none() && update.life_delta.is_some();
                let life_base = if relative && shown != Some(expected.life) {
                    Some(
                        confirmed
                            .player(player_id)
                            .map(|p| p.life)
                            .or(shown)
                            .unwrap_or(expected.life),
                    )
                } else {
                    None
                };
                Expectation::PlayerFields {
                    expected,
                    update: update.clone(),
                    life_base,
                }
            }
            BoardOp::SetViewScale { player_id, scale } => Expectation::PlayerFields {
                expected: after.player(player_id)?.clone(),
                update: PlayerUpdate {
                    view_scale: Some(*scale),
                    ..Default::default()
                },
                life_base: None,
            },
            BoardOp::AddZone { zone } => Expectation::ZonePresent(zone.id.clone()),
            BoardOp::AddCard { card, .. } => Expectation::CardsInZone {
                cards: vec![card.id.clone()],
                zone: card.zone_id.clone(),
            },
            BoardOp::SetRoomLock { locked } => Expectation::Locked(*locked),
            BoardOp::RevealCard {
                card_id,
                visibility,
                ..
            } => Expectation::Visibility {
                card: card_id.clone(),
                visibility: visibility.clone(),
            },
            BoardOp::PublishLibraryTop { zone_id, identity } => Expectation::LibraryTop {
                zone: zone_id.clone(),
                card: identity
                    .as_ref()
                    .and_then(|_| before.zone(zone_id)?.top().cloned()),
            },
            BoardOp::DrawCards { player_id, .. } => {
                let hand = after.zone_of_kind(player_id, ZoneKind::Hand)?;
                let before_hand = before.zone_of_kind(player_id, ZoneKind::Hand)?;
                let drawn = hand
                    .card_ids
                    .iter()
                    .filter(|id| !before_hand.contains(id))
                    .cloned()
                    .collect();
                Expectation::CardsInZone {
                    cards: drawn,
                    zone: hand.id.clone(),
                }
            }
        };
        Some(expectation)
    }

    /// Whether `state` already reflects the intent
    pub fn is_met(&self, state: &GameState) -> bool {
        match self {
            Expectation::CardsInZone { cards, zone } => state
                .zone(zone)
                .map(|z| cards.iter().all(|id| z.contains(id)))
                .unwrap_or(false),
            Expectation::CardGone(card) => {
                state.card(card).is_none() && state.zone_containing(card).is_none()
            }
            Expectation::Tapped { card, tapped } => {
                state.card(card).map(|c| c.tapped == *tapped).unwrap_or(false)
            }
            Expectation::CounterEquals { card, kind, count } => state
                .card(card)
                .map(|c| c.counter(kind) == *count)
                .unwrap_or(false),
            Expectation::CounterMoved { card, kind, base } => state
                .card(card)
                .map(|c| c.counter(kind) != *base)
                .unwrap_or(false),
            Expectation::ZoneOrder { zone, order } => state
                .zone(zone)
                .map(|z| &z.card_ids == order)
                .unwrap_or(false),
            Expectation::PlayerPresent(id) => state.player(id).is_some(),
            Expectation::PlayerFields {
                expected,
                update,
                life_base,
            } => state
                .player(&expected.id)
                .map(|actual| player_fields_match(actual, expected, update, *life_base))
                .unwrap_or(false),
            Expectation::ZonePresent(id) => state.zone(id).is_some(),
            Expectation::Locked(locked) => state.meta.locked == *locked,
            Expectation::Visibility { card, visibility } => state
                .card(card)
                .map(|c| &c.visibility == visibility)
                .unwrap_or(false),
            Expectation::LibraryTop { zone, card } => {
                let Some(zone) = state.zone(zone) else {
                    return false;
                };
                let published = zone
                    .card_ids
                    .iter()
                    .find(|id| state.reveals.get(*id).map(|r| r.library_top).unwrap_or(false));
                published == card.as_ref()
            }
        }
    }
}

fn player_fields_match(
    actual: &Player,
    expected: &Player,
    update: &PlayerUpdate,
    life_base: Option<i32>,
) -> bool {
    let life_touched = update.life.is_some() || update.life_delta.is_some();
    let life_ok = match life_base {
        Some(base) => actual.life != base,
        None => !life_touched || actual.life == expected.life,
    };
    (update.name.is_none() || actual.name == expected.name)
        && life_ok
        && update
            .commander_damage
            .keys()
            .all(|k| actual.commander_damage.get(k) == expected.commander_damage.get(k))
        && (update.commander_tax.is_none() || actual.commander_tax == expected.commander_tax)
        && (update.deck_loaded.is_none() || actual.deck_loaded == expected.deck_loaded)
        && (update.library_top_reveal.is_none()
            || actual.library_top_reveal == expected.library_top_reveal)
        && (update.view_scale.is_none() || actual.view_scale == expected.view_scale)
}

/// Apply `op` to a copy of `before`, returning the result and its expectation
pub(crate) fn apply_with_expectation(
    op: &BoardOp,
    confirmed: &GameState,
    before: &GameState,
    life_bounds: &RangeInclusive<i32>,
) -> crate::error::TabletopResult<(GameState, Option<Expectation>)> {
    let mut after = before.clone();
    op.apply(&mut after, life_bounds)?;
    let expectation = Expectation::derive(op, confirmed, before, &after);
    Ok((after, expectation))
}
